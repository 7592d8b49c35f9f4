use super::*;

#[test]
fn empty_user_is_rejected_with_prompt() {
    let err = validate_user("   ").unwrap_err();
    assert!(matches!(err, CliError::MissingUser));
    assert_eq!(err.to_string(), "Please enter your email address");
    assert_eq!(validate_user(" a@b.com ").unwrap(), "a@b.com");
}

#[test]
fn healthz_url_uses_hub_origin() {
    assert_eq!(healthz_url("http://127.0.0.1:3000/hub").unwrap(), "http://127.0.0.1:3000/healthz");
    assert_eq!(healthz_url("https://relay.example.com/hub/").unwrap(), "https://relay.example.com/healthz");
    assert_eq!(healthz_url("ws://h:3000/hub").unwrap(), "http://h:3000/healthz");
    assert_eq!(healthz_url("wss://h").unwrap(), "https://h/healthz");
    assert!(matches!(healthz_url("h:3000/hub"), Err(CliError::InvalidHubUrl(_))));
}

#[test]
fn sample_prints_six_decimals_and_rfc3339_time() {
    let sample = LocationSample {
        origin_id: "a@b.com".into(),
        latitude: 23.8103,
        longitude: -90.4125,
        observed_at: Some(1_700_000_000_000),
    };
    assert_eq!(
        format_sample(&sample),
        "a@b.com  lat 23.810300  lon -90.412500  at 2023-11-14T22:13:20Z"
    );

    let unstamped = LocationSample::new("x", 1.0, 2.0);
    assert!(format_sample(&unstamped).ends_with("at -"));
}

#[test]
fn state_line_includes_error_when_present() {
    assert_eq!(format_state(ConnectionState::Connected, None), "state: connected");
    assert_eq!(
        format_state(ConnectionState::MockActive, Some("Using mock mode - no server connection")),
        "state: mock_active (Using mock mode - no server connection)"
    );
}

#[test]
fn send_args_accept_negative_coordinates() {
    let cli = Cli::try_parse_from([
        "locrelay", "--mock", "send", "--user", "a@b.com", "--lat", "-33.87", "--lon", "151.2", "--every", "5",
    ])
    .unwrap();
    assert!(cli.mock);
    let Command::Send(args) = cli.command else {
        panic!("expected send");
    };
    assert!((args.lat + 33.87).abs() < f64::EPSILON);
    assert_eq!(args.every, Some(5));
    assert_eq!(args.connect_wait, 3);
    assert_eq!(args.count, None);
}

#[test]
fn zero_interval_is_rejected() {
    let result = Cli::try_parse_from(["locrelay", "send", "--user", "x", "--lat", "1", "--lon", "2", "--every", "0"]);
    assert!(result.is_err());
}

#[tokio::test]
async fn mock_send_reports_without_network() {
    let ctx = CliContext { hub_url: "http://127.0.0.1:9/hub".into(), mock: true };
    let manager = open_manager(&ctx).unwrap();
    assert_eq!(wait_until_usable(&manager, Duration::from_secs(1)).await, ConnectionState::MockActive);

    send_once(&manager, "a@b.com", 23.81, 90.41).await.unwrap();
    let sample = manager.latest_sample().expect("echoed");
    assert!(sample.same_reading(&LocationSample::new("a@b.com", 23.81, 90.41)));

    let err = send_once(&manager, "a@b.com", 0.0, 90.41).await.unwrap_err();
    assert!(matches!(err, CliError::Relay(RelayError::InvalidInput { .. })));
}
