use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use locrelay::config::DEFAULT_HUB_URL;
use locrelay::{
    ConfigError, ConnectionManager, ConnectionState, HubConnector, LocationSample, ManagerConfig, RelayError,
    WsConnector,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Please enter your email address")]
    MissingUser,
    #[error("invalid hub URL: {0}")]
    InvalidHubUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed: HTTP {0}")]
    HealthCheck(u16),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

#[derive(Parser, Debug)]
#[command(name = "locrelay", about = "Send and watch live locations through a relay hub")]
struct Cli {
    #[arg(long, env = "LOCRELAY_HUB_URL", default_value = DEFAULT_HUB_URL)]
    hub_url: String,

    /// Skip the hub and simulate sends locally.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone)]
struct CliContext {
    hub_url: String,
    mock: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the hub answers its health probe.
    Ping,
    /// Publish a location once, or repeatedly with `--every`.
    Send(SendArgs),
    /// Print every location the hub relays to this client.
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(long)]
    user: String,
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,
    /// Live tracking: resend every N seconds until Ctrl-C or `--count`.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    every: Option<u64>,
    #[arg(long)]
    count: Option<u64>,
    /// Seconds to wait for the hub before sending.
    #[arg(long, default_value_t = 3)]
    connect_wait: u64,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Stop after this many samples.
    #[arg(long)]
    max: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = CliContext { hub_url: cli.hub_url, mock: cli.mock };

    match cli.command {
        Command::Ping => run_ping(&ctx).await,
        Command::Send(args) => run_send(&ctx, args).await,
        Command::Watch(args) => run_watch(&ctx, args).await,
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn run_ping(ctx: &CliContext) -> Result<(), CliError> {
    let url = healthz_url(&ctx.hub_url)?;
    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::HealthCheck(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn run_send(ctx: &CliContext, args: SendArgs) -> Result<(), CliError> {
    let user = validate_user(&args.user)?;
    let manager = open_manager(ctx)?;
    let state = wait_until_usable(&manager, Duration::from_secs(args.connect_wait)).await;
    info!(%state, "cli: ready to send");

    let Some(every) = args.every else {
        let result = send_once(&manager, user, args.lat, args.lon).await;
        if result.is_ok() {
            report(&manager, 1);
        }
        manager.close();
        return result;
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(every));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut sent: u64 = 0;

    let result = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = send_once(&manager, user, args.lat, args.lon).await {
                    break Err(e);
                }
                sent += 1;
                report(&manager, sent);
                if args.count.is_some_and(|max| sent >= max) {
                    break Ok(());
                }
            }
            _ = &mut ctrl_c => break Ok(()),
        }
    };
    manager.close();
    result
}

async fn run_watch(ctx: &CliContext, args: WatchArgs) -> Result<(), CliError> {
    let manager = open_manager(ctx)?;
    let mut states = manager.subscribe_state();
    let mut samples = manager.subscribe_samples();
    println!("{}", format_state(manager.state(), manager.last_error().as_deref()));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut seen: u64 = 0;

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                println!("{}", format_state(state, manager.last_error().as_deref()));
            }
            changed = samples.changed() => {
                if changed.is_err() {
                    break;
                }
                let sample = samples.borrow_and_update().clone();
                if let Some(sample) = sample {
                    println!("{}", format_sample(&sample));
                    seen += 1;
                    if args.max.is_some_and(|max| seen >= max) {
                        break;
                    }
                }
            }
            _ = &mut ctrl_c => break,
        }
    }
    manager.close();
    Ok(())
}

// =============================================================================
// HELPERS
// =============================================================================

fn open_manager(ctx: &CliContext) -> Result<ConnectionManager, CliError> {
    let config = ManagerConfig { hub_url: ctx.hub_url.clone(), ..ManagerConfig::from_env()? };
    let connector: Arc<dyn HubConnector> = Arc::new(WsConnector::from_config(&config));
    if ctx.mock {
        let manager = ConnectionManager::new(config, connector);
        manager.enable_mock_mode();
        return Ok(manager);
    }
    Ok(ConnectionManager::start(config, connector))
}

/// Wait until the manager can carry a send, or `wait` runs out.
async fn wait_until_usable(manager: &ConnectionManager, wait: Duration) -> ConnectionState {
    let mut states = manager.subscribe_state();
    let ready = tokio::time::timeout(wait, async {
        let _ = states
            .wait_for(|s| s.is_live() || s.is_mock())
            .await;
    })
    .await;
    if ready.is_err() {
        warn!(wait_secs = wait.as_secs(), "cli: hub not ready, sending anyway");
    }
    manager.state()
}

/// Send one sample. A failed hub send is reported but not fatal: the manager
/// has already fallen back to mock mode.
async fn send_once(manager: &ConnectionManager, user: &str, lat: f64, lon: f64) -> Result<(), CliError> {
    match manager.send_location(lat, lon, user).await {
        Ok(()) => Ok(()),
        Err(e @ RelayError::SendFailed { .. }) => {
            eprintln!("warning: {e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn report(manager: &ConnectionManager, sent: u64) {
    println!("sent {sent} ({})", manager.state());
    if let Some(error) = manager.last_error() {
        eprintln!("warning: {error}");
    }
}

fn validate_user(user: &str) -> Result<&str, CliError> {
    let user = user.trim();
    if user.is_empty() {
        return Err(CliError::MissingUser);
    }
    Ok(user)
}

/// Health probe URL for the hub: same origin, `/healthz`.
fn healthz_url(hub_url: &str) -> Result<String, CliError> {
    let trimmed = hub_url.trim().trim_end_matches('/');
    let base = trimmed.strip_suffix("/hub").unwrap_or(trimmed);
    let origin = if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{rest}")
    } else if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if base.starts_with("http://") || base.starts_with("https://") {
        base.to_owned()
    } else {
        return Err(CliError::InvalidHubUrl(hub_url.to_owned()));
    };
    Ok(format!("{origin}/healthz"))
}

fn format_state(state: ConnectionState, error: Option<&str>) -> String {
    match error {
        Some(error) => format!("state: {state} ({error})"),
        None => format!("state: {state}"),
    }
}

fn format_sample(sample: &LocationSample) -> String {
    let observed = sample.observed_at.and_then(format_timestamp).unwrap_or_else(|| "-".to_owned());
    format!(
        "{}  lat {:.6}  lon {:.6}  at {observed}",
        sample.origin_id, sample.latitude, sample.longitude
    )
}

fn format_timestamp(ms: i64) -> Option<String> {
    let nanos = i128::from(ms) * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?.format(&Rfc3339).ok()
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
