//! Standalone CLI for watching the realtime event stream
//!
//! Run with: cargo run --features cli --bin pulse-cli

use pulse_link::{listener, Credential, LinkConfig, RealtimeLink, SessionCredentials};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pulse_link=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let mut config = match std::env::var("PULSE_CONFIG") {
        Ok(path) => LinkConfig::from_file(path)?,
        Err(_) => LinkConfig::default(),
    };
    if let Ok(url) = std::env::var("PULSE_API_URL") {
        config.api_base_url = url;
    }

    let credentials = Arc::new(SessionCredentials::default());
    match (std::env::var("PULSE_TOKEN"), std::env::var("PULSE_USER_ID")) {
        (Ok(token), Ok(user_id)) => credentials.set(Credential::new(token, user_id.parse()?)),
        _ => warn!("PULSE_TOKEN / PULSE_USER_ID not set, connecting unauthenticated"),
    }

    let link = RealtimeLink::new(config, credentials)?;
    info!(endpoint = link.endpoint(), "Connecting to realtime server");

    let log_events = listener(|event| {
        info!(event_type = %event.kind, data = %event.data, "event");
    });
    link.add_listener(&log_events);
    link.connect();

    let mut states = link.watch_state();
    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!(
                    %state,
                    attempt = link.reconnect_attempt(),
                    exhausted = link.retries_exhausted(),
                    "Connection state"
                );
            }
            _ = stats_interval.tick() => {
                let stats = link.stats();
                info!(
                    frames = stats.frames_received,
                    dropped = stats.frames_dropped,
                    events = stats.events_delivered,
                    listener_failures = stats.subscriber_failures,
                    degraded = link.is_degraded(Duration::from_secs(60)),
                    "stats"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                link.shutdown();
                break;
            }
        }
    }

    Ok(())
}
