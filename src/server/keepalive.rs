use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub fn health_url(app_url: &str) -> String {
    format!("{}/health", app_url.trim_end_matches('/'))
}

/// Periodically GET the deployment's own health endpoint so idle hosting platforms
/// keep the process awake. Runs until `shutdown` fires.
pub async fn run(app_url: String, every: Duration, shutdown: CancellationToken) {
    let url = health_url(&app_url);
    let client = reqwest::Client::new();
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick fires immediately
    ticker.tick().await;

    info!(url = %url, every_secs = every.as_secs(), "keep-alive active");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => match client.get(&url).send().await {
                Ok(resp) => info!(status = %resp.status(), "keep-alive heartbeat"),
                Err(e) => warn!(error = %e, "keep-alive heartbeat failed"),
            },
        }
    }
}
