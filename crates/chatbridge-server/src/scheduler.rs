//! Periodic maintenance tasks.

use chatbridge_core::ChatClient;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Relogin every `period`, starting one period from now.
///
/// Upstream sessions expire silently after some hours; a fresh login and
/// rejoin keeps the streams alive.
pub fn spawn_relogin_schedule(client: ChatClient, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            tracing::info!(target: "chatbridge::client", "Scheduled relogin");
            if let Err(e) = client.relogin().await {
                tracing::error!(target: "chatbridge::client", "Scheduled relogin failed: {}", e);
            }
        }
    })
}
