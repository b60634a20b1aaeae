// Refresh scheduler - one timer for every parameter instead of one per consumer
use crate::application::forecast_store::{ForecastStore, RefreshOutcome};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Spawn a task that calls `refresh_all` immediately and then every `period`.
///
/// A tick that fires while the previous round is still running is skipped.
pub fn spawn_refresh_scheduler(store: ForecastStore, period: Duration) -> JoinHandle<()> {
    info!("Refresh scheduler started (every {}s)", period.as_secs());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            debug!("Scheduled refresh of all parameters");

            let outcomes = store.refresh_all().await;
            let refreshed = outcomes
                .iter()
                .filter(|(_, outcome)| matches!(outcome, RefreshOutcome::Refreshed { .. }))
                .count();
            info!(
                "Scheduled refresh done: {}/{} parameters refreshed",
                refreshed,
                outcomes.len()
            );
        }
    })
}
