use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::app_config::SchedulerConfig;
use crate::state::AppState;

/// Spawns the reaper, phase refresher and payment reconciler loops.
pub fn spawn_workers(state: &AppState, scheduler: &SchedulerConfig) -> Vec<JoinHandle<()>> {
    let reaper = state.reaper.clone();
    let phases = state.phases.clone();
    let orchestrator = state.orchestrator.clone();

    vec![
        tokio::spawn(run_every(
            "reaper",
            Duration::from_secs(scheduler.reaper_interval_seconds),
            move || {
                let reaper = reaper.clone();
                async move {
                    reaper.run_cycle().await;
                }
            },
        )),
        tokio::spawn(run_every(
            "phase_refresher",
            Duration::from_secs(scheduler.phase_interval_seconds),
            move || {
                let phases = phases.clone();
                async move {
                    phases.run_cycle().await;
                }
            },
        )),
        tokio::spawn(run_every(
            "payment_reconciler",
            Duration::from_secs(scheduler.reconcile_interval_seconds),
            move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.reconcile_pending().await;
                }
            },
        )),
    ]
}

/// Runs `cycle` on a fixed period. A slow cycle skips the ticks it missed
/// rather than bunching them up; cycles report their own failures.
pub async fn run_every<F, Fut>(name: &'static str, period: Duration, mut cycle: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval(period.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(worker = name, period_secs = period.as_secs(), "Worker started");

    loop {
        ticker.tick().await;
        debug!(worker = name, "Worker cycle");
        cycle().await;
    }
}
