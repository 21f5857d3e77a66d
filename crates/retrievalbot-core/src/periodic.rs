//! Fixed-interval loop shared by the mirror, scheduler and reaper.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Run `pass` every `interval` until `shutdown` flips to true or its sender
/// is dropped. The first pass starts immediately.
///
/// A pass in flight when shutdown arrives is dropped at its next await
/// point; passes must only make writes visible in self-contained steps.
pub async fn every<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut pass: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        debug!(loop_name = name, "pass starting");
        tokio::select! {
            changed = shutdown.changed() => {
                info!(loop_name = name, "pass cancelled by shutdown");
                if changed.is_err() {
                    break;
                }
            }
            () = pass() => {}
        }
    }
    info!(loop_name = name, "loop stopped");
}
