//! Background reaper
//!
//! A single periodic task evicting surplus idle sandboxes. It holds only a
//! weak reference, so a dropped pool stops it too.

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::SandboxPool;

pub(crate) struct Reaper {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Reaper {
    pub fn spawn(pool: Weak<SandboxPool>, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Reaper started, interval: {:?}", period);

            // Skip the first immediate tick
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        let evicted = pool.reap().await;
                        if evicted > 0 {
                            info!(evicted, "Reaped idle sandboxes");
                        } else {
                            debug!("Reaper tick: nothing to evict");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }

            info!("Reaper stopped");
        });

        Reaper { stop_tx, handle }
    }

    /// Stop without waiting
    pub fn abort(self) {
        self.handle.abort();
    }

    /// Signal the task and wait for it to finish its current tick
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}
