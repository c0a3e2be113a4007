use std::sync::Arc;
use std::time::Duration;

use evaluator_domain::{Lease, LeaseQueue};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum KeeperState {
    Idle,
    Renewing {
        token: CancellationToken,
        handle: JoinHandle<u32>,
    },
}

/// 任务执行期间周期性延长消息的可见性超时
pub struct LeaseKeeper {
    queue: Arc<dyn LeaseQueue>,
    interval: Duration,
    extension: Duration,
    state: KeeperState,
}

impl LeaseKeeper {
    pub fn new(queue: Arc<dyn LeaseQueue>, interval: Duration, extension: Duration) -> Self {
        Self {
            queue,
            interval,
            extension,
            state: KeeperState::Idle,
        }
    }

    pub fn is_renewing(&self) -> bool {
        matches!(self.state, KeeperState::Renewing { .. })
    }

    /// 开始续租；已在续租时保持原任务
    pub fn start(&mut self, lease: Lease) {
        if self.is_renewing() {
            warn!("Lease keeper already renewing, ignoring {}", lease.receipt);
            return;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let queue = Arc::clone(&self.queue);
        let period = self.interval;
        let extension = self.extension;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut renewals = 0u32;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        renewals += 1;
                        match queue.extend_visibility(&lease, extension).await {
                            Ok(()) => {
                                metrics::counter!("evaluator_lease_renewals_total").increment(1);
                                debug!(
                                    "Extended lease {} by {}s",
                                    lease.receipt,
                                    extension.as_secs()
                                );
                            }
                            Err(e) => warn!("Failed to extend lease {}: {}", lease.receipt, e),
                        }
                    }
                }
            }
            renewals
        });

        self.state = KeeperState::Renewing { token, handle };
    }

    /// 停止续租并等待后台任务退出，返回续租次数
    pub async fn stop(&mut self) -> u32 {
        match std::mem::replace(&mut self.state, KeeperState::Idle) {
            KeeperState::Idle => 0,
            KeeperState::Renewing { token, handle } => {
                token.cancel();
                match handle.await {
                    Ok(renewals) => {
                        info!("Lease keeper stopped after {} renewals", renewals);
                        renewals
                    }
                    Err(e) => {
                        warn!("Lease keeper task ended abnormally: {}", e);
                        0
                    }
                }
            }
        }
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        if let KeeperState::Renewing { token, .. } = &self.state {
            token.cancel();
        }
    }
}
