use std::time::{Duration, Instant};

use eyre::Result;
use multichain_rs::ChainFamily;
use tracing::{debug, warn};

use super::{HeadSample, Observer};
use crate::metrics;

/// How long the head may sit still before the node counts as stalled
pub fn stale_after(family: ChainFamily) -> Duration {
    match family {
        ChainFamily::Bitcoin => Duration::from_secs(3600),
        ChainFamily::Evm | ChainFamily::Solana => Duration::from_secs(120),
    }
}

/// Result of one health check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpcStatus {
    pub height: u64,
    pub latency: Duration,
    pub stale: bool,
}

impl Observer {
    /// Check the node; staleness is reported, never treated as an error
    pub async fn check_rpc_status(&self) -> Result<RpcStatus> {
        let chain_id = self.ctx.chain_id;
        let started = Instant::now();
        let height = self.ctx.adapter.get_block_height().await?;
        let latency = started.elapsed();

        let stale = {
            let mut head = self.head.lock().unwrap_or_else(|e| e.into_inner());
            match *head {
                Some(sample) if height <= sample.height => {
                    sample.moved_at.elapsed() > stale_after(self.ctx.adapter.family())
                }
                _ => {
                    *head = Some(HeadSample {
                        height,
                        moved_at: Instant::now(),
                    });
                    false
                }
            }
        };

        metrics::record_rpc_status(chain_id, latency.as_secs_f64(), stale);
        if stale {
            warn!(chain_id = %chain_id, height, "Chain head has not moved, RPC may be stalled");
        } else {
            debug!(chain_id = %chain_id, height, latency_ms = latency.as_millis() as u64, "RPC healthy");
        }
        Ok(RpcStatus {
            height,
            latency,
            stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::fixtures;
    use crate::compliance::Compliance;
    use multichain_rs::testing::MockChainAdapter;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rpc_status_tracks_head() {
        let ledger = fixtures::ledger();
        let adapter = Arc::new(MockChainAdapter::new(1, ChainFamily::Evm));
        adapter.set_height(10);
        let ctx = fixtures::context(&ledger, adapter.clone(), Compliance::default()).await;
        let observer = Observer::new(ctx);

        let status = observer.check_rpc_status().await.unwrap();
        assert_eq!(status.height, 10);
        assert!(!status.stale);

        // same head, well inside the stall window
        assert!(!observer.check_rpc_status().await.unwrap().stale);

        // pretend the head last moved long ago
        *observer.head.lock().unwrap() = Some(HeadSample {
            height: 10,
            moved_at: Instant::now() - Duration::from_secs(130),
        });
        assert!(observer.check_rpc_status().await.unwrap().stale);

        adapter.set_height(11);
        assert!(!observer.check_rpc_status().await.unwrap().stale);

        adapter.set_rpc_down(true);
        assert!(observer.check_rpc_status().await.is_err());
    }

    #[test]
    fn test_stale_window_by_family() {
        assert!(stale_after(ChainFamily::Bitcoin) > stale_after(ChainFamily::Evm));
        assert_eq!(stale_after(ChainFamily::Solana), Duration::from_secs(120));
    }
}
