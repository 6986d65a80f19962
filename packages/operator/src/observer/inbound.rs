use eyre::{Result, WrapErr};
use multichain_rs::{InboundEvent, ScanCursor};
use tokio::sync::MutexGuard;
use tracing::{debug, error, info, warn};

use super::{classify_event, EventClass, Observer};
use crate::db;
use crate::ledger_client::{LedgerClient, LedgerClientError};
use crate::metrics;

/// What one inbound scan did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub txs: usize,
    pub voted: usize,
    pub dropped: usize,
    pub anomalies: usize,
    pub cursor: Option<ScanCursor>,
}

impl Observer {
    /// Scan the next window of gateway activity and vote what it contains.
    ///
    /// The cursor is persisted after every transaction, so a failed vote
    /// leaves the scan resumable from the last fully voted transaction.
    pub async fn observe_inbound(&self) -> Result<ScanReport> {
        let chain_id = self.ctx.chain_id;
        let mut cursor_guard = self.cursor.lock().await;
        let cursor = match cursor_guard.clone() {
            Some(cursor) => cursor,
            None => {
                let loaded = self.load_cursor().await?;
                *cursor_guard = Some(loaded.clone());
                loaded
            }
        };

        let params = self.ctx.params();
        let head = self.ctx.adapter.get_block_height().await?;
        // a block counts as confirmed once it has `confirmation_count` blocks on top, itself included
        let confirmed = (head + 1).saturating_sub(params.confirmation_count);

        let mut report = ScanReport {
            cursor: Some(cursor.clone()),
            ..ScanReport::default()
        };
        if matches!(cursor.block(), Some(last) if last >= confirmed) {
            return Ok(report);
        }

        let batch = self
            .ctx
            .adapter
            .filter_events(
                &params.gateway_address,
                &cursor,
                confirmed,
                self.ctx.settings.max_items_per_scan,
            )
            .await?;

        for tx in batch.txs {
            report.txs += 1;
            if tx.failed {
                debug!(chain_id = %chain_id, tx_hash = %tx.hash, "Skipping failed transaction");
            } else {
                for anomaly in &tx.anomalies {
                    warn!(chain_id = %chain_id, tx_hash = %tx.hash, anomaly = %anomaly, "Inbound anomaly");
                    metrics::record_inbound_event(chain_id, "anomaly");
                    report.anomalies += 1;
                }
                for event in tx.events {
                    if self.handle_event(event).await? {
                        report.voted += 1;
                    } else {
                        report.dropped += 1;
                    }
                }
            }
            self.save_cursor(&mut cursor_guard, tx.cursor).await?;
        }

        if cursor_guard.as_ref() != Some(&batch.end_cursor) {
            self.save_cursor(&mut cursor_guard, batch.end_cursor).await?;
        }
        report.cursor = cursor_guard.clone();

        if report.txs > 0 {
            info!(
                chain_id = %chain_id,
                txs = report.txs,
                voted = report.voted,
                dropped = report.dropped,
                cursor = ?report.cursor,
                "Inbound scan complete"
            );
        }
        Ok(report)
    }

    /// Re-observe transactions flagged in the ledger's inbound trackers
    pub async fn process_inbound_trackers(&self) -> Result<usize> {
        let chain_id = self.ctx.chain_id;
        let gateway = self.ctx.params().gateway_address;
        let trackers = self.ctx.ledger.get_inbound_trackers(chain_id).await?;

        let mut voted = 0;
        for tracker in trackers {
            let tx = match self.ctx.adapter.get_transaction(&gateway, &tracker.tx_hash).await {
                Ok(Some(tx)) => tx,
                Ok(None) => {
                    warn!(chain_id = %chain_id, tx_hash = %tracker.tx_hash, "Tracked inbound not found");
                    continue;
                }
                Err(e) if e.is_transient() => return Err(e.into()),
                Err(e) => {
                    warn!(chain_id = %chain_id, tx_hash = %tracker.tx_hash, error = %e, "Cannot decode tracked inbound");
                    continue;
                }
            };
            if tx.failed {
                warn!(chain_id = %chain_id, tx_hash = %tracker.tx_hash, "Tracked inbound failed on-chain");
                continue;
            }
            for event in tx.events {
                if self.handle_event(event).await? {
                    voted += 1;
                }
            }
        }
        Ok(voted)
    }

    /// Classify and, if processable, vote one event. Returns whether it was voted.
    async fn handle_event(&self, event: InboundEvent) -> Result<bool> {
        let chain_id = self.ctx.chain_id;
        let class = classify_event(&event, &self.ctx.compliance);
        metrics::record_inbound_event(chain_id, class.as_str());
        if class != EventClass::Processable {
            return Ok(false);
        }

        let tx_hash = event.tx_hash.clone();
        let event_index = event.event_index;
        match self.ctx.ledger.vote_inbound(event).await {
            Ok(resp) => {
                metrics::record_vote(chain_id, "vote_inbound", true);
                debug!(
                    chain_id = %chain_id,
                    tx_hash = %tx_hash,
                    event_index,
                    finalized = resp.finalized,
                    duplicate = resp.duplicate,
                    "Inbound voted"
                );
                Ok(true)
            }
            Err(e @ LedgerClientError::Transport(_)) => {
                metrics::record_vote(chain_id, "vote_inbound", false);
                Err(e).wrap_err_with(|| format!("Failed to vote inbound {}", tx_hash))
            }
            Err(e) => {
                // retrying the same vote cannot succeed; move on
                metrics::record_vote(chain_id, "vote_inbound", false);
                error!(chain_id = %chain_id, tx_hash = %tx_hash, event_index, error = %e, "Inbound vote rejected");
                Ok(false)
            }
        }
    }

    async fn load_cursor(&self) -> Result<ScanCursor> {
        let chain_id = self.ctx.chain_id;
        if let Some(start) = self.ctx.settings.start_cursor.clone() {
            info!(chain_id = %chain_id, start = ?start, "Using configured start cursor");
            return Ok(start.into_scan_cursor());
        }
        let stored = db::get_cursor(&self.ctx.db, chain_id).await?;
        info!(chain_id = %chain_id, cursor = ?stored, "Loaded scan cursor");
        Ok(stored.unwrap_or(ScanCursor::Unset))
    }

    async fn save_cursor(
        &self,
        guard: &mut MutexGuard<'_, Option<ScanCursor>>,
        cursor: ScanCursor,
    ) -> Result<()> {
        if cursor == ScanCursor::Unset {
            return Ok(());
        }
        db::save_cursor(&self.ctx.db, self.ctx.chain_id, &cursor).await?;
        if let Some(height) = cursor.block() {
            metrics::record_scanned_height(self.ctx.chain_id, height);
        }
        **guard = Some(cursor);
        Ok(())
    }

    /// Cursor the next scan starts from, if loaded
    pub async fn cursor(&self) -> Option<ScanCursor> {
        self.cursor.lock().await.clone()
    }
}
