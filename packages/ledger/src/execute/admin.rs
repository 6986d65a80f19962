//! Admin messages

use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::keeper::Ledger;
use crate::msg::ExecuteResponse;
use crate::state::{CctxStatus, ChainParams};

impl Ledger {
    /// Abort a non-terminal CCTX. An unconsumed outbound nonce stays pending
    /// so a cancel transaction can burn it.
    pub(crate) fn abort_cctx(
        &mut self,
        admin: &str,
        index: &str,
        reason: &str,
    ) -> LedgerResult<ExecuteResponse> {
        self.ensure_admin(admin)?;
        let height = self.height;
        let cctx = self
            .cctxs
            .get_mut(index)
            .ok_or_else(|| LedgerError::CctxNotFound(index.to_string()))?;
        if cctx.status.is_terminal() {
            return Err(LedgerError::InvalidStatus {
                index: index.to_string(),
                status: cctx.status.to_string(),
                action: "abort".to_string(),
            });
        }

        let message = if reason.is_empty() {
            format!("aborted by {}", admin)
        } else {
            format!("aborted by {}: {}", admin, reason)
        };
        cctx.set_status(CctxStatus::Aborted, message, height);
        warn!(cctx = %index, admin = %admin, reason = %reason, "CCTX aborted");

        Ok(ExecuteResponse {
            cctx_index: Some(index.to_string()),
            ..Default::default()
        })
    }

    pub(crate) fn update_chain_params(
        &mut self,
        admin: &str,
        params: ChainParams,
    ) -> LedgerResult<ExecuteResponse> {
        self.ensure_admin(admin)?;
        params.validate()?;
        info!(
            chain_id = %params.chain_id,
            supported = params.is_supported,
            gateway = %params.gateway_address,
            "Chain params updated"
        );
        self.chain_params.insert(params.chain_id, params);
        Ok(ExecuteResponse::default())
    }
}
