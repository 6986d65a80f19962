use eyre::{Result, WrapErr};
use multichain_rs::FeeRate;
use tracing::debug;

use super::Observer;
use crate::ledger_client::LedgerClient;
use crate::metrics;

impl Observer {
    /// Sample the chain's fee metric and vote it
    pub async fn post_gas_price(&self) -> Result<FeeRate> {
        let chain_id = self.ctx.chain_id;
        let fee = self.ctx.adapter.suggest_fee_rate().await?;

        let result = self
            .ctx
            .ledger
            .vote_gas_price(chain_id, fee.price, fee.priority_fee, fee.block_number)
            .await;
        metrics::record_vote(chain_id, "vote_gas_price", result.is_ok());
        result.wrap_err("Failed to vote gas price")?;

        metrics::record_gas_price(chain_id, fee.price);
        debug!(
            chain_id = %chain_id,
            price = fee.price,
            priority_fee = fee.priority_fee,
            block = fee.block_number,
            "Gas price posted"
        );
        Ok(fee)
    }
}
