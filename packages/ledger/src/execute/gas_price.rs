//! Gas price oracle votes

use multichain_rs::ChainId;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::keeper::Ledger;
use crate::msg::ExecuteResponse;
use crate::state::GasPrice;

impl Ledger {
    /// Gas prices never finalize; the median is refreshed on every vote
    pub(crate) fn vote_gas_price(
        &mut self,
        voter: &str,
        chain_id: ChainId,
        price: u64,
        priority_fee: u64,
        block_number: u64,
    ) -> LedgerResult<ExecuteResponse> {
        self.ensure_observer(voter)?;
        self.ensure_supported(chain_id)?;
        if price == 0 {
            return Err(LedgerError::InvalidMsg("gas price cannot be zero".to_string()));
        }

        let gas = self
            .gas_prices
            .entry(chain_id)
            .or_insert_with(|| GasPrice::new(chain_id));
        gas.vote(voter, price, priority_fee, block_number);

        debug!(
            chain_id = %chain_id,
            voter = %voter,
            price,
            median = gas.median_price(),
            median_block = gas.median_block(),
            "Gas price voted"
        );
        Ok(ExecuteResponse::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keeper::LedgerConfig;
    use crate::state::ChainParams;
    use multichain_rs::ChainFamily;

    #[test]
    fn test_gas_price_votes() {
        let mut ledger = Ledger::new(LedgerConfig::new(2, &["a", "b", "c"], &[]).unwrap())
            .with_chain_params(vec![ChainParams::default_for(
                ChainId(1),
                ChainFamily::Evm,
                "0xgw",
            )])
            .unwrap();

        ledger.vote_gas_price("a", ChainId(1), 5, 0, 100).unwrap();
        ledger.vote_gas_price("b", ChainId(1), 9, 0, 101).unwrap();
        assert_eq!(ledger.gas_prices[&ChainId(1)].median_price(), 5);
        ledger.vote_gas_price("c", ChainId(1), 1, 0, 102).unwrap();
        assert_eq!(ledger.gas_prices[&ChainId(1)].median_price(), 5);
        assert_eq!(ledger.gas_prices[&ChainId(1)].median_block(), 100);

        assert!(ledger.vote_gas_price("a", ChainId(7), 5, 0, 1).is_err());
        assert!(ledger.vote_gas_price("a", ChainId(1), 0, 0, 1).is_err());
        assert!(ledger.vote_gas_price("x", ChainId(1), 5, 0, 1).is_err());
    }
}
