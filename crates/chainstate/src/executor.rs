//! Block executor contract and the value-transfer executor.

use unityd_consensus::constants::{
    TX_DATA_BYTE_ENERGY, TX_DATA_BYTE_ENERGY_PRE_FORK, TX_INTRINSIC_ENERGY,
};
use unityd_consensus::money::Amount;
use unityd_consensus::{Address, Hash256};
use unityd_primitives::block::Block;
use unityd_primitives::receipt::{Log, Receipt};
use unityd_primitives::transaction::Transaction;

use crate::error::StateError;
use crate::world::AccountState;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExecutionFlags {
    pub local_call: bool,
    pub increment_nonce: bool,
    pub fork_rules: bool,
    pub enforce_block_energy_limit: bool,
}

impl ExecutionFlags {
    /// Flags used when importing or producing blocks.
    pub fn block_import() -> Self {
        Self {
            local_call: false,
            increment_nonce: true,
            fork_rules: true,
            enforce_block_energy_limit: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxExecutionSummary {
    pub receipt: Receipt,
    pub fee: Amount,
    pub energy_used: u64,
    pub rejected: bool,
}

#[derive(Debug)]
pub enum ExecutionError {
    /// Execution cannot continue and the node must not keep importing.
    Fatal(String),
    State(StateError),
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionError::Fatal(message) => write!(f, "{message}"),
            ExecutionError::State(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<StateError> for ExecutionError {
    fn from(err: StateError) -> Self {
        ExecutionError::State(err)
    }
}

/// Runs a block's transactions against a mutable account view.
///
/// Implementations must be deterministic: the same block on the same pre-state
/// yields the same summaries and the same post-state.
pub trait BlockExecutor: Send + Sync {
    fn execute(
        &self,
        block: &Block,
        state: &mut dyn AccountState,
        flags: ExecutionFlags,
    ) -> Result<Vec<TxExecutionSummary>, ExecutionError>;
}

/// Plain value transfers with a fixed energy schedule.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferExecutor;

impl TransferExecutor {
    pub fn transaction_energy(tx: &Transaction, flags: ExecutionFlags) -> u64 {
        let per_byte = if flags.fork_rules {
            TX_DATA_BYTE_ENERGY
        } else {
            TX_DATA_BYTE_ENERGY_PRE_FORK
        };
        TX_INTRINSIC_ENERGY.saturating_add(per_byte.saturating_mul(tx.data.len() as u64))
    }

    fn execute_transaction(
        &self,
        tx: &Transaction,
        coinbase: &Address,
        energy_left: u64,
        state: &mut dyn AccountState,
        flags: ExecutionFlags,
    ) -> Result<TxExecutionSummary, ExecutionError> {
        let tx_hash = tx.hash();
        let sender = match tx.sender() {
            Ok(sender) => sender,
            Err(err) => return Ok(rejected(tx_hash, format!("invalid signature: {err}"))),
        };
        let to = match tx.to {
            Some(to) => to,
            None => return Ok(rejected(tx_hash, "contract creation is not supported".to_string())),
        };

        let energy = Self::transaction_energy(tx, flags);
        let failure = if energy > tx.energy_limit {
            Some("out of energy")
        } else if flags.enforce_block_energy_limit && energy > energy_left {
            Some("block energy limit exceeded")
        } else {
            None
        };
        if let Some(reason) = failure {
            if flags.increment_nonce {
                state.increment_nonce(&sender)?;
            }
            return Ok(rejected(tx_hash, reason.to_string()));
        }

        let fee = Amount::from(energy).saturating_mul(Amount::from(tx.energy_price));
        let cost = tx.value.saturating_add(fee);
        if state.balance(&sender)? < cost {
            if flags.increment_nonce {
                state.increment_nonce(&sender)?;
            }
            return Ok(rejected(tx_hash, "insufficient balance".to_string()));
        }

        state.sub_balance(&sender, cost)?;
        state.add_balance(&to, tx.value)?;
        state.add_balance(coinbase, fee)?;
        if flags.increment_nonce {
            state.increment_nonce(&sender)?;
        }

        Ok(TxExecutionSummary {
            receipt: Receipt {
                tx_hash,
                success: true,
                energy_used: energy,
                logs: vec![Log {
                    address: to,
                    topics: vec![address_topic(&sender)],
                    data: tx.value.to_be_bytes().to_vec(),
                }],
                error: String::new(),
            },
            fee,
            energy_used: energy,
            rejected: false,
        })
    }
}

impl BlockExecutor for TransferExecutor {
    fn execute(
        &self,
        block: &Block,
        state: &mut dyn AccountState,
        flags: ExecutionFlags,
    ) -> Result<Vec<TxExecutionSummary>, ExecutionError> {
        let coinbase = block.header.coinbase;
        let mut energy_left = block.header.energy_limit;
        let mut summaries = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let summary = self.execute_transaction(tx, &coinbase, energy_left, state, flags)?;
            energy_left = energy_left.saturating_sub(summary.energy_used);
            summaries.push(summary);
        }
        Ok(summaries)
    }
}

fn rejected(tx_hash: Hash256, error: String) -> TxExecutionSummary {
    TxExecutionSummary {
        receipt: Receipt {
            tx_hash,
            success: false,
            energy_used: 0,
            logs: Vec::new(),
            error,
        },
        fee: 0,
        energy_used: 0,
        rejected: true,
    }
}

fn address_topic(address: &Address) -> Hash256 {
    let mut topic = [0u8; 32];
    topic[12..].copy_from_slice(address);
    topic
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;
    use secp256k1::SecretKey;
    use std::collections::BTreeMap;
    use unityd_consensus::SealType;
    use unityd_primitives::block::BlockHeader;
    use unityd_primitives::bloom::Bloom;
    use unityd_primitives::transaction::address_from_secret;

    use crate::world::Account;

    #[derive(Default)]
    struct Accounts(BTreeMap<Address, Account>);

    impl AccountState for Accounts {
        fn account(&self, address: &Address) -> Result<Account, StateError> {
            Ok(self.0.get(address).copied().unwrap_or_default())
        }

        fn set_account(&mut self, address: &Address, account: Account) -> Result<(), StateError> {
            self.0.insert(*address, account);
            Ok(())
        }
    }

    fn block_with(transactions: Vec<Transaction>, energy_limit: u64) -> Block {
        Block {
            header: BlockHeader {
                parent_hash: [0u8; 32],
                number: 1,
                timestamp: 10,
                difficulty: U256::from(1u64),
                state_root: [0u8; 32],
                tx_trie_root: [0u8; 32],
                receipts_root: [0u8; 32],
                log_bloom: Bloom::default(),
                seal_type: SealType::Mining,
                coinbase: [9u8; 20],
                energy_limit,
                energy_consumed: 0,
                extra_data: Vec::new(),
                seal: Vec::new(),
            },
            transactions,
        }
    }

    #[test]
    fn transfer_moves_value_and_pays_coinbase() {
        let secret = SecretKey::from_slice(&[7u8; 32]).expect("secret");
        let sender = address_from_secret(&secret);
        let recipient = [3u8; 20];
        let mut state = Accounts::default();
        state.add_balance(&sender, 100_000).expect("fund");

        let tx = Transaction::transfer(0, recipient, 1_000)
            .signed(&secret)
            .expect("sign");
        let block = block_with(vec![tx], 1_000_000);
        let summaries = TransferExecutor
            .execute(&block, &mut state, ExecutionFlags::block_import())
            .expect("execute");

        assert_eq!(summaries.len(), 1);
        assert!(!summaries[0].rejected);
        assert_eq!(summaries[0].energy_used, TX_INTRINSIC_ENERGY);
        assert_eq!(state.balance(&recipient).expect("recipient"), 1_000);
        assert_eq!(state.balance(&[9u8; 20]).expect("coinbase"), 21_000);
        assert_eq!(state.balance(&sender).expect("sender"), 100_000 - 1_000 - 21_000);
        assert_eq!(state.nonce(&sender).expect("nonce"), 1);
        assert_eq!(summaries[0].receipt.logs[0].topics[0][12..], sender[..]);
    }

    #[test]
    fn underfunded_transfer_only_bumps_nonce() {
        let secret = SecretKey::from_slice(&[8u8; 32]).expect("secret");
        let sender = address_from_secret(&secret);
        let mut state = Accounts::default();
        state.add_balance(&sender, 500).expect("fund");

        let tx = Transaction::transfer(0, [4u8; 20], 100)
            .signed(&secret)
            .expect("sign");
        let block = block_with(vec![tx], 1_000_000);
        let summaries = TransferExecutor
            .execute(&block, &mut state, ExecutionFlags::block_import())
            .expect("execute");

        assert!(summaries[0].rejected);
        assert!(!summaries[0].receipt.success);
        assert_eq!(summaries[0].receipt.error, "insufficient balance");
        assert_eq!(state.balance(&sender).expect("sender"), 500);
        assert_eq!(state.nonce(&sender).expect("nonce"), 1);
    }

    #[test]
    fn data_bytes_cost_more_before_the_fork() {
        let mut tx = Transaction::transfer(0, [5u8; 20], 0);
        tx.data = vec![1, 2, 3];
        let forked = ExecutionFlags::block_import();
        let legacy = ExecutionFlags {
            fork_rules: false,
            ..forked
        };
        assert_eq!(TransferExecutor::transaction_energy(&tx, forked), 21_000 + 48);
        assert_eq!(TransferExecutor::transaction_energy(&tx, legacy), 21_000 + 204);
    }
}
