use alloy_primitives::{Address, B256, TxHash, U256, keccak256};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use x402_types::timestamp::UnixTimestamp;

use super::{ExactEvmPayment, Ledger, LedgerError};

/// A completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub tx_hash: TxHash,
    pub asset: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub nonce: B256,
}

#[derive(Debug, Default)]
struct State {
    balances: HashMap<(Address, Address), U256>,
    used_nonces: HashSet<(Address, Address, B256)>,
    transfers: Vec<Transfer>,
}

/// ERC-3009 token semantics kept in memory.
///
/// Enforces nonce uniqueness, balance sufficiency and the validity window like a token
/// contract would. Signatures are not checked here; the facilitator verifies them before
/// any transfer is attempted.
///
/// ```
/// use alloy_primitives::{Address, U256};
/// use x402_facilitator_local::ledger::InMemoryLedger;
///
/// let asset = Address::repeat_byte(1);
/// let payer = Address::repeat_byte(2);
/// let ledger = InMemoryLedger::new(Address::repeat_byte(9))
///     .with_balance(asset, payer, U256::from(1_000_000u64));
/// ```
#[derive(Debug)]
pub struct InMemoryLedger {
    signer: Address,
    state: Mutex<State>,
}

impl InMemoryLedger {
    pub fn new(signer: Address) -> Self {
        Self {
            signer,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_balance(mut self, asset: Address, holder: Address, amount: U256) -> Self {
        self.state.get_mut().balances.insert((asset, holder), amount);
        self
    }

    pub async fn credit(&self, asset: Address, holder: Address, amount: U256) {
        let mut state = self.state.lock().await;
        let balance = state.balances.entry((asset, holder)).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub async fn balance_of(&self, asset: Address, holder: Address) -> U256 {
        let state = self.state.lock().await;
        state
            .balances
            .get(&(asset, holder))
            .copied()
            .unwrap_or_default()
    }

    pub async fn transfers(&self) -> Vec<Transfer> {
        self.state.lock().await.transfers.clone()
    }
}

impl Ledger for InMemoryLedger {
    async fn is_nonce_used(
        &self,
        asset: Address,
        payer: Address,
        nonce: B256,
    ) -> Result<bool, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.used_nonces.contains(&(asset, payer, nonce)))
    }

    async fn transfer_with_authorization(
        &self,
        payment: &ExactEvmPayment,
    ) -> Result<TxHash, LedgerError> {
        let authorization = &payment.authorization;
        let now = UnixTimestamp::now();
        if now < authorization.valid_after {
            return Err(LedgerError::AuthorizationNotYetValid);
        }
        if now > authorization.valid_before {
            return Err(LedgerError::AuthorizationExpired);
        }

        let mut state = self.state.lock().await;
        let key = (payment.asset, authorization.from, authorization.nonce);
        if state.used_nonces.contains(&key) {
            return Err(LedgerError::NonceAlreadyUsed);
        }
        let from_balance = state
            .balances
            .get(&(payment.asset, authorization.from))
            .copied()
            .unwrap_or_default();
        if from_balance < authorization.value {
            return Err(LedgerError::InsufficientBalance);
        }

        state.used_nonces.insert(key);
        state
            .balances
            .insert((payment.asset, authorization.from), from_balance - authorization.value);
        let to_balance = state
            .balances
            .entry((payment.asset, authorization.to))
            .or_default();
        *to_balance = to_balance.saturating_add(authorization.value);

        let tx_hash = keccak256(
            [
                payment.asset.as_slice(),
                authorization.from.as_slice(),
                authorization.nonce.as_slice(),
            ]
            .concat(),
        );
        state.transfers.push(Transfer {
            tx_hash,
            asset: payment.asset,
            from: authorization.from,
            to: authorization.to,
            value: authorization.value,
            nonce: authorization.nonce,
        });
        Ok(tx_hash)
    }

    fn signer_addresses(&self) -> Vec<Address> {
        vec![self.signer]
    }
}
