use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockWriteGuard};

use tracing::{debug, info};

use crate::error::{EscrowError, EscrowResult};
use crate::traits::{HoldRef, HoldState, Ledger};

#[derive(Debug, Default)]
struct Account {
    available: u64,
    held: u64,
}

#[derive(Debug)]
struct Hold {
    account: String,
    amount: u64,
    state: HoldState,
}

#[derive(Default)]
struct LedgerState {
    accounts: BTreeMap<String, Account>,
    holds: HashMap<HoldRef, Hold>,
}

/// In-memory escrow ledger for tests, local demos, and embedding.
///
/// All mutations happen under one write lock, so a hold, release, or capture
/// is atomic with respect to every other ledger call.
pub struct InMemoryLedger {
    inner: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LedgerState::default()),
        }
    }

    pub fn open_account(&self, account: &str, opening_balance: u64) -> EscrowResult<()> {
        let mut state = self.write()?;
        if state.accounts.contains_key(account) {
            return Err(EscrowError::AccountExists(account.to_string()));
        }
        state.accounts.insert(
            account.to_string(),
            Account {
                available: opening_balance,
                held: 0,
            },
        );
        info!(account, opening_balance, "account opened");
        Ok(())
    }

    pub fn deposit(&self, account: &str, amount: u64) -> EscrowResult<()> {
        if amount == 0 {
            return Err(EscrowError::InvalidAmount(amount));
        }
        let mut state = self.write()?;
        let acct = state
            .accounts
            .get_mut(account)
            .ok_or_else(|| EscrowError::UnknownAccount(account.to_string()))?;
        acct.available = acct
            .available
            .checked_add(amount)
            .ok_or_else(|| EscrowError::Overflow(account.to_string()))?;
        debug!(account, amount, "deposit");
        Ok(())
    }

    /// Total currently held against `account`.
    pub fn held(&self, account: &str) -> EscrowResult<u64> {
        let state = self.inner.read().map_err(|_| EscrowError::LockPoisoned)?;
        state
            .accounts
            .get(account)
            .map(|a| a.held)
            .ok_or_else(|| EscrowError::UnknownAccount(account.to_string()))
    }

    /// Number of holds still active across all accounts.
    pub fn active_holds(&self) -> usize {
        self.inner
            .read()
            .map(|s| {
                s.holds
                    .values()
                    .filter(|h| h.state == HoldState::Active)
                    .count()
            })
            .unwrap_or(0)
    }

    fn write(&self) -> EscrowResult<RwLockWriteGuard<'_, LedgerState>> {
        self.inner.write().map_err(|_| EscrowError::LockPoisoned)
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for InMemoryLedger {
    fn hold(&self, account: &str, amount: u64) -> EscrowResult<HoldRef> {
        if amount == 0 {
            return Err(EscrowError::InvalidAmount(amount));
        }
        let mut state = self.write()?;
        let acct = state
            .accounts
            .get_mut(account)
            .ok_or_else(|| EscrowError::UnknownAccount(account.to_string()))?;
        if acct.available < amount {
            return Err(EscrowError::InsufficientFunds {
                account: account.to_string(),
                requested: amount,
                available: acct.available,
            });
        }
        acct.available -= amount;
        acct.held += amount;

        let hold = HoldRef::generate();
        state.holds.insert(
            hold,
            Hold {
                account: account.to_string(),
                amount,
                state: HoldState::Active,
            },
        );
        debug!(account, amount, %hold, "funds held");
        Ok(hold)
    }

    fn release(&self, hold: HoldRef) -> EscrowResult<()> {
        let mut state = self.write()?;
        let LedgerState { accounts, holds } = &mut *state;
        let entry = holds.get_mut(&hold).ok_or(EscrowError::UnknownHold(hold))?;
        match &entry.state {
            HoldState::Released => return Ok(()),
            HoldState::Captured { .. } => {
                return Err(EscrowError::HoldSettled {
                    hold,
                    state: entry.state.clone(),
                })
            }
            HoldState::Active => {}
        }
        let acct = accounts
            .get_mut(&entry.account)
            .ok_or_else(|| EscrowError::UnknownAccount(entry.account.clone()))?;
        acct.held -= entry.amount;
        acct.available += entry.amount;
        entry.state = HoldState::Released;
        debug!(account = %entry.account, amount = entry.amount, %hold, "hold released");
        Ok(())
    }

    fn capture(&self, hold: HoldRef, to_account: &str) -> EscrowResult<()> {
        let mut state = self.write()?;
        let LedgerState { accounts, holds } = &mut *state;
        let entry = holds.get_mut(&hold).ok_or(EscrowError::UnknownHold(hold))?;
        match &entry.state {
            HoldState::Captured { to } if to == to_account => return Ok(()),
            HoldState::Active => {}
            other => {
                return Err(EscrowError::HoldSettled {
                    hold,
                    state: other.clone(),
                })
            }
        }
        let dest = accounts
            .get(to_account)
            .ok_or_else(|| EscrowError::UnknownAccount(to_account.to_string()))?;
        if dest.available.checked_add(entry.amount).is_none() {
            return Err(EscrowError::Overflow(to_account.to_string()));
        }
        if let Some(from) = accounts.get_mut(&entry.account) {
            from.held -= entry.amount;
        }
        if let Some(to) = accounts.get_mut(to_account) {
            to.available += entry.amount;
        }
        entry.state = HoldState::Captured {
            to: to_account.to_string(),
        };
        info!(from = %entry.account, to = to_account, amount = entry.amount, %hold, "hold captured");
        Ok(())
    }

    fn balance(&self, account: &str) -> EscrowResult<u64> {
        let state = self.inner.read().map_err(|_| EscrowError::LockPoisoned)?;
        state
            .accounts
            .get(account)
            .map(|a| a.available)
            .ok_or_else(|| EscrowError::UnknownAccount(account.to_string()))
    }

    fn hold_state(&self, hold: HoldRef) -> EscrowResult<HoldState> {
        let state = self.inner.read().map_err(|_| EscrowError::LockPoisoned)?;
        state
            .holds
            .get(&hold)
            .map(|h| h.state.clone())
            .ok_or(EscrowError::UnknownHold(hold))
    }
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (accounts, holds) = self
            .inner
            .read()
            .map(|s| (s.accounts.len(), s.holds.len()))
            .unwrap_or((0, 0));
        f.debug_struct("InMemoryLedger")
            .field("accounts", &accounts)
            .field("holds", &holds)
            .finish()
    }
}
