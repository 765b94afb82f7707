#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Simulated account: cash, capital allocated to open positions and P&L.
///
/// Equity is `balance + unrealized_pnl`. Allocated capital stays part of the
/// balance; it only reduces what is free for new positions.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    // Initial balance used for reset
    initial_balance: f64,
    // Cash balance, realized P&L and fees included
    balance: f64,
    // Capital allocated to open positions
    locked: f64,
    // Unrealized profit/loss from open positions
    unrealized_pnl: f64,
    // Cumulative fees paid
    fees: f64,
}

impl Account {
    /// Creates a new account with the given initial balance.
    /// Non-positive balances are rejected.
    pub fn new(balance: f64) -> Result<Self> {
        if balance <= 0.0 || !balance.is_finite() {
            return Err(Error::NegZeroBalance(balance));
        }

        Ok(Self {
            balance,
            fees: 0.0,
            locked: 0.0,
            unrealized_pnl: 0.0,
            initial_balance: balance,
        })
    }

    /// Returns the initial balance.
    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    /// Returns the cash balance.
    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Returns the capital allocated to open positions.
    pub fn locked(&self) -> f64 {
        self.locked
    }

    /// Returns the unrealized P&L of open positions.
    pub fn unrealized_pnl(&self) -> f64 {
        self.unrealized_pnl
    }

    /// Returns the equity (cash plus unrealized P&L).
    pub fn equity(&self) -> f64 {
        self.balance + self.unrealized_pnl
    }

    /// Returns the balance not allocated to open positions, floored at zero.
    pub fn free_balance(&self) -> f64 {
        (self.balance - self.locked).max(0.0)
    }

    /// Returns the fees paid to the market.
    pub fn fees_paid(&self) -> f64 {
        self.fees
    }

    /// Allocates capital to a new position.
    pub(crate) fn lock(&mut self, amount: f64) -> Result<()> {
        if amount <= 0.0 {
            return Err(Error::NegZeroBalance(amount));
        }
        let free_balance = self.free_balance();
        if free_balance < amount {
            return Err(Error::InsufficientFunds(amount, free_balance));
        }
        self.locked += amount;
        Ok(())
    }

    /// Releases capital when a position (or part of it) is closed.
    pub(crate) fn unlock(&mut self, amount: f64) -> Result<()> {
        if amount <= 0.0 {
            return Err(Error::NegZeroBalance(amount));
        }
        // tolerate rounding drift from partial closes
        if amount - self.locked > 1e-9 * amount.max(1.0) {
            return Err(Error::UnlockBalance(self.locked, amount));
        }
        self.locked = (self.locked - amount).max(0.0);
        Ok(())
    }

    /// Books realized P&L into the cash balance.
    pub(crate) fn realize(&mut self, pnl: f64) {
        self.balance += pnl;
    }

    /// Subtracts market costs from the balance.
    pub(crate) fn sub_fees(&mut self, amount: f64) {
        self.balance -= amount;
        self.fees += amount;
    }

    /// Updates the unrealized P&L.
    pub(crate) fn set_unrealized_pnl(&mut self, pnl: f64) {
        self.unrealized_pnl = pnl;
    }

    /// Resets the account to its initial balance.
    pub(crate) fn reset(&mut self) {
        self.fees = 0.0;
        self.locked = 0.0;
        self.unrealized_pnl = 0.0;
        self.balance = self.initial_balance;
    }
}

#[cfg(test)]
#[test]
fn new_account_valid_balance() {
    let account = Account::new(100.0).unwrap();
    assert_eq!(account.balance(), 100.0);
    assert_eq!(account.free_balance(), 100.0);
    assert_eq!(account.locked, 0.0);
    assert_eq!(account.equity(), 100.0);
}

#[cfg(test)]
#[test]
fn new_account_invalid_balance() {
    let result = Account::new(0.0);
    assert!(matches!(result, Err(Error::NegZeroBalance(_))));

    let result = Account::new(-10.0);
    assert!(matches!(result, Err(Error::NegZeroBalance(_))));

    let result = Account::new(f64::INFINITY);
    assert!(matches!(result, Err(Error::NegZeroBalance(_))));
}

#[cfg(test)]
#[test]
fn unlock_funds_invalid() {
    let mut account = Account::new(100.0).unwrap();
    let result = account.unlock(20.0);
    assert!(matches!(result, Err(Error::UnlockBalance(_, _))));
}

#[cfg(test)]
#[test]
fn lock_and_unlock_funds() {
    let mut account = Account::new(100.0).unwrap();

    account.lock(20.0).unwrap();
    assert_eq!(account.balance, 100.0);
    assert_eq!(account.locked, 20.0);
    assert_eq!(account.free_balance(), 80.0);

    account.unlock(20.0).unwrap();
    assert_eq!(account.balance, 100.0);
    assert_eq!(account.locked, 0.0);
}

#[cfg(test)]
#[test]
fn lock_insufficient_funds() {
    let mut account = Account::new(100.0).unwrap();
    let result = account.lock(150.0);
    assert!(matches!(result, Err(Error::InsufficientFunds(_, _))));
}

#[cfg(test)]
#[test]
fn lock_invalid_amount() {
    let mut account = Account::new(100.0).unwrap();
    let result = account.lock(-10.0);
    assert!(matches!(result, Err(Error::NegZeroBalance(_))));
}

#[cfg(test)]
#[test]
fn open_close_loss_position() {
    let mut account = Account::new(100.0).unwrap();

    // open position
    account.lock(20.0).unwrap();
    account.sub_fees(0.5);
    assert_eq!(account.balance, 99.5);
    assert_eq!(account.free_balance(), 79.5);
    assert_eq!(account.fees_paid(), 0.5);

    // close unprofitable position
    account.unlock(20.0).unwrap();
    account.realize(-10.0);
    assert_eq!(account.balance, 89.5);
    assert_eq!(account.locked, 0.0);
    assert_eq!(account.free_balance(), 89.5);
}

#[cfg(test)]
#[test]
fn reset_account() {
    let mut account = Account::new(100.0).unwrap();
    account.lock(20.0).unwrap();
    account.realize(10.0);
    account.sub_fees(0.2);
    account.set_unrealized_pnl(3.0);

    account.reset();
    assert_eq!(account.fees, 0.0);
    assert_eq!(account.locked, 0.0);
    assert_eq!(account.balance, 100.0);
    assert_eq!(account.equity(), 100.0);
}

#[cfg(test)]
#[test]
fn unrealized_pnl() {
    let mut account = Account::new(100.0).unwrap();
    account.set_unrealized_pnl(10.0); // unrealized gain
    assert_eq!(account.unrealized_pnl, 10.0);
    assert_eq!(account.equity(), 110.0);
    assert_eq!(account.free_balance(), 100.0);

    account.set_unrealized_pnl(-5.0); // unrealized loss
    assert_eq!(account.unrealized_pnl, -5.0);
    assert_eq!(account.equity(), 95.0);
}
