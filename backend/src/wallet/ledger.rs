//! Balanced-transaction construction.
//!
//! Every monetary fact enters the ledger as a set of entries whose debits
//! and credits sum to the same integer amount. An unbalanced set is a
//! programming defect and fails construction loudly.

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::jobs::model::UserId;
use crate::wallet::model::{Account, Direction, LedgerEntry, LedgerTransaction, ReferenceType};

impl LedgerTransaction {
    /// Validates balance and stamps ids. The only way to build one.
    pub fn new(
        reference_type: ReferenceType,
        reference_id: Option<String>,
        entries: Vec<LedgerEntry>,
        now_ms: i64,
    ) -> AppResult<Self> {
        let amount = balanced_amount(&entries)?;
        Ok(Self {
            tx_id: Uuid::new_v4(),
            reference_type,
            reference_id,
            amount,
            entries,
            created_at_ms: now_ms,
        })
    }
}

/// Σ(debits) must equal Σ(credits) on the exact integer amounts; returns
/// the common total. Negative or empty entry sets are rejected.
pub fn balanced_amount(entries: &[LedgerEntry]) -> AppResult<i64> {
    if entries.is_empty() {
        return Err(AppError::LedgerImbalance("empty entry set".to_string()));
    }

    let mut debit: i64 = 0;
    let mut credit: i64 = 0;
    for e in entries {
        if e.amount < 0 {
            return Err(AppError::LedgerImbalance(format!(
                "negative entry amount: {}",
                e.amount
            )));
        }
        match e.direction {
            Direction::Debit => debit += e.amount,
            Direction::Credit => credit += e.amount,
        }
    }

    if debit != credit {
        return Err(AppError::LedgerImbalance(format!(
            "debits {debit} != credits {credit}"
        )));
    }
    Ok(debit)
}

/// Wallet debit: money leaves the user's wallet into platform cash.
pub fn user_debit_entries(user_id: UserId, amount: i64) -> Vec<LedgerEntry> {
    vec![
        LedgerEntry {
            user_id: Some(user_id),
            account: Account::UserWallet,
            direction: Direction::Debit,
            amount,
        },
        LedgerEntry {
            user_id: None,
            account: Account::PlatformCash,
            direction: Direction::Credit,
            amount,
        },
    ]
}

/// Wallet credit / refund: the inverse of [`user_debit_entries`].
pub fn user_credit_entries(user_id: UserId, amount: i64) -> Vec<LedgerEntry> {
    vec![
        LedgerEntry {
            user_id: None,
            account: Account::PlatformCash,
            direction: Direction::Debit,
            amount,
        },
        LedgerEntry {
            user_id: Some(user_id),
            account: Account::UserWallet,
            direction: Direction::Credit,
            amount,
        },
    ]
}

/// Splits a collected order total into platform commission and the
/// restaurant payable remainder.
pub fn order_settlement_entries(
    amount: i64,
    commission_pct: f64,
    restaurant_id: Option<UserId>,
) -> Vec<LedgerEntry> {
    let commission = pct_amount(amount, commission_pct);
    let payout = (amount - commission).max(0);
    vec![
        LedgerEntry {
            user_id: None,
            account: Account::CustomerPayments,
            direction: Direction::Debit,
            amount,
        },
        LedgerEntry {
            user_id: None,
            account: Account::PlatformRevenue,
            direction: Direction::Credit,
            amount: commission,
        },
        LedgerEntry {
            user_id: restaurant_id,
            account: Account::RestaurantPayable,
            direction: Direction::Credit,
            amount: payout,
        },
    ]
}

/// Splits a collected fare between platform commission and the captain.
pub fn ride_settlement_entries(
    amount: i64,
    commission_pct: f64,
    captain_id: Option<UserId>,
) -> Vec<LedgerEntry> {
    let commission = pct_amount(amount, commission_pct);
    let payout = (amount - commission).max(0);
    vec![
        LedgerEntry {
            user_id: None,
            account: Account::CustomerPayments,
            direction: Direction::Debit,
            amount,
        },
        LedgerEntry {
            user_id: None,
            account: Account::PlatformRevenue,
            direction: Direction::Credit,
            amount: commission,
        },
        LedgerEntry {
            user_id: captain_id,
            account: Account::CaptainPayable,
            direction: Direction::Credit,
            amount: payout,
        },
    ]
}

/// Percentage of an amount, rounded to the nearest paisa, never negative.
pub fn pct_amount(amount: i64, pct: f64) -> i64 {
    (amount.max(0) as f64 * pct.max(0.0)).round() as i64
}
