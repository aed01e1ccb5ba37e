use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::model::UserId;

/// Ledger accounts. `UserWallet`, `RestaurantPayable` and `CaptainPayable`
/// entries carry a `user_id`; the platform accounts are global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Account {
    UserWallet,
    PlatformCash,
    PlatformRevenue,
    RestaurantPayable,
    CaptainPayable,
    CustomerPayments,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Account::UserWallet => "USER_WALLET",
            Account::PlatformCash => "PLATFORM_CASH",
            Account::PlatformRevenue => "PLATFORM_REVENUE",
            Account::RestaurantPayable => "RESTAURANT_PAYABLE",
            Account::CaptainPayable => "CAPTAIN_PAYABLE",
            Account::CustomerPayments => "CUSTOMER_PAYMENTS",
        })
    }
}

impl FromStr for Account {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER_WALLET" => Ok(Account::UserWallet),
            "PLATFORM_CASH" => Ok(Account::PlatformCash),
            "PLATFORM_REVENUE" => Ok(Account::PlatformRevenue),
            "RESTAURANT_PAYABLE" => Ok(Account::RestaurantPayable),
            "CAPTAIN_PAYABLE" => Ok(Account::CaptainPayable),
            "CUSTOMER_PAYMENTS" => Ok(Account::CustomerPayments),
            other => Err(anyhow::anyhow!("invalid ledger account: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Debit,
    Credit,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Debit => "DEBIT",
            Direction::Credit => "CREDIT",
        })
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBIT" => Ok(Direction::Debit),
            "CREDIT" => Ok(Direction::Credit),
            other => Err(anyhow::anyhow!("invalid direction: {}", other)),
        }
    }
}

/// What a ledger transaction settles or records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Wallet,
    Order,
    Ride,
    Cancellation,
    Payout,
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferenceType::Wallet => "WALLET",
            ReferenceType::Order => "ORDER",
            ReferenceType::Ride => "RIDE",
            ReferenceType::Cancellation => "CANCELLATION",
            ReferenceType::Payout => "PAYOUT",
        })
    }
}

impl FromStr for ReferenceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WALLET" => Ok(ReferenceType::Wallet),
            "ORDER" => Ok(ReferenceType::Order),
            "RIDE" => Ok(ReferenceType::Ride),
            "CANCELLATION" => Ok(ReferenceType::Cancellation),
            "PAYOUT" => Ok(ReferenceType::Payout),
            other => Err(anyhow::anyhow!("invalid reference type: {}", other)),
        }
    }
}

/// One leg of a balanced double-entry monetary fact. Amounts are positive
/// integer paise; the direction carries the sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user_id: Option<UserId>,
    pub account: Account,
    pub direction: Direction,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub tx_id: Uuid,
    pub reference_type: ReferenceType,
    pub reference_id: Option<String>,
    /// Balanced total: Σ debits = Σ credits = amount.
    pub amount: i64,
    pub entries: Vec<LedgerEntry>,
    pub created_at_ms: i64,
}

/// Cached per-user wallet movement; the ledger is the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub txn_id: Uuid,
    pub user_id: UserId,
    pub amount: i64,
    pub kind: Direction,
    pub reason: String,
    pub source: String,
    pub reference: Option<String>,
    pub is_refund: bool,
    pub balance_after: i64,
    pub created_at_ms: i64,
}
