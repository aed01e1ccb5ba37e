use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::geo::GeoPoint;

pub type JobId = Uuid;
pub type UserId = Uuid;
pub type CaptainId = Uuid;

/// The unit of dispatch: a food order or a ride request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Order,
    Ride,
}

impl JobType {
    /// Terminal success status for this job type.
    pub fn completed_status(&self) -> JobStatus {
        match self {
            JobType::Order => JobStatus::Delivered,
            JobType::Ride => JobStatus::Completed,
        }
    }

    /// Status a paid job starts dispatch from.
    pub fn dispatchable_status(&self) -> JobStatus {
        match self {
            JobType::Order => JobStatus::Placed,
            JobType::Ride => JobStatus::Requested,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobType::Order => "ORDER",
            JobType::Ride => "RIDE",
        })
    }
}

impl FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDER" => Ok(JobType::Order),
            "RIDE" => Ok(JobType::Ride),
            other => Err(anyhow::anyhow!("invalid job type: {}", other)),
        }
    }
}

/// Business status of a job. Orders and rides share the enum; the
/// per-type transition tables live in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    PendingPayment,
    Placed,
    Requested,
    Assigned,
    Delivered,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Delivered | JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::PendingPayment => "PENDING_PAYMENT",
            JobStatus::Placed => "PLACED",
            JobStatus::Requested => "REQUESTED",
            JobStatus::Assigned => "ASSIGNED",
            JobStatus::Delivered => "DELIVERED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Failed => "FAILED",
        })
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_PAYMENT" => Ok(JobStatus::PendingPayment),
            "PLACED" => Ok(JobStatus::Placed),
            "REQUESTED" => Ok(JobStatus::Requested),
            "ASSIGNED" => Ok(JobStatus::Assigned),
            "DELIVERED" => Ok(JobStatus::Delivered),
            "COMPLETED" => Ok(JobStatus::Completed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(anyhow::anyhow!("invalid job status: {}", other)),
        }
    }
}

/// Matching-pipeline status, orthogonal to the business status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Created,
    Searching,
    Offered,
    Assigned,
    Retrying,
    NoLocation,
    NoCaptain,
    Completed,
    Cancelled,
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DispatchStatus::Created => "CREATED",
            DispatchStatus::Searching => "SEARCHING",
            DispatchStatus::Offered => "OFFERED",
            DispatchStatus::Assigned => "ASSIGNED",
            DispatchStatus::Retrying => "RETRYING",
            DispatchStatus::NoLocation => "NO_LOCATION",
            DispatchStatus::NoCaptain => "NO_CAPTAIN",
            DispatchStatus::Completed => "COMPLETED",
            DispatchStatus::Cancelled => "CANCELLED",
        })
    }
}

impl FromStr for DispatchStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(DispatchStatus::Created),
            "SEARCHING" => Ok(DispatchStatus::Searching),
            "OFFERED" => Ok(DispatchStatus::Offered),
            "ASSIGNED" => Ok(DispatchStatus::Assigned),
            "RETRYING" => Ok(DispatchStatus::Retrying),
            "NO_LOCATION" => Ok(DispatchStatus::NoLocation),
            "NO_CAPTAIN" => Ok(DispatchStatus::NoCaptain),
            "COMPLETED" => Ok(DispatchStatus::Completed),
            "CANCELLED" => Ok(DispatchStatus::Cancelled),
            other => Err(anyhow::anyhow!("invalid dispatch status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMode {
    Razorpay,
    /// Cash on delivery; orders only.
    Cod,
    Wallet,
    WalletRazorpay,
}

impl PaymentMode {
    /// Modes where a gateway refund can be attempted before falling back
    /// to a wallet credit.
    pub fn gateway_refundable(&self) -> bool {
        matches!(self, PaymentMode::Razorpay | PaymentMode::WalletRazorpay)
    }
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentMode::Razorpay => "RAZORPAY",
            PaymentMode::Cod => "COD",
            PaymentMode::Wallet => "WALLET",
            PaymentMode::WalletRazorpay => "WALLET_RAZORPAY",
        })
    }
}

impl FromStr for PaymentMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RAZORPAY" => Ok(PaymentMode::Razorpay),
            "COD" => Ok(PaymentMode::Cod),
            "WALLET" => Ok(PaymentMode::Wallet),
            "WALLET_RAZORPAY" => Ok(PaymentMode::WalletRazorpay),
            other => Err(anyhow::anyhow!("invalid payment mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleType {
    BikePetrol,
    BikeEv,
    Auto,
    Car,
    Suv,
}

impl VehicleType {
    /// Accepts raw client input; bare "BIKE" normalises to petrol.
    pub fn normalize(raw: &str) -> Option<VehicleType> {
        let cleaned = raw.trim().to_ascii_uppercase();
        let cleaned = if cleaned == "BIKE" {
            "BIKE_PETROL".to_string()
        } else {
            cleaned
        };
        cleaned.parse().ok()
    }

    /// Fare rate in paise per kilometre.
    pub fn rate_per_km(&self) -> i64 {
        match self {
            VehicleType::BikePetrol | VehicleType::BikeEv => 800,
            VehicleType::Auto => 1_200,
            VehicleType::Car => 1_800,
            VehicleType::Suv => 2_500,
        }
    }

    pub fn is_ev(&self) -> bool {
        matches!(self, VehicleType::BikeEv)
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VehicleType::BikePetrol => "BIKE_PETROL",
            VehicleType::BikeEv => "BIKE_EV",
            VehicleType::Auto => "AUTO",
            VehicleType::Car => "CAR",
            VehicleType::Suv => "SUV",
        })
    }
}

impl FromStr for VehicleType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BIKE_PETROL" => Ok(VehicleType::BikePetrol),
            "BIKE_EV" => Ok(VehicleType::BikeEv),
            "AUTO" => Ok(VehicleType::Auto),
            "CAR" => Ok(VehicleType::Car),
            "SUV" => Ok(VehicleType::Suv),
            other => Err(anyhow::anyhow!("invalid vehicle type: {}", other)),
        }
    }
}

/// The live offer mirrored onto the job row. The candidate store holds
/// the authoritative copy used for linearisation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentOffer {
    pub captain_id: CaptainId,
    pub expires_at_ms: i64,
}

/// Hard time bounds computed on first entry into PLACED/REQUESTED.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sla {
    pub assign_by_ms: i64,
    pub complete_by_ms: i64,
}

/// One appended row per state-machine transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: Option<JobStatus>,
    pub to: JobStatus,
    pub reason: Option<String>,
    pub at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub user_id: UserId,
    /// Set for orders; pickup resolves to the restaurant's stored point.
    pub restaurant_id: Option<Uuid>,
    pub captain_id: Option<CaptainId>,

    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
    pub vehicle_type: Option<VehicleType>,

    // Money, integer paise.
    pub amount_subtotal: i64,
    pub surge_multiplier: f64,
    pub surge_amount: i64,
    pub amount_total: i64,
    pub wallet_amount: i64,
    pub reward_redeem_amount: i64,
    pub payment_amount: i64,
    pub payment_mode: PaymentMode,
    pub gateway_payment_id: Option<String>,
    pub is_paid: bool,
    pub settled: bool,

    pub status: JobStatus,
    pub job_status: DispatchStatus,
    pub current_offer: Option<CurrentOffer>,
    pub job_attempts: u32,
    pub rejected_captains: Vec<CaptainId>,
    pub matching_retry_count: u32,
    pub sla: Option<Sla>,
    pub status_history: Vec<StatusChange>,
    pub batched: bool,

    pub cancelled_by: Option<String>,
    pub cancel_reason: Option<String>,

    pub created_at_ms: i64,
    pub matched_at_ms: Option<i64>,
}

impl Job {
    /// `payment_amount + wallet_amount + reward_redeem_amount == amount_total`
    /// and the surge never discounts below the subtotal.
    pub fn amounts_consistent(&self) -> bool {
        self.amount_total >= self.amount_subtotal
            && self.payment_amount >= 0
            && self.wallet_amount >= 0
            && self.reward_redeem_amount >= 0
            && self.payment_amount + self.wallet_amount + self.reward_redeem_amount
                == self.amount_total
    }

    /// Jobs past this point cannot be cancelled.
    pub fn is_closed(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Cancelled | JobStatus::Completed | JobStatus::Delivered
        )
    }
}
