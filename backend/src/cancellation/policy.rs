//! Actor-based refund and penalty policy.

use serde::Serialize;

use crate::cancellation::ActorRole;
use crate::wallet::ledger::pct_amount;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CancellationPolicy {
    pub user_cancel_before_assign_refund_pct: f64,
    pub user_cancel_after_assign_refund_pct: f64,
    pub captain_cancel_penalty_pct: f64,
    pub late_delivery_refund_pct: f64,
    pub no_show_fee_pct: f64,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            user_cancel_before_assign_refund_pct: 1.0,
            user_cancel_after_assign_refund_pct: 0.5,
            captain_cancel_penalty_pct: 0.1,
            late_delivery_refund_pct: 0.2,
            no_show_fee_pct: 0.1,
        }
    }
}

/// Monetary outcome of a cancellation, all amounts in paise.
/// A no-show zeroes the refund and charges the fee instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub refund_amount: i64,
    pub penalty_amount: i64,
    pub no_show_fee: i64,
}

pub fn compute(
    policy: &CancellationPolicy,
    actor_role: ActorRole,
    captain_assigned: bool,
    amount_paid: i64,
    late_delivery: bool,
    no_show: bool,
) -> Decision {
    let mut refund_amount = match actor_role {
        ActorRole::User => {
            if captain_assigned {
                pct_amount(amount_paid, policy.user_cancel_after_assign_refund_pct)
            } else {
                pct_amount(amount_paid, policy.user_cancel_before_assign_refund_pct)
            }
        }
        ActorRole::Captain | ActorRole::Restaurant | ActorRole::System | ActorRole::Admin => {
            amount_paid.max(0)
        }
    };

    let penalty_amount = if actor_role == ActorRole::Captain {
        pct_amount(amount_paid, policy.captain_cancel_penalty_pct)
    } else {
        0
    };

    if late_delivery {
        refund_amount = refund_amount.max(pct_amount(amount_paid, policy.late_delivery_refund_pct));
    }

    let mut no_show_fee = 0;
    if no_show {
        no_show_fee = pct_amount(amount_paid, policy.no_show_fee_pct);
        refund_amount = 0;
    }

    Decision {
        refund_amount,
        penalty_amount,
        no_show_fee,
    }
}
