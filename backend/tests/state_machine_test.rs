//! SLA timers, transition linearisation and the no-captain retry budget.

mod support;

use std::sync::Arc;

use backend::error::AppError;
use backend::jobs::model::{DispatchStatus, JobStatus, JobType};
use backend::jobs::state_machine::Dispatcher;
use support::*;

struct RecordingDispatcher {
    pub calls: parking_lot::Mutex<Vec<backend::jobs::model::JobId>>,
}

#[async_trait::async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, _job_type: JobType, job_id: backend::jobs::model::JobId) {
        self.calls.lock().push(job_id);
    }
}

#[tokio::test]
async fn set_status_appends_history() {
    let rig = rig();
    let order = placed_order(&rig, 10_000);

    let job = rig
        .state
        .set_status(&order.id, JobStatus::Assigned, Some("test"))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Assigned);
    let entry = job.status_history.last().unwrap();
    assert_eq!(entry.from, Some(JobStatus::Placed));
    assert_eq!(entry.to, JobStatus::Assigned);
    assert_eq!(entry.reason.as_deref(), Some("test"));
}

#[tokio::test]
async fn same_status_is_idempotent() {
    let rig = rig();
    let order = placed_order(&rig, 10_000);

    let job = rig
        .state
        .set_status(&order.id, JobStatus::Placed, None)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Placed);
    assert!(job.status_history.is_empty());
}

#[tokio::test]
async fn illegal_transition_fails() {
    let rig = rig();
    let order = placed_order(&rig, 10_000);

    let err = rig
        .state
        .set_status(&order.id, JobStatus::Delivered, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    // The row is untouched.
    assert_eq!(fetch_job(&rig, &order.id).status, JobStatus::Placed);
}

#[tokio::test]
async fn assign_timeout_cancels_waiting_jobs() {
    let rig = rig();
    let order = placed_order(&rig, 10_000);

    rig.state
        .handle_assign_timeout(JobType::Order, order.id)
        .await
        .unwrap();

    let job = fetch_job(&rig, &order.id);
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.job_status, DispatchStatus::NoCaptain);
    assert_eq!(
        job.status_history.last().and_then(|c| c.reason.clone()),
        Some("ASSIGN_TIMEOUT".to_string())
    );
}

#[tokio::test]
async fn assign_timeout_is_a_noop_once_assigned() {
    let rig = rig();
    let order = placed_order(&rig, 10_000);
    rig.state
        .set_status(&order.id, JobStatus::Assigned, None)
        .await
        .unwrap();

    rig.state
        .handle_assign_timeout(JobType::Order, order.id)
        .await
        .unwrap();

    assert_eq!(fetch_job(&rig, &order.id).status, JobStatus::Assigned);
}

#[tokio::test]
async fn completion_timeout_cancels_assigned_jobs() {
    let rig = rig();
    let order = placed_order(&rig, 10_000);
    rig.state
        .set_status(&order.id, JobStatus::Assigned, None)
        .await
        .unwrap();

    rig.state
        .handle_completion_timeout(JobType::Order, order.id)
        .await
        .unwrap();

    let job = fetch_job(&rig, &order.id);
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(
        job.status_history.last().and_then(|c| c.reason.clone()),
        Some("DELIVERY_TIMEOUT".to_string())
    );
}

#[tokio::test]
async fn completion_timeout_reason_differs_for_rides() {
    let rig = rig();
    let ride = requested_ride(&rig, 10_000, backend::jobs::model::VehicleType::Car);
    rig.state
        .set_status(&ride.id, JobStatus::Assigned, None)
        .await
        .unwrap();

    rig.state
        .handle_completion_timeout(JobType::Ride, ride.id)
        .await
        .unwrap();

    assert_eq!(
        fetch_job(&rig, &ride.id)
            .status_history
            .last()
            .and_then(|c| c.reason.clone()),
        Some("COMPLETE_TIMEOUT".to_string())
    );
}

#[tokio::test]
async fn completion_timeout_spares_delivered_jobs() {
    let rig = rig();
    let order = placed_order(&rig, 10_000);
    rig.state
        .set_status(&order.id, JobStatus::Assigned, None)
        .await
        .unwrap();
    rig.state
        .set_status(&order.id, JobStatus::Delivered, None)
        .await
        .unwrap();

    rig.state
        .handle_completion_timeout(JobType::Order, order.id)
        .await
        .unwrap();

    assert_eq!(fetch_job(&rig, &order.id).status, JobStatus::Delivered);
}

#[tokio::test]
async fn no_captain_retries_until_budget_spent() {
    let rig = rig();
    let order = placed_order(&rig, 10_000);
    let dispatcher = Arc::new(RecordingDispatcher {
        calls: parking_lot::Mutex::new(Vec::new()),
    });

    // First two rounds schedule retries.
    for expected in 1..=rig.cfg.match_retry_max {
        let scheduled = rig
            .state
            .handle_no_captain(order.id, dispatcher.clone())
            .await
            .unwrap();
        assert!(scheduled);
        assert_eq!(
            fetch_job(&rig, &order.id).matching_retry_count,
            expected
        );
        assert_eq!(
            fetch_job(&rig, &order.id).job_status,
            DispatchStatus::Retrying
        );
    }

    // The next round cancels terminally.
    let scheduled = rig
        .state
        .handle_no_captain(order.id, dispatcher.clone())
        .await
        .unwrap();
    assert!(!scheduled);

    let job = fetch_job(&rig, &order.id);
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.job_status, DispatchStatus::NoCaptain);
}

#[tokio::test]
async fn ensure_sla_only_stamps_once() {
    let rig = rig();
    let order = placed_order(&rig, 10_000);
    let job = fetch_job(&rig, &order.id);

    rig.state.clone().ensure_sla(&job).await.unwrap();
    let first = fetch_job(&rig, &order.id).sla.unwrap();

    // A second pass (with a re-read job) leaves the deadlines alone.
    let reread = fetch_job(&rig, &order.id);
    rig.state.clone().ensure_sla(&reread).await.unwrap();
    assert_eq!(fetch_job(&rig, &order.id).sla.unwrap(), first);
}
