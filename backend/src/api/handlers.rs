//! Request handlers for the dispatch, cancellation and pricing endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;

use common::geo::GeoPoint;

use crate::api::auth::{self, Role};
use crate::cancellation::{ActorRole, CancellationRequest};
use crate::error::{AppError, AppResult};
use crate::jobs::model::{JobId, JobType, VehicleType};
use crate::runtime::Runtime;

#[derive(Debug, Deserialize)]
pub struct JobActionRequest {
    pub job_type: JobType,
    pub job_id: JobId,
}

#[derive(Debug, Deserialize)]
pub struct OnlineRequest {
    pub is_online: bool,
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct GoHomeRequest {
    pub enabled: bool,
    pub home: Option<LatLng>,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub order_id: JobId,
    pub actor: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub late_delivery: bool,
    #[serde(default)]
    pub no_show: bool,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRideRequest {
    pub ride_id: JobId,
    pub actor: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub late_delivery: bool,
    #[serde(default)]
    pub no_show: bool,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SurgeRequest {
    pub job_type: JobType,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct FareRequest {
    pub pickup: LatLng,
    pub dropoff: LatLng,
    pub vehicle_type: String,
}

pub async fn create_job(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Json(req): Json<JobActionRequest>,
) -> AppResult<impl IntoResponse> {
    let ctx = auth::authenticate(&headers, &runtime.cfg.jwt_secret)?;
    auth::require_role(&ctx, &[Role::User, Role::Restaurant])?;

    let candidates = runtime
        .matcher
        .clone()
        .create_job(req.job_type, req.job_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "candidates": candidates })),
    ))
}

pub async fn accept_job(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Json(req): Json<JobActionRequest>,
) -> AppResult<impl IntoResponse> {
    let ctx = auth::authenticate(&headers, &runtime.cfg.jwt_secret)?;
    auth::require_role(&ctx, &[Role::Captain])?;

    let job = runtime
        .matcher
        .clone()
        .accept_job(req.job_type, req.job_id, ctx.user_id)
        .await?;

    Ok(Json(serde_json::json!({ "job": job })))
}

pub async fn reject_job(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Json(req): Json<JobActionRequest>,
) -> AppResult<impl IntoResponse> {
    let ctx = auth::authenticate(&headers, &runtime.cfg.jwt_secret)?;
    auth::require_role(&ctx, &[Role::Captain])?;

    runtime
        .matcher
        .clone()
        .reject_job(req.job_type, req.job_id, ctx.user_id)
        .await?;

    Ok(Json(serde_json::json!({ "rejected": true })))
}

pub async fn complete_job(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Json(req): Json<JobActionRequest>,
) -> AppResult<impl IntoResponse> {
    let ctx = auth::authenticate(&headers, &runtime.cfg.jwt_secret)?;
    auth::require_role(&ctx, &[Role::Captain])?;

    let job = runtime
        .matcher
        .complete_job(req.job_type, req.job_id, ctx.user_id)
        .await?;

    Ok(Json(serde_json::json!({ "job": job })))
}

pub async fn captain_online(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Json(req): Json<OnlineRequest>,
) -> AppResult<impl IntoResponse> {
    let ctx = auth::authenticate(&headers, &runtime.cfg.jwt_secret)?;
    auth::require_role(&ctx, &[Role::Captain])?;

    let captain = runtime.captains.set_online(&ctx.user_id, req.is_online).await?;
    Ok(Json(serde_json::json!({ "captain": captain })))
}

pub async fn captain_location(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Json(req): Json<LocationRequest>,
) -> AppResult<impl IntoResponse> {
    let ctx = auth::authenticate(&headers, &runtime.cfg.jwt_secret)?;
    auth::require_role(&ctx, &[Role::Captain])?;

    validate_coordinates(req.lat, req.lng)?;
    let captain = runtime
        .captains
        .update_location(&ctx.user_id, req.lat, req.lng)
        .await?;
    Ok(Json(serde_json::json!({ "captain": captain })))
}

pub async fn captain_go_home(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Json(req): Json<GoHomeRequest>,
) -> AppResult<impl IntoResponse> {
    let ctx = auth::authenticate(&headers, &runtime.cfg.jwt_secret)?;
    auth::require_role(&ctx, &[Role::Captain])?;

    let home = match req.home {
        Some(h) => {
            validate_coordinates(h.lat, h.lng)?;
            Some(GeoPoint::new(h.lat, h.lng))
        }
        None => None,
    };
    if req.enabled && home.is_none() {
        return Err(AppError::Validation("home location required".into()));
    }

    let captain = runtime
        .captains
        .set_go_home(&ctx.user_id, req.enabled, home)
        .await?;
    Ok(Json(serde_json::json!({ "captain": captain })))
}

pub async fn cancel_policy(
    State(runtime): State<Arc<Runtime>>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(
        serde_json::json!({ "policy": runtime.cancellation.policy() }),
    ))
}

pub async fn cancel_order(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Json(req): Json<CancelOrderRequest>,
) -> AppResult<impl IntoResponse> {
    let ctx = auth::authenticate(&headers, &runtime.cfg.jwt_secret)?;

    let outcome = runtime
        .cancellation
        .cancel(
            JobType::Order,
            req.order_id,
            cancellation_request(
                &ctx,
                req.actor.as_deref(),
                req.reason,
                req.late_delivery,
                req.no_show,
                req.metadata,
            )?,
        )
        .await?;

    Ok(Json(serde_json::json!(outcome)))
}

pub async fn cancel_ride(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Json(req): Json<CancelRideRequest>,
) -> AppResult<impl IntoResponse> {
    let ctx = auth::authenticate(&headers, &runtime.cfg.jwt_secret)?;

    let outcome = runtime
        .cancellation
        .cancel(
            JobType::Ride,
            req.ride_id,
            cancellation_request(
                &ctx,
                req.actor.as_deref(),
                req.reason,
                req.late_delivery,
                req.no_show,
                req.metadata,
            )?,
        )
        .await?;

    Ok(Json(serde_json::json!(outcome)))
}

pub async fn pricing_calculate(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Json(req): Json<SurgeRequest>,
) -> AppResult<impl IntoResponse> {
    auth::authenticate(&headers, &runtime.cfg.jwt_secret)?;
    validate_coordinates(req.lat, req.lng)?;

    let snapshot = runtime
        .surge
        .estimate(req.job_type, req.lat, req.lng, true)
        .await?;
    Ok(Json(serde_json::json!(snapshot)))
}

pub async fn rides_fare(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Json(req): Json<FareRequest>,
) -> AppResult<impl IntoResponse> {
    auth::authenticate(&headers, &runtime.cfg.jwt_secret)?;
    validate_coordinates(req.pickup.lat, req.pickup.lng)?;
    validate_coordinates(req.dropoff.lat, req.dropoff.lng)?;

    let vehicle = VehicleType::normalize(&req.vehicle_type);

    // Fare previews see the surge but never write history rows.
    let surge_multiplier = runtime
        .surge
        .estimate(JobType::Ride, req.pickup.lat, req.pickup.lng, false)
        .await
        .map(|s| s.surge_multiplier)
        .unwrap_or(1.0);

    let quote = crate::pricing::fare::quote(
        &GeoPoint::new(req.pickup.lat, req.pickup.lng),
        &GeoPoint::new(req.dropoff.lat, req.dropoff.lng),
        vehicle,
        surge_multiplier,
    )?;

    Ok(Json(serde_json::json!(quote)))
}

/// Builds the engine request. Callers act in their own role; only admins
/// may cancel on someone else's behalf via the explicit `actor` field.
fn cancellation_request(
    ctx: &auth::AuthContext,
    actor_override: Option<&str>,
    reason: String,
    late_delivery: bool,
    no_show: bool,
    metadata: Option<serde_json::Value>,
) -> AppResult<CancellationRequest> {
    let actor_role = match (ctx.role, actor_override) {
        (Role::Admin, Some(explicit)) => explicit
            .parse::<ActorRole>()
            .map_err(|e| AppError::Validation(e.to_string()))?,
        (Role::Admin, None) => ActorRole::Admin,
        (Role::User, _) => ActorRole::User,
        (Role::Captain, _) => ActorRole::Captain,
        (Role::Restaurant, _) => ActorRole::Restaurant,
    };

    if reason.trim().is_empty() {
        return Err(AppError::Validation("reason is required".into()));
    }

    Ok(CancellationRequest {
        actor_id: Some(ctx.user_id),
        actor_role,
        reason,
        late_delivery,
        no_show,
        metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
    })
}

fn validate_coordinates(lat: f64, lng: f64) -> AppResult<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(AppError::Validation("coordinates out of range".into()));
    }
    Ok(())
}
