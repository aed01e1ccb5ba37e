//! Push channel: a WebSocket joining per-identity and per-job groups.
//!
//! Clients authenticate with a query token, name one scope
//! (`captain/{id}`, `user/{id}`, `order/{id}`, `ride/{id}`) and receive
//! the typed events published for that scope. `{"type":"ping"}` gets a
//! `pong`; delivery is best-effort.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::api::auth::{self, AuthContext, Role};
use crate::error::AppError;
use crate::jobs::model::JobType;
use crate::presence::PresenceKind;
use crate::push::{PushEvent, captain_group, job_group, user_group};
use crate::runtime::Runtime;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
    pub scope: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scope {
    Captain(Uuid),
    User(Uuid),
    Order(Uuid),
    Ride(Uuid),
}

impl FromStr for Scope {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once('/')
            .ok_or_else(|| AppError::Validation("scope must be kind/id".into()))?;
        let id = Uuid::parse_str(id)
            .map_err(|_| AppError::Validation("scope id must be a uuid".into()))?;

        match kind {
            "captain" => Ok(Scope::Captain(id)),
            "user" => Ok(Scope::User(id)),
            "order" => Ok(Scope::Order(id)),
            "ride" => Ok(Scope::Ride(id)),
            other => Err(AppError::Validation(format!("unknown scope kind: {other}"))),
        }
    }
}

impl Scope {
    fn groups(&self) -> Vec<String> {
        match self {
            Scope::Captain(id) => vec![captain_group(id)],
            Scope::User(id) => vec![user_group(id)],
            Scope::Order(id) => vec![job_group(JobType::Order, id)],
            Scope::Ride(id) => vec![job_group(JobType::Ride, id)],
        }
    }

    fn presence(&self) -> Option<(PresenceKind, Uuid)> {
        match self {
            Scope::Captain(id) => Some((PresenceKind::Captain, *id)),
            Scope::User(id) => Some((PresenceKind::User, *id)),
            _ => None,
        }
    }

    /// Identity scopes are only open to their owner.
    fn authorize(&self, ctx: &AuthContext) -> Result<(), AppError> {
        match self {
            Scope::Captain(id) => {
                if ctx.role != Role::Captain || *id != ctx.user_id {
                    return Err(AppError::Forbidden("not your captain channel".into()));
                }
            }
            Scope::User(id) => {
                if *id != ctx.user_id {
                    return Err(AppError::Forbidden("not your user channel".into()));
                }
            }
            Scope::Order(_) | Scope::Ride(_) => {}
        }
        Ok(())
    }
}

pub async fn ws_handler(
    State(runtime): State<Arc<Runtime>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let ctx = match auth::verify_token(&query.token, &runtime.cfg.jwt_secret) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let scope = match query.scope.parse::<Scope>() {
        Ok(scope) => scope,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = scope.authorize(&ctx) {
        return e.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(runtime, scope, socket))
}

async fn handle_socket(runtime: Arc<Runtime>, scope: Scope, mut socket: WebSocket) {
    let groups = scope.groups();
    let (session_id, mut events) = runtime.hub.subscribe(&groups);
    if let Some((kind, id)) = scope.presence() {
        runtime.presence.join(kind, id);
    }
    debug!(?scope, %session_id, "push channel connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if is_ping(&text) {
                            let Ok(pong) = serde_json::to_string(&PushEvent::Pong) else {
                                continue;
                            };
                            if socket.send(Message::Text(pong.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    runtime.hub.leave(&session_id, &groups);
    if let Some((kind, id)) = scope.presence() {
        runtime.presence.leave(kind, id);
    }
    debug!(?scope, %session_id, "push channel disconnected");
}

fn is_ping(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "ping"))
        .unwrap_or(false)
}
