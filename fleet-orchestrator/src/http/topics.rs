//! Fabric gateway for remote workers.
//!
//! Exposes topic lifecycle, publishing and pulling over HTTP. A pulled
//! message is acknowledged before it is returned.

use crate::engine::Orchestrator;
use crate::error::FabricError;
use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use fleet_types::FabricMessage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Longest a pull may wait for a message.
const MAX_WAIT: Duration = Duration::from_secs(30);

/// Message body as exchanged over HTTP.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    /// String attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Query parameters of a pull.
#[derive(Debug, Deserialize)]
pub struct PullParams {
    /// Milliseconds to wait for a message (default 0, capped at 30s).
    #[serde(default)]
    pub wait_ms: u64,
}

fn error_response(e: FabricError) -> Response {
    let status = match e {
        FabricError::TopicNotFound(_) => StatusCode::NOT_FOUND,
        FabricError::TopicExists(_) => StatusCode::CONFLICT,
        FabricError::Codec(_) => StatusCode::BAD_REQUEST,
    };
    (status, e.to_string()).into_response()
}

pub async fn create_handler(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
    Path(topic): Path<String>,
) -> Response {
    match orchestrator.fabric().create_topic(&topic).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn delete_handler(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
    Path(topic): Path<String>,
) -> Response {
    match orchestrator.fabric().delete_topic(&topic).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(FabricError::TopicNotFound(topic)),
        Err(e) => error_response(e),
    }
}

pub async fn publish_handler(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
    Path(topic): Path<String>,
    Json(body): Json<MessageBody>,
) -> Response {
    let message = FabricMessage {
        data: Vec::new(),
        attributes: body.attributes,
    };
    match orchestrator.fabric().publish(&topic, message).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn pull_handler(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
    Path(topic): Path<String>,
    Query(params): Query<PullParams>,
) -> Response {
    let mut subscription = match orchestrator.fabric().subscribe(&topic).await {
        Ok(subscription) => subscription,
        Err(e) => return error_response(e),
    };

    let wait = Duration::from_millis(params.wait_ms).min(MAX_WAIT);
    match tokio::time::timeout(wait, subscription.next()).await {
        Ok(Some(delivery)) => {
            let body = MessageBody {
                attributes: delivery.message().attributes.clone(),
            };
            delivery.ack();
            Json(body).into_response()
        }
        Ok(None) => error_response(FabricError::TopicNotFound(topic)),
        Err(_) => StatusCode::NO_CONTENT.into_response(),
    }
}
