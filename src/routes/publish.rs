use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::gateway::events::{EventEnvelope, FANOUT_DESTINATION};
use crate::state::AppState;

fn accepted(channel: &str, receivers: usize) -> (StatusCode, Json<Value>) {
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "data": {
                "channel": channel,
                "receivers": receivers
            }
        })),
    )
}

/// Unwrap a JSON object body, turning every rejection into a 400.
fn object_body(body: Result<Json<Value>, JsonRejection>) -> Result<Map<String, Value>, AppError> {
    match body {
        Ok(Json(Value::Object(body))) => Ok(body),
        Ok(Json(_)) => Err(AppError::BadRequest(
            "body must be a JSON object".to_string(),
        )),
        Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
    }
}

fn take_event(body: &mut Map<String, Value>) -> Result<String, AppError> {
    match body.remove("event") {
        Some(Value::String(event)) if !event.trim().is_empty() => Ok(event),
        Some(_) | None => Err(AppError::BadRequest(
            "event must be a non-empty string".to_string(),
        )),
    }
}

/// A missing `data` is an empty object.
fn take_data(body: &mut Map<String, Value>) -> Result<Map<String, Value>, AppError> {
    match body.remove("data") {
        Some(Value::Object(data)) => Ok(data),
        None => Ok(Map::new()),
        Some(_) => Err(AppError::BadRequest("data must be an object".to_string())),
    }
}

/// Wrap `{event, data, ..extra}` in a fan-out envelope and publish it.
pub async fn publish_event(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let mut body = object_body(body)?;
    let event = take_event(&mut body)?;
    let data = take_data(&mut body)?;

    let receivers = state
        .publisher
        .publish(&channel, event, data, body)
        .await?;
    Ok(accepted(&channel, receivers))
}

/// Publish a complete envelope as given. `destination` defaults to the
/// fan-out marker.
pub async fn publish_payload(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let mut body = object_body(body)?;
    let destination = match body.remove("destination") {
        Some(Value::String(destination)) => destination,
        None => FANOUT_DESTINATION.to_string(),
        Some(_) => {
            return Err(AppError::BadRequest(
                "destination must be a string".to_string(),
            ))
        }
    };
    let event = take_event(&mut body)?;
    let data = take_data(&mut body)?;
    let envelope = EventEnvelope {
        destination,
        event,
        data,
        extra: body,
    };

    let receivers = state
        .publisher
        .publish_payload(&channel, &envelope)
        .await?;
    Ok(accepted(&channel, receivers))
}
