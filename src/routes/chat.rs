use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const PLACEHOLDER_TEXT: &str = "This is a placeholder response from the backend. Your message was received and the \
streaming is working. Replace this with real AI output when ready.";
pub const CHUNK_SIZE: usize = 24;
const SIZE_LIMIT_MESSAGE: &str = "'message' exceeds size limit";

pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size.max(1)).map(|c| c.iter().collect()).collect()
}

/// Extracts and validates the `message` field of a chat request body.
pub fn parse_message(payload: &[u8], max_message_bytes: usize) -> AppResult<String> {
    if payload.is_empty() {
        return Err(AppError::BadRequest("Request body is required".to_string()));
    }
    let data: Value =
        serde_json::from_slice(payload).map_err(|_| AppError::BadRequest("Invalid JSON payload".to_string()))?;

    let message = match data.get("message") {
        None | Some(Value::Null) => return Err(AppError::BadRequest("'message' field is required".to_string())),
        Some(Value::String(s)) => s,
        Some(_) => return Err(AppError::BadRequest("'message' must be a string".to_string())),
    };
    if message.trim().is_empty() {
        return Err(AppError::BadRequest("'message' must not be empty".to_string()));
    }
    if message.len() > max_message_bytes {
        return Err(AppError::BadRequest(SIZE_LIMIT_MESSAGE.to_string()));
    }
    Ok(message.clone())
}

/// Maps a body that could not be read into the same 400 an invalid payload gets.
fn body_rejection(rejection: BytesRejection) -> AppError {
    match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => AppError::BadRequest(SIZE_LIMIT_MESSAGE.to_string()),
        _ => AppError::BadRequest("Invalid request body".to_string()),
    }
}

/// `POST /api/chat`: streams placeholder text back in small chunks.
pub async fn chat(State(state): State<AppState>, body: Result<Bytes, BytesRejection>) -> AppResult<Response> {
    let body = body.map_err(body_rejection)?;
    parse_message(&body, state.config.chat.max_message_bytes)?;

    let delay = Duration::from_millis(state.config.chat.delay_ms);
    let stream = futures::stream::iter(chunk_text(PLACEHOLDER_TEXT, CHUNK_SIZE).into_iter().enumerate()).then(
        move |(i, chunk)| async move {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, Infallible>(chunk)
        },
    );

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8"), (header::CACHE_CONTROL, "no-cache")],
        Body::from_stream(stream),
    )
        .into_response())
}
