use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_types::api::{Claims, SendMessageRequest};
use parley_types::events::ServerEvent;
use parley_types::models::{Message, MessageStatus};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_blocking;

/// Everyone the caller can message: all other registered users.
pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let contacts = run_blocking(move || Ok(db.list_contacts(claims.sub)?)).await?;
    Ok(Json(contacts))
}

/// Full history between the caller and `peer_id`, oldest first.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let messages = run_blocking(move || {
        if db.get_user_by_id(peer_id)?.is_none() {
            return Err(ApiError::NotFound("user"));
        }
        Ok(db.get_conversation(claims.sub, peer_id)?)
    })
    .await?;

    Ok(Json(messages))
}

/// Store a new message to `peer_id` and push it to the peer's live socket.
pub async fn send_message(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = req.normalized_text();
    let image = req.normalized_image();
    if text.is_none() && image.is_none() {
        return Err(ApiError::BadRequest("message needs text or an image"));
    }

    let message = Message {
        id: Uuid::new_v4(),
        sender_id: claims.sub,
        receiver_id: peer_id,
        text,
        image,
        status: MessageStatus::Sent,
        reactions: Vec::new(),
        created_at: chrono::Utc::now(),
    };

    let db = state.db.clone();
    let stored = message.clone();
    run_blocking(move || {
        if db.get_user_by_id(peer_id)?.is_none() {
            return Err(ApiError::NotFound("user"));
        }
        db.insert_message(&stored)?;
        Ok(())
    })
    .await?;

    let pushed = state
        .dispatcher
        .send_to_user(peer_id, ServerEvent::NewMessage(message.clone()))
        .await;
    info!(
        "{} -> {}: message {} stored (live: {})",
        claims.sub, peer_id, message.id, pushed
    );

    Ok((StatusCode::CREATED, Json(message)))
}
