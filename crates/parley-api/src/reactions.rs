use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use parley_types::api::{Claims, ReactRequest, ReactResponse};
use parley_types::events::ServerEvent;
use parley_types::reactions::{emoji_for, reconcile};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_blocking;

/// Upper bound in chars; ZWJ sequences with skin tones run to a dozen.
const MAX_EMOJI_CHARS: usize = 16;

/// Fold the caller's reaction request into the message and notify both
/// parties of the conversation.
pub async fn react(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let emoji = req.emoji.map(|e| e.trim().to_string());
    if let Some(e) = &emoji {
        if e.is_empty() || e.chars().count() > MAX_EMOJI_CHARS {
            return Err(ApiError::BadRequest("invalid emoji"));
        }
    }

    let actor = claims.sub;
    let db = state.db.clone();
    let message = run_blocking(move || {
        let updated = db.update_message(message_id, |message| {
            if !message.involves(actor) {
                return None;
            }
            message.reactions = reconcile(&message.reactions, actor, emoji.as_deref());
            Some(message.clone())
        })?;

        match updated {
            None => Err(ApiError::NotFound("message")),
            Some(None) => Err(ApiError::Forbidden("not a party to this message")),
            Some(Some(message)) => Ok(message),
        }
    })
    .await?;

    // Resulting emoji, so receivers can apply the event more than once
    let current = emoji_for(&message.reactions, actor).map(str::to_string);
    let delivered = state
        .dispatcher
        .dispatch(
            ServerEvent::MessageReactionUpdated {
                message_id,
                emoji: current,
                user_id: actor,
            },
            message.sender_id,
            message.receiver_id,
        )
        .await;
    debug!(
        "{} reacted on {}: {} reaction(s), pushed to {} connection(s)",
        actor,
        message_id,
        message.reactions.len(),
        delivered
    );

    Ok(Json(ReactResponse {
        message_id,
        reactions: message.reactions,
    }))
}
