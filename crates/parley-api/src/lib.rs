//! HTTP surface: auth, contacts, conversation history, sending, reacting,
//! and the upgrade into the live channel.

pub mod auth;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod middleware;
pub mod reactions;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tracing::error;

use crate::auth::AppState;
use crate::error::ApiError;

/// All routes, public and authenticated, bound to `state`. The live channel
/// authenticates through its `token` query parameter instead of the header.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/gateway", get(gateway::upgrade));

    let protected_routes = Router::new()
        .route("/contacts", get(messages::list_contacts))
        .route("/conversation/{peer_id}", get(messages::get_conversation))
        .route("/messages/{peer_id}", post(messages::send_message))
        .route("/messages/{message_id}/react", post(reactions::react))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

/// Run blocking store work off the async runtime.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })?
}
