use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use parley_gateway::connection;

use crate::auth::AppState;
use crate::middleware::decode_token;

/// Token passed as a query parameter, since browsers cannot set headers on
/// a WebSocket handshake.
#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    token: String,
}

/// Authenticate before upgrading: an invalid token never reaches presence.
pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match decode_token(&state.jwt_secret, &query.token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("Rejected gateway upgrade: {}", e);
            return e.into_response();
        }
    };

    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            claims.sub,
            claims.username,
        )
    })
}
