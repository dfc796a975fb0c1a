#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("live channel closed")]
    Closed,

    #[error("no conversation selected")]
    NoPeer,

    #[error("message {0} is not in the current conversation")]
    UnknownMessage(uuid::Uuid),
}
