use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeLinkError {
    #[error("transport failure dialing node: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("node endpoint could not be parsed as a websocket URI: {0}")]
    InvalidEndpoint(String),

    #[error("frame codec failure: {0}")]
    Wire(#[from] controller_wire::WireError),

    #[error("connection closed by remote node")]
    Closed,
}
