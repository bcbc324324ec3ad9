//! Per-node transport primitive: dial a node's WebSocket endpoint and
//! exchange bincode-encoded `StreamNodeData` frames over it.

use crate::errors::NodeLinkError;
use controller_domain::Node;
use controller_wire::{decode_server_frame, encode_client_frame, ClientFrame, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// An established duplex connection to one node. Frames are sent and
/// received as bincode payloads carried in WebSocket binary messages.
pub struct NodeConnection {
    socket: Socket,
}

impl NodeConnection {
    /// Dials `node.endpoint`. TLS is negotiated automatically by
    /// `tokio-tungstenite` whenever the endpoint scheme is `wss://`; the
    /// caller (StreamMultiplexer) is responsible for using `wss://` for
    /// every non-local node per §6. Client certificate material declared
    /// on `Node` is reserved for a future mutual-TLS connector and is not
    /// yet wired into the handshake.
    pub async fn dial(node: &Node) -> Result<Self, NodeLinkError> {
        let (socket, _response) = tokio_tungstenite::connect_async(&node.endpoint).await?;
        Ok(Self { socket })
    }

    pub async fn send(&mut self, frame: &ClientFrame) -> Result<(), NodeLinkError> {
        let bytes = encode_client_frame(frame)?;
        self.socket.send(Message::Binary(bytes)).await?;
        Ok(())
    }

    pub async fn send_ping(&mut self) -> Result<(), NodeLinkError> {
        self.socket.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }

    /// Receives the next server frame, transparently absorbing
    /// ping/pong/close control frames. Returns `Ok(None)` when the peer
    /// closed the stream cleanly.
    pub async fn recv(&mut self) -> Result<Option<ServerFrame>, NodeLinkError> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(decode_server_frame(&bytes)?)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(fault)) => return Err(NodeLinkError::Transport(fault)),
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}
