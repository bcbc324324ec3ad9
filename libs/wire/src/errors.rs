use thiserror::Error;

/// Maximum encoded frame size accepted from a node, guarding against a
/// malformed or hostile peer exhausting memory during decode.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame exceeds maximum size of {MAX_FRAME_BYTES} bytes ({0} bytes received)")]
    FrameTooLarge(usize),

    #[error("frame codec failure: {0}")]
    Codec(#[from] bincode::Error),
}
