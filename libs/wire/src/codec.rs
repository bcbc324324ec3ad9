//! bincode encode/decode with a hard size ceiling (§6, §7 kind f).

use crate::errors::{WireError, MAX_FRAME_BYTES};
use crate::frames::{ClientFrame, ServerFrame};

pub fn encode_client_frame(frame: &ClientFrame) -> Result<Vec<u8>, WireError> {
    Ok(bincode::serialize(frame)?)
}

pub fn encode_server_frame(frame: &ServerFrame) -> Result<Vec<u8>, WireError> {
    Ok(bincode::serialize(frame)?)
}

pub fn decode_client_frame(bytes: &[u8]) -> Result<ClientFrame, WireError> {
    guard_size(bytes)?;
    Ok(bincode::deserialize(bytes)?)
}

pub fn decode_server_frame(bytes: &[u8]) -> Result<ServerFrame, WireError> {
    guard_size(bytes)?;
    Ok(bincode::deserialize(bytes)?)
}

fn guard_size(bytes: &[u8]) -> Result<(), WireError> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge(bytes.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{StatsFrame, StatsRecord};

    #[test]
    fn round_trips_a_stats_frame() {
        let frame = ServerFrame::Stats(StatsFrame {
            stats: vec![StatsRecord {
                name: "user>>>alice>>>uplink>>>".into(),
                value: "100".into(),
            }],
        });
        let bytes = encode_server_frame(&frame).unwrap();
        let decoded = decode_server_frame(&bytes).unwrap();
        match decoded {
            ServerFrame::Stats(s) => assert_eq!(s.stats[0].value, "100"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_oversized_input() {
        let oversized = vec![0u8; MAX_FRAME_BYTES + 1];
        assert!(decode_server_frame(&oversized).is_err());
    }
}
