//! Length-prefixed binary frames for streaming RPC responses.
//!
//! Each frame is a `u32` big-endian payload length followed by the bincode
//! payload. [`FrameBuffer`] accumulates transport chunks and drains complete
//! frames in-place, leaving any trailing partial frame for the next push.

use serde::de::DeserializeOwned;
use serde::Serialize;

use mfasrv_domain::{Error, Result};

/// Upper bound on a single frame. A policy row is a few KB; anything near
/// this limit indicates a corrupt or hostile stream.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Serialize a message to its bincode body.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| Error::Other(format!("encode: {e}")))
}

/// Deserialize a bincode body.
pub fn decode_message<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Validation(format!("malformed message: {e}")))
}

/// Serialize a message and wrap it in a length prefix.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = encode_message(msg)?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental frame reassembly over an arbitrary chunking.
#[derive(Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transport chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame payload, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(self.buf[..4].try_into().expect("fixed slice")) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(Error::Validation(format!("frame of {len} bytes exceeds cap")));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let payload = self.buf[4..4 + len].to_vec();
        self.buf.drain(..4 + len);
        Ok(Some(payload))
    }

    /// Bytes still waiting for their frame to complete.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PolicyUpdate;
    use chrono::Utc;

    fn update(id: &str) -> PolicyUpdate {
        PolicyUpdate {
            policy_id: id.into(),
            policy_json: format!("{{\"id\":\"{id}\"}}"),
            deleted: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn frames_survive_arbitrary_chunking() {
        let a = encode_frame(&update("p1")).unwrap();
        let b = encode_frame(&update("p2")).unwrap();
        let wire: Vec<u8> = a.into_iter().chain(b).collect();

        let mut buffer = FrameBuffer::new();
        let mut decoded = Vec::new();
        // Feed one byte at a time — worst-case chunking.
        for byte in wire {
            buffer.push(&[byte]);
            while let Some(payload) = buffer.next_frame().unwrap() {
                decoded.push(decode_message::<PolicyUpdate>(&payload).unwrap());
            }
        }
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].policy_id, "p1");
        assert_eq!(decoded[1].policy_id, "p2");
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&(u32::MAX).to_be_bytes());
        buffer.push(&[0u8; 16]);
        assert!(buffer.next_frame().is_err());
    }

    #[test]
    fn empty_and_partial_buffers_yield_nothing() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.next_frame().unwrap().is_none());
        buffer.push(&[0, 0]);
        assert!(buffer.next_frame().unwrap().is_none());
    }
}
