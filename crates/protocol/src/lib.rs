//! Agent-plane wire protocol: the message types exchanged between DC agents
//! and the center (and between gossiping peers), plus the binary framing
//! used on streaming responses.
//!
//! Bodies are bincode on the wire; the same types derive `Serialize` /
//! `Deserialize` so the framing stays a detail of the transport layer.

mod framing;
mod messages;

pub use framing::{decode_message, encode_frame, encode_message, FrameBuffer};
pub use messages::*;

/// Route prefix of the agent-plane RPC surface.
pub const RPC_PREFIX: &str = "/rpc/v1";

/// Content type of bincode RPC bodies.
pub const RPC_CONTENT_TYPE: &str = "application/x-mfasrv-rpc";
