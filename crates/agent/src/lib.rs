//! The DC agent: local decisioning over cached policies and sessions, a
//! mutually-authenticated client to the center, gossip replication of
//! session events to peer DCs, and the local IPC endpoint the host
//! interception shim talks to.

pub mod cache;
pub mod central;
pub mod cli;
pub mod decision;
pub mod gossip;
pub mod heartbeat;
#[cfg(unix)]
pub mod ipc;
pub mod local_store;
pub mod state;
pub mod stream;
