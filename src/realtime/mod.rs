//! Upstream side of the bridge: realtime model protocol and socket client.

pub mod client;
pub mod protocol;

pub use client::ModelLink;
pub use protocol::{ClientEvent, ServerEvent};
