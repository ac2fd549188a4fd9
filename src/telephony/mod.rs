//! Telephony side of the bridge: wire protocol and per-stream link state.

pub mod link;
pub mod protocol;

pub use link::{TelephonyInput, TelephonyLink};
