//! Agent-bridge engine: hands whole tasks to an out-of-process agent that
//! speaks newline-delimited JSON over stdio.

pub mod channel;
pub mod engine;

pub use channel::{BridgeChannel, BridgeError, ChannelState};
pub use engine::{AgentBridgeEngine, AgentBridgeProvider};
