//! Direct-driver engine: drives a local Chromium over the DevTools protocol.

pub mod cdp;
pub mod engine;
pub mod page;

pub use engine::{DirectDriverEngine, DirectDriverProvider};
pub use page::CdpPage;
