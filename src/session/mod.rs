//! Live-scan session: sampling ticks, the frame batch and its finalization

pub mod scan;
pub mod state;
pub mod ticker;

pub use scan::{ScanSession, ScanSessionBuilder, TickOutcome};
pub use state::{ScanState, SessionStats};
pub use ticker::{IntervalTickSource, TickSource, Ticker};

#[cfg(test)]
mod tests;
