//! Background Tasks Module
//!
//! The maintenance worker and the tickers that pace it.

mod maintenance;
mod ticker;

pub use maintenance::{CycleReport, MaintenanceWorker, SweepFailure};
pub use ticker::{IntervalTicker, ManualTicker, TickHandle, Ticker};
