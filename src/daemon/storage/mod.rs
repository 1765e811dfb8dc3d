//!  Storage is organized through [usage_store::JsonUsageStore].
//!  The basic idea is:
//!   - All state lives in one json document, keyed by local day.
//!   - Each day holds accumulated site durations and the delivery state of its report.
//!   - Every change is a locked read-modify-write that atomically replaces the document.

pub mod entities;
pub mod migration;
pub mod usage_store;
