//! Pure reconciliation state for the realtime job/queue sync layer.
//!
//! Everything here is synchronous and I/O-free:
//! - SequenceGuard rejects regressed deliveries
//! - CompletionLedger suppresses replays for finished jobs
//! - JobTable / QueueTable hold the canonical client-side view
//! - RoomSet counts room holds across caller classes
//! - Reconciler wires them into the one mandatory event pipeline
//!
//! Timers, transport emits, and change notification live in the `actors`
//! crate on top of this.

mod job_table;
mod ledger;
mod queue_table;
mod reconciler;
mod rooms;
mod sequence;

pub use job_table::{JobTable, ProgressUpdate, TerminalIdentity};
pub use ledger::{CompletionLedger, DEFAULT_RETENTION};
pub use queue_table::QueueTable;
pub use reconciler::{ApplyOutcome, Reconciler};
pub use rooms::RoomSet;
pub use sequence::{SequenceGuard, effective_sequence};
