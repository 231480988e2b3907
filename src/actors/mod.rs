//! Actor-based monitoring engine
//!
//! The engine is a set of independent tokio tasks communicating over
//! channels; nothing shares mutable state.
//!
//! ```text
//!                  ┌──────────────┐
//!                  │ ProberActor  │──── uptime samples, offline/latency alerts
//!                  └──────┬───────┘
//!                         │ reads
//!                  ┌──────▼───────┐
//!                  │   Registry   │
//!                  └──────┬───────┘
//!                         │ reads
//!   adapter events ┌──────▼──────────┐
//!  ───────────────►│ TagMonitorActor │── AlarmEvaluator ── readings, alarms
//!   (one channel   └─────────────────┘
//!    per endpoint)   (one per endpoint)
//! ```
//!
//! Each actor owns its state exclusively and processes events sequentially,
//! which is what makes per-tag alarm evaluation ordered without locks.

pub mod evaluator;
pub mod messages;
pub mod prober;
pub mod tag_monitor;

pub use evaluator::AlarmEvaluator;
pub use messages::{ConnectionState, MonitorState, ProberCommand, TagMonitorCommand};
pub use prober::ProberHandle;
pub use tag_monitor::TagMonitorHandle;
