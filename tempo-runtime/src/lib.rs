//! Nested wall-clock scope timers.
//!
//! ```
//! use tempo_runtime::{Profiler, TimerConfig};
//!
//! let profiler = Profiler::new(TimerConfig::default());
//! {
//!     let _main = profiler.timer("main");
//!     let _step = profiler.timer("step");
//! }
//! let register = profiler.snapshot().unwrap();
//! assert_eq!(register.get("main::step").unwrap().count, 1);
//! ```
#![allow(unsafe_code)]
#![allow(clippy::missing_const_for_thread_local)]

mod clock;
mod config;
mod consolidate;
mod error;
mod gate;
mod profiler;
mod record;
mod report;

pub use clock::{Clock, CycleClock, ManualClock, MonotonicClock};
pub use config::TimerConfig;
pub use consolidate::{Consolidate, MergeBySize};
pub use error::Error;
pub use profiler::{Profiler, Timer};
pub use record::{Record, Register, Stats};
pub use report::{percent, write_tree, ReportOptions};
