//! Testdeck Harness
//!
//! Runs the end-to-end test engine and turns its output into live state:
//!
//! - [`store`]: the single run state, bounded history and push ordering
//! - [`supervisor`]: engine process lifecycle (start, stop, timeout)
//! - [`parser`]: pluggable interpretation of engine output and reports
//! - [`hub`]: fan-out of push messages to observers
//! - [`aggregator`]: sequential multi-suite batches
//! - [`archive`]: summaries, report files and suite discovery

pub mod aggregator;
pub mod archive;
pub mod dashboard;
pub mod engine;
pub mod hub;
pub mod parser;
pub mod recorder;
pub mod store;
pub mod supervisor;

pub use aggregator::{Aggregator, EngineInvoker, Invocation, SuiteInvoker};
pub use hub::{Delivery, Hub, Subscription};
pub use parser::{interpreter_for, OutputInterpreter};
pub use recorder::{RecorderHandle, RecorderOptions};
pub use store::RunStore;
pub use supervisor::{RunAck, Supervisor};
