//! Monitoring pipeline
//!
//! ```text
//! ReadingSource --> DetectorPool (sharded by sensor) --> forwarder --> ControllerHandle
//!                        |                                                  |
//!                        +---- BaselineStore (load per reading) <-- publish on accept
//! ```

pub mod monitoring_loop;
pub mod source;

pub use monitoring_loop::{LoopStats, MonitoringLoop};
pub use source::{JsonLinesSource, ReadingEvent, ReadingSource, ReplaySource, SourceError};
