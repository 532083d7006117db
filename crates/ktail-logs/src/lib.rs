//! Log tailing for ktail
//!
//! This crate provides container matching, per-container log tailers with reconnect and
//! dedup, and the controller that keeps the set of tailers in sync with the cluster.

mod backoff;
mod controller;
mod matcher;
mod parser;
mod selector;
mod tailer;

#[cfg(test)]
mod fake;

pub use backoff::Backoff;
pub use controller::{
    CLOCK_SKEW_SECS, Callbacks, Controller, ControllerError, ControllerOptions, StartPoint,
    TailerHandle,
};
pub use matcher::{Admission, ContainerOf, Matchable, Matcher, MatcherError};
pub use parser::{Fingerprint, LogParser, ParsedLine};
pub use selector::{LabelSelector, Requirement, SelectorError};
pub use tailer::{TailError, TailState, Tailer, TailerOptions};

// Re-export types used in our public API
pub use ktail_types::{ContainerSpec, KeyStrategy, LogEvent, PodInfo, TailerKey};
