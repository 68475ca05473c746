//! Macro execution worker.
//!
//! The worker is started by a host process with a correlation id, the host's
//! pid and the host's version. It connects to the host's channel, then serves
//! script requests on one dedicated thread until the host asks it to stop or
//! goes away. Every request gets exactly one terminal reply: success, a
//! script error located in the user's source, or a host fault.
//!
//! # Modules
//!
//! * [`session`] - the execution loop and its thread
//! * [`runner`] - parse once, invoke the entry point N times
//! * [`script`] - request text to wrapped macro source
//! * [`reporter`] - reply transmission
//! * [`ipc`] - the worker's channel endpoint
//! * [`resolver`] - dependencies from the host install directory
//! * [`config`] - optional `worker.toml`
//! * [`host`] - the host's channel endpoint, for drivers and tests

pub mod config;
pub mod host;
pub mod ipc;
pub mod logging;
pub mod reporter;
pub mod resolver;
pub mod runner;
pub mod script;
pub mod session;

/// Component name reported as the origin of worker faults.
pub const ORIGIN: &str = resolver::OWN_NAMESPACE;
