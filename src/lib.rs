//! Marid — an on-host action executor.
//!
//! The daemon drains cloud message queues, resolves each message to a named
//! action, runs the action's runbook (a local executable or a script fetched
//! from a source repository), and reports every outcome to the upstream
//! alerting service.

#[cfg(test)]
pub mod test_utils;

pub mod config;
pub mod pool;
pub mod poller;
pub mod queue;
pub mod report;
pub mod runbook;
pub mod supervisor;
pub mod types;
