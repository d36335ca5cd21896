//! # Command Execution
//!
//! The remote side of fault injection: the [`CommandExecutor`] contract,
//! bounded retries for transient failures and the [`CommandRunner`] that
//! resolves placeholders and checks command results.

pub mod command_runner;
pub mod executor;
pub mod retry;

pub use command_runner::{resolve_command, CommandRunner};
pub use executor::{CommandExecutor, ExecutorFactory};
pub use retry::RetryPolicy;
