use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{CommandResult, FaultSpec};

/// Runs one command on a remote target.
///
/// Implementations return `Ok` with the exit code for anything the target
/// answered, and `ChaosError::Transient` when the target could not be reached.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandResult>;

    /// Stage a support file on the target
    async fn copy_file(&self, _name: &str, _target_path: &str) -> Result<()> {
        Ok(())
    }

    /// Whether a staged file is already present on the target
    async fn file_exists(&self, target_path: &str) -> Result<bool> {
        let result = self.run(&format!("test -f {target_path}")).await?;
        Ok(result.exit_code == 0)
    }
}

/// Builds executors (SSH sessions, container clients, cloud API clients)
/// for the endpoint a fault spec names
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn executor_for(&self, spec: &FaultSpec) -> Result<Arc<dyn CommandExecutor>>;
}
