// Test Helpers Module - Scripted Collaborators
//
// In-process stand-ins for the remote side of fault injection: executors
// that answer from a script and record what they were asked, and a static
// target inventory. Used by unit tests and the integration suites.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::{ChaosError, Result};
use crate::execution::{CommandExecutor, ExecutorFactory};
use crate::models::{CommandResult, FaultSpec};
use crate::orchestration::{TargetInventory, TargetQuery};

/// Executor answering from scripted responses and recording every command.
///
/// Unscripted commands succeed with empty output. A sequence response is
/// consumed in order and its last entry repeats.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    responses: Mutex<HashMap<String, VecDeque<CommandResult>>>,
    commands: Mutex<Vec<String>>,
    copied: Mutex<Vec<(String, String)>>,
    unreachable: bool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, command: impl Into<String>, result: CommandResult) -> Self {
        self.respond_sequence(command, vec![result])
    }

    pub fn respond_sequence(self, command: impl Into<String>, results: Vec<CommandResult>) -> Self {
        self.responses
            .lock()
            .insert(command.into(), results.into_iter().collect());
        self
    }

    /// Every command fails as if the target could not be reached
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// (file name, target path) pairs staged through `copy_file`
    pub fn copied_files(&self) -> Vec<(String, String)> {
        self.copied.lock().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run(&self, command: &str) -> Result<CommandResult> {
        self.commands.lock().push(command.to_string());
        if self.unreachable {
            return Err(ChaosError::transient(format!(
                "connection refused while running '{command}'"
            )));
        }

        let mut responses = self.responses.lock();
        let result = match responses.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(result.unwrap_or_else(|| CommandResult::success("")))
    }

    async fn copy_file(&self, name: &str, target_path: &str) -> Result<()> {
        if self.unreachable {
            return Err(ChaosError::transient("connection refused while copying"));
        }
        self.copied
            .lock()
            .push((name.to_string(), target_path.to_string()));
        Ok(())
    }
}

/// Hands out one shared [`RecordingExecutor`] for every endpoint
#[derive(Debug, Default)]
pub struct RecordingExecutorFactory {
    executor: Arc<RecordingExecutor>,
    requested: Mutex<Vec<String>>,
    unavailable: bool,
}

impl RecordingExecutorFactory {
    pub fn with_executor(executor: Arc<RecordingExecutor>) -> Self {
        Self {
            executor,
            ..Default::default()
        }
    }

    /// Executor creation always fails with a transient error
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn executor(&self) -> Arc<RecordingExecutor> {
        self.executor.clone()
    }

    /// Endpoint names executors were requested for
    pub fn requested_endpoints(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl ExecutorFactory for RecordingExecutorFactory {
    async fn executor_for(&self, spec: &FaultSpec) -> Result<Arc<dyn CommandExecutor>> {
        self.requested.lock().push(spec.endpoint_name.clone());
        if self.unavailable {
            return Err(ChaosError::transient(format!(
                "endpoint {} is unreachable",
                spec.endpoint_name
            )));
        }
        let executor: Arc<dyn CommandExecutor> = self.executor.clone();
        Ok(executor)
    }
}

/// Inventory answering fixed results per query; unknown queries find nothing
#[derive(Debug, Default)]
pub struct StaticInventory {
    answers: Mutex<Vec<(TargetQuery, Vec<String>)>>,
    queries: Mutex<Vec<TargetQuery>>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer<I, S>(self, query: TargetQuery, results: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.answers
            .lock()
            .push((query, results.into_iter().map(Into::into).collect()));
        self
    }

    pub fn queries(&self) -> Vec<TargetQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl TargetInventory for StaticInventory {
    async fn query(&self, _spec: &FaultSpec, query: &TargetQuery) -> Result<Vec<String>> {
        self.queries.lock().push(query.clone());
        Ok(self
            .answers
            .lock()
            .iter()
            .find(|(known, _)| known == query)
            .map(|(_, results)| results.clone())
            .unwrap_or_default())
    }
}

/// Fault spec with a reachable endpoint and a single injection command
pub fn command_fault(name: &str, endpoint: &str, host: &str) -> FaultSpec {
    let mut spec = FaultSpec::command(name, endpoint)
        .with_endpoint(crate::models::EndpointSpec::new(endpoint, Some(host.to_string())));
    spec.injection_commands = vec![crate::models::CommandInfo::new(format!("inject {name}"))];
    spec.remediation_commands = vec![crate::models::CommandInfo::new(format!("remediate {name}"))];
    spec
}
