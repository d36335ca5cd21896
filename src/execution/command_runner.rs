//! # Command Runner
//!
//! Runs a fault's command list strictly in order against one executor.
//! Each command has its placeholders resolved, is retried as configured,
//! and is checked against its exit code, expected output and known failures.
//! Values extracted from the output are stored in the task's troubleshooting
//! info, where later commands can reference them.

use regex::Regex;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::executor::CommandExecutor;
use super::retry::RetryPolicy;
use crate::config::ExecutionConfig;
use crate::constants::placeholders::{ADD_INFO_EXPRESSION, ARG_EXPRESSION, STACK_EXPRESSION};
use crate::error::{ChaosError, Result};
use crate::models::{CommandInfo, CommandResult, OutputProcessingInfo, TroubleshootingInfo};

#[derive(Debug, Clone)]
pub struct CommandRunner {
    default_retry_interval: Duration,
    connection_retry: RetryPolicy,
}

impl CommandRunner {
    pub fn new(default_retry_interval: Duration, connection_retry: RetryPolicy) -> Self {
        Self {
            default_retry_interval,
            connection_retry,
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(
            Duration::from_secs(config.default_command_retry_interval_seconds),
            RetryPolicy::from_config(config),
        )
    }

    /// Run `commands` in list order, stopping at the first failure.
    ///
    /// Returns the output of the last command run.
    pub async fn run_commands(
        &self,
        executor: &dyn CommandExecutor,
        commands: &[CommandInfo],
        troubleshooting: &mut TroubleshootingInfo,
        args: &BTreeMap<String, String>,
    ) -> Result<Option<String>> {
        let mut latest_output: Option<String> = None;

        for info in commands {
            let result = self
                .execute_retriable(executor, info, troubleshooting, args, latest_output.as_deref())
                .await?;

            if !info.command_output_processing_info.is_empty() {
                extract_fields(
                    &info.command_output_processing_info,
                    troubleshooting,
                    &result.output,
                )?;
            }
            latest_output = Some(result.output);
        }

        Ok(latest_output)
    }

    async fn execute_retriable(
        &self,
        executor: &dyn CommandExecutor,
        info: &CommandInfo,
        troubleshooting: &TroubleshootingInfo,
        args: &BTreeMap<String, String>,
        latest_output: Option<&str>,
    ) -> Result<CommandResult> {
        if info.no_of_retries == 0 {
            return self
                .execute_once(executor, info, troubleshooting, args, latest_output)
                .await;
        }

        let interval = if info.retry_interval > 0 {
            Duration::from_secs(info.retry_interval)
        } else {
            self.default_retry_interval
        };

        for attempt in 1..=info.no_of_retries {
            match self
                .execute_once(executor, info, troubleshooting, args, latest_output)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(
                        command = %info.command,
                        attempt,
                        error = %e,
                        "Command execution attempt failed"
                    );
                    tokio::time::sleep(interval).await;
                }
            }
        }

        // final attempt decides the outcome
        self.execute_once(executor, info, troubleshooting, args, latest_output)
            .await
    }

    async fn execute_once(
        &self,
        executor: &dyn CommandExecutor,
        info: &CommandInfo,
        troubleshooting: &TroubleshootingInfo,
        args: &BTreeMap<String, String>,
        latest_output: Option<&str>,
    ) -> Result<CommandResult> {
        let absolute = resolve_command(&info.command, troubleshooting, args, latest_output)?;
        debug!(command = %absolute, "Executing command");

        let command = absolute.as_str();
        let result = self
            .connection_retry
            .run("run_command", move || executor.run(command))
            .await?;

        if !info.ignore_exit_value_check && result.exit_code != 0 {
            return Err(expected_failure(info, &absolute, &result));
        }

        if !info.expected_command_output_list.is_empty()
            && !info
                .expected_command_output_list
                .iter()
                .any(|expected| result.output.contains(expected.as_str()))
        {
            error!(
                expected = ?info.expected_command_output_list,
                output = %result.output,
                "Command output did not match any expected output"
            );
            return Err(expected_failure(info, &absolute, &result));
        }

        Ok(result)
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

/// Replace argument, additional-info and previous-output references.
///
/// Any reference left unresolved fails the command before it is sent.
pub fn resolve_command(
    command: &str,
    troubleshooting: &TroubleshootingInfo,
    args: &BTreeMap<String, String>,
    latest_output: Option<&str>,
) -> Result<String> {
    let mut resolved = replace_references(command, args, ARG_EXPRESSION)?;
    resolved = replace_references(&resolved, &troubleshooting.additional_info, ADD_INFO_EXPRESSION)?;

    if resolved.contains(STACK_EXPRESSION) {
        match latest_output {
            Some(output) => resolved = resolved.replace(STACK_EXPRESSION, output.trim()),
            None => {
                return Err(ChaosError::MissingReferenceValues {
                    command: command.to_string(),
                })
            }
        }
    }

    Ok(resolved)
}

fn replace_references(
    command: &str,
    values: &BTreeMap<String, String>,
    expression: &str,
) -> Result<String> {
    if !command.contains(expression) {
        return Ok(command.to_string());
    }

    // Longest keys first so `$FI_ARG_ab` is not clobbered by key `a`
    let mut keys: Vec<&String> = values.keys().collect();
    keys.sort_by_key(|key| std::cmp::Reverse(key.len()));

    let mut resolved = command.to_string();
    for key in keys {
        resolved = resolved.replace(&format!("{expression}{key}"), &values[key]);
    }

    if resolved.contains(expression) {
        return Err(ChaosError::MissingReferenceValues {
            command: resolved,
        });
    }
    Ok(resolved)
}

/// Map a failed execution to a known-failure message when one matches
fn expected_failure(info: &CommandInfo, command: &str, result: &CommandResult) -> ChaosError {
    let output = result.output.to_lowercase();
    for (pattern, message) in &info.known_failure_map {
        if !pattern.is_empty() && output.contains(&pattern.to_lowercase()) {
            let message = if message.is_empty() {
                result.output.clone()
            } else {
                message.clone()
            };
            return ChaosError::KnownFailure {
                command: command.to_string(),
                message,
            };
        }
    }

    ChaosError::CommandFailed {
        command: command.to_string(),
        exit_code: result.exit_code,
        output: result.output.clone(),
    }
}

fn extract_fields(
    processing: &[OutputProcessingInfo],
    troubleshooting: &mut TroubleshootingInfo,
    output: &str,
) -> Result<()> {
    for info in processing {
        let value = match &info.extraction_regex {
            None => Some(output.trim().to_string()),
            Some(pattern) => {
                let regex = Regex::new(pattern).map_err(|e| {
                    ChaosError::validation(format!("invalid extraction regex '{pattern}': {e}"))
                })?;
                regex.captures(output).and_then(|captures| {
                    captures
                        .get(1)
                        .or_else(|| captures.get(0))
                        .map(|m| m.as_str().trim().to_string())
                })
            }
        };

        match value {
            Some(value) if !value.is_empty() && !info.property_name.is_empty() => {
                troubleshooting
                    .additional_info
                    .insert(info.property_name.clone(), value);
            }
            _ => {
                return Err(ChaosError::OutputProcessing {
                    property: info.property_name.clone(),
                })
            }
        }
    }
    Ok(())
}
