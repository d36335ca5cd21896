use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Extract a value from command output into the task's troubleshooting info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputProcessingInfo {
    /// Regex whose first capture group (or whole match) is the value, the
    /// whole trimmed output when absent
    pub extraction_regex: Option<String>,
    pub property_name: String,
}

/// One command to run against a target, with its acceptance rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub command: String,
    #[serde(default)]
    pub ignore_exit_value_check: bool,
    /// Output must contain at least one of these when non-empty
    #[serde(default)]
    pub expected_command_output_list: Vec<String>,
    /// Output substring to a message shown instead of the raw output
    #[serde(default)]
    pub known_failure_map: BTreeMap<String, String>,
    #[serde(default)]
    pub no_of_retries: u32,
    /// Seconds between retries, zero picks the configured default
    #[serde(default)]
    pub retry_interval: u64,
    #[serde(default)]
    pub command_output_processing_info: Vec<OutputProcessingInfo>,
}

impl CommandInfo {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn ignore_exit_value(mut self) -> Self {
        self.ignore_exit_value_check = true;
        self
    }

    pub fn expect_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_command_output_list.push(expected.into());
        self
    }

    pub fn known_failure(mut self, output: impl Into<String>, message: impl Into<String>) -> Self {
        self.known_failure_map.insert(output.into(), message.into());
        self
    }

    pub fn with_retries(mut self, no_of_retries: u32, retry_interval: u64) -> Self {
        self.no_of_retries = no_of_retries;
        self.retry_interval = retry_interval;
        self
    }

    pub fn extract(mut self, regex: impl Into<String>, property: impl Into<String>) -> Self {
        self.command_output_processing_info.push(OutputProcessingInfo {
            extraction_regex: Some(regex.into()),
            property_name: property.into(),
        });
        self
    }
}

/// Outcome of running one command on a remote target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub output: String,
}

impl CommandResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }

    pub fn failure(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }
}

/// Script or binary staged on the target before injection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportScript {
    pub name: String,
    pub target_directory: String,
    #[serde(default)]
    pub executable: bool,
}

impl SupportScript {
    pub fn target_path(&self) -> String {
        format!("{}/{}", self.target_directory.trim_end_matches('/'), self.name)
    }
}
