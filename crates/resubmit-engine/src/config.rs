//! Implementation of engine configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use anyhow::bail;
use serde::Deserialize;
use serde::Serialize;

use crate::DirectiveSet;
use crate::SchedulerGateway;
use crate::SlurmGateway;

/// The inclusive maximum number of attempts the controller supports.
pub const MAX_RETRIES: u64 = 100;

/// The default number of attempts made before a job is given up on.
pub const DEFAULT_MAX_RETRIES: u64 = 3;

/// The default number of seconds between queue checks.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// The default name of the job log file, using the scheduler's own job and
/// array task placeholders.
pub const DEFAULT_LOG_FILE_NAME: &str = "%A_%a.log";

/// The default interpreter used for synthesized function-call scripts.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Represents the engine configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Config {
    /// Scheduler command configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Lifecycle controller configuration.
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Function-call script configuration.
    #[serde(default)]
    pub call: CallConfig,
    /// Directives applied to every job before any given on the command line.
    #[serde(default, skip_serializing_if = "DirectiveSet::is_empty")]
    pub directives: DirectiveSet,
}

impl Config {
    /// Validates the engine configuration.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.controller.validate()?;
        self.call.validate()?;
        Ok(())
    }

    /// Creates the scheduler gateway described by this configuration.
    pub fn create_gateway(&self) -> Arc<dyn SchedulerGateway> {
        Arc::new(SlurmGateway::new(self.scheduler.clone()))
    }
}

/// Represents the scheduler commands the gateway invokes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SchedulerConfig {
    /// The command that submits a job script.
    ///
    /// Defaults to `sbatch`.
    #[serde(default = "default_submit_command")]
    pub submit_command: PathBuf,
    /// The command that lists queued and running jobs.
    ///
    /// Defaults to `squeue`.
    #[serde(default = "default_queue_command")]
    pub queue_command: PathBuf,
    /// The command that reports accounting records of finished jobs.
    ///
    /// Defaults to `sacct`.
    #[serde(default = "default_accounting_command")]
    pub accounting_command: PathBuf,
    /// Additional arguments passed to the submit command, before the script
    /// path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_submit_args: Option<Vec<String>>,
}

fn default_submit_command() -> PathBuf {
    "sbatch".into()
}

fn default_queue_command() -> PathBuf {
    "squeue".into()
}

fn default_accounting_command() -> PathBuf {
    "sacct".into()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            submit_command: default_submit_command(),
            queue_command: default_queue_command(),
            accounting_command: default_accounting_command(),
            extra_submit_args: None,
        }
    }
}

impl SchedulerConfig {
    /// Validates the scheduler configuration.
    pub fn validate(&self) -> Result<()> {
        for (name, command) in [
            ("submit_command", &self.submit_command),
            ("queue_command", &self.queue_command),
            ("accounting_command", &self.accounting_command),
        ] {
            if command.as_os_str().is_empty() {
                bail!("configuration value `scheduler.{name}` cannot be empty");
            }
        }

        Ok(())
    }
}

/// Represents lifecycle controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ControllerConfig {
    /// The number of submit, poll and classify cycles made before giving up.
    ///
    /// Defaults to 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u64,
    /// The number of seconds to wait between queue checks.
    ///
    /// Defaults to 10.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// The file name, within the save directory, that the job's output is
    /// redirected to.
    ///
    /// The scheduler expands its own placeholders (`%A`, `%a`, `%j`); they
    /// are passed through untouched. Defaults to `%A_%a.log`.
    #[serde(default = "default_log_file_name")]
    pub log_file_name: String,
}

fn default_max_retries() -> u64 {
    DEFAULT_MAX_RETRIES
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_log_file_name() -> String {
    DEFAULT_LOG_FILE_NAME.to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            poll_interval: default_poll_interval(),
            log_file_name: default_log_file_name(),
        }
    }
}

impl ControllerConfig {
    /// Validates the controller configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            bail!("configuration value `controller.max_retries` cannot be zero");
        }

        if self.max_retries > MAX_RETRIES {
            bail!("configuration value `controller.max_retries` cannot exceed {MAX_RETRIES}");
        }

        if self.poll_interval == 0 {
            bail!("configuration value `controller.poll_interval` cannot be zero");
        }

        if self.log_file_name.is_empty() {
            bail!("configuration value `controller.log_file_name` cannot be empty");
        }

        Ok(())
    }

    /// The wait between queue checks.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

/// Represents function-call script configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct CallConfig {
    /// The interpreter that runs the synthesized call.
    ///
    /// Defaults to `python3`, resolved through `PATH` on the compute node.
    #[serde(default = "default_interpreter")]
    pub interpreter: PathBuf,
}

fn default_interpreter() -> PathBuf {
    DEFAULT_INTERPRETER.into()
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
        }
    }
}

impl CallConfig {
    /// Validates the function-call configuration.
    pub fn validate(&self) -> Result<()> {
        if self.interpreter.as_os_str().is_empty() {
            bail!("configuration value `call.interpreter` cannot be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.controller.max_retries, 3);
        assert_eq!(config.controller.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.scheduler.submit_command, PathBuf::from("sbatch"));
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [controller]
            max_retries = 5

            [directives]
            partition = "gpu"
            time = "01:00:00"
            "#,
        )
        .unwrap();

        assert_eq!(config.controller.max_retries, 5);
        assert_eq!(config.controller.poll_interval, 10);
        assert_eq!(
            config.directives.lines(),
            ["#SBATCH --partition=gpu", "#SBATCH --time=01:00:00"]
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(toml::from_str::<Config>("[controller]\nretries = 2\n").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = Config::default();
        config.controller.max_retries = 0;
        assert!(config.validate().is_err());

        config.controller.max_retries = MAX_RETRIES + 1;
        assert!(config.validate().is_err());

        config.controller.max_retries = MAX_RETRIES;
        config.controller.poll_interval = 0;
        assert!(config.validate().is_err());

        config.controller.poll_interval = 1;
        config.validate().unwrap();
    }
}
