//! Implementation of the configuration module.
//!
//! Configuration is layered, later sources overriding earlier ones:
//!
//! 1. the built-in defaults;
//! 2. the file given with `--config`, or `resubmit.toml` in the current
//!    directory when it exists;
//! 3. environment variables prefixed with `RESUBMIT_`, with `__` separating
//!    nested keys (for example `RESUBMIT_CONTROLLER__MAX_RETRIES=5`).

use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use resubmit_engine::Config as EngineConfig;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

/// The name of the configuration file looked for in the current directory.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "resubmit.toml";

/// The prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "RESUBMIT";

/// The separator of nested keys in configuration environment variables.
const ENV_SEPARATOR: &str = "__";

/// Represents the configuration for the Resubmit CLI tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Common configuration options for all commands.
    #[serde(default)]
    pub common: CommonConfig,
    /// The engine configuration.
    #[serde(flatten)]
    pub engine: EngineConfig,
}

/// Represents shared configuration options for Resubmit commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct CommonConfig {
    /// Display color output when writing to a terminal.
    #[serde(default = "default_color")]
    pub color: bool,
}

/// Gets the default value for the `color` field.
fn default_color() -> bool {
    true
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            color: default_color(),
        }
    }
}

impl Config {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()
    }

    /// Loads the configuration from its layered sources.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&Self::default())
                .context("failed to serialize the default configuration")?,
        );

        builder = match path {
            Some(path) => {
                debug!(path = %path.display(), "reading configuration file");
                builder.add_source(
                    config::File::from(path)
                        .format(config::FileFormat::Toml)
                        .required(true),
                )
            }
            None => builder.add_source(
                config::File::new(DEFAULT_CONFIG_FILE_NAME, config::FileFormat::Toml)
                    .required(false),
            ),
        };

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator(ENV_SEPARATOR),
            )
            .build()
            .context("failed to load configuration")?
            .try_deserialize()
            .context("failed to parse configuration")?;

        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    /// Reads a configuration file from the specified path, without the other
    /// layers.
    pub fn read_config(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| {
            format!(
                "failed to read config file `{path}`",
                path = path.display()
            )
        })?;
        toml::from_str(&text).with_context(|| {
            format!(
                "failed to parse config file `{path}`",
                path = path.display()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(text.contains("[controller]"));
        assert!(text.contains("[scheduler]"));

        let config: Config = toml::from_str(&text).unwrap();
        assert!(config.common.color);
        assert_eq!(config.engine.controller.max_retries, 3);
        config.validate().unwrap();
    }

    #[test]
    fn loads_explicit_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        std::fs::write(
            &path,
            r#"
[common]
color = false

[controller]
max_retries = 7
poll_interval = 60

[directives]
partition = "gpu"
time = "01:00:00"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(!config.common.color);
        assert_eq!(config.engine.controller.max_retries, 7);
        assert_eq!(
            config.engine.controller.poll_interval(),
            Duration::from_secs(60)
        );
        assert_eq!(config.engine.controller.log_file_name, "%A_%a.log");
        assert_eq!(config.engine.directives.get("partition"), Some("gpu"));
        assert_eq!(config.engine.directives.get("time"), Some("01:00:00"));
        assert_eq!(
            config.engine.scheduler.submit_command,
            Path::new("sbatch")
        );
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn invalid_values_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[controller]\nmax_retries = 0\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration");
    }

    #[test]
    fn reads_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resubmit.toml");
        std::fs::write(&path, "[call]\ninterpreter = \"/opt/env/bin/python\"\n").unwrap();

        let config = Config::read_config(&path).unwrap();
        assert_eq!(
            config.engine.call.interpreter,
            Path::new("/opt/env/bin/python")
        );
        assert!(Config::read_config(&dir.path().join("nope.toml")).is_err());
    }
}
