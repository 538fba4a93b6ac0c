use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::api::configuration_dto::ConfigurationDto;
use crate::domain::configuration::configuration::Configuration;
use crate::domain::plan::action::Action;
use crate::error::{ConfigError, ExecutionError};
use crate::loader::parser::write_json_file;

/// Applies actions on the infrastructure.
#[async_trait]
pub trait ActionDriver: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once before a plan is executed, with its source configuration.
    async fn prepare(&self, _source: &Configuration) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn execute(&self, action: &Action) -> Result<(), ExecutionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverType {
    Logging,
    Snapshot,
}

impl FromStr for DriverType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logging" => Ok(DriverType::Logging),
            "snapshot" => Ok(DriverType::Snapshot),
            _ => Err(ConfigError::UnknownDriverType(s.to_string())),
        }
    }
}

impl DriverType {
    // Factory method to create a concrete driver
    pub fn get_instance(&self, snapshot_path: Option<&Path>) -> Result<Arc<dyn ActionDriver>, ConfigError> {
        match self {
            DriverType::Logging => Ok(Arc::new(LoggingDriver)),
            DriverType::Snapshot => {
                let path = snapshot_path.ok_or_else(|| ConfigError::MissingProperty("snapshotPath".to_string()))?;
                Ok(Arc::new(SnapshotDriver::new(path)))
            }
        }
    }
}

/// Only reports what it would do.
#[derive(Debug, Default)]
pub struct LoggingDriver;

#[async_trait]
impl ActionDriver for LoggingDriver {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn execute(&self, action: &Action) -> Result<(), ExecutionError> {
        log::info!("Executing {}", action);
        Ok(())
    }
}

/// Replays actions on an in-memory configuration and writes it as a JSON
/// snapshot after every action. Pointing the file monitor at the same file
/// closes the loop without any hypervisor.
#[derive(Debug)]
pub struct SnapshotDriver {
    path: PathBuf,
    configuration: Mutex<Configuration>,
}

impl SnapshotDriver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotDriver { path: path.into(), configuration: Mutex::new(Configuration::new()) }
    }

    pub fn configuration(&self) -> Configuration {
        self.configuration.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn write(&self, configuration: &Configuration, action: &str) -> Result<(), ExecutionError> {
        write_json_file(&self.path, &ConfigurationDto::from(configuration))
            .map_err(|e| ExecutionError::DriverFailure { action: action.to_string(), reason: e.to_string() })
    }
}

#[async_trait]
impl ActionDriver for SnapshotDriver {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    async fn prepare(&self, source: &Configuration) -> Result<(), ExecutionError> {
        let mut configuration = self.configuration.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *configuration = source.clone();
        Ok(())
    }

    async fn execute(&self, action: &Action) -> Result<(), ExecutionError> {
        let mut configuration = self.configuration.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        action.apply(&mut configuration).map_err(|e| ExecutionError::DriverFailure { action: action.to_string(), reason: e.to_string() })?;
        self.write(&configuration, &action.to_string())?;
        log::debug!("Snapshot updated after {}", action);
        Ok(())
    }
}
