use std::fmt::Debug;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::api::configuration_dto::ConfigurationDto;
use crate::domain::configuration::configuration::Configuration;
use crate::error::Result;
use crate::loader::parser::parse_json_file;

/// Source of the current configuration of the datacenter.
#[async_trait]
pub trait ConfigurationMonitor: Debug + Send + Sync {
    async fn current(&self) -> Result<Configuration>;
}

/// Reads a `ConfigurationDto` JSON snapshot on every call.
#[derive(Debug, Clone)]
pub struct FileConfigurationMonitor {
    path: PathBuf,
}

impl FileConfigurationMonitor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileConfigurationMonitor { path: path.into() }
    }
}

#[async_trait]
impl ConfigurationMonitor for FileConfigurationMonitor {
    async fn current(&self) -> Result<Configuration> {
        let dto: ConfigurationDto = parse_json_file(&self.path)?;
        let configuration = Configuration::try_from(dto)?;
        configuration.check_invariants()?;
        Ok(configuration)
    }
}
