use std::path::PathBuf;
use std::time::Duration;

use crate::domain::control_loop::control_loop_type::ControlLoopType;
use crate::domain::control_loop::driver::DriverType;
use crate::domain::utils::id::PlatformId;
use crate::error::ConfigError;
use crate::loader::properties::Properties;

/// Settings of a control loop, read from a properties file.
///
/// Every key but `impl` and `logsDir` is prefixed by the loop implementation,
/// e.g. `reactive.planTimeout`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlLoopConfig {
    pub loop_type: ControlLoopType,
    pub logs_dir: PathBuf,
    pub vjobs_path: PathBuf,
    pub configuration_path: PathBuf,

    pub assign_timeout: Duration,
    pub plan_timeout: Duration,
    /// Delay between two ticks.
    pub prediction_step: Duration,

    /// `false` computes and logs plans without executing them.
    pub reconfigure: bool,
    pub driver: DriverType,
    pub snapshot_path: Option<PathBuf>,

    pub durations: Option<PathBuf>,
    pub horizon: Option<i64>,
    pub optimize: bool,
    pub platforms: Vec<PlatformId>,
}

impl ControlLoopConfig {
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let properties = Properties::load(path)?;
        ControlLoopConfig::try_from(&properties)
    }
}

impl TryFrom<&Properties> for ControlLoopConfig {
    type Error = ConfigError;

    fn try_from(properties: &Properties) -> Result<Self, Self::Error> {
        let loop_type: ControlLoopType = properties.get_required("impl")?.parse()?;
        let key = |name: &str| format!("{}.{}", loop_type, name);

        let driver = match properties.get(&key("driver")) {
            Some(name) => name.parse()?,
            None => DriverType::Logging,
        };
        let snapshot_path = properties.get(&key("snapshotPath")).map(PathBuf::from);
        if driver == DriverType::Snapshot && snapshot_path.is_none() {
            return Err(ConfigError::MissingProperty(key("snapshotPath")));
        }

        let horizon = properties.get_i64(&key("horizon"))?;
        if let Some(h) = horizon {
            if h <= 0 {
                return Err(ConfigError::InvalidProperty { key: key("horizon"), value: h.to_string(), reason: "expected a positive horizon".to_string() });
            }
        }

        Ok(ControlLoopConfig {
            loop_type,
            logs_dir: PathBuf::from(properties.get_required("logsDir")?),
            vjobs_path: PathBuf::from(properties.get_required(&key("vjobsPath"))?),
            configuration_path: PathBuf::from(properties.get_required(&key("configurationPath"))?),
            assign_timeout: properties.get_duration_secs(&key("assignTimeout"))?,
            plan_timeout: properties.get_duration_secs(&key("planTimeout"))?,
            prediction_step: properties.get_duration_secs(&key("prediction.step"))?,
            reconfigure: properties.get_bool(&key("reconfigure"))?.unwrap_or(true),
            driver,
            snapshot_path,
            durations: properties.get(&key("durations")).map(PathBuf::from),
            horizon,
            optimize: properties.get_bool(&key("optimize"))?.unwrap_or(false),
            platforms: properties.get_list(&key("platforms")).into_iter().map(PlatformId::from).collect(),
        })
    }
}
