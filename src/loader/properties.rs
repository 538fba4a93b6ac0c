use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Flat `key = value` property set, as used by the control loop and the
/// duration evaluators.
///
/// Keys end at the first `=` or `:`. Lines starting with `#` or `!` are
/// comments, and a line ending with an unescaped `\` continues on the next
/// one. Unicode and other escape sequences are not interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable { path: path.display().to_string(), source })?;
        content.parse()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn get_required(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingProperty(key.to_string()))
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        self.get(key).map(|value| parse_value(key, value, "expected an integer")).transpose()
    }

    pub fn get_required_i64(&self, key: &str) -> Result<i64, ConfigError> {
        parse_value(key, self.get_required(key)?, "expected an integer")
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.get(key).map(|value| parse_value(key, value, "expected 'true' or 'false'")).transpose()
    }

    /// Positive number of seconds.
    pub fn get_duration_secs(&self, key: &str) -> Result<Duration, ConfigError> {
        let value = self.get_required(key)?;
        match value.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::InvalidProperty { key: key.to_string(), value: value.to_string(), reason: "expected a positive number of seconds".to_string() }),
        }
    }

    /// Comma separated list, empty items dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key).map(|value| value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()).unwrap_or_default()
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str, reason: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidProperty { key: key.to_string(), value: value.to_string(), reason: reason.to_string() })
}

impl FromStr for Properties {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let mut properties = Properties::new();
        let mut pending = String::new();

        for raw in content.lines() {
            let line = if pending.is_empty() { raw.trim() } else { raw.trim_start() };
            if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
                continue;
            }

            if let Some(head) = continued(line) {
                pending.push_str(head);
                continue;
            }
            pending.push_str(line);
            let logical = std::mem::take(&mut pending);
            properties.parse_line(logical.trim())?;
        }

        if !pending.is_empty() {
            properties.parse_line(pending.trim())?;
        }
        Ok(properties)
    }
}

impl Properties {
    fn parse_line(&mut self, line: &str) -> Result<(), ConfigError> {
        let Some(split) = line.find(['=', ':']) else {
            return Err(ConfigError::InvalidProperty { key: line.to_string(), value: String::new(), reason: "expected 'key = value'".to_string() });
        };
        self.set(line[..split].trim(), line[split + 1..].trim());
        Ok(())
    }
}

/// The line without its trailing `\` when it continues on the next one.
fn continued(line: &str) -> Option<&str> {
    let backslashes = line.len() - line.trim_end_matches('\\').len();
    (backslashes % 2 == 1).then(|| &line[..line.len() - 1])
}
