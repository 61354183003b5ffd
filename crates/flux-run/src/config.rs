use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// 启动和关闭阶段的默认超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid timeout: {0} must be greater than zero")]
    InvalidTimeout(&'static str),

    #[error("Timeouts set both in [group] and at top level")]
    MixedLayout,
}

/// Group 配置，构造后不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupConfig {
    /// 所有初始化函数完成的最长时间
    pub start_timeout: Duration,
    /// 所有关闭函数完成的最长时间
    pub stop_timeout: Duration,
}

impl GroupConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// 从 TOML 文本加载，支持 `[group]` 表或顶层键，两者不能同时出现
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        let settings = match file.group {
            Some(_) if file.top_level != TimeoutSettings::default() => {
                return Err(ConfigError::MixedLayout);
            }
            Some(group) => group,
            None => file.top_level,
        };
        Self::try_from(settings)
    }

    /// 输出为 `[group]` 表形式的 TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let file = ConfigFileOut {
            group: TimeoutSettings::from(*self),
        };
        Ok(toml::to_string(&file)?)
    }

    /// 从 TOML 文件加载
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            start_timeout: DEFAULT_TIMEOUT,
            stop_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// 配置文件中的超时设置（毫秒）
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub start_timeout_ms: Option<u64>,
    pub stop_timeout_ms: Option<u64>,
}

impl TryFrom<TimeoutSettings> for GroupConfig {
    type Error = ConfigError;

    fn try_from(settings: TimeoutSettings) -> Result<Self, Self::Error> {
        let mut config = GroupConfig::default();

        if let Some(ms) = settings.start_timeout_ms {
            if ms == 0 {
                return Err(ConfigError::InvalidTimeout("start_timeout_ms"));
            }
            config.start_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = settings.stop_timeout_ms {
            if ms == 0 {
                return Err(ConfigError::InvalidTimeout("stop_timeout_ms"));
            }
            config.stop_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

impl From<GroupConfig> for TimeoutSettings {
    fn from(config: GroupConfig) -> Self {
        Self {
            start_timeout_ms: Some(duration_millis(config.start_timeout)),
            stop_timeout_ms: Some(duration_millis(config.stop_timeout)),
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Serialize)]
struct ConfigFileOut {
    group: TimeoutSettings,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    group: Option<TimeoutSettings>,
    #[serde(flatten)]
    top_level: TimeoutSettings,
}
