//! 设备级配置：缓冲池规模与消费者通道上限。
//!
//! ```toml
//! max_channels = 6
//!
//! [pool]
//! num_blocks = 64
//! ```

use cbc_buffer::{ConfigError, PoolConfig};
use serde::Deserialize;

/// 未显式配置时允许同时挂载的消费者通道数。
pub const DEFAULT_MAX_CHANNELS: usize = 6;

/// 设备上下文配置。
///
/// # 教案式说明
/// - **意图 (Why)**：部署参数随载板型号变化，以 TOML 文本注入而非重新编译；
/// - **契约 (What)**：缺省字段回落到默认值，未知字段视为错误；
///   [`from_toml_str`](Self::from_toml_str) 返回前已完成 [`validate`](Self::validate)；
/// - **风险 (Trade-offs)**：队列容量是编译期常量，无法在此配置。
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// 缓冲池配置。
    pub pool: PoolConfig,
    /// 同时挂载的消费者通道上限。
    pub max_channels: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            max_channels: DEFAULT_MAX_CHANNELS,
        }
    }
}

impl DeviceConfig {
    /// 解析并校验 TOML 配置文本。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置取值。
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        if self.max_channels == 0 {
            return Err(ConfigError::Invalid {
                field: "max_channels",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = DeviceConfig::from_toml_str("").expect("空文档应使用默认值");
        assert_eq!(config, DeviceConfig::default());
        assert_eq!(config.max_channels, DEFAULT_MAX_CHANNELS);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = DeviceConfig::from_toml_str("max_channel = 3").expect_err("拼写错误必须报错");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_channels_is_invalid() {
        assert_eq!(
            DeviceConfig::from_toml_str("max_channels = 0"),
            Err(ConfigError::Invalid {
                field: "max_channels",
                reason: "must be greater than zero",
            })
        );
    }
}
