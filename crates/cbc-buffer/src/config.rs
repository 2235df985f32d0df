//! 缓冲池的编译期常量与运行期规模配置。
//!
//! # 契约说明（What）
//! - [`BUFFER_SIZE`] 与 [`QUEUE_CAPACITY`] 为编译期常量，部署时通过重新编译调整；
//! - 池的槽位数量 `num_blocks` 属于部署参数，由 [`PoolConfig`] 在运行期提供；
//! - 队列容量必须是 2 的幂，`BufferQueue` 在实例化时以编译期断言校验。

use serde::Deserialize;

use crate::{
    error::{ConfigError, PoolError},
    pool::BufferPool,
};

/// 单个缓冲的固定字节容量（包含帧头与负载）。
pub const BUFFER_SIZE: usize = 256;

/// 每个消费者通道的默认队列容量，必须为 2 的幂。
pub const QUEUE_CAPACITY: usize = 32;

/// 引用计数归零时覆盖缓冲数据的哨兵字节，便于在测试中识别释放后使用。
pub const SCRUB_PATTERN: u8 = 0x5A;

/// 未显式配置时池的槽位数量。
pub const DEFAULT_NUM_BLOCKS: u32 = 64;

/// 缓冲池规模配置。
///
/// # 教案式说明
/// - **意图 (Why)**：槽位数量随载板型号与通道数变化，不适合写死为常量；
/// - **契约 (What)**：`num_blocks` 必须大于 0；缺省字段回落到 [`DEFAULT_NUM_BLOCKS`]；
///   未知字段视为配置错误，避免拼写错误被静默忽略；
/// - **执行 (How)**：通常作为 `[pool]` 表嵌入上层设备配置，由 `toml` 反序列化得到。
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// 池中固定分配的缓冲数量。
    pub num_blocks: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_blocks: DEFAULT_NUM_BLOCKS,
        }
    }
}

impl PoolConfig {
    /// 校验配置取值。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_blocks == 0 {
            return Err(ConfigError::Invalid {
                field: "pool.num_blocks",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// 按配置创建缓冲池。
    pub fn build(&self) -> Result<BufferPool, PoolError> {
        BufferPool::new(self.num_blocks)
    }
}

#[cfg(all(test, not(any(loom, cbc_loom))))]
mod tests {
    use super::*;

    #[test]
    fn queue_capacity_is_power_of_two() {
        assert!(QUEUE_CAPACITY.is_power_of_two());
    }

    #[test]
    fn zero_blocks_rejected() {
        let config = PoolConfig { num_blocks: 0 };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "pool.num_blocks",
                ..
            })
        ));
    }

    #[test]
    fn default_config_builds_pool() {
        let pool = PoolConfig::default().build().expect("默认配置应能创建缓冲池");
        assert_eq!(pool.capacity(), DEFAULT_NUM_BLOCKS);
    }
}
