//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义缓冲池对外暴露的失败语义，区分“资源耗尽/忙碌”（可恢复）与“调用方误用”（缺陷）；
//! - 池耗尽本身不是错误：`get_buffer` 以 `None` 表达，不出现在本模块。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，可直接交给 `?` 传播；
//! - 误用类错误（重复释放、越界索引）只返回错误并记录日志，绝不 panic。

use thiserror::Error;

use crate::{handle::BufferId, pool::BufferPool};

/// 缓冲池操作的错误域。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PoolError {
    /// 创建池时无法分配槽位数组，或请求的槽位数量为 0 / 溢出。
    #[error("cannot allocate buffer pool with {num_blocks} blocks")]
    OutOfMemory { num_blocks: u32 },

    /// 索引不属于本池。
    #[error("buffer {id} does not belong to this pool")]
    InvalidId { id: BufferId },

    /// 对引用计数已为 0 的缓冲再次释放。
    ///
    /// - **契约 (What)**：引用计数保持为 0，不会下溢回绕；
    /// - **风险 (Trade-offs)**：出现即表示调用方存在配对缺陷，需要结合日志排查。
    #[error("buffer {id} released while already free")]
    DoubleRelease { id: BufferId },

    /// 对空闲缓冲增加引用或重新接管原始索引。
    #[error("buffer {id} is not held by any owner")]
    NotHeld { id: BufferId },

    /// 引用计数将超过 `u32::MAX`。
    #[error("reference count of buffer {id} would overflow")]
    Overflow { id: BufferId },

    /// 缓冲仍被其他持有者共享，拒绝写入。
    #[error("buffer {id} is shared by {refcount} holders and cannot be written")]
    Shared { id: BufferId, refcount: u32 },

    /// 负载超过单个缓冲的固定容量。
    #[error("payload of {len} bytes exceeds buffer size of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },
}

/// `try_free` 扫描时发现的一个忙碌槽位。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BusySlot {
    /// 槽位索引。
    pub id: BufferId,
    /// 扫描时刻的引用计数。
    pub refcount: u32,
}

/// `BufferPool::try_free` 的失败结果：池仍有未归还的缓冲。
///
/// # 教案式说明
/// - **意图 (Why)**：销毁带有存活引用的池会造成释放后使用，因此拒绝销毁并把池原样交还；
/// - **契约 (What)**：`pool` 未做任何修改，调用方可在排空消费者后再次调用 `try_free`；
///   `busy` 列出扫描时刻所有非零引用计数的槽位。
#[derive(Debug, Error)]
#[error("buffer pool busy: {} of {} buffers still referenced", .busy.len(), .pool.capacity())]
pub struct BusyPool {
    /// 交还给调用方的池。
    pub pool: BufferPool,
    /// 扫描时仍被引用的槽位。
    pub busy: Vec<BusySlot>,
}

impl BusyPool {
    /// 取回池，丢弃诊断信息。
    pub fn into_pool(self) -> BufferPool {
        self.pool
    }
}

/// 配置解析与校验错误。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// 配置文本无法解析。
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// 字段取值不合法。
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
