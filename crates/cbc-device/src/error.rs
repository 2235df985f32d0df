//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义通道与设备上下文的失败语义，与 `cbc-buffer` 的 [`PoolError`] 分层衔接；
//! - 区分三类情形：正常负载现象（队列满、暂无数据）、生命周期冲突（已关闭、通道仍挂载）
//!   与调用方误用（参数超限）。
//!
//! ## 设计要求（What）
//! - 全部错误派生 `thiserror::Error`，消息为小写英文短语，便于日志聚合；
//! - 错误路径绝不修改队列内容：调用方在收到错误后观察到的状态与调用前一致。

use cbc_buffer::{ConfigError, PoolError};
use thiserror::Error;

use crate::{channel::ChannelId, device::DeviceContext};

/// 向单个通道投递缓冲失败的原因。
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum EnqueueError {
    /// 通道队列已满，缓冲未入队，引用计数保持不变。
    ///
    /// - **契约 (What)**：对借用句柄的投递不产生任何副作用；对转移句柄的投递会释放该句柄；
    /// - **风险 (Trade-offs)**：持续出现意味着消费者读取速度跟不上广播速率，帧将被丢弃。
    #[error("channel {channel} queue is full")]
    Full { channel: ChannelId },

    /// 通道已关闭，不再接受新缓冲。
    #[error("channel is closed")]
    Closed,
}

/// 从通道取出缓冲失败的原因。
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum DequeueError {
    /// 非阻塞模式下队列为空。
    #[error("no buffer available, operation would block")]
    WouldBlock,

    /// 限时等待到期仍无数据。
    #[error("timed out waiting for a buffer")]
    TimedOut,

    /// 通道已关闭且队列为空；等待中的读者被唤醒后返回该错误。
    #[error("channel closed while waiting for a buffer")]
    Closed,
}

/// `Channel::read_into` 的失败原因。
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum ReadError {
    /// 未能取得缓冲。
    #[error(transparent)]
    Dequeue(#[from] DequeueError),

    /// 目标切片不足以容纳负载。
    ///
    /// - **契约 (What)**：该缓冲已经出队并释放，不会重新入队；`needed` 为负载字节数。
    #[error("destination holds {available} bytes but payload needs {needed}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// 设备上下文的错误域。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeviceError {
    /// 已挂载通道数达到上限。
    ///
    /// - **意图 (Why)**：限制同时打开的消费者数量，避免单帧广播时引用计数与队列开销无界增长；
    /// - **契约 (What)**：`limit` 为配置的 `max_channels`，本次挂载没有发生。
    #[error("too many channels attached (limit {limit})")]
    TooManyChannels { limit: usize },

    /// 同一通道重复挂载。
    #[error("channel {id} is already attached")]
    AlreadyAttached { id: ChannelId },

    /// 发送路径无法从池中租借缓冲。
    #[error("buffer pool exhausted")]
    PoolExhausted,

    /// 负载超过单个缓冲容量。
    #[error("payload of {len} bytes exceeds buffer size of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    /// 关闭设备时仍有通道挂载。
    #[error("{count} channels still attached")]
    ChannelsAttached { count: usize },

    /// 关闭设备时缓冲池仍有被引用的缓冲。
    #[error("{busy} buffers still referenced")]
    PoolBusy { busy: usize },

    /// 缓冲池操作失败。
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// 配置无效。
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// `DeviceContext::shutdown` 被拒绝：设备原样交还，附带拒绝原因。
///
/// # 教案式说明
/// - **意图 (Why)**：关闭是破坏性操作，带着存活通道或存活缓冲销毁设备会让消费者悬空；
///   拒绝时交还所有权，调用方可在关闭会话、排空队列后重试；
/// - **契约 (What)**：`reason` 只可能是 [`DeviceError::ChannelsAttached`] 或 [`DeviceError::PoolBusy`]。
#[derive(Debug, Error)]
#[error("device shutdown refused: {reason}")]
pub struct ShutdownRefused<const N: usize> {
    /// 交还的设备。
    pub device: DeviceContext<N>,
    /// 拒绝原因。
    pub reason: DeviceError,
}

impl<const N: usize> ShutdownRefused<N> {
    /// 取回设备。
    pub fn into_device(self) -> DeviceContext<N> {
        self.device
    }
}
