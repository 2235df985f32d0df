#![deny(unsafe_code)]

//! `cbc-buffer` 提供载板通信（CBC）子系统的固定容量缓冲池与环形队列。
//!
//! # 模块定位（Why）
//! - 传输层从池中租借缓冲、填充帧数据后广播给多个消费者通道；
//!   同一缓冲可能同时位于多个队列中，因此以引用计数判定何时真正归还。
//! - 池的槽位在创建时一次性分配，之后只流转“索引 + 引用计数单位”，
//!   从不移动或重新分配缓冲本身。
//!
//! # 设计概要（How）
//! - [`refcount`]：单一原子字的引用计数，负责认领、防下溢与归零前擦除；
//! - [`pool`]：[`BufferPool`] 持有槽位数组，以池级锁串行化扫描认领与忙碌检查；
//! - [`handle`]：[`BufferHandle`] 即一个引用计数单位，`Drop` 时恰好释放一次；
//!   [`BufferView`]/[`BufferWriter`] 是借用自句柄的读写视图；
//! - [`queue`]：[`BufferQueue`] 以单调递增的读写游标实现容量为 2 的幂的环形队列；
//! - [`config`]：编译期常量与运行期池规模配置。

pub mod config;
pub mod error;
pub mod handle;
pub mod pool;
pub mod queue;
pub mod refcount;

pub use config::{BUFFER_SIZE, DEFAULT_NUM_BLOCKS, PoolConfig, QUEUE_CAPACITY, SCRUB_PATTERN};
pub use error::{BusyPool, BusySlot, ConfigError, PoolError};
pub use handle::{BufferHandle, BufferId, BufferView, BufferWriter, RawBuffer};
pub use pool::{BufferPool, PoolStats};
pub use queue::{BufferQueue, QueueFull};
pub use refcount::{RefCount, RefCountError, Release};
