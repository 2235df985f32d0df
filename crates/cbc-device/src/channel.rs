//! 消费者通道：带等待机制的缓冲队列。
//!
//! # 模块角色（Why）
//! - 每个打开设备的消费者拥有一个通道；广播路径向所有通道投递同一缓冲的独立引用，
//!   消费者按 FIFO 顺序取出、读取并释放；
//! - 队列本身是单生产者/单消费者结构，通道以互斥锁提供外部串行化，并以条件变量唤醒阻塞读者。
//!
//! # 并发契约（What）
//! - “满检查 → 递增引用 → 写入队列”在同一临界区内完成：满队列的拒绝不会触碰引用计数，
//!   也不存在“刚腾出空位却被判满”的窗口；
//! - [`Channel::queue_full`]/[`Channel::queue_empty`] 读取锁外发布的深度快照，仅作提示；
//! - 关闭后的通道拒绝入队，并唤醒所有等待中的读者；已入队的缓冲仍可读出。
//!
//! # 生命周期（How）
//! - 通道被丢弃时队列随之丢弃，其中每个句柄各释放一次引用；显式 [`Channel::drain`] 效果相同。

use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
    time::{Duration, Instant},
};

use cbc_buffer::{BufferHandle, BufferQueue, QUEUE_CAPACITY};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::{DequeueError, EnqueueError, ReadError};

/// 通道标识。由设备上下文分配，在同一设备内唯一。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    /// 以原始编号构造标识。
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 原始编号。
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// 读取模式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// 队列为空时立即返回 [`DequeueError::WouldBlock`]。
    NonBlocking,
    /// 阻塞直到有数据或通道关闭。
    Blocking,
    /// 最多等待给定时长，到期返回 [`DequeueError::TimedOut`]。
    Timeout(Duration),
}

/// 轮询就绪状态。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    /// 队列非空，读取不会阻塞。
    pub readable: bool,
    /// 队列未满，投递不会被拒绝。
    pub writable: bool,
}

/// 消费者通道。
pub struct Channel<const N: usize = QUEUE_CAPACITY> {
    id: ChannelId,
    label: String,
    queue: Mutex<BufferQueue<N>>,
    readable: Condvar,
    depth: AtomicU32,
    closed: AtomicBool,
}

impl<const N: usize> Channel<N> {
    /// 创建空的、未关闭的通道。
    pub fn new(id: ChannelId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            queue: Mutex::new(BufferQueue::new()),
            readable: Condvar::new(),
            depth: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// 通道标识。
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// 创建时给定的可读名称。
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 为借用的缓冲派生一个新引用并入队。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：成功时该缓冲的引用计数加一，新引用归通道所有；
    ///   队列满或通道关闭时返回错误，引用计数不变；
    /// - **执行 (How)**：关闭检查、满检查、递增与写入在同一把锁内完成，之后唤醒一个等待中的读者。
    pub fn enqueue(&self, buf: &BufferHandle) -> Result<(), EnqueueError> {
        let mut queue = self.queue.lock();
        self.check_accepting(&queue, buf)?;
        self.push_locked(&mut queue, buf.share())?;
        drop(queue);
        self.readable.notify_one();
        Ok(())
    }

    /// 转移一个已计数的引用入队。
    ///
    /// 与 [`enqueue`](Self::enqueue) 不同，这里不递增引用计数；被拒绝时该句柄随即释放。
    pub fn enqueue_owned(&self, buf: BufferHandle) -> Result<(), EnqueueError> {
        let mut queue = self.queue.lock();
        self.check_accepting(&queue, &buf)?;
        self.push_locked(&mut queue, buf)?;
        drop(queue);
        self.readable.notify_one();
        Ok(())
    }

    /// 非阻塞出队；队列为空时返回 `None`。
    pub fn try_dequeue(&self) -> Option<BufferHandle> {
        let mut queue = self.queue.lock();
        let buf = queue.dequeue();
        self.publish_depth(&queue);
        buf
    }

    /// 按读取模式出队，返回的句柄持有该缓冲的一个引用。
    ///
    /// - 队列非空时立即返回，与通道是否关闭无关；
    /// - 队列为空且通道已关闭时返回 [`DequeueError::Closed`]；
    /// - 所有错误路径都不修改队列。
    pub fn dequeue(&self, mode: ReadMode) -> Result<BufferHandle, DequeueError> {
        let deadline = match mode {
            ReadMode::Timeout(timeout) => Instant::now().checked_add(timeout),
            _ => None,
        };

        let mut queue = self.queue.lock();
        loop {
            if let Some(buf) = queue.dequeue() {
                self.publish_depth(&queue);
                return Ok(buf);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(DequeueError::Closed);
            }
            match (mode, deadline) {
                (ReadMode::NonBlocking, _) => {
                    trace!(target: "cbc::channel", channel = %self.id, "read would block");
                    return Err(DequeueError::WouldBlock);
                }
                (ReadMode::Timeout(_), Some(deadline)) => {
                    if Instant::now() >= deadline {
                        trace!(target: "cbc::channel", channel = %self.id, "read timed out");
                        return Err(DequeueError::TimedOut);
                    }
                    self.readable.wait_until(&mut queue, deadline);
                }
                // 超出 `Instant` 表示范围的时限等同于无限等待。
                (ReadMode::Blocking, _) | (ReadMode::Timeout(_), None) => {
                    self.readable.wait(&mut queue);
                }
            }
        }
    }

    /// 出队一个缓冲，把负载复制到 `dst` 并释放该缓冲，返回复制的字节数。
    ///
    /// `dst` 容纳不下负载时返回 [`ReadError::BufferTooSmall`]；此时缓冲已被取出并释放。
    pub fn read_into(&self, dst: &mut [u8], mode: ReadMode) -> Result<usize, ReadError> {
        let buf = self.dequeue(mode)?;
        let view = buf.view();
        let payload = view.payload();
        if payload.len() > dst.len() {
            debug!(
                target: "cbc::channel",
                channel = %self.id,
                needed = payload.len(),
                available = dst.len(),
                "read buffer too small, dropping frame"
            );
            return Err(ReadError::BufferTooSmall {
                needed: payload.len(),
                available: dst.len(),
            });
        }
        dst[..payload.len()].copy_from_slice(payload);
        Ok(payload.len())
    }

    /// 当前就绪状态（基于深度快照）。
    pub fn readiness(&self) -> Readiness {
        Readiness {
            readable: !self.queue_empty(),
            writable: !self.queue_full() && !self.is_closed(),
        }
    }

    /// 队列是否已满（锁外快照）。
    pub fn queue_full(&self) -> bool {
        self.len() == BufferQueue::<N>::CAPACITY
    }

    /// 队列是否为空（锁外快照）。
    pub fn queue_empty(&self) -> bool {
        self.len() == 0
    }

    /// 队列长度（锁外快照）。
    pub fn len(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }

    /// 同 [`queue_empty`](Self::queue_empty)。
    pub fn is_empty(&self) -> bool {
        self.queue_empty()
    }

    /// 队列容量。
    pub fn capacity(&self) -> u32 {
        BufferQueue::<N>::CAPACITY
    }

    /// 关闭通道：拒绝后续投递，并唤醒全部等待中的读者。
    pub fn close(&self) {
        let queue = self.queue.lock();
        let was_closed = self.closed.swap(true, Ordering::AcqRel);
        drop(queue);
        if !was_closed {
            debug!(target: "cbc::channel", channel = %self.id, "channel closed");
        }
        self.readable.notify_all();
    }

    /// 是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 释放队列中的全部缓冲，返回释放的数量。
    pub fn drain(&self) -> usize {
        let mut queue = self.queue.lock();
        let drained = queue.drain();
        self.publish_depth(&queue);
        drop(queue);
        if drained > 0 {
            debug!(target: "cbc::channel", channel = %self.id, drained, "channel drained");
        }
        drained
    }

    fn check_accepting(
        &self,
        queue: &BufferQueue<N>,
        buf: &BufferHandle,
    ) -> Result<(), EnqueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EnqueueError::Closed);
        }
        if queue.is_full() {
            debug!(
                target: "cbc::channel",
                channel = %self.id,
                buffer = %buf.id(),
                "channel queue full"
            );
            return Err(EnqueueError::Full { channel: self.id });
        }
        Ok(())
    }

    fn push_locked(
        &self,
        queue: &mut BufferQueue<N>,
        buf: BufferHandle,
    ) -> Result<(), EnqueueError> {
        queue
            .enqueue(buf)
            .map_err(|_| EnqueueError::Full { channel: self.id })?;
        self.publish_depth(queue);
        Ok(())
    }

    fn publish_depth(&self, queue: &BufferQueue<N>) {
        self.depth.store(queue.len(), Ordering::Release);
    }
}

impl<const N: usize> fmt::Debug for Channel<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
