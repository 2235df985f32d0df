//! 缓冲句柄的有界环形队列。
//!
//! # 设计概要（How）
//! - `write`/`read` 为单调递增、按 `u32` 回绕的游标，不另设计数字段：
//!   `len = write - read`（回绕减法），满 ⇔ `len == N`，空 ⇔ `write == read`；
//! - 槽位下标取 `cursor & (N - 1)`，因此 `N` 必须是 2 的幂，在 [`BufferQueue::new`] 中以编译期断言保证；
//! - 队列只持有句柄（引用计数单位），不拥有缓冲存储；丢弃队列即释放其中所有引用。
//!
//! # 并发约束（What）
//! - 单生产者/单消费者设计，`&mut self` 接口本身不做同步；
//!   多线程共享时由外层（消费者通道的互斥锁）串行化。

use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use crate::{config::QUEUE_CAPACITY, handle::BufferHandle};

/// 入队被拒绝：队列已满。携带被拒绝的句柄，调用方决定丢弃、重试或向上游施加背压。
#[derive(Debug, Error)]
#[error("buffer queue is full")]
pub struct QueueFull(BufferHandle);

impl QueueFull {
    /// 取回被拒绝的句柄。
    pub fn into_inner(self) -> BufferHandle {
        self.0
    }
}

/// 容量为 `N` 的缓冲句柄环形队列。
pub struct BufferQueue<const N: usize = QUEUE_CAPACITY> {
    ring: [Option<BufferHandle>; N],
    write: u32,
    read: u32,
}

impl<const N: usize> BufferQueue<N> {
    /// 容量；实例化时在编译期校验为 2 的幂，且不超过 `2^31` 以保证回绕减法无歧义。
    pub const CAPACITY: u32 = {
        assert!(N.is_power_of_two(), "queue capacity must be a power of two");
        assert!(N <= 1 << 31, "queue capacity must not exceed 2^31");
        N as u32
    };

    const MASK: u32 = Self::CAPACITY - 1;

    /// 创建空队列。
    pub fn new() -> Self {
        let _ = Self::CAPACITY;
        Self {
            ring: std::array::from_fn(|_| None),
            write: 0,
            read: 0,
        }
    }

    /// 重置为空队列：游标归零，清空全部槽位（其中的句柄随之释放）。
    pub fn init(&mut self) {
        for slot in self.ring.iter_mut() {
            slot.take();
        }
        self.write = 0;
        self.read = 0;
    }

    /// 入队；队列已满时原样退回句柄。
    pub fn enqueue(&mut self, buf: BufferHandle) -> Result<(), QueueFull> {
        if self.is_full() {
            debug!(
                target: "cbc::queue",
                capacity = Self::CAPACITY,
                id = %buf.id(),
                "queue full, rejecting buffer"
            );
            return Err(QueueFull(buf));
        }
        let index = self.slot_index(self.write);
        let slot = &mut self.ring[index];
        assert!(
            slot.is_none(),
            "ring slot {index} occupied at write cursor {}",
            self.write
        );
        *slot = Some(buf);
        self.write = self.write.wrapping_add(1);
        Ok(())
    }

    /// 出队；队列为空时返回 `None`。取出后清空槽位，避免残留引用。
    pub fn dequeue(&mut self) -> Option<BufferHandle> {
        if self.is_empty() {
            trace!(target: "cbc::queue", "dequeue on empty queue");
            return None;
        }
        let index = self.slot_index(self.read);
        let buf = match self.ring[index].take() {
            Some(buf) => buf,
            None => unreachable!("ring slot {index} vacant at read cursor {}", self.read),
        };
        self.read = self.read.wrapping_add(1);
        Some(buf)
    }

    /// 出队并丢弃全部句柄，返回释放的数量。
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.dequeue().is_some() {
            drained += 1;
        }
        drained
    }

    /// 是否已满。
    pub fn is_full(&self) -> bool {
        self.len() == Self::CAPACITY
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// 当前元素数量。
    pub fn len(&self) -> u32 {
        self.write.wrapping_sub(self.read)
    }

    /// 容量。
    pub fn capacity(&self) -> u32 {
        Self::CAPACITY
    }

    fn slot_index(&self, cursor: u32) -> usize {
        (cursor & Self::MASK) as usize
    }

    #[cfg(test)]
    fn with_cursors(start: u32) -> Self {
        let mut queue = Self::new();
        queue.write = start;
        queue.read = start;
        queue
    }
}

impl<const N: usize> Default for BufferQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for BufferQueue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferQueue")
            .field("capacity", &Self::CAPACITY)
            .field("len", &self.len())
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}
