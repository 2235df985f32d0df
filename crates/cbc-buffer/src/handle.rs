//! 缓冲的所有权类型。
//!
//! - [`BufferHandle`]：一个引用计数单位，丢弃时释放；
//! - [`BufferView`] / [`BufferWriter`]：借用自句柄的读写视图，不能超出句柄的生命周期；
//! - [`RawBuffer`]：离开句柄后在原始接口上流转的单位，不可复制，只能被释放或重新接管一次。

use std::{fmt, sync::Arc};

use spin::{RwLockReadGuard, RwLockWriteGuard};

use crate::{
    config::BUFFER_SIZE,
    error::PoolError,
    pool::{Frame, PoolShared},
};

/// 池内槽位索引。
///
/// # 设计初衷（Why）
/// - 外部只引用“索引”，从不持有缓冲本身；独立的新类型避免与长度、游标等普通整数混用；
/// - 索引的合法性只能由所属池校验，见 [`BufferPool::refcount`](crate::BufferPool::refcount)。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(u32);

impl BufferId {
    /// 以原始槽位下标构造索引。
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// 槽位下标。
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// `BufferHandle` 是一个引用计数单位的所有权凭证。
///
/// # 设计动机（Why）
/// - 手工配对“递增/递减”是重复释放与泄漏的根源；将一个计数单位绑定到一个不可复制的值上，
///   由 `Drop` 恰好释放一次，编译器即可保证配对；
/// - 放入队列是一次移动，而不是“复制索引 + 手工递增”。
///
/// # 架构关系（How）
/// - `shared` 使池的槽位数组至少与句柄同寿，句柄永远不会悬垂；
/// - `armed` 为 `false` 时表示计数单位已经通过 [`into_raw`](Self::into_raw) 转交给 [`RawBuffer`]，
///   `Drop` 不再释放。
///
/// # 契约说明（What）
/// - [`share`](Self::share) 派生新的计数单位，是 [`BufferPool::increment_ref`](crate::BufferPool::increment_ref) 的所有权版本；
/// - [`view`](Self::view) 提供不能超出句柄生命周期的只读视图；
/// - [`try_write`](Self::try_write) 仅在唯一持有时授予写视图，避免读者观察到半写入的帧。
pub struct BufferHandle {
    shared: Arc<PoolShared>,
    id: BufferId,
    armed: bool,
}

impl BufferHandle {
    /// 接管一个已经计入引用计数的单位。调用方需保证计数中确有这一单位。
    pub(crate) fn adopt(shared: Arc<PoolShared>, id: BufferId) -> Self {
        Self {
            shared,
            id,
            armed: true,
        }
    }

    /// 槽位索引。
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// 当前引用计数快照。
    pub fn refcount(&self) -> u32 {
        self.frame_slot().refcount.get()
    }

    /// 派生一个新的引用计数单位。
    ///
    /// # Panics
    /// 计数超过 `u32::MAX` 时 panic；持有者数量不可能合法地达到该值。
    pub fn share(&self) -> BufferHandle {
        match self.shared.increment(self.id) {
            Ok(_) => BufferHandle::adopt(Arc::clone(&self.shared), self.id),
            Err(err) => panic!("cannot share buffer {}: {err}", self.id),
        }
    }

    /// 借出只读视图。
    pub fn view(&self) -> BufferView<'_> {
        BufferView {
            frame: self.frame_slot().frame.read(),
        }
    }

    /// 在唯一持有时借出写视图。
    pub fn try_write(&mut self) -> Result<BufferWriter<'_>, PoolError> {
        let slot = self.frame_slot();
        let refcount = slot.refcount.get();
        if refcount != 1 {
            return Err(PoolError::Shared {
                id: self.id,
                refcount,
            });
        }
        Ok(BufferWriter {
            frame: slot.frame.write(),
        })
    }

    /// 放弃句柄，把计数单位转为 [`RawBuffer`]。
    ///
    /// 返回的单位必须最终交给 [`BufferPool::release`](crate::BufferPool::release)
    /// 或 [`BufferPool::from_raw`](crate::BufferPool::from_raw)，否则该槽位永久忙碌。
    pub fn into_raw(mut self) -> RawBuffer {
        self.armed = false;
        RawBuffer::new(self.shared.serial, self.id)
    }

    fn frame_slot(&self) -> &crate::pool::Slot {
        self.shared.slot_at(self.id)
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        if self.armed {
            // 错误已在池内记录；句柄持有的单位理论上必然存在。
            let _ = self.shared.release(self.id);
        }
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("id", &self.id)
            .field("refcount", &self.refcount())
            .finish()
    }
}

/// 原始接口上的一个引用计数单位。
///
/// # 教案式说明
/// - **意图 (Why)**：若原始接口以可复制的索引表示持有关系，安全代码就能释放别人持有的单位，
///   或把同一单位接管两次，槽位会在句柄存活时回到空闲态；
/// - **契约 (What)**：不实现 `Clone`/`Copy`；[`BufferPool::release`](crate::BufferPool::release)
///   与 [`BufferPool::from_raw`](crate::BufferPool::from_raw) 消耗它，
///   [`BufferPool::increment_ref`](crate::BufferPool::increment_ref) 签发新的单位；
///   单位记录签发它的池，其他池拒绝接受；
/// - **风险 (Trade-offs)**：`RawBuffer` 没有 `Drop`，直接丢弃会让该单位永久占用槽位。
#[must_use = "dropping a RawBuffer leaks its reference; release it or adopt it with `from_raw`"]
#[derive(Debug)]
pub struct RawBuffer {
    pool: u64,
    id: BufferId,
}

impl RawBuffer {
    pub(crate) fn new(pool: u64, id: BufferId) -> Self {
        Self { pool, id }
    }

    /// 该单位所属的槽位索引。
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub(crate) fn pool(&self) -> u64 {
        self.pool
    }
}

/// 借用自 [`BufferHandle`] 的只读视图。
pub struct BufferView<'a> {
    frame: RwLockReadGuard<'a, Frame>,
}

impl BufferView<'_> {
    /// 整个数据区。
    pub fn data(&self) -> &[u8; BUFFER_SIZE] {
        &self.frame.data
    }

    /// 负载字节：数据区前 `payload_length` 个字节。
    pub fn payload(&self) -> &[u8] {
        &self.frame.data[..clamp_len(self.frame.payload_length)]
    }

    /// 帧字节：数据区前 `frame_length` 个字节。
    pub fn frame(&self) -> &[u8] {
        &self.frame.data[..clamp_len(self.frame.frame_length)]
    }

    /// 负载长度。
    pub fn payload_length(&self) -> u32 {
        self.frame.payload_length
    }

    /// 帧长度。
    pub fn frame_length(&self) -> u32 {
        self.frame.frame_length
    }
}

/// 唯一持有者的写视图。
pub struct BufferWriter<'a> {
    frame: RwLockWriteGuard<'a, Frame>,
}

impl BufferWriter<'_> {
    /// 可写数据区。
    pub fn data_mut(&mut self) -> &mut [u8; BUFFER_SIZE] {
        &mut self.frame.data
    }

    /// 设置负载长度。超出 [`BUFFER_SIZE`] 的部分在读取时被截断。
    pub fn set_payload_length(&mut self, len: u32) {
        self.frame.payload_length = len;
    }

    /// 设置帧长度。
    pub fn set_frame_length(&mut self, len: u32) {
        self.frame.frame_length = len;
    }

    /// 将负载写到数据区起始处，并把负载长度与帧长度都设为其字节数。
    pub fn fill(&mut self, payload: &[u8]) -> Result<(), PoolError> {
        if payload.len() > BUFFER_SIZE {
            return Err(PoolError::PayloadTooLarge {
                len: payload.len(),
                max: BUFFER_SIZE,
            });
        }
        self.frame.data[..payload.len()].copy_from_slice(payload);
        // BUFFER_SIZE 远小于 u32::MAX。
        let len = payload.len() as u32;
        self.frame.payload_length = len;
        self.frame.frame_length = len;
        Ok(())
    }
}

fn clamp_len(len: u32) -> usize {
    (len as usize).min(BUFFER_SIZE)
}
