use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use spin::{Mutex, RwLock};
use tracing::{debug, error, trace, warn};

use crate::{
    config::{BUFFER_SIZE, SCRUB_PATTERN},
    error::{BusyPool, BusySlot, PoolError},
    handle::{BufferHandle, BufferId, RawBuffer},
    refcount::{RefCount, RefCountError, Release},
};

// 每个池的序号，用于拒绝其他池签发的 `RawBuffer`。
static NEXT_POOL_SERIAL: AtomicU64 = AtomicU64::new(1);

/// `BufferPool` 是固定槽位数组上的引用计数缓冲池。
///
/// # 模块角色（Why）
/// - 传输层接收一帧时从池中取出一个缓冲，填充后广播给所有消费者通道；
///   同一缓冲可能同时排在多个通道队列里，只有全部持有者释放后才能再次被租借；
/// - 槽位在创建时一次性分配，之后不移动、不重新分配，外部只引用 [`BufferId`]。
///
/// # 核心机制（How）
/// - 池级 `spin::Mutex` 串行化 `get_buffer` 的线性扫描与 `try_free`/`busy_slots` 的忙碌检查，
///   避免两个扫描者同时认领同一空闲槽位；
/// - 每个槽位的引用计数是单一原子字，`increment_ref`/`release` 不需要池级锁，
///   生产者与消费者因此可以并行；
/// - 引用计数归零前用 [`SCRUB_PATTERN`] 覆盖数据区，旧数据不会泄露给下一个租借者。
///
/// # 契约说明（What）
/// - **耗尽**：`get_buffer` 返回 `None` 属于正常负载现象，不修改任何槽位；
/// - **销毁**：`try_free` 只在所有引用计数为 0 时释放存储，否则原样交还池；
/// - **原始接口**：引用单位以不可复制的 [`RawBuffer`] 流转，释放与接管都会消耗它，
///   因此一个单位不可能被释放两次，也不可能被一个存活句柄之外的调用方提前释放；
/// - **误用**：计数层面的重复释放仍返回 [`PoolError::DoubleRelease`] 并记录日志，计数不会下溢。
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// 创建拥有 `num_blocks` 个缓冲的池，所有引用计数为 0。
    ///
    /// 分配失败（或 `num_blocks == 0`）时返回 [`PoolError::OutOfMemory`]，不会留下半初始化的池。
    pub fn new(num_blocks: u32) -> Result<Self, PoolError> {
        if num_blocks == 0 {
            return Err(PoolError::OutOfMemory { num_blocks });
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(num_blocks as usize)
            .map_err(|_| PoolError::OutOfMemory { num_blocks })?;
        slots.extend((0..num_blocks).map(|_| Slot::new()));

        debug!(
            target: "cbc::pool",
            num_blocks,
            buffer_size = BUFFER_SIZE,
            "buffer pool created"
        );
        Ok(Self {
            shared: Arc::new(PoolShared {
                serial: NEXT_POOL_SERIAL.fetch_add(1, Ordering::Relaxed),
                slots: slots.into_boxed_slice(),
                scan_lock: Mutex::new(()),
                metrics: PoolMetrics::default(),
            }),
        })
    }

    /// 槽位总数。
    pub fn capacity(&self) -> u32 {
        // 构造时由 u32 决定长度。
        self.shared.slots.len() as u32
    }

    /// 租借第一个空闲缓冲。
    ///
    /// 在池级锁内线性扫描，认领第一个引用计数为 0 的槽位（计数置 1），并把负载长度与帧长度清零。
    /// 全部忙碌时返回 `None`。
    pub fn get_buffer(&self) -> Option<BufferHandle> {
        let _scan = self.shared.scan_lock.lock();
        for (index, slot) in self.shared.slots.iter().enumerate() {
            if slot.refcount.try_claim() {
                slot.reset_lengths();
                self.shared
                    .metrics
                    .total_acquired
                    .fetch_add(1, Ordering::Relaxed);
                let id = BufferId::new(index as u32);
                trace!(target: "cbc::pool", %id, "buffer acquired");
                return Some(BufferHandle::adopt(Arc::clone(&self.shared), id));
            }
        }
        self.shared
            .metrics
            .failed_acquisitions
            .fetch_add(1, Ordering::Relaxed);
        trace!(target: "cbc::pool", capacity = self.capacity(), "buffer pool exhausted");
        None
    }

    /// 以已持有的单位为凭证，为同一缓冲签发一个新的引用单位。
    ///
    /// 凭证来自其他池时返回 [`PoolError::InvalidId`]，计数不变。
    pub fn increment_ref(&self, raw: &RawBuffer) -> Result<RawBuffer, PoolError> {
        let id = self.owned_id(raw)?;
        self.shared.increment(id)?;
        Ok(RawBuffer::new(self.shared.serial, id))
    }

    /// 消耗一个引用单位并返回剩余计数。
    ///
    /// 计数归零时数据区被擦除，槽位重新可租借。凭证来自其他池时返回 [`PoolError::InvalidId`]，
    /// 该单位在其所属池中保持占用（泄漏而非破坏）。
    pub fn release(&self, raw: RawBuffer) -> Result<u32, PoolError> {
        let id = self.owned_id(&raw)?;
        self.shared.release(id)
    }

    /// 把一个引用单位重新包装为句柄，之后由句柄负责释放。
    ///
    /// 凭证被消耗，同一单位因此只能被接管一次。
    pub fn from_raw(&self, raw: RawBuffer) -> Result<BufferHandle, PoolError> {
        let id = self.owned_id(&raw)?;
        let slot = self.shared.slot(id)?;
        if slot.refcount.is_free() {
            return Err(PoolError::NotHeld { id });
        }
        Ok(BufferHandle::adopt(Arc::clone(&self.shared), id))
    }

    fn owned_id(&self, raw: &RawBuffer) -> Result<BufferId, PoolError> {
        if raw.pool() != self.shared.serial {
            error!(
                target: "cbc::pool",
                id = %raw.id(),
                "raw buffer issued by another pool"
            );
            return Err(PoolError::InvalidId { id: raw.id() });
        }
        Ok(raw.id())
    }

    /// 索引对应的引用计数；索引不属于本池时返回 `None`。
    pub fn refcount(&self, id: BufferId) -> Option<u32> {
        self.shared.slot(id).ok().map(|slot| slot.refcount.get())
    }

    /// 当前被引用的槽位数量（无锁快照）。
    pub fn in_use(&self) -> u32 {
        self.shared
            .slots
            .iter()
            .filter(|slot| !slot.refcount.is_free())
            .count() as u32
    }

    /// 在池级锁内收集所有忙碌槽位，不修改池。
    pub fn busy_slots(&self) -> Vec<BusySlot> {
        let _scan = self.shared.scan_lock.lock();
        self.shared
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let refcount = slot.refcount.get();
                (refcount != 0).then(|| BusySlot {
                    id: BufferId::new(index as u32),
                    refcount,
                })
            })
            .collect()
    }

    /// 在所有引用计数为 0 时销毁池。
    ///
    /// 任一缓冲仍被引用时，为每个忙碌槽位输出一条诊断日志，并通过 [`BusyPool`] 原样交还池；
    /// 这是破坏性的前置检查，不会阻塞等待。
    pub fn try_free(self) -> Result<(), BusyPool> {
        let busy = self.busy_slots();
        if busy.is_empty() {
            debug!(target: "cbc::pool", capacity = self.capacity(), "buffer pool freed");
            return Ok(());
        }
        for slot in &busy {
            warn!(
                target: "cbc::pool",
                id = %slot.id,
                refcount = slot.refcount,
                "buffer still referenced at pool teardown"
            );
        }
        warn!(
            target: "cbc::pool",
            busy = busy.len(),
            capacity = self.capacity(),
            "buffer pool busy, refusing to free"
        );
        Err(BusyPool { pool: self, busy })
    }

    /// 统计快照。
    pub fn stats(&self) -> PoolStats {
        let metrics = &self.shared.metrics;
        PoolStats {
            capacity: self.capacity(),
            in_use: self.in_use(),
            total_acquired: metrics.total_acquired.load(Ordering::Relaxed),
            failed_acquisitions: metrics.failed_acquisitions.load(Ordering::Relaxed),
            double_releases: metrics.double_releases.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// 缓冲池统计快照。
///
/// - `in_use`：快照时刻引用计数非零的槽位数量；
/// - `failed_acquisitions`：`get_buffer` 返回 `None` 的累计次数；
/// - `double_releases`：被拒绝的重复释放次数，非零即表示存在调用方缺陷。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: u32,
    pub in_use: u32,
    pub total_acquired: u64,
    pub failed_acquisitions: u64,
    pub double_releases: u64,
}

/// 池与所有句柄共享的存储。句柄持有 `Arc`，因此槽位数组至少与最后一个句柄同寿。
pub(crate) struct PoolShared {
    pub(crate) serial: u64,
    slots: Box<[Slot]>,
    scan_lock: Mutex<()>,
    metrics: PoolMetrics,
}

impl PoolShared {
    /// 校验后的槽位访问。
    pub(crate) fn slot(&self, id: BufferId) -> Result<&Slot, PoolError> {
        self.slots
            .get(id.index() as usize)
            .ok_or(PoolError::InvalidId { id })
    }

    /// 句柄持有的索引一定来自本池；越界说明内存状态已损坏。
    pub(crate) fn slot_at(&self, id: BufferId) -> &Slot {
        match self.slots.get(id.index() as usize) {
            Some(slot) => slot,
            None => panic!("buffer handle {id} outside pool of {}", self.slots.len()),
        }
    }

    pub(crate) fn increment(&self, id: BufferId) -> Result<u32, PoolError> {
        let slot = self.slot(id)?;
        slot.refcount.increment().map_err(|err| match err {
            RefCountError::AlreadyFree => {
                error!(target: "cbc::pool", %id, "increment on a free buffer");
                PoolError::NotHeld { id }
            }
            RefCountError::Overflow => PoolError::Overflow { id },
        })
    }

    pub(crate) fn release(&self, id: BufferId) -> Result<u32, PoolError> {
        let slot = self.slot(id)?;
        match slot.refcount.decrement_with(|| slot.scrub()) {
            Ok(Release::Last) => {
                trace!(target: "cbc::pool", %id, "buffer returned to pool");
                Ok(0)
            }
            Ok(release) => Ok(release.remaining()),
            Err(_) => {
                self.metrics.double_releases.fetch_add(1, Ordering::Relaxed);
                error!(target: "cbc::pool", %id, "release of a buffer that is already free");
                Err(PoolError::DoubleRelease { id })
            }
        }
    }
}

/// 一个缓冲槽位：引用计数与受读写锁保护的帧。
pub(crate) struct Slot {
    pub(crate) refcount: RefCount,
    pub(crate) frame: RwLock<Frame>,
}

impl Slot {
    fn new() -> Self {
        Self {
            refcount: RefCount::new(),
            frame: RwLock::new(Frame {
                data: [0; BUFFER_SIZE],
                payload_length: 0,
                frame_length: 0,
            }),
        }
    }

    fn reset_lengths(&self) {
        let mut frame = self.frame.write();
        frame.payload_length = 0;
        frame.frame_length = 0;
    }

    fn scrub(&self) {
        let mut frame = self.frame.write();
        frame.data.fill(SCRUB_PATTERN);
        frame.payload_length = 0;
        frame.frame_length = 0;
    }
}

/// 缓冲数据与长度元数据。
pub(crate) struct Frame {
    pub(crate) data: [u8; BUFFER_SIZE],
    pub(crate) payload_length: u32,
    pub(crate) frame_length: u32,
}

#[derive(Default)]
struct PoolMetrics {
    total_acquired: AtomicU64,
    failed_acquisitions: AtomicU64,
    double_releases: AtomicU64,
}
