//! 设备上下文：缓冲池、通道集合与广播路径。
//!
//! # 模块角色（Why）
//! - 设备上下文是缓冲池与全部消费者通道的唯一所有者；通道的挂载与摘除只经由其 API，
//!   摘除即关闭，摘除后再排空的顺序由容器本身保证，而不是依赖调用方纪律；
//! - 传输层的接收路径调用 [`DeviceContext::broadcast`]，上层写入路径调用 [`DeviceContext::transmit`]。
//!
//! # 并发契约（What）
//! - 通道表位于独立的读写锁之后；广播在读锁内复制一份 `Arc` 快照后即释放锁，
//!   之后逐个投递，因此广播不会阻塞挂载/摘除，快照中的通道也不会在投递期间被释放；
//!   已摘除的通道在快照上只会拒绝投递；
//! - 多个发送者由发送锁串行化，保证各通道内的帧顺序与发送顺序一致。

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use cbc_buffer::{BUFFER_SIZE, BufferHandle, BufferPool, QUEUE_CAPACITY};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::{
    channel::{Channel, ChannelId},
    config::DeviceConfig,
    error::{DeviceError, EnqueueError, ShutdownRefused},
    session::ConsumerSession,
};

/// 一次广播的投递结果。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// 成功入队的通道数量。
    pub delivered: usize,
    /// 因队列已满而丢帧的通道数量。
    pub rejected_full: usize,
    /// 因通道已关闭而跳过的通道数量。
    pub rejected_closed: usize,
}

impl BroadcastReport {
    /// 未能投递的通道总数。
    pub fn rejected(&self) -> usize {
        self.rejected_full + self.rejected_closed
    }
}

/// `DeviceContext` 持有缓冲池与已挂载的消费者通道。
///
/// # 教案式说明
/// - **意图 (Why)**：把“池 + 通道表 + 打开上限 + 发送锁”收拢到单一所有者，
///   让生命周期约束（先摘除、再排空、最后销毁池）落在类型与方法上；
/// - **契约 (What)**：
///   - 挂载数量不超过 `max_channels`，超出返回 [`DeviceError::TooManyChannels`]；
///   - [`shutdown`](Self::shutdown) 在仍有通道或存活缓冲时拒绝，并交还设备；
/// - **风险 (Trade-offs)**：通道标识由单调计数器分配，不复用；外部构造的通道需自行避免冲突。
pub struct DeviceContext<const N: usize = QUEUE_CAPACITY> {
    pool: BufferPool,
    channels: RwLock<BTreeMap<ChannelId, Arc<Channel<N>>>>,
    max_channels: usize,
    next_id: AtomicU64,
    transmit_lock: Mutex<()>,
}

impl<const N: usize> DeviceContext<N> {
    /// 以既有缓冲池创建设备，通道表为空。
    pub fn new(pool: BufferPool, max_channels: usize) -> Self {
        debug!(
            target: "cbc::device",
            capacity = pool.capacity(),
            max_channels,
            queue_capacity = N,
            "device context created"
        );
        Self {
            pool,
            channels: RwLock::new(BTreeMap::new()),
            max_channels,
            next_id: AtomicU64::new(1),
            transmit_lock: Mutex::new(()),
        }
    }

    /// 按配置创建缓冲池与设备。
    pub fn from_config(config: &DeviceConfig) -> Result<Self, DeviceError> {
        config.validate()?;
        let pool = config.pool.build()?;
        Ok(Self::new(pool, config.max_channels))
    }

    /// 设备拥有的缓冲池。
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// 同时挂载的通道上限。
    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// 分配新标识并创建一个未挂载的通道。
    pub fn create_channel(&self, label: impl Into<String>) -> Arc<Channel<N>> {
        let id = ChannelId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        Arc::new(Channel::new(id, label))
    }

    /// 挂载通道，之后的广播会投递到该通道。
    pub fn attach(&self, channel: Arc<Channel<N>>) -> Result<ChannelId, DeviceError> {
        let id = channel.id();
        let mut channels = self.channels.write();
        if channels.contains_key(&id) {
            return Err(DeviceError::AlreadyAttached { id });
        }
        if channels.len() >= self.max_channels {
            warn!(
                target: "cbc::device",
                channel = %id,
                limit = self.max_channels,
                "channel limit reached, refusing attach"
            );
            return Err(DeviceError::TooManyChannels {
                limit: self.max_channels,
            });
        }
        channels.insert(id, channel);
        debug!(target: "cbc::device", channel = %id, attached = channels.len(), "channel attached");
        Ok(id)
    }

    /// 摘除并关闭通道，交还给调用方排空。
    ///
    /// 广播可能仍持有摘除前复制的快照；关闭发生在返回之前，快照上的后续投递因此只会得到
    /// [`EnqueueError::Closed`]，调用方随后的一次 [`Channel::drain`] 即是终局。
    pub fn detach(&self, id: ChannelId) -> Option<Arc<Channel<N>>> {
        let removed = self.channels.write().remove(&id)?;
        removed.close();
        debug!(target: "cbc::device", channel = %id, "channel detached");
        Some(removed)
    }

    /// 按标识查找已挂载的通道。
    pub fn channel(&self, id: ChannelId) -> Option<Arc<Channel<N>>> {
        self.channels.read().get(&id).cloned()
    }

    /// 已挂载的通道数量。
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// 打开一个消费者会话：创建通道并挂载，会话结束时自动摘除、关闭并排空。
    pub fn open(&self, label: impl Into<String>) -> Result<ConsumerSession<'_, N>, DeviceError> {
        let channel = self.create_channel(label);
        self.attach(Arc::clone(&channel))?;
        Ok(ConsumerSession::new(self, channel))
    }

    /// 把缓冲投递到每个已挂载的通道，每个通道各持有一个新引用。
    ///
    /// 调用方自己的句柄不受影响，投递后由调用方丢弃。队列已满的通道丢弃本帧并记录告警。
    pub fn broadcast(&self, buf: &BufferHandle) -> BroadcastReport {
        let targets: Vec<Arc<Channel<N>>> = self.channels.read().values().cloned().collect();

        let mut report = BroadcastReport::default();
        for channel in &targets {
            match channel.enqueue(buf) {
                Ok(()) => report.delivered += 1,
                Err(EnqueueError::Full { channel: id }) => {
                    warn!(
                        target: "cbc::device",
                        channel = %id,
                        buffer = %buf.id(),
                        "channel queue full, frame dropped"
                    );
                    report.rejected_full += 1;
                }
                Err(EnqueueError::Closed) => report.rejected_closed += 1,
            }
        }
        trace!(
            target: "cbc::device",
            buffer = %buf.id(),
            delivered = report.delivered,
            rejected = report.rejected(),
            "broadcast complete"
        );
        report
    }

    /// 生产者路径：租借缓冲、写入负载、广播并释放自己的引用。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：负载超过 [`BUFFER_SIZE`] 时返回 [`DeviceError::PayloadTooLarge`]，不占用缓冲；
    ///   池耗尽时返回 [`DeviceError::PoolExhausted`]；
    /// - **执行 (How)**：整个过程持有发送锁，多个发送者之间的帧顺序因此在所有通道中一致。
    pub fn transmit(&self, payload: &[u8]) -> Result<BroadcastReport, DeviceError> {
        if payload.len() > BUFFER_SIZE {
            return Err(DeviceError::PayloadTooLarge {
                len: payload.len(),
                max: BUFFER_SIZE,
            });
        }

        let _serial = self.transmit_lock.lock();
        let mut buf = self.pool.get_buffer().ok_or_else(|| {
            warn!(
                target: "cbc::device",
                capacity = self.pool.capacity(),
                "buffer pool exhausted on transmit"
            );
            DeviceError::PoolExhausted
        })?;
        buf.try_write()?.fill(payload)?;
        Ok(self.broadcast(&buf))
    }

    /// 关闭设备并销毁缓冲池。
    ///
    /// 仍有通道挂载或仍有缓冲被引用时拒绝，并通过 [`ShutdownRefused`] 交还设备。
    pub fn shutdown(self) -> Result<(), ShutdownRefused<N>> {
        let count = self.channel_count();
        if count > 0 {
            warn!(target: "cbc::device", count, "channels still attached, refusing shutdown");
            return Err(ShutdownRefused {
                reason: DeviceError::ChannelsAttached { count },
                device: self,
            });
        }

        let Self {
            pool,
            channels,
            max_channels,
            next_id,
            transmit_lock,
        } = self;
        match pool.try_free() {
            Ok(()) => {
                debug!(target: "cbc::device", "device shut down");
                Ok(())
            }
            Err(busy) => {
                let reason = DeviceError::PoolBusy {
                    busy: busy.busy.len(),
                };
                Err(ShutdownRefused {
                    device: Self {
                        pool: busy.into_pool(),
                        channels,
                        max_channels,
                        next_id,
                        transmit_lock,
                    },
                    reason,
                })
            }
        }
    }
}

impl<const N: usize> fmt::Debug for DeviceContext<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("pool", &self.pool)
            .field("channels", &self.channel_count())
            .field("max_channels", &self.max_channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_refuses_duplicates() {
        let device = DeviceContext::<4>::new(BufferPool::new(1).expect("创建缓冲池失败"), 2);
        let channel = device.create_channel("dup");
        let id = device.attach(Arc::clone(&channel)).expect("首次挂载成功");
        assert_eq!(
            device.attach(channel),
            Err(DeviceError::AlreadyAttached { id })
        );
        assert_eq!(device.channel_count(), 1);
    }

    #[test]
    fn broadcast_without_channels_delivers_nothing() {
        let device = DeviceContext::<4>::new(BufferPool::new(1).expect("创建缓冲池失败"), 2);
        let buf = device.pool().get_buffer().expect("池不应耗尽");
        assert_eq!(device.broadcast(&buf), BroadcastReport::default());
        assert_eq!(buf.refcount(), 1);
    }
}
