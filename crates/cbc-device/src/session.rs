//! 消费者会话：打开设备到关闭设备之间的 RAII 守卫。

use std::{fmt, sync::Arc};

use cbc_buffer::{BufferHandle, QUEUE_CAPACITY};
use tracing::debug;

use crate::{
    channel::{Channel, ChannelId, ReadMode, Readiness},
    device::DeviceContext,
    error::{DequeueError, ReadError},
};

/// 一个已挂载通道的消费者会话。
///
/// # 教案式说明
/// - **意图 (Why)**：消费者退出时必须“摘除 → 关闭 → 排空”，任何一步遗漏都会让缓冲永久忙碌；
///   把这串动作放进 `Drop`，提前返回或 panic 展开也不会遗漏；
/// - **契约 (What)**：摘除后新的广播不再看到该通道；关闭使已取得快照的广播被拒绝，
///   并唤醒阻塞在该通道上的其他读者；最后排空释放队列中的全部引用；
/// - **执行 (How)**：[`close`](Self::close) 显式执行同样的收尾并返回释放的缓冲数量。
pub struct ConsumerSession<'a, const N: usize = QUEUE_CAPACITY> {
    device: &'a DeviceContext<N>,
    channel: Option<Arc<Channel<N>>>,
}

impl<'a, const N: usize> ConsumerSession<'a, N> {
    pub(crate) fn new(device: &'a DeviceContext<N>, channel: Arc<Channel<N>>) -> Self {
        Self {
            device,
            channel: Some(channel),
        }
    }

    /// 会话所属通道的标识。
    pub fn id(&self) -> ChannelId {
        self.channel().id()
    }

    /// 会话所属的通道。
    pub fn channel(&self) -> &Arc<Channel<N>> {
        match &self.channel {
            Some(channel) => channel,
            None => unreachable!("consumer session used after teardown"),
        }
    }

    /// 按读取模式取出下一个缓冲。
    pub fn dequeue(&self, mode: ReadMode) -> Result<BufferHandle, DequeueError> {
        self.channel().dequeue(mode)
    }

    /// 取出下一个缓冲并复制其负载。
    pub fn read_into(&self, dst: &mut [u8], mode: ReadMode) -> Result<usize, ReadError> {
        self.channel().read_into(dst, mode)
    }

    /// 当前就绪状态。
    pub fn readiness(&self) -> Readiness {
        self.channel().readiness()
    }

    /// 显式结束会话，返回排空时释放的缓冲数量。
    pub fn close(mut self) -> usize {
        self.teardown()
    }

    fn teardown(&mut self) -> usize {
        let Some(channel) = self.channel.take() else {
            return 0;
        };
        // 摘除即关闭；若已被他处摘除，通道同样已关闭。
        self.device.detach(channel.id());
        let drained = channel.drain();
        debug!(
            target: "cbc::device",
            channel = %channel.id(),
            label = channel.label(),
            drained,
            "consumer session closed"
        );
        drained
    }
}

impl<const N: usize> Drop for ConsumerSession<'_, N> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<const N: usize> fmt::Debug for ConsumerSession<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerSession")
            .field("channel", &self.channel)
            .finish()
    }
}
