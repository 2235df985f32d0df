//! `device_contract` 集成测试：验证设备上下文的广播、发送、会话收尾与关闭流程。
//!
//! # 结构安排（How）
//! - `payload_round_trips_through_broadcast`：负载经广播到达每个通道后逐字节一致；
//! - `attach_limit_is_enforced` / `session_drop_releases_queued_buffers`：打开上限与会话收尾；
//! - `shutdown_*`：关闭在存活通道或存活缓冲时被拒绝并交还设备；
//! - `detached_snapshot_refuses_late_enqueue`：摘除即关闭，快照上的迟到投递被拒绝；
//! - 其余用例覆盖配置加载与满队列告警日志。

use std::sync::Arc;

use cbc_buffer::{BUFFER_SIZE, BufferPool, ConfigError};
use cbc_device::{
    BroadcastReport, DeviceConfig, DeviceContext, DeviceError, EnqueueError, ReadMode,
};
use tracing_test::traced_test;

fn device<const N: usize>(num_blocks: u32, max_channels: usize) -> DeviceContext<N> {
    DeviceContext::new(
        BufferPool::new(num_blocks).expect("创建缓冲池失败"),
        max_channels,
    )
}

/// 写入的负载经广播、出队后逐字节一致，负载长度与帧长度保持不变。
#[test]
fn payload_round_trips_through_broadcast() {
    let device = device::<8>(4, 3);
    let first = device.open("first").expect("打开会话");
    let second = device.open("second").expect("打开会话");

    let payload: Vec<u8> = (0..=255u8).cycle().skip(17).take(200).collect();
    let mut buf = device.pool().get_buffer().expect("池不应耗尽");
    {
        let mut writer = buf.try_write().expect("唯一持有者可写");
        writer.data_mut()[..payload.len()].copy_from_slice(&payload);
        writer.set_payload_length(payload.len() as u32);
        writer.set_frame_length(payload.len() as u32 + 8);
    }

    let report = device.broadcast(&buf);
    assert_eq!(
        report,
        BroadcastReport {
            delivered: 2,
            rejected_full: 0,
            rejected_closed: 0
        }
    );
    assert_eq!(buf.refcount(), 3);
    drop(buf);

    for session in [&first, &second] {
        let received = session.dequeue(ReadMode::NonBlocking).expect("每个会话各有一帧");
        let view = received.view();
        assert_eq!(view.payload(), payload.as_slice());
        assert_eq!(view.payload_length(), 200);
        assert_eq!(view.frame_length(), 208);
    }
    assert_eq!(device.pool().in_use(), 0);
}

/// `transmit` 完成租借、写入、广播与释放；超长负载与池耗尽分别报告。
#[test]
fn transmit_fills_and_broadcasts() {
    let device = device::<4>(1, 2);
    let session = device.open("reader").expect("打开会话");

    let report = device.transmit(b"hello board").expect("发送成功");
    assert_eq!(report.delivered, 1);
    assert_eq!(device.pool().in_use(), 1);

    let held = session.dequeue(ReadMode::NonBlocking).expect("已投递一帧");
    assert_eq!(held.view().payload(), b"hello board");
    assert_eq!(
        device.transmit(b"second"),
        Err(DeviceError::PoolExhausted)
    );
    drop(held);

    let oversized = vec![0u8; BUFFER_SIZE + 1];
    assert_eq!(
        device.transmit(&oversized),
        Err(DeviceError::PayloadTooLarge {
            len: BUFFER_SIZE + 1,
            max: BUFFER_SIZE
        })
    );
    assert_eq!(device.pool().in_use(), 0);
}

/// 挂载数量达到上限后拒绝新的会话；关闭一个会话后可再次打开。
#[test]
fn attach_limit_is_enforced() {
    let device = device::<4>(2, 2);
    let first = device.open("a").expect("打开会话");
    let _second = device.open("b").expect("打开会话");
    assert_eq!(
        device.open("c").err(),
        Some(DeviceError::TooManyChannels { limit: 2 })
    );
    assert_eq!(device.channel_count(), 2);

    first.close();
    assert_eq!(device.channel_count(), 1);
    assert!(device.open("c").is_ok());
}

/// 会话丢弃时摘除、关闭并排空通道，队列中的引用全部释放。
#[test]
fn session_drop_releases_queued_buffers() {
    let device = device::<4>(2, 4);
    let session = device.open("leaving").expect("打开会话");
    let id = session.id();
    let channel = Arc::clone(session.channel());

    device.transmit(b"one").expect("发送成功");
    device.transmit(b"two").expect("发送成功");
    assert_eq!(device.pool().in_use(), 2);

    drop(session);
    assert!(device.channel(id).is_none());
    assert!(channel.is_closed());
    assert!(channel.is_empty());
    assert_eq!(device.pool().in_use(), 0);

    let report = device.transmit(b"three").expect("发送成功");
    assert_eq!(report, BroadcastReport::default());
}

/// 仍有会话挂载时拒绝关闭，交还的设备在会话结束后可以正常关闭。
#[test]
fn shutdown_refuses_attached_channels() {
    let device = device::<4>(2, 2);
    let channel = device.create_channel("manual");
    device.attach(channel.clone()).expect("挂载成功");

    let refused = device.shutdown().expect_err("存在挂载通道时必须拒绝");
    assert_eq!(refused.reason, DeviceError::ChannelsAttached { count: 1 });
    let device = refused.into_device();

    let detached = device.detach(channel.id()).expect("通道已挂载");
    assert!(detached.is_closed());
    detached.drain();
    device.shutdown().expect("无挂载通道且无存活缓冲时可以关闭");
}

/// 摘除前复制的通道快照在摘除后只会拒绝投递，摘除后的一次排空即可归还全部缓冲。
#[test]
fn detached_snapshot_refuses_late_enqueue() {
    let device = device::<4>(2, 2);
    let channel = device.create_channel("late");
    let id = device.attach(Arc::clone(&channel)).expect("挂载成功");
    let snapshot = device.channel(id).expect("通道已挂载");

    let detached = device.detach(id).expect("通道已挂载");
    assert_eq!(detached.drain(), 0);

    let buf = device.pool().get_buffer().expect("池不应耗尽");
    assert_eq!(snapshot.enqueue(&buf), Err(EnqueueError::Closed));
    assert_eq!(buf.refcount(), 1);
    drop(buf);

    assert_eq!(device.pool().in_use(), 0);
    device.shutdown().expect("摘除并排空后可以关闭");
}

/// 仍有缓冲被引用时拒绝关闭，并记录忙碌槽位。
#[traced_test]
#[test]
fn shutdown_refuses_live_buffers() {
    let device = device::<4>(2, 2);
    let held = device.pool().get_buffer().expect("池不应耗尽").into_raw();

    let refused = device.shutdown().expect_err("存在存活缓冲时必须拒绝");
    assert_eq!(refused.reason, DeviceError::PoolBusy { busy: 1 });
    assert!(logs_contain("buffer still referenced at pool teardown"));

    let device = refused.into_device();
    assert_eq!(device.pool().release(held), Ok(0));
    device.shutdown().expect("全部释放后可以关闭");
}

/// 满队列的通道丢弃本帧并记录告警，其他通道不受影响。
#[traced_test]
#[test]
fn full_channel_drops_frame_with_warning() {
    let device = device::<2>(4, 2);
    let slow = device.open("slow").expect("打开会话");
    let fast = device.open("fast").expect("打开会话");

    for _ in 0..2 {
        device.transmit(b"tick").expect("发送成功");
        fast.dequeue(ReadMode::NonBlocking).expect("快速消费者及时读取");
    }
    let report = device.transmit(b"tick").expect("发送成功");
    assert_eq!(report.delivered, 1);
    assert_eq!(report.rejected_full, 1);
    assert!(logs_contain("channel queue full, frame dropped"));
    assert_eq!(slow.channel().len(), 2);
    assert_eq!(fast.channel().len(), 1);
}

/// 从 TOML 构建设备，配置错误以 `DeviceError::Config` 传播。
#[test]
fn device_from_toml_config() {
    let config = DeviceConfig::from_toml_str(
        r#"
        max_channels = 3

        [pool]
        num_blocks = 5
        "#,
    )
    .expect("配置合法");
    let device = DeviceContext::<8>::from_config(&config).expect("按配置创建设备");
    assert_eq!(device.pool().capacity(), 5);
    assert_eq!(device.max_channels(), 3);

    let invalid = DeviceConfig {
        max_channels: 0,
        ..DeviceConfig::default()
    };
    assert!(matches!(
        DeviceContext::<8>::from_config(&invalid),
        Err(DeviceError::Config(ConfigError::Invalid {
            field: "max_channels",
            ..
        }))
    ));
    assert!(matches!(
        DeviceConfig::from_toml_str("[pool]\nnum_blocks = 0"),
        Err(ConfigError::Invalid {
            field: "pool.num_blocks",
            ..
        })
    ));
}
