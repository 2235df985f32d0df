use cbc_buffer::BufferPool;
use cbc_device::{DeviceContext, ReadMode};
use criterion::{Criterion, black_box};
use std::{env, time::Duration};

/// 广播路径基准：一次 `transmit` 扇出到多个通道，再由各通道取出释放。
///
/// # 设计背景（Why）
/// - 广播成本随通道数线性增长（每个通道一次加锁 + 一次引用递增），用于观察锁与原子操作的回归。
///
/// # 逻辑解析（How）
/// - 每轮迭代发送一帧 64 字节负载，随后每个通道非阻塞取出一帧，保证池与队列不会累积。
fn bench_broadcast_fan_out(c: &mut Criterion) {
    for consumers in [1usize, 3, 6] {
        let device = DeviceContext::<32>::new(
            BufferPool::new(64).expect("创建缓冲池失败"),
            consumers,
        );
        let sessions: Vec<_> = (0..consumers)
            .map(|i| device.open(format!("bench-{i}")).expect("打开会话"))
            .collect();
        let payload = [0xA5u8; 64];

        c.bench_function(&format!("broadcast_fan_out/{consumers}"), |b| {
            b.iter(|| {
                let report = device.transmit(black_box(&payload)).expect("发送成功");
                for session in &sessions {
                    black_box(session.dequeue(ReadMode::NonBlocking).expect("已投递一帧"));
                }
                black_box(report)
            });
        });
    }
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_broadcast_fan_out(&mut criterion);
    criterion.final_summary();
}
