//! `cbc_stress`：在本机线程上模拟“一个发送者 + 多个阻塞读者”的载板通信负载。
//!
//! 用法：`cbc_stress [config.toml] [frames]`。日志级别由 `RUST_LOG` 控制，默认 `info`；
//! 以 `RUST_LOG=cbc=debug` 运行可观察队列满与会话收尾。

use std::{env, error::Error, fs, thread, time::Instant};

use cbc_device::{DequeueError, DeviceConfig, DeviceContext, DeviceError, ReadMode};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FRAMES: u32 = 100_000;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let config = match args.next() {
        Some(path) => DeviceConfig::from_toml_str(&fs::read_to_string(path)?)?,
        None => DeviceConfig::default(),
    };
    let frames = match args.next() {
        Some(raw) => raw.parse()?,
        None => DEFAULT_FRAMES,
    };

    let device: DeviceContext = DeviceContext::from_config(&config)?;
    let sessions = (0..config.max_channels)
        .map(|i| device.open(format!("stress-{i}")))
        .collect::<Result<Vec<_>, _>>()?;

    let started = Instant::now();
    let (sent, dropped) = thread::scope(|scope| {
        for session in &sessions {
            scope.spawn(move || {
                let mut received = 0u64;
                loop {
                    match session.dequeue(ReadMode::Blocking) {
                        Ok(_) => received += 1,
                        Err(DequeueError::Closed) => break,
                        Err(other) => {
                            warn!(channel = %session.id(), error = %other, "consumer stopped");
                            break;
                        }
                    }
                }
                info!(channel = %session.id(), received, "consumer finished");
            });
        }

        let producer = scope.spawn(|| {
            let outcome = produce(&device, frames);
            for session in &sessions {
                session.channel().close();
            }
            outcome
        });
        match producer.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })?;

    let stats = device.pool().stats();
    info!(
        sent,
        dropped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        acquired = stats.total_acquired,
        exhausted = stats.failed_acquisitions,
        "stress run complete"
    );

    drop(sessions);
    device.shutdown().map_err(|refused| refused.reason)?;
    Ok(())
}

/// 依次发送 `frames` 帧，池耗尽时让出 CPU 等待消费者归还缓冲。返回（已发送帧数，丢弃的投递数）。
fn produce(device: &DeviceContext, frames: u32) -> Result<(u64, u64), DeviceError> {
    let mut sent = 0u64;
    let mut dropped = 0u64;
    for seq in 0..frames {
        loop {
            match device.transmit(&seq.to_le_bytes()) {
                Ok(report) => {
                    sent += 1;
                    dropped += report.rejected_full as u64;
                    break;
                }
                Err(DeviceError::PoolExhausted) => thread::yield_now(),
                Err(other) => return Err(other),
            }
        }
    }
    Ok((sent, dropped))
}
