#![deny(unsafe_code)]

//! `cbc-device` 在 `cbc-buffer` 之上实现载板通信设备的消费者通道与广播路径。
//!
//! # 模块定位（Why）
//! - 一帧数据只在池中存放一份，通过引用计数同时排入多个消费者的队列；
//! - 消费者以阻塞、限时或非阻塞方式读取，读取完毕即释放自己的引用。
//!
//! # 设计概要（How）
//! - [`channel`]：[`Channel`] 以互斥锁串行化队列，以条件变量唤醒阻塞读者；
//! - [`device`]：[`DeviceContext`] 拥有缓冲池与通道表，提供广播、发送与关闭；
//! - [`session`]：[`ConsumerSession`] 在结束时自动摘除、关闭并排空通道；
//! - [`config`]：从 TOML 加载池规模与通道上限。

pub mod channel;
pub mod config;
pub mod device;
pub mod error;
pub mod session;

pub use channel::{Channel, ChannelId, ReadMode, Readiness};
pub use config::{DEFAULT_MAX_CHANNELS, DeviceConfig};
pub use device::{BroadcastReport, DeviceContext};
pub use error::{DequeueError, DeviceError, EnqueueError, ReadError, ShutdownRefused};
pub use session::ConsumerSession;
