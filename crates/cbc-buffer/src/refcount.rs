//! 缓冲槽位的原子引用计数。
//!
//! # 不变量（What）
//! - 计数为 0 ⇔ 槽位空闲，可被 [`RefCount::try_claim`] 认领；
//! - 递减绝不越过 0：对空闲槽位的释放返回 [`RefCountError::AlreadyFree`]，计数保持不变；
//! - 递增拒绝“复活”空闲槽位：只有已有持有者才能派生新的引用；
//! - 1 → 0 的最后一次递减在发布 0 之前执行擦除回调，因此新认领者不会被迟到的擦除覆盖。

use thiserror::Error;

//
// 教案级说明：启用 `--cfg loom`（或 `--cfg cbc_loom`）时切换到 loom 原子类型，
// 让模型检查器探索认领、递增与释放之间的全部交错。
#[cfg(not(any(loom, cbc_loom)))]
use core::sync::atomic::{AtomicU32, Ordering};
#[cfg(any(loom, cbc_loom))]
use loom::sync::atomic::{AtomicU32, Ordering};

/// 引用计数操作失败的原因。
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum RefCountError {
    /// 计数已为 0。
    #[error("reference count is already zero")]
    AlreadyFree,
    /// 计数将超过 `u32::MAX`。
    #[error("reference count would overflow")]
    Overflow,
}

/// 一次成功递减的结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Release {
    /// 仍有其他持有者，携带剩余计数。
    Shared(u32),
    /// 本次释放的是最后一个引用，槽位已回到空闲态。
    Last,
}

impl Release {
    /// 释放后剩余的引用数量。
    pub fn remaining(self) -> u32 {
        match self {
            Release::Shared(remaining) => remaining,
            Release::Last => 0,
        }
    }
}

/// 单一原子字表示的引用计数。
#[derive(Debug)]
pub struct RefCount {
    count: AtomicU32,
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

impl RefCount {
    /// 创建计数为 0（空闲）的实例。
    pub fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    /// 当前计数。并发场景下仅作快照使用。
    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// 是否空闲。
    pub fn is_free(&self) -> bool {
        self.get() == 0
    }

    /// 尝试将空闲槽位认领为计数 1。
    ///
    /// 失败时不修改计数。
    pub fn try_claim(&self) -> bool {
        self.count
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 为已持有的槽位增加一个引用，返回新的计数。
    pub fn increment(&self) -> Result<u32, RefCountError> {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(RefCountError::AlreadyFree);
            }
            let next = current.checked_add(1).ok_or(RefCountError::Overflow)?;
            match self.count.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next),
                Err(actual) => current = actual,
            }
        }
    }

    /// 释放一个引用，不做擦除。
    pub fn decrement(&self) -> Result<Release, RefCountError> {
        self.decrement_with(|| {})
    }

    /// 释放一个引用；若为最后一个引用，先执行 `on_last` 再发布 0。
    ///
    /// 计数为 1 时调用方是唯一持有者，`on_last` 运行期间没有合法的并发递增者，
    /// 因此擦除与“槽位重新可认领”之间不存在窗口。
    pub fn decrement_with<F: FnOnce()>(&self, on_last: F) -> Result<Release, RefCountError> {
        let mut on_last = Some(on_last);
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            match current {
                0 => return Err(RefCountError::AlreadyFree),
                1 => {
                    if let Some(scrub) = on_last.take() {
                        scrub();
                    }
                    match self.count.compare_exchange(
                        1,
                        0,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return Ok(Release::Last),
                        Err(actual) => current = actual,
                    }
                }
                n => match self.count.compare_exchange_weak(
                    n,
                    n - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Ok(Release::Shared(n - 1)),
                    Err(actual) => current = actual,
                },
            }
        }
    }
}

#[cfg(all(test, not(any(loom, cbc_loom))))]
mod tests {
    use super::*;

    #[test]
    fn claim_only_succeeds_on_free_count() {
        let count = RefCount::new();
        assert!(count.try_claim());
        assert!(!count.try_claim());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn increment_refuses_free_slot() {
        let count = RefCount::new();
        assert_eq!(count.increment(), Err(RefCountError::AlreadyFree));
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn decrement_never_wraps_below_zero() {
        let count = RefCount::new();
        assert!(count.try_claim());
        assert_eq!(count.decrement(), Ok(Release::Last));
        assert_eq!(count.decrement(), Err(RefCountError::AlreadyFree));
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn scrub_runs_only_on_last_release() {
        let count = RefCount::new();
        assert!(count.try_claim());
        assert_eq!(count.increment(), Ok(2));

        let mut scrubbed = 0;
        assert_eq!(count.decrement_with(|| scrubbed += 1), Ok(Release::Shared(1)));
        assert_eq!(scrubbed, 0);
        assert_eq!(count.decrement_with(|| scrubbed += 1), Ok(Release::Last));
        assert_eq!(scrubbed, 1);
    }
}
