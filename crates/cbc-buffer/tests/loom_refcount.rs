#![cfg(any(loom, cbc_loom))]

use cbc_buffer::{RefCount, RefCountError, Release};
use loom::{
    model,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

#[test]
fn concurrent_claims_grant_exactly_one_owner() {
    //
    // 教案级说明：两个租借者竞争同一空闲槽位。
    // - **Why**：池的扫描锁只串行化扫描本身，认领的唯一性最终落在 0 → 1 的 CAS 上；
    // - **What**：任意交错下恰有一个线程认领成功，计数停在 1。
    model(|| {
        let count = Arc::new(RefCount::new());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let count = Arc::clone(&count);
                thread::spawn(move || count.try_claim())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("认领线程不应 panic"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(count.get(), 1);
    });
}

#[test]
fn concurrent_releases_observe_a_single_last() {
    //
    // 教案级说明：两个持有者同时释放，擦除回调只能执行一次。
    // - **Why**：若两个释放者都认为自己是最后一个，数据区会被擦除两次，
    //   而第二次擦除可能覆盖新租借者刚写入的帧；
    // - **What**：恰有一个线程得到 `Release::Last`，擦除计数为 1，最终计数为 0。
    model(|| {
        let count = Arc::new(RefCount::new());
        assert!(count.try_claim());
        assert_eq!(count.increment(), Ok(2));
        let scrubs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let count = Arc::clone(&count);
                let scrubs = Arc::clone(&scrubs);
                thread::spawn(move || {
                    count
                        .decrement_with(|| {
                            scrubs.fetch_add(1, Ordering::SeqCst);
                        })
                        .expect("持有者释放必须成功")
                })
            })
            .collect();

        let lasts = handles
            .into_iter()
            .map(|h| h.join().expect("释放线程不应 panic"))
            .filter(|release| *release == Release::Last)
            .count();
        assert_eq!(lasts, 1);
        assert_eq!(scrubs.load(Ordering::SeqCst), 1);
        assert!(count.is_free());
    });
}

#[test]
fn share_and_release_race_preserves_count() {
    //
    // 教案级说明：一个持有者派生新引用的同时，另一个持有者释放自己的引用。
    // - **How**：初始计数 2，线程 A 递增后再释放，线程 B 释放一次；
    // - **What**：无论交错如何，结束时计数都回到 1，且没有线程观察到 `AlreadyFree`。
    model(|| {
        let count = Arc::new(RefCount::new());
        assert!(count.try_claim());
        assert_eq!(count.increment(), Ok(2));

        let sharer = {
            let count = Arc::clone(&count);
            thread::spawn(move || {
                count.increment().expect("仍被持有时递增必须成功");
                count.decrement().expect("释放派生的引用");
            })
        };
        let releaser = {
            let count = Arc::clone(&count);
            thread::spawn(move || count.decrement().map(Release::remaining))
        };

        sharer.join().expect("共享线程不应 panic");
        let remaining = releaser.join().expect("释放线程不应 panic");
        assert!(matches!(remaining, Ok(1..=2)));
        assert_eq!(count.get(), 1);
        assert_eq!(count.decrement(), Ok(Release::Last));
        assert_eq!(count.decrement(), Err(RefCountError::AlreadyFree));
    });
}
