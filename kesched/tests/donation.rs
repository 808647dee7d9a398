mod common;

use common::{boot, boot_default, effective};
use kesched::{PRI_DEFAULT, SystemConfiguration, ThreadStatus};

#[test]
fn waiter_donates_to_holder() {
    let (kernel, _cpu) = boot_default();
    let main = kernel.current();
    let lock = kernel.lock();
    lock.acquire();

    let high = kernel.thread("high").priority(50).spawn(|| {}).unwrap();
    assert_eq!(kernel.current(), high);
    lock.acquire();
    assert_eq!(kernel.current(), main);
    assert_eq!(effective(&kernel, main), 50);
    assert_eq!(kernel.get_priority(), 50);
    assert_eq!(kernel.thread_info(main).unwrap().base_priority, PRI_DEFAULT);

    lock.release();
    assert_eq!(kernel.current(), high);
    assert_eq!(lock.holder(), Some(high));
    assert_eq!(effective(&kernel, main), PRI_DEFAULT);
}

#[test]
fn donation_beats_medium_priority_thread() {
    let (kernel, _cpu) = boot_default();
    let main = kernel.current();
    let lock = kernel.lock();
    lock.acquire();

    let medium = kernel.thread("medium").priority(40).spawn(|| {}).unwrap();
    assert_eq!(kernel.current(), medium);
    kernel.yield_now();
    assert_eq!(kernel.current(), medium);

    let high = kernel.thread("high").priority(50).spawn(|| {}).unwrap();
    lock.acquire();
    // The holder now outranks the medium-priority thread.
    assert_eq!(kernel.current(), main);
    assert_eq!(kernel.status(medium), Some(ThreadStatus::Ready));

    lock.release();
    assert_eq!(kernel.current(), high);
    kernel.exit();
    assert_eq!(kernel.current(), medium);
}

#[test]
fn releasing_one_lock_keeps_the_other_donations() {
    let (kernel, _cpu) = boot_default();
    let main = kernel.current();
    let (a, b) = (kernel.lock(), kernel.lock());
    a.acquire();
    b.acquire();

    let medium = kernel.thread("medium").priority(40).spawn(|| {}).unwrap();
    a.acquire();
    assert_eq!(kernel.current(), main);
    assert_eq!(effective(&kernel, main), 40);

    let high = kernel.thread("high").priority(50).spawn(|| {}).unwrap();
    b.acquire();
    assert_eq!(kernel.current(), main);
    assert_eq!(effective(&kernel, main), 50);

    b.release();
    assert_eq!(kernel.current(), high);
    assert_eq!(effective(&kernel, main), 40);

    b.release();
    kernel.exit();
    assert_eq!(kernel.current(), main);
    assert_eq!(effective(&kernel, main), 40);

    a.release();
    assert_eq!(kernel.current(), medium);
    assert_eq!(effective(&kernel, main), PRI_DEFAULT);
}

#[test]
fn nested_donation_follows_the_lock_chain() {
    let (kernel, _cpu) = boot_default();
    let main = kernel.current();
    let (a, b) = (kernel.lock(), kernel.lock());
    a.acquire();

    let middle = kernel.thread("middle").priority(32).spawn(|| {}).unwrap();
    b.acquire();
    a.acquire();
    assert_eq!(kernel.current(), main);
    assert_eq!(effective(&kernel, main), 32);

    let high = kernel.thread("high").priority(50).spawn(|| {}).unwrap();
    b.acquire();
    assert_eq!(kernel.current(), main);
    assert_eq!(effective(&kernel, middle), 50);
    assert_eq!(effective(&kernel, main), 50);

    a.release();
    assert_eq!(kernel.current(), middle);
    assert_eq!(effective(&kernel, main), PRI_DEFAULT);
    assert_eq!(effective(&kernel, middle), 50);

    a.release();
    assert_eq!(effective(&kernel, middle), 50);
    b.release();
    assert_eq!(kernel.current(), high);
    assert_eq!(effective(&kernel, middle), 32);
}

#[test]
fn donation_travels_a_long_chain() {
    let (kernel, _cpu) = boot_default();
    let main = kernel.current();
    let locks: Vec<_> = (0..5).map(|_| kernel.lock()).collect();
    locks[0].acquire();

    // Thread i holds lock i and waits on lock i - 1.
    let mut chain = vec![main];
    for (i, lock) in locks.iter().enumerate().skip(1) {
        let tid = kernel
            .thread(format!("link{i}"))
            .priority(32 + i as u8)
            .spawn(|| {})
            .unwrap();
        lock.acquire();
        locks[i - 1].acquire();
        assert_eq!(kernel.current(), main);
        chain.push(tid);
    }

    let top = kernel.thread("top").priority(60).spawn(|| {}).unwrap();
    locks[4].acquire();
    assert_eq!(kernel.current(), main);
    assert!(chain.iter().all(|tid| effective(&kernel, *tid) == 60));
    assert_eq!(
        kernel.thread_info(top).unwrap().wait_on_lock,
        Some(locks[4].id())
    );
}

#[test]
fn donation_reaches_a_ready_holder() {
    let (kernel, _cpu) = boot_default();
    let main = kernel.current();
    let lock = kernel.lock();
    let low = kernel.thread("low").priority(20).spawn(|| {}).unwrap();
    kernel.set_priority(10).unwrap();
    assert_eq!(kernel.current(), low);
    lock.acquire();

    let medium = kernel.thread("medium").priority(40).spawn(|| {}).unwrap();
    assert_eq!(kernel.current(), medium);
    let high = kernel.thread("high").priority(50).spawn(|| {}).unwrap();
    assert_eq!(kernel.current(), high);

    lock.acquire();
    // `low` waits on the ready queue and has to be dispatched before
    // `medium`.
    assert_eq!(kernel.current(), low);
    assert_eq!(effective(&kernel, low), 50);
    assert_eq!(kernel.status(medium), Some(ThreadStatus::Ready));
    assert_eq!(kernel.status(main), Some(ThreadStatus::Ready));
}

#[test]
fn set_priority_under_donation() {
    let (kernel, _cpu) = boot_default();
    let main = kernel.current();
    let lock = kernel.lock();
    lock.acquire();
    let high = kernel.thread("high").priority(50).spawn(|| {}).unwrap();
    lock.acquire();
    assert_eq!(kernel.current(), main);

    kernel.set_priority(60).unwrap();
    assert_eq!(kernel.get_priority(), 60);
    kernel.set_priority(20).unwrap();
    assert_eq!(kernel.get_priority(), 50);
    assert_eq!(kernel.current(), main);

    lock.release();
    assert_eq!(kernel.current(), high);
    assert_eq!(effective(&kernel, main), 20);
}

#[test]
fn remaining_waiters_donate_to_the_new_holder() {
    let (kernel, _cpu) = boot_default();
    let main = kernel.current();
    let lock = kernel.lock();
    lock.acquire();

    let first = kernel.thread("first").priority(40).spawn(|| {}).unwrap();
    lock.acquire();
    let second = kernel.thread("second").priority(45).spawn(|| {}).unwrap();
    lock.acquire();
    assert_eq!(kernel.current(), main);

    kernel.set_priority(35).unwrap();
    lock.release();
    assert_eq!(kernel.current(), second);
    assert_eq!(effective(&kernel, second), 45);
    assert_eq!(effective(&kernel, main), 35);

    kernel.set_priority(30).unwrap();
    assert_eq!(kernel.get_priority(), 40);
    assert_eq!(kernel.current(), second);
    lock.release();
    assert_eq!(kernel.current(), first);
    assert_eq!(effective(&kernel, second), 30);
}

#[test]
fn donation_can_be_disabled() {
    let config = SystemConfiguration::builder()
        .priority_donation(false)
        .build()
        .unwrap();
    let (kernel, _cpu) = boot(config);
    let main = kernel.current();
    let lock = kernel.lock();
    lock.acquire();
    kernel.thread("high").priority(50).spawn(|| {}).unwrap();
    lock.acquire();
    assert_eq!(kernel.current(), main);
    assert_eq!(effective(&kernel, main), PRI_DEFAULT);
}

#[test]
fn condvar_signal_donates_to_the_signaller() {
    let (kernel, _cpu) = boot_default();
    let main = kernel.current();
    let lock = kernel.lock();
    let cv = kernel.condvar();
    let high = kernel.thread("high").priority(50).spawn(|| {}).unwrap();
    lock.acquire();
    cv.wait(&lock);
    assert_eq!(kernel.current(), main);

    lock.acquire();
    cv.signal(&lock);
    assert_eq!(effective(&kernel, main), 50);
    lock.release();
    assert_eq!(kernel.current(), high);
    assert!(lock.held_by_current());
}
