mod common;

pub mod semaphore {
    use crate::common::boot_default;
    use abyss::WouldBlock;
    use kesched::{Semaphore, ThreadStatus};

    #[test]
    fn up_hands_the_permit_to_the_waiter() {
        let (kernel, _cpu) = boot_default();
        let main = kernel.current();
        let sema = kernel.semaphore(0);
        let b = kernel.thread("b").spawn(|| {}).unwrap();

        sema.down();
        assert_eq!(kernel.current(), b);
        assert_eq!(kernel.status(main), Some(ThreadStatus::Blocked));
        assert_eq!(sema.waiters(), 1);

        sema.up();
        // Same priority: the waiter is ready but does not preempt.
        assert_eq!(kernel.current(), b);
        assert_eq!(kernel.status(main), Some(ThreadStatus::Ready));
        assert_eq!(sema.value(), 0);
        assert_eq!(sema.waiters(), 0);

        kernel.yield_now();
        assert_eq!(kernel.current(), main);
        assert_eq!(sema.value(), 0);
    }

    #[test]
    fn down_with_permits_does_not_block() {
        let (kernel, cpu) = boot_default();
        let sema = Semaphore::new(&kernel, 2);
        sema.down();
        sema.down();
        assert_eq!(sema.value(), 0);
        assert!(cpu.switches().is_empty());
        sema.up();
        assert_eq!(sema.value(), 1);
    }

    #[test]
    fn up_wakes_the_highest_priority_waiter() {
        let (kernel, _cpu) = boot_default();
        let sema = kernel.semaphore(0);
        let mut waiters = Vec::new();
        for priority in [35, 45, 40] {
            let tid = kernel.thread("waiter").priority(priority).spawn(|| {}).unwrap();
            assert_eq!(kernel.current(), tid);
            sema.down();
            waiters.push(tid);
        }
        assert_eq!(sema.waiters(), 3);

        sema.up();
        assert_eq!(kernel.current(), waiters[1]);
        assert_eq!(kernel.status(waiters[0]), Some(ThreadStatus::Blocked));
        assert_eq!(kernel.status(waiters[2]), Some(ThreadStatus::Blocked));
    }

    #[test]
    fn equal_priority_waiters_wake_in_arrival_order() {
        let (kernel, _cpu) = boot_default();
        let main = kernel.current();
        let sema = kernel.semaphore(0);
        let first = kernel.thread("first").priority(40).spawn(|| {}).unwrap();
        sema.down();
        let second = kernel.thread("second").priority(40).spawn(|| {}).unwrap();
        sema.down();
        assert_eq!(kernel.current(), main);

        sema.up();
        assert_eq!(kernel.current(), first);
        assert_eq!(kernel.status(second), Some(ThreadStatus::Blocked));
    }

    #[test]
    fn try_down_never_blocks() {
        let (kernel, _cpu) = boot_default();
        let sema = kernel.semaphore(1);
        assert_eq!(sema.try_down(), Ok(()));
        assert_eq!(sema.try_down(), Err(WouldBlock));
        assert_eq!(sema.value(), 0);
    }

    #[test]
    fn permit_is_returned_on_drop() {
        let (kernel, _cpu) = boot_default();
        let sema = kernel.semaphore(1);
        {
            let _permit = sema.permit();
            assert_eq!(sema.value(), 0);
        }
        assert_eq!(sema.value(), 1);
    }

    #[test]
    #[should_panic(expected = "The idle thread cannot wait on a semaphore.")]
    fn idle_thread_cannot_wait_for_a_permit() {
        let (kernel, _cpu) = boot_default();
        let sema = kernel.semaphore(0);
        kernel.block();
        sema.down();
    }

    #[test]
    fn up_from_interrupt_handler_preempts_idle() {
        let (kernel, _cpu) = boot_default();
        let main = kernel.current();
        let sema = kernel.semaphore(0);
        sema.down();
        assert_ne!(kernel.current(), main);

        kernel.handle_interrupt(|| sema.up());
        assert_eq!(kernel.current(), main);
        assert_eq!(sema.value(), 0);
    }
}

pub mod lock {
    use crate::common::boot_default;
    use abyss::WouldBlock;
    use kesched::{Lock, ThreadStatus};

    #[test]
    fn acquire_and_release_uncontended() {
        let (kernel, cpu) = boot_default();
        let main = kernel.current();
        let lock = Lock::new(&kernel);
        assert_eq!(lock.holder(), None);
        lock.acquire();
        assert_eq!(lock.holder(), Some(main));
        assert!(lock.held_by_current());
        lock.release();
        assert_eq!(lock.holder(), None);
        assert!(cpu.switches().is_empty());
    }

    #[test]
    fn release_hands_the_lock_to_the_waiter() {
        let (kernel, _cpu) = boot_default();
        let main = kernel.current();
        let lock = kernel.lock();
        lock.acquire();

        let t = kernel.thread("t").priority(40).spawn(|| {}).unwrap();
        lock.acquire();
        assert_eq!(kernel.current(), main);
        assert_eq!(kernel.status(t), Some(ThreadStatus::Blocked));
        let info = kernel.thread_info(t).unwrap();
        assert_eq!(info.wait_on_lock, Some(lock.id()));

        lock.release();
        assert_eq!(kernel.current(), t);
        assert_eq!(lock.holder(), Some(t));
        assert!(lock.held_by_current());
        assert_eq!(kernel.thread_info(t).unwrap().wait_on_lock, None);
    }

    #[test]
    fn try_acquire_fails_while_held() {
        let (kernel, _cpu) = boot_default();
        let lock = kernel.lock();
        assert_eq!(lock.try_acquire(), Ok(()));
        let other = kernel.thread("other").priority(40).spawn(|| {}).unwrap();
        assert_eq!(kernel.current(), other);
        assert_eq!(lock.try_acquire(), Err(WouldBlock));
        assert_eq!(kernel.current(), other);
    }

    #[test]
    fn guard_releases_on_drop() {
        let (kernel, _cpu) = boot_default();
        let lock = kernel.lock();
        {
            let _guard = lock.guard();
            assert!(lock.held_by_current());
        }
        assert_eq!(lock.holder(), None);
        lock.guard().unlock();
        assert_eq!(lock.holder(), None);
    }

    #[test]
    fn exiting_holder_hands_over_its_locks() {
        let (kernel, cpu) = boot_default();
        let main = kernel.current();
        let lock = kernel.lock();
        let holder = kernel.thread("holder").priority(40).spawn(|| {}).unwrap();
        lock.acquire();
        kernel.sleep(1);
        assert_eq!(kernel.current(), main);
        assert_eq!(lock.holder(), Some(holder));

        lock.acquire();
        assert_ne!(kernel.current(), main);
        kernel.timer_interrupt();
        assert_eq!(kernel.current(), holder);

        kernel.exit();
        assert_eq!(kernel.current(), main);
        assert_eq!(lock.holder(), Some(main));
        assert_eq!(kernel.status(holder), None);
        assert_eq!(cpu.reclaimed(), vec![holder]);
    }

    #[test]
    #[should_panic(expected = "which is not its holder")]
    fn release_by_non_holder_is_fatal() {
        let (kernel, _cpu) = boot_default();
        let lock = kernel.lock();
        lock.acquire();
        kernel.thread("thief").priority(40).spawn(|| {}).unwrap();
        lock.release();
    }

    #[test]
    #[should_panic(expected = "which is not its holder")]
    fn release_of_free_lock_is_fatal() {
        let (kernel, _cpu) = boot_default();
        kernel.lock().release();
    }

    #[test]
    fn idle_thread_takes_a_free_lock_without_blocking() {
        let (kernel, cpu) = boot_default();
        let lock = kernel.lock();
        kernel.block();
        let idle = kernel.current();
        assert_eq!(lock.try_acquire(), Ok(()));
        assert_eq!(lock.holder(), Some(idle));
        lock.release();
        assert_eq!(cpu.switches().len(), 1);
    }

    #[test]
    #[should_panic(expected = "The idle thread cannot wait on a lock.")]
    fn idle_thread_cannot_wait_for_a_lock() {
        let (kernel, _cpu) = boot_default();
        let lock = kernel.lock();
        lock.acquire();
        kernel.block();
        lock.acquire();
    }

    #[test]
    #[should_panic(expected = "acquired again by its holder")]
    fn recursive_acquire_is_fatal() {
        let (kernel, _cpu) = boot_default();
        let lock = kernel.lock();
        lock.acquire();
        lock.acquire();
    }
}

pub mod condition_variable {
    use crate::common::boot_default;
    use kesched::ThreadStatus;

    #[test]
    fn wait_releases_and_signal_returns_the_lock() {
        let (kernel, _cpu) = boot_default();
        let main = kernel.current();
        let lock = kernel.lock();
        let cv = kernel.condvar();
        let t = kernel.thread("t").spawn(|| {}).unwrap();

        lock.acquire();
        cv.wait(&lock);
        assert_eq!(kernel.current(), t);
        assert_eq!(lock.holder(), None);
        assert_eq!(cv.waiters(), 1);

        lock.acquire();
        cv.signal(&lock);
        assert_eq!(cv.waiters(), 0);
        // The signalled thread now waits for the lock.
        assert_eq!(kernel.thread_info(main).unwrap().wait_on_lock, Some(lock.id()));
        assert_eq!(kernel.current(), t);

        lock.release();
        assert_eq!(lock.holder(), Some(main));
        assert_eq!(kernel.status(main), Some(ThreadStatus::Ready));
        kernel.yield_now();
        assert_eq!(kernel.current(), main);
        assert!(lock.held_by_current());
    }

    #[test]
    fn signal_without_waiters_is_lost() {
        let (kernel, cpu) = boot_default();
        let lock = kernel.lock();
        let cv = kernel.condvar();
        lock.acquire();
        cv.signal(&lock);
        cv.broadcast(&lock);
        assert_eq!(cv.waiters(), 0);
        assert!(cpu.switches().is_empty());
    }

    #[test]
    fn signal_picks_the_highest_priority_waiter() {
        let (kernel, _cpu) = boot_default();
        let main = kernel.current();
        let lock = kernel.lock();
        let cv = kernel.condvar();
        let mut waiters = Vec::new();
        for priority in [35, 50, 40] {
            let tid = kernel.thread("waiter").priority(priority).spawn(|| {}).unwrap();
            lock.acquire();
            cv.wait(&lock);
            assert_eq!(kernel.current(), main);
            waiters.push(tid);
        }

        lock.acquire();
        cv.signal(&lock);
        lock.release();
        assert_eq!(kernel.current(), waiters[1]);
        assert_eq!(lock.holder(), Some(waiters[1]));
        assert_eq!(cv.waiters(), 2);
    }

    #[test]
    fn broadcast_wakes_everyone_in_priority_order() {
        let (kernel, _cpu) = boot_default();
        let main = kernel.current();
        let lock = kernel.lock();
        let cv = kernel.condvar();
        let mut waiters = Vec::new();
        for priority in [35, 50, 40] {
            let tid = kernel.thread("waiter").priority(priority).spawn(|| {}).unwrap();
            lock.acquire();
            cv.wait(&lock);
            waiters.push(tid);
        }

        lock.acquire();
        cv.broadcast(&lock);
        assert_eq!(cv.waiters(), 0);
        assert_eq!(kernel.current(), main);

        let mut order = Vec::new();
        lock.release();
        while kernel.current() != main {
            order.push(kernel.current());
            lock.release();
            kernel.exit();
        }
        assert_eq!(order, vec![waiters[1], waiters[2], waiters[0]]);
    }

    #[test]
    #[should_panic(expected = "without holding lock")]
    fn wait_without_the_lock_is_fatal() {
        let (kernel, _cpu) = boot_default();
        let lock = kernel.lock();
        let cv = kernel.condvar();
        cv.wait(&lock);
    }
}
