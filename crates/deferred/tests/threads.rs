//! Races between producers, observers and waiters

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use deferred::{Deferred, Outcome};

#[test]
fn test_concurrent_completion_single_winner() {
    for _ in 0..50 {
        let deferred: Deferred<usize> = Deferred::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        deferred.on_done(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let deferred = deferred.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    deferred.complete_value(i)
                })
            })
            .collect();

        let winners: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(winners.iter().filter(|w| **w).count(), 1);

        let winner = winners.iter().position(|w| *w).unwrap();
        assert_eq!(deferred.result(None), Ok(winner));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_observers_registered_during_completion_fire_once() {
    for _ in 0..50 {
        let deferred: Deferred<u32> = Deferred::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(5));

        let registrars: Vec<_> = (0..4)
            .map(|_| {
                let deferred = deferred.clone();
                let fired = Arc::clone(&fired);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..25 {
                        let fired = Arc::clone(&fired);
                        deferred.register_observer(move |outcome: &Outcome<u32>| {
                            assert_eq!(*outcome, Outcome::Value(11));
                            fired.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        barrier.wait();
        deferred.complete_value(11);

        for handle in registrars {
            handle.join().unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 100);
    }
}

#[test]
fn test_many_waiters_are_released() {
    let deferred: Deferred<&'static str> = Deferred::new();

    let waiters: Vec<_> = (0..6)
        .map(|_| {
            let deferred = deferred.clone();
            thread::spawn(move || deferred.result(Some(Duration::from_secs(10))))
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    deferred.complete_value("ready");

    for handle in waiters {
        assert_eq!(handle.join().unwrap(), Ok("ready"));
    }
}

#[test]
fn test_cancelled_producer_never_runs() {
    let deferred: Deferred<u32> = Deferred::new();
    let ran = Arc::new(AtomicUsize::new(0));
    assert!(deferred.cancel());

    let producer = deferred.clone();
    let ran_in_producer = Arc::clone(&ran);
    thread::spawn(move || {
        if producer.set_running_or_notify_cancelled() {
            ran_in_producer.fetch_add(1, Ordering::SeqCst);
            producer.complete_value(1);
        }
    })
    .join()
    .unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(deferred.cancelled());
    assert!(deferred.result(None).unwrap_err().is_cancelled());
}

#[test]
fn test_cancel_racing_completion_stays_consistent() {
    for i in 0..200 {
        let deferred: Deferred<u32> = Deferred::new();
        assert!(deferred.cancel());

        let barrier = Arc::new(Barrier::new(2));
        let gate = {
            let deferred = deferred.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                deferred.set_running_or_notify_cancelled()
            })
        };
        let completer = {
            let deferred = deferred.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                deferred.complete_value(i)
            })
        };

        assert!(!gate.join().unwrap());
        let value_won = completer.join().unwrap();

        assert!(!deferred.cancel_pending());
        assert_eq!(deferred.cancelled(), !value_won);
        match deferred.result(None) {
            Ok(value) => {
                assert!(value_won);
                assert_eq!(value, i);
            }
            Err(err) => {
                assert!(!value_won);
                assert!(err.is_cancelled());
            }
        }
    }
}
