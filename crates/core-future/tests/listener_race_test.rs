//! Listener delivery under concurrency
//!
//! Listeners registered from many threads while another thread completes the
//! promise must each fire exactly once, with the terminal outcome.

use relay_core_future::{join_all, Deferred, Promise, RpcError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const REGISTRARS: usize = 8;
const PER_THREAD: usize = 50;

fn race(outcome: Result<u32, RpcError>) -> (usize, usize) {
    let promise = Promise::new();
    let deferred: Deferred<u32> = promise.deferred();
    let successes = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(REGISTRARS + 1));

    let registrars: Vec<_> = (0..REGISTRARS)
        .map(|_| {
            let deferred = deferred.clone();
            let successes = successes.clone();
            let failures = failures.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for _ in 0..PER_THREAD {
                    let successes = successes.clone();
                    let failures = failures.clone();
                    deferred.add_listener(
                        move |value| {
                            assert_eq!(*value, 7);
                            successes.fetch_add(1, Ordering::SeqCst);
                        },
                        move |_| {
                            failures.fetch_add(1, Ordering::SeqCst);
                        },
                    );
                }
            })
        })
        .collect();

    start.wait();
    thread::yield_now();
    assert!(promise.complete(outcome));

    for registrar in registrars {
        registrar.join().unwrap();
    }
    (
        successes.load(Ordering::SeqCst),
        failures.load(Ordering::SeqCst),
    )
}

#[test]
fn test_listeners_racing_success_fire_once() {
    for _ in 0..20 {
        assert_eq!(race(Ok(7)), (REGISTRARS * PER_THREAD, 0));
    }
}

#[test]
fn test_listeners_racing_failure_fire_once() {
    for _ in 0..20 {
        assert_eq!(race(Err(RpcError::Cancelled)), (0, REGISTRARS * PER_THREAD));
    }
}

#[test]
fn test_only_first_completion_wins() {
    let promise = Arc::new(Promise::new());
    let deferred: Deferred<usize> = promise.deferred();
    let winners = Arc::new(AtomicUsize::new(0));

    let completers: Vec<_> = (0..8)
        .map(|i| {
            let promise = promise.clone();
            let winners = winners.clone();
            thread::spawn(move || {
                if promise.succeed(i) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for completer in completers {
        completer.join().unwrap();
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    let value = deferred.get(Duration::from_secs(1)).unwrap();
    assert!(value < 8);
}

#[test]
fn test_join_all_across_threads() {
    let promises: Vec<Promise<usize>> = (0..32).map(|_| Promise::new()).collect();
    let joined = join_all(promises.iter().map(|p| p.deferred()).collect());

    let handles: Vec<_> = promises
        .into_iter()
        .enumerate()
        .map(|(i, promise)| {
            thread::spawn(move || {
                if i % 5 == 0 {
                    promise.fail(RpcError::application(format!("job {}", i)));
                } else {
                    promise.succeed(i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let results = joined.get(Duration::from_secs(1)).unwrap();
    assert_eq!(results.len(), 32);
    for (i, result) in results.iter().enumerate() {
        match result {
            Ok(value) => assert_eq!(*value, i),
            Err(_) => assert_eq!(i % 5, 0),
        }
    }
}
