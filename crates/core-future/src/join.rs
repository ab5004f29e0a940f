//! Combinators over many deferreds
//!
//! Both functions count down a shared counter from each input's listener;
//! the last input to finish completes the joined result.

use crate::deferred::{Deferred, Promise};
use crate::error::RpcError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Wait for every input to finish, keeping each outcome in input order
pub fn join_all<T>(inputs: Vec<Deferred<T>>) -> Deferred<Vec<Result<T, RpcError>>>
where
    T: Clone + Send + 'static,
{
    if inputs.is_empty() {
        return Deferred::value(Vec::new());
    }

    let promise = Arc::new(Promise::new());
    let joined = promise.deferred();
    let remaining = Arc::new(AtomicUsize::new(inputs.len()));
    let slots: Arc<Mutex<Vec<Option<Result<T, RpcError>>>>> =
        Arc::new(Mutex::new(vec![None; inputs.len()]));

    forward_interrupts(&promise, &inputs);

    for (index, input) in inputs.into_iter().enumerate() {
        let promise = promise.clone();
        let remaining = remaining.clone();
        let slots = slots.clone();
        input.respond(move |result| {
            slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(result.clone());
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let outcomes = std::mem::take(&mut *slots.lock().unwrap_or_else(PoisonError::into_inner))
                    .into_iter()
                    .map(|slot| slot.unwrap_or(Err(RpcError::BrokenPromise)))
                    .collect();
                promise.succeed(outcomes);
            }
        });
    }

    joined
}

/// Wait for every input to succeed; fail as soon as one fails
pub fn collect<T>(inputs: Vec<Deferred<T>>) -> Deferred<Vec<T>>
where
    T: Clone + Send + 'static,
{
    if inputs.is_empty() {
        return Deferred::value(Vec::new());
    }

    let promise = Arc::new(Promise::new());
    let collected = promise.deferred();
    let remaining = Arc::new(AtomicUsize::new(inputs.len()));
    let slots: Arc<Mutex<Vec<Option<T>>>> = Arc::new(Mutex::new(vec![None; inputs.len()]));

    forward_interrupts(&promise, &inputs);

    for (index, input) in inputs.into_iter().enumerate() {
        let promise = promise.clone();
        let remaining = remaining.clone();
        let slots = slots.clone();
        input.respond(move |result| match result {
            Ok(value) => {
                slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(value.clone());
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let values: Option<Vec<T>> =
                        std::mem::take(&mut *slots.lock().unwrap_or_else(PoisonError::into_inner))
                            .into_iter()
                            .collect();
                    match values {
                        Some(values) => promise.succeed(values),
                        None => promise.fail(RpcError::BrokenPromise),
                    };
                }
            }
            Err(error) => {
                promise.fail(error.clone());
            }
        });
    }

    collected
}

fn forward_interrupts<T, U>(promise: &Promise<U>, inputs: &[Deferred<T>])
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
{
    let inputs = inputs.to_vec();
    promise.set_interrupt_handler(move |reason| {
        for input in inputs {
            input.raise(reason.clone());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_join_all_waits_for_every_input() {
        let promises: Vec<Promise<usize>> = (0..3).map(|_| Promise::new()).collect();
        let joined = join_all(promises.iter().map(Promise::deferred).collect());

        promises[2].succeed(2);
        promises[0].fail(RpcError::Cancelled);
        assert!(!joined.is_defined());
        promises[1].succeed(1);

        let outcomes = joined.poll().unwrap().unwrap();
        assert!(matches!(outcomes[0], Err(RpcError::Cancelled)));
        assert_eq!(outcomes[1].as_ref().unwrap(), &1);
        assert_eq!(outcomes[2].as_ref().unwrap(), &2);
    }

    #[test]
    fn test_join_all_empty() {
        let joined = join_all::<u8>(Vec::new());
        assert!(joined.poll().unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_join_all_across_threads() {
        let promises: Vec<Promise<usize>> = (0..32).map(|_| Promise::new()).collect();
        let joined = join_all(promises.iter().map(Promise::deferred).collect());

        let handles: Vec<_> = promises
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis((i % 5) as u64));
                    p.succeed(i);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let outcomes = joined.get(Duration::from_secs(5)).unwrap();
        let values: Vec<usize> = outcomes.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_collect_fails_fast() {
        let first: Promise<u8> = Promise::new();
        let second: Promise<u8> = Promise::new();
        let collected = collect(vec![first.deferred(), second.deferred()]);

        second.fail(RpcError::application("second failed"));
        assert!(matches!(
            collected.poll(),
            Some(Err(RpcError::Application { .. }))
        ));

        first.succeed(1);
        assert!(matches!(
            collected.poll(),
            Some(Err(RpcError::Application { .. }))
        ));
    }

    #[test]
    fn test_collect_preserves_order() {
        let promises: Vec<Promise<&'static str>> = (0..3).map(|_| Promise::new()).collect();
        let collected = collect(promises.iter().map(Promise::deferred).collect());

        promises[1].succeed("b");
        promises[2].succeed("c");
        promises[0].succeed("a");

        assert_eq!(collected.poll().unwrap().unwrap(), vec!["a", "b", "c"]);
    }
}
