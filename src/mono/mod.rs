//! The `mono` module provides the zero-or-one sequence type.

use std::{
    error::Error,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use crate::errors::operator_failure;
use crate::flux::{BlockResult, Flux};
use crate::observer::Observer;
use crate::scheduler::Scheduler;
use crate::subscription::subscribe::{Disposable, Subscribeable, Subscriber};

/// An immutable, lazily evaluated sequence of at most one asynchronous
/// value.
///
/// `Mono` carries the same laziness and per-subscription independence as
/// [`Flux`]; the type narrows the arity so callers can express "one result
/// or an error" signatures. Internally it is a `Flux` whose constructors
/// never emit more than a single value before terminating.
pub struct Mono<T> {
    flux: Flux<T>,
}

impl<T> Clone for Mono<T> {
    fn clone(&self) -> Self {
        Mono {
            flux: self.flux.clone(),
        }
    }
}

impl<T: Send + 'static> Mono<T> {
    pub(crate) fn from_flux(flux: Flux<T>) -> Self {
        Mono { flux }
    }

    /// Emits the given value to every subscriber, then completes.
    pub fn just(value: T) -> Mono<T>
    where
        T: Clone + Sync,
    {
        Mono::from_flux(Flux::new(move |mut o: Subscriber<T>| {
            o.next(value.clone());
            o.complete();
        }))
    }

    /// Completes immediately without emitting a value.
    pub fn empty() -> Mono<T> {
        Mono::from_flux(Flux::empty())
    }

    /// Signals the given error immediately.
    pub fn error(error: Arc<dyn Error + Send + Sync>) -> Mono<T> {
        Mono::from_flux(Flux::error(error))
    }

    /// Runs `supplier` once per subscription and emits its result. A panic
    /// inside the supplier is caught and signalled as the sequence's error.
    pub fn from_callable<F>(supplier: F) -> Mono<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let supplier = Arc::new(supplier);
        Mono::from_flux(Flux::new(move |mut o: Subscriber<T>| {
            match catch_unwind(AssertUnwindSafe(|| supplier())) {
                Ok(value) => {
                    o.next(value);
                    o.complete();
                }
                Err(payload) => o.error(operator_failure(payload)),
            }
        }))
    }

    /// Defers assembly: `factory` builds a fresh `Mono` for each subscriber.
    pub fn defer<F>(factory: F) -> Mono<T>
    where
        F: Fn() -> Mono<T> + Send + Sync + 'static,
    {
        Mono::from_flux(Flux::new(move |o: Subscriber<T>| {
            factory().flux.subscribe_raw(o);
        }))
    }

    /// Transforms the value with `f`. A panic inside `f` becomes the error
    /// signal.
    pub fn map<U, F>(&self, f: F) -> Mono<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Mono::from_flux(self.flux.map(f))
    }

    /// Drops the value when `predicate` rejects it, turning this into an
    /// empty completion.
    pub fn filter<P>(&self, predicate: P) -> Mono<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Mono::from_flux(self.flux.filter(predicate))
    }

    /// Maps the value to another `Mono` and flattens it, chaining two
    /// asynchronous steps.
    pub fn flat_map<R, F>(&self, project: F) -> Mono<R>
    where
        R: Send + 'static,
        F: Fn(T) -> Mono<R> + Send + Sync + 'static,
    {
        Mono::from_flux(self.flux.flat_map(move |v| project(v).flux))
    }

    /// Combines this value with `other`'s value into a pair. The pair is
    /// empty when either side is empty.
    pub fn zip_with<U: Send + 'static>(&self, other: &Mono<U>) -> Mono<(T, U)> {
        Mono::from_flux(self.flux.zip(&other.flux))
    }

    /// Performs the subscription hop on the given scheduler. See
    /// [`Flux::subscribe_on`].
    pub fn subscribe_on(&self, scheduler: &Scheduler) -> Mono<T> {
        Mono::from_flux(self.flux.subscribe_on(scheduler))
    }

    /// Re-assigns the execution context for everything downstream. See
    /// [`Flux::publish_on`].
    pub fn publish_on(&self, scheduler: &Scheduler) -> Mono<T> {
        Mono::from_flux(self.flux.publish_on(scheduler))
    }

    /// Widens this sequence back into a [`Flux`], keeping its at-most-one
    /// emission behavior.
    pub fn as_flux(&self) -> Flux<T> {
        self.flux.clone()
    }

    /// Blocking escape hatch: subscribes and suspends the calling thread
    /// until this `Mono` terminates, returning `Some(value)` or `None` for
    /// an empty completion.
    ///
    /// # Errors
    ///
    /// The sequence's error when it errors.
    pub fn block(&self) -> BlockResult<T> {
        self.flux.block_inner(None)
    }

    /// Like [`Mono::block`] but gives up after `timeout`, disposing the
    /// execution and failing with `TimeoutExceeded`.
    ///
    /// # Errors
    ///
    /// The sequence's error, or `TimeoutExceeded` when the deadline passes
    /// first.
    pub fn block_timeout(&self, timeout: Duration) -> BlockResult<T> {
        self.flux.block_inner(Some(timeout))
    }
}

impl<T: Send + 'static> Subscribeable for Mono<T> {
    type Item = T;

    fn subscribe(&self, subscriber: Subscriber<T>) -> Disposable {
        self.flux.subscribe(subscriber)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use super::*;

    #[test]
    fn from_callable_runs_once_per_subscription() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_c = Arc::clone(&calls);
        let mono = Mono::from_callable(move || calls_c.fetch_add(1, Ordering::SeqCst) + 1);

        assert_eq!(calls.load(Ordering::SeqCst), 0, "assembly must be lazy");
        assert_eq!(mono.block().unwrap(), Some(1));
        assert_eq!(mono.block().unwrap(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn from_callable_panic_becomes_error_signal() {
        let mono: Mono<i32> = Mono::from_callable(|| panic!("supplier exploded"));

        let failed = Arc::new(Mutex::new(String::new()));
        let failed_c = Arc::clone(&failed);
        let subscriber = Subscriber::new(
            |_| panic!("no value expected"),
            move |e| *failed_c.lock().unwrap() = e.to_string(),
            || panic!("no completion expected"),
        );
        mono.subscribe(subscriber);

        assert!(
            failed.lock().unwrap().contains("supplier exploded"),
            "panic payload should be carried in the error"
        );
    }

    #[test]
    fn filter_rejection_yields_empty_completion() {
        let outcome = Mono::just(7).filter(|v| *v > 10).block();
        assert_eq!(outcome.unwrap(), None);
    }

    #[test]
    fn flat_map_chains_two_monos() {
        let outcome = Mono::just(6)
            .flat_map(|v| Mono::just(v * 7))
            .block();
        assert_eq!(outcome.unwrap(), Some(42));
    }

    #[test]
    fn zip_with_empty_side_is_empty() {
        let outcome = Mono::just(1).zip_with(&Mono::<i32>::empty()).block();
        assert_eq!(outcome.unwrap(), None);
    }
}
