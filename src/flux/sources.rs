//! Constructors that produce `Flux` sequences from plain values, iterators,
//! ranges, programmatic emitters and timers.

use std::{error::Error, sync::Arc, time::Duration};

use crate::observer::Observer;
use crate::scheduler::timer_runtime;
use crate::subscription::subscribe::Subscriber;

use super::Flux;

/// Bridge handed to the closure given to [`Flux::create`]. The closure drives
/// the sequence by calling `next`, then `complete` or `error` at most once;
/// emitters that run for a while should poll [`Emitter::is_disposed`] so a
/// disposed subscription stops consuming the producer.
pub struct Emitter<T> {
    subscriber: Subscriber<T>,
}

impl<T> Emitter<T> {
    /// Emits one value downstream. Ignored once the sequence terminated.
    pub fn next(&mut self, value: T) {
        self.subscriber.next(value);
    }

    /// Terminates the sequence successfully.
    pub fn complete(&mut self) {
        self.subscriber.complete();
    }

    /// Terminates the sequence with `error`.
    pub fn error(&mut self, error: Arc<dyn Error + Send + Sync>) {
        self.subscriber.error(error);
    }

    /// `true` once the subscription terminated for any reason, including
    /// disposal from the consumer side.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.subscriber.is_closed()
    }
}

impl<T: Clone + Send + Sync + 'static> Flux<T> {
    /// Emits the given values in order, then completes. The values are
    /// captured eagerly, once; every subscription replays clones of them.
    pub fn just(values: impl IntoIterator<Item = T>) -> Flux<T> {
        let values: Arc<Vec<T>> = Arc::new(values.into_iter().collect());
        Flux::new(move |mut o: Subscriber<T>| {
            for value in values.iter() {
                if o.is_closed() {
                    return;
                }
                o.next(value.clone());
            }
            o.complete();
        })
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Emits each item produced by a fresh iterator per subscription, then
    /// completes. The iterator itself is built lazily, inside the
    /// subscription.
    pub fn from_iter<I>(iterable: I) -> Flux<T>
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    {
        Flux::new(move |mut o: Subscriber<T>| {
            for value in iterable.clone() {
                if o.is_closed() {
                    return;
                }
                o.next(value);
            }
            o.complete();
        })
    }

    /// Completes immediately without emitting anything.
    pub fn empty() -> Flux<T> {
        Flux::new(|mut o: Subscriber<T>| {
            o.complete();
        })
    }

    /// Signals the given error immediately, emitting nothing.
    pub fn error(error: Arc<dyn Error + Send + Sync>) -> Flux<T> {
        Flux::new(move |mut o: Subscriber<T>| {
            o.error(Arc::clone(&error));
        })
    }

    /// Defers assembly: `factory` is invoked once per subscription and the
    /// sequence it returns is subscribed in its place, so each subscriber
    /// observes a freshly built source. A panic inside the factory is not
    /// caught; it unwinds into the subscribing call.
    pub fn defer<F>(factory: F) -> Flux<T>
    where
        F: Fn() -> Flux<T> + Send + Sync + 'static,
    {
        Flux::new(move |o: Subscriber<T>| {
            factory().subscribe_raw(o);
        })
    }

    /// Builds a sequence from a programmatic emitter. `producer` runs once
    /// per subscription on the subscribing context and pushes signals through
    /// the [`Emitter`] it receives.
    pub fn create<F>(producer: F) -> Flux<T>
    where
        F: Fn(Emitter<T>) + Send + Sync + 'static,
    {
        Flux::new(move |o: Subscriber<T>| {
            producer(Emitter { subscriber: o });
        })
    }
}

impl Flux<i64> {
    /// Emits `count` consecutive integers starting at `start`, then
    /// completes.
    pub fn range(start: i64, count: u64) -> Flux<i64> {
        Flux::new(move |mut o: Subscriber<i64>| {
            for offset in 0..count {
                if o.is_closed() {
                    return;
                }
                o.next(start + offset as i64);
            }
            o.complete();
        })
    }
}

impl Flux<u64> {
    /// Emits an increasing counter, starting at `0`, every `period` on the
    /// shared timer thread. The sequence never completes on its own; it is
    /// bounded by operators such as [`Flux::take`] or stopped by disposing
    /// the subscription, either of which also releases the timer task.
    pub fn interval(period: Duration) -> Flux<u64> {
        Flux::new(move |o: Subscriber<u64>| {
            let state = o.state();
            let mut o = o;
            let task = timer_runtime().spawn(async move {
                let mut tick: u64 = 0;
                loop {
                    tokio::time::sleep(period).await;
                    if o.is_closed() {
                        break;
                    }
                    o.next(tick);
                    tick += 1;
                }
            });
            state.on_terminate(move || task.abort());
        })
    }
}
