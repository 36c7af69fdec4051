//! The `flux` module provides the zero-to-many sequence type and its
//! operators.

use std::{
    collections::VecDeque,
    error::Error,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::errors::operator_failure;
use crate::mono::Mono;
use crate::observer::Observer;
use crate::scheduler::Scheduler;
use crate::subscription::subscribe::{Disposable, Phase, Subscribeable, Subscriber};

mod sources;

pub use sources::Emitter;

#[cfg(test)]
mod tests;

type SubscribeFn<T> = Arc<dyn Fn(Subscriber<T>) + Send + Sync>;

/// An immutable, lazily evaluated sequence of zero or more asynchronous
/// values.
///
/// A `Flux` is a description of a pipeline, not a running one: constructing
/// it and applying operators performs no work. Work starts when `subscribe`
/// is called, and every subscription is an independent execution: a finite
/// `Flux` can be subscribed to any number of times and replays the same
/// values each time. Operators take `&self` and return a new `Flux` wrapping
/// the receiver, which stays usable and unchanged.
///
/// # Example
///
/// ```
/// use fluxion::{Flux, Subscriber};
/// use fluxion::subscribe::Subscribeable;
///
/// let squares = Flux::range(1, 5).map(|n| n * n);
///
/// let subscriber = Subscriber::new(
///     |v| println!("next: {}", v),
///     |e| eprintln!("error: {}", e),
///     || println!("complete"),
/// );
/// squares.subscribe(subscriber);
/// ```
pub struct Flux<T> {
    subscribe_fn: SubscribeFn<T>,
}

impl<T> Clone for Flux<T> {
    fn clone(&self) -> Self {
        Flux {
            subscribe_fn: Arc::clone(&self.subscribe_fn),
        }
    }
}

// Outer-done flag plus the number of inner sequences still live; the last
// participant to finish completes the downstream.
struct MergeProgress {
    outer_done: bool,
    active: usize,
}

struct ZipBuffers<T, U> {
    left: VecDeque<T>,
    right: VecDeque<U>,
    left_done: bool,
    right_done: bool,
}

fn drain_pairs<T, U>(buffers: &mut ZipBuffers<T, U>, out: &Arc<Mutex<Subscriber<(T, U)>>>) {
    while !buffers.left.is_empty() && !buffers.right.is_empty() {
        let left = buffers.left.pop_front().unwrap();
        let right = buffers.right.pop_front().unwrap();
        out.lock().unwrap().next((left, right));
    }
    // Once a completed side has drained, no further pair is possible.
    if (buffers.left_done && buffers.left.is_empty())
        || (buffers.right_done && buffers.right.is_empty())
    {
        out.lock().unwrap().complete();
    }
}

enum Signal<T> {
    Item(T),
    Fault(Arc<dyn Error + Send + Sync>),
    Done,
}

// Queue of pending signals for one publish_on subscription. A drain task is
// leased from the target scheduler only while the queue is non-empty;
// `draining` stops a second task from being scheduled so delivery order is
// kept on multi-threaded pools.
struct PumpState<T> {
    queue: VecDeque<Signal<T>>,
    draining: bool,
}

fn pump_signal<T: Send + 'static>(
    pump: &Arc<Mutex<PumpState<T>>>,
    out: &Arc<Mutex<Subscriber<T>>>,
    scheduler: &Scheduler,
    signal: Signal<T>,
) {
    let lease = {
        let mut p = pump.lock().unwrap();
        p.queue.push_back(signal);
        if p.draining {
            false
        } else {
            p.draining = true;
            true
        }
    };
    if lease {
        let pump_c = Arc::clone(pump);
        let out_c = Arc::clone(out);
        if let Err(closed) = scheduler.schedule(move || drain_pump(&pump_c, &out_c)) {
            pump.lock().unwrap().queue.clear();
            out.lock().unwrap().error(Arc::new(closed));
        }
    }
}

fn drain_pump<T>(pump: &Arc<Mutex<PumpState<T>>>, out: &Arc<Mutex<Subscriber<T>>>) {
    loop {
        let signal = {
            let mut p = pump.lock().unwrap();
            match p.queue.pop_front() {
                Some(signal) => signal,
                None => {
                    p.draining = false;
                    return;
                }
            }
        };
        match signal {
            Signal::Item(v) => out.lock().unwrap().next(v),
            Signal::Fault(e) => {
                out.lock().unwrap().error(e);
                // Leaving `draining` set suppresses any further lease.
                pump.lock().unwrap().queue.clear();
                return;
            }
            Signal::Done => {
                out.lock().unwrap().complete();
                pump.lock().unwrap().queue.clear();
                return;
            }
        }
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Creates a `Flux` from the function invoked on each subscription. The
    /// function receives the pipeline-facing `Subscriber` and is responsible
    /// for emitting signals to it; long-running emitters must check
    /// `Subscriber::is_closed` before each emission so disposal can take
    /// effect.
    pub fn new(subscribe_fn: impl Fn(Subscriber<T>) + Send + Sync + 'static) -> Self {
        Flux {
            subscribe_fn: Arc::new(subscribe_fn),
        }
    }

    pub(crate) fn subscribe_raw(&self, subscriber: Subscriber<T>) {
        (self.subscribe_fn)(subscriber);
    }

    /// Transforms each value with `f`. A panic inside `f` is caught and
    /// converted into the sequence's error signal.
    pub fn map<U, F>(&self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Flux::new(move |o: Subscriber<U>| {
            let state = o.state();
            let o_shared = Arc::new(Mutex::new(o));
            let o_cloned_e = Arc::clone(&o_shared);
            let o_cloned_c = Arc::clone(&o_shared);
            let f = Arc::clone(&f);

            let u = Subscriber::forward(
                state,
                move |v| match catch_unwind(AssertUnwindSafe(|| f(v))) {
                    Ok(mapped) => o_shared.lock().unwrap().next(mapped),
                    Err(payload) => o_shared.lock().unwrap().error(operator_failure(payload)),
                },
                move |e| o_cloned_e.lock().unwrap().error(e),
                move || o_cloned_c.lock().unwrap().complete(),
            );
            source.subscribe_raw(u);
        })
    }

    /// Keeps only the values for which `predicate` returns `true`. A panic
    /// inside the predicate becomes the error signal.
    pub fn filter<P>(&self, predicate: P) -> Flux<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        Flux::new(move |o: Subscriber<T>| {
            let state = o.state();
            let o_shared = Arc::new(Mutex::new(o));
            let o_cloned_e = Arc::clone(&o_shared);
            let o_cloned_c = Arc::clone(&o_shared);
            let predicate = Arc::clone(&predicate);

            let u = Subscriber::forward(
                state,
                move |v| match catch_unwind(AssertUnwindSafe(|| predicate(&v))) {
                    Ok(true) => o_shared.lock().unwrap().next(v),
                    Ok(false) => {}
                    Err(payload) => o_shared.lock().unwrap().error(operator_failure(payload)),
                },
                move |e| o_cloned_e.lock().unwrap().error(e),
                move || o_cloned_c.lock().unwrap().complete(),
            );
            source.subscribe_raw(u);
        })
    }

    /// Emits at most the first `n` values, then synthesizes completion.
    /// Completing the shared execution state is what cancels the upstream
    /// source: emitters observe it through `Subscriber::is_closed` and stop,
    /// and any periodic timer held by the execution is released.
    pub fn take(&self, n: usize) -> Flux<T> {
        let source = self.clone();
        Flux::new(move |mut o: Subscriber<T>| {
            if n == 0 {
                o.complete();
                return;
            }
            let state = o.state();
            let o_shared = Arc::new(Mutex::new(o));
            let o_cloned_e = Arc::clone(&o_shared);
            let o_cloned_c = Arc::clone(&o_shared);

            let mut taken = 0usize;
            let u = Subscriber::forward(
                state,
                move |v| {
                    if taken >= n {
                        return;
                    }
                    taken += 1;
                    o_shared.lock().unwrap().next(v);
                    if taken == n {
                        o_shared.lock().unwrap().complete();
                    }
                },
                move |e| o_cloned_e.lock().unwrap().error(e),
                move || o_cloned_c.lock().unwrap().complete(),
            );
            source.subscribe_raw(u);
        })
    }

    /// Maps each value to an inner `Flux` and merges the inner emissions into
    /// one sequence, in arrival order. Order within one inner sequence is
    /// preserved; no ordering is promised across concurrently active inner
    /// sequences. The merged sequence completes only once the outer sequence
    /// and every inner sequence have completed; any error short-circuits.
    pub fn flat_map<R, F>(&self, project: F) -> Flux<R>
    where
        R: Send + 'static,
        F: Fn(T) -> Flux<R> + Send + Sync + 'static,
    {
        let source = self.clone();
        let project = Arc::new(project);
        Flux::new(move |o: Subscriber<R>| {
            let state = o.state();
            let state_inner = Arc::clone(&state);
            let o_shared = Arc::new(Mutex::new(o));
            let o_cloned_e = Arc::clone(&o_shared);
            let o_cloned_c = Arc::clone(&o_shared);
            let project = Arc::clone(&project);

            let in_flight = Arc::new(Mutex::new(MergeProgress {
                outer_done: false,
                active: 0,
            }));
            let in_flight_c = Arc::clone(&in_flight);

            let u = Subscriber::forward(
                state,
                move |v| {
                    let inner = match catch_unwind(AssertUnwindSafe(|| project(v))) {
                        Ok(inner) => inner,
                        Err(payload) => {
                            o_shared.lock().unwrap().error(operator_failure(payload));
                            return;
                        }
                    };
                    in_flight.lock().unwrap().active += 1;

                    let o_next = Arc::clone(&o_shared);
                    let o_err = Arc::clone(&o_shared);
                    let o_done = Arc::clone(&o_shared);
                    let in_flight = Arc::clone(&in_flight);
                    let inner_sub = Subscriber::forward(
                        Arc::clone(&state_inner),
                        move |k| o_next.lock().unwrap().next(k),
                        move |e| o_err.lock().unwrap().error(e),
                        move || {
                            let mut progress = in_flight.lock().unwrap();
                            progress.active -= 1;
                            if progress.outer_done && progress.active == 0 {
                                o_done.lock().unwrap().complete();
                            }
                        },
                    );
                    inner.subscribe_raw(inner_sub);
                },
                move |e| o_cloned_e.lock().unwrap().error(e),
                move || {
                    let mut progress = in_flight_c.lock().unwrap();
                    progress.outer_done = true;
                    if progress.active == 0 {
                        o_cloned_c.lock().unwrap().complete();
                    }
                },
            );
            source.subscribe_raw(u);
        })
    }

    /// Pairs the nth value of this sequence with the nth value of `other`.
    /// The paired sequence completes as soon as either side completes and its
    /// buffered values are drained; an error on either side errors the pair
    /// sequence immediately.
    pub fn zip<U: Send + 'static>(&self, other: &Flux<U>) -> Flux<(T, U)> {
        let left_source = self.clone();
        let right_source = other.clone();
        Flux::new(move |o: Subscriber<(T, U)>| {
            let state = o.state();
            let o_shared = Arc::new(Mutex::new(o));

            let buffers = Arc::new(Mutex::new(ZipBuffers {
                left: VecDeque::new(),
                right: VecDeque::new(),
                left_done: false,
                right_done: false,
            }));

            let left_sub = {
                let buffers_n = Arc::clone(&buffers);
                let buffers_c = Arc::clone(&buffers);
                let o_n = Arc::clone(&o_shared);
                let o_e = Arc::clone(&o_shared);
                let o_c = Arc::clone(&o_shared);
                Subscriber::forward(
                    Arc::clone(&state),
                    move |v| {
                        let mut b = buffers_n.lock().unwrap();
                        b.left.push_back(v);
                        drain_pairs(&mut b, &o_n);
                    },
                    move |e| o_e.lock().unwrap().error(e),
                    move || {
                        let mut b = buffers_c.lock().unwrap();
                        b.left_done = true;
                        drain_pairs(&mut b, &o_c);
                    },
                )
            };

            let right_sub = {
                let buffers_n = Arc::clone(&buffers);
                let buffers_c = Arc::clone(&buffers);
                let o_n = Arc::clone(&o_shared);
                let o_e = Arc::clone(&o_shared);
                let o_c = Arc::clone(&o_shared);
                Subscriber::forward(
                    Arc::clone(&state),
                    move |v| {
                        let mut b = buffers_n.lock().unwrap();
                        b.right.push_back(v);
                        drain_pairs(&mut b, &o_n);
                    },
                    move |e| o_e.lock().unwrap().error(e),
                    move || {
                        let mut b = buffers_c.lock().unwrap();
                        b.right_done = true;
                        drain_pairs(&mut b, &o_c);
                    },
                )
            };

            left_source.subscribe_raw(left_sub);
            right_source.subscribe_raw(right_sub);
        })
    }

    /// Buffers every value and emits the whole buffer as a single `Mono`
    /// value when the upstream completes. Never emits partial results: on an
    /// upstream error the buffer is abandoned.
    pub fn collect(&self) -> Mono<Vec<T>> {
        let source = self.clone();
        Mono::from_flux(Flux::new(move |o: Subscriber<Vec<T>>| {
            let state = o.state();
            let o_shared = Arc::new(Mutex::new(o));
            let o_cloned_e = Arc::clone(&o_shared);
            let o_cloned_c = Arc::clone(&o_shared);

            let buffer = Arc::new(Mutex::new(Vec::new()));
            let buffer_c = Arc::clone(&buffer);

            let u = Subscriber::forward(
                state,
                move |v| buffer.lock().unwrap().push(v),
                move |e| o_cloned_e.lock().unwrap().error(e),
                move || {
                    let values = std::mem::take(&mut *buffer_c.lock().unwrap());
                    let mut o = o_cloned_c.lock().unwrap();
                    o.next(values);
                    o.complete();
                },
            );
            source.subscribe_raw(u);
        }))
    }

    /// Performs the subscription hop on the given scheduler, which places the
    /// source stage (and every stage up to the first `publish_on`) on that
    /// context. When `subscribe_on` appears more than once in a pipeline the
    /// occurrence nearest the source hops last and therefore governs the
    /// source; later occurrences have no effect on it.
    pub fn subscribe_on(&self, scheduler: &Scheduler) -> Flux<T> {
        let source = self.clone();
        let scheduler = scheduler.clone();
        Flux::new(move |o: Subscriber<T>| {
            let source = source.clone();
            let slot = Arc::new(Mutex::new(Some(o)));
            let slot_failed = Arc::clone(&slot);
            let outcome = scheduler.schedule(move || {
                if let Some(o) = slot.lock().unwrap().take() {
                    source.subscribe_raw(o);
                }
            });
            if let Err(closed) = outcome {
                if let Some(mut o) = slot_failed.lock().unwrap().take() {
                    o.error(Arc::new(closed));
                }
            }
        })
    }

    /// Re-assigns the execution context for everything downstream of this
    /// point. Signals are queued and a drain task is leased from the target
    /// scheduler per batch, so delivery stays ordered on any pool and the
    /// worker is released while the source is quiet. A later `publish_on`
    /// overrides an earlier one for the segment it covers.
    pub fn publish_on(&self, scheduler: &Scheduler) -> Flux<T> {
        let source = self.clone();
        let scheduler = scheduler.clone();
        Flux::new(move |o: Subscriber<T>| {
            let state = o.state();
            let o_shared = Arc::new(Mutex::new(o));
            let pump = Arc::new(Mutex::new(PumpState {
                queue: VecDeque::new(),
                draining: false,
            }));

            let pump_n = Arc::clone(&pump);
            let pump_e = Arc::clone(&pump);
            let pump_c = Arc::clone(&pump);
            let o_n = Arc::clone(&o_shared);
            let o_e = Arc::clone(&o_shared);
            let o_c = Arc::clone(&o_shared);
            let sched_n = scheduler.clone();
            let sched_e = scheduler.clone();
            let sched_c = scheduler.clone();

            let u = Subscriber::forward(
                state,
                move |v| pump_signal(&pump_n, &o_n, &sched_n, Signal::Item(v)),
                move |e| pump_signal(&pump_e, &o_e, &sched_e, Signal::Fault(e)),
                move || pump_signal(&pump_c, &o_c, &sched_c, Signal::Done),
            );
            source.subscribe_raw(u);
        })
    }

    /// Blocking escape hatch: subscribes, then suspends the calling thread
    /// until the sequence terminates, returning its last value. The timeout
    /// is mandatory for the zero-to-many arity; exceeding it disposes the
    /// execution and fails the call with `TimeoutExceeded`.
    ///
    /// # Errors
    ///
    /// The sequence's error when it errors, `TimeoutExceeded` when the
    /// deadline passes first.
    pub fn block_last(&self, timeout: Duration) -> BlockResult<T> {
        self.block_inner(Some(timeout))
    }

    pub(crate) fn block_inner(&self, timeout: Option<Duration>) -> BlockResult<T> {
        let last: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let failure: Arc<Mutex<Option<Arc<dyn Error + Send + Sync>>>> =
            Arc::new(Mutex::new(None));
        let last_c = Arc::clone(&last);
        let failure_c = Arc::clone(&failure);

        let subscriber = Subscriber::new(
            move |v| *last_c.lock().unwrap() = Some(v),
            move |e| *failure_c.lock().unwrap() = Some(e),
            || {},
        );
        let handle = self.subscribe(subscriber);
        match handle.wait(timeout) {
            Err(timed_out) => {
                handle.dispose();
                Err(Arc::new(timed_out))
            }
            Ok(Phase::Errored) => match failure.lock().unwrap().take() {
                Some(e) => Err(e),
                // Unreachable: the error callback runs before the terminal
                // phase becomes observable to waiters.
                None => Ok(None),
            },
            Ok(_) => Ok(last.lock().unwrap().take()),
        }
    }
}

/// Outcome of a blocking wait: the last value observed, or the sequence's
/// error (a timeout surfaces as `SequenceError::TimeoutExceeded`).
pub type BlockResult<T> = Result<Option<T>, Arc<dyn Error + Send + Sync>>;

impl<T: Send + 'static> Subscribeable for Flux<T> {
    type Item = T;

    fn subscribe(&self, mut subscriber: Subscriber<T>) -> Disposable {
        let state = subscriber.state();
        subscriber.arm();
        (self.subscribe_fn)(subscriber);
        Disposable::new(state)
    }
}
