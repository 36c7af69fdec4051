use std::{
    error::Error,
    sync::{Arc, Condvar, Mutex},
    thread,
    time::{Duration, Instant},
};

use crate::errors::SequenceError;
use crate::observer::Observer;

/// Lifecycle of one subscription. The three right-hand states are terminal;
/// no transition out of a terminal state is permitted and any signal arriving
/// after termination is silently dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Completed,
    Errored,
    Disposed,
}

impl Phase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Errored | Phase::Disposed)
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

struct Inner {
    phase: Phase,
    // Set after the winner's terminal callback has run, so waiters never
    // observe a terminal phase with an undelivered terminal signal.
    delivered: bool,
    // Threads currently inside a `next` callback. Terminal transitions drain
    // entries belonging to other threads before delivering, which keeps the
    // disposal cutoff strict without holding the lock across user code.
    in_flight: Vec<thread::ThreadId>,
}

/// Run-time state of one active execution, shared by every stage of a
/// subscribed pipeline, the terminal subscriber and the `Disposable`.
///
/// The phase transition is the single authoritative check-and-set that keeps
/// terminal delivery exactly-once even when concurrent upstream branches race
/// to finish. No user callback ever runs while the state lock is held, so
/// callbacks may query the execution (`Disposable::phase`, `is_terminated`)
/// freely.
pub(crate) struct ExecutionState {
    inner: Mutex<Inner>,
    signal: Condvar,
    teardowns: Mutex<Vec<Teardown>>,
}

impl ExecutionState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(ExecutionState {
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                delivered: false,
                in_flight: Vec::new(),
            }),
            signal: Condvar::new(),
            teardowns: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn phase(&self) -> Phase {
        self.inner.lock().unwrap().phase
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.phase().is_terminal()
    }

    pub(crate) fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase == Phase::Idle {
            inner.phase = Phase::Running;
        }
    }

    /// Runs `deliver` if the execution is still live. The liveness check and
    /// the in-flight registration are one atomic step, but the callback runs
    /// with the lock released; a racing terminal transition waits for it.
    pub(crate) fn deliver(&self, deliver: impl FnOnce()) -> bool {
        let me = thread::current().id();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.phase.is_terminal() {
                return false;
            }
            inner.in_flight.push(me);
        }
        deliver();
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.in_flight.iter().rposition(|id| *id == me) {
            inner.in_flight.remove(pos);
        }
        self.signal.notify_all();
        true
    }

    /// Single-winner transition into a terminal phase. The winner waits out
    /// any `next` delivery in flight on another thread, then runs its
    /// callback and marks the signal delivered; a thread woken by
    /// `wait_terminal` therefore observes a fully delivered terminal signal.
    /// Teardown hooks run last.
    pub(crate) fn terminate_with(&self, to: Phase, callback: impl FnOnce()) -> bool {
        debug_assert!(to.is_terminal());
        let me = thread::current().id();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.phase.is_terminal() {
                return false;
            }
            inner.phase = to;
            // Deliveries on this thread stay: the transition may itself be
            // happening inside a callback, which cannot be waited out.
            while inner.in_flight.iter().any(|id| *id != me) {
                inner = self.signal.wait(inner).unwrap();
            }
        }
        callback();
        self.inner.lock().unwrap().delivered = true;
        self.signal.notify_all();

        let hooks = std::mem::take(&mut *self.teardowns.lock().unwrap());
        for hook in hooks {
            hook();
        }
        true
    }

    /// Registers a hook that runs exactly once, on the terminal transition.
    /// If the execution already terminated the hook runs immediately.
    pub(crate) fn on_terminate(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hook = Some(Box::new(hook) as Teardown);
        {
            let inner = self.inner.lock().unwrap();
            if !inner.phase.is_terminal() {
                self.teardowns.lock().unwrap().push(hook.take().unwrap());
            }
        }
        if let Some(hook) = hook.take() {
            hook();
        }
    }

    pub(crate) fn wait_terminal(&self, timeout: Option<Duration>) -> Result<Phase, SequenceError> {
        let mut inner = self.inner.lock().unwrap();
        match timeout {
            None => {
                while !(inner.phase.is_terminal() && inner.delivered) {
                    inner = self.signal.wait(inner).unwrap();
                }
                Ok(inner.phase)
            }
            Some(limit) => {
                let deadline = Instant::now() + limit;
                while !(inner.phase.is_terminal() && inner.delivered) {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(SequenceError::TimeoutExceeded(limit));
                    }
                    let (guard, _) = self.signal.wait_timeout(inner, left).unwrap();
                    inner = guard;
                }
                Ok(inner.phase)
            }
        }
    }
}

type NextFn<T> = Box<dyn FnMut(T) + Send>;
type CompleteFn = Box<dyn FnMut() + Send>;
type ErrorFn = Box<dyn FnMut(Arc<dyn Error + Send + Sync>) + Send>;

/// A type that acts as an observer, letting callers handle emitted values,
/// errors and completion when subscribing to a `Flux` or `Mono`.
///
/// The subscriber handed to `subscribe` becomes the terminal stage of the
/// pipeline: it gates every signal on the execution state, dropping anything
/// that arrives after the terminal signal or after disposal.
pub struct Subscriber<T> {
    next_fn: NextFn<T>,
    complete_fn: Option<CompleteFn>,
    error_fn: Option<ErrorFn>,
    state: Arc<ExecutionState>,
    gate: bool,
}

impl<T> Subscriber<T> {
    /// Creates a new `Subscriber` with handling functions for emitted values,
    /// errors and completion.
    pub fn new(
        next_fn: impl FnMut(T) + 'static + Send,
        error_fn: impl FnMut(Arc<dyn Error + Send + Sync>) + 'static + Send,
        complete_fn: impl FnMut() + 'static + Send,
    ) -> Self {
        Subscriber {
            next_fn: Box::new(next_fn),
            complete_fn: Some(Box::new(complete_fn)),
            error_fn: Some(Box::new(error_fn)),
            state: ExecutionState::new(),
            gate: false,
        }
    }

    /// Creates a `Subscriber` with only a `next` function.
    pub fn on_next(next_fn: impl FnMut(T) + 'static + Send) -> Self {
        Subscriber {
            next_fn: Box::new(next_fn),
            complete_fn: None,
            error_fn: None,
            state: ExecutionState::new(),
            gate: false,
        }
    }

    /// Sets the completion function.
    pub fn on_complete(&mut self, complete_fn: impl FnMut() + 'static + Send) {
        self.complete_fn = Some(Box::new(complete_fn));
    }

    /// Sets the error-handling function.
    pub fn on_error(
        &mut self,
        error_fn: impl FnMut(Arc<dyn Error + Send + Sync>) + 'static + Send,
    ) {
        self.error_fn = Some(Box::new(error_fn));
    }

    /// True once the execution this subscriber belongs to has completed,
    /// errored or been disposed. Sources feeding potentially long or infinite
    /// sequences must check this before each emission; that check is what
    /// makes cancellation cooperative.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.state.is_live()
    }

    /// Stage subscriber created by an operator: forwards into the downstream
    /// pipeline and shares the downstream execution state so sources above it
    /// observe cancellation.
    pub(crate) fn forward(
        state: Arc<ExecutionState>,
        next_fn: impl FnMut(T) + 'static + Send,
        error_fn: impl FnMut(Arc<dyn Error + Send + Sync>) + 'static + Send,
        complete_fn: impl FnMut() + 'static + Send,
    ) -> Self {
        Subscriber {
            next_fn: Box::new(next_fn),
            complete_fn: Some(Box::new(complete_fn)),
            error_fn: Some(Box::new(error_fn)),
            state,
            gate: false,
        }
    }

    pub(crate) fn state(&self) -> Arc<ExecutionState> {
        Arc::clone(&self.state)
    }

    // Turns this subscriber into the terminal stage of an execution.
    pub(crate) fn arm(&mut self) {
        self.gate = true;
        self.state.start();
    }
}

impl<T> Observer for Subscriber<T> {
    type Item = T;

    fn next(&mut self, v: Self::Item) {
        if self.gate {
            let next_fn = &mut self.next_fn;
            self.state.deliver(move || next_fn(v));
        } else {
            (self.next_fn)(v);
        }
    }

    fn complete(&mut self) {
        if self.gate {
            let complete_fn = &mut self.complete_fn;
            self.state.terminate_with(Phase::Completed, move || {
                if let Some(cfn) = complete_fn {
                    cfn();
                }
            });
        } else if let Some(cfn) = &mut self.complete_fn {
            cfn();
        }
    }

    fn error(&mut self, e: Arc<dyn Error + Send + Sync>) {
        if self.gate {
            let error_fn = &mut self.error_fn;
            self.state.terminate_with(Phase::Errored, move || {
                if let Some(efn) = error_fn {
                    efn(e);
                }
            });
        } else if let Some(efn) = &mut self.error_fn {
            efn(e);
        }
    }
}

/// A type that starts work when handed a `Subscriber`.
pub trait Subscribeable {
    /// The type of items the sequence emits.
    type Item;

    /// Subscribes and starts the execution; the sole entry point that
    /// performs work. Returns the cancellation handle for the started
    /// execution.
    fn subscribe(&self, subscriber: Subscriber<Self::Item>) -> Disposable;
}

/// Cancellation handle for one active execution, returned by `subscribe`.
///
/// The handle is safe to query from inside the subscription's own callbacks:
/// `phase` and `is_terminated` never block. `wait` from inside a callback is
/// unsatisfiable, since termination is delivered only after that callback
/// returns.
pub struct Disposable {
    state: Arc<ExecutionState>,
}

impl Disposable {
    pub(crate) fn new(state: Arc<ExecutionState>) -> Self {
        Disposable { state }
    }

    /// Marks the execution `Disposed`, stops scheduling further work for it
    /// and releases any periodic timer it holds. A no-op when the execution
    /// already reached a terminal phase; consuming `self` makes a second call
    /// unrepresentable.
    pub fn dispose(self) {
        self.state.terminate_with(Phase::Disposed, || {});
    }

    /// Current phase of the execution.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        !self.state.is_live()
    }

    /// Blocks the calling thread until the execution reaches a terminal
    /// phase, or until `timeout` elapses when one is given.
    ///
    /// # Errors
    ///
    /// Returns `SequenceError::TimeoutExceeded` if the deadline passes first.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Phase, SequenceError> {
        self.state.wait_terminal(timeout)
    }
}
