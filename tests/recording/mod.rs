#![allow(dead_code)]

use std::{
    error::Error,
    sync::{Arc, Mutex},
};

use fluxion::Subscriber;

/// Records every signal a subscription delivers, so tests can assert on the
/// full observed history after the fact.
pub struct Record<T> {
    pub nexts: Arc<Mutex<Vec<T>>>,
    pub errors: Arc<Mutex<Vec<Arc<dyn Error + Send + Sync>>>>,
    pub completions: Arc<Mutex<usize>>,
}

impl<T: Send + 'static> Record<T> {
    pub fn new() -> Self {
        Record {
            nexts: Arc::new(Mutex::new(Vec::new())),
            errors: Arc::new(Mutex::new(Vec::new())),
            completions: Arc::new(Mutex::new(0)),
        }
    }

    pub fn subscriber(&self) -> Subscriber<T> {
        let nexts = Arc::clone(&self.nexts);
        let errors = Arc::clone(&self.errors);
        let completions = Arc::clone(&self.completions);
        Subscriber::new(
            move |v| nexts.lock().unwrap().push(v),
            move |e| errors.lock().unwrap().push(e),
            move || *completions.lock().unwrap() += 1,
        )
    }

    pub fn values(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.nexts.lock().unwrap().clone()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    pub fn completions(&self) -> usize {
        *self.completions.lock().unwrap()
    }

    /// Fails the test when the subscription saw anything other than exactly
    /// one terminal signal.
    pub fn assert_single_terminal(&self) {
        let completions = self.completions();
        let errors = self.errors.lock().unwrap().len();
        match completions + errors {
            1 => {}
            0 => panic!("subscription never received a terminal signal"),
            _ => panic!(
                "{}: {} completions and {} errors",
                fluxion::SequenceError::DoubleTerminalSignal,
                completions,
                errors
            ),
        }
    }
}

/// Coerces the delivered error into the library's own error type when it is
/// one, for asserting on specific variants.
pub fn as_sequence_error(
    e: &Arc<dyn Error + Send + Sync>,
) -> Option<&fluxion::SequenceError> {
    let plain: &(dyn Error + 'static) = &**e;
    plain.downcast_ref::<fluxion::SequenceError>()
}
