use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Errors raised by the sequence runtime itself.
///
/// User sources can push any `Error + Send + Sync` value through an emitter
/// or an error source; this enum only covers failures the runtime produces
/// on its own.
#[derive(Debug)]
pub enum SequenceError {
    /// A user-supplied transformation, predicate or supplier panicked while
    /// the pipeline was executing. Carries the panic message.
    OperatorFailure(String),

    /// Work was submitted to an execution context that has been shut down.
    /// Carries the scheduler name.
    SchedulerClosed(&'static str),

    /// A blocking wait did not observe a terminal signal within its deadline.
    TimeoutExceeded(Duration),

    /// More than one terminal signal reached a subscriber. A correct pipeline
    /// never produces this; test assertions use it to label the violation.
    DoubleTerminalSignal,
}

impl fmt::Display for SequenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorFailure(msg) => write!(f, "operator function panicked: {}", msg),
            Self::SchedulerClosed(name) => write!(f, "{} scheduler is shut down", name),
            Self::TimeoutExceeded(d) => write!(f, "blocking wait exceeded timeout of {:?}", d),
            Self::DoubleTerminalSignal => {
                write!(f, "subscriber received more than one terminal signal")
            }
        }
    }
}

impl Error for SequenceError {}

// Panic payloads are `&str` or `String` in practice; anything else is
// reported without detail.
pub(crate) fn operator_failure(payload: Box<dyn Any + Send>) -> Arc<SequenceError> {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic payload of unknown type".to_owned()
    };
    Arc::new(SequenceError::OperatorFailure(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_failure_extracts_str_payload() {
        let err = operator_failure(Box::new("boom"));
        assert!(matches!(&*err, SequenceError::OperatorFailure(msg) if msg == "boom"));
    }

    #[test]
    fn operator_failure_extracts_string_payload() {
        let err = operator_failure(Box::new(String::from("bad input 5")));
        assert!(matches!(&*err, SequenceError::OperatorFailure(msg) if msg == "bad input 5"));
    }
}
