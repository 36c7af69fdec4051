mod sequence_errors;

pub use sequence_errors::SequenceError;

pub(crate) use sequence_errors::operator_failure;
