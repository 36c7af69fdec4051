use std::{error::Error, sync::Arc};

/// Receives the signals of one sequence: zero or more `next` calls followed
/// by at most one terminal `complete` or `error`, never both.
pub trait Observer {
    type Item;

    fn next(&mut self, _: Self::Item);
    fn complete(&mut self);
    fn error(&mut self, _: Arc<dyn Error + Send + Sync>);
}
