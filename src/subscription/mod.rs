//! Subscription-side types: the `Subscriber` callback triple, the
//! per-subscription execution state machine and the `Disposable` handle
//! returned by `subscribe`.
pub mod subscribe;
