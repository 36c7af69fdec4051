//! Mono and Flux asynchronous sequences with pluggable schedulers.
//!
//! A sequence is assembled lazily from a source constructor and a chain of
//! operators, then run by subscribing to it. Each subscription is an
//! independent execution that can be observed, awaited or disposed through
//! the returned [`Disposable`]. Where an execution runs is controlled by the
//! [`schedulers`] pool together with the `subscribe_on` and `publish_on`
//! operators.
//!
//! ```
//! use fluxion::Flux;
//!
//! let total = Flux::range(1, 5)
//!     .map(|n| n * n)
//!     .collect()
//!     .block()
//!     .unwrap();
//!
//! assert_eq!(total, Some(vec![1, 4, 9, 16, 25]));
//! ```

mod errors;
mod observer;

pub mod flux;
pub mod mono;
pub mod scheduler;
pub mod subscription;

pub use errors::SequenceError;
pub use flux::{BlockResult, Emitter, Flux};
pub use mono::Mono;
pub use observer::Observer;
pub use scheduler::{new_elastic, new_parallel, new_single, schedulers, Scheduler};
pub use subscription::subscribe;
pub use subscription::subscribe::{Disposable, Phase, Subscribeable, Subscriber};
