//! Watch-driven building blocks.
//!
//! Everything above the raw store is composed from these pieces:
//!
//! ```text
//! store event -> ReactiveWatch (re-arm, then handler) -> cell / record / collection cache
//!                                                      -> ListenerSet -> application callback
//! ```
//!
//! [`ReactiveWatch`] is the only place that re-installs one-shot store watches.

mod collection;
mod completion;
mod listener;
mod reactive;
mod record;
mod scalar_cell;

#[cfg(test)]
mod collection_test;
#[cfg(test)]
mod reactive_test;

pub use collection::*;
pub use completion::*;
pub use listener::*;
pub use reactive::*;
pub use record::*;
pub use scalar_cell::*;
