//! Change feed dispatch for LodeRunner
//!
//! [`ChangeDispatcher`] consumes the store's per-partition mutation log
//! through leases, decodes each changed document into a typed
//! [`ChangeEvent`] and hands it to every registered [`ChangeHandler`].
//!
//! Delivery is at-least-once and ordered within a partition only. Handlers
//! must therefore be idempotent.

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handler;

pub use dispatcher::ChangeDispatcher;
pub use error::{ChangeFeedError, ChangeFeedResult};
pub use event::ChangeEvent;
pub use handler::{ChangeHandler, HandlerRegistry};
