//! Request to message: validation, rendering and hand-off

mod pipeline;
mod queue;
mod request;

pub use pipeline::{DispatchMode, DispatchPipeline};
pub use queue::{QueueWorker, QueuedMessage, SendQueue};
pub use request::{TxAttachment, TxRequest};
