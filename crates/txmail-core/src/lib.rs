//! txmail Core - transactional dispatch and SMTP delivery
//!
//! This crate turns transactional send requests into rendered messages and
//! delivers them through named messenger backends. The `email` backend routes
//! each message to an allowed outbound SMTP server and sends it over that
//! server's connection pool.

pub mod dispatch;
pub mod email;
pub mod messenger;
pub mod smtp;
pub mod store;
pub mod template;

pub use dispatch::{DispatchMode, DispatchPipeline, QueueWorker, SendQueue, TxRequest};
pub use email::Emailer;
pub use messenger::{FailureClass, Messenger, MessengerError, MessengerRegistry};
pub use store::{
    AddressSanitizer, EmailSanitizer, MemorySubscriberStore, MemoryTemplateStore, SubscriberStore,
    TemplateStore,
};
pub use template::{TemplateCache, TemplateFuncs};
