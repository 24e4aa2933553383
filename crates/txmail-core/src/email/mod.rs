//! SMTP messenger: server pools, sender routing and wire assembly

mod assemble;
mod emailer;
mod selector;
mod server;

pub use assemble::assemble;
pub use emailer::Emailer;
pub use selector::ServerSelector;
pub use server::{allows_from_address, ServerPool};
