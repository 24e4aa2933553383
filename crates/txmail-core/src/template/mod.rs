//! Transactional template compilation and caching

mod cache;
mod compile;

pub use cache::TemplateCache;
pub use compile::{CompiledTemplate, Rendered, TemplateFuncs};
