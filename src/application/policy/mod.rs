mod defaults;
mod diff;
mod store;

pub use defaults::default_document;
pub use diff::unified_diff;
pub use store::{PolicyStore, render_markdown};
