pub mod channels;
pub mod search;
pub mod template;

pub use channels::Notifier;
pub use search::{MessageDocument, SearchIndex};
