pub mod conversation;
pub mod message;
pub mod model;

pub use conversation::{derive_title, Conversation};
pub use message::{Message, MessageStatus, Role};
