//! Public types for the Huginn API.

mod message;
mod options;
mod request;
mod response;

pub use message::{Message, Role};
pub use options::GenerationOptions;
pub use request::ChatRequest;
pub use response::{ChatEvent, ChatReply};
