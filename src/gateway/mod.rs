//! Chat gateway: spam screening, response cache, model fallback.

mod builder;
mod chat;
pub mod spam;

pub use builder::{Huginn, HuginnBuilder};
pub use chat::{ChatEventStream, ChatGateway};
pub use spam::{SpamConfig, SpamFilter, SpamReason};
