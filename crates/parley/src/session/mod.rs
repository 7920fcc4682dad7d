//! Session-scoped correlation of submitted messages and their replies.
//!
//! ```text
//! submit ─► ExchangeDispatcher ─► InferenceBackend
//!                  │
//!                  ▼ Exchange
//!           ResponsePublisher ─► SubscriptionRegistry ─► subscribers of that session
//! ```
//!
//! [`ConversationHistory`] feeds each backend call the session's recent turns.

mod dispatcher;
mod history;
mod publisher;
mod registry;

pub use dispatcher::{ExchangeDispatcher, SubmitOutcome};
pub use history::ConversationHistory;
pub use publisher::ResponsePublisher;
pub use registry::{PublishReport, Subscription, SubscriptionHandle, SubscriptionRegistry};
