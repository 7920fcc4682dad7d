//! V1 API handlers.

mod sessions;

pub use sessions::{stream_events, submit_message};
