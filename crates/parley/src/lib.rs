//! parley - a session-scoped relay between chat clients and a text-generation backend.
//!
//! A client submits a message tagged with a session id. The relay invokes the
//! backend in the background and publishes the completed exchange to every
//! subscriber registered for that same session id. Submission and delivery are
//! decoupled: the submit call returns before the backend has answered.

pub mod background;
pub mod build_info;
pub mod client;
pub mod config;
pub mod handlers;
pub mod llm;
pub mod server;
pub mod session;
pub mod sse_parser;

pub use parley_protocol as protocol;
