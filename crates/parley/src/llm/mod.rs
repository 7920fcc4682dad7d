//! Text-generation backends.
//!
//! The relay treats the model as an opaque capability: [`InferenceBackend`]
//! turns input text into reply text or fails. [`build_backend`] constructs the
//! configured implementation.

mod backend;
mod error;
mod openai;
mod registry;
mod types;

pub use backend::{InferenceBackend, Provider};
pub use error::LLMError;
pub use openai::OpenAICompatibleBackend;
pub use registry::{build_backend, defaults};
pub use types::{ChatRequest, ChatResponse, Message, Role, Turn};
