// Public modules
pub mod chat_completion;
pub mod chat_completion_chunk;
pub mod chat_request;
pub mod message;
pub mod model;

// Re-exports
pub use chat_completion::{ChatCompletion, Choice};
pub use chat_completion_chunk::{ChatCompletionChunk, ChunkChoice, Delta};
pub use chat_request::{ChatMessage, ChatRequest};
pub use message::{Message, MessageId, Role};
pub use model::{KnownModel, Model};
