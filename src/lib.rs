// Public modules
pub mod chat;
pub mod client;
pub mod client_logger;
pub mod codec;
pub mod error;
pub mod observability;
pub mod transcript;
pub mod transport;
pub mod types;
pub mod utils;

// Re-exports
pub use client::{Client, StreamSummary};
pub use client_logger::ClientLogger;
pub use codec::StreamEvent;
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use transcript::{SENTINEL, Transcript};
pub use transport::{HttpTransport, LineStream, Transport};
pub use types::*;
