//! Upstream side of the chat relay: SSE framing, OpenAI delta decoding and the
//! stream driver that forwards fragments to a downstream sink.

pub mod error;
pub mod openai;
pub mod relay;
pub mod sse;

pub use error::ChatError;
pub use openai::OpenAIClient;
pub use relay::{ChannelSink, RelayDriver, RelayOutcome, RelaySink, RelayState};
