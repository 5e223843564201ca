//! Chat emission core: replays one finished completion as a paced, cancellable event stream.
//!
//! The gateway call is not streamed; the reply is re-chunked client-side along Markdown
//! boundaries so renderers never see a heading or an emphasis span split across chunks.

mod chunker;
mod retry;
mod streamer;

pub use chunker::{synthesize_chunks, Chunk, ChunkKind};
pub use retry::RetryPolicy;
pub use streamer::{ChatStreamer, EventKind, ListenerId, Pacing, StreamError, StreamEvent};
