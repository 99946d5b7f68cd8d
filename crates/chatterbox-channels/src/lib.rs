//! # Chatterbox Channels
//! Outgoing message dispatch, one queue per channel.
//!
//! ```text
//! action fires / command answers
//!   └── ChannelRegistry::get_or_create(channel)
//!         └── ChannelDispatcher::enqueue(ResponseState)
//!               └── timer (only while queue non-empty)
//!                     ├── drop head if resend limit exceeded
//!                     ├── defer if min send interval not elapsed
//!                     ├── append bypass sequence on duplicates
//!                     └── Transport::say → dequeue (or wait for listener)
//! ```

pub mod console;
pub mod dispatcher;
pub mod memory;
pub mod queue;
pub mod registry;

pub use console::ConsoleTransport;
pub use dispatcher::{
    Attempt, ChannelDispatcher, ChannelState, DispatchSettings, MessageState, ResponseState,
    TickOutcome,
};
pub use memory::MemoryTransport;
pub use queue::Queue;
pub use registry::{ChannelRegistry, validate_channel_name};
