//! The chat connection the bot talks through.

use async_trait::async_trait;
use futures::stream::Stream;

use crate::error::Result;
use crate::types::ChatEvent;

/// A chat service connection: connect, send, receive.
///
/// The wire protocol lives behind this trait; dispatchers only ever call
/// `say` and `is_connected`.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Connect and return the remote `(address, port)`.
    async fn connect(&self) -> Result<(String, u16)>;

    fn is_connected(&self) -> bool;

    /// Send `text` to `channel`.
    async fn say(&self, channel: &str, text: &str) -> Result<()>;

    /// Join a channel so its messages show up in `listen`.
    async fn join(&self, channel: &str) -> Result<()>;

    /// Channels currently joined.
    fn channels(&self) -> Vec<String>;

    /// Stream of incoming events. May only be taken once per connection.
    async fn listen(&self) -> Result<Box<dyn Stream<Item = ChatEvent> + Send + Unpin>>;
}
