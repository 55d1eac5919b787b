//! Console transport: writes replies to stdout.
//!
//! Used by `parley process --ephemeral` to try the engine without a bot
//! token.

use crate::split::split_message;
use async_trait::async_trait;
use parley_core::channel::{Channel, ChatTarget};
use parley_core::error::ChannelError;
use tokio::io::{self, AsyncWriteExt};
use tracing::debug;

pub struct ConsoleChannel {
    chunk_limit: usize,
}

impl ConsoleChannel {
    pub fn new(chunk_limit: usize) -> Self {
        Self { chunk_limit }
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new(4000)
    }
}

/// Render one outgoing chunk the way the console prints it.
fn render(target: &ChatTarget, chunk: &str) -> String {
    let thread = target
        .thread_id
        .map(|t| format!(":{t}"))
        .unwrap_or_default();
    format!("[{}{}] {}\n", target.chat_id, thread, chunk.trim_end())
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, target: &ChatTarget, text: &str) -> Result<usize, ChannelError> {
        if target.is_unanchored_broadcast() {
            return Ok(0);
        }
        let chunks = split_message(text, self.chunk_limit);
        let mut stdout = io::stdout();
        for chunk in &chunks {
            stdout
                .write_all(render(target, chunk).as_bytes())
                .await
                .map_err(|e| ChannelError::DeliveryFailed {
                    channel: "console".into(),
                    reason: e.to_string(),
                })?;
        }
        stdout.flush().await.ok();
        Ok(chunks.len())
    }

    async fn send_typing(&self, target: &ChatTarget) -> Result<(), ChannelError> {
        debug!(chat_id = target.chat_id, "typing...");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ChatKind;

    #[test]
    fn render_includes_thread() {
        let target = ChatTarget::new(-5, ChatKind::Supergroup).with_thread(Some(3));
        assert_eq!(render(&target, "hi\n"), "[-5:3] hi\n");
    }

    #[tokio::test]
    async fn send_reports_chunk_count() {
        let channel = ConsoleChannel::new(3);
        let sent = channel
            .send(&ChatTarget::new(1, ChatKind::Private), "ab\ncd\n")
            .await
            .unwrap();
        assert_eq!(sent, 2);
    }
}
