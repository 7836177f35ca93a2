use std::time::Duration;

use futures::Stream;

pub const LOCAL_CHAR_DELAY: Duration = Duration::from_millis(50);
pub const REMOTE_CHAR_DELAY: Duration = Duration::from_millis(20);

/// Per-character delays used when a whole reply is re-emitted as a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPacing {
    pub local_char_delay: Duration,
    pub remote_char_delay: Duration,
}

impl Default for StreamPacing {
    fn default() -> Self {
        Self {
            local_char_delay: LOCAL_CHAR_DELAY,
            remote_char_delay: REMOTE_CHAR_DELAY,
        }
    }
}

impl StreamPacing {
    pub fn immediate() -> Self {
        Self {
            local_char_delay: Duration::ZERO,
            remote_char_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamingController {
    delay: Duration,
}

impl Default for StreamingController {
    fn default() -> Self {
        Self::new(LOCAL_CHAR_DELAY)
    }
}

impl StreamingController {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// Yields `text` one character at a time, sleeping before each one.
    pub fn controlled_stream(&self, text: String) -> impl Stream<Item = String> + Send + use<> {
        let delay = self.delay;
        async_stream::stream! {
            for ch in text.chars() {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield ch.to_string();
            }
        }
    }
}
