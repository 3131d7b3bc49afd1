//! Control data channel handle
//!
//! Shared slot for the current session's control link. Commands for a
//! live actuator are latency-critical, so `send` is fire-and-forget: a
//! message sent while no channel is open is silently dropped, never
//! buffered. Inbound messages go to a single registered handler.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::utils::LogThrottler;
use crate::warn_throttled;
use crate::webrtc::ControlLink;

/// Single registered handler for inbound control messages
pub type ControlHandler = Box<dyn Fn(Bytes) + Send + Sync>;

/// Handle to the control channel of the current session
pub struct ControlChannel {
    link: RwLock<Option<Arc<dyn ControlLink>>>,
    handler: RwLock<Option<ControlHandler>>,
    throttler: LogThrottler,
}

impl ControlChannel {
    pub fn new() -> Self {
        Self {
            link: RwLock::new(None),
            handler: RwLock::new(None),
            throttler: LogThrottler::default(),
        }
    }

    /// Registers the inbound message handler, replacing any previous one
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        *self.handler.write() = Some(Box::new(handler));
    }

    /// Whether a channel is attached and open for sending
    pub fn is_open(&self) -> bool {
        self.link
            .read()
            .as_ref()
            .map(|link| link.is_open())
            .unwrap_or(false)
    }

    /// Label of the attached channel, if any
    pub fn label(&self) -> Option<String> {
        self.link.read().as_ref().map(|link| link.label())
    }

    /// Sends a control message if the channel is open.
    ///
    /// Messages sent while the channel is absent or not yet open are
    /// dropped without error, matching the unreliable delivery contract.
    pub async fn send(&self, data: Bytes) {
        let link = self.link.read().clone();
        let Some(link) = link else {
            warn_throttled!(
                self.throttler,
                "control_no_channel",
                "Dropping control message: no control channel"
            );
            return;
        };
        if !link.is_open() {
            warn_throttled!(
                self.throttler,
                "control_not_open",
                "Dropping control message: channel '{}' not open",
                link.label()
            );
            return;
        }
        if let Err(e) = link.send(data).await {
            warn_throttled!(
                self.throttler,
                "control_send_failed",
                "Control message send failed: {}",
                e
            );
        }
    }

    /// Attaches the control link of a new session, replacing any previous
    pub(crate) fn attach(&self, link: Arc<dyn ControlLink>) {
        debug!("Control channel attached: {}", link.label());
        *self.link.write() = Some(link);
        self.throttler.clear("control_no_channel");
        self.throttler.clear("control_not_open");
    }

    /// Detaches the current link, if any
    pub(crate) fn detach(&self) {
        *self.link.write() = None;
    }

    /// Delivers an inbound message to the registered handler
    pub(crate) fn deliver(&self, data: Bytes) {
        let handler = self.handler.read();
        match handler.as_ref() {
            Some(handler) => handler(data),
            None => debug!("Control message received with no handler registered"),
        }
    }
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::engine::mock::MockControlLink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_send_without_channel_is_silent() {
        let control = ControlChannel::new();
        // Must not panic, error, or buffer
        control.send(Bytes::from_static(b"grip")).await;
        assert!(!control.is_open());
    }

    #[tokio::test]
    async fn test_send_before_open_drops_without_buffering() {
        let control = ControlChannel::new();
        let link = Arc::new(MockControlLink::new("control"));
        control.attach(link.clone());

        control.send(Bytes::from_static(b"early")).await;
        assert_eq!(link.sent_count(), 0);

        link.set_open(true);
        control.send(Bytes::from_static(b"late")).await;

        // Only the post-open message went out; the early one is gone
        let sent = link.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..], b"late");
    }

    #[tokio::test]
    async fn test_attach_replaces_previous_link() {
        let control = ControlChannel::new();
        let first = Arc::new(MockControlLink::new("control"));
        first.set_open(true);
        control.attach(first.clone());

        let second = Arc::new(MockControlLink::new("control"));
        second.set_open(true);
        control.attach(second.clone());

        control.send(Bytes::from_static(b"cmd")).await;
        assert_eq!(first.sent_count(), 0);
        assert_eq!(second.sent_count(), 1);
    }

    #[test]
    fn test_single_handler_receives_messages() {
        let control = ControlChannel::new();
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        let counter = first_calls.clone();
        control.set_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        control.deliver(Bytes::from_static(b"a"));

        // Registering again replaces the first handler
        let counter = second_calls.clone();
        control.set_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        control.deliver(Bytes::from_static(b"b"));

        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }
}
