use std::future::Future;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::chat::ChatEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of chat backend events to in-process listeners.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChatEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many listeners received the event.
    pub fn publish(&self, event: ChatEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }

    /// Runs `handler` for every event of type `kind` until `token` is cancelled.
    /// The subscription is taken before this returns, so events published
    /// afterwards are never missed.
    pub fn listen<F, Fut>(
        &self,
        kind: &'static str,
        token: CancellationToken,
        handler: F,
    ) -> JoinHandle<()>
    where
        F: Fn(ChatEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stream = BroadcastStream::new(self.subscribe());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(event)) if event.kind == kind => handler(event).await,
                        Some(Ok(_)) => {}
                        Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                            warn!("[EVENTS] listener for {} lagged, skipped={}", kind, skipped);
                        }
                        None => break,
                    }
                }
            }
            debug!("[EVENTS] listener for {} stopped", kind);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn event(kind: &str) -> ChatEvent {
        ChatEvent {
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn listener_only_sees_matching_events() {
        let bus = EventBus::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let counter = seen.clone();
        let handle = bus.listen("message.new", token.clone(), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.publish(event("message.new"));
        bus.publish(event("ai_indicator.stop"));
        bus.publish(event("message.new"));

        for _ in 0..100 {
            if seen.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        token.cancel();
        handle.await.expect("listener task should finish");
    }

    #[test]
    fn publish_without_listeners_reports_zero() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(event("message.new")), 0);
    }
}
