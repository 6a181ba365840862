use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use aegis_common::types::LlmResponse;
use aegis_common::GatewayError;

/// Result broadcast to followers. The error collapses to a string so the
/// payload stays cheaply clonable across subscribers.
type SharedOutcome = Result<LlmResponse, String>;

/// Collapses concurrent identical upstream calls: the first caller for a
/// fingerprint becomes the leader and executes the call; later callers with
/// the same fingerprint subscribe to the leader's outcome instead of
/// issuing a duplicate request.
#[derive(Default)]
pub struct Deduplicator {
    /// std Mutex — held only to inspect/mutate the map, never across await.
    inflight: Mutex<HashMap<String, broadcast::Sender<SharedOutcome>>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `call` for this key, or join an identical in-flight call.
    pub async fn execute<F>(&self, key: &str, call: F) -> Result<LlmResponse, GatewayError>
    where
        F: Future<Output = Result<LlmResponse, GatewayError>>,
    {
        let mut receiver = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(key) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    inflight.insert(key.to_string(), sender);
                    None
                }
            }
        };

        if let Some(receiver) = receiver.as_mut() {
            metrics::counter!("relay.dedup.joined").increment(1);
            return match receiver.recv().await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(message)) => Err(GatewayError::UpstreamFailed(message)),
                // Leader dropped without broadcasting (cancelled mid-call).
                Err(_) => Err(GatewayError::UpstreamFailed(
                    "coalesced upstream call was cancelled".into(),
                )),
            };
        }

        // Leader path. The guard guarantees map cleanup even if the call
        // future is dropped at the request deadline.
        let guard = CleanupGuard {
            inflight: &self.inflight,
            key: key.to_string(),
        };

        let outcome = call.await;

        let shared: SharedOutcome = match &outcome {
            Ok(response) => Ok(response.clone()),
            Err(e) => Err(e.to_string()),
        };

        if let Some(sender) = guard.remove() {
            // No receivers is fine — nobody joined this call.
            let _ = sender.send(shared);
        }

        outcome
    }

    /// Number of in-flight upstream calls (for readiness/debugging).
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap().len()
    }
}

struct CleanupGuard<'a> {
    inflight: &'a Mutex<HashMap<String, broadcast::Sender<SharedOutcome>>>,
    key: String,
}

impl CleanupGuard<'_> {
    /// Remove the entry deliberately, returning the sender for broadcast.
    fn remove(self) -> Option<broadcast::Sender<SharedOutcome>> {
        let sender = self.inflight.lock().unwrap().remove(&self.key);
        std::mem::forget(self);
        sender
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.inflight.lock().unwrap().remove(&self.key);
    }
}

/// Shared handle used by the relay.
pub type SharedDeduplicator = Arc<Deduplicator>;
