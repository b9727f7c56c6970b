use std::collections::HashMap;
use std::time::Duration;

use omniagent_core::{Error, Result};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

type Resolver = oneshot::Sender<std::result::Result<Value, String>>;
type Waiter = oneshot::Receiver<std::result::Result<Value, String>>;

/// Correlation table for in-flight remote calls.
///
/// Entries are indexed by request id and discarded eagerly — on response, on
/// timeout, or when the stream dies — so a stale entry can never be mistaken
/// for a live call.
#[derive(Default)]
pub struct PendingCalls {
    inner: Mutex<HashMap<u64, Resolver>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and obtain the waiter for its response.
    pub async fn register(&self, id: u64) -> Waiter {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(id, tx);
        rx
    }

    /// Resolve a call with the response that arrived for its id. Returns
    /// false when no such call is pending (late or unknown response).
    pub async fn resolve(&self, id: u64, result: std::result::Result<Value, String>) -> bool {
        match self.inner.lock().await.remove(&id) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Drop a call's entry without resolving it.
    pub async fn discard(&self, id: u64) {
        self.inner.lock().await.remove(&id);
    }

    /// Fail every pending call, e.g. when the stream closes.
    pub async fn fail_all(&self, error: &str) {
        let mut map = self.inner.lock().await;
        for (_, tx) in map.drain() {
            let _ = tx.send(Err(error.to_string()));
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Await the response for a registered call. On timeout the entry is
    /// discarded and the call fails; a dropped resolver fails it too.
    pub async fn wait(&self, id: u64, waiter: Waiter, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(Error::Tool(e)),
            Ok(Err(_)) => {
                self.discard(id).await;
                Err(Error::Tool("response stream closed".to_string()))
            }
            Err(_) => {
                self.discard(id).await;
                Err(Error::Timeout(format!("no response for request {}", id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolved_call_delivers_and_removes_entry() {
        let pending = PendingCalls::new();
        let rx = pending.register(1).await;
        assert!(pending.resolve(1, Ok(json!({"ok": true}))).await);
        let value = pending.wait(1, rx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(pending.len().await, 0);
    }

    #[tokio::test]
    async fn late_response_for_unknown_id_is_ignored() {
        let pending = PendingCalls::new();
        assert!(!pending.resolve(42, Ok(json!(null))).await);
    }

    #[tokio::test]
    async fn unanswered_calls_time_out_without_leaking() {
        let pending = PendingCalls::new();
        let mut waiters = Vec::new();
        for id in 0..100u64 {
            waiters.push((id, pending.register(id).await));
        }
        assert_eq!(pending.len().await, 100);

        for (id, rx) in waiters {
            let err = pending
                .wait(id, rx, Duration::from_millis(5))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Timeout(_)));
        }
        // Every correlation entry was discarded with its timeout.
        assert_eq!(pending.len().await, 0);
    }

    #[tokio::test]
    async fn fail_all_rejects_every_pending_call() {
        let pending = PendingCalls::new();
        let rx1 = pending.register(1).await;
        let rx2 = pending.register(2).await;
        pending.fail_all("stream closed").await;

        for (id, rx) in [(1, rx1), (2, rx2)] {
            let err = pending.wait(id, rx, Duration::from_secs(1)).await.unwrap_err();
            assert!(err.to_string().contains("stream closed"));
        }
        assert_eq!(pending.len().await, 0);
    }
}
