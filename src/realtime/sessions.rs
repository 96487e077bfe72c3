use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use super::SessionTransport;

/// Send attempts per session and message before the session is evicted
pub const MAX_DELIVERY_ATTEMPTS: usize = 3;

/// Time limit for a single send or close on one session
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Registry of open websocket sessions
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<dyn SessionTransport>>,
    send_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_send_timeout(DEFAULT_SEND_TIMEOUT)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A send that has not completed within `send_timeout` counts as a failed attempt.
    pub fn with_send_timeout(send_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            send_timeout,
        }
    }

    async fn close_transport(&self, session_id: &str, transport: &dyn SessionTransport) {
        if timeout(self.send_timeout, transport.close()).await.is_err() {
            warn!("session {session_id}: close timed out");
        }
    }

    /// Register a transport, returning its generated session id.
    pub fn register(&self, transport: Arc<dyn SessionTransport>) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(session_id.clone(), transport);
        debug!("session {session_id} registered ({} open)", self.sessions.len());
        session_id
    }

    /// Remove a session, closing its transport if still open.
    pub async fn deregister(&self, session_id: &str) {
        let Some((_, transport)) = self.sessions.remove(session_id) else {
            return;
        };

        if transport.is_open() {
            self.close_transport(session_id, transport.as_ref()).await;
        }
        debug!("session {session_id} deregistered ({} open)", self.sessions.len());
    }

    /// Send `text` to every open session.
    ///
    /// Sessions are written concurrently. A session failing
    /// [`MAX_DELIVERY_ATTEMPTS`] consecutive sends, where a send exceeding the
    /// send timeout counts as a failure, is closed and removed. Failures never
    /// propagate to the caller.
    #[instrument(skip_all, fields(sessions = self.sessions.len()))]
    pub async fn deliver(&self, text: &str) -> DeliveryReport {
        // snapshot so no shard lock is held across an await
        let targets: Vec<(String, Arc<dyn SessionTransport>)> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let outcomes = join_all(
            targets
                .into_iter()
                .map(|(session_id, transport)| self.deliver_one(session_id, transport, text)),
        )
        .await;

        let mut report = DeliveryReport::default();
        for sent in outcomes {
            if sent {
                report.delivered += 1;
            } else {
                report.evicted += 1;
            }
        }
        report
    }

    async fn deliver_one(
        &self,
        session_id: String,
        transport: Arc<dyn SessionTransport>,
        text: &str,
    ) -> bool {
        for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
            match timeout(self.send_timeout, transport.send_text(text)).await {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => trace!("session {session_id}: attempt {attempt} failed: {e}"),
                Err(_) => trace!(
                    "session {session_id}: attempt {attempt} timed out after {:?}",
                    self.send_timeout
                ),
            }
        }

        warn!("session {session_id} failed {MAX_DELIVERY_ATTEMPTS} sends, evicting");
        self.sessions.remove(&session_id);
        self.close_transport(&session_id, transport.as_ref()).await;
        false
    }

    /// Drop sessions whose transport has closed, returning how many were removed.
    pub fn sweep_closed(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, transport| transport.is_open());
        let removed = before - self.sessions.len();

        if removed > 0 {
            debug!("session sweep removed {removed} closed sessions");
        }
        removed
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::realtime::TransportError;

    /// Transport recording what it was sent
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub fail: bool,
        pub attempts: AtomicUsize,
        pub received: Mutex<Vec<String>>,
        pub closed: AtomicBool,
    }

    impl RecordingTransport {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SessionTransport for RecordingTransport {
        async fn send_text(&self, text: &str) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError::Send("broken pipe".to_string()));
            }
            self.received.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_failing_session_evicted_after_three_attempts() {
        let registry = SessionRegistry::new();
        let a = Arc::new(RecordingTransport::default());
        let b = Arc::new(RecordingTransport::failing());
        let c = Arc::new(RecordingTransport::default());

        registry.register(a.clone());
        let b_id = registry.register(b.clone());
        registry.register(c.clone());

        let report = registry.deliver("m1").await;

        assert_eq!(report, DeliveryReport { delivered: 2, evicted: 1 });
        assert_eq!(*a.received.lock().unwrap(), vec!["m1"]);
        assert_eq!(*c.received.lock().unwrap(), vec!["m1"]);
        assert_eq!(b.attempts.load(Ordering::SeqCst), 3);
        assert!(b.closed.load(Ordering::SeqCst));
        assert!(!registry.contains(&b_id));

        // later broadcasts skip B entirely
        let report = registry.deliver("m2").await;
        assert_eq!(report.delivered, 2);
        assert_eq!(b.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*a.received.lock().unwrap(), vec!["m1", "m2"]);
    }

    /// Transport whose sends and closes never complete
    #[derive(Default)]
    struct StalledTransport {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SessionTransport for StalledTransport {
        async fn send_text(&self, _text: &str) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        fn is_open(&self) -> bool {
            true
        }

        async fn close(&self) {
            std::future::pending::<()>().await
        }
    }

    #[tokio::test]
    async fn test_stalled_session_times_out_and_others_still_receive() {
        let registry = SessionRegistry::with_send_timeout(Duration::from_millis(50));
        let healthy: Vec<Arc<RecordingTransport>> =
            (0..4).map(|_| Arc::new(RecordingTransport::default())).collect();
        let stalled = Arc::new(StalledTransport::default());

        for transport in &healthy {
            registry.register(transport.clone());
        }
        let stalled_id = registry.register(stalled.clone());

        let report = tokio::time::timeout(Duration::from_secs(5), registry.deliver("m1"))
            .await
            .expect("deliver did not return");

        assert_eq!(report, DeliveryReport { delivered: 4, evicted: 1 });
        assert_eq!(stalled.attempts.load(Ordering::SeqCst), 3);
        assert!(!registry.contains(&stalled_id));
        assert_eq!(registry.len(), 4);
        for transport in &healthy {
            assert_eq!(*transport.received.lock().unwrap(), vec!["m1"]);
        }

        // the next broadcast is not held up
        let report = tokio::time::timeout(Duration::from_secs(1), registry.deliver("m2"))
            .await
            .expect("deliver did not return");
        assert_eq!(report.delivered, 4);
    }

    #[tokio::test]
    async fn test_deregister_closes_open_transport() {
        let registry = SessionRegistry::new();
        let transport = Arc::new(RecordingTransport::default());
        let id = registry.register(transport.clone());

        registry.deregister(&id).await;

        assert!(registry.is_empty());
        assert!(transport.closed.load(Ordering::SeqCst));

        // unknown ids are ignored
        registry.deregister(&id).await;
    }

    #[tokio::test]
    async fn test_sweep_removes_closed_sessions() {
        let registry = SessionRegistry::new();
        let open = Arc::new(RecordingTransport::default());
        let closed = Arc::new(RecordingTransport::default());
        closed.closed.store(true, Ordering::SeqCst);

        registry.register(open.clone());
        registry.register(closed.clone());

        // closed sessions are skipped but only the sweep removes them
        assert_eq!(registry.deliver("x").await.delivered, 1);
        assert_eq!(closed.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.sweep_closed(), 1);
        assert_eq!(registry.len(), 1);
    }
}
