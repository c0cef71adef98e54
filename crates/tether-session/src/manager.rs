//! Owns the single upstream session and its lifecycle state machine.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tether_core::{Address, BridgeEvent, LinkStatus, SessionError};
use tether_upstream::{normalize, CloseCause, UpstreamEvent, UpstreamSender, UpstreamTransport};

use crate::credentials::CredentialStore;

/// Delay before the single reconnect attempt after a transient closure.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the bridge-event broadcast channel.
const EVENT_CAPACITY: usize = 1024;

/// Lifecycle of the one process-wide upstream session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// A fresh authentication token has been issued and not yet consumed.
    AwaitingScan,
    Connected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingScan => "awaiting_scan",
            Self::Connected => "connected",
        }
    }
}

struct Inner {
    state: SessionState,
    sender: Option<Arc<dyn UpstreamSender>>,
    /// Bumped on every dial and on `disconnect()`; event pumps from
    /// superseded sessions compare against it and go inert.
    epoch: u64,
}

/// Drives connect/authenticate/reconnect for the upstream session and
/// emits every transition and normalized message as a [`BridgeEvent`].
pub struct SessionManager {
    transport: Arc<dyn UpstreamTransport>,
    credentials: Arc<dyn CredentialStore>,
    events: broadcast::Sender<BridgeEvent>,
    inner: Mutex<Inner>,
    /// Single-slot reconnect timer. At most one pending retry exists; the
    /// slot is cleared at the start of the attempt and aborted on
    /// deliberate disconnect.
    reconnect: Mutex<Option<JoinHandle<()>>>,
    /// Self-handle for spawning the event pump and the reconnect timer.
    weak: Weak<SessionManager>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn UpstreamTransport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new_cyclic(|weak| Self {
            transport,
            credentials,
            events,
            inner: Mutex::new(Inner {
                state: SessionState::Disconnected,
                sender: None,
                epoch: 0,
            }),
            reconnect: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    /// Subscribe to the broadcast event stream. Events are delivered in
    /// the order they are raised.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Idempotent entry point: dials the upstream unless a session is
    /// already live or being established. Safe to call from the initial
    /// state, a scheduled reconnect, or an operator retry after logout.
    ///
    /// Returns a boxed future: the scheduled retry re-enters `connect`,
    /// and the recursion must not flow through an opaque future type.
    pub fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send + '_>> {
        Box::pin(self.connect_inner())
    }

    async fn connect_inner(&self) -> Result<(), SessionError> {
        let epoch = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Disconnected {
                debug!(state = inner.state.as_str(), "connect ignored, session active");
                return Ok(());
            }
            inner.state = SessionState::Connecting;
            inner.epoch += 1;
            inner.epoch
        };

        let credentials = match self.credentials.load().await {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "failed to load stored credentials, dialing fresh");
                None
            }
        };

        info!(resuming = credentials.is_some(), "dialing upstream");
        match self.transport.connect(credentials).await {
            Ok(link) => {
                let stale = {
                    let mut inner = self.inner.lock().await;
                    if inner.epoch == epoch {
                        inner.sender = Some(Arc::clone(&link.sender));
                        false
                    } else {
                        true
                    }
                };
                if stale {
                    // disconnect() won while we were dialing
                    link.sender.close().await;
                    return Ok(());
                }
                if let Some(manager) = self.weak.upgrade() {
                    tokio::spawn(manager.pump(link.events, epoch));
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "upstream dial failed");
                self.emit(BridgeEvent::Error {
                    error: e.to_string(),
                });
                self.handle_close(
                    CloseCause::ConnectionLost {
                        detail: e.to_string(),
                    },
                    epoch,
                )
                .await;
                Err(e)
            }
        }
    }

    /// Relay one outbound message. Fails fast unless the session is live.
    pub async fn send(&self, to: &Address, text: &str) -> Result<(), SessionError> {
        let sender = {
            let inner = self.inner.lock().await;
            if inner.state != SessionState::Connected {
                return Err(SessionError::NotConnected);
            }
            inner.sender.clone().ok_or(SessionError::NotConnected)?
        };
        sender.send_text(to, text).await
    }

    /// Deliberate teardown: aborts any pending reconnect, closes the
    /// upstream, and never schedules a retry.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.reconnect.lock().await.take() {
            handle.abort();
        }
        let (sender, was_active) = {
            let mut inner = self.inner.lock().await;
            let was_active = inner.state != SessionState::Disconnected;
            inner.state = SessionState::Disconnected;
            inner.epoch += 1;
            (inner.sender.take(), was_active)
        };
        if let Some(sender) = sender {
            sender.close().await;
        }
        if was_active {
            self.emit(BridgeEvent::status(LinkStatus::Disconnected));
        }
        info!("session disconnected");
    }

    fn emit(&self, event: BridgeEvent) {
        // No subscribers is fine; the session does not depend on
        // controllers being connected.
        let _ = self.events.send(event);
    }

    /// Drains one session's event stream until it closes or is superseded.
    async fn pump(self: Arc<Self>, mut events: mpsc::Receiver<UpstreamEvent>, epoch: u64) {
        while let Some(event) = events.recv().await {
            if self.inner.lock().await.epoch != epoch {
                return;
            }
            match event {
                UpstreamEvent::Open => {
                    let became_connected = {
                        let mut inner = self.inner.lock().await;
                        if inner.epoch != epoch || inner.state == SessionState::Connected {
                            false
                        } else {
                            inner.state = SessionState::Connected;
                            true
                        }
                    };
                    if became_connected {
                        info!("upstream session connected");
                        self.emit(BridgeEvent::status(LinkStatus::Connected));
                    }
                }
                UpstreamEvent::AuthChallenge { token } => {
                    {
                        let mut inner = self.inner.lock().await;
                        if inner.epoch != epoch {
                            return;
                        }
                        // Re-entrant: a new token may replace a pending one.
                        inner.state = SessionState::AwaitingScan;
                    }
                    info!("authentication challenge issued, scan required");
                    self.emit(BridgeEvent::Qr { qr: token });
                }
                UpstreamEvent::Credentials { blob } => {
                    // Awaited here so the process is safely stoppable once
                    // the pump goes idle.
                    if let Err(e) = self.credentials.save(&blob).await {
                        warn!(error = %e, "failed to persist session credentials");
                    }
                }
                UpstreamEvent::Message(envelope) => {
                    if let Some(message) = normalize(&envelope) {
                        debug!(
                            sender = %message.sender,
                            is_group = message.is_group,
                            content_len = message.content.len(),
                            "inbound message"
                        );
                        self.emit(BridgeEvent::Message(message));
                    }
                }
                UpstreamEvent::Closed { cause } => {
                    self.handle_close(cause, epoch).await;
                    return;
                }
            }
        }
        // Stream ended without an explicit close event; treat as transient.
        self.handle_close(
            CloseCause::ConnectionLost {
                detail: "upstream event stream ended".into(),
            },
            epoch,
        )
        .await;
    }

    /// Classifies a closure and transitions to `Disconnected` exactly once
    /// per session epoch.
    async fn handle_close(&self, cause: CloseCause, epoch: u64) {
        {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch || inner.state == SessionState::Disconnected {
                return;
            }
            inner.state = SessionState::Disconnected;
            inner.sender = None;
        }

        let terminal = cause.is_terminal();
        if terminal {
            // A revoked session must never be resumed from the stored blob.
            if let Err(e) = self.credentials.clear().await {
                warn!(error = %e, "failed to clear revoked credentials");
            }
        }

        self.emit(BridgeEvent::Status {
            status: LinkStatus::Disconnected,
            terminal,
        });

        if terminal {
            warn!("upstream logged this session out, re-authentication required");
        } else {
            warn!(
                cause = ?cause,
                delay_secs = RECONNECT_DELAY.as_secs(),
                "transient upstream closure, scheduling reconnect"
            );
            self.schedule_reconnect().await;
        }
    }

    /// At most one reconnect timer exists. Scheduling while one is pending
    /// is a no-op; the slot is cleared at the start of the retry so a
    /// failed attempt can schedule the next one.
    async fn schedule_reconnect(&self) {
        let mut slot = self.reconnect.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("reconnect already pending");
            return;
        }
        let Some(manager) = self.weak.upgrade() else {
            return;
        };
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_DELAY).await;
            manager.reconnect.lock().await.take();
            if let Err(e) = manager.connect().await {
                warn!(error = %e, "scheduled reconnect failed");
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use tether_upstream::{MediaKind, MessageBody, MessageEnvelope, UpstreamLink};
    use tokio::time::{sleep, timeout};

    use crate::credentials::MemoryCredentialStore;

    struct FakeSender {
        sent: SyncMutex<Vec<(Address, String)>>,
        fail_with: Option<String>,
        closed: AtomicBool,
    }

    impl FakeSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: SyncMutex::new(Vec::new()),
                fail_with: None,
                closed: AtomicBool::new(false),
            })
        }

        fn failing(reason: &str) -> Arc<Self> {
            Arc::new(Self {
                sent: SyncMutex::new(Vec::new()),
                fail_with: Some(reason.to_owned()),
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl UpstreamSender for FakeSender {
        async fn send_text(&self, to: &Address, text: &str) -> Result<(), SessionError> {
            if let Some(reason) = &self.fail_with {
                return Err(SessionError::SendFailed(reason.clone()));
            }
            self.sent.lock().push((to.clone(), text.to_owned()));
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    struct FakeTransport {
        links: SyncMutex<VecDeque<UpstreamLink>>,
        connects: AtomicUsize,
        seen_credentials: SyncMutex<Vec<Option<String>>>,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                links: SyncMutex::new(VecDeque::new()),
                connects: AtomicUsize::new(0),
                seen_credentials: SyncMutex::new(Vec::new()),
            })
        }

        fn push_link(&self) -> (mpsc::Sender<UpstreamEvent>, Arc<FakeSender>) {
            let (tx, rx) = mpsc::channel(64);
            let sender = FakeSender::new();
            self.links.lock().push_back(UpstreamLink {
                sender: sender.clone(),
                events: rx,
            });
            (tx, sender)
        }

        fn push_link_with_sender(&self, sender: Arc<FakeSender>) -> mpsc::Sender<UpstreamEvent> {
            let (tx, rx) = mpsc::channel(64);
            self.links.lock().push_back(UpstreamLink {
                sender,
                events: rx,
            });
            tx
        }

        fn connect_count(&self) -> usize {
            self.connects.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl UpstreamTransport for FakeTransport {
        async fn connect(
            &self,
            credentials: Option<String>,
        ) -> Result<UpstreamLink, SessionError> {
            self.connects.fetch_add(1, Ordering::Relaxed);
            self.seen_credentials.lock().push(credentials);
            self.links
                .lock()
                .pop_front()
                .ok_or_else(|| SessionError::ConnectFailed("no link scripted".into()))
        }
    }

    fn manager(
        transport: &Arc<FakeTransport>,
    ) -> (Arc<SessionManager>, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let mgr = SessionManager::new(
            transport.clone() as Arc<dyn UpstreamTransport>,
            store.clone() as Arc<dyn CredentialStore>,
        );
        (mgr, store)
    }

    async fn next_event(rx: &mut broadcast::Receiver<BridgeEvent>) -> BridgeEvent {
        timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    fn envelope(body: MessageBody) -> MessageEnvelope {
        MessageEnvelope {
            id: "m1".into(),
            chat: Address::from_raw("12345@lid"),
            sender_alt: None,
            from_me: false,
            timestamp: 1_700_000_000,
            body,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_then_open_reaches_connected() {
        let transport = FakeTransport::new();
        let (tx, _sender) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        assert_eq!(mgr.state().await, SessionState::Connecting);

        tx.send(UpstreamEvent::Open).await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::status(LinkStatus::Connected)
        );
        assert_eq!(mgr.state().await, SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let transport = FakeTransport::new();
        let (tx, _sender) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        mgr.connect().await.unwrap();
        assert_eq!(transport.connect_count(), 1);

        tx.send(UpstreamEvent::Open).await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::status(LinkStatus::Connected)
        );

        // Connecting again while connected: no new dial, no duplicate event.
        mgr.connect().await.unwrap();
        assert_eq!(transport.connect_count(), 1);
        sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn auth_challenge_enters_awaiting_scan_and_is_reentrant() {
        let transport = FakeTransport::new();
        let (tx, _sender) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::AuthChallenge {
            token: "2@first".into(),
        })
        .await
        .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::Qr { qr: "2@first".into() }
        );
        assert_eq!(mgr.state().await, SessionState::AwaitingScan);

        // A replacement challenge: new event, same state.
        tx.send(UpstreamEvent::AuthChallenge {
            token: "2@second".into(),
        })
        .await
        .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::Qr {
                qr: "2@second".into()
            }
        );
        assert_eq!(mgr.state().await, SessionState::AwaitingScan);
    }

    #[tokio::test(start_paused = true)]
    async fn send_fails_when_not_connected() {
        let transport = FakeTransport::new();
        let (mgr, _store) = manager(&transport);
        let err = mgr
            .send(&Address::from_raw("12345@lid"), "hi")
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn send_delegates_once_connected() {
        let transport = FakeTransport::new();
        let (tx, sender) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::Open).await.unwrap();
        let _ = next_event(&mut rx).await;

        mgr.send(&Address::from_raw("12345@lid"), "hello")
            .await
            .unwrap();
        let sent = sender.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_str(), "12345@lid");
        assert_eq!(sent[0].1, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_send_failure_is_surfaced() {
        let transport = FakeTransport::new();
        let sender = FakeSender::failing("rejected by server");
        let tx = transport.push_link_with_sender(sender);
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::Open).await.unwrap();
        let _ = next_event(&mut rx).await;

        let err = mgr
            .send(&Address::from_raw("12345@lid"), "hi")
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::SendFailed("rejected by server".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn credentials_are_persisted() {
        let transport = FakeTransport::new();
        let (tx, _sender) = transport.push_link();
        let (mgr, store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::Credentials {
            blob: "{\"keys\":1}".into(),
        })
        .await
        .unwrap();
        tx.send(UpstreamEvent::Open).await.unwrap();
        let _ = next_event(&mut rx).await;

        assert_eq!(
            store.load().await.unwrap().as_deref(),
            Some("{\"keys\":1}")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stored_credentials_are_offered_on_dial() {
        let transport = FakeTransport::new();
        let (_tx, _sender) = transport.push_link();
        let (mgr, store) = manager(&transport);
        store.save("resume-me").await.unwrap();

        mgr.connect().await.unwrap();
        let seen = transport.seen_credentials.lock().clone();
        assert_eq!(seen, vec![Some("resume-me".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_are_normalized_and_broadcast() {
        let transport = FakeTransport::new();
        let (tx, _sender) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::Open).await.unwrap();
        let _ = next_event(&mut rx).await;

        tx.send(UpstreamEvent::Message(envelope(MessageBody::MediaCaption {
            media: MediaKind::Document,
            caption: "q3 report".into(),
        })))
        .await
        .unwrap();

        match next_event(&mut rx).await {
            BridgeEvent::Message(msg) => assert_eq!(msg.content, "[Document] q3 report"),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn own_messages_are_not_broadcast() {
        let transport = FakeTransport::new();
        let (tx, _sender) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::Open).await.unwrap();
        let _ = next_event(&mut rx).await;

        let mut own = envelope(MessageBody::Conversation { text: "mine".into() });
        own.from_me = true;
        tx.send(UpstreamEvent::Message(own)).await.unwrap();
        // Marker event proves the pump has processed the dropped message.
        tx.send(UpstreamEvent::Message(envelope(MessageBody::Conversation {
            text: "marker".into(),
        })))
        .await
        .unwrap();

        match next_event(&mut rx).await {
            BridgeEvent::Message(msg) => assert_eq!(msg.content, "marker"),
            other => panic!("expected marker message, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_close_reconnects_exactly_once() {
        let transport = FakeTransport::new();
        let (tx1, _s1) = transport.push_link();
        let (tx2, _s2) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx1.send(UpstreamEvent::Open).await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::status(LinkStatus::Connected)
        );

        tx1.send(UpstreamEvent::Closed {
            cause: CloseCause::ConnectionLost {
                detail: "socket reset".into(),
            },
        })
        .await
        .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::status(LinkStatus::Disconnected)
        );

        // The scheduled retry fires after the fixed delay.
        sleep(RECONNECT_DELAY + Duration::from_millis(10)).await;
        assert_eq!(transport.connect_count(), 2);

        tx2.send(UpstreamEvent::Open).await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::status(LinkStatus::Connected)
        );

        // Exactly one disconnected and one connected each; nothing extra.
        sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_transient_closures_schedule_one_retry() {
        let transport = FakeTransport::new();
        let (tx, _s1) = transport.push_link();
        let (_tx2, _s2) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::Open).await.unwrap();
        let _ = next_event(&mut rx).await;

        let epoch = mgr.inner.lock().await.epoch;
        let cause = CloseCause::ConnectionLost {
            detail: "flap".into(),
        };
        mgr.handle_close(cause.clone(), epoch).await;
        mgr.handle_close(cause, epoch).await;

        // One status event for the pair of closures.
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::status(LinkStatus::Disconnected)
        );
        sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        // One retry in total.
        sleep(RECONNECT_DELAY * 3).await;
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_is_terminal_and_requires_manual_connect() {
        let transport = FakeTransport::new();
        let (tx, _s1) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::Open).await.unwrap();
        let _ = next_event(&mut rx).await;

        tx.send(UpstreamEvent::Closed {
            cause: CloseCause::LoggedOut,
        })
        .await
        .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::Status {
                status: LinkStatus::Disconnected,
                terminal: true,
            }
        );

        // No timer is ever scheduled.
        sleep(RECONNECT_DELAY * 4).await;
        assert_eq!(transport.connect_count(), 1);

        // An explicit connect resumes service.
        let (_tx2, _s2) = transport.push_link();
        mgr.connect().await.unwrap();
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let transport = FakeTransport::new();
        let (tx, _sender) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::Open).await.unwrap();
        let _ = next_event(&mut rx).await;

        tx.send(UpstreamEvent::Closed {
            cause: CloseCause::ServerRestart,
        })
        .await
        .unwrap();
        let _ = next_event(&mut rx).await;

        mgr.disconnect().await;
        sleep(RECONNECT_DELAY * 4).await;
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(mgr.state().await, SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_live_session_without_retry() {
        let transport = FakeTransport::new();
        let (tx, sender) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::Open).await.unwrap();
        let _ = next_event(&mut rx).await;

        mgr.disconnect().await;
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::status(LinkStatus::Disconnected)
        );
        assert!(sender.closed.load(Ordering::Relaxed));

        sleep(RECONNECT_DELAY * 4).await;
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dial_failure_schedules_retry() {
        let transport = FakeTransport::new();
        // No link scripted: first dial fails; second succeeds.
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        let err = mgr.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectFailed(_)));
        match next_event(&mut rx).await {
            BridgeEvent::Error { error } => {
                assert!(error.contains("upstream connect failed"), "got: {error}")
            }
            other => panic!("expected error event, got {other:?}"),
        }
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::status(LinkStatus::Disconnected)
        );

        let (tx2, _s2) = transport.push_link();
        sleep(RECONNECT_DELAY + Duration::from_millis(10)).await;
        assert_eq!(transport.connect_count(), 2);

        tx2.send(UpstreamEvent::Open).await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::status(LinkStatus::Connected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_retry_schedules_another() {
        let transport = FakeTransport::new();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        // No link scripted: the first dial and the first retry both fail.
        assert!(mgr.connect().await.is_err());
        sleep(RECONNECT_DELAY + Duration::from_millis(10)).await;
        assert_eq!(transport.connect_count(), 2);

        // The failed retry scheduled the next attempt.
        let (tx, _sender) = transport.push_link();
        sleep(RECONNECT_DELAY + Duration::from_millis(10)).await;
        assert_eq!(transport.connect_count(), 3);

        tx.send(UpstreamEvent::Open).await.unwrap();
        loop {
            if next_event(&mut rx).await == BridgeEvent::status(LinkStatus::Connected) {
                break;
            }
        }
        assert_eq!(mgr.state().await, SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_clears_stored_credentials() {
        let transport = FakeTransport::new();
        let (tx, _s1) = transport.push_link();
        let (mgr, store) = manager(&transport);
        store.save("initial-blob").await.unwrap();
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::Credentials {
            blob: "revoked-blob".into(),
        })
        .await
        .unwrap();
        tx.send(UpstreamEvent::Open).await.unwrap();
        let _ = next_event(&mut rx).await;
        assert_eq!(
            store.load().await.unwrap().as_deref(),
            Some("revoked-blob")
        );

        tx.send(UpstreamEvent::Closed {
            cause: CloseCause::LoggedOut,
        })
        .await
        .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::Status {
                status: LinkStatus::Disconnected,
                terminal: true,
            }
        );

        // The revoked blob is gone and the next dial starts fresh.
        assert!(store.load().await.unwrap().is_none());
        let (_tx2, _s2) = transport.push_link();
        mgr.connect().await.unwrap();
        let seen = transport.seen_credentials.lock().clone();
        assert_eq!(seen, vec![Some("initial-blob".to_string()), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_end_is_treated_as_transient() {
        let transport = FakeTransport::new();
        let (tx, _s1) = transport.push_link();
        let (_tx2, _s2) = transport.push_link();
        let (mgr, _store) = manager(&transport);
        let mut rx = mgr.subscribe();

        mgr.connect().await.unwrap();
        tx.send(UpstreamEvent::Open).await.unwrap();
        let _ = next_event(&mut rx).await;

        drop(tx);
        assert_eq!(
            next_event(&mut rx).await,
            BridgeEvent::status(LinkStatus::Disconnected)
        );
        sleep(RECONNECT_DELAY + Duration::from_millis(10)).await;
        assert_eq!(transport.connect_count(), 2);
    }

    #[test]
    fn session_state_strings() {
        assert_eq!(SessionState::Disconnected.as_str(), "disconnected");
        assert_eq!(SessionState::Connecting.as_str(), "connecting");
        assert_eq!(SessionState::AwaitingScan.as_str(), "awaiting_scan");
        assert_eq!(SessionState::Connected.as_str(), "connected");
    }
}
