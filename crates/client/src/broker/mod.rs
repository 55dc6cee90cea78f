//! Cross-origin token broker.
//!
//! Owns the hidden frame pointed at the trusted token service, correlates
//! concurrent token requests with their asynchronous replies by request id,
//! and gates every outbound message on the frame's one-shot readiness
//! announcement. All of this state lives on one explicit object with a
//! controlled lifecycle, constructed once per process and shared behind an
//! [`Arc`]; nothing is ambient.

pub mod messages;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sky_auth_common::{
    Disposition, GetTokenArgs, Navigator, RedirectDecider, TokenError, TokenErrorCode,
    TokenResponse,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

pub use messages::{
    FrameError, InboundMessage, MessageEnvelope, OutboundMessage, FRAME_ELEMENT_ID, FRAME_URL,
    TARGET_ORIGIN, TRUSTED_HOST,
};

/// The postMessage-equivalent half of the frame transport.
///
/// Implementations deliver `message` to the frame window, restricted to
/// `target_origin`. The broker always passes the fixed trusted origin; a
/// delivery that would succeed against any other origin is a contract
/// violation, not an optimization concern.
pub trait FramePort: Send + Sync {
    /// Post `message` to the frame window at `target_origin`.
    ///
    /// # Errors
    /// Returns an error when the message cannot be delivered at all.
    fn post(&self, message: &OutboundMessage, target_origin: &str) -> Result<(), TokenError>;
}

/// DOM collaborator that provisions the hidden frame element.
pub trait FrameHost: Send + Sync {
    /// Ensure a frame with `element_id` pointed at `url` is attached to the
    /// document; must be idempotent when the element already exists.
    ///
    /// # Errors
    /// Returns an error when the frame cannot be created.
    fn ensure_frame(&self, url: &str, element_id: &str) -> Result<(), TokenError>;
}

/// The three possible endings of a pending token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// A correlated token reply arrived.
    Resolved(TokenResponse),
    /// A correlated error arrived and policy says reject in place.
    Rejected(TokenError),
    /// A correlated error arrived and policy triggered a navigation; the
    /// classified error is still handed to the caller (see DESIGN notes).
    RedirectTriggered(TokenError),
}

/// Broker for token acquisition across the origin boundary.
///
/// Any number of `get_token` calls may be outstanding at once; each is
/// tracked by its own correlation entry and settled independently. No
/// ordering is imposed beyond correlation by id.
pub struct TokenBroker {
    port: Arc<dyn FramePort>,
    host: Arc<dyn FrameHost>,
    decider: RedirectDecider,
    frame_url: String,
    target_origin: String,
    pending: Mutex<HashMap<String, oneshot::Sender<Settlement>>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    started: AtomicBool,
    timeout: Option<Duration>,
}

impl TokenBroker {
    /// Start building a broker.
    #[must_use]
    pub fn builder(
        port: Arc<dyn FramePort>,
        host: Arc<dyn FrameHost>,
        navigator: Arc<dyn Navigator>,
    ) -> BrokerBuilder {
        BrokerBuilder::new(port, host, navigator)
    }

    /// Spawn the dispatch task consuming inbound envelopes.
    ///
    /// Idempotent: a second call is a no-op, guarding against the duplicate
    /// handling every reply would otherwise receive.
    pub fn start(self: Arc<Self>, mut rx: mpsc::Receiver<MessageEnvelope>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("message dispatch already running; ignoring duplicate start");
            return;
        }

        let broker = self;
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                broker.handle_message(envelope);
            }
            debug!("message channel closed; dispatch task exiting");
        });
    }

    /// Request a token from the hosted frame.
    ///
    /// Registers a correlation entry, waits for the frame's readiness
    /// announcement, posts the request restricted to the trusted origin, and
    /// suspends until a correlated reply settles the entry.
    ///
    /// # Errors
    /// Returns the classified [`TokenError`] when the frame reports a
    /// failure, delivery fails, or the configured timeout elapses.
    pub async fn get_token(&self, args: GetTokenArgs) -> Result<TokenResponse, TokenError> {
        self.host.ensure_frame(&self.frame_url, FRAME_ELEMENT_ID)?;

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);
        debug!(%request_id, "registered pending token request");

        // The send is deferred, never synchronous: the frame must have
        // announced itself before it can receive anything.
        self.wait_ready().await;

        let message = OutboundMessage::get_token(request_id.clone(), args);
        if let Err(err) = self.port.post(&message, &self.target_origin) {
            self.pending.lock().remove(&request_id);
            return Err(err);
        }

        let settled = if let Some(limit) = self.timeout {
            match tokio::time::timeout(limit, rx).await {
                Ok(settled) => settled,
                Err(_) => {
                    self.pending.lock().remove(&request_id);
                    return Err(TokenError::new(
                        TokenErrorCode::Unknown,
                        "Timed out waiting for a token reply.",
                    ));
                }
            }
        } else {
            rx.await
        };

        match settled {
            Ok(Settlement::Resolved(token)) => Ok(token),
            Ok(Settlement::Rejected(err) | Settlement::RedirectTriggered(err)) => Err(err),
            Err(_) => Err(TokenError::new(
                TokenErrorCode::Unknown,
                "The token broker shut down before replying.",
            )),
        }
    }

    /// Dispatch one inbound envelope.
    ///
    /// Envelopes failing the trust check, payloads that do not decode, and
    /// replies for unknown or already-settled ids are all dropped silently;
    /// they may originate from unrelated page activity.
    pub fn handle_message(&self, envelope: MessageEnvelope) {
        if !envelope.is_trusted(&self.target_origin) {
            debug!(origin = %envelope.origin, "dropping message from untrusted sender");
            return;
        }

        let message: InboundMessage = match serde_json::from_value(envelope.data) {
            Ok(message) => message,
            Err(err) => {
                debug!(error = %err, "dropping undecodable message");
                return;
            }
        };

        match message {
            InboundMessage::Ready => {
                // One-shot: later announcements have no effect.
                self.ready_tx.send_replace(true);
                debug!("frame announced readiness");
            }
            InboundMessage::Token { request_id, value } => {
                // The frame's reply carries no expiry; callers must treat
                // the token as having unknown lifetime.
                self.settle(
                    &request_id,
                    Settlement::Resolved(TokenResponse { access_token: value, expires_in: 0 }),
                );
            }
            InboundMessage::Error { request_id, value } => {
                let settlement =
                    match self.decider.classify_frame_error(value.code, value.message) {
                        Disposition::Reject(err) => Settlement::Rejected(err),
                        redirect => Settlement::RedirectTriggered(
                            redirect.apply(self.decider.navigator().as_ref()),
                        ),
                    };
                self.settle(&request_id, settlement);
            }
            InboundMessage::Other => {
                debug!("ignoring unrecognized message type");
            }
        }
    }

    /// Whether the frame has announced readiness.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Number of requests still waiting for a correlated reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    /// Settle the pending entry for `request_id` with `settlement`, at most
    /// once; stale or unknown ids are a no-op.
    fn settle(&self, request_id: &str, settlement: Settlement) {
        let Some(tx) = self.pending.lock().remove(request_id) else {
            debug!(%request_id, "ignoring reply for unknown or already settled request");
            return;
        };

        if tx.send(settlement).is_err() {
            debug!(%request_id, "caller went away before settlement");
        }
    }

    async fn wait_ready(&self) {
        let mut rx = self.ready_rx.clone();
        // The sender lives on self, so this only fails if the broker itself
        // is being torn down; treat that as ready-enough to let the caller
        // observe the closed channel on the settlement path.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// Builder for [`TokenBroker`].
pub struct BrokerBuilder {
    port: Arc<dyn FramePort>,
    host: Arc<dyn FrameHost>,
    navigator: Arc<dyn Navigator>,
    frame_url: String,
    target_origin: String,
    timeout: Option<Duration>,
}

impl BrokerBuilder {
    fn new(
        port: Arc<dyn FramePort>,
        host: Arc<dyn FrameHost>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            port,
            host,
            navigator,
            frame_url: FRAME_URL.to_string(),
            target_origin: TARGET_ORIGIN.to_string(),
            timeout: None,
        }
    }

    /// Point the broker at a non-default frame URL.
    #[must_use]
    pub fn frame_url(mut self, url: impl Into<String>) -> Self {
        self.frame_url = url.into();
        self
    }

    /// Accept and address a non-default trusted origin.
    #[must_use]
    pub fn target_origin(mut self, origin: impl Into<String>) -> Self {
        self.target_origin = origin.into();
        self
    }

    /// Bound how long a request may stay pending. The default is unbounded:
    /// an entry without a correlated reply lives for the life of the
    /// process, since the dominant failure path is a full-page redirect
    /// that discards all in-memory state anyway.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the broker.
    #[must_use]
    pub fn build(self) -> Arc<TokenBroker> {
        let (ready_tx, ready_rx) = watch::channel(false);

        Arc::new(TokenBroker {
            port: self.port,
            host: self.host,
            decider: RedirectDecider::new(self.navigator),
            frame_url: self.frame_url,
            target_origin: self.target_origin,
            pending: Mutex::new(HashMap::new()),
            ready_tx,
            ready_rx,
            started: AtomicBool::new(false),
            timeout: self.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sky_auth_common::testing::RecordingNavigator;

    use super::*;

    /// [`FramePort`] double recording every posted message.
    struct RecordingPort {
        sent: Mutex<Vec<(OutboundMessage, String)>>,
    }

    impl RecordingPort {
        fn new() -> Self {
            Self { sent: Mutex::new(Vec::new()) }
        }

        fn sent(&self) -> Vec<(OutboundMessage, String)> {
            self.sent.lock().clone()
        }
    }

    impl FramePort for RecordingPort {
        fn post(&self, message: &OutboundMessage, target_origin: &str) -> Result<(), TokenError> {
            self.sent.lock().push((message.clone(), target_origin.to_string()));
            Ok(())
        }
    }

    /// [`FrameHost`] double counting provisioning calls.
    struct RecordingHost {
        calls: Mutex<Vec<(String, String)>>,
    }

    impl RecordingHost {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    impl FrameHost for RecordingHost {
        fn ensure_frame(&self, url: &str, element_id: &str) -> Result<(), TokenError> {
            self.calls.lock().push((url.to_string(), element_id.to_string()));
            Ok(())
        }
    }

    struct Harness {
        broker: Arc<TokenBroker>,
        port: Arc<RecordingPort>,
        host: Arc<RecordingHost>,
        navigator: Arc<RecordingNavigator>,
    }

    fn harness() -> Harness {
        let port = Arc::new(RecordingPort::new());
        let host = Arc::new(RecordingHost::new());
        let navigator = Arc::new(RecordingNavigator::at("https://example.com/page"));
        let broker = TokenBroker::builder(port.clone(), host.clone(), navigator.clone()).build();
        Harness { broker, port, host, navigator }
    }

    fn ready_envelope() -> MessageEnvelope {
        MessageEnvelope::new(TARGET_ORIGIN, json!({ "messageType": "ready" }))
    }

    fn token_envelope(request_id: &str, token: &str) -> MessageEnvelope {
        MessageEnvelope::new(
            TARGET_ORIGIN,
            json!({ "messageType": "getToken", "requestId": request_id, "value": token }),
        )
    }

    fn error_envelope(request_id: &str, code: &str, message: &str) -> MessageEnvelope {
        MessageEnvelope::new(
            TARGET_ORIGIN,
            json!({
                "messageType": "error",
                "requestId": request_id,
                "value": { "code": code, "message": message },
            }),
        )
    }

    /// Let spawned callers make progress until `predicate` holds.
    async fn wait_until(mut predicate: impl FnMut() -> bool) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn get_token_waits_for_readiness_before_posting() {
        let h = harness();

        let broker = h.broker.clone();
        let call = tokio::spawn(async move { broker.get_token(GetTokenArgs::default()).await });

        wait_until(|| h.broker.pending_requests() == 1).await;
        assert!(h.port.sent().is_empty(), "nothing may be sent before readiness");

        h.broker.handle_message(ready_envelope());
        wait_until(|| !h.port.sent().is_empty()).await;

        let (message, origin) = h.port.sent().remove(0);
        assert_eq!(message.message_type, "getToken");
        assert_eq!(message.source, "auth-client");
        assert_eq!(origin, TARGET_ORIGIN);

        h.broker.handle_message(token_envelope(&message.request_id, "tok-1"));
        let response = call.await.unwrap().unwrap();
        assert_eq!(
            response,
            TokenResponse { access_token: "tok-1".to_string(), expires_in: 0 }
        );
    }

    #[tokio::test]
    async fn get_token_posts_immediately_once_ready() {
        let h = harness();
        h.broker.handle_message(ready_envelope());
        assert!(h.broker.is_ready());

        let broker = h.broker.clone();
        let call = tokio::spawn(async move { broker.get_token(GetTokenArgs::default()).await });

        wait_until(|| !h.port.sent().is_empty()).await;
        let (message, _) = h.port.sent().remove(0);
        h.broker.handle_message(token_envelope(&message.request_id, "tok"));
        assert!(call.await.unwrap().is_ok());

        // The frame is provisioned idempotently through the host seam.
        assert_eq!(h.host.calls.lock().len(), 1);
        assert_eq!(h.host.calls.lock()[0].1, FRAME_ELEMENT_ID);
    }

    #[tokio::test]
    async fn concurrent_requests_settle_independently() {
        let h = harness();
        h.broker.handle_message(ready_envelope());

        let b1 = h.broker.clone();
        let first = tokio::spawn(async move { b1.get_token(GetTokenArgs::default()).await });
        let b2 = h.broker.clone();
        let second = tokio::spawn(async move { b2.get_token(GetTokenArgs::default()).await });

        wait_until(|| h.port.sent().len() == 2).await;
        let sent = h.port.sent();
        assert_ne!(sent[0].0.request_id, sent[1].0.request_id);

        // Settle the second request first; the first stays pending.
        h.broker.handle_message(token_envelope(&sent[1].0.request_id, "tok-b"));
        wait_until(|| h.broker.pending_requests() == 1).await;
        assert!(!first.is_finished());

        h.broker.handle_message(token_envelope(&sent[0].0.request_id, "tok-a"));
        assert_eq!(first.await.unwrap().unwrap().access_token, "tok-a");
        assert_eq!(second.await.unwrap().unwrap().access_token, "tok-b");
    }

    #[tokio::test]
    async fn untrusted_envelopes_cause_no_state_change() {
        let h = harness();

        h.broker.handle_message(MessageEnvelope::new(
            "https://evil.example.com",
            json!({ "messageType": "ready", "source": "attacker" }),
        ));

        assert!(!h.broker.is_ready());
    }

    #[tokio::test]
    async fn trusted_source_identity_is_accepted_from_any_origin() {
        let h = harness();

        h.broker.handle_message(MessageEnvelope::new(
            "https://unrelated.example.com",
            json!({ "messageType": "ready", "source": "security-token-svc" }),
        ));

        assert!(h.broker.is_ready());
    }

    #[tokio::test]
    async fn stale_and_unknown_request_ids_are_ignored() {
        let h = harness();
        h.broker.handle_message(ready_envelope());

        // Unknown id: nothing pending, nothing happens.
        h.broker.handle_message(token_envelope("no-such-id", "tok"));
        assert_eq!(h.broker.pending_requests(), 0);

        let broker = h.broker.clone();
        let call = tokio::spawn(async move { broker.get_token(GetTokenArgs::default()).await });
        wait_until(|| !h.port.sent().is_empty()).await;
        let id = h.port.sent().remove(0).0.request_id;

        h.broker.handle_message(token_envelope(&id, "tok-1"));
        // Second reply for the same id is stale and must not panic or
        // disturb anything.
        h.broker.handle_message(token_envelope(&id, "tok-2"));

        assert_eq!(call.await.unwrap().unwrap().access_token, "tok-1");
    }

    #[tokio::test]
    async fn frame_offline_error_rejects_without_redirect() {
        let h = harness();
        h.broker.handle_message(ready_envelope());

        let broker = h.broker.clone();
        let call = tokio::spawn(async move { broker.get_token(GetTokenArgs::default()).await });
        wait_until(|| !h.port.sent().is_empty()).await;
        let id = h.port.sent().remove(0).0.request_id;

        h.broker.handle_message(error_envelope(&id, "offline", "The user is offline."));

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.code, TokenErrorCode::Offline);
        assert!(h.navigator.navigations().is_empty());
    }

    #[tokio::test]
    async fn frame_not_logged_in_error_redirects_to_signin() {
        let h = harness();
        h.broker.handle_message(ready_envelope());

        let broker = h.broker.clone();
        let call = tokio::spawn(async move { broker.get_token(GetTokenArgs::default()).await });
        wait_until(|| !h.port.sent().is_empty()).await;
        let id = h.port.sent().remove(0).0.request_id;

        h.broker.handle_message(error_envelope(&id, "not_logged_in", "nope"));

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.code, TokenErrorCode::NotLoggedIn);
        assert_eq!(
            h.navigator.navigations(),
            vec![
                "https://signin.blackbaud.com/signin/?redirectUrl=https%3A%2F%2Fexample.com%2Fpage"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn frame_unknown_error_redirects_to_security_page() {
        let h = harness();
        h.broker.handle_message(ready_envelope());

        let broker = h.broker.clone();
        let call = tokio::spawn(async move { broker.get_token(GetTokenArgs::default()).await });
        wait_until(|| !h.port.sent().is_empty()).await;
        let id = h.port.sent().remove(0).0.request_id;

        h.broker.handle_message(error_envelope(&id, "invalid_env", "not a member"));

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.code, TokenErrorCode::InvalidEnvironment);
        assert_eq!(h.navigator.navigations().len(), 1);
        assert!(h.navigator.navigations()[0].contains("/errors/security?source=auth-client"));
        assert!(h.navigator.navigations()[0].ends_with("&code=invalid_env"));
    }

    #[tokio::test]
    async fn readiness_is_one_shot() {
        let h = harness();
        h.broker.handle_message(ready_envelope());
        assert!(h.broker.is_ready());

        // A second announcement is harmless.
        h.broker.handle_message(ready_envelope());
        assert!(h.broker.is_ready());
    }

    #[tokio::test]
    async fn configured_timeout_expires_pending_entries() {
        let port = Arc::new(RecordingPort::new());
        let host = Arc::new(RecordingHost::new());
        let navigator = Arc::new(RecordingNavigator::at("https://example.com/page"));
        let broker = TokenBroker::builder(port, host, navigator)
            .timeout(Duration::from_millis(20))
            .build();

        broker.handle_message(ready_envelope());
        let err = broker.get_token(GetTokenArgs::default()).await.unwrap_err();

        assert_eq!(err.code, TokenErrorCode::Unknown);
        assert_eq!(broker.pending_requests(), 0);
    }
}
