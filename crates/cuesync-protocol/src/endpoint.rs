//! Request/response correlation over a framed, ordered transport.
//!
//! An [`Endpoint`] knows nothing about sockets. Outgoing frames go into an
//! [`Outbound`] channel that some transport drains; incoming frames are fed
//! to [`Endpoint::receive`] together with the role's [`Handler`]. Both
//! directions of request traffic are multiplexed on the one connection.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use cuesync_core::message::{Message, Protocol, RawMessage, RequestId, ReservedNotification};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::RequestError;
use crate::metadata::ConnectionMetadataManager;

/// Sink for encoded frames. The transport owns the receiving half.
pub type Outbound = mpsc::UnboundedSender<String>;

/// A typed frame of protocol `P`.
pub type ProtocolMessage<P> = Message<
    <P as Protocol>::Request,
    <P as Protocol>::Response,
    <P as Protocol>::Notification,
>;

type Slot<P> = oneshot::Sender<Result<<P as Protocol>::Response, RequestError>>;

/// Process-unique identity of one endpoint (one connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

/// Application behaviour of one side of a protocol.
pub trait Handler<P: Protocol>: Send + Sync + 'static {
    /// Answer an incoming request. An `Err` is sent back as an
    /// `error_response` carrying the error's message.
    fn handle_request(
        &self,
        request: P::Request,
    ) -> impl Future<Output = anyhow::Result<P::Response>> + Send + 'static;

    fn handle_notification(&self, notification: P::Notification);

    /// The transport is gone.
    fn handle_closed(&self) {}
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// One side of a connection speaking protocol `P`. Cheap to clone.
pub struct Endpoint<P: Protocol> {
    inner: Arc<EndpointInner<P>>,
}

struct EndpointInner<P: Protocol> {
    id: EndpointId,
    outbound: Outbound,
    pending: DashMap<RequestId, Slot<P>>,
    next_request_id: AtomicU32,
    metadata: Option<ConnectionMetadataManager>,
}

impl<P: Protocol> Clone for Endpoint<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Protocol> Endpoint<P> {
    pub fn new(outbound: Outbound) -> Self {
        Self::build(outbound, None)
    }

    /// Create an endpoint that takes part in connection-metadata gossip.
    /// It is registered with `manager` under `connection_type` until
    /// [`closed`](Self::closed) is called.
    pub fn with_metadata(
        outbound: Outbound,
        manager: &ConnectionMetadataManager,
        connection_type: &str,
    ) -> Self {
        let endpoint = Self::build(outbound, Some(manager.clone()));
        manager.register_endpoint(endpoint.id(), connection_type, endpoint.inner.outbound.clone());
        endpoint
    }

    fn build(outbound: Outbound, metadata: Option<ConnectionMetadataManager>) -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                id: EndpointId::next(),
                outbound,
                pending: DashMap::new(),
                next_request_id: AtomicU32::new(0),
                metadata,
            }),
        }
    }

    pub fn id(&self) -> EndpointId {
        self.inner.id
    }

    pub fn metadata(&self) -> Option<&ConnectionMetadataManager> {
        self.inner.metadata.as_ref()
    }

    /// Requests sent but not yet answered.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    // ── Outgoing ──────────────────────────────────────────────────────────────

    /// Send a request and wait for the matching response.
    ///
    /// Waits indefinitely: closing the transport does not resolve the
    /// request unless the role calls [`reject_all_pending`](Self::reject_all_pending).
    /// Dropping the returned future releases the request id.
    pub async fn request(&self, request: P::Request) -> Result<P::Response, RequestError> {
        let (tx, rx) = oneshot::channel();
        let request_id = self.allocate(tx);
        let mut guard: PendingGuard<'_, P> = PendingGuard {
            pending: &self.inner.pending,
            request_id,
            settled: false,
        };

        tracing::trace!(endpoint = %self.id(), protocol = P::NAME, request_id, "sending request");
        self.send(&Message::Request { request_id, request })?;

        let result = match rx.await {
            Ok(result) => result,
            Err(_) => Err(RequestError::Closed),
        };
        guard.settled = true;
        result
    }

    /// Fire-and-forget.
    pub fn send_notification(&self, notification: P::Notification) {
        if let Err(e) = self.send(&Message::Notification { notification }) {
            tracing::debug!(endpoint = %self.id(), protocol = P::NAME, error = %e, "notification dropped");
        }
    }

    fn send(&self, message: &ProtocolMessage<P>) -> Result<(), RequestError> {
        let frame = message
            .to_frame()
            .map_err(|e| RequestError::Encode(e.to_string()))?;
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| RequestError::Closed)
    }

    /// Reserve the next free id for `slot`. Ids wrap and skip any still in use.
    fn allocate(&self, slot: Slot<P>) -> RequestId {
        loop {
            let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
            if let Entry::Vacant(entry) = self.inner.pending.entry(id) {
                entry.insert(slot);
                return id;
            }
        }
    }

    // ── Incoming ──────────────────────────────────────────────────────────────

    /// Process one frame from the transport.
    ///
    /// Requests are answered from a spawned task, so this must run inside a
    /// tokio runtime.
    pub fn receive<H: Handler<P>>(&self, handler: &H, frame: &str) {
        let message = match RawMessage::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(endpoint = %self.id(), protocol = P::NAME, error = %e, "dropping undecodable frame");
                return;
            }
        };

        match message {
            Message::Request { request_id, request } => {
                self.handle_request(handler, request_id, request)
            }
            Message::Response {
                request_id,
                response,
            } => {
                let result = serde_json::from_value::<P::Response>(response)
                    .map_err(|e| RequestError::UnexpectedResponse(e.to_string()));
                self.settle(request_id, result);
            }
            Message::ErrorResponse {
                request_id,
                message,
            } => {
                tracing::debug!(endpoint = %self.id(), protocol = P::NAME, request_id, %message, "received error for request");
                self.settle(request_id, Err(RequestError::Remote(message)));
            }
            Message::Notification { notification } => {
                self.handle_notification(handler, notification)
            }
        }
    }

    fn handle_request<H: Handler<P>>(
        &self,
        handler: &H,
        request_id: RequestId,
        payload: serde_json::Value,
    ) {
        let request = match serde_json::from_value::<P::Request>(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(endpoint = %self.id(), protocol = P::NAME, request_id, error = %e, "unrecognised request");
                let reply = Message::ErrorResponse {
                    request_id,
                    message: format!("unrecognised request: {e}"),
                };
                if let Err(e) = self.send(&reply) {
                    tracing::debug!(endpoint = %self.id(), error = %e, "could not send error response");
                }
                return;
            }
        };

        let future = handler.handle_request(request);
        let endpoint = self.clone();
        tokio::spawn(async move {
            let reply = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(response)) => Message::Response {
                    request_id,
                    response,
                },
                Ok(Err(e)) => {
                    tracing::debug!(endpoint = %endpoint.id(), protocol = P::NAME, request_id, error = %e, "request handler failed");
                    Message::ErrorResponse {
                        request_id,
                        message: e.to_string(),
                    }
                }
                Err(_) => {
                    tracing::error!(endpoint = %endpoint.id(), protocol = P::NAME, request_id, "request handler panicked");
                    Message::ErrorResponse {
                        request_id,
                        message: "internal error".to_string(),
                    }
                }
            };
            if let Err(e) = endpoint.send(&reply) {
                tracing::debug!(endpoint = %endpoint.id(), request_id, error = %e, "could not send response");
            }
        });
    }

    fn settle(&self, request_id: RequestId, result: Result<P::Response, RequestError>) {
        match self.inner.pending.remove(&request_id) {
            Some((_, slot)) => {
                // The requester may have stopped waiting.
                let _ = slot.send(result);
            }
            None => {
                tracing::warn!(endpoint = %self.id(), protocol = P::NAME, request_id, "response for unknown request, dropping");
            }
        }
    }

    fn handle_notification<H: Handler<P>>(&self, handler: &H, payload: serde_json::Value) {
        if ReservedNotification::is_reserved(&payload) {
            match serde_json::from_value::<ReservedNotification>(payload) {
                Ok(ReservedNotification::ConnectionMetadata(notification)) => match self.metadata() {
                    Some(manager) => manager.accept_notification(self.id(), notification),
                    None => {
                        tracing::trace!(endpoint = %self.id(), "no metadata manager, ignoring connection metadata")
                    }
                },
                Err(e) => {
                    tracing::warn!(endpoint = %self.id(), error = %e, "malformed connection metadata");
                }
            }
            return;
        }

        match serde_json::from_value::<P::Notification>(payload) {
            Ok(notification) => handler.handle_notification(notification),
            Err(e) => {
                tracing::warn!(endpoint = %self.id(), protocol = P::NAME, error = %e, "unrecognised notification");
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// The transport is gone. Notifies the handler and leaves the gossip
    /// layer. Outstanding requests stay pending.
    pub fn closed<H: Handler<P>>(&self, handler: &H) {
        tracing::debug!(
            endpoint = %self.id(),
            protocol = P::NAME,
            pending = self.pending_requests(),
            "endpoint closed"
        );
        handler.handle_closed();
        if let Some(manager) = self.metadata() {
            manager.remove_endpoint(self.id());
        }
    }

    /// Fail every outstanding request with [`RequestError::Closed`].
    pub fn reject_all_pending(&self) {
        let ids: Vec<RequestId> = self.inner.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, slot)) = self.inner.pending.remove(&id) {
                let _ = slot.send(Err(RequestError::Closed));
            }
        }
    }
}

/// Frees a request id when the requesting future is dropped early.
struct PendingGuard<'a, P: Protocol> {
    pending: &'a DashMap<RequestId, Slot<P>>,
    request_id: RequestId,
    settled: bool,
}

impl<P: Protocol> Drop for PendingGuard<'_, P> {
    fn drop(&mut self) {
        if !self.settled {
            self.pending.remove(&self.request_id);
        }
    }
}
