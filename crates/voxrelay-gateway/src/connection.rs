//! WebSocket session lifecycle: register, run the turn loop, tear down once.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{future, FutureExt, SinkExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use voxrelay_core::error::TransportError;

use crate::pipeline::{Inbound, Outbound, Pipeline, SessionContext, SessionEnd, TurnSink};
use crate::state::GatewayState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Lifecycle guard for one session. Teardown side effects run exactly once,
/// whichever path reaches [`SessionHandle::close`] first.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: String,
    state: AtomicU8,
    peer_closed: AtomicBool,
}

impl SessionHandle {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            peer_closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `Connecting -> Open`. No effect in any other state.
    pub fn open(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Open as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// The client already sent a close frame or went away; ours is skipped.
    pub fn mark_peer_closed(&self) {
        self.peer_closed.store(true, Ordering::SeqCst);
    }

    /// Close the session. Returns `true` only for the call that performed
    /// the close; later calls are no-ops.
    pub async fn close<S: TurnSink + ?Sized>(&self, sink: &mut S) -> bool {
        let claimed = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                match SessionState::from_u8(current) {
                    SessionState::Connecting | SessionState::Open => {
                        Some(SessionState::Closing as u8)
                    }
                    SessionState::Closing | SessionState::Closed => None,
                }
            })
            .is_ok();
        if !claimed {
            return false;
        }

        if !self.peer_closed.load(Ordering::SeqCst) {
            if let Err(e) = sink.close().await {
                debug!(session_id = %self.session_id, %e, "Close frame not delivered");
            }
        }
        self.state.store(SessionState::Closed as u8, Ordering::SeqCst);
        true
    }
}

/// Outbound half of an axum WebSocket.
pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WsSink {
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl TurnSink for WsSink {
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError> {
        let message = match frame {
            Outbound::Json(text) => Message::Text(text.into()),
            Outbound::Audio(bytes) => Message::Binary(bytes.into()),
        };
        self.inner
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// Map a raw WebSocket message to a pipeline frame. Ping and pong are
/// answered by axum and never reach the pipeline.
fn inbound_frame(msg: Result<Message, axum::Error>) -> Option<Result<Inbound, TransportError>> {
    match msg {
        Ok(Message::Binary(bytes)) => Some(Ok(Inbound::Audio(bytes.to_vec()))),
        Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.to_string()))),
        Ok(Message::Close(_)) => Some(Ok(Inbound::Close)),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle a new WebSocket connection.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let session_id = Uuid::new_v4().to_string();
    let handle = SessionHandle::new(&session_id);

    let (ws_tx, ws_rx) = ws.split();
    let mut sink = WsSink::new(ws_tx);
    let mut inbound = ws_rx.filter_map(|msg| future::ready(inbound_frame(msg)));

    state.register_session(&session_id).await;
    handle.open();
    #[cfg(feature = "metrics")]
    crate::metrics::record_session_open();
    info!(session_id = %session_id, "Session opened");

    let pipeline = Pipeline::from_state(&state);
    let mut session = SessionContext::new(&session_id, &state.default_voice);

    let end = AssertUnwindSafe(pipeline.run_session(&mut session, &mut inbound, &mut sink))
        .catch_unwind()
        .await;

    let reason = match end {
        Ok(SessionEnd::ClientClosed) => {
            handle.mark_peer_closed();
            "client_closed"
        }
        Ok(SessionEnd::StreamEnded) => {
            handle.mark_peer_closed();
            "stream_ended"
        }
        Ok(SessionEnd::Transport(e)) => {
            warn!(session_id = %session_id, %e, "Session transport failed");
            "transport"
        }
        Err(payload) => {
            error!(
                session_id = %session_id,
                panic = %panic_message(payload.as_ref()),
                "Turn loop panicked"
            );
            "fault"
        }
    };

    if handle.close(&mut sink).await {
        state.deregister_session(&session_id).await;
        #[cfg(feature = "metrics")]
        crate::metrics::record_session_close(reason);
        info!(session_id = %session_id, turns = session.turns, reason, "Session closed");
    }
}
