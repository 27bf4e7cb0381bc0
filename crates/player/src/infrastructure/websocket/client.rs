//! Connection manager for the game session socket (tokio-tungstenite)
//!
//! One manager owns at most one live link. The link (reader, writer and
//! heartbeat) and any reconnection backoff run inside a single supervisor
//! task stored as a [`ScheduledTask`]; cancelling it tears everything down.
//!
//! Every state write happens under the control lock together with a
//! generation check, so a handshake that completes after `disconnect()` (or
//! after a switch to another session) is discarded instead of resurrecting
//! the old link. Events are dispatched only after the lock is released.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use tavern_domain::ConnectionStatus;
use tavern_protocol::{ClientCommand, Envelope, ServerEventKind};

use super::core::{BackoffState, ScheduledTask};
use super::endpoint::redact;
use super::error::{ConnectionError, ErrorKind};
use super::shared::{CLOSE_TIMEOUT_MS, NO_STATUS_CLOSE_CODE, POLICY_VIOLATION_CLOSE_CODE};
use crate::application::credentials::CredentialResolver;
use crate::config::ConnectionConfig;
use crate::infrastructure::messaging::{
    swap_connection_state, ConnectionState, DisconnectReason,
    EventDispatcher, LifecycleEvent, SessionEvent,
};
use crate::ports::outbound::{GameConnectionPort, SendError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Persistent connection to one game session.
///
/// Cheap to clone; clones share the link. When the last clone is dropped the
/// supervisor task is cancelled.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
    _teardown: Arc<Teardown>,
}

struct Inner {
    config: ConnectionConfig,
    credentials: CredentialResolver,
    dispatcher: EventDispatcher,
    state: AtomicU8,
    attempts: AtomicU32,
    control: Mutex<Control>,
}

#[derive(Default)]
struct Control {
    /// Bumped whenever the current link or attempt is abandoned
    generation: u64,
    session_id: Option<String>,
    /// Writer queue of the live link
    outbound: Option<mpsc::Sender<String>>,
    /// Supervisor of the live link or of the reconnection loop
    task: Option<ScheduledTask>,
}

/// How a link ended
enum LinkEnd {
    /// Our side tore it down
    Cancelled,
    /// Server closed with 1000
    Closed(String),
    /// Server closed with 1008
    AuthRejected(String),
    /// Anything else; triggers reconnection
    Lost(String),
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        credentials: CredentialResolver,
        dispatcher: EventDispatcher,
    ) -> Self {
        let inner = Arc::new(Inner {
            config,
            credentials,
            dispatcher,
            state: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
            attempts: AtomicU32::new(0),
            control: Mutex::new(Control::default()),
        });
        Self {
            _teardown: Arc::new(Teardown(Arc::clone(&inner))),
            inner,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    /// Reconnection attempts scheduled since the link was last up
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Connect to `session_id`.
    ///
    /// Idempotent while connected to the same session. A different session
    /// replaces the current link, which is closed before the new attempt
    /// starts. Returns once the handshake has completed or failed.
    ///
    /// A transport failure still schedules reconnection in the background;
    /// the error is returned so the caller knows the first attempt failed.
    pub async fn connect(&self, session_id: &str) -> Result<(), ConnectionError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(ConnectionError::InvalidEndpoint(
                "session id is empty".to_string(),
            ));
        }

        let (generation, previous_task, events) = {
            let mut control = self.inner.lock();
            let state = self.inner.state();
            if state.is_busy() {
                return Err(ConnectionError::ConnectInProgress);
            }
            if state == ConnectionState::Connected
                && control.session_id.as_deref() == Some(session_id)
            {
                tracing::debug!(session_id, "Already connected");
                return Ok(());
            }

            let mut events = Vec::new();
            if state == ConnectionState::Connected {
                events.push(SessionEvent::Lifecycle(LifecycleEvent::Disconnected {
                    reason: DisconnectReason::SessionChanged,
                }));
            }
            control.generation += 1;
            control.outbound = None;
            control.session_id = Some(session_id.to_string());
            self.inner.attempts.store(0, Ordering::SeqCst);
            events.extend(self.inner.set_state(ConnectionState::Connecting));
            (control.generation, control.task.take(), events)
        };

        if let Some(task) = previous_task {
            task.stop().await;
        }
        self.inner.emit(events);

        tracing::info!(session_id, "Connecting to game session");
        match self.inner.establish(session_id).await {
            Ok(ws) => self.start_link(generation, ws).await,
            Err(e) => {
                let terminal = e.is_fatal() || !matches!(e, ConnectionError::Transport(_));
                tracing::warn!(session_id, error = %e, terminal, "Connection attempt failed");
                if !self
                    .inner
                    .report_failure(generation, e.kind(), e.to_string(), terminal)
                {
                    return Err(ConnectionError::Cancelled);
                }
                if !terminal {
                    self.spawn_supervisor(generation, None);
                }
                Err(e)
            }
        }
    }

    /// Close the link, cancel any reconnection and return to `Disconnected`.
    ///
    /// Also valid while `Connecting`: the in-flight handshake is discarded
    /// when it completes.
    pub async fn disconnect(&self) {
        let (task, events) = {
            let mut control = self.inner.lock();
            control.generation += 1;
            control.outbound = None;
            control.session_id = None;
            self.inner.attempts.store(0, Ordering::SeqCst);
            let events: Vec<SessionEvent> = self
                .inner
                .set_state(ConnectionState::Disconnected)
                .into_iter()
                .chain(std::iter::once(SessionEvent::Lifecycle(
                    LifecycleEvent::Disconnected {
                        reason: DisconnectReason::Requested,
                    },
                )))
                .collect();
            (control.task.take(), events)
        };

        if let Some(task) = task {
            task.stop().await;
        }
        // Only announce if something was actually torn down
        if events.len() > 1 {
            tracing::info!("Disconnected from game session");
            self.inner.emit(events);
        }
    }

    /// Queue an envelope on the live link. Never blocks.
    pub fn send(&self, envelope: Envelope) -> Result<(), SendError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(SendError::SendWhileDisconnected {
                state: state.into(),
            });
        }
        let text = envelope
            .to_json()
            .map_err(|e| SendError::Serialize(e.to_string()))?;

        let control = self.inner.lock();
        let Some(tx) = control.outbound.as_ref() else {
            return Err(SendError::SendWhileDisconnected {
                state: self.state().into(),
            });
        };
        tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::SendWhileDisconnected {
                state: self.state().into(),
            },
        })?;
        tracing::trace!(kind = %envelope.kind, "Queued outbound frame");
        Ok(())
    }

    async fn start_link(&self, generation: u64, mut ws: WsStream) -> Result<(), ConnectionError> {
        let Some((rx, events)) = self.inner.install_link(generation) else {
            tracing::debug!("Discarding handshake completed after teardown");
            close_quietly(&mut ws).await;
            return Err(ConnectionError::Cancelled);
        };
        tracing::info!("Connected to game session");
        self.inner
            .emit(events.into_iter().chain(std::iter::once(SessionEvent::Lifecycle(
                LifecycleEvent::Connected,
            ))));

        if self.spawn_supervisor(generation, Some((ws, rx))) {
            Ok(())
        } else {
            Err(ConnectionError::Cancelled)
        }
    }

    fn spawn_supervisor(
        &self,
        generation: u64,
        link: Option<(WsStream, mpsc::Receiver<String>)>,
    ) -> bool {
        let mut control = self.inner.lock();
        if control.generation != generation {
            return false;
        }
        let inner = Arc::clone(&self.inner);
        control.task = Some(ScheduledTask::spawn(move |cancel| {
            supervise(inner, generation, link, cancel)
        }));
        true
    }
}

impl GameConnectionPort for ConnectionManager {
    fn status(&self) -> ConnectionStatus {
        self.state().into()
    }

    fn send(&self, envelope: Envelope) -> Result<(), SendError> {
        ConnectionManager::send(self, envelope)
    }
}

/// Runs the live link, then reconnects with backoff until the link is back,
/// attempts are exhausted, a fatal error occurs or the task is cancelled.
async fn supervise(
    inner: Arc<Inner>,
    generation: u64,
    mut link: Option<(WsStream, mpsc::Receiver<String>)>,
    cancel: CancellationToken,
) {
    let mut backoff = BackoffState::new(inner.config.reconnect);

    loop {
        if let Some((ws, rx)) = link.take() {
            match run_link(&inner, ws, rx, &cancel).await {
                LinkEnd::Cancelled => return,
                LinkEnd::Closed(reason) => {
                    inner.closed_by_server(generation, reason);
                    return;
                }
                LinkEnd::AuthRejected(reason) => {
                    let e = ConnectionError::AuthRejected(reason);
                    tracing::error!(error = %e, "Server rejected the session token");
                    inner.report_failure(generation, e.kind(), e.to_string(), true);
                    return;
                }
                LinkEnd::Lost(reason) => {
                    tracing::warn!(reason = %reason, "Connection lost");
                    if !inner.link_lost(generation, reason) {
                        return;
                    }
                }
            }
        }

        let Some(delay) = backoff.next_delay_and_advance() else {
            tracing::error!(
                attempts = backoff.attempts(),
                "Max reconnection attempts reached, giving up"
            );
            inner.report_failure(
                generation,
                ErrorKind::ReconnectExhausted,
                format!("gave up after {} reconnection attempts", backoff.attempts()),
                true,
            );
            return;
        };
        let attempt = backoff.attempts();
        tracing::info!(
            attempt,
            max_attempts = inner.config.reconnect.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnection"
        );
        if !inner.schedule_retry(generation, attempt, delay) {
            return;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(session_id) = inner.session_for(generation) else {
            return;
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = inner.establish(&session_id) => result,
        };

        match result {
            Ok(mut ws) => match inner.install_link(generation) {
                Some((rx, events)) => {
                    tracing::info!(attempt, "Reconnected to game session");
                    backoff.reset();
                    inner.emit(events.into_iter().chain(std::iter::once(
                        SessionEvent::Lifecycle(LifecycleEvent::Reconnected),
                    )));
                    link = Some((ws, rx));
                }
                None => {
                    close_quietly(&mut ws).await;
                    return;
                }
            },
            Err(e) if e.is_fatal() => {
                tracing::error!(attempt, error = %e, "Reconnection failed permanently");
                inner.report_failure(generation, e.kind(), e.to_string(), true);
                return;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Reconnection attempt failed");
                if !inner.report_failure(generation, e.kind(), e.to_string(), false) {
                    return;
                }
            }
        }
    }
}

/// Pump one link until it ends.
///
/// Inbound frames are dispatched inline, so each handler finishes before the
/// next frame is read.
async fn run_link(
    inner: &Inner,
    ws: WsStream,
    mut rx: mpsc::Receiver<String>,
    cancel: &CancellationToken,
) -> LinkEnd {
    let (mut write, mut read) = ws.split();
    let period = inner.config.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                };
                let close = write.send(WsMessage::Close(Some(frame)));
                if timeout(Duration::from_millis(CLOSE_TIMEOUT_MS), close).await.is_err() {
                    tracing::debug!("Timed out sending close frame");
                }
                return LinkEnd::Cancelled;
            }

            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => inner.handle_frame(&text),
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((NO_STATUS_CLOSE_CODE, String::new()));
                    tracing::info!(code, reason = %reason, "Server closed connection");
                    return match code {
                        POLICY_VIOLATION_CLOSE_CODE => LinkEnd::AuthRejected(reason),
                        1000 => LinkEnd::Closed(reason),
                        _ => LinkEnd::Lost(format!("closed with code {code}: {reason}")),
                    };
                }
                // tungstenite answers pings itself
                Some(Ok(_)) => {}
                Some(Err(e)) => return LinkEnd::Lost(e.to_string()),
                None => return LinkEnd::Lost("connection closed without close frame".to_string()),
            },

            outbound = rx.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = write.send(WsMessage::Text(text)).await {
                        return LinkEnd::Lost(format!("write failed: {e}"));
                    }
                }
                // Sender dropped: the manager abandoned this link
                None => return LinkEnd::Cancelled,
            },

            _ = heartbeat.tick() => {
                match ClientCommand::Ping.into_envelope().to_json() {
                    Ok(ping) => {
                        tracing::trace!("Sending heartbeat");
                        if let Err(e) = write.send(WsMessage::Text(ping)).await {
                            return LinkEnd::Lost(format!("heartbeat failed: {e}"));
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to encode heartbeat"),
                }
            }
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Must be called with the control lock held. Returns the event to emit
    /// if the state changed.
    fn set_state(&self, to: ConnectionState) -> Option<SessionEvent> {
        let from = swap_connection_state(&self.state, to);
        if from == to {
            return None;
        }
        tracing::debug!(from = ?from, to = ?to, "Connection state changed");
        Some(SessionEvent::StateChanged(to))
    }

    fn emit(&self, events: impl IntoIterator<Item = SessionEvent>) {
        for event in events {
            self.dispatcher.dispatch(&event);
        }
    }

    fn handle_frame(&self, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping frame that is not an envelope");
                return;
            }
        };
        if envelope.kind == ServerEventKind::Pong.as_str() {
            tracing::trace!("Heartbeat acknowledged");
            return;
        }
        // Failures are logged by the dispatcher
        let _ = self.dispatcher.dispatch_envelope(&envelope);
    }

    /// Resolve credentials and endpoint, probe, then perform the handshake
    async fn establish(&self, session_id: &str) -> Result<WsStream, ConnectionError> {
        let token = self
            .credentials
            .resolve()
            .map_err(|_| ConnectionError::AuthMissing)?;
        let url = self.config.endpoint.resolve(session_id, token.expose())?;
        let shown = redact(&url);

        self.probe(&url, &shown).await?;

        tracing::debug!(url = %shown, "Opening session socket");
        match timeout(self.config.handshake_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(classify_handshake_error(e)),
            Err(_) => Err(ConnectionError::Transport(format!(
                "handshake timed out after {}ms",
                self.config.handshake_timeout.as_millis()
            ))),
        }
    }

    /// Open and immediately close a throwaway connection
    async fn probe(&self, url: &Url, shown: &str) -> Result<(), ConnectionError> {
        let failed = |reason: String| ConnectionError::ConnectivityProbeFailed {
            url: shown.to_string(),
            reason,
        };
        match timeout(self.config.probe_timeout, connect_async(url.as_str())).await {
            Ok(Ok((mut ws, _))) => {
                close_quietly(&mut ws).await;
                tracing::trace!(url = %shown, "Connectivity probe succeeded");
                Ok(())
            }
            Ok(Err(e)) => match classify_handshake_error(e) {
                rejected @ ConnectionError::AuthRejected(_) => Err(rejected),
                other => Err(failed(other.to_string())),
            },
            Err(_) => Err(failed(format!(
                "no answer within {}ms",
                self.config.probe_timeout.as_millis()
            ))),
        }
    }

    fn session_for(&self, generation: u64) -> Option<String> {
        let control = self.lock();
        (control.generation == generation)
            .then(|| control.session_id.clone())
            .flatten()
    }

    /// Install a fresh writer queue and mark the link up
    fn install_link(
        &self,
        generation: u64,
    ) -> Option<(mpsc::Receiver<String>, Option<SessionEvent>)> {
        let mut control = self.lock();
        if control.generation != generation {
            return None;
        }
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        control.outbound = Some(tx);
        self.attempts.store(0, Ordering::SeqCst);
        let event = self.set_state(ConnectionState::Connected);
        Some((rx, event))
    }

    fn link_lost(&self, generation: u64, reason: String) -> bool {
        let events = {
            let mut control = self.lock();
            if control.generation != generation {
                return false;
            }
            control.outbound = None;
            let mut events: Vec<SessionEvent> =
                self.set_state(ConnectionState::Reconnecting).into_iter().collect();
            events.push(SessionEvent::Lifecycle(LifecycleEvent::Disconnected {
                reason: DisconnectReason::Unexpected(reason),
            }));
            events
        };
        self.emit(events);
        true
    }

    fn closed_by_server(&self, generation: u64, reason: String) {
        let events = {
            let mut control = self.lock();
            if control.generation != generation {
                return;
            }
            control.outbound = None;
            let mut events: Vec<SessionEvent> =
                self.set_state(ConnectionState::Disconnected).into_iter().collect();
            events.push(SessionEvent::Lifecycle(LifecycleEvent::Disconnected {
                reason: DisconnectReason::ClosedByServer(reason),
            }));
            events
        };
        self.emit(events);
    }

    fn schedule_retry(&self, generation: u64, attempt: u32, delay: Duration) -> bool {
        let events = {
            let control = self.lock();
            if control.generation != generation {
                return false;
            }
            self.attempts.store(attempt, Ordering::SeqCst);
            let mut events: Vec<SessionEvent> =
                self.set_state(ConnectionState::Reconnecting).into_iter().collect();
            events.push(SessionEvent::Lifecycle(LifecycleEvent::ReconnectScheduled {
                attempt,
                delay,
            }));
            events
        };
        self.emit(events);
        true
    }

    /// Enter `Error` and report it. Returns false if the generation is stale.
    fn report_failure(
        &self,
        generation: u64,
        kind: ErrorKind,
        message: String,
        terminal: bool,
    ) -> bool {
        let events = {
            let mut control = self.lock();
            if control.generation != generation {
                return false;
            }
            control.outbound = None;
            let mut events: Vec<SessionEvent> =
                self.set_state(ConnectionState::Error).into_iter().collect();
            events.push(SessionEvent::Lifecycle(LifecycleEvent::Error {
                kind,
                message,
                terminal,
            }));
            events
        };
        self.emit(events);
        true
    }
}

/// Cancels the supervisor when the last manager clone goes away
struct Teardown(Arc<Inner>);

impl Drop for Teardown {
    fn drop(&mut self) {
        let mut control = self.0.lock();
        control.generation += 1;
        control.outbound = None;
        if let Some(task) = control.task.take() {
            task.cancel();
        }
        swap_connection_state(&self.0.state, ConnectionState::Disconnected);
    }
}

fn classify_handshake_error(e: tungstenite::Error) -> ConnectionError {
    match e {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if matches!(status.as_u16(), 401 | 403) {
                ConnectionError::AuthRejected(format!("handshake refused with HTTP {status}"))
            } else {
                ConnectionError::Transport(format!("handshake refused with HTTP {status}"))
            }
        }
        other => ConnectionError::Transport(other.to_string()),
    }
}

async fn close_quietly(ws: &mut WsStream) {
    let close = ws.close(None);
    match timeout(Duration::from_millis(CLOSE_TIMEOUT_MS), close).await {
        Ok(Ok(())) | Err(_) => {}
        Ok(Err(e)) => tracing::trace!(error = %e, "Ignoring close error"),
    }
}
