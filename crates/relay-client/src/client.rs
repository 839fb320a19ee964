//! Session client with automatic reconnection and an offline queue.
//!
//! A [`SessionClient`] is a handle to a single driver task that owns the
//! socket, the connection state and the [`OutboundQueue`]. Every caller
//! operation is a command on one channel, so application sends and transport
//! events are handled strictly one at a time.

use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relay_proto::{MessageEnvelope, ServerEvent};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvent;
use crate::queue::OutboundQueue;
use crate::reconnect::ReconnectConfig;
use crate::state::ClientState;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Session client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Gateway URL, e.g. `ws://localhost:3001`.
    pub url: String,
    /// Time allowed for the TCP connect and WebSocket upgrade.
    pub connect_timeout: Duration,
    /// Time allowed between upgrade and `AUTH_SUCCESS`.
    pub auth_timeout: Duration,
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Create a configuration for the given gateway URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            event_capacity: 256,
        }
    }

    /// Set the reconnection policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the authentication timeout.
    #[must_use]
    pub const fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }
}

/// What happened to a sent envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the gateway connection.
    Sent,
    /// Held in the offline queue until the next successful connection.
    Queued,
}

#[derive(Debug)]
enum Command {
    Connect(String),
    Send {
        envelope: MessageEnvelope,
        reply: oneshot::Sender<Delivery>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    QueueLen {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to a gateway session.
///
/// Dropping the handle stops the driver, which closes the socket and ends
/// the state and event channels.
#[derive(Debug)]
pub struct SessionClient {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ClientState>,
    events: broadcast::Sender<ClientEvent>,
}

impl SessionClient {
    /// Create a client and start its driver task.
    ///
    /// Must be called within a Tokio runtime. The client starts `Disconnected`.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ClientState::Disconnected);
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let driver = Driver {
            config,
            commands: commands_rx,
            state: state_tx,
            events: events_tx.clone(),
            queue: OutboundQueue::new(),
            credential: None,
            attempt: 0,
        };
        tokio::spawn(driver.run());

        Self {
            commands: commands_tx,
            state: state_rx,
            events: events_tx,
        }
    }

    /// Start connecting with `credential`.
    ///
    /// Returns once the driver has taken the request; follow progress through
    /// [`Self::watch_state`] or [`Self::subscribe`]. The credential is kept for
    /// reconnects.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Stopped` if the driver has stopped.
    pub async fn connect(&self, credential: impl Into<String>) -> ClientResult<()> {
        self.commands
            .send(Command::Connect(credential.into()))
            .await
            .map_err(|_| ClientError::Stopped)
    }

    /// Send an envelope, or queue it if not connected.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Stopped` if the driver has stopped.
    pub async fn send(&self, envelope: MessageEnvelope) -> ClientResult<Delivery> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { envelope, reply })
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// Send a chat message to a character, requesting an acknowledgment.
    ///
    /// Returns the generated message id alongside the delivery outcome.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Stopped` if the driver has stopped.
    pub async fn send_chat(
        &self,
        character_id: impl Into<String>,
        message: impl Into<String>,
    ) -> ClientResult<(String, Delivery)> {
        let message_id = format!("msg-{}", uuid::Uuid::new_v4());
        let envelope = MessageEnvelope::character_chat(character_id, message)
            .with_message_id(message_id.clone())
            .with_ack();
        let delivery = self.send(envelope).await?;
        Ok((message_id, delivery))
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// Queued envelopes are kept for the next `connect`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Stopped` if the driver has stopped.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Disconnect { reply })
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// Number of envelopes waiting in the offline queue.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Stopped` if the driver has stopped.
    pub async fn queued(&self) -> ClientResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::QueueLen { reply })
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.state.clone()
    }

    /// Subscribe to client events from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Wait until the client reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Timeout` if `target` is not reached within
    /// `timeout`, or `ClientError::Stopped` if the driver stops first.
    pub async fn wait_for_state(&self, target: ClientState, timeout: Duration) -> ClientResult<()> {
        let mut state = self.state.clone();
        match time::timeout(timeout, state.wait_for(|s| *s == target)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Stopped),
            Err(_) => Err(ClientError::Timeout("state change")),
        }
    }
}

/// Result of running a future while still serving commands.
enum Raced<T> {
    Done(T),
    Disconnected,
    Stopped,
}

/// What the driver should do after a session ends.
enum Flow {
    Idle,
    Stop,
}

/// How a connected session ended.
enum Ended {
    Lost(String),
    Disconnected,
    Stopped,
}

struct Driver {
    config: ClientConfig,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<ClientState>,
    events: broadcast::Sender<ClientEvent>,
    queue: OutboundQueue,
    credential: Option<String>,
    attempt: u32,
}

impl Driver {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Connect(credential) => {
                    self.credential = Some(credential);
                    self.attempt = 0;
                    if let Flow::Stop = self.run_session().await {
                        break;
                    }
                }
                Command::Send { envelope, reply } => {
                    self.queue.push(envelope);
                    let _ = reply.send(Delivery::Queued);
                }
                Command::Disconnect { reply } => {
                    self.set_state(ClientState::Disconnected);
                    let _ = reply.send(());
                }
                Command::QueueLen { reply } => {
                    let _ = reply.send(self.queue.len());
                }
            }
        }
        debug!("session client driver stopped");
    }

    /// Connects, serves the connection, and reconnects after losses until the
    /// session is given up or disconnected.
    async fn run_session(&mut self) -> Flow {
        let mut reconnecting = false;
        loop {
            let Some(credential) = self.credential.clone() else {
                return Flow::Idle;
            };

            self.set_state(ClientState::Connecting);
            let connecting = open_socket(self.config.url.clone(), credential, self.config.connect_timeout);
            let mut ws = match self.race(connecting).await {
                Raced::Done(Ok(ws)) => ws,
                Raced::Done(Err(e)) => match self.attempt_failed(e, reconnecting).await {
                    Some(flow) => return flow,
                    None => continue,
                },
                Raced::Disconnected => return Flow::Idle,
                Raced::Stopped => return Flow::Stop,
            };

            self.set_state(ClientState::Authenticating);
            let auth_timeout = self.config.auth_timeout;
            let user_id = match self.race(await_auth(&mut ws, auth_timeout)).await {
                Raced::Done(Ok(user_id)) => user_id,
                Raced::Done(Err(e)) => {
                    let _ = ws.close(None).await;
                    match self.attempt_failed(e, reconnecting).await {
                        Some(flow) => return flow,
                        None => continue,
                    }
                }
                Raced::Disconnected => {
                    let _ = ws.close(None).await;
                    return Flow::Idle;
                }
                Raced::Stopped => return Flow::Stop,
            };

            self.attempt = 0;
            self.set_state(ClientState::Connected);
            info!(user_id = %user_id, queued = self.queue.len(), "session connected");
            self.emit(ClientEvent::Connected { user_id });

            let ended = match self.drain_queue(&mut ws).await {
                Ok(()) => self.serve(ws).await,
                Err(reason) => Ended::Lost(reason),
            };
            match ended {
                Ended::Lost(reason) => {
                    warn!(reason = %reason, "session lost");
                    self.emit(ClientEvent::Disconnected { reason: reason.clone() });
                    reconnecting = true;
                    if let Some(flow) = self.schedule_retry(reason).await {
                        return flow;
                    }
                }
                Ended::Disconnected => return Flow::Idle,
                Ended::Stopped => return Flow::Stop,
            }
        }
    }

    /// Handles a failed connection attempt. Returns `None` to try again.
    async fn attempt_failed(&mut self, error: ClientError, reconnecting: bool) -> Option<Flow> {
        warn!(error = %error, attempt = self.attempt, "connection attempt failed");
        if !reconnecting || !error.is_retryable() {
            self.set_state(ClientState::Error);
            self.emit(ClientEvent::Error(error.to_string()));
            return Some(Flow::Idle);
        }
        self.schedule_retry(error.to_string()).await
    }

    /// Waits out the backoff for the next attempt. Returns `None` to try again.
    async fn schedule_retry(&mut self, last_error: String) -> Option<Flow> {
        self.attempt = self.attempt.saturating_add(1);
        if !self.config.reconnect.should_reconnect(self.attempt) {
            let attempts = self.attempt - 1;
            warn!(attempts, "giving up on reconnection");
            self.set_state(ClientState::Error);
            self.emit(ClientEvent::ReconnectFailed { attempts, last_error });
            return Some(Flow::Idle);
        }

        let delay = self.config.reconnect.delay_for_attempt(self.attempt);
        self.set_state(ClientState::Reconnecting);
        info!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        self.emit(ClientEvent::Reconnecting {
            attempt: self.attempt,
            delay,
        });

        match self.race(time::sleep(delay)).await {
            Raced::Done(()) => None,
            Raced::Disconnected => Some(Flow::Idle),
            Raced::Stopped => Some(Flow::Stop),
        }
    }

    /// Sends queued envelopes in order. On failure the unsent envelope stays at
    /// the head of the queue.
    async fn drain_queue(&mut self, ws: &mut Ws) -> Result<(), String> {
        if !self.queue.is_empty() {
            debug!(queued = self.queue.len(), "draining offline queue");
        }
        while let Some(envelope) = self.queue.pop() {
            if let Err(e) = write_envelope(ws, &envelope).await {
                self.queue.push_front(envelope);
                return Err(e.to_string());
            }
        }
        Ok(())
    }

    async fn serve(&mut self, mut ws: Ws) -> Ended {
        loop {
            tokio::select! {
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.on_server_frame(&mut ws, text.as_str()).await {
                            return Ended::Lost(e.to_string());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map_or_else(
                            || "server closed connection".to_string(),
                            |f| format!("server closed connection: {}", f.reason),
                        );
                        return Ended::Lost(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Ended::Lost(format!("websocket error: {e}")),
                    None => return Ended::Lost("connection closed".to_string()),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send { envelope, reply }) => match write_envelope(&mut ws, &envelope).await {
                        Ok(()) => {
                            let _ = reply.send(Delivery::Sent);
                        }
                        Err(e) => {
                            self.queue.push(envelope);
                            let _ = reply.send(Delivery::Queued);
                            return Ended::Lost(e.to_string());
                        }
                    },
                    Some(Command::Connect(credential)) => {
                        debug!("already connected, credential kept for reconnects");
                        self.credential = Some(credential);
                    }
                    Some(Command::QueueLen { reply }) => {
                        let _ = reply.send(self.queue.len());
                    }
                    Some(Command::Disconnect { reply }) => {
                        let _ = ws.close(None).await;
                        self.set_state(ClientState::Disconnected);
                        info!("session disconnected by caller");
                        let _ = reply.send(());
                        return Ended::Disconnected;
                    }
                    None => {
                        let _ = ws.close(None).await;
                        return Ended::Stopped;
                    }
                },
            }
        }
    }

    async fn on_server_frame(&mut self, ws: &mut Ws, text: &str) -> ClientResult<()> {
        let event = match ServerEvent::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "ignoring unparseable server frame");
                return Ok(());
            }
        };
        match event {
            ServerEvent::Ping { .. } => write_envelope(ws, &MessageEnvelope::pong()).await?,
            ServerEvent::Ack(ack) => self.emit(ClientEvent::Ack(ack)),
            ServerEvent::CharacterResponse(response) => self.emit(ClientEvent::Response(response)),
            ServerEvent::Error(error) => self.emit(ClientEvent::ServerError(error)),
            ServerEvent::AuthSuccess { .. } | ServerEvent::Pong { .. } => {}
        }
        Ok(())
    }

    /// Runs `fut` to completion while queueing sends and honoring disconnects.
    async fn race<F: Future>(&mut self, fut: F) -> Raced<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                output = &mut fut => return Raced::Done(output),
                command = self.commands.recv() => match command {
                    Some(Command::Send { envelope, reply }) => {
                        self.queue.push(envelope);
                        let _ = reply.send(Delivery::Queued);
                    }
                    Some(Command::Connect(credential)) => {
                        self.credential = Some(credential);
                    }
                    Some(Command::QueueLen { reply }) => {
                        let _ = reply.send(self.queue.len());
                    }
                    Some(Command::Disconnect { reply }) => {
                        self.set_state(ClientState::Disconnected);
                        info!("pending connection cancelled by caller");
                        let _ = reply.send(());
                        return Raced::Disconnected;
                    }
                    None => return Raced::Stopped,
                },
            }
        }
    }

    fn set_state(&self, next: ClientState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(from = %current, to = %next, "client state changed");
                *current = next;
                true
            }
        });
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

async fn open_socket(url: String, credential: String, timeout: Duration) -> ClientResult<Ws> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
    let value = HeaderValue::from_str(&format!("Bearer {credential}")).map_err(|_| ClientError::InvalidCredential)?;
    request.headers_mut().insert(header::AUTHORIZATION, value);

    match time::timeout(timeout, connect_async(request)).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ClientError::Timeout("connect")),
    }
}

async fn await_auth(ws: &mut Ws, timeout: Duration) -> ClientResult<String> {
    let wait = async {
        while let Some(frame) = ws.next().await {
            match frame? {
                Message::Text(text) => match ServerEvent::from_json(text.as_str())? {
                    ServerEvent::AuthSuccess { user_id, .. } => return Ok(user_id),
                    other => {
                        return Err(ClientError::Protocol(format!(
                            "expected AUTH_SUCCESS, got {}",
                            other.kind()
                        )));
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(ClientError::Transport("closed before authentication".to_string()))
    };
    time::timeout(timeout, wait)
        .await
        .map_err(|_| ClientError::Timeout("authentication"))?
}

async fn write_envelope(ws: &mut Ws, envelope: &MessageEnvelope) -> ClientResult<()> {
    let json = envelope.to_json()?;
    ws.send(Message::Text(json.into())).await?;
    Ok(())
}
