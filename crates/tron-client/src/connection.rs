//! Hub session: socket ownership, status flags, login and dispatch.
//!
//! ```text
//! socket ──► LineCodec ──► LineParser ──► Reply ─┬─► CommandRegistry (by id)
//!                                                 └─► KeywordStore ──► listeners
//! Connection::send_command ──► CommandRegistry ──► writer task ──► socket
//! ```
//!
//! One reader task and one writer task run per socket. The command registry
//! and the keyword store each sit behind their own mutex, which is never held
//! across an `.await` on I/O. Replies are dispatched in arrival order.
//!
//! A [`Connection`] is a cheap handle; clones share one session. The host
//! owns it for the application's lifetime and calls [`Connection::disconnect`]
//! on shutdown.

use crate::auth;
use crate::codec::LineCodec;
use crate::command::{Command, CommandStatus};
use crate::config::{ClientConfig, ClientIdentity};
use crate::error::AuthError;
use crate::keywords::{ActorKeyword, KeywordListener, KeywordStore, ListenerId, SubscribeOutcome};
use crate::registry::CommandRegistry;
use crate::secrets::SecretStore;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tron_core::{Commander, ConnectionStatus, LineParser};

/// Hard ceiling on how long [`Connection::connect`] waits for the socket.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(50);

const LINK_FLAGS: ConnectionStatus = ConnectionStatus::CONNECTED
    .union(ConnectionStatus::CONNECTING)
    .union(ConnectionStatus::AUTHORISING)
    .union(ConnectionStatus::AUTHORISED)
    .union(ConnectionStatus::READY);

/// Byte stream to the hub.
pub trait HubStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> HubStream for T {}

/// Opens the byte stream to the hub.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, host: &str, port: u16) -> io::Result<Box<dyn HubStream>>;
}

/// Plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, host: &str, port: u16) -> io::Result<Box<dyn HubStream>> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

struct Session {
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    fn abort(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[derive(Default)]
struct SessionSlot {
    /// Bumped whenever a socket is opened or torn down; tasks from older
    /// generations must not touch the current session.
    generation: u64,
    pending: Option<JoinHandle<()>>,
    active: Option<Session>,
}

struct Shared {
    config: ClientConfig,
    identity: ClientIdentity,
    connector: Arc<dyn Connector>,
    secrets: Arc<dyn SecretStore>,
    status: watch::Sender<ConnectionStatus>,
    commands: Mutex<CommandRegistry>,
    keywords: Mutex<KeywordStore>,
    session: Mutex<SessionSlot>,
    commander: Mutex<Option<Commander>>,
}

impl Shared {
    fn update_status(&self, f: impl FnOnce(&mut ConnectionStatus)) -> ConnectionStatus {
        self.status.send_modify(f);
        let status = *self.status.borrow();
        tracing::debug!(%status, "connection status changed");
        status
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }
}

/// Handle to the hub session.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// A connection that reaches the hub over TCP.
    pub fn new(
        config: ClientConfig,
        identity: ClientIdentity,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self::with_connector(config, identity, secrets, Arc::new(TcpConnector))
    }

    pub fn with_connector(
        config: ClientConfig,
        identity: ClientIdentity,
        secrets: Arc<dyn SecretStore>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::DISCONNECTED);
        let keywords = KeywordStore::new(&config);
        Self {
            shared: Arc::new(Shared {
                config,
                identity,
                connector,
                secrets,
                status,
                commands: Mutex::new(CommandRegistry::new()),
                keywords: Mutex::new(keywords),
                session: Mutex::new(SessionSlot::default()),
                commander: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Every status change is published here.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// The commander assigned at login, while authorised.
    pub async fn commander(&self) -> Option<Commander> {
        self.shared.commander.lock().await.clone()
    }

    /// Open the socket and wait up to [`CONNECT_TIMEOUT`] for it.
    ///
    /// Returns the resulting status without waiting if a link is already up.
    /// If the socket is still opening at the deadline the attempt is dropped
    /// and the status becomes `TIMED_OUT`.
    pub async fn connect(&self, host: &str, port: u16) -> ConnectionStatus {
        let current = self.status();
        let linked = ConnectionStatus::CONNECTED
            | ConnectionStatus::AUTHORISING
            | ConnectionStatus::AUTHORISED;
        if current.intersects(linked) {
            return current;
        }
        if !current.contains(ConnectionStatus::CONNECTING) {
            self.start_open(host, port).await;
        }
        self.wait_for_open().await
    }

    async fn start_open(&self, host: &str, port: u16) {
        let mut slot = self.shared.session.lock().await;
        slot.generation += 1;
        let generation = slot.generation;
        if let Some(pending) = slot.pending.take() {
            pending.abort();
        }

        tracing::info!(host, port, "connecting to hub");
        self.shared.update_status(|s| {
            s.remove(
                ConnectionStatus::DISCONNECTED
                    | ConnectionStatus::FAILED
                    | ConnectionStatus::TIMED_OUT,
            );
            s.insert(ConnectionStatus::CONNECTING);
        });

        let shared = Arc::clone(&self.shared);
        let host = host.to_string();
        slot.pending = Some(tokio::spawn(async move {
            let result = shared.connector.open(&host, port).await;
            on_opened(shared, generation, result).await;
        }));
    }

    async fn wait_for_open(&self) -> ConnectionStatus {
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            let status = self.status();
            if !status.contains(ConnectionStatus::CONNECTING) {
                return status;
            }
            if Instant::now() >= deadline {
                return self.time_out().await;
            }
            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
        }
    }

    async fn time_out(&self) -> ConnectionStatus {
        let mut slot = self.shared.session.lock().await;
        if !self.status().contains(ConnectionStatus::CONNECTING) {
            // The socket opened while we were waiting for the lock.
            return self.status();
        }
        slot.generation += 1;
        if let Some(pending) = slot.pending.take() {
            pending.abort();
        }
        tracing::warn!(timeout = ?CONNECT_TIMEOUT, "timed out connecting to hub");
        self.shared.update_status(|s| {
            s.remove(ConnectionStatus::CONNECTING);
            s.insert(ConnectionStatus::TIMED_OUT);
        })
    }

    /// Log in with the password stored for `user`.
    ///
    /// On any failure other than [`AuthError::NotConnected`] the connection
    /// is dropped so no half-authenticated socket remains.
    pub async fn authorise(&self, user: &str, program: &str) -> Result<(), AuthError> {
        let generation = {
            let slot = self.shared.session.lock().await;
            if slot.active.is_none() || !self.status().contains(ConnectionStatus::CONNECTED) {
                return Err(AuthError::NotConnected);
            }
            slot.generation
        };

        let config = &self.shared.config;
        let account = config.password_account(user);
        let Some(password) = self.shared.secrets.password(&config.secret_service, &account) else {
            tracing::warn!(%account, "no stored password");
            self.shared.update_status(|s| {
                s.insert(ConnectionStatus::NO_PASSWORD | ConnectionStatus::AUTHENTICATION_FAILED);
            });
            self.disconnect().await;
            return Err(AuthError::NoPassword { account });
        };

        {
            let slot = self.shared.session.lock().await;
            if !self.is_current(&slot, generation) {
                drop(slot);
                return Err(self.fail_authorisation(AuthError::ConnectionLost).await);
            }
            self.shared.update_status(|s| {
                s.remove(ConnectionStatus::NO_PASSWORD | ConnectionStatus::AUTHENTICATION_FAILED);
                s.insert(ConnectionStatus::AUTHORISING);
            });
        }

        let knock = self.send_command(auth::KNOCK_COMMAND).await;
        if knock.completed().await == CommandStatus::Failed {
            let reason = auth::failure_reason(&knock);
            return Err(self.fail_authorisation(AuthError::Rejected { reason }).await);
        }
        let Some(nonce) = auth::nonce(&knock) else {
            return Err(self.fail_authorisation(AuthError::MissingNonce).await);
        };

        let hash = auth::password_hash(&nonce, &password);
        let text = auth::login_command(
            &hash,
            user,
            program,
            &config.client_type,
            &self.shared.identity,
        );
        let login = self.send_command(&text).await;
        if login.completed().await == CommandStatus::Failed {
            let reason = auth::failure_reason(&login);
            return Err(self.fail_authorisation(AuthError::Rejected { reason }).await);
        }

        // The hub may hang up right after accepting the login; only the
        // session that was logged in may be marked authorised.
        let commander = Commander::new(program, user);
        {
            let slot = self.shared.session.lock().await;
            if !self.is_current(&slot, generation) {
                drop(slot);
                return Err(self.fail_authorisation(AuthError::ConnectionLost).await);
            }
            tracing::info!(%commander, "authorised");
            *self.shared.commander.lock().await = Some(commander);
            self.shared.update_status(|s| {
                s.remove(ConnectionStatus::AUTHORISING);
                s.insert(ConnectionStatus::AUTHORISED | ConnectionStatus::READY);
            });
        }

        self.refresh_keywords().await;
        Ok(())
    }

    fn is_current(&self, slot: &SessionSlot, generation: u64) -> bool {
        slot.generation == generation
            && slot.active.is_some()
            && self.status().contains(ConnectionStatus::CONNECTED)
    }

    async fn fail_authorisation(&self, error: AuthError) -> AuthError {
        tracing::warn!(reason = %error.reason(), "authorisation failed");
        self.shared.update_status(|s| {
            s.remove(ConnectionStatus::AUTHORISING);
            s.insert(ConnectionStatus::AUTHENTICATION_FAILED);
        });
        self.disconnect().await;
        error
    }

    /// Send `text` as a new command.
    ///
    /// Without an open socket the command comes back already `Failed`.
    pub async fn send_command(&self, text: &str) -> Command {
        // Allocation and enqueueing happen under the commands lock so ids hit
        // the wire in order. The socket is looked up under it too: a
        // disconnect either finds the command registered or makes it fail
        // here.
        let mut commands = self.shared.commands.lock().await;
        let outbound = {
            let slot = self.shared.session.lock().await;
            slot.active.as_ref().map(|s| s.outbound.clone())
        };
        let Some(outbound) = outbound else {
            let command = commands.allocate_detached(text);
            tracing::warn!(
                id = command.id(),
                actor = command.actor(),
                "not connected, command failed"
            );
            command.abandon("not connected");
            return command;
        };

        let command = commands.allocate(text);
        if outbound.send(command.wire_line()).is_err() {
            commands.remove(command.id());
            command.abandon("connection closed");
            return command;
        }
        tracing::debug!(
            id = command.id(),
            actor = command.actor(),
            verb = command.verb(),
            "sent command"
        );
        command
    }

    /// Ask the hub to re-broadcast every concretely subscribed keyword.
    pub async fn refresh_keywords(&self) -> Vec<Command> {
        let texts = self.shared.keywords.lock().await.refresh_commands();
        let mut sent = Vec::with_capacity(texts.len());
        for text in texts {
            sent.push(self.send_command(&text).await);
        }
        sent
    }

    /// Subscribe `listener` to keyword patterns.
    ///
    /// Refresh requests are sent right away when authorised; otherwise they
    /// are covered by the refresh that follows a successful login.
    pub async fn subscribe_keywords<S: AsRef<str>>(
        &self,
        patterns: &[S],
        listener: &KeywordListener,
        deliver_current: bool,
        refresh: bool,
    ) -> SubscribeOutcome {
        let outcome = self
            .shared
            .keywords
            .lock()
            .await
            .subscribe(patterns, listener, deliver_current, refresh);

        if self.status().contains(ConnectionStatus::AUTHORISED) {
            for text in &outcome.refresh_commands {
                self.send_command(text).await;
            }
        }
        outcome
    }

    pub async fn unsubscribe_keywords(&self, listener: ListenerId, pattern: Option<&str>) -> bool {
        self.shared.keywords.lock().await.unsubscribe(listener, pattern)
    }

    /// Latest value of `actor.key`.
    pub async fn keyword(&self, name: &str) -> Option<ActorKeyword> {
        self.shared.keywords.lock().await.get(name).cloned()
    }

    /// History of `actor.key`, if configured.
    pub async fn history(&self, name: &str) -> Vec<ActorKeyword> {
        self.shared.keywords.lock().await.history(name)
    }

    pub async fn outstanding_commands(&self) -> usize {
        self.shared.commands.lock().await.len()
    }

    /// Close the socket and fail every outstanding command.
    pub async fn disconnect(&self) {
        let session = {
            let mut slot = self.shared.session.lock().await;
            slot.generation += 1;
            if let Some(pending) = slot.pending.take() {
                pending.abort();
            }
            slot.active.take()
        };
        if session.is_some() {
            tracing::info!("disconnecting from hub");
        }

        self.shared.commander.lock().await.take();
        self.shared.update_status(|s| {
            s.remove(LINK_FLAGS);
            s.insert(ConnectionStatus::DISCONNECTED);
        });
        let failed = self.shared.commands.lock().await.abandon_all("disconnected");
        if failed > 0 {
            tracing::debug!(failed, "failed outstanding commands on disconnect");
        }

        if let Some(session) = session {
            session.abort();
        }
    }
}

async fn on_opened(shared: Arc<Shared>, generation: u64, result: io::Result<Box<dyn HubStream>>) {
    let mut slot = shared.session.lock().await;
    if slot.generation != generation {
        return;
    }
    slot.pending = None;

    match result {
        Ok(stream) => {
            slot.active = Some(start_session(Arc::clone(&shared), generation, stream));
            tracing::info!("connected to hub");
            shared.update_status(|s| {
                s.remove(
                    ConnectionStatus::CONNECTING
                        | ConnectionStatus::DISCONNECTED
                        | ConnectionStatus::FAILED
                        | ConnectionStatus::TIMED_OUT,
                );
                s.insert(ConnectionStatus::CONNECTED);
            });
        }
        Err(error) => {
            tracing::warn!(%error, "could not connect to hub");
            shared.update_status(|s| {
                s.remove(ConnectionStatus::CONNECTING);
                s.insert(ConnectionStatus::FAILED);
            });
        }
    }
}

fn start_session(shared: Arc<Shared>, generation: u64, stream: Box<dyn HubStream>) -> Session {
    let (read, write) = tokio::io::split(stream);
    let (outbound, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(Arc::clone(&shared), generation, write, rx));
    let reader = tokio::spawn(read_loop(shared, generation, read));
    Session {
        outbound,
        reader,
        writer,
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    generation: u64,
    write: WriteHalf<Box<dyn HubStream>>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    let mut sink = FramedWrite::new(write, LineCodec::new());
    while let Some(line) = rx.recv().await {
        if let Err(error) = sink.send(line).await {
            tracing::warn!(%error, "write to hub failed");
            on_session_ended(shared, generation, Some(error)).await;
            return;
        }
    }
}

async fn read_loop(shared: Arc<Shared>, generation: u64, read: ReadHalf<Box<dyn HubStream>>) {
    let mut lines = FramedRead::new(read, LineCodec::new());
    let mut parser = LineParser::new();

    let error = loop {
        match lines.next().await {
            Some(Ok(line)) => dispatch(&shared, &mut parser, &line).await,
            Some(Err(error)) => break Some(error),
            None => break None,
        }
    };

    match &error {
        Some(error) => tracing::warn!(%error, "hub socket error"),
        None => tracing::info!("hub closed the connection"),
    }
    on_session_ended(shared, generation, error).await;
}

async fn dispatch(shared: &Shared, parser: &mut LineParser, line: &str) {
    let reply = match parser.parse(line) {
        Ok(reply) => reply,
        Err(error) => {
            tracing::debug!(%error, "dropping unparseable line");
            return;
        }
    };
    tracing::trace!(line, "reply");

    let routed = shared.commands.lock().await.route(&reply);
    if let Some(command) = routed {
        tracing::trace!(id = command.id(), status = %command.status(), "routed reply");
    }
    shared.keywords.lock().await.ingest(&reply);
}

async fn on_session_ended(shared: Arc<Shared>, generation: u64, error: Option<io::Error>) {
    let session = {
        let mut slot = shared.session.lock().await;
        if slot.generation != generation {
            return;
        }
        slot.generation += 1;
        slot.active.take()
    };
    let Some(session) = session else {
        return;
    };

    shared.commander.lock().await.take();
    shared.update_status(|s| {
        s.remove(LINK_FLAGS);
        s.insert(ConnectionStatus::DISCONNECTED);
        if error.is_some() {
            s.insert(ConnectionStatus::FAILED);
        }
    });
    shared.commands.lock().await.abandon_all("connection lost");

    // May abort the calling task; nothing awaits after this.
    session.abort();
}
