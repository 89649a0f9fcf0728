//! Broker loop multiplexing client connections and supervising the game
//!
//! One task owns all shared state. Per-connection reader tasks and the
//! supervisor's death watcher feed it over channels; everything else —
//! handshakes, chat, admin commands, announcements — happens inline here.

use crate::acl::Acl;
use crate::dispatch::{classify, AdminCommand, Line, HELP_TEXT};
use crate::gameproc::{GameEnded, GameError, GameProcess};
use crate::handshake;
use crate::ident;
use crate::registry::{ConnState, Registry};
use log::{debug, info, warn};
use shared::MAX_PACKET;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// Server configuration, normally built from the command line.
pub struct ServerConfig {
    /// Rendezvous socket path.
    pub socket_path: PathBuf,
    /// Program to supervise (path-searched).
    pub game_program: String,
    /// Extra arguments passed through to the game program.
    pub game_args: Vec<String>,
    /// Users (names or uids) allowed in addition to the server's own.
    pub allow: Vec<String>,
}

/// Messages from reader tasks to the broker loop.
#[derive(Debug)]
enum ConnEvent {
    /// One packet arrived on a connection.
    Line { conn_id: u32, line: String },
    /// The connection hit EOF, an I/O error, or an oversized packet.
    Closed { conn_id: u32 },
}

/// Whether the broker loop keeps going after an event.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// The session broker: listener, connection registry, ACL, and supervisor.
pub struct Server {
    listener: UnixListener,
    socket_path: PathBuf,
    registry: Registry,
    acl: Acl,
    game: GameProcess,
    conn_tx: mpsc::UnboundedSender<ConnEvent>,
    conn_rx: mpsc::UnboundedReceiver<ConnEvent>,
    game_rx: mpsc::UnboundedReceiver<GameEnded>,
}

impl Server {
    /// Binds the rendezvous socket and seeds the ACL.
    ///
    /// A stale socket file from a previous run is unlinked first.
    pub fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let _ = std::fs::remove_file(&config.socket_path);
        let listener = UnixListener::bind(&config.socket_path)?;
        info!("listening on {}", config.socket_path.display());

        let mut acl = Acl::new(ident::own_uid());
        for entry in &config.allow {
            acl.add(entry)?;
        }

        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let game = GameProcess::new(config.game_program, config.game_args, game_tx);

        Ok(Self {
            listener,
            socket_path: config.socket_path,
            registry: Registry::new(),
            acl,
            game,
            conn_tx,
            conn_rx,
            game_rx,
        })
    }

    /// Runs the broker loop until `//quit` or a termination signal.
    ///
    /// SIGINT and SIGTERM take the same teardown path as `//quit`: the
    /// child is stopped (and resumed first if paused) and the socket file
    /// is removed.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut terminate = signal(SignalKind::terminate())?;
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    self.handle_accepted(accepted.map(|(stream, _addr)| stream));
                }
                Some(event) = self.conn_rx.recv() => {
                    if self.handle_conn_event(event).await == Flow::Quit {
                        break;
                    }
                }
                Some(GameEnded) = self.game_rx.recv() => {
                    self.announce("* the game has ended").await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, shutting down");
                    break;
                }
                _ = terminate.recv() => {
                    info!("termination signal, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Feeds one accept result into the registry.
    ///
    /// An accept error (EMFILE when descriptors run out, a peer that reset
    /// before we got to it) abandons that one connection attempt; the
    /// listener stays up.
    fn handle_accepted(&mut self, accepted: std::io::Result<UnixStream>) {
        match accepted {
            Ok(stream) => self.handle_accept(stream),
            Err(e) => warn!("accept failed: {}", e),
        }
    }

    /// Registers an accepted connection and spawns its reader task.
    ///
    /// The peer credential is captured here, once; it is the trust anchor
    /// for the upcoming handshake and is never re-read.
    fn handle_accept(&mut self, stream: UnixStream) {
        let peer_uid = match stream.peer_cred() {
            Ok(cred) => Some(cred.uid()),
            Err(e) => {
                warn!("no peer credentials on accepted connection: {}", e);
                None
            }
        };

        let (read_half, write_half) = stream.into_split();
        let conn_id = self.registry.insert(write_half, peer_uid);
        spawn_reader(conn_id, read_half, self.conn_tx.clone());
    }

    async fn handle_conn_event(&mut self, event: ConnEvent) -> Flow {
        match event {
            ConnEvent::Line { conn_id, line } => {
                let state = match self.registry.get(conn_id) {
                    Some(conn) => conn.state,
                    // Already unlinked; its reader just hadn't noticed yet.
                    None => return Flow::Continue,
                };
                match state {
                    ConnState::Pending => {
                        self.handle_handshake(conn_id, &line).await;
                        Flow::Continue
                    }
                    ConnState::Established => self.handle_line(conn_id, &line).await,
                }
            }
            ConnEvent::Closed { conn_id } => {
                self.unlink(conn_id).await;
                Flow::Continue
            }
        }
    }

    /// Runs the credential handshake for a pending connection.
    async fn handle_handshake(&mut self, conn_id: u32, payload: &str) {
        let peer_uid = self.registry.get(conn_id).and_then(|c| c.peer_uid);
        let outcome = handshake::decide(payload, peer_uid, &self.acl);
        let accepted = self.registry.send_to(conn_id, outcome.reply()).await;

        match outcome {
            handshake::Outcome::Accept { uid, name } if accepted => {
                self.registry.promote(conn_id, name.clone());
                info!("{} (uid {}) joined", name, uid);
                self.announce(&format!("* {} connected", name)).await;
            }
            handshake::Outcome::Accept { .. } => {
                // Reply failed; treat like any dead connection.
                self.unlink(conn_id).await;
            }
            handshake::Outcome::RejectAccess => {
                warn!("rejected connection {}: access denied (uid {:?})", conn_id, peer_uid);
                self.registry.remove(conn_id);
                let note = match peer_uid {
                    Some(uid) => format!("* rejected connection from uid {}: not allowed", uid),
                    None => "* rejected connection without credentials".to_string(),
                };
                self.announce_debug(&note).await;
            }
            handshake::Outcome::RejectVersion => {
                warn!("rejected connection {}: bad version greeting", conn_id);
                self.registry.remove(conn_id);
                self.announce_debug("* rejected connection: protocol version mismatch")
                    .await;
            }
        }
    }

    /// Dispatches one line from an established connection.
    async fn handle_line(&mut self, conn_id: u32, line: &str) -> Flow {
        match classify(line) {
            Line::Chat(text) => {
                let name = self.sender_name(conn_id);
                self.announce(&format!("<{}> {}", name, text)).await;
                Flow::Continue
            }
            Line::Game(input) => {
                if self.game.is_running().await {
                    if let Err(e) = self.game.send(input).await {
                        warn!("failed to forward input to game: {}", e);
                        self.reply(conn_id, "failed to reach the game").await;
                    }
                } else {
                    // No game, no error; keystrokes between rounds are noise.
                    debug!("discarding game input with no game running");
                }
                Flow::Continue
            }
            Line::Admin(command) => self.handle_admin(conn_id, command).await,
        }
    }

    /// Executes one admin command, honoring its reply audience.
    async fn handle_admin(&mut self, conn_id: u32, command: AdminCommand<'_>) -> Flow {
        match command {
            AdminCommand::Help => {
                for line in HELP_TEXT {
                    self.reply(conn_id, line).await;
                }
            }
            AdminCommand::Debug => {
                if let Some(conn) = self.registry.get_mut(conn_id) {
                    conn.debug = true;
                }
                self.reply(conn_id, "debug output enabled").await;
            }
            AdminCommand::NoDebug => {
                if let Some(conn) = self.registry.get_mut(conn_id) {
                    conn.debug = false;
                }
                self.reply(conn_id, "debug output disabled").await;
            }
            AdminCommand::Allow(user) => {
                let text = match self.acl.add(user) {
                    Ok(uid) => format!("allowed {} (uid {})", user, uid),
                    Err(e) => e.to_string(),
                };
                self.reply(conn_id, &text).await;
            }
            AdminCommand::Deny(user) => {
                let text = match self.acl.remove(user) {
                    Ok(uid) => format!("denied {} (uid {})", user, uid),
                    Err(e) => e.to_string(),
                };
                self.reply(conn_id, &text).await;
            }
            AdminCommand::Acl => {
                let names: Vec<String> = self
                    .acl
                    .entries()
                    .iter()
                    .map(|&uid| ident::display_name(uid))
                    .collect();
                self.reply(conn_id, &format!("acl: {}", names.join(" "))).await;
            }
            AdminCommand::Users => {
                let names = self.registry.established_names().join(" ");
                self.reply(conn_id, &format!("users: {}", names)).await;
            }
            AdminCommand::Start(map) => match self.game.start(map).await {
                Ok(()) => {
                    let name = self.sender_name(conn_id);
                    self.announce(&format!("* {} started the game", name)).await;
                }
                Err(e @ GameError::AlreadyRunning) => {
                    self.reply(conn_id, &e.to_string()).await;
                }
                Err(e) => {
                    warn!("start failed: {}", e);
                    self.reply(conn_id, &e.to_string()).await;
                }
            },
            AdminCommand::Stop => match self.game.stop().await {
                Ok(()) => {
                    let name = self.sender_name(conn_id);
                    self.announce(&format!("* {} stopped the game", name)).await;
                }
                Err(e) => {
                    self.reply(conn_id, &e.to_string()).await;
                }
            },
            AdminCommand::Pause => match self.game.pause().await {
                Ok(()) => {
                    let name = self.sender_name(conn_id);
                    self.announce(&format!("* {} paused the game", name)).await;
                }
                Err(e) => {
                    self.reply(conn_id, &e.to_string()).await;
                }
            },
            AdminCommand::Resume => match self.game.resume().await {
                Ok(()) => {
                    let name = self.sender_name(conn_id);
                    self.announce(&format!("* {} resumed the game", name)).await;
                }
                Err(e) => {
                    self.reply(conn_id, &e.to_string()).await;
                }
            },
            AdminCommand::Quit => {
                let name = self.sender_name(conn_id);
                info!("{} shut the server down", name);
                return Flow::Quit;
            }
            AdminCommand::Unknown(word) => {
                debug!("unknown command {:?} from connection {}", word, conn_id);
                self.reply(conn_id, "unknown command").await;
            }
        }
        Flow::Continue
    }

    /// Removes a connection, announcing the departure if it was established.
    async fn unlink(&mut self, conn_id: u32) {
        if let Some(conn) = self.registry.remove(conn_id) {
            if conn.state == ConnState::Established {
                info!("{} left", conn.name);
                self.announce(&format!("* {} disconnected", conn.name)).await;
            }
        }
    }

    /// Broadcasts to all established connections, unlinking any whose
    /// writes fail and announcing those departures in turn.
    async fn announce(&mut self, text: &str) {
        let mut pending = vec![text.to_string()];
        while let Some(message) = pending.pop() {
            for dead in self.registry.broadcast(&message).await {
                if let Some(conn) = self.registry.remove(dead) {
                    if conn.state == ConnState::Established {
                        pending.push(format!("* {} disconnected", conn.name));
                    }
                }
            }
        }
    }

    /// Broadcasts to debug-subscribed connections only.
    async fn announce_debug(&mut self, text: &str) {
        for dead in self.registry.broadcast_debug(text).await {
            self.registry.remove(dead);
        }
    }

    /// Sends a reply to one connection, unlinking it on failure.
    async fn reply(&mut self, conn_id: u32, text: &str) {
        if !self.registry.send_to(conn_id, text).await {
            self.unlink(conn_id).await;
        }
    }

    fn sender_name(&self, conn_id: u32) -> String {
        self.registry
            .get(conn_id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "?".to_string())
    }

    /// Tears everything down: connections, game process, socket file.
    async fn shutdown(&mut self) {
        for id in self.registry.ids() {
            self.registry.remove(id);
        }
        if self.game.is_running().await {
            if let Err(e) = self.game.stop().await {
                warn!("failed to stop game during shutdown: {}", e);
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
        info!("server shut down");
    }
}

/// Spawns the task that turns one connection's byte stream into events.
fn spawn_reader<R>(conn_id: u32, read_half: R, tx: mpsc::UnboundedSender<ConnEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(read_packets(conn_id, read_half, tx));
}

/// Reads newline-delimited packets until EOF or a protocol failure.
///
/// The accumulator is capped at MAX_PACKET whether or not a newline ever
/// arrives, so a peer streaming unterminated bytes is cut off at the cap
/// instead of being buffered indefinitely. Oversized or non-UTF-8 packets
/// close the connection.
async fn read_packets<R>(conn_id: u32, read_half: R, tx: mpsc::UnboundedSender<ConnEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(read_half);
    let mut acc: Vec<u8> = Vec::new();
    loop {
        let chunk = match reader.fill_buf().await {
            Ok([]) => break,
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("read error on connection {}: {}", conn_id, e);
                break;
            }
        };
        match chunk.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if acc.len() + pos > MAX_PACKET {
                    warn!("oversized packet on connection {}", conn_id);
                    break;
                }
                acc.extend_from_slice(&chunk[..pos]);
                reader.consume(pos + 1);
                let line = match String::from_utf8(std::mem::take(&mut acc)) {
                    Ok(line) => line,
                    Err(_) => {
                        warn!("non-UTF-8 packet on connection {}", conn_id);
                        break;
                    }
                };
                if tx.send(ConnEvent::Line { conn_id, line }).is_err() {
                    return;
                }
            }
            None => {
                let len = chunk.len();
                if acc.len() + len > MAX_PACKET {
                    warn!("oversized packet on connection {}", conn_id);
                    break;
                }
                acc.extend_from_slice(chunk);
                reader.consume(len);
            }
        }
    }
    let _ = tx.send(ConnEvent::Closed { conn_id });
}
