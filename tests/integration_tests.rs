//! End-to-end tests driving the broker over a real Unix socket
//!
//! Each test binds its own socket in the temp directory and talks to the
//! server the way atcc does: handshake first, then newline-delimited
//! packets. The supervised "game" is a stock shell utility picked per test
//! for its exit behavior (sleep stays up, true dies at once).

use atcd::ident;
use atcd::server::{Server, ServerConfig};
use shared::{HELLO, REPLY_OK, REPLY_VERSION};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn temp_socket(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("matc-test-{}-{}", tag, std::process::id()))
}

/// Binds and runs a broker on a fresh socket; returns its path and task.
async fn start_server(tag: &str, game: &str, game_args: &[&str]) -> (PathBuf, JoinHandle<()>) {
    let path = temp_socket(tag);
    let config = ServerConfig {
        socket_path: path.clone(),
        game_program: game.to_string(),
        game_args: game_args.iter().map(|s| s.to_string()).collect(),
        allow: Vec::new(),
    };
    let mut server = Server::bind(config).expect("bind failed");
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });
    (path, handle)
}

/// A protocol-speaking test peer.
struct TestClient {
    lines: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connects and completes the handshake.
    async fn join(path: &PathBuf) -> Self {
        let stream = UnixStream::connect(path).await.expect("connect failed");
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half);
        atcc::network::authenticate(&mut lines, &mut writer)
            .await
            .expect("handshake failed");
        Self { lines, writer }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    /// Reads one line, panicking on EOF or timeout.
    async fn recv(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(WAIT, self.lines.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .expect("read failed");
        assert_ne!(n, 0, "unexpected EOF");
        line.trim_end_matches('\n').to_string()
    }

    /// Reads lines until one satisfies the predicate; returns all of them.
    async fn recv_until<F: Fn(&str) -> bool>(&mut self, accept: F) -> Vec<String> {
        let mut seen = Vec::new();
        loop {
            let line = self.recv().await;
            let done = accept(&line);
            seen.push(line);
            if done {
                return seen;
            }
        }
    }

    /// True when the server has closed this connection, discarding any
    /// lines still buffered ahead of the EOF.
    async fn at_eof(&mut self) -> bool {
        loop {
            let mut line = String::new();
            match timeout(WAIT, self.lines.read_line(&mut line)).await {
                Ok(Ok(0)) => return true,
                Ok(Ok(_)) => continue,
                _ => return false,
            }
        }
    }
}

fn own_name() -> String {
    ident::display_name(ident::own_uid())
}

mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn wrong_version_gets_version_reject_and_close() {
        let (path, server) = start_server("version", "true", &[]).await;

        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"MATC 99\n").await.unwrap();
        let mut lines = BufReader::new(stream);
        let mut reply = String::new();
        timeout(WAIT, lines.read_line(&mut reply)).await.unwrap().unwrap();
        assert_eq!(reply.trim_end(), REPLY_VERSION);

        // Nothing further: the server drops the connection.
        let mut rest = String::new();
        let n = timeout(WAIT, lines.read_line(&mut rest)).await.unwrap().unwrap();
        assert_eq!(n, 0);
        server.abort();
    }

    #[tokio::test]
    async fn correct_greeting_gets_ok() {
        let (path, server) = start_server("greet", "true", &[]).await;

        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream
            .write_all(format!("{}\n", HELLO).as_bytes())
            .await
            .unwrap();
        let mut lines = BufReader::new(stream);
        let mut reply = String::new();
        timeout(WAIT, lines.read_line(&mut reply)).await.unwrap().unwrap();
        assert_eq!(reply.trim_end(), REPLY_OK);
        server.abort();
    }

    #[tokio::test]
    async fn traffic_before_handshake_is_not_chat() {
        // A pending connection sending chat-shaped text must not reach
        // established peers; it just fails the handshake.
        let (path, server) = start_server("pending", "true", &[]).await;
        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;

        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"/sneaky\n").await.unwrap();

        alice.send("/after").await;
        let seen = alice.recv_until(|l| l.contains("after")).await;
        assert!(
            !seen.iter().any(|l| l.contains("sneaky")),
            "pre-handshake text leaked: {:?}",
            seen
        );
        server.abort();
    }
}

mod session_tests {
    use super::*;

    #[tokio::test]
    async fn chat_reaches_the_other_client() {
        let (path, server) = start_server("chat", "true", &[]).await;
        let name = own_name();

        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;
        let mut bob = TestClient::join(&path).await;
        bob.recv_until(|l| l.contains("connected")).await;

        alice.send("/hello").await;
        let expected = format!("<{}> hello", name);
        bob.recv_until(|l| l == expected).await;
        // The sender hears their own chat as well.
        alice.recv_until(|l| l == expected).await;
        server.abort();
    }

    #[tokio::test]
    async fn users_listing_goes_to_sender_only() {
        let (path, server) = start_server("users", "true", &[]).await;
        let name = own_name();

        let mut alice = TestClient::join(&path).await;
        let mut bob = TestClient::join(&path).await;
        bob.recv_until(|l| l.contains("connected")).await;

        alice.send("//users").await;
        let seen = alice.recv_until(|l| l.starts_with("users:")).await;
        let listing = seen.last().unwrap();
        // Both peers run as this uid, so the name appears twice.
        assert_eq!(listing, &format!("users: {} {}", name, name));

        // Bob never sees the listing; the next thing he gets is chat.
        alice.send("/marker").await;
        let bobs = bob.recv_until(|l| l.contains("marker")).await;
        assert!(
            !bobs.iter().any(|l| l.starts_with("users:")),
            "listing leaked to non-sender: {:?}",
            bobs
        );
        server.abort();
    }

    #[tokio::test]
    async fn unknown_command_is_sender_only_reply() {
        let (path, server) = start_server("unknown", "true", &[]).await;
        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;

        alice.send("//frobnicate").await;
        alice.recv_until(|l| l == "unknown command").await;
        server.abort();
    }

    #[tokio::test]
    async fn game_input_without_game_is_discarded() {
        let (path, server) = start_server("discard", "true", &[]).await;
        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;

        alice.send("aa5").await;
        // The server neither replies nor dies; it still answers commands.
        alice.send("//users").await;
        alice.recv_until(|l| l.starts_with("users:")).await;
        server.abort();
    }

    #[tokio::test]
    async fn unterminated_flood_is_cut_off() {
        // A connection streaming bytes with no newline must be dropped at
        // the packet cap, not buffered indefinitely.
        let (path, server) = start_server("flood", "true", &[]).await;
        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let junk = vec![b'x'; 64 * 1024];
        let cut_off = timeout(WAIT, async {
            let mut wrote = 0usize;
            loop {
                if stream.write_all(&junk).await.is_err() {
                    return true;
                }
                wrote += junk.len();
                if wrote >= 8 * 1024 * 1024 {
                    return false;
                }
            }
        })
        .await
        .expect("flood writer stalled");
        assert!(cut_off, "server kept absorbing an unterminated stream");

        // The broker is unharmed.
        alice.send("//users").await;
        alice.recv_until(|l| l.starts_with("users:")).await;
        server.abort();
    }

    #[tokio::test]
    async fn departure_is_announced() {
        let (path, server) = start_server("depart", "true", &[]).await;
        let name = own_name();

        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;
        let bob = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;

        drop(bob);
        alice
            .recv_until(|l| l == format!("* {} disconnected", name))
            .await;
        server.abort();
    }
}

mod game_tests {
    use super::*;

    #[tokio::test]
    async fn start_broadcasts_and_double_start_fails() {
        let (path, server) = start_server("start", "sleep", &["5"]).await;
        let name = own_name();

        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;
        let mut bob = TestClient::join(&path).await;
        bob.recv_until(|l| l.contains("connected")).await;

        alice.send("//start").await;
        let started = format!("* {} started the game", name);
        alice.recv_until(|l| l == started).await;
        bob.recv_until(|l| l == started).await;

        // Second start fails to the sender only; the first child survives
        // (stop still succeeds afterwards).
        alice.send("//start").await;
        alice
            .recv_until(|l| l.contains("already running"))
            .await;

        alice.send("//stop").await;
        let stopped = format!("* {} stopped the game", name);
        alice.recv_until(|l| l == stopped).await;
        bob.recv_until(|l| l == stopped).await;
        server.abort();
    }

    #[tokio::test]
    async fn stop_without_game_is_sender_only_error() {
        let (path, server) = start_server("stopidle", "sleep", &["5"]).await;
        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;

        alice.send("//stop").await;
        alice.recv_until(|l| l.contains("not running")).await;
        server.abort();
    }

    #[tokio::test]
    async fn child_death_is_broadcast() {
        // "true" exits immediately; the watcher must notice and announce.
        let (path, server) = start_server("death", "true", &[]).await;
        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;
        let mut bob = TestClient::join(&path).await;
        bob.recv_until(|l| l.contains("connected")).await;

        alice.send("//start").await;
        alice.recv_until(|l| l == "* the game has ended").await;
        bob.recv_until(|l| l == "* the game has ended").await;
        server.abort();
    }

    #[tokio::test]
    async fn pause_and_resume_broadcast() {
        let (path, server) = start_server("pause", "sleep", &["5"]).await;
        let name = own_name();
        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;

        alice.send("//start").await;
        alice.recv_until(|l| l.contains("started")).await;
        alice.send("//pause").await;
        alice
            .recv_until(|l| l == format!("* {} paused the game", name))
            .await;
        alice.send("//resume").await;
        alice
            .recv_until(|l| l == format!("* {} resumed the game", name))
            .await;
        alice.send("//stop").await;
        alice.recv_until(|l| l.contains("stopped")).await;
        server.abort();
    }
}

mod shutdown_tests {
    use super::*;

    #[tokio::test]
    async fn quit_closes_everything() {
        let (path, server) = start_server("quit", "sleep", &["5"]).await;
        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;
        let mut bob = TestClient::join(&path).await;
        bob.recv_until(|l| l.contains("connected")).await;

        alice.send("//quit").await;

        assert!(alice.at_eof().await, "alice's socket should close");
        assert!(bob.at_eof().await, "bob's socket should close");
        timeout(WAIT, server).await.expect("server task should finish").unwrap();
        assert!(!path.exists(), "socket file should be removed");
    }

    #[tokio::test]
    async fn quit_stops_a_running_game() {
        let (path, server) = start_server("quitgame", "sleep", &["30"]).await;
        let mut alice = TestClient::join(&path).await;
        alice.recv_until(|l| l.contains("connected")).await;

        alice.send("//start").await;
        alice.recv_until(|l| l.contains("started")).await;
        alice.send("//quit").await;

        // run() only returns once the child has been stopped.
        timeout(WAIT, server).await.expect("server task should finish").unwrap();
    }
}
