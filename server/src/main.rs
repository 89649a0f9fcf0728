use atcd::server::{Server, ServerConfig};
use clap::Parser;
use std::path::PathBuf;

/// Multiplayer session broker for atc.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Allow a user (login name or uid) to connect; repeatable
    #[clap(short = 'a', long = "allow")]
    allow: Vec<String>,
    /// Rendezvous socket path (default: ~/.atcd-sock)
    #[clap(short = 'S', long = "socket")]
    socket: Option<PathBuf>,
    /// Game program to supervise
    #[clap(long, default_value = "atc")]
    game: String,
    /// Extra arguments passed through to the game program
    #[clap(trailing_var_arg = true)]
    game_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        socket_path: args.socket.unwrap_or_else(shared::default_socket_path),
        game_program: args.game,
        game_args: args.game_args,
        allow: args.allow,
    };

    let mut server = Server::bind(config)?;
    server.run().await
}
