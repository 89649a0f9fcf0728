use atcc::input::{decode_keys, Action, InputBuffer};
use atcc::network::authenticate;
use clap::Parser;
use std::io::Write as _;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Terminal client for a multiplayer atc session.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Rendezvous socket path (default: ~/.atcd-sock)
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let path = args.socket.unwrap_or_else(shared::default_socket_path);

    let stream = UnixStream::connect(&path).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut server_lines = BufReader::new(read_half);
    authenticate(&mut server_lines, &mut write_half).await?;

    // Print broadcasts as they arrive; the task ends when the server goes.
    let mut printer = tokio::spawn(async move {
        let mut line = String::new();
        loop {
            line.clear();
            match server_lines.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => println!("{}", line.trim_end_matches('\n')),
            }
        }
    });

    let mut stdin = tokio::io::stdin();
    let mut input = InputBuffer::new();
    let mut chunk = [0u8; 64];
    // Raw bytes read so far that do not yet form a whole character.
    let mut pending: Vec<u8> = Vec::new();

    'session: loop {
        tokio::select! {
            _ = &mut printer => break,
            read = stdin.read(&mut chunk) => {
                let n = read?;
                if n == 0 {
                    break;
                }
                pending.extend_from_slice(&chunk[..n]);
                for key in decode_keys(&mut pending) {
                    match input.handle_key(key) {
                        Action::Submit(text) => {
                            write_half.write_all(text.as_bytes()).await?;
                            write_half.write_all(b"\n").await?;
                            echo("");
                        }
                        Action::SendNow(ch) => {
                            // Passthrough keys are ASCII control characters.
                            let packet = [ch as u8, b'\n'];
                            write_half.write_all(&packet).await?;
                        }
                        Action::Echo(rendering) => echo(&rendering),
                        Action::Ignored => {}
                        Action::Quit => break 'session,
                    }
                }
            }
        }
    }

    printer.abort();
    Ok(())
}

/// Redraws the input line in place.
fn echo(rendering: &str) {
    print!("\r\x1b[K{}", rendering);
    let _ = std::io::stdout().flush();
}
