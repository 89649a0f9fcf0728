//! Connection establishment and the credential handshake, client side

use log::debug;
use shared::{HELLO, REPLY_ACCESS, REPLY_OK, REPLY_VERSION};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Performs the one-shot handshake over an already-connected socket.
///
/// Sends the version greeting and maps the server's reply to a result. The
/// kernel attaches our credentials to the connection; nothing about
/// identity is sent in-band.
pub async fn authenticate<R, W>(reader: &mut R, writer: &mut W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(HELLO.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut reply = String::new();
    if reader.read_line(&mut reply).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "server closed the connection during the handshake",
        ));
    }
    let reply = reply.trim_end_matches('\n');
    debug!("handshake reply: {}", reply);

    match reply {
        r if r == REPLY_OK => Ok(()),
        r if r == REPLY_ACCESS => Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "server refused access for this user",
        )),
        r if r == REPLY_VERSION => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "server does not speak this protocol version",
        )),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unrecognized handshake reply: {}", other),
        )),
    }
}
