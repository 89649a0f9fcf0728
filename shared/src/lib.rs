//! Wire protocol constants and socket path resolution shared between atcd and atcc

use std::env;
use std::path::PathBuf;

/// Greeting the client must send as its first packet.
pub const HELLO: &str = "MATC 1";
/// Server reply for a successful handshake.
pub const REPLY_OK: &str = "MATC OK";
/// Server reply when the client spoke an unsupported protocol version.
pub const REPLY_VERSION: &str = "MATC VERSION";
/// Server reply when the connecting user is not on the ACL.
pub const REPLY_ACCESS: &str = "MATC ACCESS";

/// Leading character that marks a line as chat rather than game input.
pub const CHAT_ESCAPE: char = '/';
/// Prefix that marks a line as an administrative command.
pub const ADMIN_ESCAPE: &str = "//";

/// Maximum length of one raw input packet.
pub const MAX_PACKET: usize = 1024;
/// Maximum length of rendered command text (twice the raw input capacity).
pub const MAX_RENDERED: usize = 2 * MAX_PACKET;

/// Filename of the rendezvous socket under the user's home directory.
pub const SOCKET_FILENAME: &str = ".atcd-sock";

/// Resolves the default rendezvous socket path: `$HOME/.atcd-sock`.
///
/// Falls back to the filesystem root when HOME is unset, matching the
/// original daemon's behavior.
pub fn default_socket_path() -> PathBuf {
    let home = env::var_os("HOME").unwrap_or_else(|| "/".into());
    PathBuf::from(home).join(SOCKET_FILENAME)
}
