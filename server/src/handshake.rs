//! Credential handshake run once per pending connection
//!
//! The trust anchor is the kernel-supplied peer credential captured when the
//! connection was accepted, never anything the client asserts. The decision
//! here is pure; the event loop applies its outcome (reply token, promotion
//! or drop).

use crate::acl::Acl;
use crate::ident;
use shared::{HELLO, REPLY_ACCESS, REPLY_OK, REPLY_VERSION};

/// Outcome of examining the first packet of a pending connection.
///
/// Every variant carries the exact reply token to send back; only `Accept`
/// keeps the connection alive afterwards.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Promote to established under this identity.
    Accept { uid: u32, name: String },
    /// Missing credentials, unknown user, or ACL denial.
    RejectAccess,
    /// The greeting was not the expected version literal.
    RejectVersion,
}

impl Outcome {
    /// The wire token this outcome replies with.
    pub fn reply(&self) -> &'static str {
        match self {
            Outcome::Accept { .. } => REPLY_OK,
            Outcome::RejectAccess => REPLY_ACCESS,
            Outcome::RejectVersion => REPLY_VERSION,
        }
    }
}

/// Decides the fate of a pending connection from its first packet.
///
/// Rejection points are checked in a fixed order: credentials present,
/// identity resolvable, ACL allows, version literal matches.
pub fn decide(payload: &str, peer_uid: Option<u32>, acl: &Acl) -> Outcome {
    let Some(uid) = peer_uid else {
        return Outcome::RejectAccess;
    };
    let Some(name) = ident::user_name(uid) else {
        return Outcome::RejectAccess;
    };
    if !acl.check(uid) {
        return Outcome::RejectAccess;
    }
    if payload != HELLO {
        return Outcome::RejectVersion;
    }
    Outcome::Accept { uid, name }
}
