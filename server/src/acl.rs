//! Access control list deciding which local users may join a session
//!
//! The list holds numeric uids and tolerates duplicates; removal filters
//! every matching entry. Names are resolved through the identity database
//! once, at add/remove time, never during the per-handshake check.

use crate::ident;
use log::info;
use thiserror::Error;

/// Failure to translate a name-or-uid argument into a uid.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AclError {
    #[error("unknown user: {0}")]
    UnknownUser(String),
}

/// In-memory set of uids permitted to complete the handshake.
pub struct Acl {
    allowed: Vec<u32>,
}

impl Acl {
    /// Creates an ACL seeded with the given uid (the server's own user).
    pub fn new(own_uid: u32) -> Self {
        Self {
            allowed: vec![own_uid],
        }
    }

    /// Translates a numeric string or login name into a uid.
    ///
    /// Numeric strings parse directly; anything else goes through the
    /// identity database.
    fn to_uid(name_or_id: &str) -> Result<u32, AclError> {
        if let Ok(uid) = name_or_id.parse::<u32>() {
            return Ok(uid);
        }
        ident::user_id(name_or_id).ok_or_else(|| AclError::UnknownUser(name_or_id.to_string()))
    }

    /// Adds a user to the list by name or numeric id.
    pub fn add(&mut self, name_or_id: &str) -> Result<u32, AclError> {
        let uid = Self::to_uid(name_or_id)?;
        self.allowed.push(uid);
        info!("ACL: allowed uid {}", uid);
        Ok(uid)
    }

    /// Removes every entry matching the given name or numeric id.
    pub fn remove(&mut self, name_or_id: &str) -> Result<u32, AclError> {
        let uid = Self::to_uid(name_or_id)?;
        self.allowed.retain(|&entry| entry != uid);
        info!("ACL: denied uid {}", uid);
        Ok(uid)
    }

    /// Whether the given uid is permitted to connect.
    pub fn check(&self, uid: u32) -> bool {
        self.allowed.contains(&uid)
    }

    /// Snapshot of the current entries, in insertion order.
    pub fn entries(&self) -> Vec<u32> {
        self.allowed.clone()
    }
}
