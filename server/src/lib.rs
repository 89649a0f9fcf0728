//! atcd — session broker for multiplayer games of atc
//!
//! Accepts terminal clients over a Unix domain socket, authenticates each
//! one by the kernel-reported identity of the connecting process, relays
//! chat between them, and supervises the single game subprocess they share.

pub mod acl;
pub mod dispatch;
pub mod gameproc;
pub mod handshake;
pub mod ident;
pub mod registry;
pub mod server;
