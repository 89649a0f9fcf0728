//! atcc — interactive client for the multiplayer atc session broker
//!
//! The library half holds everything testable: the incremental command
//! grammar, the keystroke buffer built on it, and the handshake. The
//! binary wires them to a real socket and the terminal.

pub mod commands;
pub mod input;
pub mod network;
