//! Skiff Node - The file server and its configuration
//!
//! A node owns a content-addressed local store, a TCP transport, and an
//! event loop dispatching control messages from the mesh. Storing a file
//! replicates its ciphertext to every connected peer; getting a missing
//! file fetches it back from whichever peer still holds it.

pub mod config;
pub mod server;

pub use server::{FileServer, FileServerOpts};
