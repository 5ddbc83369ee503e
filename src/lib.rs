#![deny(clippy::all)]
#![deny(clippy::pedantic)]

mod netascii;
mod options;
pub mod packet;
mod path;
pub mod resolver;
mod server;
// Re-export all public types from server
// (Idea: export server's types directly?)
pub use server::*;
mod tftp_proto;
