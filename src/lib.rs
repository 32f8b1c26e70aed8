#[macro_use]
pub extern crate log;

pub mod auth;
pub mod buffer;
pub mod conn;
pub mod config;
pub mod directory;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod reply;
pub mod request;
pub mod server;
pub mod source;
pub mod tls;

pub use conn::{Connection, ServerContext};
pub use config::Config;
pub use server::Server;
