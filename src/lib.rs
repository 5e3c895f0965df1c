//! Cipher Chat - Encrypted Group Chat Library
//!
//! This library provides the runtime core of a small-group chat and file
//! sharing server: the payload envelope codec, the broadcasting chat hub,
//! capability tokens and the file exchange.

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod files;
pub mod hub;
pub mod protocol;
pub mod tokens;

pub use api::AppState;
pub use config::{ClientConfig, ServerConfig};
pub use files::{FileExchange, FileShare, FileSummary};
pub use hub::Hub;
pub use protocol::{ClientFrame, Message, ServerFrame};
pub use tokens::TokenService;
