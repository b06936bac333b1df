//! Purr Relay - clipboard sync backend
//!
//! Devices push text and image snippets and poll for what other devices
//! pushed. Identical content is stored once (SHA-256 fingerprint dedup) and
//! every item gets a strictly increasing id that clients use as a cursor.
//! Storage is SQLite; the HTTP surface is actix-web.

pub mod auth;
pub mod config;
pub mod database;
pub mod fingerprint;
pub mod http;
pub mod ingest;
pub mod interface;
mod relay;
pub mod sync;
pub mod tokenizer;

pub use interface::*;
pub use relay::ClipboardRelay;
