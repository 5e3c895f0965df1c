//! Payload Cryptography
//!
//! Provides the symmetric envelope used for chat text and file bodies.

pub mod envelope;
