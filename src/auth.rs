//! Request Authentication
//!
//! Resolves the caller's identity on the HTTP surface. Login and session
//! handling live elsewhere; the server only needs to know who is asking.

use axum::http::{header, HeaderMap};
use std::collections::HashMap;

use crate::config::UserCredential;

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

/// Maps request headers to an identity
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Option<Identity>;
}

/// Accepts `Authorization: Bearer <api_key>` for a fixed set of users
#[derive(Debug, Default)]
pub struct StaticKeyAuthenticator {
    keys: HashMap<String, String>,
}

impl StaticKeyAuthenticator {
    pub fn new(users: &[UserCredential]) -> Self {
        let keys = users
            .iter()
            .map(|u| (u.api_key.clone(), u.username.clone()))
            .collect();
        Self { keys }
    }
}

impl Authenticator for StaticKeyAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Option<Identity> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let key = value.strip_prefix("Bearer ")?.trim();
        self.keys.get(key).map(|username| Identity {
            username: username.clone(),
        })
    }
}
