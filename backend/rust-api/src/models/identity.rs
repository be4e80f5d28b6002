use serde::{Deserialize, Serialize};
use std::fmt;

const USER_PREFIX: &str = "user:";
const IP_PREFIX: &str = "ip:";

/// Caller key used for admission control and submission ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    key: String,
}

impl Identity {
    pub fn user(user_id: &str) -> Self {
        Self {
            key: format!("{}{}", USER_PREFIX, user_id),
        }
    }

    pub fn ip(ip: &str) -> Self {
        Self {
            key: format!("{}{}", IP_PREFIX, ip),
        }
    }

    /// Rebuilds an identity from a stored key.
    pub fn from_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn user_id(&self) -> Option<&str> {
        self.key.strip_prefix(USER_PREFIX)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
