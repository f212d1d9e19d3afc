use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric platform identity. This is the value written to the reservation
/// file, so it must stay stable across restarts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user the transport knows how to address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: UserId,
    pub name: String,
}

impl ChatUser {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self { id: UserId(id), name: name.into() }
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}
