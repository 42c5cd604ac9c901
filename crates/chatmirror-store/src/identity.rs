//! Record identities.
//!
//! Entities without a globally unique key (memberships, read states,
//! reactions) get a composite identity built from a parent scope key and a
//! child key. The parent is length-prefixed, so `("ab", "c")` and
//! `("a", "bc")` can never produce the same identity even when the two key
//! alphabets overlap.

use std::fmt;

use chatmirror_protocol::ChannelId;
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Identity for an entity whose natural key is already unique.
    pub fn simple(key: &str) -> Result<Self, IdentityError> {
        if key.is_empty() {
            return Err(IdentityError::InvalidComponent { component: "key" });
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Combine a parent scope key and a child key into one identity.
///
/// Encoded as `<parent byte length>:<parent><child>`.
pub fn derive_identity(parent: &str, child: &str) -> Result<Identity, IdentityError> {
    if parent.is_empty() {
        return Err(IdentityError::InvalidComponent { component: "parent" });
    }
    if child.is_empty() {
        return Err(IdentityError::InvalidComponent { component: "child" });
    }
    Ok(Identity(format!("{}:{parent}{child}", parent.len())))
}

/// Membership of `user_id` in `cid`.
pub fn member_identity(cid: &ChannelId, user_id: &str) -> Result<Identity, IdentityError> {
    derive_identity(cid.as_str(), user_id)
}

/// Read state of `user_id` in `cid`. Shares the membership key space shape
/// but lives in its own record kind.
pub fn read_identity(cid: &ChannelId, user_id: &str) -> Result<Identity, IdentityError> {
    derive_identity(cid.as_str(), user_id)
}

/// One user's reaction of one type on one message.
pub fn reaction_identity(
    message_id: &str,
    user_id: &str,
    kind: &str,
) -> Result<Identity, IdentityError> {
    let child = derive_identity(user_id, kind)?;
    derive_identity(message_id, child.as_str())
}
