//! Chat platform capability layer.
//!
//! The engine never talks to a concrete chat platform. Everything it needs -
//! threads, messages, rich cards, interactive controls, role markers - is
//! expressed through the [`ChatClient`] trait and the value types in this
//! module. An adapter crate implements the trait against the real platform;
//! tests implement it in memory.

mod client;
mod error;
pub mod tag;

pub use client::{
    Button, ButtonStyle, Card, CardAuthor, CardField, ChatClient, ControlSet, Draft, MessageRef,
    ThreadInfo,
};
pub use error::{ChatError, ErrorKind};

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

id_type!(
    /// A guild (community) id.
    GuildId
);
id_type!(
    /// A channel id. Threads are channels with a parent.
    ChannelId
);
id_type!(
    /// A message id.
    MessageId
);
id_type!(
    /// A user id.
    UserId
);
id_type!(
    /// A role id.
    RoleId
);

/// A guild member as seen by user-initiated actions: identity plus the
/// display metadata the roster stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: UserId,
    pub name: String,
    pub mention: String,
}

impl Member {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            mention: tag::user(id),
        }
    }
}
