//! Inline mention and timestamp markup.

use super::{RoleId, UserId};
use chrono::{DateTime, Utc};

/// Timestamp rendering styles understood by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampStyle {
    /// Short wall-clock time in the viewer's local zone.
    ShortTime,
    /// Relative time ("in 2 hours").
    Relative,
}

impl TimestampStyle {
    fn code(self) -> char {
        match self {
            Self::ShortTime => 't',
            Self::Relative => 'R',
        }
    }
}

pub fn user(id: UserId) -> String {
    format!("<@{id}>")
}

pub fn role(id: RoleId) -> String {
    format!("<@&{id}>")
}

/// Render an instant as platform timestamp markup, shown in each viewer's
/// own timezone.
pub fn time(t: DateTime<Utc>, style: TimestampStyle) -> String {
    format!("<t:{}:{}>", t.timestamp(), style.code())
}
