//! The session's interactive surface, one variant per lifecycle phase.

use crate::chat::{Button, ButtonStyle, ChannelId, ControlSet};

/// What the shared content message offers right now.
///
/// `Before` shows the signup controls, `Running` the in-session ones,
/// `Dormant` none at all. The terminal state (thread archived, manager
/// deregistered) never renders, so it has no variant here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionView {
    Before(ControlSet),
    Running(ControlSet),
    Dormant,
}

impl SessionView {
    /// Signup phase: join / reserve / leave.
    pub fn before(session: ChannelId) -> Self {
        Self::Before(ControlSet {
            buttons: vec![
                Button::new(format!("{session}:join"), "Join", ButtonStyle::Success),
                Button::new(format!("{session}:reserve"), "Reserve", ButtonStyle::Primary),
                Button::new(format!("{session}:leave"), "Leave", ButtonStyle::Danger),
            ],
        })
    }

    /// In-session phase: reserve / call reserve.
    pub fn running(session: ChannelId) -> Self {
        Self::Running(ControlSet {
            buttons: vec![
                Button::new(format!("{session}:reserve"), "Reserve", ButtonStyle::Primary),
                Button::new(format!("{session}:call"), "Call reserve", ButtonStyle::Secondary),
            ],
        })
    }

    pub fn controls(&self) -> Option<&ControlSet> {
        match self {
            Self::Before(controls) | Self::Running(controls) => Some(controls),
            Self::Dormant => None,
        }
    }

    pub fn is_before(&self) -> bool {
        matches!(self, Self::Before(_))
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }
}
