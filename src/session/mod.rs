//! Session data model.
//!
//! A [`Session`] is one scheduled, capacity-limited group activity: a roster,
//! an ordered reserve queue with auto-promotion and call-out semantics, and
//! the text it renders into the thread. It performs no I/O - every mutation
//! fires the injected sync hook so the owning guild can re-save its session
//! list, and the [`manager`] drives everything that touches the platform.

pub mod manager;
pub mod proxy;
pub mod view;

use crate::chat::{ChannelId, Member, MessageId, UserId, tag};
use crate::settings::ChannelSettings;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Two sessions closer together than this are considered overlapping.
const OVERLAP_WINDOW_SECS: i64 = 3600;

/// Fired after every mutation so the owner can persist the session list.
pub type SyncHook = Arc<dyn Fn() + Send + Sync>;

/// A sync hook that does nothing, for tests and detached sessions.
pub fn noop_sync() -> SyncHook {
    Arc::new(|| {})
}

/// One roster or reserve entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    pub name: String,
    pub mention: String,
    /// Reserve only: opted in to take the first slot that opens up.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_promote: bool,
    /// Reserve only: already paged by a call-out. Sticky once set.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub called: bool,
}

impl From<&Member> for Participant {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id,
            name: member.name.clone(),
            mention: member.mention.clone(),
            auto_promote: false,
            called: false,
        }
    }
}

/// The session's organizer, immutable for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organizer {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
}

/// The persisted shape of one session. Identity is the hosting thread id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Hosting thread; doubles as the session id and as the id of the
    /// announcement message the thread was spawned from.
    pub thread: ChannelId,
    /// The text channel hosting the thread.
    pub channel: ChannelId,
    /// The content message inside the thread.
    pub message: MessageId,
    /// Scheduled start, unix seconds. Absolute so restarts recompute timers.
    pub time: i64,
    pub organizer: Organizer,
    #[serde(default)]
    pub name: Option<String>,
    /// Explicit capacity override; otherwise the channel default applies.
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub players: Vec<Participant>,
    #[serde(default)]
    pub reserve: Vec<Participant>,
    #[serde(default)]
    pub started: bool,
}

/// Roster, timing and rendering for one scrim. No I/O.
pub struct Session {
    record: SessionRecord,
    timezone: Tz,
    defaults: ChannelSettings,
    sync: SyncHook,
}

impl Session {
    pub fn new(record: SessionRecord, timezone: Tz, sync: SyncHook) -> Self {
        Self {
            record,
            timezone,
            defaults: ChannelSettings::default(),
            sync,
        }
    }

    /// Attach the resolved channel configuration once the hosting thread is
    /// known. Only affects derived values, never the persisted record.
    pub fn attach_defaults(&mut self, defaults: ChannelSettings) {
        self.defaults = defaults;
    }

    pub fn id(&self) -> ChannelId {
        self.record.thread
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn snapshot(&self) -> SessionRecord {
        self.record.clone()
    }

    pub fn capacity(&self) -> u32 {
        self.record.capacity.unwrap_or(self.defaults.capacity)
    }

    pub fn defaults(&self) -> &ChannelSettings {
        &self.defaults
    }

    pub fn started(&self) -> bool {
        self.record.started
    }

    /// Monotonic: once started a session never goes back.
    pub fn mark_started(&mut self) {
        if !self.record.started {
            self.record.started = true;
            (self.sync)();
        }
    }

    pub fn time_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.record.time, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    pub fn time_local(&self) -> DateTime<Tz> {
        self.time_utc().with_timezone(&self.timezone)
    }

    pub fn player_count(&self) -> usize {
        self.record.players.len()
    }

    pub fn reserve_count(&self) -> usize {
        self.record.reserve.len()
    }

    /// The single fullness predicate: used by join logic, the broadcast
    /// fingerprint and the start announcement alike.
    pub fn is_full(&self) -> bool {
        self.record.players.len() as u32 >= self.capacity()
    }

    pub fn contains_player(&self, user: UserId) -> bool {
        self.record.players.iter().any(|p| p.id == user)
    }

    pub fn contains_reserve(&self, user: UserId) -> bool {
        self.record.reserve.iter().any(|p| p.id == user)
    }

    pub fn contains_user(&self, user: UserId) -> bool {
        self.contains_player(user) || self.contains_reserve(user)
    }

    pub fn roster_ids(&self) -> Vec<UserId> {
        self.record.players.iter().map(|p| p.id).collect()
    }

    /// Append to the roster, dropping any reserve entry for the same user.
    /// Refused when the roster is full or the user is already on it.
    pub fn add_player(&mut self, player: Participant) -> bool {
        if self.is_full() || self.contains_player(player.id) {
            return false;
        }
        let id = player.id;
        self.record.players.push(player);
        self.remove_reserve(id);
        (self.sync)();
        true
    }

    /// Remove a user from the roster. When a slot is open afterwards, the
    /// first reserve flagged auto-promote takes it (flag cleared); the
    /// promoted entry is returned so the caller can notify them.
    pub fn remove_player(&mut self, user: UserId) -> Option<Participant> {
        if let Some(pos) = self.record.players.iter().position(|p| p.id == user) {
            self.record.players.remove(pos);
            (self.sync)();
        }
        if self.is_full() {
            return None;
        }
        let slot = self.record.reserve.iter().position(|r| r.auto_promote)?;
        let mut promoted = self.record.reserve.remove(slot);
        promoted.auto_promote = false;
        self.record.players.push(promoted.clone());
        (self.sync)();
        Some(promoted)
    }

    /// Append to the reserve queue, dropping any roster slot for the same
    /// user - which can itself promote somebody else.
    pub fn add_reserve(&mut self, reserve: Participant) -> Option<Participant> {
        if self.contains_reserve(reserve.id) {
            return None;
        }
        let id = reserve.id;
        self.record.reserve.push(reserve);
        (self.sync)();
        self.remove_player(id)
    }

    pub fn remove_reserve(&mut self, user: UserId) {
        if let Some(pos) = self.record.reserve.iter().position(|p| p.id == user) {
            self.record.reserve.remove(pos);
            (self.sync)();
        }
    }

    pub fn set_auto_promote(&mut self, user: UserId, auto: bool) {
        if let Some(entry) = self.record.reserve.iter_mut().find(|p| p.id == user) {
            entry.auto_promote = auto;
            (self.sync)();
        }
    }

    pub fn next_uncalled_reserve(&self) -> Option<&Participant> {
        self.record.reserve.iter().find(|r| !r.called)
    }

    /// Mark the first uncalled reserve as called (sticky) and return it.
    pub fn call_next_reserve(&mut self) -> Option<Participant> {
        let entry = self.record.reserve.iter_mut().find(|r| !r.called)?;
        entry.called = true;
        let called = entry.clone();
        (self.sync)();
        Some(called)
    }

    /// Two sessions overlap when their start times are less than an hour
    /// apart.
    pub fn overlaps_with(&self, other: &Session) -> bool {
        (self.record.time - other.record.time).abs() < OVERLAP_WINDOW_SECS
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// "14:00 (server) / <t:..:t> (your local time)"
    pub fn scheduled_time_text(&self, separator: &str) -> String {
        format!(
            "{} (server){}{} (your local time)",
            self.time_local().format("%H:%M"),
            separator,
            tag::time(self.time_utc(), tag::TimestampStyle::ShortTime),
        )
    }

    /// The announcement message shown in the hosting channel.
    pub fn header_message(&self) -> String {
        let count = if self.player_count() > 0 {
            format!("**({}/{})** ", self.player_count(), self.capacity())
        } else {
            String::new()
        };
        let calling = self
            .defaults
            .scrimmer_role
            .map(|role| format!("{}! ", tag::role(role)))
            .unwrap_or_default();
        format!(
            "{}Scrim at {} {}started by {}\n",
            calling,
            self.scheduled_time_text(" / "),
            count,
            tag::user(self.record.organizer.id),
        )
    }

    /// Card title: the session's own name, or the channel's prefix text.
    pub fn title(&self) -> String {
        match &self.record.name {
            Some(name) => format!("Scrim *{name}*"),
            None => self.defaults.prefix.clone(),
        }
    }

    /// Thread title at creation time, "14.00 name".
    pub fn thread_title(&self) -> String {
        let name = self
            .record
            .name
            .as_deref()
            .map(|n| format!(" {n}"))
            .unwrap_or_default();
        format!("{}{}", self.time_local().format("%H.%M"), name)
    }

    pub fn roster_text(&self, separator: &str) -> String {
        self.record
            .players
            .iter()
            .map(|p| p.mention.clone())
            .collect::<Vec<_>>()
            .join(separator)
    }

    pub fn reserve_text(&self, separator: &str) -> String {
        self.record
            .reserve
            .iter()
            .map(|p| {
                let extra = if p.called {
                    " (called)"
                } else if p.auto_promote && !self.record.started {
                    " (auto-join)"
                } else {
                    ""
                };
                format!("{}{}", p.mention, extra)
            })
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// The announcement posted into the thread at start time.
    pub fn start_message(&self) -> String {
        if self.player_count() == 0 {
            return "Sad moment, nobody signed up! Archiving the thread.".to_string();
        }

        let players = self.roster_text(" ");
        let reserves = self.reserve_text(" ");
        let capacity = self.capacity() as usize;

        if self.player_count() >= capacity {
            return format!("Scrim starting, get online!\n{players}");
        }

        if self.player_count() + self.reserve_count() >= capacity {
            return format!(
                "Scrim starting, get online!\n{players}\nReserves, we need you!\n{reserves}"
            );
        }

        let mut message = format!(
            "Not enough players, feel free to get online and try to get it started anyway!\n{players}\n"
        );
        if self.reserve_count() > 0 {
            message.push_str(&format!("Reserves, feel free to join in.\n{reserves}"));
        }

        let shortage = capacity - self.player_count() - self.reserve_count();
        if shortage <= 2
            && let Some(role) = self.defaults.scrimmer_role
        {
            message.push_str(&format!(
                "\n{}, you might be able to make this a full scrim.\nWe need at least {} player(s).",
                tag::role(role),
                shortage,
            ));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ChannelSettings;

    fn record(capacity: u32) -> SessionRecord {
        SessionRecord {
            thread: ChannelId(100),
            channel: ChannelId(1),
            message: MessageId(200),
            time: 1_665_410_400, // 2022-10-10 14:00 UTC
            organizer: Organizer {
                id: UserId(1),
                name: "org".to_string(),
                avatar: String::new(),
            },
            name: None,
            capacity: Some(capacity),
            players: Vec::new(),
            reserve: Vec::new(),
            started: false,
        }
    }

    fn session(capacity: u32) -> Session {
        Session::new(record(capacity), chrono_tz::Tz::UTC, noop_sync())
    }

    fn member(id: u64) -> Participant {
        Participant::from(&Member::new(UserId(id), format!("user{id}")))
    }

    fn assert_invariants(s: &Session) {
        assert!(s.player_count() as u32 <= s.capacity(), "roster over capacity");
        for p in &s.record.players {
            assert!(!s.contains_reserve(p.id), "user {} in both lists", p.id);
        }
    }

    #[test]
    fn capacity_and_disjointness_hold_under_churn() {
        let mut s = session(2);
        for step in 0u64..64 {
            match step % 5 {
                0 => {
                    s.add_player(member(step % 7));
                }
                1 => {
                    let _ = s.add_reserve(member((step + 3) % 7));
                }
                2 => {
                    let _ = s.remove_player(UserId(step % 7));
                }
                3 => {
                    s.set_auto_promote(UserId((step + 1) % 7), true);
                }
                _ => {
                    s.remove_reserve(UserId((step + 2) % 7));
                }
            }
            assert_invariants(&s);
        }
    }

    #[test]
    fn auto_promotion_fills_the_open_slot() {
        let mut s = session(2);
        assert!(s.add_player(member(1)));
        assert!(s.add_player(member(2)));
        let _ = s.add_reserve(member(3));
        s.set_auto_promote(UserId(3), true);

        let promoted = s.remove_player(UserId(2)).expect("promotion expected");
        assert_eq!(promoted.id, UserId(3));
        assert!(!promoted.auto_promote, "flag must clear on promotion");
        assert!(s.contains_player(UserId(3)));
        assert_eq!(s.reserve_count(), 0);
        assert_invariants(&s);
    }

    #[test]
    fn join_refused_when_full() {
        let mut s = session(1);
        assert!(s.add_player(member(1)));
        assert!(!s.add_player(member(2)));
        assert!(s.is_full());
    }

    #[test]
    fn reserving_a_player_can_promote_somebody_else() {
        let mut s = session(2);
        s.add_player(member(1));
        s.add_player(member(2));
        let _ = s.add_reserve(member(3));
        s.set_auto_promote(UserId(3), true);

        // Player 1 downgrades to reserve; player 3 takes the slot.
        let promoted = s.add_reserve(member(1)).expect("promotion expected");
        assert_eq!(promoted.id, UserId(3));
        assert!(s.contains_reserve(UserId(1)));
        assert!(s.contains_player(UserId(3)));
        assert_invariants(&s);
    }

    #[test]
    fn called_flag_is_sticky() {
        let mut s = session(4);
        let _ = s.add_reserve(member(1));
        let _ = s.add_reserve(member(2));

        let first = s.call_next_reserve().expect("reserve available");
        assert_eq!(first.id, UserId(1));
        let second = s.call_next_reserve().expect("reserve available");
        assert_eq!(second.id, UserId(2));
        assert!(s.call_next_reserve().is_none(), "queue exhausted");
        assert!(s.next_uncalled_reserve().is_none());
    }

    #[test]
    fn overlap_window_is_one_hour() {
        let a = session(8);
        let mut b = session(8);
        b.record.time = a.record.time + 45 * 60;
        assert!(a.overlaps_with(&b));
        assert!(b.overlaps_with(&a));

        b.record.time = a.record.time + 75 * 60;
        assert!(!a.overlaps_with(&b));

        b.record.time = a.record.time + 60 * 60;
        assert!(!a.overlaps_with(&b), "exactly one hour apart is fine");
    }

    #[test]
    fn start_message_policy() {
        // Full roster: roster-only announcement.
        let mut s = session(2);
        s.add_player(member(1));
        s.add_player(member(2));
        let text = s.start_message();
        assert!(text.contains("Scrim starting"));
        assert!(!text.contains("Reserves, we need you!"));

        // Roster + reserves reach capacity: reserves are called out.
        let mut s = session(3);
        s.add_player(member(1));
        s.add_player(member(2));
        let _ = s.add_reserve(member(3));
        let text = s.start_message();
        assert!(text.contains("Scrim starting"));
        assert!(text.contains("Reserves, we need you!"));

        // Under strength with a small shortage: role plea appended.
        let mut s = session(3);
        s.attach_defaults(ChannelSettings {
            scrimmer_role: Some(crate::chat::RoleId(9)),
            ..ChannelSettings::default()
        });
        s.record.capacity = Some(3);
        s.add_player(member(1));
        let text = s.start_message();
        assert!(text.contains("Not enough players"));
        assert!(text.contains("We need at least 2 player(s)."));

        // Nobody signed up.
        let s = session(2);
        assert!(s.start_message().contains("nobody signed up"));
    }

    #[test]
    fn started_is_monotonic() {
        let mut s = session(2);
        s.mark_started();
        assert!(s.started());
        s.mark_started();
        assert!(s.started());
    }

    #[test]
    fn reserve_text_markers() {
        let mut s = session(1);
        s.add_player(member(1));
        let _ = s.add_reserve(member(2));
        let _ = s.add_reserve(member(3));
        s.set_auto_promote(UserId(2), true);
        let _ = s.call_next_reserve();

        let text = s.reserve_text("\n");
        assert!(text.contains("(called)"));
        assert!(!text.contains("<@2> (auto-join)"), "called wins over auto");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut s = session(2);
        s.add_player(member(1));
        let _ = s.add_reserve(member(2));
        s.set_auto_promote(UserId(2), true);
        let json = serde_json::to_string(s.record()).expect("serialize");
        let back: SessionRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(&back, s.record());
    }
}
