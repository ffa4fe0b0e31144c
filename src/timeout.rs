//! Time-boxed participation restrictions.
//!
//! Each restricted user carries an absolute expiry instant and a live
//! countdown task. Expiries are persisted as instants, so a process restart
//! recomputes the remaining time and resumes the countdown; an entry that
//! expired while the process was down fires immediately.

use crate::chat::UserId;
use crate::clock::{self, Clock};
use crate::guild::Guild;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::info;

/// The persisted shape of one restriction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutRecord {
    pub user_id: UserId,
    /// Expiry, unix seconds.
    pub until: i64,
}

struct Entry {
    user: UserId,
    until: DateTime<Utc>,
    countdown: Option<JoinHandle<()>>,
}

/// Tracks users under a temporary restriction for one guild.
pub struct TimeoutLedger {
    guild: Weak<Guild>,
    clock: Arc<dyn Clock>,
    entries: Mutex<Vec<Entry>>,
}

impl TimeoutLedger {
    pub fn new(guild: Weak<Guild>, clock: Arc<dyn Clock>) -> Self {
        Self {
            guild,
            clock,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Reload persisted restrictions and start a countdown for each.
    pub fn restore(&self, records: Vec<TimeoutRecord>) {
        for record in records {
            let until =
                DateTime::from_timestamp(record.until, 0).unwrap_or(DateTime::UNIX_EPOCH);
            self.install(record.user_id, until);
        }
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.entries.lock().iter().any(|e| e.user == user)
    }

    /// Remaining restriction time, clamped at zero. Absent when the user is
    /// not restricted.
    pub fn time_remaining(&self, user: UserId) -> Option<Duration> {
        let until = self
            .entries
            .lock()
            .iter()
            .find(|e| e.user == user)
            .map(|e| e.until)?;
        Some((until - self.clock.now_utc()).max(Duration::zero()))
    }

    /// Restrict a user: apply the marker role, eject them from every
    /// not-yet-started session inside the restriction window, start the
    /// countdown and persist.
    pub fn add_user(&self, user: UserId, duration: Duration, reason: &str) {
        let until = self.clock.now_utc() + duration;
        if let Some(guild) = self.guild.upgrade() {
            guild.apply_restriction_role(user, reason.to_string());
            for manager in guild.session_managers() {
                if manager.started() || manager.scheduled_time() > until {
                    continue;
                }
                tokio::spawn(async move {
                    manager.leave(user).await;
                });
            }
        }
        info!(user = %user, until = %until, reason = %reason, "user restricted");
        self.install(user, until);
        self.persist();
    }

    /// Lift a restriction early (or on expiry): remove the marker role,
    /// cancel the countdown and persist. Returns whether an entry existed.
    pub fn remove_user(&self, user: UserId, reason: Option<&str>) -> bool {
        let entry = {
            let mut entries = self.entries.lock();
            let Some(pos) = entries.iter().position(|e| e.user == user) else {
                return false;
            };
            entries.remove(pos)
        };
        if let Some(countdown) = entry.countdown {
            countdown.abort();
        }
        if let Some(guild) = self.guild.upgrade() {
            guild.clear_restriction_role(user, reason.map(str::to_string));
        }
        info!(user = %user, reason = ?reason, "restriction lifted");
        self.persist();
        true
    }

    pub fn records(&self) -> Vec<TimeoutRecord> {
        self.entries
            .lock()
            .iter()
            .map(|e| TimeoutRecord {
                user_id: e.user,
                until: e.until.timestamp(),
            })
            .collect()
    }

    fn install(&self, user: UserId, until: DateTime<Utc>) {
        // Register the entry before arming the countdown: an entry that
        // already expired fires immediately and must find itself.
        self.entries.lock().push(Entry {
            user,
            until,
            countdown: None,
        });
        let countdown = {
            let guild = self.guild.clone();
            let clock = Arc::clone(&self.clock);
            tokio::spawn(async move {
                clock::sleep_until(clock.as_ref(), until).await;
                if let Some(guild) = guild.upgrade() {
                    guild.timeouts().remove_user(user, None);
                }
            })
        };
        if let Some(entry) = self
            .entries
            .lock()
            .iter_mut()
            .find(|e| e.user == user && e.countdown.is_none())
        {
            entry.countdown = Some(countdown);
        }
    }

    fn persist(&self) {
        if let Some(guild) = self.guild.upgrade() {
            guild.save_timeouts(self.records());
        }
    }
}
