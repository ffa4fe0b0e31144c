//! Per-guild engine state and the process-wide guild registry.
//!
//! A [`Guild`] owns its settings, its session managers, one broadcaster per
//! configured broadcast channel and its timeout ledger. Dependencies (store,
//! clock, chat client) are injected at construction so the whole engine runs
//! against an in-memory platform in tests.

use crate::broadcast::Broadcaster;
use crate::chat::{ChannelId, ChatClient, GuildId, RoleId, UserId};
use crate::clock::Clock;
use crate::session::manager::SessionManager;
use crate::session::{Session, SessionRecord, SyncHook};
use crate::settings::Settings;
use crate::store::Store;
use crate::timeout::{TimeoutLedger, TimeoutRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::{info, warn};

/// One leaderboard entry: a session that started with a full roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationRecord {
    pub session: ChannelId,
    /// When the entry was recorded, unix seconds.
    pub time: i64,
    pub players: Vec<UserId>,
}

/// All engine state for one guild.
pub struct Guild {
    pub id: GuildId,
    this: Weak<Guild>,
    chat: Arc<dyn ChatClient>,
    clock: Arc<dyn Clock>,
    store: Arc<Store>,
    pub settings: Settings,
    sessions: DashMap<ChannelId, Arc<SessionManager>>,
    broadcasts: Mutex<Vec<Arc<Broadcaster>>>,
    timeouts: TimeoutLedger,
}

impl Guild {
    /// Load a guild from the store: settings, persisted sessions (each gets
    /// its manager respawned, timers recomputed from absolute instants) and
    /// persisted restrictions.
    pub async fn open(
        id: GuildId,
        chat: Arc<dyn ChatClient>,
        clock: Arc<dyn Clock>,
        store: Arc<Store>,
    ) -> Arc<Self> {
        let settings = Settings::load(Arc::clone(&store), format!("{id}/settings"));
        let guild = Arc::new_cyclic(|weak: &Weak<Guild>| Guild {
            id,
            this: weak.clone(),
            chat: Arc::clone(&chat),
            clock: Arc::clone(&clock),
            store,
            settings,
            sessions: DashMap::new(),
            broadcasts: Mutex::new(Vec::new()),
            timeouts: TimeoutLedger::new(weak.clone(), Arc::clone(&clock)),
        });
        guild.init().await;
        guild
    }

    async fn init(&self) {
        {
            let mut broadcasts = self.broadcasts.lock();
            for channel in self.settings.broadcast_channels() {
                broadcasts.push(Broadcaster::new(
                    channel,
                    self.this.clone(),
                    Arc::clone(&self.chat),
                    Arc::clone(&self.clock),
                ));
            }
        }

        let records: Vec<SessionRecord> = self.store.load_or_default(&self.key("sessions"));
        info!(guild = %self.id, count = records.len(), "restoring sessions");
        for record in records {
            self.spawn_manager(record).await;
        }

        let restrictions: Vec<TimeoutRecord> = self.store.load_or_default(&self.key("timeouts"));
        if !restrictions.is_empty() {
            info!(guild = %self.id, count = restrictions.len(), "restoring restrictions");
        }
        self.timeouts.restore(restrictions);
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.id, name)
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.settings.server().timezone
    }

    pub fn timeouts(&self) -> &TimeoutLedger {
        &self.timeouts
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Register a freshly announced session: persist it and hand it to a new
    /// manager, which performs the first synchronization and arms timers.
    pub async fn create_session(&self, record: SessionRecord) -> Arc<SessionManager> {
        let manager = self.spawn_manager(record).await;
        self.queue_save_sessions();
        manager
    }

    async fn spawn_manager(&self, record: SessionRecord) -> Arc<SessionManager> {
        let session = Session::new(record, self.timezone(), self.session_sync_hook());
        let manager = SessionManager::new(
            self.this.clone(),
            Arc::clone(&self.chat),
            Arc::clone(&self.clock),
            session,
        );
        self.sessions.insert(manager.id(), Arc::clone(&manager));
        manager.init().await;
        manager
    }

    pub fn session(&self, id: ChannelId) -> Option<Arc<SessionManager>> {
        self.sessions.get(&id).map(|m| Arc::clone(&m))
    }

    pub fn session_managers(&self) -> Vec<Arc<SessionManager>> {
        self.sessions.iter().map(|m| Arc::clone(&m)).collect()
    }

    /// Deregister an ended session and re-save the list.
    pub fn remove_session(&self, id: ChannelId) {
        if self.sessions.remove(&id).is_some() {
            self.queue_save_sessions();
        }
    }

    /// Overlap detection: another session in the same channel scheduled
    /// less than an hour away.
    pub fn has_overlapping_session(&self, channel: ChannelId, time: DateTime<Utc>) -> bool {
        self.session_managers().iter().any(|m| {
            m.channel() == channel
                && (m.scheduled_time() - time).num_seconds().abs() < 3600
        })
    }

    fn session_sync_hook(&self) -> SyncHook {
        let weak = self.this.clone();
        Arc::new(move || {
            // Deferred so a mutation holding the session lock never waits
            // on its own snapshot.
            if let Some(guild) = weak.upgrade() {
                tokio::spawn(async move { guild.save_sessions() });
            }
        })
    }

    fn queue_save_sessions(&self) {
        if let Some(guild) = self.this.upgrade() {
            tokio::spawn(async move { guild.save_sessions() });
        }
    }

    /// Best-effort snapshot of every live session into the store.
    pub fn save_sessions(&self) {
        let records: Vec<SessionRecord> = self
            .session_managers()
            .iter()
            .map(|m| m.record_snapshot())
            .collect();
        let store = Arc::clone(&self.store);
        let key = self.key("sessions");
        tokio::task::spawn_blocking(move || {
            if let Err(error) = store.put(&key, &records) {
                warn!(key = %key, error = %error, "session snapshot not persisted");
            }
        });
    }

    // ------------------------------------------------------------------
    // Broadcasters
    // ------------------------------------------------------------------

    pub fn broadcasters(&self) -> Vec<Arc<Broadcaster>> {
        self.broadcasts.lock().clone()
    }

    /// Nudge every broadcaster; called after every session mutation.
    pub fn update_broadcasts(&self) {
        for broadcaster in self.broadcasts.lock().iter() {
            broadcaster.trigger();
        }
    }

    // ------------------------------------------------------------------
    // Restrictions
    // ------------------------------------------------------------------

    pub fn is_restricted(&self, user: UserId) -> bool {
        self.timeouts.contains(user)
    }

    /// Reconcile an externally stripped restriction marker: the ledger entry
    /// is stale and goes away.
    pub fn on_member_update(&self, user: UserId, roles: &[RoleId]) {
        let Some(marker) = self.settings.server().timeout_role else {
            return;
        };
        if self.timeouts.contains(user) && !roles.contains(&marker) {
            info!(guild = %self.id, user = %user, "restriction role removed externally, reconciling");
            self.timeouts
                .remove_user(user, Some("restriction role removed externally"));
        }
    }

    pub(crate) fn apply_restriction_role(&self, user: UserId, reason: String) {
        let Some(role) = self.settings.server().timeout_role else {
            return;
        };
        let chat = Arc::clone(&self.chat);
        let guild = self.id;
        tokio::spawn(async move {
            if let Err(error) = chat.add_role(guild, user, role, Some(&reason)).await {
                warn!(guild = %guild, user = %user, error = %error, "restriction role not applied");
            }
        });
    }

    pub(crate) fn clear_restriction_role(&self, user: UserId, reason: Option<String>) {
        let Some(role) = self.settings.server().timeout_role else {
            return;
        };
        let chat = Arc::clone(&self.chat);
        let guild = self.id;
        tokio::spawn(async move {
            if let Err(error) = chat.remove_role(guild, user, role, reason.as_deref()).await {
                warn!(guild = %guild, user = %user, error = %error, "restriction role not removed");
            }
        });
    }

    pub(crate) fn save_timeouts(&self, records: Vec<TimeoutRecord>) {
        let store = Arc::clone(&self.store);
        let key = self.key("timeouts");
        tokio::task::spawn_blocking(move || {
            if let Err(error) = store.put(&key, &records) {
                warn!(key = %key, error = %error, "restriction snapshot not persisted");
            }
        });
    }

    // ------------------------------------------------------------------
    // Extras
    // ------------------------------------------------------------------

    /// Append a leaderboard entry for a session that started at capacity.
    pub fn log_participation(&self, session: ChannelId, players: &[UserId]) {
        let record = ParticipationRecord {
            session,
            time: self.clock.now_utc().timestamp(),
            players: players.to_vec(),
        };
        let store = Arc::clone(&self.store);
        let key = self.key("participation");
        tokio::task::spawn_blocking(move || {
            let mut log: Vec<ParticipationRecord> = store.load_or_default(&key);
            log.push(record);
            if let Err(error) = store.put(&key, &log) {
                warn!(key = %key, error = %error, "participation entry not persisted");
            }
        });
    }

    pub fn participation_log(&self) -> Vec<ParticipationRecord> {
        self.store.load_or_default(&self.key("participation"))
    }

    /// Invite link for the configured invite channel, when there is one.
    pub async fn invite_link(&self) -> Option<String> {
        let channel = self.settings.server().invite_channel?;
        match self.chat.create_invite(channel).await {
            Ok(link) => Some(link),
            Err(error) => {
                warn!(guild = %self.id, error = %error, "invite link not created");
                None
            }
        }
    }
}

/// Process-wide guild registry: get-or-initialize, memoized per id.
pub struct Guilds {
    chat: Arc<dyn ChatClient>,
    clock: Arc<dyn Clock>,
    store: Arc<Store>,
    guilds: DashMap<GuildId, Arc<Guild>>,
    /// Serializes first-time initialization per process.
    init_gate: tokio::sync::Mutex<()>,
}

impl Guilds {
    pub fn new(chat: Arc<dyn ChatClient>, clock: Arc<dyn Clock>, store: Arc<Store>) -> Self {
        Self {
            chat,
            clock,
            store,
            guilds: DashMap::new(),
            init_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn get(&self, id: GuildId) -> Arc<Guild> {
        if let Some(guild) = self.guilds.get(&id) {
            return Arc::clone(&guild);
        }
        let _gate = self.init_gate.lock().await;
        if let Some(guild) = self.guilds.get(&id) {
            return Arc::clone(&guild);
        }
        let guild = Guild::open(
            id,
            Arc::clone(&self.chat),
            Arc::clone(&self.clock),
            Arc::clone(&self.store),
        )
        .await;
        self.guilds.insert(id, Arc::clone(&guild));
        guild
    }

    pub fn loaded(&self) -> Vec<Arc<Guild>> {
        self.guilds.iter().map(|g| Arc::clone(&g)).collect()
    }
}
