//! Integration test common infrastructure.
//!
//! Provides an in-memory chat platform, a manual clock and store-backed
//! guild fixtures so the whole engine runs without a live platform
//! connection.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use scrimd::chat::{
    ChannelId, ChatClient, ChatError, Draft, GuildId, Member, MessageId, MessageRef, RoleId,
    ThreadInfo, UserId,
};
use scrimd::clock::ManualClock;
use scrimd::guild::Guild;
use scrimd::session::{Organizer, SessionRecord};
use scrimd::store::Store;
use std::collections::HashMap;
use std::sync::Arc;

pub const BOT_USER: UserId = UserId(999);

#[derive(Clone)]
struct StoredMessage {
    author: UserId,
    draft: Draft,
}

#[derive(Default)]
struct MockState {
    threads: HashMap<ChannelId, ThreadInfo>,
    messages: HashMap<(ChannelId, MessageId), StoredMessage>,
    history: HashMap<ChannelId, Vec<MessageId>>,
    roles: HashMap<UserId, Vec<RoleId>>,
    writes: HashMap<ChannelId, usize>,
    publishes: HashMap<ChannelId, usize>,
    deletes: HashMap<ChannelId, usize>,
    next_id: u64,
}

/// In-memory stand-in for the hosting chat platform.
pub struct MockChat {
    state: Mutex<MockState>,
}

impl MockChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                next_id: 10_000,
                ..MockState::default()
            }),
        })
    }

    pub fn add_thread(&self, thread: ChannelId, parent: ChannelId) {
        self.state.lock().threads.insert(
            thread,
            ThreadInfo {
                id: thread,
                parent,
                name: format!("thread-{thread}"),
                archived: false,
            },
        );
    }

    fn insert_message(&self, channel: ChannelId, id: MessageId, author: UserId) {
        let mut state = self.state.lock();
        state.messages.insert(
            (channel, id),
            StoredMessage {
                author,
                draft: Draft::default(),
            },
        );
        state.history.entry(channel).or_default().push(id);
    }

    /// Seed the full hosted surface of one session: the thread, the seed
    /// announcement message in the parent channel (same id as the thread)
    /// and a content message inside the thread. Returns the content id.
    pub fn seed_session_surface(&self, channel: ChannelId, thread: ChannelId) -> MessageId {
        self.add_thread(thread, channel);
        self.insert_message(channel, MessageId(thread.0), BOT_USER);
        let content = {
            let mut state = self.state.lock();
            state.next_id += 1;
            MessageId(state.next_id)
        };
        self.insert_message(thread, content, BOT_USER);
        content
    }

    pub fn thread_archived(&self, thread: ChannelId) -> bool {
        self.state
            .lock()
            .threads
            .get(&thread)
            .is_some_and(|t| t.archived)
    }

    pub fn last_draft(&self, channel: ChannelId, id: MessageId) -> Option<Draft> {
        self.state
            .lock()
            .messages
            .get(&(channel, id))
            .map(|m| m.draft.clone())
    }

    /// Every message text currently in a channel, oldest first.
    pub fn texts_in(&self, channel: ChannelId) -> Vec<String> {
        let state = self.state.lock();
        state
            .history
            .get(&channel)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.messages.get(&(channel, *id)))
                    .map(|m| m.draft.content.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The draft of the newest message in a channel.
    pub fn newest_draft(&self, channel: ChannelId) -> Option<Draft> {
        let state = self.state.lock();
        let id = state.history.get(&channel)?.last()?;
        state
            .messages
            .get(&(channel, *id))
            .map(|m| m.draft.clone())
    }

    /// External writes (sends + edits) observed in a channel.
    pub fn writes(&self, channel: ChannelId) -> usize {
        *self.state.lock().writes.get(&channel).unwrap_or(&0)
    }

    pub fn publishes(&self, channel: ChannelId) -> usize {
        *self.state.lock().publishes.get(&channel).unwrap_or(&0)
    }

    pub fn deletes(&self, channel: ChannelId) -> usize {
        *self.state.lock().deletes.get(&channel).unwrap_or(&0)
    }

    pub fn roles_of(&self, user: UserId) -> Vec<RoleId> {
        self.state.lock().roles.get(&user).cloned().unwrap_or_default()
    }

    fn make_ref(channel: ChannelId, id: MessageId, author: UserId) -> MessageRef {
        MessageRef {
            channel,
            id,
            author,
            url: format!("https://chat.example/{channel}/{id}"),
        }
    }
}

#[async_trait]
impl ChatClient for MockChat {
    async fn fetch_thread(&self, id: ChannelId) -> Result<ThreadInfo, ChatError> {
        self.state
            .lock()
            .threads
            .get(&id)
            .cloned()
            .ok_or_else(|| ChatError::unknown_channel(id))
    }

    async fn archive_thread(&self, id: ChannelId) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let thread = state
            .threads
            .get_mut(&id)
            .ok_or_else(|| ChatError::unknown_channel(id))?;
        thread.archived = true;
        Ok(())
    }

    async fn add_thread_member(&self, thread: ChannelId, _user: UserId) -> Result<(), ChatError> {
        if self.state.lock().threads.contains_key(&thread) {
            Ok(())
        } else {
            Err(ChatError::unknown_channel(thread))
        }
    }

    async fn fetch_message(
        &self,
        channel: ChannelId,
        id: MessageId,
    ) -> Result<MessageRef, ChatError> {
        self.state
            .lock()
            .messages
            .get(&(channel, id))
            .map(|m| Self::make_ref(channel, id, m.author))
            .ok_or_else(|| ChatError::unknown_message(id))
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        draft: &Draft,
    ) -> Result<MessageRef, ChatError> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = MessageId(state.next_id);
        state.messages.insert(
            (channel, id),
            StoredMessage {
                author: BOT_USER,
                draft: draft.clone(),
            },
        );
        state.history.entry(channel).or_default().push(id);
        *state.writes.entry(channel).or_default() += 1;
        Ok(Self::make_ref(channel, id, BOT_USER))
    }

    async fn send_reply(
        &self,
        channel: ChannelId,
        to: MessageId,
        draft: &Draft,
    ) -> Result<MessageRef, ChatError> {
        if !self.state.lock().messages.contains_key(&(channel, to)) {
            return Err(ChatError::unknown_message(to));
        }
        self.send_message(channel, draft).await
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        id: MessageId,
        draft: &Draft,
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let message = state
            .messages
            .get_mut(&(channel, id))
            .ok_or_else(|| ChatError::unknown_message(id))?;
        message.draft = draft.clone();
        *state.writes.entry(channel).or_default() += 1;
        Ok(())
    }

    async fn delete_message(&self, channel: ChannelId, id: MessageId) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        state
            .messages
            .remove(&(channel, id))
            .ok_or_else(|| ChatError::unknown_message(id))?;
        if let Some(history) = state.history.get_mut(&channel) {
            history.retain(|m| *m != id);
        }
        *state.deletes.entry(channel).or_default() += 1;
        Ok(())
    }

    async fn publish_message(&self, channel: ChannelId, id: MessageId) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        if !state.messages.contains_key(&(channel, id)) {
            return Err(ChatError::unknown_message(id));
        }
        *state.publishes.entry(channel).or_default() += 1;
        Ok(())
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> Result<Vec<MessageRef>, ChatError> {
        let state = self.state.lock();
        let history = state.history.get(&channel).cloned().unwrap_or_default();
        Ok(history
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| {
                state
                    .messages
                    .get(&(channel, *id))
                    .map(|m| Self::make_ref(channel, *id, m.author))
            })
            .collect())
    }

    async fn add_role(
        &self,
        _guild: GuildId,
        user: UserId,
        role: RoleId,
        _reason: Option<&str>,
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let roles = state.roles.entry(user).or_default();
        if !roles.contains(&role) {
            roles.push(role);
        }
        Ok(())
    }

    async fn remove_role(
        &self,
        _guild: GuildId,
        user: UserId,
        role: RoleId,
        _reason: Option<&str>,
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        if let Some(roles) = state.roles.get_mut(&user) {
            roles.retain(|r| *r != role);
        }
        Ok(())
    }

    async fn member_roles(&self, _guild: GuildId, user: UserId) -> Result<Vec<RoleId>, ChatError> {
        Ok(self.roles_of(user))
    }

    async fn create_invite(&self, channel: ChannelId) -> Result<String, ChatError> {
        Ok(format!("https://chat.example/invite/{channel}"))
    }

    fn bot_user(&self) -> UserId {
        BOT_USER
    }
}

/// Everything one test needs: platform, clock and store.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub chat: Arc<MockChat>,
    pub clock: ManualClock,
    pub store: Arc<Store>,
}

impl Harness {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open(dir.path().join("records.redb")).expect("open store"));
        Self {
            dir,
            chat: MockChat::new(),
            clock: ManualClock::new(t0()),
            store,
        }
    }

    /// Open a guild after seeding its settings document directly.
    pub async fn guild(&self, id: GuildId, settings: serde_json::Value) -> Arc<Guild> {
        self.store
            .put(&format!("{id}/settings"), &settings)
            .expect("seed settings");
        Guild::open(
            id,
            self.chat.clone(),
            Arc::new(self.clock.clone()),
            Arc::clone(&self.store),
        )
        .await
    }

    /// Reopen the same guild from the same store, as after a restart.
    pub async fn reopen(&self, id: GuildId) -> Arc<Guild> {
        Guild::open(
            id,
            self.chat.clone(),
            Arc::new(self.clock.clone()),
            Arc::clone(&self.store),
        )
        .await
    }
}

/// The tests' fixed epoch: 2022-10-10 12:00:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 10, 10, 12, 0, 0).single().expect("valid instant")
}

pub fn member(id: u64) -> Member {
    Member::new(UserId(id), format!("user{id}"))
}

pub fn record(
    thread: ChannelId,
    channel: ChannelId,
    content: MessageId,
    time: DateTime<Utc>,
    capacity: u32,
) -> SessionRecord {
    SessionRecord {
        thread,
        channel,
        message: content,
        time: time.timestamp(),
        organizer: Organizer {
            id: UserId(1),
            name: "organizer".to_string(),
            avatar: String::new(),
        },
        name: None,
        capacity: Some(capacity),
        players: Vec::new(),
        reserve: Vec::new(),
        started: false,
    }
}

/// Let spawned engine tasks run.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
}
