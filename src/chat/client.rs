//! The `ChatClient` capability trait and its value types.

use super::{ChannelId, ChatError, GuildId, MessageId, RoleId, UserId};
use async_trait::async_trait;

/// A thread-like container hosting one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ChannelId,
    /// The text channel the thread was spawned from.
    pub parent: ChannelId,
    pub name: String,
    pub archived: bool,
}

/// A lightweight handle to a message the engine owns or edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub channel: ChannelId,
    pub id: MessageId,
    pub author: UserId,
    /// Jump URL, when the platform exposes one.
    pub url: String,
}

/// A rich formatted attachment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Card {
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub fields: Vec<CardField>,
    pub author: Option<CardAuthor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardAuthor {
    pub name: String,
    pub icon_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Success,
    Primary,
    Secondary,
    Danger,
}

/// An interactive button bound to a stable callback id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub id: String,
    pub label: String,
    pub style: ButtonStyle,
}

impl Button {
    pub fn new(id: impl Into<String>, label: impl Into<String>, style: ButtonStyle) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            style,
        }
    }
}

/// A row of buttons attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlSet {
    pub buttons: Vec<Button>,
}

/// Everything needed to send or edit one message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Draft {
    pub content: String,
    pub cards: Vec<Card>,
    /// `None` removes any previously attached controls.
    pub controls: Option<ControlSet>,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_cards(mut self, cards: Vec<Card>) -> Self {
        self.cards = cards;
        self
    }

    pub fn with_controls(mut self, controls: Option<ControlSet>) -> Self {
        self.controls = controls;
        self
    }
}

/// Capabilities the engine consumes from the hosting chat platform.
///
/// Every method is a suspension point; implementations are expected to map
/// raw platform failures onto [`ChatError`] kinds so the engine can separate
/// transient trouble from permanently gone resources.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Resolve a thread-like container by id.
    async fn fetch_thread(&self, id: ChannelId) -> Result<ThreadInfo, ChatError>;

    /// Request the thread be archived.
    async fn archive_thread(&self, id: ChannelId) -> Result<(), ChatError>;

    /// Add a user to a thread so they receive its updates.
    async fn add_thread_member(&self, thread: ChannelId, user: UserId) -> Result<(), ChatError>;

    async fn fetch_message(
        &self,
        channel: ChannelId,
        id: MessageId,
    ) -> Result<MessageRef, ChatError>;

    async fn send_message(&self, channel: ChannelId, draft: &Draft)
    -> Result<MessageRef, ChatError>;

    /// Send a message as a reply to an existing one.
    async fn send_reply(
        &self,
        channel: ChannelId,
        to: MessageId,
        draft: &Draft,
    ) -> Result<MessageRef, ChatError>;

    async fn edit_message(
        &self,
        channel: ChannelId,
        id: MessageId,
        draft: &Draft,
    ) -> Result<(), ChatError>;

    async fn delete_message(&self, channel: ChannelId, id: MessageId) -> Result<(), ChatError>;

    /// Pin/publish a message so it stays visible in the channel.
    async fn publish_message(&self, channel: ChannelId, id: MessageId) -> Result<(), ChatError>;

    /// The most recent messages in a channel, newest first.
    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> Result<Vec<MessageRef>, ChatError>;

    async fn add_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: Option<&str>,
    ) -> Result<(), ChatError>;

    async fn remove_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: Option<&str>,
    ) -> Result<(), ChatError>;

    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Vec<RoleId>, ChatError>;

    /// Create (or reuse) an invite link for a channel.
    async fn create_invite(&self, channel: ChannelId) -> Result<String, ChatError>;

    /// The engine's own user id, used to recognize its prior posts.
    fn bot_user(&self) -> UserId;
}
