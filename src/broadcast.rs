//! Per-channel "what's upcoming" listing.
//!
//! One broadcaster per configured broadcast channel recomputes the ten
//! soonest future sessions on every trigger and republishes them - but only
//! when the content fingerprint actually changed, and only within the
//! hosting platform's edit-rate budget. A rate-limited change schedules
//! exactly one deferred retry instead of queueing unboundedly.

use crate::chat::{ChannelId, ChatClient, Draft, MessageRef};
use crate::clock::Clock;
use crate::guild::Guild;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// At most one edit per this many seconds of window.
const EDIT_BUDGET_SECS: i64 = 120;
/// Edits are counted over this trailing window.
const WINDOW_SECS: i64 = 3600;
/// Delay before a rate-limited change is retried.
const RETRY_DELAY_MS: u64 = 60_000;
/// After this many in-place edits the listing is deleted and resent so it
/// stays visible near the bottom of the channel.
const EDITS_BEFORE_REPOST: u32 = 3;
/// How far back to look when rediscovering a previous listing post.
const DISCOVERY_DEPTH: usize = 4;
/// The listing shows at most this many sessions.
const LISTING_LIMIT: usize = 10;

struct ListingState {
    message: Option<MessageRef>,
    /// Whether history has been scanned for a prior post this cycle.
    searched: bool,
    edits: u32,
    edit_log: VecDeque<DateTime<Utc>>,
    fingerprint: HashSet<(ChannelId, bool)>,
}

/// Aggregates upcoming sessions for one target channel.
pub struct Broadcaster {
    channel: ChannelId,
    this: Weak<Broadcaster>,
    guild: Weak<Guild>,
    chat: Arc<dyn ChatClient>,
    clock: Arc<dyn Clock>,
    created: DateTime<Utc>,
    state: tokio::sync::Mutex<ListingState>,
    retry_pending: AtomicBool,
    retry_delay_ms: AtomicU64,
}

impl Broadcaster {
    pub fn new(
        channel: ChannelId,
        guild: Weak<Guild>,
        chat: Arc<dyn ChatClient>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let created = clock.now_utc();
        Arc::new_cyclic(|this| Self {
            channel,
            this: this.clone(),
            guild,
            chat,
            clock,
            created,
            state: tokio::sync::Mutex::new(ListingState {
                message: None,
                searched: false,
                edits: 0,
                edit_log: VecDeque::new(),
                fingerprint: HashSet::new(),
            }),
            retry_pending: AtomicBool::new(false),
            retry_delay_ms: AtomicU64::new(RETRY_DELAY_MS),
        })
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Shorten the deferred-retry delay (tests).
    pub fn set_retry_delay(&self, delay: std::time::Duration) {
        self.retry_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Schedule a refresh without blocking the caller.
    pub fn trigger(&self) {
        if let Some(this) = self.this.upgrade() {
            tokio::spawn(async move { this.refresh().await });
        }
    }

    /// Recompute the listing and republish it when it changed and the edit
    /// budget allows. Serialized internally; concurrent triggers coalesce.
    pub async fn refresh(&self) {
        let Some(guild) = self.guild.upgrade() else {
            return;
        };
        let now = self.clock.now_utc();

        let mut upcoming: Vec<_> = guild
            .session_managers()
            .into_iter()
            .filter(|m| m.broadcast_channel() == Some(self.channel) && m.scheduled_time() >= now)
            .collect();
        upcoming.sort_by_key(|m| m.scheduled_time());
        upcoming.truncate(LISTING_LIMIT);

        let fingerprint: HashSet<(ChannelId, bool)> =
            upcoming.iter().map(|m| (m.id(), m.is_full())).collect();

        let mut state = self.state.lock().await;
        if fingerprint == state.fingerprint {
            return;
        }

        // Lazily rediscover our previous post so restarts reuse it.
        if state.message.is_none() && !state.searched {
            state.searched = true;
            match self.chat.recent_messages(self.channel, DISCOVERY_DEPTH).await {
                Ok(history) => {
                    if let Some(message) = history
                        .into_iter()
                        .find(|m| m.author == self.chat.bot_user())
                    {
                        state.message = Some(message);
                        state.edits = EDITS_BEFORE_REPOST;
                    }
                }
                Err(error) => {
                    debug!(channel = %self.channel, error = %error, "listing discovery failed");
                }
            }
        }

        if !self.budget_allows(&mut state) {
            self.schedule_retry();
            return;
        }

        let cards = upcoming.iter().map(|m| m.listing_card()).collect::<Vec<_>>();
        let content = if cards.is_empty() {
            "No scrims planned at the moment."
        } else {
            ""
        };
        let draft = Draft::text(content).with_cards(cards);

        if state.edits >= EDITS_BEFORE_REPOST || state.message.is_none() {
            if let Some(old) = state.message.take() {
                if let Err(error) = self.chat.delete_message(self.channel, old.id).await {
                    debug!(channel = %self.channel, error = %error, "stale listing not deleted");
                }
            }
            match self.chat.send_message(self.channel, &draft).await {
                Ok(message) => {
                    // Best effort; some channels cannot publish.
                    let _ = self.chat.publish_message(self.channel, message.id).await;
                    state.message = Some(message);
                    state.edits = 0;
                }
                Err(error) => {
                    warn!(channel = %self.channel, error = %error, "listing post failed");
                    return;
                }
            }
        } else if let Some(message) = state.message.clone() {
            if let Err(error) = self
                .chat
                .edit_message(self.channel, message.id, &draft)
                .await
            {
                // Treat as gone; rediscover on the next cycle.
                debug!(channel = %self.channel, error = %error, "listing edit failed, dropping handle");
                state.message = None;
                state.searched = false;
                return;
            }
            state.edits += 1;
        }

        state.edit_log.push_back(now);
        // Commit the fingerprint only after a successful write so a
        // rate-limited change survives to the deferred retry.
        state.fingerprint = fingerprint;
        debug!(channel = %self.channel, "broadcast listing updated");
    }

    /// Allowed edits in the trailing window: one per two minutes of elapsed
    /// window, anchored at the later of one hour ago or creation time.
    fn budget_allows(&self, state: &mut ListingState) -> bool {
        let now = self.clock.now_utc();
        let horizon = now - Duration::seconds(WINDOW_SECS);
        while let Some(front) = state.edit_log.front() {
            if *front <= horizon {
                state.edit_log.pop_front();
            } else {
                break;
            }
        }
        let window_start = horizon.max(self.created);
        let allowed = (now - window_start).num_seconds() as f64 / EDIT_BUDGET_SECS as f64;
        (state.edit_log.len() as f64) < allowed
    }

    /// Single-flight deferred retry: a second rate-limited trigger while one
    /// retry is pending does not schedule another.
    fn schedule_retry(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        if self
            .retry_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let delay = std::time::Duration::from_millis(self.retry_delay_ms.load(Ordering::SeqCst));
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.retry_pending.store(false, Ordering::SeqCst);
            this.refresh().await;
        });
        debug!(channel = %self.channel, "listing update rate limited, retry scheduled");
    }
}
