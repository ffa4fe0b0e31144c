//! Per-session lifecycle driver.
//!
//! A `SessionManager` owns exactly one [`Session`] plus the proxies to its
//! three hosted resources (thread, channel announcement, thread content
//! message). It runs the session's two autonomous timers, re-derives the
//! interactive view on every resynchronization, and tears itself down when
//! the thread disappears or the session runs out.
//!
//! Roster mutation happens in synchronous critical sections under the
//! session mutex - never across an await - so concurrent join/leave calls
//! cannot interleave mid-mutation.

use super::proxy::{ErrorPolicy, ErrorVerdict, FatalSignal, ResourceProxy, SilentPolicy};
use super::view::SessionView;
use super::{Participant, Session, SessionRecord};
use crate::chat::{
    Card, CardAuthor, CardField, ChannelId, ChatClient, ChatError, Draft, Member, MessageId,
    MessageRef, ThreadInfo, UserId, tag,
};
use crate::clock::{self, Clock};
use crate::guild::Guild;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{info, warn};

/// How long after the scheduled time a session stays interactive.
fn interactive_window() -> Duration {
    Duration::hours(2)
}

/// The archive timer fires a little after the interactive window closes.
fn archive_delay() -> Duration {
    Duration::hours(2) + Duration::minutes(5)
}

const RESTRICTED_REPLY: &str = "Sorry buddy, you are on a timeout!";

/// Classifies proxy errors for a live session: fatal platform errors flip
/// the shared teardown signal, everything else is logged and retried later.
struct TeardownPolicy {
    session: ChannelId,
    signal: Arc<FatalSignal>,
}

impl ErrorPolicy for TeardownPolicy {
    fn assess(&self, error: &ChatError) -> ErrorVerdict {
        if error.is_fatal() {
            info!(session = %self.session, error = %error, "hosted resource gone, ending session");
            self.signal.fire();
            ErrorVerdict::Fatal
        } else {
            warn!(session = %self.session, error = %error, "platform error, retrying on next sync");
            ErrorVerdict::Transient
        }
    }
}

/// Owns one session for its whole lifetime; the unit of concurrency.
pub struct SessionManager {
    id: ChannelId,
    this: Weak<SessionManager>,
    guild: Weak<Guild>,
    chat: Arc<dyn ChatClient>,
    clock: Arc<dyn Clock>,
    session: Mutex<Session>,
    thread: ResourceProxy<ThreadInfo>,
    announcement: ResourceProxy<MessageRef>,
    content: ResourceProxy<MessageRef>,
    view: Mutex<SessionView>,
    /// Jump URL of the content message, once known.
    url: Mutex<String>,
    broadcast: Mutex<Option<ChannelId>>,
    ping_cooldown: Mutex<Duration>,
    last_ping: Mutex<DateTime<Utc>>,
    fatal: Arc<FatalSignal>,
    /// Channel defaults attached after the first successful thread fetch.
    bound: AtomicBool,
    ended: AtomicBool,
    /// Serializes resynchronizations so concurrent triggers coalesce.
    update_gate: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(
        guild: Weak<Guild>,
        chat: Arc<dyn ChatClient>,
        clock: Arc<dyn Clock>,
        session: Session,
    ) -> Arc<Self> {
        let id = session.id();
        let fatal = Arc::new(FatalSignal::new());
        let policy: Arc<dyn ErrorPolicy> = Arc::new(TeardownPolicy {
            session: id,
            signal: Arc::clone(&fatal),
        });

        let thread_chat = Arc::clone(&chat);
        let thread = ResourceProxy::with_fetcher(Arc::clone(&policy), move || {
            let chat = Arc::clone(&thread_chat);
            Box::pin(async move { chat.fetch_thread(id).await })
        });

        let last_ping = clock.now_utc() - Duration::hours(1);
        Arc::new_cyclic(|this| Self {
            id,
            this: this.clone(),
            guild,
            chat,
            clock,
            session: Mutex::new(session),
            thread,
            announcement: ResourceProxy::new(Arc::clone(&policy)),
            content: ResourceProxy::new(policy),
            view: Mutex::new(SessionView::before(id)),
            url: Mutex::new(String::new()),
            broadcast: Mutex::new(None),
            ping_cooldown: Mutex::new(Duration::minutes(
                crate::settings::DEFAULT_PING_COOLDOWN_MINUTES,
            )),
            last_ping: Mutex::new(last_ping),
            fatal,
            bound: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            update_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// First synchronization: resolve the thread, arm both timers, and
    /// watch the teardown signal.
    pub async fn init(&self) {
        {
            let weak = self.this.clone();
            let fatal = Arc::clone(&self.fatal);
            tokio::spawn(async move {
                fatal.notified().await;
                if let Some(manager) = weak.upgrade() {
                    manager.end().await;
                }
            });
        }
        self.resolve().await;
        if let Some(this) = self.this.upgrade() {
            tokio::spawn(Arc::clone(&this).run_start_timer());
            tokio::spawn(this.run_archive_timer());
        }
        self.queue_update();
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn channel(&self) -> ChannelId {
        self.session.lock().record().channel
    }

    pub fn scheduled_time(&self) -> DateTime<Utc> {
        self.session.lock().time_utc()
    }

    pub fn started(&self) -> bool {
        self.session.lock().started()
    }

    pub fn is_full(&self) -> bool {
        self.session.lock().is_full()
    }

    pub fn broadcast_channel(&self) -> Option<ChannelId> {
        *self.broadcast.lock()
    }

    pub fn ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// The interactive surface as of the last resynchronization.
    pub fn view(&self) -> SessionView {
        self.view.lock().clone()
    }

    pub fn record_snapshot(&self) -> SessionRecord {
        self.session.lock().snapshot()
    }

    /// Whether the user is signed up at all (roster or reserve).
    pub fn contains_player(&self, user: UserId) -> bool {
        self.session.lock().contains_user(user)
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    pub async fn join(&self, member: &Member) -> String {
        if self.restricted(member.id) {
            return RESTRICTED_REPLY.to_string();
        }
        self.thread
            .wait(|t| self.chat.add_thread_member(t.id, member.id))
            .await;

        enum Outcome {
            Added,
            AlreadyIn,
            Full,
        }
        let outcome = {
            let mut session = self.session.lock();
            if !session.is_full() {
                if session.contains_player(member.id) {
                    Outcome::AlreadyIn
                } else {
                    session.add_player(Participant::from(member));
                    Outcome::Added
                }
            } else {
                Outcome::Full
            }
        };

        match outcome {
            Outcome::Added => {
                self.queue_update();
                "Added you to the scrim.".to_string()
            }
            Outcome::AlreadyIn => "Whoops, you are already in there!".to_string(),
            Outcome::Full => {
                let promoted = {
                    let mut session = self.session.lock();
                    let promoted = if !session.contains_reserve(member.id) {
                        session.add_reserve(Participant::from(member))
                    } else {
                        None
                    };
                    session.set_auto_promote(member.id, true);
                    promoted
                };
                if let Some(promoted) = promoted {
                    self.notify_promoted(&promoted).await;
                }
                self.queue_update();
                "It's full, sorry! I put you on the reserve on auto-join, if a spot opens up \
                 the first reserve on auto-join will get it. If you don't want auto-join just \
                 press the **reserve** button."
                    .to_string()
            }
        }
    }

    pub async fn reserve(&self, member: &Member) -> String {
        if self.restricted(member.id) {
            return RESTRICTED_REPLY.to_string();
        }
        self.thread
            .wait(|t| self.chat.add_thread_member(t.id, member.id))
            .await;

        enum Outcome {
            Locked,
            Reserved {
                full: bool,
                promoted: Option<Participant>,
            },
            Toggled,
        }
        let outcome = {
            let mut session = self.session.lock();
            if session.started() && session.contains_player(member.id) {
                Outcome::Locked
            } else if !session.contains_reserve(member.id) {
                let promoted = session.add_reserve(Participant::from(member));
                Outcome::Reserved {
                    full: session.is_full(),
                    promoted,
                }
            } else {
                session.set_auto_promote(member.id, false);
                Outcome::Toggled
            }
        };

        match outcome {
            Outcome::Locked => "You can't switch to reserve after the scrim started!".to_string(),
            Outcome::Reserved { full, promoted } => {
                if let Some(promoted) = promoted {
                    self.notify_promoted(&promoted).await;
                }
                self.queue_update();
                if full {
                    "Put you on the reserve list, if you would like to join as soon as a spot \
                     opens up click **join** to turn on auto-join. If a spot opens up the first \
                     reserve on auto-join will get it."
                        .to_string()
                } else {
                    "Put you on the reserve list.".to_string()
                }
            }
            Outcome::Toggled => {
                self.queue_update();
                "You are already a reserve, turned off auto-join if it was on.".to_string()
            }
        }
    }

    pub async fn leave(&self, user: UserId) -> String {
        let promoted = {
            let mut session = self.session.lock();
            session.remove_reserve(user);
            session.remove_player(user)
        };
        if let Some(promoted) = promoted {
            self.notify_promoted(&promoted).await;
        }
        self.queue_update();
        "Removed you from the scrim.".to_string()
    }

    /// Page the first uncalled reserve. Roster members only.
    pub async fn call_reserve(&self, caller: UserId) -> (String, bool) {
        let allowed = { self.session.lock().contains_player(caller) };
        if !allowed {
            return ("You aren't in the scrim, buddy".to_string(), true);
        }
        let called = { self.session.lock().call_next_reserve() };
        match called {
            None => ("No reserve available".to_string(), true),
            Some(reserve) => {
                self.queue_update();
                (
                    format!("{} you are needed! Get online if you can!", reserve.mention),
                    false,
                )
            }
        }
    }

    /// Ping the whole roster, rate-limited per session.
    pub fn ping(&self, text: &str, user: UserId) -> (String, bool) {
        let now = self.clock.now_utc();
        let cooldown = *self.ping_cooldown.lock();
        let mut last = self.last_ping.lock();
        if now - *last < cooldown {
            return ("Don't ping that often!".to_string(), true);
        }
        let session = self.session.lock();
        if !session.contains_player(user) {
            return ("You're not in this scrim!".to_string(), true);
        }
        *last = now;
        (
            format!(
                "{}, You have been pinged by {}!\n{}",
                session.roster_text(", "),
                tag::user(user),
                text,
            ),
            false,
        )
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    /// Resynchronize: re-derive the view from current data, re-render the
    /// shared messages where resolvable, archive when the session is over,
    /// and nudge the broadcasters. Idempotent; concurrent calls coalesce.
    pub async fn update(&self) {
        if self.ended() {
            return;
        }
        let _gate = self.update_gate.lock().await;
        if self.fatal.fired() {
            self.end().await;
            return;
        }
        self.resolve().await;
        if self.ended() {
            return;
        }
        if let Some(thread) = self.thread.peek().await
            && thread.archived
        {
            self.end().await;
            return;
        }

        let now = self.clock.now_utc();
        let (view, header, card, over, drained) = {
            let session = self.session.lock();
            let time = session.time_utc();
            let over = now - time > interactive_window();
            let view = if over {
                SessionView::Dormant
            } else if now >= time || session.started() {
                if session.player_count() > 0 {
                    SessionView::running(self.id)
                } else {
                    SessionView::Dormant
                }
            } else {
                SessionView::before(self.id)
            };
            let drained = session.started() && session.player_count() == 0;
            (
                view,
                session.header_message(),
                self.render_card(&session),
                over,
                drained,
            )
        };
        *self.view.lock() = view.clone();

        let content = Draft::default()
            .with_cards(vec![card])
            .with_controls(view.controls().cloned());
        self.content
            .wait(|m| self.chat.edit_message(m.channel, m.id, &content))
            .await;
        let header = Draft::text(header);
        self.announcement
            .wait(|m| self.chat.edit_message(m.channel, m.id, &header))
            .await;

        if over || drained {
            self.end().await;
            return;
        }
        if let Some(guild) = self.guild.upgrade() {
            guild.update_broadcasts();
        }
    }

    /// Schedule a resynchronization without blocking the caller.
    pub fn queue_update(&self) {
        if let Some(this) = self.this.upgrade() {
            tokio::spawn(async move { this.update().await });
        }
    }

    async fn resolve(&self) {
        let Some(thread) = self.thread.fetch().await else {
            return;
        };
        if !self.bound.swap(true, Ordering::SeqCst) {
            self.bind(thread).await;
        }
    }

    /// One-time wiring once the hosting thread is known: channel defaults,
    /// announcement and content message fetchers.
    async fn bind(&self, thread: ThreadInfo) {
        if let Some(guild) = self.guild.upgrade() {
            let defaults = guild.settings.channel(thread.parent);
            *self.broadcast.lock() = defaults.broadcast_channel;
            *self.ping_cooldown.lock() = Duration::minutes(defaults.ping_cooldown_minutes);
            self.session.lock().attach_defaults(defaults);
        }

        let chat = Arc::clone(&self.chat);
        let parent = thread.parent;
        let seed = MessageId(self.id.0);
        self.announcement.set_fetcher(move || {
            let chat = Arc::clone(&chat);
            Box::pin(async move { chat.fetch_message(parent, seed).await })
        });
        self.announcement.fetch().await;

        let chat = Arc::clone(&self.chat);
        let thread_id = self.id;
        let content_id = { self.session.lock().record().message };
        self.content.set_fetcher(move || {
            let chat = Arc::clone(&chat);
            Box::pin(async move { chat.fetch_message(thread_id, content_id).await })
        });
        if let Some(message) = self.content.fetch().await {
            *self.url.lock() = message.url;
        }
    }

    /// Sleeps until the scheduled time, then announces the start, flips the
    /// started flag and records participation when the roster filled up.
    /// A no-op when the session already started (process restart).
    async fn run_start_timer(self: Arc<Self>) {
        let target = { self.session.lock().time_utc() };
        clock::sleep_until(self.clock.as_ref(), target).await;
        if self.ended() {
            return;
        }

        let pending = {
            let session = self.session.lock();
            (!session.started()).then(|| {
                (
                    session.start_message(),
                    session.scheduled_time_text(" / "),
                    session.player_count(),
                )
            })
        };
        if let Some((thread_message, time_text, players)) = pending {
            let draft = Draft::text(thread_message);
            self.thread
                .wait(|t| self.chat.send_message(t.id, &draft))
                .await;
            if players > 0 {
                let reply = Draft::text(format!("Scrim at {time_text} is starting!"));
                self.announcement
                    .wait(|m| self.chat.send_reply(m.channel, m.id, &reply))
                    .await;
            }
            let full_roster = {
                let mut session = self.session.lock();
                session.mark_started();
                session.is_full().then(|| session.roster_ids())
            };
            if let Some(roster) = full_roster
                && let Some(guild) = self.guild.upgrade()
            {
                guild.log_participation(self.id, &roster);
            }
        }
        self.update().await;
    }

    /// Sleeps until well past the interactive window, then runs the final
    /// resynchronization that archives the thread.
    async fn run_archive_timer(self: Arc<Self>) {
        let target = { self.session.lock().time_utc() } + archive_delay();
        clock::sleep_until(self.clock.as_ref(), target).await;
        if !self.ended() {
            self.update().await;
        }
    }

    /// Terminal transition: silence the proxies, archive the thread,
    /// deregister from the guild.
    async fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let silent: Arc<dyn ErrorPolicy> = Arc::new(SilentPolicy);
        self.thread.set_policy(Arc::clone(&silent));
        self.announcement.set_policy(Arc::clone(&silent));
        self.content.set_policy(silent);

        self.thread
            .wait(|t| self.chat.archive_thread(t.id))
            .await;
        if let Some(guild) = self.guild.upgrade() {
            guild.remove_session(self.id);
            guild.update_broadcasts();
        }
        info!(session = %self.id, "session ended");
    }

    async fn notify_promoted(&self, promoted: &Participant) {
        let draft = Draft::text(format!(
            "{} a spot opened up, you are in! Get ready!",
            promoted.mention
        ));
        self.thread
            .wait(|t| self.chat.send_message(t.id, &draft))
            .await;
    }

    fn restricted(&self, user: UserId) -> bool {
        self.guild.upgrade().is_some_and(|g| g.is_restricted(user))
    }

    fn render_card(&self, session: &Session) -> Card {
        let url = self.url.lock().clone();
        let organizer = &session.record().organizer;
        let roster = if session.player_count() > 0 {
            session.roster_text("\n")
        } else {
            "no signups yet".to_string()
        };
        let reserves = if session.reserve_count() > 0 {
            session.reserve_text("\n")
        } else {
            "no reserves".to_string()
        };
        Card {
            title: session.title(),
            description: session.scheduled_time_text("\n"),
            url: (!url.is_empty()).then_some(url),
            fields: vec![
                CardField {
                    name: format!(
                        "Players ({}/{})",
                        session.player_count(),
                        session.capacity()
                    ),
                    value: roster,
                    inline: true,
                },
                CardField {
                    name: format!("Reserves ({})", session.reserve_count()),
                    value: reserves,
                    inline: true,
                },
            ],
            author: Some(CardAuthor {
                name: organizer.name.clone(),
                icon_url: organizer.avatar.clone(),
            }),
        }
    }

    /// Compact card for the broadcast listing.
    pub fn listing_card(&self) -> Card {
        let session = self.session.lock();
        let full = if session.is_full() { " **FULL**" } else { "" };
        let organizer = &session.record().organizer;
        Card {
            title: format!("{}{}", session.title(), full),
            description: session.scheduled_time_text("\n"),
            url: {
                let url = self.url.lock().clone();
                (!url.is_empty()).then_some(url)
            },
            fields: Vec::new(),
            author: Some(CardAuthor {
                name: organizer.name.clone(),
                icon_url: organizer.avatar.clone(),
            }),
        }
    }
}
