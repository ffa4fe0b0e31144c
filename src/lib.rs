//! scrimd - scrim session coordination engine.
//!
//! Coordinates scheduled, capacity-limited group sessions ("scrims") inside a
//! community chat space: organizers announce a session at a future time,
//! members join a roster or a reserve queue, the roster self-manages as
//! people drop in and out, the session starts automatically at its scheduled
//! time and auto-archives afterwards. A per-channel broadcaster keeps a
//! rate-limited "what's upcoming" listing fresh, and a timeout ledger tracks
//! time-boxed participation restrictions with persistent countdown timers.
//!
//! The chat platform itself is consumed exclusively through the capability
//! traits in [`chat`]; an adapter binary wires a concrete client plus a
//! command front-end to this crate.

pub mod broadcast;
pub mod chat;
pub mod clock;
pub mod config;
pub mod guild;
pub mod session;
pub mod settings;
pub mod store;
pub mod timeout;

pub use broadcast::Broadcaster;
pub use chat::{ChannelId, ChatClient, ChatError, GuildId, Member, MessageId, RoleId, UserId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use guild::{Guild, Guilds};
pub use session::manager::SessionManager;
pub use session::{Session, SessionRecord};
pub use settings::Settings;
pub use store::Store;
pub use timeout::TimeoutLedger;
