//! Schema-validated, defaulted, hierarchical guild settings.
//!
//! Settings arrive as one nested JSON document (uploaded through a command
//! outside this crate) and are validated against a fixed template before
//! anything is persisted: unknown keys are rejected at every level, each
//! field self-validates (plain type, timezone name, or membership in the
//! caller-supplied live channel/role id sets), and a candidate is applied
//! atomically or not at all. Read accessors flatten with defaults applied;
//! per-channel settings are the channel defaults overridden by the
//! channel-specific entry.

use crate::chat::{ChannelId, RoleId};
use crate::store::{Store, StoreError};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_CAPACITY: u32 = 8;
pub const DEFAULT_PREFIX: &str = "Mixed Scrim";
pub const DEFAULT_PING_COOLDOWN_MINUTES: i64 = 5;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings need to contain a `{0}` section")]
    MissingSection(&'static str),
    #[error("invalid keys found: {0}")]
    UnknownKeys(String),
    #[error("`{key}` should be {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("`{0}` is required")]
    MissingRequired(&'static str),
    #[error("`{0}` is not a valid timezone")]
    InvalidTimezone(String),
    #[error("`{0}` is not a valid channel")]
    UnknownChannel(String),
    #[error("`{0}` is not a valid role")]
    UnknownRole(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The live id sets a candidate is cross-referenced against.
#[derive(Debug, Clone, Default)]
pub struct RefIds {
    pub channels: HashSet<ChannelId>,
    pub roles: HashSet<RoleId>,
}

impl RefIds {
    pub fn new(
        channels: impl IntoIterator<Item = ChannelId>,
        roles: impl IntoIterator<Item = RoleId>,
    ) -> Self {
        Self {
            channels: channels.into_iter().collect(),
            roles: roles.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Int,
    Text,
    Timezone,
    Channel,
    Role,
}

struct FieldSpec {
    name: &'static str,
    kind: Kind,
    required: bool,
}

const fn field(name: &'static str, kind: Kind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

const SERVER_FIELDS: &[FieldSpec] = &[
    field("mod_channel", Kind::Channel),
    FieldSpec {
        name: "timezone",
        kind: Kind::Timezone,
        required: true,
    },
    field("timeout_role", Kind::Role),
    field("invite_channel", Kind::Channel),
];

const CHANNEL_FIELDS: &[FieldSpec] = &[
    field("capacity", Kind::Int),
    field("prefix", Kind::Text),
    field("ping_cooldown", Kind::Int),
    field("broadcast_channel", Kind::Channel),
    field("scrimmer_role", Kind::Role),
];

/// Flattened server-level settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub timezone: Tz,
    pub mod_channel: Option<ChannelId>,
    pub timeout_role: Option<RoleId>,
    pub invite_channel: Option<ChannelId>,
}

/// Flattened per-channel settings (defaults applied).
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    pub capacity: u32,
    pub prefix: String,
    pub ping_cooldown_minutes: i64,
    pub broadcast_channel: Option<ChannelId>,
    pub scrimmer_role: Option<RoleId>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            prefix: DEFAULT_PREFIX.to_string(),
            ping_cooldown_minutes: DEFAULT_PING_COOLDOWN_MINUTES,
            broadcast_channel: None,
            scrimmer_role: None,
        }
    }
}

/// The persistent settings document for one guild.
pub struct Settings {
    store: Arc<Store>,
    key: String,
    data: Mutex<Value>,
}

impl Settings {
    pub fn load(store: Arc<Store>, key: String) -> Self {
        let data = store.load_or_default::<Value>(&key);
        Self {
            store,
            key,
            data: Mutex::new(data),
        }
    }

    /// Validate `candidate` in full and, only on success, replace and persist
    /// the settings. Never partially applies.
    pub fn replace(&self, candidate: &Value, refs: &RefIds) -> Result<(), SettingsError> {
        let map = as_table(candidate, "settings")?;
        check_keys(map, &["server", "channel_defaults", "channel"])?;

        let server = map
            .get("server")
            .ok_or(SettingsError::MissingSection("server"))?;
        validate_section(server, "server", SERVER_FIELDS, refs)?;

        if let Some(defaults) = map.get("channel_defaults") {
            validate_section(defaults, "channel_defaults", CHANNEL_FIELDS, refs)?;
        }

        if let Some(channels) = map.get("channel") {
            let channels = as_table(channels, "channel")?;
            for (key, overrides) in channels {
                let known = key
                    .parse::<u64>()
                    .map(ChannelId)
                    .is_ok_and(|id| refs.channels.contains(&id));
                if !known {
                    return Err(SettingsError::UnknownChannel(key.clone()));
                }
                validate_section(overrides, key, CHANNEL_FIELDS, refs)?;
            }
        }

        self.store.put(&self.key, candidate)?;
        *self.data.lock() = candidate.clone();
        Ok(())
    }

    pub fn server(&self) -> ServerSettings {
        let data = self.data.lock();
        let section = data.get("server");
        ServerSettings {
            timezone: section
                .and_then(|s| s.get("timezone"))
                .and_then(Value::as_str)
                .and_then(|name| name.parse().ok())
                .unwrap_or(Tz::UTC),
            mod_channel: get_id(section, "mod_channel").map(ChannelId),
            timeout_role: get_id(section, "timeout_role").map(RoleId),
            invite_channel: get_id(section, "invite_channel").map(ChannelId),
        }
    }

    pub fn channel(&self, id: ChannelId) -> ChannelSettings {
        let data = self.data.lock();
        let overrides = data
            .get("channel")
            .and_then(|c| c.get(id.to_string().as_str()));
        flatten_channel(data.get("channel_defaults"), overrides)
    }

    pub fn channel_defaults(&self) -> ChannelSettings {
        let data = self.data.lock();
        flatten_channel(data.get("channel_defaults"), None)
    }

    pub fn channels(&self) -> BTreeMap<ChannelId, ChannelSettings> {
        let data = self.data.lock();
        let defaults = data.get("channel_defaults");
        let mut out = BTreeMap::new();
        if let Some(channels) = data.get("channel").and_then(Value::as_object) {
            for (key, overrides) in channels {
                if let Ok(id) = key.parse::<u64>() {
                    out.insert(ChannelId(id), flatten_channel(defaults, Some(overrides)));
                }
            }
        }
        out
    }

    /// Every channel a listing should be broadcast to.
    pub fn broadcast_channels(&self) -> HashSet<ChannelId> {
        let mut out: HashSet<ChannelId> = self
            .channels()
            .values()
            .filter_map(|c| c.broadcast_channel)
            .collect();
        out.extend(self.channel_defaults().broadcast_channel);
        out
    }

    /// The stored document, for the settings-download surface.
    pub fn raw(&self) -> Value {
        self.data.lock().clone()
    }
}

fn as_table<'a>(value: &'a Value, key: &str) -> Result<&'a Map<String, Value>, SettingsError> {
    value.as_object().ok_or_else(|| SettingsError::WrongType {
        key: key.to_string(),
        expected: "a table of settings",
    })
}

fn check_keys(map: &Map<String, Value>, allowed: &[&str]) -> Result<(), SettingsError> {
    let unknown: Vec<&str> = map
        .keys()
        .map(String::as_str)
        .filter(|k| !allowed.contains(k))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(SettingsError::UnknownKeys(unknown.join(", ")))
    }
}

fn validate_section(
    section: &Value,
    name: &str,
    fields: &[FieldSpec],
    refs: &RefIds,
) -> Result<(), SettingsError> {
    let map = as_table(section, name)?;
    let allowed: Vec<&str> = fields.iter().map(|f| f.name).collect();
    check_keys(map, &allowed)?;
    for spec in fields {
        match map.get(spec.name) {
            Some(value) => validate_field(spec, value, refs)?,
            None if spec.required => return Err(SettingsError::MissingRequired(spec.name)),
            None => {}
        }
    }
    Ok(())
}

fn validate_field(spec: &FieldSpec, value: &Value, refs: &RefIds) -> Result<(), SettingsError> {
    let wrong = |expected| SettingsError::WrongType {
        key: spec.name.to_string(),
        expected,
    };
    match spec.kind {
        Kind::Int => {
            value.as_i64().ok_or(wrong("an integer"))?;
        }
        Kind::Text => {
            value.as_str().ok_or(wrong("a string"))?;
        }
        Kind::Timezone => {
            let name = value.as_str().ok_or(wrong("a timezone name"))?;
            name.parse::<Tz>()
                .map_err(|_| SettingsError::InvalidTimezone(name.to_string()))?;
        }
        Kind::Channel => {
            let id = value.as_u64().map(ChannelId).ok_or(wrong("a channel id"))?;
            if !refs.channels.contains(&id) {
                return Err(SettingsError::UnknownChannel(value.to_string()));
            }
        }
        Kind::Role => {
            let id = value.as_u64().map(RoleId).ok_or(wrong("a role id"))?;
            if !refs.roles.contains(&id) {
                return Err(SettingsError::UnknownRole(value.to_string()));
            }
        }
    }
    Ok(())
}

fn get_id(section: Option<&Value>, key: &str) -> Option<u64> {
    section?.get(key)?.as_u64()
}

fn flatten_channel(defaults: Option<&Value>, overrides: Option<&Value>) -> ChannelSettings {
    let pick = |key: &str| {
        overrides
            .and_then(|o| o.get(key))
            .or_else(|| defaults.and_then(|d| d.get(key)))
    };
    ChannelSettings {
        capacity: pick("capacity")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_CAPACITY),
        prefix: pick("prefix")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PREFIX)
            .to_string(),
        ping_cooldown_minutes: pick("ping_cooldown")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_PING_COOLDOWN_MINUTES),
        broadcast_channel: pick("broadcast_channel").and_then(Value::as_u64).map(ChannelId),
        scrimmer_role: pick("scrimmer_role").and_then(Value::as_u64).map(RoleId),
    }
}
