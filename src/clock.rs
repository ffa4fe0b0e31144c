//! Clock injection and user-facing time parsing.
//!
//! Timers always persist absolute instants and recompute their remaining
//! delay from the injected [`Clock`], so restarts resume countdowns instead
//! of restarting them.

use chrono::{DateTime, Duration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Source of "now". Production uses [`SystemClock`]; tests inject a
/// [`ManualClock`] to drive timer and rate-limit logic deterministically.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests and simulations.
#[derive(Clone)]
pub struct ManualClock {
    now: std::sync::Arc<parking_lot::Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Arc::new(parking_lot::Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Sleep until `target` according to `clock`. Returns immediately when the
/// target is already in the past.
pub async fn sleep_until(clock: &dyn Clock, target: DateTime<Utc>) {
    let now = clock.now_utc();
    if target > now
        && let Ok(delay) = (target - now).to_std()
    {
        tokio::time::sleep(delay).await;
    }
}

/// Errors from user-supplied time and duration strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid time `{0}`, format must be 14:00, 14.00 or 1400")]
    InvalidTime(String),
    #[error("invalid duration `{0}`, format must combine 1d, 5h and 30m freely")]
    InvalidDuration(String),
    #[error("duration must be positive")]
    NonPositiveDuration,
}

static CLOCK_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{1,2})[:.]?([0-9]{2})$").expect("static regex"));
static DURATION_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?[0-9]+) ?([dhm])").expect("static regex"));

/// Parse a wall-clock time like "14:00", "14.00" or "1400".
pub fn parse_clock_time(input: &str) -> Result<(u32, u32), ParseError> {
    let caps = CLOCK_TIME
        .captures(input.trim())
        .ok_or_else(|| ParseError::InvalidTime(input.to_string()))?;
    let hour: u32 = caps[1]
        .parse()
        .map_err(|_| ParseError::InvalidTime(input.to_string()))?;
    let minute: u32 = caps[2]
        .parse()
        .map_err(|_| ParseError::InvalidTime(input.to_string()))?;
    if hour > 23 || minute > 59 {
        return Err(ParseError::InvalidTime(input.to_string()));
    }
    Ok((hour, minute))
}

/// Resolve a wall-clock time to the next occurrence in `tz`: today if still
/// ahead, otherwise tomorrow.
pub fn next_occurrence(clock: &dyn Clock, tz: Tz, hour: u32, minute: u32) -> DateTime<Utc> {
    let now = clock.now_utc().with_timezone(&tz);
    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default();
    let mut date = now.date_naive();
    let mut candidate = resolve_local(tz, date.and_time(time));
    if candidate < now {
        date += Duration::days(1);
        candidate = resolve_local(tz, date.and_time(time));
    }
    candidate.with_timezone(&Utc)
}

fn resolve_local(tz: Tz, naive: chrono::NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // DST gap: the wall-clock time does not exist, fall forward.
        LocalResult::None => tz.from_utc_datetime(&naive),
    }
}

/// Parse a restriction duration like "1d 5h 30m"; the units may be combined
/// freely but the total must come out positive.
pub fn parse_duration(input: &str) -> Result<Duration, ParseError> {
    let mut total = Duration::zero();
    let mut matched = false;
    for caps in DURATION_PART.captures_iter(input) {
        let amount: i64 = caps[1]
            .parse()
            .map_err(|_| ParseError::InvalidDuration(input.to_string()))?;
        total += match &caps[2] {
            "d" => Duration::days(amount),
            "h" => Duration::hours(amount),
            _ => Duration::minutes(amount),
        };
        matched = true;
    }
    if !matched {
        return Err(ParseError::InvalidDuration(input.to_string()));
    }
    if total <= Duration::zero() {
        return Err(ParseError::NonPositiveDuration);
    }
    Ok(total)
}
