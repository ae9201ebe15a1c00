//! Microsecond timestamps
//!
//! Every timestamp in the engine is a `MicroSec`: microseconds since the Unix
//! epoch, UTC. Window arithmetic is done on seconds because bar windows and
//! clock intervals are configured in seconds.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::domain::errors::EngineError;

pub type MicroSec = i64;

pub const MICRO_PER_SEC: i64 = 1_000_000;

pub fn now() -> MicroSec {
    Utc::now().timestamp_micros()
}

pub const fn sec(s: i64) -> MicroSec {
    s * MICRO_PER_SEC
}

pub const fn minutes(m: i64) -> MicroSec {
    sec(m * 60)
}

pub const fn days(d: i64) -> MicroSec {
    sec(d * 86_400)
}

pub const fn ms_to_micro(ms: i64) -> MicroSec {
    ms * 1_000
}

pub const fn micro_to_ms(t: MicroSec) -> i64 {
    t / 1_000
}

/// Floor `t` to a multiple of `window_sec`. A zero window returns `t`.
pub fn floor_sec(t: MicroSec, window_sec: i64) -> MicroSec {
    if window_sec <= 0 {
        return t;
    }
    let window = sec(window_sec);
    t.div_euclid(window) * window
}

pub fn floor_day(t: MicroSec) -> MicroSec {
    floor_sec(t, 86_400)
}

/// First bar start so that `num_bars` bars of `window_sec` end at `end`.
pub fn calc_ohlcv_start(end: MicroSec, window_sec: i64, num_bars: i64) -> Result<MicroSec, EngineError> {
    if num_bars < 1 {
        return Err(EngineError::InvalidArgument(format!(
            "num_bars must be at least 1 (got {})",
            num_bars
        )));
    }
    if window_sec <= 0 {
        return Err(EngineError::InvalidArgument(format!(
            "window must be positive (got {}s)",
            window_sec
        )));
    }

    Ok(floor_sec(end - 1 - sec(window_sec) * (num_bars - 1), window_sec))
}

pub fn to_datetime(t: MicroSec) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(t)
}

/// RFC 3339 rendering used in log lines.
pub fn time_string(t: MicroSec) -> String {
    match to_datetime(t) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Micros, true),
        None => format!("<invalid {}>", t),
    }
}

pub fn date_string(t: MicroSec) -> String {
    match to_datetime(t) {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => format!("<invalid {}>", t),
    }
}
