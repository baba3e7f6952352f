// src/cycling/point.rs

//! Cycle points and intervals.

use std::fmt;

use chrono::{DateTime, Duration, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CycleflowError, Result};
use crate::types::CyclingMode;

/// A position on the workflow timeline.
///
/// The derived `Ord` gives a total order so points can key maps; semantic
/// comparisons between points of different modes should go through
/// [`CyclePoint::try_cmp`], which fails instead of silently ordering
/// integers before date-times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CyclePoint {
    Integer(i64),
    DateTime(DateTime<Utc>),
}

impl CyclePoint {
    pub fn mode(&self) -> CyclingMode {
        match self {
            CyclePoint::Integer(_) => CyclingMode::Integer,
            CyclePoint::DateTime(_) => CyclingMode::Datetime,
        }
    }

    /// Parse a point string in the given cycling mode.
    ///
    /// Integer mode accepts decimal integers. Date-time mode accepts the
    /// compact form `YYYYMMDDTHHMMZ` (minutes optional) or RFC 3339.
    pub fn parse(s: &str, mode: CyclingMode) -> Result<CyclePoint> {
        let s = s.trim();
        match mode {
            CyclingMode::Integer => s
                .parse::<i64>()
                .map(CyclePoint::Integer)
                .map_err(|_| CycleflowError::ConfigError(format!("invalid integer cycle point: {s}"))),
            CyclingMode::Datetime => parse_datetime(s).map(CyclePoint::DateTime),
        }
    }

    /// Compare two points, failing when their cycling modes differ.
    pub fn try_cmp(&self, other: &CyclePoint) -> Result<std::cmp::Ordering> {
        match (self, other) {
            (CyclePoint::Integer(a), CyclePoint::Integer(b)) => Ok(a.cmp(b)),
            (CyclePoint::DateTime(a), CyclePoint::DateTime(b)) => Ok(a.cmp(b)),
            _ => Err(CycleflowError::CyclingModeMismatch(format!(
                "cannot compare {self} ({:?}) with {other} ({:?})",
                self.mode(),
                other.mode()
            ))),
        }
    }

    /// Offset this point by a signed interval.
    ///
    /// Integer offsets round-trip exactly. Calendar offsets (months/years)
    /// clamp at month end and are therefore not guaranteed invertible:
    /// `2000-03-31 - P1M + P1M` is `2000-03-29/30`, not the original point.
    pub fn add(&self, interval: &Interval) -> Result<CyclePoint> {
        match (self, interval) {
            (CyclePoint::Integer(p), Interval::Integer(n)) => Ok(CyclePoint::Integer(p + n)),
            (CyclePoint::DateTime(t), Interval::Seconds(s)) => {
                Ok(CyclePoint::DateTime(*t + Duration::seconds(*s)))
            }
            (CyclePoint::DateTime(t), Interval::Months(m)) => {
                let shifted = if *m >= 0 {
                    t.checked_add_months(Months::new(*m as u32))
                } else {
                    t.checked_sub_months(Months::new(m.unsigned_abs()))
                };
                shifted.map(CyclePoint::DateTime).ok_or_else(|| {
                    CycleflowError::ConfigError(format!("date-time overflow offsetting {t} by {m} months"))
                })
            }
            _ => Err(CycleflowError::CyclingModeMismatch(format!(
                "cannot offset {self} ({:?}) by interval {interval}",
                self.mode()
            ))),
        }
    }

    pub fn sub(&self, interval: &Interval) -> Result<CyclePoint> {
        self.add(&interval.negate())
    }

    /// Exact difference `self - other` as an interval.
    ///
    /// Only defined for integer and seconds arithmetic; never produces a
    /// calendar interval.
    pub fn diff(&self, other: &CyclePoint) -> Result<Interval> {
        match (self, other) {
            (CyclePoint::Integer(a), CyclePoint::Integer(b)) => Ok(Interval::Integer(a - b)),
            (CyclePoint::DateTime(a), CyclePoint::DateTime(b)) => {
                Ok(Interval::Seconds((*a - *b).num_seconds()))
            }
            _ => Err(CycleflowError::CyclingModeMismatch(format!(
                "cannot subtract {other} from {self}: differing cycling modes"
            ))),
        }
    }
}

impl fmt::Display for CyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePoint::Integer(p) => write!(f, "{p}"),
            CyclePoint::DateTime(t) => write!(f, "{}", t.format("%Y%m%dT%H%MZ")),
        }
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    // Compact forms first: 20100101T0600Z, 20100101T0600, 20100101.
    for fmt in ["%Y%m%dT%H%M%SZ", "%Y%m%dT%H%MZ", "%Y%m%dT%H%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y%m%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| CycleflowError::ConfigError(format!("invalid date-time cycle point: {s}")))
}

/// A signed offset between cycle points.
///
/// `Integer` belongs to integer mode; `Seconds` and `Months` to date-time
/// mode. Calendar intervals are kept separate from exact ones because month
/// arithmetic clamps and does not commute with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Integer(i64),
    Seconds(i64),
    Months(i32),
}

impl Interval {
    pub fn negate(&self) -> Interval {
        match self {
            Interval::Integer(n) => Interval::Integer(-n),
            Interval::Seconds(s) => Interval::Seconds(-s),
            Interval::Months(m) => Interval::Months(-m),
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(
            self,
            Interval::Integer(0) | Interval::Seconds(0) | Interval::Months(0)
        )
    }

    /// Exact length in seconds; `None` for integer and calendar intervals.
    pub fn as_seconds(&self) -> Option<i64> {
        match self {
            Interval::Seconds(s) => Some(*s),
            Interval::Integer(_) | Interval::Months(_) => None,
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Interval::Integer(n) => *n < 0,
            Interval::Seconds(s) => *s < 0,
            Interval::Months(m) => *m < 0,
        }
    }

    /// Scale by an integer factor (used when stepping along sequences).
    pub fn times(&self, k: i64) -> Interval {
        match self {
            Interval::Integer(n) => Interval::Integer(n * k),
            Interval::Seconds(s) => Interval::Seconds(s * k),
            Interval::Months(m) => Interval::Months(m * k as i32),
        }
    }

    pub fn checked_add(&self, other: &Interval) -> Result<Interval> {
        match (self, other) {
            (Interval::Integer(a), Interval::Integer(b)) => Ok(Interval::Integer(a + b)),
            (Interval::Seconds(a), Interval::Seconds(b)) => Ok(Interval::Seconds(a + b)),
            (Interval::Months(a), Interval::Months(b)) => Ok(Interval::Months(a + b)),
            _ => Err(CycleflowError::CyclingModeMismatch(format!(
                "cannot add intervals {self} and {other} of differing kinds"
            ))),
        }
    }

    /// Parse an interval string in the given cycling mode.
    ///
    /// Integer mode: `P3`, `-P3` or a bare integer. Date-time mode: an
    /// ISO-8601 duration (`P1D`, `PT6H`, `PT30S`, `P1M`, `P1Y`, weeks
    /// allowed). Mixing calendar parts (years/months) with exact parts
    /// (weeks/days/time) is rejected: the two do not compose associatively.
    pub fn parse(s: &str, mode: CyclingMode) -> Result<Interval> {
        let raw = s.trim();
        let (negative, body) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.strip_prefix('+').unwrap_or(raw)),
        };

        let result = match mode {
            CyclingMode::Integer => parse_integer_interval(body),
            CyclingMode::Datetime => parse_duration_interval(body),
        }?;

        Ok(if negative { result.negate() } else { result })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Integer(n) => {
                if *n < 0 {
                    write!(f, "-P{}", -n)
                } else {
                    write!(f, "P{n}")
                }
            }
            Interval::Seconds(s) => {
                let (sign, s) = if *s < 0 { ("-", -s) } else { ("", *s) };
                if s % 86400 == 0 {
                    write!(f, "{sign}P{}D", s / 86400)
                } else if s % 3600 == 0 {
                    write!(f, "{sign}PT{}H", s / 3600)
                } else if s % 60 == 0 {
                    write!(f, "{sign}PT{}M", s / 60)
                } else {
                    write!(f, "{sign}PT{s}S")
                }
            }
            Interval::Months(m) => {
                let (sign, m) = if *m < 0 { ("-", -m) } else { ("", *m) };
                if m % 12 == 0 {
                    write!(f, "{sign}P{}Y", m / 12)
                } else {
                    write!(f, "{sign}P{m}M")
                }
            }
        }
    }
}

fn parse_integer_interval(s: &str) -> Result<Interval> {
    let digits = s.strip_prefix('P').unwrap_or(s);
    digits
        .parse::<i64>()
        .map(Interval::Integer)
        .map_err(|_| CycleflowError::ConfigError(format!("invalid integer interval: {s}")))
}

fn parse_duration_interval(s: &str) -> Result<Interval> {
    let bad = || CycleflowError::ConfigError(format!("invalid ISO 8601 duration: {s}"));

    let body = s.strip_prefix('P').ok_or_else(bad)?;
    let (date_part, time_part) = match body.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (body, None),
    };

    let mut months: i64 = 0;
    let mut seconds: i64 = 0;

    for (value, unit) in split_units(date_part).ok_or_else(bad)? {
        match unit {
            'Y' => months += value * 12,
            'M' => months += value,
            'W' => seconds += value * 7 * 86400,
            'D' => seconds += value * 86400,
            _ => return Err(bad()),
        }
    }
    if let Some(time_part) = time_part {
        for (value, unit) in split_units(time_part).ok_or_else(bad)? {
            match unit {
                'H' => seconds += value * 3600,
                'M' => seconds += value * 60,
                'S' => seconds += value,
                _ => return Err(bad()),
            }
        }
    }

    match (months, seconds) {
        (0, 0) => Err(bad()),
        (0, s) => Ok(Interval::Seconds(s)),
        (m, 0) => i32::try_from(m).map(Interval::Months).map_err(|_| bad()),
        _ => Err(CycleflowError::ConfigError(format!(
            "mixed calendar and exact duration unsupported: {s}"
        ))),
    }
}

/// Split `6H30M` into `[(6, 'H'), (30, 'M')]`; `None` on malformed input.
fn split_units(part: &str) -> Option<Vec<(i64, char)>> {
    let mut out = Vec::new();
    let mut digits = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if c.is_ascii_alphabetic() {
            if digits.is_empty() {
                return None;
            }
            out.push((digits.parse().ok()?, c));
            digits.clear();
        } else {
            return None;
        }
    }
    if !digits.is_empty() {
        return None;
    }
    Some(out)
}
