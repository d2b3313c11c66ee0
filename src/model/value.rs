/*!
The closed set of metadata values the warehouse can store, represented by
[Value]. Temporal values carry their zone through [ZonedDatetime] and
[TzInfo] so that a round-trip through the index store preserves both the
instant and the zone semantics.
*/

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Result, WarehouseError};

/// A timezone attached to a datetime value. Three variants are supported;
/// anything else is rejected by the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum TzInfo {
    /// A named IANA zone, e.g. `America/New_York`.
    Named(Tz),
    /// A named fixed offset: a display name plus an offset in seconds.
    FixedNamed {
        /// The user-defined zone name, e.g. `UTC-5`.
        name: String,
        /// Offset from UTC in seconds.
        seconds: i32,
    },
    /// An unnamed fixed offset in seconds.
    Fixed(i32),
}

impl TzInfo {
    /// The UTC zone.
    pub fn utc() -> Self {
        TzInfo::Named(Tz::UTC)
    }

    /// Construct a named zone from an IANA identifier.
    pub fn named(name: &str) -> Result<Self> {
        let tz = Tz::from_str(name)
            .map_err(|_| WarehouseError::metadata(format!("Unknown timezone '{name}'.")))?;
        Ok(TzInfo::Named(tz))
    }

    /// The UTC offset in seconds that applies to the given zone-local wall
    /// time. Ambiguous local times resolve to the earlier offset; local
    /// times skipped by a transition resolve against UTC instead.
    pub fn offset_at_local(&self, local: &NaiveDateTime) -> i32 {
        match self {
            TzInfo::Named(tz) => match tz.from_local_datetime(local) {
                chrono::LocalResult::Single(dt) => dt.offset().fix().local_minus_utc(),
                chrono::LocalResult::Ambiguous(dt, _) => dt.offset().fix().local_minus_utc(),
                chrono::LocalResult::None => {
                    tz.from_utc_datetime(local).offset().fix().local_minus_utc()
                }
            },
            TzInfo::FixedNamed { seconds, .. } => *seconds,
            TzInfo::Fixed(seconds) => *seconds,
        }
    }

    /// Convert a UTC wall time into this zone's wall time.
    pub fn local_from_utc(&self, utc: &NaiveDateTime) -> NaiveDateTime {
        match self {
            TzInfo::Named(tz) => tz.from_utc_datetime(utc).naive_local(),
            TzInfo::FixedNamed { seconds, .. } | TzInfo::Fixed(seconds) => {
                *utc + Duration::seconds(i64::from(*seconds))
            }
        }
    }
}

impl fmt::Display for TzInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TzInfo::Named(tz) => write!(f, "{}", tz.name()),
            TzInfo::FixedNamed { name, seconds } => write!(f, "{name}({seconds}s)"),
            TzInfo::Fixed(seconds) => write!(f, "UTC{seconds:+}s"),
        }
    }
}

/// A datetime that is either naive (no zone) or aware of one of the
/// supported [TzInfo] zones. The stored wall time is zone-local.
#[derive(Debug, Clone)]
pub struct ZonedDatetime {
    local: NaiveDateTime,
    tz: Option<TzInfo>,
}

impl ZonedDatetime {
    /// A naive datetime with no attached zone.
    pub fn naive(local: NaiveDateTime) -> Self {
        ZonedDatetime { local, tz: None }
    }

    /// An aware datetime whose wall time is local to `tz`.
    pub fn aware(local: NaiveDateTime, tz: TzInfo) -> Self {
        ZonedDatetime {
            local,
            tz: Some(tz),
        }
    }

    /// An aware datetime in UTC.
    pub fn utc(dt: DateTime<Utc>) -> Self {
        ZonedDatetime::aware(dt.naive_utc(), TzInfo::utc())
    }

    /// Localise an epoch-seconds instant into `tz`.
    pub fn from_timestamp(secs: i64, tz: TzInfo) -> Result<Self> {
        let utc = DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| WarehouseError::metadata(format!("Invalid epoch value {secs}.")))?
            .naive_utc();
        Ok(ZonedDatetime::aware(tz.local_from_utc(&utc), tz))
    }

    /// The zone-local wall time.
    pub fn local(&self) -> NaiveDateTime {
        self.local
    }

    /// The attached zone, when the value is aware.
    pub fn tz(&self) -> Option<&TzInfo> {
        self.tz.as_ref()
    }

    /// Whether the datetime carries no zone.
    pub fn is_naive(&self) -> bool {
        self.tz.is_none()
    }

    /// The UTC wall time. Naive values are interpreted as UTC.
    pub fn naive_utc(&self) -> NaiveDateTime {
        match &self.tz {
            Some(tz) => self.local - Duration::seconds(i64::from(tz.offset_at_local(&self.local))),
            None => self.local,
        }
    }

    /// Whole epoch seconds of the instant.
    pub fn timestamp(&self) -> i64 {
        self.naive_utc().and_utc().timestamp()
    }

    /// The same instant re-localised into another zone.
    pub fn astimezone(&self, tz: TzInfo) -> ZonedDatetime {
        let utc = self.naive_utc();
        ZonedDatetime::aware(tz.local_from_utc(&utc), tz)
    }
}

impl PartialEq for ZonedDatetime {
    fn eq(&self, other: &Self) -> bool {
        match (&self.tz, &other.tz) {
            (None, None) => self.local == other.local,
            (Some(_), Some(_)) => self.naive_utc() == other.naive_utc(),
            _ => false,
        }
    }
}

impl From<DateTime<Utc>> for ZonedDatetime {
    fn from(dt: DateTime<Utc>) -> Self {
        ZonedDatetime::utc(dt)
    }
}

impl fmt::Display for ZonedDatetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.isoformat())
    }
}

impl ZonedDatetime {
    /// Render as `YYYY-MM-DDTHH:MM:SS[.ffffff][±HH:MM]`. The fractional part
    /// appears only when non-zero; the offset only when the value is aware.
    pub fn isoformat(&self) -> String {
        let mut out = self.local.format("%Y-%m-%dT%H:%M:%S").to_string();
        let micros = self.local.and_utc().timestamp_subsec_micros();
        if micros != 0 {
            out.push_str(&format!(".{micros:06}"));
        }
        if let Some(tz) = &self.tz {
            let offset = tz.offset_at_local(&self.local);
            let sign = if offset < 0 { '-' } else { '+' };
            let abs = offset.unsigned_abs();
            out.push_str(&format!("{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60));
            if abs % 60 != 0 {
                out.push_str(&format!(":{:02}", abs % 60));
            }
        }
        out
    }

    /// Parse an isoformat string into a wall time and an optional UTC offset
    /// in seconds.
    pub fn parse_isoformat(text: &str) -> Result<(NaiveDateTime, Option<i32>)> {
        let bad = || WarehouseError::metadata(format!("Invalid isoformat string '{text}'."));
        let (local_part, offset) = match split_offset(text) {
            Some((local, tz_part)) => (local, Some(parse_offset(tz_part).ok_or_else(bad)?)),
            None => (text, None),
        };
        let local = NaiveDateTime::parse_from_str(local_part, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|_| bad())?;
        Ok((local, offset))
    }
}

/// Split an isoformat string into its local part and trailing offset part.
fn split_offset(text: &str) -> Option<(&str, &str)> {
    if let Some(local) = text.strip_suffix('Z') {
        return Some((local, "+00:00"));
    }
    // the date portion also contains '-', so only look past the time part
    let search_from = 11.min(text.len());
    text[search_from..]
        .find(['+', '-'])
        .map(|i| text.split_at(search_from + i))
}

fn parse_offset(text: &str) -> Option<i32> {
    let (sign, rest) = match text.split_at(1) {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    let mut parts = rest.split(':');
    let hours: i32 = parts.next()?.parse().ok()?;
    let minutes: i32 = parts.next().unwrap_or("0").parse().ok()?;
    let seconds: i32 = parts.next().unwrap_or("0").parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60 + seconds))
}

/// An inclusive datetime range used by the range-indexed query paths.
#[derive(Debug, Clone, PartialEq)]
pub struct DatetimeRange {
    start: ZonedDatetime,
    end: ZonedDatetime,
}

impl DatetimeRange {
    /// Create a range; the start instant must not exceed the end instant.
    pub fn new(start: impl Into<ZonedDatetime>, end: impl Into<ZonedDatetime>) -> Result<Self> {
        let (start, end) = (start.into(), end.into());
        if start.timestamp() > end.timestamp() {
            return Err(WarehouseError::argument(
                "Range start must not be later than range end.",
            ));
        }
        Ok(DatetimeRange { start, end })
    }

    /// Range start.
    pub fn start(&self) -> &ZonedDatetime {
        &self.start
    }

    /// Range end.
    pub fn end(&self) -> &ZonedDatetime {
        &self.end
    }
}

/// A metadata value. The set is closed: every value the warehouse stores or
/// returns is one of these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The absence of a value; only legal for optional fields.
    None,
    /// A unicode string.
    Str(String),
    /// A 64-bit signed integer.
    Int(i64),
    /// A boolean.
    Bool(bool),
    /// A 64-bit float.
    Float(f64),
    /// An arbitrary-precision decimal.
    Decimal(BigDecimal),
    /// A naive or zone-aware datetime.
    Datetime(ZonedDatetime),
    /// A calendar date.
    Date(NaiveDate),
    /// A signed duration.
    Timedelta(Duration),
    /// A bare timezone value.
    Tz(TzInfo),
}

impl Value {
    /// Whether this is [Value::None].
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// The string payload, when the value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The datetime payload, when the value is a datetime.
    pub fn as_datetime(&self) -> Option<&ZonedDatetime> {
        match self {
            Value::Datetime(dt) => Some(dt),
            _ => None,
        }
    }

    /// The boolean payload, when the value is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<ZonedDatetime> for Value {
    fn from(value: ZonedDatetime) -> Self {
        Value::Datetime(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Datetime(ZonedDatetime::utc(value))
    }
}

impl From<Duration> for Value {
    fn from(value: Duration) -> Self {
        Value::Timedelta(value)
    }
}

impl From<TzInfo> for Value {
    fn from(value: TzInfo) -> Self {
        Value::Tz(value)
    }
}
