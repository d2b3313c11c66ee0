/*!
String encoding for [Value]s. Every value is carried as an
([Encoded::val_str], [Encoded::val_type]) pair; [encode] and [decode] are
exhaustive over the closed [Value] union and round-trip losslessly,
timezones included.
*/

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate};
use serde_json::json;

use crate::error::{Result, WarehouseError};
use crate::model::value::{TzInfo, Value, ZonedDatetime};

/// The timezone marker used for naive datetimes.
pub const NAIVE_TAG: &str = "Naive";

/// The encoded payload of [Value::None].
pub const NONE_ENCODING: &str = "<class 'NoneType'>";

/// Wire names for the supported value types. These names appear in stored
/// registry rows, so they are part of the data format and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// The absent value.
    None,
    /// Unicode string.
    Str,
    /// 64-bit signed integer.
    Int,
    /// Boolean.
    Bool,
    /// 64-bit float.
    Float,
    /// Arbitrary-precision decimal.
    Decimal,
    /// Naive or aware datetime.
    Datetime,
    /// Calendar date.
    Date,
    /// Signed duration.
    Timedelta,
    /// Named IANA zone.
    TzFile,
    /// Named fixed-offset zone.
    TzOffsetNamed,
    /// Unnamed fixed-offset zone.
    TzOffset,
}

impl TypeTag {
    /// The wire name of the tag.
    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::None => "NONE",
            TypeTag::Str => "STR",
            TypeTag::Int => "INT",
            TypeTag::Bool => "BOOL",
            TypeTag::Float => "FLOAT",
            TypeTag::Decimal => "DECIMAL",
            TypeTag::Datetime => "DATETIME",
            TypeTag::Date => "DATE",
            TypeTag::Timedelta => "TIMEDELTA",
            TypeTag::TzFile => "TZFILE_PYTZ",
            TypeTag::TzOffsetNamed => "TZOFFSET_DATEUTIL",
            TypeTag::TzOffset => "TZOFFSET_TZ",
        }
    }

    /// Resolve a wire name back into a tag.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "NONE" => Ok(TypeTag::None),
            "STR" => Ok(TypeTag::Str),
            "INT" => Ok(TypeTag::Int),
            "BOOL" => Ok(TypeTag::Bool),
            "FLOAT" => Ok(TypeTag::Float),
            "DECIMAL" => Ok(TypeTag::Decimal),
            "DATETIME" => Ok(TypeTag::Datetime),
            "DATE" => Ok(TypeTag::Date),
            "TIMEDELTA" => Ok(TypeTag::Timedelta),
            "TZFILE_PYTZ" => Ok(TypeTag::TzFile),
            "TZOFFSET_DATEUTIL" => Ok(TypeTag::TzOffsetNamed),
            "TZOFFSET_TZ" => Ok(TypeTag::TzOffset),
            other => Err(WarehouseError::metadata(format!(
                "Type name '{other}' is not supported."
            ))),
        }
    }

    /// The tag describing a given value.
    pub fn of(value: &Value) -> TypeTag {
        match value {
            Value::None => TypeTag::None,
            Value::Str(_) => TypeTag::Str,
            Value::Int(_) => TypeTag::Int,
            Value::Bool(_) => TypeTag::Bool,
            Value::Float(_) => TypeTag::Float,
            Value::Decimal(_) => TypeTag::Decimal,
            Value::Datetime(_) => TypeTag::Datetime,
            Value::Date(_) => TypeTag::Date,
            Value::Timedelta(_) => TypeTag::Timedelta,
            Value::Tz(TzInfo::Named(_)) => TypeTag::TzFile,
            Value::Tz(TzInfo::FixedNamed { .. }) => TypeTag::TzOffsetNamed,
            Value::Tz(TzInfo::Fixed(_)) => TypeTag::TzOffset,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An encoded value: the payload string and the tag needed to decode it.
/// Supports a JSON round trip through [Encoded::serialize] and
/// [Encoded::deserialize] for nesting inside other wire formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// The encoded payload.
    pub val_str: String,
    /// The tag identifying the payload's type.
    pub val_type: TypeTag,
}

impl Encoded {
    /// Create an encoded pair.
    pub fn new(val_str: impl Into<String>, val_type: TypeTag) -> Self {
        Encoded {
            val_str: val_str.into(),
            val_type,
        }
    }

    /// Serialise to a JSON `[payload, tag-name]` string.
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(&json!([
            self.val_str,
            self.val_type.name()
        ]))?)
    }

    /// Parse a JSON `[payload, tag-name]` string.
    pub fn deserialize(text: &str) -> Result<Self> {
        let (val_str, name): (String, String) = serde_json::from_str(text)?;
        Ok(Encoded::new(val_str, TypeTag::from_name(&name)?))
    }
}

/// Float rendering for the wire format: integral floats keep a trailing
/// `.0` so they stay distinguishable from integers.
pub(crate) fn format_float(value: f64) -> String {
    format!("{value:?}")
}

/// Encode a value into its string form and tag.
pub fn encode(value: &Value) -> Result<Encoded> {
    let encoded = match value {
        Value::None => Encoded::new(NONE_ENCODING, TypeTag::None),
        Value::Str(s) => Encoded::new(s.clone(), TypeTag::Str),
        Value::Int(i) => Encoded::new(i.to_string(), TypeTag::Int),
        Value::Bool(b) => Encoded::new(if *b { "1" } else { "0" }, TypeTag::Bool),
        Value::Float(f) => Encoded::new(format_float(*f), TypeTag::Float),
        Value::Decimal(d) => Encoded::new(d.to_string(), TypeTag::Decimal),
        Value::Date(d) => Encoded::new(d.format("%Y-%m-%d").to_string(), TypeTag::Date),
        Value::Timedelta(d) => {
            let micros = d.num_microseconds().ok_or_else(|| {
                WarehouseError::metadata("Duration is too large to encode.".to_string())
            })?;
            Encoded::new(format_float(micros as f64 / 1e6), TypeTag::Timedelta)
        }
        Value::Datetime(dt) => encode_datetime(dt)?,
        Value::Tz(tz) => encode_tz(tz)?,
    };
    Ok(encoded)
}

fn encode_tz(tz: &TzInfo) -> Result<Encoded> {
    let encoded = match tz {
        TzInfo::Named(zone) => Encoded::new(zone.name(), TypeTag::TzFile),
        TzInfo::FixedNamed { name, seconds } => Encoded::new(
            serde_json::to_string(&json!([name, seconds.to_string()]))?,
            TypeTag::TzOffsetNamed,
        ),
        TzInfo::Fixed(seconds) => Encoded::new(seconds.to_string(), TypeTag::TzOffset),
    };
    Ok(encoded)
}

fn encode_datetime(dt: &ZonedDatetime) -> Result<Encoded> {
    let tz_part = match dt.tz() {
        None => json!(NAIVE_TAG),
        Some(tz) => {
            let enc = encode_tz(tz)?;
            json!([enc.val_str, enc.val_type.name()])
        }
    };
    Ok(Encoded::new(
        serde_json::to_string(&json!([dt.isoformat(), tz_part]))?,
        TypeTag::Datetime,
    ))
}

/// Decode an encoded pair back into a value. Fails on any payload that the
/// tag's decoder does not recognise.
pub fn decode(encoded: &Encoded) -> Result<Value> {
    let text = encoded.val_str.as_str();
    let invalid = |what: &str| {
        WarehouseError::metadata(format!(
            "Invalid {what} payload '{text}' for tag {}.",
            encoded.val_type
        ))
    };
    let value = match encoded.val_type {
        TypeTag::None => {
            if text != NONE_ENCODING {
                return Err(invalid("none"));
            }
            Value::None
        }
        TypeTag::Str => Value::Str(text.to_string()),
        TypeTag::Int => Value::Int(text.parse().map_err(|_| invalid("integer"))?),
        TypeTag::Bool => {
            let i: i64 = text.parse().map_err(|_| invalid("boolean"))?;
            Value::Bool(i != 0)
        }
        TypeTag::Float => Value::Float(text.parse().map_err(|_| invalid("float"))?),
        TypeTag::Decimal => {
            Value::Decimal(BigDecimal::from_str(text).map_err(|_| invalid("decimal"))?)
        }
        TypeTag::Date => Value::Date(
            NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| invalid("date"))?,
        ),
        TypeTag::Timedelta => {
            let seconds: f64 = text.parse().map_err(|_| invalid("duration"))?;
            Value::Timedelta(Duration::microseconds((seconds * 1e6).round() as i64))
        }
        TypeTag::Datetime => decode_datetime(text)?,
        TypeTag::TzFile => Value::Tz(TzInfo::named(text)?),
        TypeTag::TzOffsetNamed => {
            let (name, seconds): (String, String) =
                serde_json::from_str(text).map_err(|_| invalid("named offset"))?;
            let seconds: i32 = seconds.parse().map_err(|_| invalid("named offset"))?;
            Value::Tz(TzInfo::FixedNamed { name, seconds })
        }
        TypeTag::TzOffset => {
            Value::Tz(TzInfo::Fixed(text.parse().map_err(|_| invalid("offset"))?))
        }
    };
    Ok(value)
}

fn decode_datetime(text: &str) -> Result<Value> {
    let (iso, tz_part): (String, serde_json::Value) = serde_json::from_str(text)
        .map_err(|_| WarehouseError::metadata(format!("Invalid datetime payload '{text}'.")))?;
    let (local, offset) = ZonedDatetime::parse_isoformat(&iso)?;

    if tz_part == json!(NAIVE_TAG) {
        return Ok(Value::Datetime(ZonedDatetime::naive(local)));
    }
    let (tz_str, tz_name): (String, String) = serde_json::from_value(tz_part).map_err(|_| {
        WarehouseError::metadata(format!("Invalid datetime timezone in '{text}'."))
    })?;
    let tz = match decode(&Encoded::new(tz_str, TypeTag::from_name(&tz_name)?))? {
        Value::Tz(tz) => tz,
        other => {
            return Err(WarehouseError::metadata(format!(
                "Decoded timezone has invalid type {}.",
                TypeTag::of(&other)
            )))
        }
    };
    // re-localise the parsed instant into the embedded zone
    let dt = match offset {
        Some(offset) => {
            ZonedDatetime::aware(local - Duration::seconds(i64::from(offset)), TzInfo::Fixed(0))
                .astimezone(tz)
        }
        None => ZonedDatetime::aware(local, tz),
    };
    Ok(Value::Datetime(dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use proptest::prelude::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn roundtrip(value: Value) -> Encoded {
        let encoded = encode(&value).unwrap();
        assert_eq!(decode(&encoded).unwrap(), value);
        encoded
    }

    #[test]
    fn test_int() {
        for (value, text) in [
            (0, "0"),
            (987, "987"),
            (2147483647, "2147483647"),
            (-55, "-55"),
            (-2147483647, "-2147483647"),
        ] {
            assert_eq!(roundtrip(Value::Int(value)), Encoded::new(text, TypeTag::Int));
        }
    }

    #[test]
    fn test_float() {
        for (value, text) in [
            (0.0, "0.0"),
            (5.0, "5.0"),
            (987.123, "987.123"),
            (-9.0, "-9.0"),
            (-55.9, "-55.9"),
        ] {
            assert_eq!(
                roundtrip(Value::Float(value)),
                Encoded::new(text, TypeTag::Float)
            );
        }
    }

    #[test]
    fn test_str() {
        for text in ["", "0.0", "123", "True", "None", "2020-01-01"] {
            assert_eq!(roundtrip(Value::from(text)), Encoded::new(text, TypeTag::Str));
        }
    }

    #[test]
    fn test_bool() {
        assert_eq!(roundtrip(Value::Bool(true)), Encoded::new("1", TypeTag::Bool));
        assert_eq!(roundtrip(Value::Bool(false)), Encoded::new("0", TypeTag::Bool));
    }

    #[test]
    fn test_none() {
        assert_eq!(
            roundtrip(Value::None),
            Encoded::new(NONE_ENCODING, TypeTag::None)
        );
        // any other payload under the NONE tag is rejected
        assert!(decode(&Encoded::new("None", TypeTag::None)).is_err());
        assert!(decode(&Encoded::new("", TypeTag::None)).is_err());
    }

    #[test]
    fn test_timedelta() {
        for (value, text) in [
            (Duration::days(4), "345600.0"),
            (Duration::hours(1), "3600.0"),
            (Duration::hours(-24), "-86400.0"),
            (Duration::minutes(6), "360.0"),
            (Duration::seconds(-3), "-3.0"),
            (Duration::milliseconds(23), "0.023"),
            (Duration::zero(), "0.0"),
        ] {
            assert_eq!(
                roundtrip(Value::Timedelta(value)),
                Encoded::new(text, TypeTag::Timedelta)
            );
        }
    }

    #[test]
    fn test_date() {
        let date = NaiveDate::from_ymd_opt(2020, 9, 6).unwrap();
        assert_eq!(
            roundtrip(Value::Date(date)),
            Encoded::new("2020-09-06", TypeTag::Date)
        );
    }

    #[test]
    fn test_decimal() {
        use std::str::FromStr;
        for text in ["0", "1.50", "-987.1230", "12345678901234567890.123456789"] {
            let value = Value::Decimal(BigDecimal::from_str(text).unwrap());
            assert_eq!(roundtrip(value), Encoded::new(text, TypeTag::Decimal));
        }
    }

    #[test]
    fn test_datetime() {
        let cases: Vec<(ZonedDatetime, &str)> = vec![
            (
                ZonedDatetime::naive(dt(1910, 12, 31, 23, 59, 59)),
                r#"["1910-12-31T23:59:59","Naive"]"#,
            ),
            (
                ZonedDatetime::aware(dt(1910, 12, 31, 23, 59, 59), TzInfo::Fixed(0)),
                r#"["1910-12-31T23:59:59+00:00",["0","TZOFFSET_TZ"]]"#,
            ),
            (
                ZonedDatetime::aware(dt(2020, 1, 1, 12, 0, 0), TzInfo::Fixed(14400)),
                r#"["2020-01-01T12:00:00+04:00",["14400","TZOFFSET_TZ"]]"#,
            ),
            (
                ZonedDatetime::aware(dt(2020, 1, 1, 12, 0, 0), TzInfo::Fixed(-14400)),
                r#"["2020-01-01T12:00:00-04:00",["-14400","TZOFFSET_TZ"]]"#,
            ),
            (
                ZonedDatetime::aware(
                    dt(2020, 1, 1, 12, 0, 0),
                    TzInfo::named("America/New_York").unwrap(),
                ),
                r#"["2020-01-01T12:00:00-05:00",["America/New_York","TZFILE_PYTZ"]]"#,
            ),
            (
                ZonedDatetime::aware(
                    dt(2020, 1, 1, 12, 0, 0),
                    TzInfo::FixedNamed {
                        name: "UTC-5".to_string(),
                        seconds: -18000,
                    },
                ),
                r#"["2020-01-01T12:00:00-05:00",["[\"UTC-5\",\"-18000\"]","TZOFFSET_DATEUTIL"]]"#,
            ),
        ];
        for (value, text) in cases {
            assert_eq!(
                roundtrip(Value::Datetime(value)),
                Encoded::new(text, TypeTag::Datetime)
            );
        }
    }

    #[test]
    fn test_tzinfo() {
        let cases: Vec<(TzInfo, Encoded)> = vec![
            (TzInfo::utc(), Encoded::new("UTC", TypeTag::TzFile)),
            (
                TzInfo::named("America/New_York").unwrap(),
                Encoded::new("America/New_York", TypeTag::TzFile),
            ),
            (
                TzInfo::named("America/Chicago").unwrap(),
                Encoded::new("America/Chicago", TypeTag::TzFile),
            ),
            (
                TzInfo::FixedNamed {
                    name: "A".to_string(),
                    seconds: -3600,
                },
                Encoded::new(r#"["A","-3600"]"#, TypeTag::TzOffsetNamed),
            ),
            (
                TzInfo::FixedNamed {
                    name: "UTC+03:00".to_string(),
                    seconds: 10800,
                },
                Encoded::new(r#"["UTC+03:00","10800"]"#, TypeTag::TzOffsetNamed),
            ),
            (TzInfo::Fixed(0), Encoded::new("0", TypeTag::TzOffset)),
            (TzInfo::Fixed(7200), Encoded::new("7200", TypeTag::TzOffset)),
            (TzInfo::Fixed(-7200), Encoded::new("-7200", TypeTag::TzOffset)),
        ];
        for (value, expected) in cases {
            assert_eq!(roundtrip(Value::Tz(value)), expected);
        }
    }

    #[test]
    fn test_datetime_decode_relocalises() {
        // the embedded zone wins over the serialized offset
        let encoded = Encoded::new(
            r#"["2020-01-01T17:00:00+00:00",["America/New_York","TZFILE_PYTZ"]]"#,
            TypeTag::Datetime,
        );
        match decode(&encoded).unwrap() {
            Value::Datetime(decoded) => {
                assert_eq!(decoded.local(), dt(2020, 1, 1, 12, 0, 0));
                assert_eq!(decoded.tz(), Some(&TzInfo::named("America/New_York").unwrap()));
            }
            other => panic!("expected datetime, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_payloads() {
        let invalid = [
            Encoded::new("not-a-number", TypeTag::Int),
            Encoded::new("not-a-number", TypeTag::Float),
            Encoded::new("not-a-number", TypeTag::Bool),
            Encoded::new("not-a-number", TypeTag::Timedelta),
            Encoded::new("not-a-date", TypeTag::Date),
            Encoded::new("not-json", TypeTag::Datetime),
            Encoded::new("Not/A_Zone", TypeTag::TzFile),
            Encoded::new("not-json", TypeTag::TzOffsetNamed),
            Encoded::new("1.5", TypeTag::TzOffset),
        ];
        for encoded in invalid {
            assert!(decode(&encoded).is_err(), "{encoded:?} should not decode");
        }
        assert!(TypeTag::from_name("TZFILE_DATEUTIL").is_err());
    }

    #[test]
    fn test_encoded_serializer() {
        let cases = vec![
            (
                Encoded::new("-7200", TypeTag::TzOffset),
                r#"["-7200","TZOFFSET_TZ"]"#,
            ),
            (Encoded::new("-7200", TypeTag::Int), r#"["-7200","INT"]"#),
            (Encoded::new("1", TypeTag::Bool), r#"["1","BOOL"]"#),
            (Encoded::new("0.0", TypeTag::Float), r#"["0.0","FLOAT"]"#),
        ];
        for (encoded, text) in cases {
            assert_eq!(encoded.serialize().unwrap(), text);
            assert_eq!(Encoded::deserialize(text).unwrap(), encoded);
        }
    }

    proptest! {
        #[test]
        fn prop_scalar_roundtrip(i in any::<i64>(), b in any::<bool>(), s in ".*") {
            roundtrip(Value::Int(i));
            roundtrip(Value::Bool(b));
            roundtrip(Value::Str(s));
        }

        #[test]
        fn prop_offset_roundtrip(seconds in -86_399i32..86_400) {
            roundtrip(Value::Tz(TzInfo::Fixed(seconds)));
            let aware = ZonedDatetime::aware(
                dt(2020, 6, 1, 8, 30, 0),
                TzInfo::Fixed(seconds - seconds % 60),
            );
            roundtrip(Value::Datetime(aware));
        }
    }
}
