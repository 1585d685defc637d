//! Field codecs: bidirectional converters between native field values and
//! JSON-safe representations.
//!
//! A payload stored in the cache is a flat JSON object. Fields whose native
//! type is not JSON-native carry a type code in their key, `name:code`, and
//! their value is the codec's JSON form. Decoding resolves exactly one level
//! of tagging; the result has no tagged keys left.
//!
//! Built-in codecs:
//!
//! | code       | native                | JSON form                          |
//! |------------|-----------------------|------------------------------------|
//! | `date`     | `Date` (optional)     | `[year, month, day]` or `null`     |
//! | `datetime` | UTC `OffsetDateTime`  | Unix seconds; decimal string when  |
//! |            |                       | sub-second precision is present    |
//! | `pk`       | `EntityRef`           | `{ns, type, pk}`                   |
//! | `pklist`   | `EntityRefList`       | `{ns, type, pks: [...]}`           |

use std::collections::HashMap;

use serde_json::Value;
use time::{Date, Duration, Month, OffsetDateTime, UtcOffset};

use crate::error::CacheError;
use crate::instances::{CachedInstance, EntityRef, EntityRefList};

/// Encoded cache payload: field name (possibly tagged) to JSON value.
pub type Payload = serde_json::Map<String, Value>;

const TAG_SEPARATOR: char = ':';

/// A field value after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A JSON-native value, stored as-is.
    Json(Value),
    Date(Option<Date>),
    DateTime(OffsetDateTime),
    Ref(EntityRef),
    RefList(EntityRefList),
}

impl FieldValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FieldValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(Value::as_i64)
    }

    pub fn as_date(&self) -> Option<Date> {
        match self {
            FieldValue::Date(d) => *d,
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<OffsetDateTime> {
        match self {
            FieldValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_entity_ref(&self) -> Option<&EntityRef> {
        match self {
            FieldValue::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_ref_list(&self) -> Option<&EntityRefList> {
        match self {
            FieldValue::RefList(l) => Some(l),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            FieldValue::Json(_) => "json",
            FieldValue::Date(_) => "date",
            FieldValue::DateTime(_) => "datetime",
            FieldValue::Ref(_) => "entity reference",
            FieldValue::RefList(_) => "entity reference list",
        }
    }
}

/// A bidirectional converter for one field type code.
///
/// Implementations must be pure: no shared mutable state, same input same
/// output. Applications may register their own codecs next to the built-ins.
pub trait FieldCodec: Send + Sync {
    fn code(&self) -> &'static str;
    fn to_json(&self, value: &FieldValue) -> Result<Value, CacheError>;
    fn from_json(&self, value: &Value) -> Result<FieldValue, CacheError>;
}

/// Registry of field codecs, looked up by type code.
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Box<dyn FieldCodec>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
        };
        registry.register(Box::new(DateCodec));
        registry.register(Box::new(DateTimeCodec));
        registry.register(Box::new(PkCodec));
        registry.register(Box::new(PkListCodec));
        registry
    }
}

impl CodecRegistry {
    pub fn register(&mut self, codec: Box<dyn FieldCodec>) {
        self.codecs.insert(codec.code(), codec);
    }

    fn codec(&self, code: &str) -> Result<&dyn FieldCodec, CacheError> {
        self.codecs
            .get(code)
            .map(Box::as_ref)
            .ok_or_else(|| CacheError::UnknownCodec {
                code: code.to_string(),
            })
    }

    /// Encode one field: `(name, value)` becomes `("name:code", json)`.
    pub fn encode_field(
        &self,
        code: &str,
        name: &str,
        value: &FieldValue,
    ) -> Result<(String, Value), CacheError> {
        if name.contains(TAG_SEPARATOR) {
            return Err(CacheError::InvalidFieldName {
                name: name.to_string(),
            });
        }
        let json = self.codec(code)?.to_json(value)?;
        Ok((format!("{name}{TAG_SEPARATOR}{code}"), json))
    }

    /// Decode one tagged field back to `(name, native value)`.
    pub fn decode_field(&self, tagged: &str, value: &Value) -> Result<(String, FieldValue), CacheError> {
        let Some((name, code)) = tagged.split_once(TAG_SEPARATOR) else {
            return Err(CacheError::decode(format!(
                "field key `{tagged}` carries no type code"
            )));
        };
        let native = self.codec(code)?.from_json(value)?;
        Ok((name.to_string(), native))
    }

    /// Decode a full payload: resolve every tagged key, pass the rest through.
    ///
    /// One level of tag resolution only; a decoded name colliding with
    /// another field is an error, never a silent overwrite.
    pub fn decode_payload(&self, payload: Payload) -> Result<CachedInstance, CacheError> {
        let mut fields = HashMap::with_capacity(payload.len());
        for (key, value) in payload {
            let (name, native) = if key.contains(TAG_SEPARATOR) {
                self.decode_field(&key, &value)?
            } else {
                (key, FieldValue::Json(value))
            };
            if fields.insert(name.clone(), native).is_some() {
                return Err(CacheError::DuplicateField { name });
            }
        }
        Ok(CachedInstance::from_fields(fields))
    }
}

// ---------------------------------------------------------------------------
// Built-in codecs
// ---------------------------------------------------------------------------

struct DateCodec;

impl FieldCodec for DateCodec {
    fn code(&self) -> &'static str {
        "date"
    }

    fn to_json(&self, value: &FieldValue) -> Result<Value, CacheError> {
        match value {
            FieldValue::Date(Some(day)) => Ok(Value::from(vec![
                Value::from(day.year()),
                Value::from(u8::from(day.month())),
                Value::from(day.day()),
            ])),
            FieldValue::Date(None) => Ok(Value::Null),
            other => Err(CacheError::Encode {
                code: "date",
                given: other.kind(),
            }),
        }
    }

    fn from_json(&self, value: &Value) -> Result<FieldValue, CacheError> {
        match value {
            Value::Null => Ok(FieldValue::Date(None)),
            Value::Array(triple) => {
                let [year, month, day] = triple.as_slice() else {
                    return Err(CacheError::decode("date must be a [year, month, day] triple"));
                };
                let year = year
                    .as_i64()
                    .ok_or_else(|| CacheError::decode("date year must be an integer"))?;
                let month = month
                    .as_u64()
                    .and_then(|m| u8::try_from(m).ok())
                    .and_then(|m| Month::try_from(m).ok())
                    .ok_or_else(|| CacheError::decode("date month out of range"))?;
                let day = day
                    .as_u64()
                    .and_then(|d| u8::try_from(d).ok())
                    .ok_or_else(|| CacheError::decode("date day out of range"))?;
                let date = Date::from_calendar_date(year as i32, month, day)
                    .map_err(|err| CacheError::decode(format!("invalid date triple: {err}")))?;
                Ok(FieldValue::Date(Some(date)))
            }
            _ => Err(CacheError::decode("date must be null or a triple")),
        }
    }
}

struct DateTimeCodec;

impl FieldCodec for DateTimeCodec {
    fn code(&self) -> &'static str {
        "datetime"
    }

    /// Timestamps on a whole second encode as a JSON integer; sub-second
    /// precision switches to a decimal string with six fractional digits.
    fn to_json(&self, value: &FieldValue) -> Result<Value, CacheError> {
        let FieldValue::DateTime(dt) = value else {
            return Err(CacheError::Encode {
                code: "datetime",
                given: value.kind(),
            });
        };
        let utc = dt.to_offset(UtcOffset::UTC);
        let seconds = utc.unix_timestamp();
        let micros = utc.microsecond();
        if micros == 0 {
            Ok(Value::from(seconds))
        } else {
            Ok(Value::String(format!("{seconds}.{micros:06}")))
        }
    }

    fn from_json(&self, value: &Value) -> Result<FieldValue, CacheError> {
        let dt = match value {
            Value::Number(n) => {
                if let Some(seconds) = n.as_i64() {
                    OffsetDateTime::from_unix_timestamp(seconds)
                        .map_err(|err| CacheError::decode(format!("timestamp out of range: {err}")))?
                } else if let Some(secs) = n.as_f64() {
                    OffsetDateTime::from_unix_timestamp_nanos((secs * 1e9).round() as i128)
                        .map_err(|err| CacheError::decode(format!("timestamp out of range: {err}")))?
                } else {
                    return Err(CacheError::decode("unrepresentable timestamp number"));
                }
            }
            Value::String(text) => parse_decimal_timestamp(text)?,
            _ => return Err(CacheError::decode("datetime must be a number or decimal string")),
        };
        Ok(FieldValue::DateTime(dt))
    }
}

fn parse_decimal_timestamp(text: &str) -> Result<OffsetDateTime, CacheError> {
    let (seconds, micros) = match text.split_once('.') {
        Some((whole, frac)) => {
            let seconds: i64 = whole
                .parse()
                .map_err(|_| CacheError::decode(format!("bad timestamp `{text}`")))?;
            let mut digits = frac.to_string();
            digits.truncate(6);
            while digits.len() < 6 {
                digits.push('0');
            }
            let micros: i64 = digits
                .parse()
                .map_err(|_| CacheError::decode(format!("bad timestamp `{text}`")))?;
            (seconds, micros)
        }
        None => (
            text.parse()
                .map_err(|_| CacheError::decode(format!("bad timestamp `{text}`")))?,
            0,
        ),
    };
    let base = OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|err| CacheError::decode(format!("timestamp out of range: {err}")))?;
    Ok(base + Duration::microseconds(micros))
}

struct PkCodec;

impl FieldCodec for PkCodec {
    fn code(&self) -> &'static str {
        "pk"
    }

    fn to_json(&self, value: &FieldValue) -> Result<Value, CacheError> {
        match value {
            FieldValue::Ref(entity_ref) => serde_json::to_value(entity_ref)
                .map_err(|err| CacheError::Payload(err.to_string())),
            other => Err(CacheError::Encode {
                code: "pk",
                given: other.kind(),
            }),
        }
    }

    fn from_json(&self, value: &Value) -> Result<FieldValue, CacheError> {
        let entity_ref: EntityRef = serde_json::from_value(value.clone())
            .map_err(|err| CacheError::decode(format!("bad pk mapping: {err}")))?;
        Ok(FieldValue::Ref(entity_ref))
    }
}

struct PkListCodec;

impl FieldCodec for PkListCodec {
    fn code(&self) -> &'static str {
        "pklist"
    }

    fn to_json(&self, value: &FieldValue) -> Result<Value, CacheError> {
        match value {
            FieldValue::RefList(list) => {
                serde_json::to_value(list).map_err(|err| CacheError::Payload(err.to_string()))
            }
            other => Err(CacheError::Encode {
                code: "pklist",
                given: other.kind(),
            }),
        }
    }

    fn from_json(&self, value: &Value) -> Result<FieldValue, CacheError> {
        let list: EntityRefList = serde_json::from_value(value.clone())
            .map_err(|err| CacheError::decode(format!("bad pklist mapping: {err}")))?;
        Ok(FieldValue::RefList(list))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::{date, datetime};

    use super::*;
    use crate::keys::Pk;

    fn registry() -> CodecRegistry {
        CodecRegistry::default()
    }

    fn roundtrip(code: &str, value: FieldValue) -> FieldValue {
        let registry = registry();
        let (tagged, json) = registry.encode_field(code, "field", &value).unwrap();
        assert_eq!(tagged, format!("field:{code}"));
        let (name, back) = registry.decode_field(&tagged, &json).unwrap();
        assert_eq!(name, "field");
        back
    }

    #[test]
    fn date_roundtrip() {
        let value = FieldValue::Date(Some(date!(2015 - 07 - 15)));
        assert_eq!(roundtrip("date", value.clone()), value);
    }

    #[test]
    fn absent_date_is_null() {
        let registry = registry();
        let (_, json) = registry
            .encode_field("date", "released", &FieldValue::Date(None))
            .unwrap();
        assert_eq!(json, Value::Null);
        assert_eq!(
            roundtrip("date", FieldValue::Date(None)),
            FieldValue::Date(None)
        );
    }

    #[test]
    fn whole_second_datetime_encodes_as_integer() {
        let registry = registry();
        let value = FieldValue::DateTime(datetime!(2015-07-15 12:00:00 UTC));
        let (_, json) = registry.encode_field("datetime", "created", &value).unwrap();
        assert!(json.is_i64(), "whole seconds must use the integer form, got {json:?}");
        assert_eq!(roundtrip("datetime", value.clone()), value);
    }

    #[test]
    fn subsecond_datetime_encodes_as_decimal_string() {
        let registry = registry();
        let value = FieldValue::DateTime(datetime!(2015-07-15 12:00:00.123456 UTC));
        let (_, json) = registry.encode_field("datetime", "created", &value).unwrap();
        insta::assert_snapshot!(json.to_string(), @r#""1436961600.123456""#);
        assert_eq!(roundtrip("datetime", value.clone()), value);
    }

    #[test]
    fn offset_datetime_normalizes_to_utc() {
        let aware = datetime!(2015-07-15 14:00:00 +02:00);
        let back = roundtrip("datetime", FieldValue::DateTime(aware));
        let decoded = back.as_datetime().unwrap();
        assert_eq!(decoded.offset(), UtcOffset::UTC);
        assert_eq!(decoded, aware);
    }

    #[test]
    fn float_timestamp_decodes() {
        let registry = registry();
        let (_, value) = registry
            .decode_field("created:datetime", &json!(1436961600.5))
            .unwrap();
        assert_eq!(
            value.as_datetime().unwrap(),
            datetime!(2015-07-15 12:00:00.5 UTC)
        );
    }

    #[test]
    fn ref_roundtrip() {
        let value = FieldValue::Ref(EntityRef::new("app", "User", 42));
        assert_eq!(roundtrip("pk", value.clone()), value);
    }

    #[test]
    fn empty_ref_list_roundtrip() {
        let value = FieldValue::RefList(EntityRefList::new("app", "User", []));
        assert_eq!(roundtrip("pklist", value.clone()), value);
    }

    #[test]
    fn ref_list_preserves_order() {
        let pks = [Pk::Int(3), Pk::Int(1), Pk::Int(2)];
        let value = FieldValue::RefList(EntityRefList::new("app", "User", pks.clone()));
        let back = roundtrip("pklist", value);
        assert_eq!(back.as_ref_list().unwrap().pks(), &pks);
    }

    #[test]
    fn unknown_codec_is_an_error() {
        let registry = registry();
        let err = registry
            .encode_field("uuid", "id", &FieldValue::Json(json!(1)))
            .unwrap_err();
        assert!(matches!(err, CacheError::UnknownCodec { code } if code == "uuid"));

        let err = registry.decode_field("id:uuid", &json!(1)).unwrap_err();
        assert!(matches!(err, CacheError::UnknownCodec { code } if code == "uuid"));
    }

    #[test]
    fn separator_in_field_name_is_an_error() {
        let registry = registry();
        let err = registry
            .encode_field("date", "a:b", &FieldValue::Date(None))
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidFieldName { name } if name == "a:b"));
    }

    #[test]
    fn decode_payload_resolves_all_tags() {
        let registry = registry();
        let mut payload = Payload::new();
        payload.insert("id".to_string(), json!(1));
        payload.insert("created:datetime".to_string(), json!(1436961600));
        payload.insert(
            "versions:pklist".to_string(),
            json!({"ns": "app", "type": "Version", "pks": [2, 1]}),
        );
        let instance = registry.decode_payload(payload).unwrap();
        assert!(instance.field_names().all(|name| !name.contains(':')));
        assert_eq!(instance.field("id").unwrap().as_i64(), Some(1));
        assert_eq!(
            instance.field("versions").unwrap().as_ref_list().unwrap().pks(),
            &[Pk::Int(2), Pk::Int(1)]
        );
    }

    #[test]
    fn decode_payload_rejects_duplicate_names() {
        let registry = registry();
        let mut payload = Payload::new();
        payload.insert("created".to_string(), json!("plain"));
        payload.insert("created:datetime".to_string(), json!(1436961600));
        let err = registry.decode_payload(payload).unwrap_err();
        assert!(matches!(err, CacheError::DuplicateField { name } if name == "created"));
    }

    #[test]
    fn wrong_native_type_fails_encode() {
        let registry = registry();
        let err = registry
            .encode_field("datetime", "created", &FieldValue::Date(None))
            .unwrap_err();
        assert!(matches!(err, CacheError::Encode { code: "datetime", .. }));
    }
}
