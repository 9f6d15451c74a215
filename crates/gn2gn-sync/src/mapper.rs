//! Record mapper
//!
//! Converts a raw exported record into a [`MappedRow`] using a fixed table
//! of field rules. Pure: no I/O, no shared state, same input same output.
//!
//! Rules of the road:
//! - a source field without a rule is dropped
//! - JSON `null` counts as absent
//! - a required field that is absent fails the record
//! - timestamps are normalised to UTC; those without an offset are read at
//!   the mapper's configured offset

use crate::config::utc_offset;
use crate::error::MappingError;
use crate::types::{MappedRow, RawRecord};
use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Target type of a mapped field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldKind {
    Text,
    Integer,
    /// Rounded half away from zero to `scale` decimal places
    Decimal { scale: u32 },
    Boolean,
    /// RFC 3339, UTC
    Timestamp,
    /// `YYYY-MM-DD`
    Date,
    Uuid,
    /// Passed through untouched
    Json,
}

impl FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if let Some(scale) = s.strip_prefix("decimal(").and_then(|r| r.strip_suffix(')')) {
            let scale = scale
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|s| *s <= 15)
                .ok_or_else(|| format!("invalid decimal scale in '{s}'"))?;
            return Ok(FieldKind::Decimal { scale });
        }

        match s.as_str() {
            "text" | "string" => Ok(FieldKind::Text),
            "integer" | "int" => Ok(FieldKind::Integer),
            "decimal" | "float" => Ok(FieldKind::Decimal { scale: 6 }),
            "boolean" | "bool" => Ok(FieldKind::Boolean),
            "timestamp" | "datetime" => Ok(FieldKind::Timestamp),
            "date" => Ok(FieldKind::Date),
            "uuid" => Ok(FieldKind::Uuid),
            "json" => Ok(FieldKind::Json),
            other => Err(format!("unknown field kind '{other}'")),
        }
    }
}

impl TryFrom<String> for FieldKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldKind> for String {
    fn from(kind: FieldKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Text => f.write_str("text"),
            FieldKind::Integer => f.write_str("integer"),
            FieldKind::Decimal { scale } => write!(f, "decimal({scale})"),
            FieldKind::Boolean => f.write_str("boolean"),
            FieldKind::Timestamp => f.write_str("timestamp"),
            FieldKind::Date => f.write_str("date"),
            FieldKind::Uuid => f.write_str("uuid"),
            FieldKind::Json => f.write_str("json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub source: String,
    /// Destination name; defaults to `source`
    #[serde(default)]
    pub target: Option<String>,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldRule {
    pub fn new(source: &str, kind: FieldKind) -> Self {
        Self {
            source: source.to_string(),
            target: None,
            kind,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn renamed(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn target(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.source)
    }
}

/// Field-name and type-coercion table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTable {
    /// Source field holding the natural key
    pub natural_key: String,
    /// Source field holding the record UUID, if any
    #[serde(default)]
    pub uuid: Option<String>,
    /// Source field holding the last modification time, if any
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default, rename = "field")]
    pub fields: Vec<FieldRule>,
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::geonature_synthese()
    }
}

impl MappingTable {
    /// Columns of the standard GeoNature synthese export
    pub fn geonature_synthese() -> Self {
        use FieldKind as K;

        let fields = vec![
            FieldRule::new("id_synthese", K::Integer).required(),
            FieldRule::new("unique_id_sinp", K::Uuid),
            FieldRule::new("unique_id_sinp_grp", K::Uuid),
            FieldRule::new("id_source", K::Integer),
            FieldRule::new("entity_source_pk_value", K::Text),
            FieldRule::new("jdd_uuid", K::Uuid),
            FieldRule::new("jdd_nom", K::Text),
            FieldRule::new("cd_nom", K::Integer).required(),
            FieldRule::new("cd_ref", K::Integer),
            FieldRule::new("nom_cite", K::Text).required(),
            FieldRule::new("nom_valide", K::Text),
            FieldRule::new("nom_vernaculaire", K::Text),
            FieldRule::new("date_debut", K::Date).required(),
            FieldRule::new("date_fin", K::Date),
            FieldRule::new("heure_debut", K::Text),
            FieldRule::new("heure_fin", K::Text),
            FieldRule::new("nombre_min", K::Integer),
            FieldRule::new("nombre_max", K::Integer),
            FieldRule::new("altitude_min", K::Integer),
            FieldRule::new("altitude_max", K::Integer),
            FieldRule::new("observateurs", K::Text),
            FieldRule::new("determinateur", K::Text),
            FieldRule::new("x_centroid_4326", K::Decimal { scale: 7 }),
            FieldRule::new("y_centroid_4326", K::Decimal { scale: 7 }),
            FieldRule::new("precision_geographique", K::Integer),
            FieldRule::new("comment_occurrence", K::Text),
            FieldRule::new("comment_releve", K::Text),
            FieldRule::new("date_creation", K::Timestamp),
            FieldRule::new("date_modification", K::Timestamp),
            FieldRule::new("geometry", K::Json).renamed("geojson_4326"),
        ];

        Self {
            natural_key: "id_synthese".to_string(),
            uuid: Some("unique_id_sinp".to_string()),
            updated_at: Some("date_modification".to_string()),
            fields,
        }
    }

    /// Reject tables that would produce ambiguous rows
    pub fn validate(&self) -> gn2gn_common::Result<()> {
        use gn2gn_common::Gn2GnError;

        if self.natural_key.trim().is_empty() {
            return Err(Gn2GnError::config("mapping: natural_key must not be empty"));
        }
        let mut targets = std::collections::HashSet::new();
        for rule in &self.fields {
            if rule.source.is_empty() || rule.target().is_empty() {
                return Err(Gn2GnError::config("mapping: field names must not be empty"));
            }
            if !targets.insert(rule.target()) {
                return Err(Gn2GnError::config(format!(
                    "mapping: destination field '{}' is mapped twice",
                    rule.target()
                )));
            }
        }
        Ok(())
    }
}

/// Stateless record converter
#[derive(Debug, Clone)]
pub struct RecordMapper {
    table: MappingTable,
    naive_offset: FixedOffset,
}

impl RecordMapper {
    pub fn new(table: MappingTable) -> Self {
        Self {
            table,
            naive_offset: utc_offset(),
        }
    }

    /// Offset applied to timestamps and dates that carry none
    pub fn with_naive_offset(mut self, offset: FixedOffset) -> Self {
        self.naive_offset = offset;
        self
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    pub fn map(&self, source: &str, raw: &RawRecord) -> Result<MappedRow, MappingError> {
        let object = raw.as_object().ok_or(MappingError::NotAnObject)?;

        let natural_key = present(object, &self.table.natural_key)
            .ok_or_else(|| MappingError::MissingField(self.table.natural_key.clone()))
            .and_then(|v| natural_key_text(&self.table.natural_key, v))?;

        let uuid = match self.table.uuid.as_deref() {
            Some(field) => present(object, field)
                .map(|v| coerce_uuid(field, v))
                .transpose()?,
            None => None,
        };

        let updated_at = match self.table.updated_at.as_deref() {
            Some(field) => present(object, field)
                .map(|v| self.coerce_timestamp(field, v))
                .transpose()?,
            None => None,
        };

        let mut item = Map::with_capacity(self.table.fields.len());
        for rule in &self.table.fields {
            match present(object, &rule.source) {
                Some(value) => {
                    let value = self.coerce(rule, value)?;
                    reject_nul(&rule.source, &value)?;
                    item.insert(rule.target().to_string(), value);
                },
                None if rule.required => {
                    return Err(MappingError::MissingField(rule.source.clone()));
                },
                None => {},
            }
        }

        Ok(MappedRow {
            source: source.to_string(),
            natural_key,
            uuid,
            updated_at,
            item,
        })
    }

    /// Best-effort natural key of a record, for skip reports
    pub fn natural_key_hint(&self, raw: &RawRecord) -> Option<String> {
        raw.as_object()
            .and_then(|o| present(o, &self.table.natural_key))
            .and_then(|v| natural_key_text(&self.table.natural_key, v).ok())
    }

    fn coerce(&self, rule: &FieldRule, value: &Value) -> Result<Value, MappingError> {
        let field = rule.source.as_str();
        match rule.kind {
            FieldKind::Text => coerce_text(field, value).map(Value::String),
            FieldKind::Integer => coerce_integer(field, value).map(Value::from),
            FieldKind::Decimal { scale } => coerce_decimal(field, value, scale).map(Value::Number),
            FieldKind::Boolean => coerce_boolean(field, value).map(Value::Bool),
            FieldKind::Timestamp => self
                .coerce_timestamp(field, value)
                .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
            FieldKind::Date => self
                .coerce_date(field, value)
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
            FieldKind::Uuid => coerce_uuid(field, value).map(|u| Value::String(u.to_string())),
            FieldKind::Json => Ok(value.clone()),
        }
    }

    fn coerce_timestamp(&self, field: &str, value: &Value) -> Result<DateTime<Utc>, MappingError> {
        let text = value
            .as_str()
            .ok_or_else(|| MappingError::invalid(field, "expected a timestamp string"))?
            .trim();

        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return Ok(ts.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
            if let Ok(ts) = DateTime::parse_from_str(text, format) {
                return Ok(ts.with_timezone(&Utc));
            }
        }

        let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .ok_or_else(|| MappingError::invalid(field, format!("unparseable timestamp '{text}'")))?;

        self.naive_offset
            .from_local_datetime(&naive)
            .single()
            .map(|ts| ts.with_timezone(&Utc))
            .ok_or_else(|| MappingError::invalid(field, format!("ambiguous local time '{text}'")))
    }

    fn coerce_date(&self, field: &str, value: &Value) -> Result<NaiveDate, MappingError> {
        let text = value
            .as_str()
            .ok_or_else(|| MappingError::invalid(field, "expected a date string"))?
            .trim();

        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Ok(date);
        }
        // a full timestamp: take the calendar date at the configured offset
        self.coerce_timestamp(field, value)
            .map(|ts| ts.with_timezone(&self.naive_offset).date_naive())
    }
}

/// `Some(value)` when the field exists and is not null
fn present<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    object.get(field).filter(|v| !v.is_null())
}

fn natural_key_text(field: &str, value: &Value) -> Result<String, MappingError> {
    let key = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err(MappingError::invalid(field, "natural key must be a string or number")),
    };
    if key.is_empty() {
        return Err(MappingError::invalid(field, "natural key is empty"));
    }
    if key.contains('\0') {
        return Err(MappingError::invalid(field, "natural key contains a NUL character"));
    }
    Ok(key)
}

fn coerce_text(field: &str, value: &Value) -> Result<String, MappingError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(MappingError::invalid(field, "expected a scalar")),
    }
}

fn coerce_integer(field: &str, value: &Value) -> Result<i64, MappingError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| MappingError::invalid(field, format!("{n} is not an integer"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| MappingError::invalid(field, format!("'{s}' is not an integer"))),
        _ => Err(MappingError::invalid(field, "expected an integer")),
    }
}

fn coerce_decimal(field: &str, value: &Value, scale: u32) -> Result<Number, MappingError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err(MappingError::invalid(field, "expected a decimal number")),
    };

    if let Some(exact) = parse_decimal(&text) {
        let rounded = exact.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
        return rounded
            .to_f64()
            .and_then(Number::from_f64)
            .ok_or_else(|| MappingError::invalid(field, format!("{text} is out of range")));
    }

    // Past 96-bit precision an f64 has no fractional digits left to round
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && f.abs() >= 1e28)
        .and_then(Number::from_f64)
        .ok_or_else(|| MappingError::invalid(field, format!("'{text}' is not a decimal number")))
}

/// Exact decimal value of `text`, plain or in scientific notation
fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

/// Postgres text and jsonb cannot store U+0000
fn reject_nul(field: &str, value: &Value) -> Result<(), MappingError> {
    let nul = || MappingError::invalid(field, "contains a NUL character");
    match value {
        Value::String(s) if s.contains('\0') => Err(nul()),
        Value::Array(items) => items.iter().try_for_each(|v| reject_nul(field, v)),
        Value::Object(map) => {
            if map.keys().any(|k| k.contains('\0')) {
                return Err(nul());
            }
            map.values().try_for_each(|v| reject_nul(field, v))
        },
        _ => Ok(()),
    }
}

fn coerce_boolean(field: &str, value: &Value) -> Result<bool, MappingError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(MappingError::invalid(field, format!("{n} is not a boolean"))),
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "oui" => Ok(true),
            "false" | "f" | "0" | "no" | "non" => Ok(false),
            other => Err(MappingError::invalid(field, format!("'{other}' is not a boolean"))),
        },
        _ => Err(MappingError::invalid(field, "expected a boolean")),
    }
}

fn coerce_uuid(field: &str, value: &Value) -> Result<Uuid, MappingError> {
    value
        .as_str()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .ok_or_else(|| MappingError::invalid(field, format!("{value} is not a UUID")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::parse_offset;
    use serde_json::json;

    fn table() -> MappingTable {
        MappingTable {
            natural_key: "id".into(),
            uuid: Some("uuid".into()),
            updated_at: Some("modified".into()),
            fields: vec![
                FieldRule::new("id", FieldKind::Integer).required(),
                FieldRule::new("name", FieldKind::Text).required().renamed("nom"),
                FieldRule::new("count", FieldKind::Integer),
                FieldRule::new("lat", FieldKind::Decimal { scale: 1 }),
                FieldRule::new("valid", FieldKind::Boolean),
                FieldRule::new("seen", FieldKind::Timestamp),
                FieldRule::new("day", FieldKind::Date),
                FieldRule::new("extra", FieldKind::Json),
            ],
        }
    }

    fn mapper() -> RecordMapper {
        RecordMapper::new(table())
    }

    #[test]
    fn test_maps_and_renames() {
        let raw = json!({
            "id": 42,
            "name": "Parus major",
            "count": "3",
            "uuid": "6F9619FF-8B86-D011-B42D-00C04FC964FF",
            "modified": "2024-03-01T10:00:00+01:00",
            "unmapped": "dropped"
        });

        let row = mapper().map("lpo", &raw).unwrap();

        assert_eq!(row.source, "lpo");
        assert_eq!(row.natural_key, "42");
        assert_eq!(
            row.uuid.unwrap().to_string(),
            "6f9619ff-8b86-d011-b42d-00c04fc964ff"
        );
        assert_eq!(row.updated_at.unwrap().to_rfc3339(), "2024-03-01T09:00:00+00:00");
        assert_eq!(row.item["id"], json!(42));
        assert_eq!(row.item["nom"], json!("Parus major"));
        assert_eq!(row.item["count"], json!(3));
        assert!(!row.item.contains_key("name"));
        assert!(!row.item.contains_key("unmapped"));
    }

    #[test]
    fn test_missing_required_field() {
        let err = mapper().map("s", &json!({"id": 1})).unwrap_err();
        assert_eq!(err, MappingError::MissingField("name".into()));
    }

    #[test]
    fn test_null_counts_as_absent() {
        let err = mapper().map("s", &json!({"id": 1, "name": null})).unwrap_err();
        assert_eq!(err, MappingError::MissingField("name".into()));

        let row = mapper()
            .map("s", &json!({"id": 1, "name": "x", "count": null, "uuid": null}))
            .unwrap();
        assert!(!row.item.contains_key("count"));
        assert!(row.uuid.is_none());
    }

    #[test]
    fn test_missing_natural_key() {
        let err = mapper().map("s", &json!({"name": "x"})).unwrap_err();
        assert_eq!(err, MappingError::MissingField("id".into()));
        assert_eq!(mapper().natural_key_hint(&json!({"name": "x"})), None);
        assert_eq!(mapper().natural_key_hint(&json!({"id": 7})), Some("7".into()));
    }

    #[test]
    fn test_not_an_object() {
        assert_eq!(
            mapper().map("s", &json!([1, 2])).unwrap_err(),
            MappingError::NotAnObject
        );
    }

    #[test]
    fn test_invalid_values() {
        let bad_int = mapper().map("s", &json!({"id": 1, "name": "x", "count": "many"}));
        assert!(matches!(bad_int, Err(MappingError::InvalidValue { ref field, .. }) if field == "count"));

        let bad_bool = mapper().map("s", &json!({"id": 1, "name": "x", "valid": "maybe"}));
        assert!(bad_bool.is_err());

        let bad_uuid = mapper().map("s", &json!({"id": 1, "name": "x", "uuid": "nope"}));
        assert!(matches!(bad_uuid, Err(MappingError::InvalidValue { ref field, .. }) if field == "uuid"));

        let nested_text = mapper().map("s", &json!({"id": 1, "name": {"fr": "x"}}));
        assert!(nested_text.is_err());
    }

    #[test]
    fn test_decimal_rounds_half_away_from_zero() {
        let row = mapper().map("s", &json!({"id": 1, "name": "x", "lat": 1.25})).unwrap();
        assert_eq!(row.item["lat"], json!(1.3));

        let row = mapper().map("s", &json!({"id": 1, "name": "x", "lat": "-1.25"})).unwrap();
        assert_eq!(row.item["lat"], json!(-1.3));

        let row = mapper().map("s", &json!({"id": 1, "name": "x", "lat": 45.04})).unwrap();
        assert_eq!(row.item["lat"], json!(45.0));
    }

    #[test]
    fn test_decimal_rounding_is_exact() {
        let table = MappingTable {
            natural_key: "id".into(),
            uuid: None,
            updated_at: None,
            fields: vec![FieldRule::new("v", FieldKind::Decimal { scale: 2 })],
        };
        let mapper = RecordMapper::new(table);
        let cases = [
            (json!("1.005"), json!(1.01)),
            (json!("2.675"), json!(2.68)),
            (json!("-2.675"), json!(-2.68)),
            (json!(2.675), json!(2.68)),
            (json!("1.5e-2"), json!(0.02)),
            (json!(12), json!(12.0)),
        ];
        for (input, expected) in cases {
            let row = mapper.map("s", &json!({"id": 1, "v": input.clone()})).unwrap();
            assert_eq!(row.item["v"], expected, "input {input}");
        }

        let huge = mapper.map("s", &json!({"id": 1, "v": 1.0e30})).unwrap();
        assert_eq!(huge.item["v"], json!(1.0e30));

        assert!(mapper.map("s", &json!({"id": 1, "v": "NaN"})).is_err());
        assert!(mapper.map("s", &json!({"id": 1, "v": "twelve"})).is_err());
    }

    #[test]
    fn test_nul_characters_rejected() {
        let text = mapper().map("s", &json!({"id": 1, "name": "bad\u{0000}"}));
        assert!(matches!(text, Err(MappingError::InvalidValue { ref field, .. }) if field == "name"));

        let nested = mapper().map(
            "s",
            &json!({"id": 1, "name": "x", "extra": {"props": ["ok", "a\u{0000}b"]}}),
        );
        assert!(matches!(nested, Err(MappingError::InvalidValue { ref field, .. }) if field == "extra"));

        let key = mapper().map("s", &json!({"id": 1, "name": "x", "extra": {"k\u{0000}": 1}}));
        assert!(key.is_err());

        let natural_key = mapper().map("s", &json!({"id": "A\u{0000}", "name": "x"}));
        assert!(natural_key.is_err());
    }

    #[test]
    fn test_boolean_spellings() {
        for (input, expected) in [(json!("oui"), true), (json!("F"), false), (json!(1), true), (json!(false), false)] {
            let row = mapper().map("s", &json!({"id": 1, "name": "x", "valid": input})).unwrap();
            assert_eq!(row.item["valid"], json!(expected));
        }
    }

    #[test]
    fn test_timestamps_normalised_to_utc() {
        let mapper = mapper().with_naive_offset(parse_offset("+02:00").unwrap());

        let cases = [
            ("2024-06-01T12:00:00Z", "2024-06-01T12:00:00Z"),
            ("2024-06-01 12:00:00+02", "2024-06-01T10:00:00Z"),
            ("2024-06-01 12:00:00", "2024-06-01T10:00:00Z"),
            ("2024-06-01T12:00:00.250", "2024-06-01T10:00:00.250Z"),
            ("2024-06-01", "2024-05-31T22:00:00Z"),
        ];
        for (input, expected) in cases {
            let row = mapper.map("s", &json!({"id": 1, "name": "x", "seen": input})).unwrap();
            assert_eq!(row.item["seen"], json!(expected), "input {input}");
        }

        let bad = mapper.map("s", &json!({"id": 1, "name": "x", "seen": "yesterday"}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_date_from_timestamp() {
        let row = mapper()
            .map("s", &json!({"id": 1, "name": "x", "day": "2024-06-01 23:30:00"}))
            .unwrap();
        assert_eq!(row.item["day"], json!("2024-06-01"));

        let row = mapper().map("s", &json!({"id": 1, "name": "x", "day": "2024-06-02"})).unwrap();
        assert_eq!(row.item["day"], json!("2024-06-02"));
    }

    #[test]
    fn test_json_passthrough() {
        let extra = json!({"type": "Point", "coordinates": [4.8, 45.7]});
        let row = mapper()
            .map("s", &json!({"id": 1, "name": "x", "extra": extra.clone()}))
            .unwrap();
        assert_eq!(row.item["extra"], extra);
    }

    #[test]
    fn test_deterministic() {
        let raw = json!({"id": "A-1", "name": "x", "seen": "2024-01-01 00:00:00"});
        assert_eq!(mapper().map("s", &raw).unwrap(), mapper().map("s", &raw).unwrap());
    }

    #[test]
    fn test_field_kind_parsing() {
        assert_eq!("decimal(3)".parse::<FieldKind>().unwrap(), FieldKind::Decimal { scale: 3 });
        assert_eq!("Integer".parse::<FieldKind>().unwrap(), FieldKind::Integer);
        assert!("decimal(x)".parse::<FieldKind>().is_err());
        assert!("blob".parse::<FieldKind>().is_err());
        assert_eq!(FieldKind::Decimal { scale: 7 }.to_string(), "decimal(7)");
    }

    #[test]
    fn test_table_validation() {
        assert!(table().validate().is_ok());
        assert!(MappingTable::geonature_synthese().validate().is_ok());

        let mut twice = table();
        twice.fields.push(FieldRule::new("other", FieldKind::Text).renamed("nom"));
        assert!(twice.validate().is_err());

        let no_key = MappingTable { natural_key: " ".into(), ..table() };
        assert!(no_key.validate().is_err());
    }

    #[test]
    fn test_synthese_table() {
        let table = MappingTable::geonature_synthese();
        assert_eq!(table.natural_key, "id_synthese");
        assert!(table.fields.iter().any(|r| r.source == "cd_nom" && r.required));

        let raw = json!({
            "id_synthese": 1001,
            "unique_id_sinp": "b4f4a3c2-8d7e-4f5a-9b1c-2d3e4f5a6b7c",
            "cd_nom": 3764,
            "nom_cite": "Parus major",
            "date_debut": "2024-04-12",
            "date_modification": "2024-04-13 08:15:00",
            "geometry": {"type": "Point", "coordinates": [4.85, 45.75]}
        });
        let row = RecordMapper::new(table).map("lpo", &raw).unwrap();
        assert_eq!(row.natural_key, "1001");
        assert_eq!(row.item["geojson_4326"]["type"], "Point");
        assert!(row.updated_at.is_some());
    }
}
