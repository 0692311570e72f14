//! Trigger documents — the persisted unit of scheduling.
//!
//! One JSON document per trigger, keyed by `"{apikey}/{namespace}/{name}"`.
//! The wire shape keeps the flat optional schedule fields the store has always
//! used; [`TriggerDoc::schedule`] turns them into a [`Schedule`] exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{AlarmError, Result};
use crate::schedule::Schedule;

/// Worker that owns documents carrying no explicit assignment.
pub const DEFAULT_WORKER: &str = "worker0";

/// `maxTriggers` value meaning "fire forever".
pub const UNLIMITED: i64 = -1;

/// Build the opaque trigger identifier used as registry key and document id.
pub fn trigger_id(apikey: &str, namespace: &str, name: &str) -> String {
    format!("{apikey}/{namespace}/{name}")
}

/// Persisted trigger document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDoc {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Credential in `uuid:key` form, used for every platform call.
    #[serde(default)]
    pub apikey: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "empty_payload")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_triggers: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes: Option<u32>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub stop_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_fire: Option<DeleteAfterFire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// Host this synthetic self-test trigger is pinned to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TriggerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
}

fn empty_payload() -> Value {
    Value::Object(Default::default())
}

impl TriggerDoc {
    pub fn identifier(&self) -> String {
        trigger_id(&self.apikey, &self.namespace, &self.name)
    }

    /// Missing status means the document was never disabled.
    pub fn is_active(&self) -> bool {
        self.status.as_ref().is_none_or(|s| s.active)
    }

    pub fn worker_or_default(&self) -> &str {
        self.worker.as_deref().unwrap_or(DEFAULT_WORKER)
    }

    /// True when an operator disabled the trigger; the engine never overrides that.
    pub fn disabled_by_admin(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.reason.as_ref())
            .is_some_and(|r| r.kind == ReasonKind::Admin)
    }

    /// Finite fire budget, or `None` for unlimited (`-1`, `0` or absent).
    pub fn fire_limit(&self) -> Option<u64> {
        match self.max_triggers {
            Some(n) if n > 0 => Some(n as u64),
            _ => None,
        }
    }

    /// Resolve the mutually exclusive schedule fields into a [`Schedule`].
    pub fn schedule(&self) -> Result<Schedule> {
        let kinds = [
            self.date.is_some(),
            self.minutes.is_some(),
            self.cron.is_some(),
        ];
        match kinds.iter().filter(|set| **set).count() {
            0 => {
                return Err(AlarmError::Validation(
                    "trigger has no cron, minutes or date schedule".into(),
                ));
            }
            1 => {}
            _ => {
                return Err(AlarmError::Validation(
                    "only one of cron, minutes or date may be set".into(),
                ));
            }
        }

        if let Some(date) = self.date {
            return Ok(Schedule::Once {
                date,
                delete_after_fire: self.delete_after_fire.unwrap_or_default(),
            });
        }
        if let Some(minutes) = self.minutes {
            if minutes == 0 {
                return Err(AlarmError::Validation(
                    "the minutes parameter must be an integer greater than zero".into(),
                ));
            }
            return Ok(Schedule::Interval { minutes });
        }
        let expression = self.cron.clone().unwrap_or_default();
        Ok(Schedule::Cron {
            expression,
            timezone: self.timezone.clone(),
        })
    }
}

/// Soft-delete marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerStatus {
    pub active: bool,
    /// Epoch milliseconds of the last status change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_changed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<StatusReason>,
}

impl TriggerStatus {
    pub fn active_now() -> Self {
        Self {
            active: true,
            date_changed: Some(Utc::now().timestamp_millis()),
            reason: None,
        }
    }

    /// Status written by the engine when it retires a trigger.
    pub fn auto_disabled(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            active: false,
            date_changed: Some(Utc::now().timestamp_millis()),
            reason: Some(StatusReason {
                kind: ReasonKind::Auto,
                status_code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReason {
    pub kind: ReasonKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReasonKind {
    #[serde(rename = "AUTO")]
    Auto,
    #[serde(rename = "ADMIN")]
    Admin,
}

/// What happens to a one-shot trigger after it fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteAfterFire {
    /// Disable only.
    #[default]
    Keep,
    /// Delete the trigger and its document.
    Trigger,
    /// Delete the trigger, its document and every rule bound to it.
    Rules,
}

impl DeleteAfterFire {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteAfterFire::Keep => "false",
            DeleteAfterFire::Trigger => "true",
            DeleteAfterFire::Rules => "rules",
        }
    }

    /// Parse `false | true | rules`, case-insensitive and trimmed.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "false" => Some(DeleteAfterFire::Keep),
            "true" => Some(DeleteAfterFire::Trigger),
            "rules" => Some(DeleteAfterFire::Rules),
            _ => None,
        }
    }
}

impl Serialize for DeleteAfterFire {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeleteAfterFire {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;
        match Value::deserialize(deserializer)? {
            Value::Bool(true) => Ok(DeleteAfterFire::Trigger),
            Value::Bool(false) | Value::Null => Ok(DeleteAfterFire::Keep),
            Value::String(s) => DeleteAfterFire::parse(&s).ok_or_else(|| {
                D::Error::custom("deleteAfterFire parameter must be one of [false, true, rules].")
            }),
            other => Err(D::Error::custom(format!(
                "invalid deleteAfterFire value: {other}"
            ))),
        }
    }
}

/// Dates arrive as epoch milliseconds, RFC 3339 or bare `YYYY-MM-DD` strings;
/// they are written as RFC 3339.
pub mod timestamp {
    use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
    use serde_json::Value;

    pub fn parse(value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            Value::String(s) => parse_str(s),
            _ => None,
        }
    }

    pub fn parse_str(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(ms) = raw.parse::<i64>() {
            return Utc.timestamp_millis_opt(ms).single();
        }
        if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
            return Some(date.with_timezone(&Utc));
        }
        // Older documents stored the caller's date verbatim.
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc())
    }

    pub fn format(date: &DateTime<Utc>) -> String {
        date.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};
        use serde_json::Value;

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(date) => serializer.serialize_str(&super::format(date)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            use serde::de::Error;
            match Option::<Value>::deserialize(deserializer)? {
                None | Some(Value::Null) => Ok(None),
                Some(value) => super::parse(&value)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("'{value}' is not a valid Date"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_original_document() {
        let doc: TriggerDoc = serde_json::from_value(json!({
            "_id": "uuid:key/ns/every-minute",
            "_rev": "3-abc",
            "apikey": "uuid:key",
            "namespace": "ns",
            "name": "every-minute",
            "payload": {"hello": "world"},
            "maxTriggers": 2,
            "cron": "* * * * *",
            "stopDate": 1_900_000_000_000i64,
            "worker": "worker1",
            "status": {"active": true, "dateChanged": 1_700_000_000_000i64}
        }))
        .unwrap();

        assert_eq!(doc.identifier(), "uuid:key/ns/every-minute");
        assert_eq!(doc.fire_limit(), Some(2));
        assert!(doc.is_active());
        assert_eq!(doc.worker_or_default(), "worker1");
        assert_eq!(
            doc.stop_date,
            Utc.timestamp_millis_opt(1_900_000_000_000).single()
        );
        assert!(matches!(doc.schedule().unwrap(), Schedule::Cron { .. }));
    }

    #[test]
    fn test_dates_accept_rfc3339_and_write_rfc3339() {
        let doc: TriggerDoc = serde_json::from_value(json!({
            "apikey": "a:b", "namespace": "_", "name": "t",
            "date": "2030-01-02T03:04:05Z",
            "deleteAfterFire": "Rules"
        }))
        .unwrap();
        let Schedule::Once {
            date,
            delete_after_fire,
        } = doc.schedule().unwrap()
        else {
            panic!("expected one-shot schedule");
        };
        assert_eq!(date, Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(delete_after_fire, DeleteAfterFire::Rules);

        let written = serde_json::to_value(&doc).unwrap();
        assert_eq!(written["date"], "2030-01-02T03:04:05.000Z");
        assert_eq!(written["deleteAfterFire"], "rules");
        assert!(written.get("cron").is_none());
    }

    #[test]
    fn test_date_only_string_is_midnight_utc() {
        let doc: TriggerDoc =
            serde_json::from_value(json!({"date": "2030-06-01", "maxTriggers": 1})).unwrap();
        assert_eq!(doc.date, Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).single());
        assert!(timestamp::parse_str("2030-13-01").is_none());
    }

    #[test]
    fn test_delete_after_fire_bool() {
        let doc: TriggerDoc =
            serde_json::from_value(json!({"date": 1_900_000_000_000i64, "deleteAfterFire": true}))
                .unwrap();
        assert_eq!(doc.delete_after_fire, Some(DeleteAfterFire::Trigger));
        assert!(
            serde_json::from_value::<TriggerDoc>(json!({"deleteAfterFire": "sometimes"})).is_err()
        );
    }

    #[test]
    fn test_schedule_kinds_are_exclusive() {
        let doc = TriggerDoc {
            cron: Some("* * * * *".into()),
            minutes: Some(5),
            ..Default::default()
        };
        assert!(doc.schedule().is_err());
        assert!(TriggerDoc::default().schedule().is_err());

        let zero = TriggerDoc {
            minutes: Some(0),
            ..Default::default()
        };
        assert!(zero.schedule().is_err());
    }

    #[test]
    fn test_unlimited_and_missing_worker() {
        let doc = TriggerDoc {
            max_triggers: Some(UNLIMITED),
            ..Default::default()
        };
        assert_eq!(doc.fire_limit(), None);
        assert_eq!(doc.worker_or_default(), DEFAULT_WORKER);
    }

    #[test]
    fn test_admin_disabled() {
        let mut doc = TriggerDoc::default();
        assert!(!doc.disabled_by_admin());
        doc.status = Some(TriggerStatus {
            active: false,
            date_changed: None,
            reason: Some(StatusReason {
                kind: ReasonKind::Admin,
                status_code: None,
                message: "abuse".into(),
            }),
        });
        assert!(doc.disabled_by_admin());
        assert!(!doc.is_active());

        let auto = TriggerStatus::auto_disabled(Some(404), "gone");
        let json = serde_json::to_value(&auto).unwrap();
        assert_eq!(json["reason"]["kind"], "AUTO");
        assert_eq!(json["reason"]["statusCode"], 404);
    }
}
