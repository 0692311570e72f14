//! Request validation for the trigger CRUD surface.
//!
//! Everything here is synchronous and pure: a request plus an explicit `now`
//! goes in, a trigger document (or a patch for one) or a 400-class
//! [`AlarmError::Validation`] comes out.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AlarmError, Result};
use crate::schedule::{CronSpec, has_seconds_granularity};
use crate::trigger::{DeleteAfterFire, TriggerDoc, TriggerStatus, UNLIMITED, timestamp};

/// Interval triggers created without a start date begin this far in the future.
pub const DEFAULT_INTERVAL_DELAY_SECS: i64 = 30;

/// Body of a create or update request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerRequest {
    #[serde(alias = "payload", alias = "trigger_payload")]
    pub trigger_payload: Option<Value>,
    pub max_triggers: Option<Value>,
    pub fire_once: bool,
    pub is_interval: bool,
    pub date: Option<Value>,
    pub minutes: Option<Value>,
    pub cron: Option<String>,
    pub timezone: Option<String>,
    pub start_date: Option<Value>,
    pub stop_date: Option<Value>,
    pub delete_after_fire: Option<Value>,
    pub limit_cron_fields: bool,
    pub worker: Option<String>,
    pub additional_data: Option<Value>,
}

impl TriggerRequest {
    fn wants_once(&self) -> bool {
        self.fire_once || (self.date.is_some() && !self.is_interval && self.cron.is_none())
    }

    fn wants_interval(&self) -> bool {
        self.is_interval || (self.minutes.is_some() && self.cron.is_none())
    }
}

fn invalid(message: impl Into<String>) -> AlarmError {
    AlarmError::Validation(message.into())
}

/// Validate a create request into a fresh, active trigger document.
///
/// Identity (`apikey`, `namespace`, `name`) and `worker` are left for the
/// caller to fill in.
pub fn validate_create(
    req: &TriggerRequest,
    now: DateTime<Utc>,
    triggers_limit: i64,
) -> Result<TriggerDoc> {
    let max_triggers = parse_max_triggers(req.max_triggers.as_ref(), triggers_limit)?;
    let mut doc = TriggerDoc {
        payload: payload_object(req.trigger_payload.clone(), false),
        max_triggers: Some(max_triggers.unwrap_or(UNLIMITED)),
        status: Some(TriggerStatus::active_now()),
        additional_data: req.additional_data.clone().map(|v| payload_object(Some(v), true)),
        ..Default::default()
    };

    if req.wants_once() {
        let raw = req
            .date
            .as_ref()
            .ok_or_else(|| invalid("alarms once trigger feed is missing the date parameter"))?;
        doc.date = Some(validate_date(raw, "date", None, now)?);
        if let Some(raw) = non_empty(req.delete_after_fire.as_ref()) {
            doc.delete_after_fire = Some(parse_delete_after_fire(raw)?);
        }
        return Ok(doc);
    }

    let mut cron = None;
    if req.wants_interval() {
        let raw = req
            .minutes
            .as_ref()
            .ok_or_else(|| invalid("interval trigger feed is missing the minutes parameter"))?;
        doc.minutes = Some(parse_minutes(raw)?);
    } else {
        let pattern = req
            .cron
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| invalid("alarms trigger feed is missing the cron parameter"))?;
        let spec = CronSpec::parse(pattern, req.timezone.as_deref())?;
        if req.limit_cron_fields && has_seconds_granularity(pattern) {
            return Err(invalid(
                "cron pattern is limited to 5 fields with 1 minute as the finest granularity",
            ));
        }
        doc.cron = Some(pattern.to_string());
        doc.timezone = req.timezone.clone().filter(|tz| !tz.trim().is_empty());
        cron = Some(spec);
    }

    if let Some(raw) = non_empty(req.start_date.as_ref()) {
        doc.start_date = Some(validate_date(raw, "startDate", None, now)?);
    } else if doc.minutes.is_some() {
        doc.start_date = Some(now + Duration::seconds(DEFAULT_INTERVAL_DELAY_SECS));
    }

    if let Some(raw) = non_empty(req.stop_date.as_ref()) {
        if max_triggers.is_some() {
            return Err(invalid(if doc.minutes.is_some() {
                "maxTriggers is not supported for the interval trigger feed"
            } else {
                "maxTriggers is not allowed when the stopDate parameter is specified"
            }));
        }
        let stop = validate_date(raw, "stopDate", doc.start_date, now)?;
        if let Some(spec) = &cron {
            let first = spec.next_after(doc.start_date.map_or(now, |s| s.max(now)));
            if first.is_none_or(|f| f > stop) {
                return Err(invalid(
                    "the first scheduled trigger fire is not until after the stop date",
                ));
            }
        }
        doc.stop_date = Some(stop);
    }

    Ok(doc)
}

/// Fields an update request changes. Empty patches are rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerPatch {
    pub payload: Option<Value>,
    pub date: Option<DateTime<Utc>>,
    pub delete_after_fire: Option<DeleteAfterFire>,
    pub minutes: Option<u32>,
    pub cron: Option<String>,
    pub timezone: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub stop_date: Option<DateTime<Utc>>,
}

impl TriggerPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay the patch onto an existing document.
    pub fn apply(&self, doc: &mut TriggerDoc) {
        if let Some(payload) = &self.payload {
            doc.payload = payload.clone();
        }
        if self.date.is_some() {
            doc.date = self.date;
        }
        if self.delete_after_fire.is_some() {
            doc.delete_after_fire = self.delete_after_fire;
        }
        if self.minutes.is_some() {
            doc.minutes = self.minutes;
        }
        if let Some(cron) = &self.cron {
            doc.cron = Some(cron.clone());
        }
        if let Some(tz) = &self.timezone {
            doc.timezone = Some(tz.clone());
        }
        if self.start_date.is_some() {
            doc.start_date = self.start_date;
        }
        if self.stop_date.is_some() {
            doc.stop_date = self.stop_date;
        }
    }
}

/// Validate an update request against the stored document.
pub fn validate_update(
    existing: &TriggerDoc,
    req: &TriggerRequest,
    now: DateTime<Utc>,
) -> Result<TriggerPatch> {
    if existing.disabled_by_admin() {
        return Err(invalid(format!(
            "{}/{} cannot be updated because it was disabled by an admin.  Please contact support for further assistance",
            existing.namespace, existing.name
        )));
    }

    let mut patch = TriggerPatch {
        payload: req
            .trigger_payload
            .clone()
            .map(|p| payload_object(Some(p), true)),
        ..Default::default()
    };

    if existing.date.is_some() {
        if let Some(raw) = non_empty(req.date.as_ref()) {
            patch.date = Some(validate_date(raw, "date", None, now)?);
        }
        if let Some(raw) = non_empty(req.delete_after_fire.as_ref()) {
            patch.delete_after_fire = Some(parse_delete_after_fire(raw)?);
        }
    } else {
        if existing.minutes.is_some() {
            if let Some(raw) = non_empty(req.minutes.as_ref()) {
                patch.minutes = Some(parse_minutes(raw)?);
            }
        } else if req.cron.is_some() || req.timezone.is_some() {
            let pattern = req.cron.as_deref().or(existing.cron.as_deref()).unwrap_or_default();
            let timezone = req.timezone.as_deref().or(existing.timezone.as_deref());
            CronSpec::parse(pattern, timezone)?;
            if req.cron.is_some() && req.limit_cron_fields && has_seconds_granularity(pattern) {
                return Err(invalid(
                    "cron pattern is limited to 5 fields with 1 minute as the finest granularity",
                ));
            }
            patch.cron = req.cron.clone();
            patch.timezone = req.timezone.clone();
        }

        if let Some(raw) = non_empty(req.start_date.as_ref()) {
            patch.start_date = Some(validate_date(raw, "startDate", None, now)?);
        }

        if let Some(raw) = non_empty(req.stop_date.as_ref()) {
            let start = patch.start_date.or(existing.start_date);
            patch.stop_date = Some(validate_date(raw, "stopDate", start, now)?);
        } else if let (Some(start), Some(stop)) = (patch.start_date, existing.stop_date) {
            if start >= stop {
                return Err(invalid(format!(
                    "startDate parameter '{}' must be less than the stopDate parameter '{}'",
                    display_raw(req.start_date.as_ref()),
                    timestamp::format(&stop)
                )));
            }
        }
    }

    if patch.is_empty() {
        return Err(invalid("no updatable parameters were specified"));
    }
    Ok(patch)
}

/// Parse a date parameter and require it to be in the future (and after `start`).
pub fn validate_date(
    raw: &Value,
    param: &str,
    start: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let shown = display_value(raw);
    let date = timestamp::parse(raw)
        .ok_or_else(|| invalid(format!("{param} parameter '{shown}' is not a valid Date")))?;
    if now >= date {
        return Err(invalid(format!("{param} parameter '{shown}' must be in the future")));
    }
    if let Some(start) = start {
        if date <= start {
            return Err(invalid(format!(
                "{param} parameter '{shown}' must be greater than the startDate parameter '{}'",
                timestamp::format(&start)
            )));
        }
    }
    Ok(date)
}

fn parse_minutes(raw: &Value) -> Result<u32> {
    let minutes = match raw {
        Value::Number(n) => n.as_i64().filter(|_| n.is_i64() || n.is_u64()),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid("the minutes parameter must be an integer"))?;
    if minutes <= 0 {
        return Err(invalid(
            "the minutes parameter must be an integer greater than zero",
        ));
    }
    u32::try_from(minutes).map_err(|_| invalid("the minutes parameter must be an integer"))
}

fn parse_max_triggers(raw: Option<&Value>, limit: i64) -> Result<Option<i64>> {
    let Some(raw) = non_empty(raw) else {
        return Ok(None);
    };
    let value = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid("the maxTriggers parameter must be an integer"))?;
    match value {
        0 => Ok(None),
        UNLIMITED => Ok(Some(UNLIMITED)),
        n if n < 0 => Err(invalid(
            "the maxTriggers parameter must be a positive integer or -1",
        )),
        n if n > limit => Err(invalid(format!(
            "the maxTriggers parameter must not exceed {limit}"
        ))),
        n => Ok(Some(n)),
    }
}

fn parse_delete_after_fire(raw: &Value) -> Result<DeleteAfterFire> {
    let text = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    DeleteAfterFire::parse(&text)
        .ok_or_else(|| invalid("deleteAfterFire parameter must be one of [false, true, rules]."))
}

/// Non-object payloads are wrapped as `{"payload": ...}`. With `parse_strings`
/// a string holding a JSON object is unpacked first.
fn payload_object(raw: Option<Value>, parse_strings: bool) -> Value {
    match raw {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(map)) => Value::Object(map),
        Some(Value::String(s)) => {
            if parse_strings {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&s) {
                    return Value::Object(map);
                }
            }
            let mut map = Map::new();
            map.insert("payload".into(), Value::String(s));
            Value::Object(map)
        }
        Some(other) => {
            let mut map = Map::new();
            map.insert("payload".into(), other);
            Value::Object(map)
        }
    }
}

/// Absent, null, `false` and empty strings all mean "not given".
fn non_empty(raw: Option<&Value>) -> Option<&Value> {
    raw.filter(|v| match v {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

fn display_value(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn display_raw(raw: Option<&Value>) -> String {
    raw.map(display_value).unwrap_or_default()
}
