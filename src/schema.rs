//! Entity schemas.
//!
//! Every queryable field of every entity is declared here once, together
//! with where it lives in a fetched record and what kind of value it holds.
//! The field validator, the filters and the record evaluator all read this
//! table; nothing probes records for fields that are not declared.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The record kinds a query can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Flows,
    Alarms,
    Rules,
    Devices,
    TargetLists,
}

/// Value kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    Ip,
    /// Epoch seconds, epoch milliseconds or an ISO-8601 string
    Timestamp,
    /// Alarm level, ordered low < medium < high < critical
    Severity,
}

/// Rank of a severity level, case-insensitive. `None` for unknown levels.
pub fn severity_rank(level: &str) -> Option<u8> {
    match level.trim().to_ascii_lowercase().as_str() {
        "low" => Some(1),
        "medium" => Some(2),
        "high" => Some(3),
        "critical" => Some(4),
        _ => None,
    }
}

/// A queryable field and its location in a record (JSON pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub path: &'static str,
    pub kind: FieldKind,
}

const fn spec(name: &'static str, path: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, path, kind }
}

use FieldKind::{Boolean, Ip, Number, Severity, Text, Timestamp};

static FLOW_FIELDS: &[FieldSpec] = &[
    spec("timestamp", "/ts", Timestamp),
    spec("ts", "/ts", Timestamp),
    spec("source_ip", "/source/ip", Ip),
    spec("destination_ip", "/destination/ip", Ip),
    spec("device_ip", "/device/ip", Ip),
    spec("device_name", "/device/name", Text),
    spec("device_id", "/device/id", Text),
    spec("source_port", "/source/port", Number),
    spec("destination_port", "/destination/port", Number),
    spec("protocol", "/protocol", Text),
    spec("direction", "/direction", Text),
    spec("blocked", "/block", Boolean),
    spec("bytes", "/total", Number),
    spec("download", "/download", Number),
    spec("upload", "/upload", Number),
    spec("duration", "/duration", Number),
    spec("count", "/count", Number),
    spec("domain", "/domain", Text),
    spec("category", "/category", Text),
    spec("region", "/region", Text),
    spec("network_name", "/network/name", Text),
    spec("gid", "/gid", Text),
];

static ALARM_FIELDS: &[FieldSpec] = &[
    spec("timestamp", "/ts", Timestamp),
    spec("ts", "/ts", Timestamp),
    spec("aid", "/aid", Number),
    spec("type", "/type", Number),
    spec("severity", "/severity", Severity),
    spec("status", "/status", Text),
    spec("resolved", "/resolved", Boolean),
    spec("archived", "/archived", Boolean),
    spec("message", "/message", Text),
    spec("description", "/description", Text),
    spec("direction", "/direction", Text),
    spec("protocol", "/protocol", Text),
    spec("source_ip", "/device/ip", Ip),
    spec("destination_ip", "/remote/ip", Ip),
    spec("device_ip", "/device/ip", Ip),
    spec("remote_ip", "/remote/ip", Ip),
    spec("local_ip", "/device/ip", Ip),
    spec("device_name", "/device/name", Text),
    spec("remote_domain", "/remote/domain", Text),
    spec("remote_country", "/remote/country", Text),
    spec("gid", "/gid", Text),
];

static RULE_FIELDS: &[FieldSpec] = &[
    spec("id", "/id", Text),
    spec("action", "/action", Text),
    spec("target_type", "/target/type", Text),
    spec("target_value", "/target/value", Text),
    spec("direction", "/direction", Text),
    spec("protocol", "/protocol", Text),
    spec("status", "/status", Text),
    spec("disabled", "/disabled", Boolean),
    spec("hit_count", "/hit/count", Number),
    spec("scope", "/scope/type", Text),
    spec("notes", "/notes", Text),
    spec("created_at", "/ts", Timestamp),
    spec("updated_at", "/updateTs", Timestamp),
    spec("gid", "/gid", Text),
];

static DEVICE_FIELDS: &[FieldSpec] = &[
    spec("id", "/id", Text),
    spec("name", "/name", Text),
    spec("ip", "/ip", Ip),
    spec("mac", "/mac", Text),
    spec("mac_vendor", "/macVendor", Text),
    spec("online", "/online", Boolean),
    spec("ip_reserved", "/ipReserved", Boolean),
    spec("last_seen", "/lastSeen", Timestamp),
    spec("network_name", "/network/name", Text),
    spec("group_name", "/group/name", Text),
    spec("total_download", "/totalDownload", Number),
    spec("total_upload", "/totalUpload", Number),
    spec("gid", "/gid", Text),
];

static TARGET_LIST_FIELDS: &[FieldSpec] = &[
    spec("id", "/id", Text),
    spec("name", "/name", Text),
    spec("owner", "/owner", Text),
    spec("category", "/category", Text),
    spec("notes", "/notes", Text),
    spec("updated_at", "/lastUpdated", Timestamp),
];

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Flows,
        EntityType::Alarms,
        EntityType::Rules,
        EntityType::Devices,
        EntityType::TargetLists,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Flows => "flows",
            EntityType::Alarms => "alarms",
            EntityType::Rules => "rules",
            EntityType::Devices => "devices",
            EntityType::TargetLists => "target_lists",
        }
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            EntityType::Flows => FLOW_FIELDS,
            EntityType::Alarms => ALARM_FIELDS,
            EntityType::Rules => RULE_FIELDS,
            EntityType::Devices => DEVICE_FIELDS,
            EntityType::TargetLists => TARGET_LIST_FIELDS,
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields().iter().map(|f| f.name).collect()
    }

    /// Names of the fields of one kind, in declaration order.
    pub fn fields_of_kind(&self, kind: FieldKind) -> impl Iterator<Item = &'static str> {
        self.fields()
            .iter()
            .filter(move |f| f.kind == kind)
            .map(|f| f.name)
    }

    pub fn is_field_of_kind(&self, name: &str, kind: FieldKind) -> bool {
        self.field(name).is_some_and(|f| f.kind == kind)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "flows" | "flow" => Ok(EntityType::Flows),
            "alarms" | "alarm" => Ok(EntityType::Alarms),
            "rules" | "rule" => Ok(EntityType::Rules),
            "devices" | "device" => Ok(EntityType::Devices),
            "target_lists" | "target_list" => Ok(EntityType::TargetLists),
            _ => Err(Error::UnknownEntity(s.to_string())),
        }
    }
}

/// A record fetched from the backend, tagged with its entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: EntityType,
    data: serde_json::Value,
}

impl Record {
    pub fn new(entity: EntityType, data: serde_json::Value) -> Self {
        Self { entity, data }
    }

    pub fn entity(&self) -> EntityType {
        self.entity
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn into_data(self) -> serde_json::Value {
        self.data
    }

    /// Read a schema field. Undeclared fields and missing paths are `None`.
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        let spec = self.entity.field(field)?;
        self.data.pointer(spec.path).filter(|v| !v.is_null())
    }

    /// Field value rendered as text; numbers and booleans are stringified.
    pub fn get_text(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        match self.get(field)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}
