//! Skymap inventory documents
//!
//! An inventory document is the output of one collection run against a cloud
//! account:
//!
//! ```text
//! {
//!   "metadata":          { ingestion_time, regions_scanned, profile, summary },
//!   "global_services":   { <service>: { <field>: [records...] } },
//!   "regional_services": { <region>: { <service>: { <field>: [records...] } } },
//!   "errors":            { "global": [..], "regional": { <region>: [..] } }
//! }
//! ```
//!
//! Record shapes are service specific and kept as open JSON mappings; the
//! [`record`] module provides a typed view over them. Parsing is lenient below
//! the root: only a root that is not a JSON object is rejected.
//!
//! - [`merge`]: combine several documents into one (content-deduplicated lists,
//!   first-source-wins scalars, concatenated errors)
//! - [`stats`]: summary counters for a document
//! - [`collect`]: the collector contract and collection orchestration

pub mod collect;
pub mod merge;
pub mod record;
pub mod stats;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use merge::{merge, merge_at};
pub use record::{name_tag, Record};
pub use stats::InventoryStats;

/// One service's record set: field name -> value (usually a list of records).
pub type ServiceRecords = Map<String, Value>;

/// Service name -> record set.
pub type ServiceMap = BTreeMap<String, ServiceRecords>;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("invalid inventory document: {0}")]
    InvalidInput(String),
    #[error("failed to parse inventory JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read inventory: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = InventoryError> = std::result::Result<T, E>;

/// Counters written by the collector at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub regions_with_resources: usize,
    #[serde(default)]
    pub total_regional_service_region_pairs: usize,
    #[serde(default)]
    pub total_errors: usize,
    #[serde(default)]
    pub global_services_collected: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_time: Option<String>,
    #[serde(default)]
    pub regions_scanned: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
}

/// A structured access failure reported by the collector for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessError {
    /// `<service>:<resource>` label of the failed call.
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AccessError {
    pub fn new(resource: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            code: Some(code.into()),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorLists {
    #[serde(default)]
    pub global: Vec<AccessError>,
    #[serde(default)]
    pub regional: BTreeMap<String, Vec<AccessError>>,
}

impl ErrorLists {
    pub fn total(&self) -> usize {
        self.global.len() + self.regional.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Root entity of one collection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InventoryDocument {
    pub metadata: Metadata,
    pub global_services: ServiceMap,
    pub regional_services: BTreeMap<String, ServiceMap>,
    pub errors: ErrorLists,
}

impl InventoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret an already-parsed JSON value as an inventory document.
    ///
    /// Only the root shape is validated. Sections or entries with an
    /// unexpected shape are dropped (and logged) instead of failing the load.
    pub fn from_value(value: Value) -> Result<Self> {
        let found = json_kind(&value);
        let Value::Object(mut root) = value else {
            return Err(InventoryError::InvalidInput(format!(
                "root must be a JSON object, found {found}"
            )));
        };

        let metadata = root.remove("metadata").map(metadata).unwrap_or_default();

        let global_services = root
            .remove("global_services")
            .map(|v| service_map(v, "global"))
            .unwrap_or_default();

        let mut regional_services = BTreeMap::new();
        match root.remove("regional_services") {
            Some(Value::Object(regions)) => {
                for (region, services) in regions {
                    let services = service_map(services, &region);
                    regional_services.insert(region, services);
                }
            }
            None | Some(Value::Null) => {}
            Some(other) => {
                tracing::warn!(found = json_kind(&other), "ignoring non-object regional_services");
            }
        }

        let errors = root.remove("errors").map(error_lists).unwrap_or_default();

        Ok(Self {
            metadata,
            global_services,
            regional_services,
            errors,
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(s)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Self::from_value(serde_json::from_reader(reader)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Record set for a global service, if collected.
    pub fn global(&self, service: &str) -> Option<&ServiceRecords> {
        self.global_services.get(service)
    }

    /// Region codes that carry any service data, sorted.
    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.regional_services.keys().map(String::as_str)
    }

    /// Records listed under `service.field` of the global scope.
    pub fn global_list(&self, service: &str, field: &str) -> &[Value] {
        self.global(service)
            .map(|records| list_field(records, field))
            .unwrap_or(&[])
    }

    /// Recompute `metadata.summary` from the document's current contents.
    pub fn refresh_summary(&mut self) {
        self.metadata.summary = Some(Summary {
            regions_with_resources: self.regional_services.len(),
            total_regional_service_region_pairs: self
                .regional_services
                .values()
                .map(BTreeMap::len)
                .sum(),
            total_errors: self.errors.total(),
            global_services_collected: self.global_services.keys().cloned().collect(),
        });
    }
}

/// The list stored under `field`, or an empty slice for absent/non-list values.
pub fn list_field<'a>(records: &'a ServiceRecords, field: &str) -> &'a [Value] {
    match records.get(field) {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

/// Metadata fields are read one at a time; a mistyped field is dropped alone.
fn metadata(value: Value) -> Metadata {
    let mut fields = match value {
        Value::Object(fields) => fields,
        Value::Null => return Metadata::default(),
        other => {
            tracing::warn!(found = json_kind(&other), "ignoring non-object inventory metadata");
            return Metadata::default();
        }
    };
    Metadata {
        ingestion_time: metadata_field(&mut fields, "ingestion_time"),
        regions_scanned: metadata_field::<Vec<Value>>(&mut fields, "regions_scanned")
            .unwrap_or_default()
            .into_iter()
            .filter_map(|region| match region {
                Value::String(code) if !code.is_empty() => Some(code),
                _ => None,
            })
            .collect(),
        profile: metadata_field(&mut fields, "profile"),
        summary: metadata_field(&mut fields, "summary"),
    }
}

fn metadata_field<T: DeserializeOwned>(fields: &mut Map<String, Value>, key: &str) -> Option<T> {
    match fields.remove(key)? {
        Value::Null => None,
        v => serde_json::from_value(v)
            .map_err(|err| tracing::warn!(field = key, error = %err, "ignoring malformed metadata field"))
            .ok(),
    }
}

fn service_map(value: Value, scope: &str) -> ServiceMap {
    let mut out = ServiceMap::new();
    match value {
        Value::Object(services) => {
            for (service, records) in services {
                match records {
                    Value::Object(records) => {
                        out.insert(service, records);
                    }
                    other => {
                        tracing::warn!(
                            scope,
                            service = %service,
                            found = json_kind(&other),
                            "ignoring service record set that is not an object"
                        );
                    }
                }
            }
        }
        Value::Null => {}
        other => {
            tracing::warn!(scope, found = json_kind(&other), "ignoring non-object service map");
        }
    }
    out
}

fn error_lists(value: Value) -> ErrorLists {
    let Value::Object(mut obj) = value else {
        tracing::warn!("ignoring non-object error lists");
        return ErrorLists::default();
    };
    let global = obj.remove("global").map(access_errors).unwrap_or_default();
    let mut regional = BTreeMap::new();
    if let Some(Value::Object(regions)) = obj.remove("regional") {
        for (region, errs) in regions {
            regional.insert(region, access_errors(errs));
        }
    }
    ErrorLists { global, regional }
}

fn access_errors(value: Value) -> Vec<AccessError> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<AccessError>(item) {
            Ok(err) => Some(err),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed access error entry");
                None
            }
        })
        .collect()
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
