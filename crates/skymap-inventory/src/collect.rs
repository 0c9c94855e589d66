//! Collector contract and collection orchestration.
//!
//! The provider-specific API layer lives outside this crate and is reached
//! through [`ApiCaller`]. Every call either yields data or a [`CallFailure`];
//! [`safe_call`] turns failures into recorded [`AccessError`]s and an empty
//! result so one denied permission never aborts a run.
//!
//! [`collect_inventory`] runs the global services first, then every region on
//! a bounded worker pool, and always returns one complete document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stats::has_data;
use crate::{AccessError, InventoryDocument, Metadata, ServiceMap, ServiceRecords};

/// Regions scanned when the caller does not name any.
pub const DEFAULT_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ca-central-1",
    "ca-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "il-central-1",
    "me-central-1",
    "me-south-1",
    "sa-east-1",
];

/// What one control-plane call returned.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutput {
    /// Paginated or list-shaped result.
    List(Vec<Value>),
    /// Description of a single resource.
    Single(Map<String, Value>),
    Empty,
}

/// A failed call as reported by the provider layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailure {
    pub code: String,
    pub message: String,
}

impl CallFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// One call in a collection plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCall {
    pub operation: String,
    /// Label used in error records (`<service>:<resource>`).
    pub resource: String,
    /// Response key holding the payload, if any.
    #[serde(default)]
    pub result_key: Option<String>,
    #[serde(default)]
    pub paginate: bool,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ApiCall {
    pub fn list(operation: &str, result_key: &str, resource: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource: resource.to_string(),
            result_key: Some(result_key.to_string()),
            paginate: true,
            params: Map::new(),
        }
    }

    pub fn describe(operation: &str, resource: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource: resource.to_string(),
            result_key: None,
            paginate: false,
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    /// Shape returned when the call fails or yields nothing.
    fn empty_shape(&self) -> Value {
        if self.paginate || self.result_key.is_some() {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        }
    }
}

/// The provider API layer.
pub trait ApiCaller: Sync {
    /// Perform one call. `region` is `None` for global services.
    fn call(&self, region: Option<&str>, service: &str, call: &ApiCall) -> Result<CallOutput, CallFailure>;
}

/// Run `call`, recording a failure in `errors` instead of propagating it.
pub fn safe_call<C: ApiCaller + ?Sized>(
    caller: &C,
    region: Option<&str>,
    service: &str,
    call: &ApiCall,
    errors: &mut Vec<AccessError>,
) -> Value {
    match caller.call(region, service, call) {
        Ok(CallOutput::List(items)) => Value::Array(items),
        Ok(CallOutput::Single(fields)) => Value::Object(fields),
        Ok(CallOutput::Empty) => call.empty_shape(),
        Err(failure) => {
            tracing::debug!(
                region = region.unwrap_or("global"),
                service,
                resource = %call.resource,
                code = %failure.code,
                "call failed; recording access error"
            );
            errors.push(AccessError::new(
                format!("{service}:{}", call.resource),
                failure.code,
                failure.message,
            ));
            call.empty_shape()
        }
    }
}

/// Calls that make up one service's record set: `(field, call)` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePlan {
    pub service: String,
    pub calls: Vec<(String, ApiCall)>,
}

impl ServicePlan {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            calls: Vec::new(),
        }
    }

    pub fn field(mut self, field: &str, call: ApiCall) -> Self {
        self.calls.push((field.to_string(), call));
        self
    }

    fn run<C: ApiCaller + ?Sized>(
        &self,
        caller: &C,
        region: Option<&str>,
        errors: &mut Vec<AccessError>,
    ) -> ServiceRecords {
        let mut records = ServiceRecords::new();
        for (field, call) in &self.calls {
            let value = safe_call(caller, region, &self.service, call, errors);
            records.insert(field.clone(), value);
        }
        records
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionPlan {
    pub global: Vec<ServicePlan>,
    pub regional: Vec<ServicePlan>,
}

#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Regions scanned concurrently.
    pub max_workers: usize,
    pub profile: Option<String>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            max_workers: 4,
            profile: None,
        }
    }
}

/// Outcome of scanning one region.
#[derive(Debug, Clone, Default)]
pub struct RegionScan {
    pub region: String,
    pub services: ServiceMap,
    pub errors: Vec<AccessError>,
}

/// Scan one region, dropping services that returned no data.
pub fn collect_region<C: ApiCaller + ?Sized>(caller: &C, plan: &CollectionPlan, region: &str) -> RegionScan {
    let mut errors = Vec::new();
    let mut services = ServiceMap::new();
    for service in &plan.regional {
        let records = service.run(caller, Some(region), &mut errors);
        if has_data(&records) {
            services.insert(service.service.clone(), records);
        }
    }
    tracing::info!(
        region,
        services = services.len(),
        errors = errors.len(),
        "scanned region"
    );
    RegionScan {
        region: region.to_string(),
        services,
        errors,
    }
}

/// Assemble a complete inventory document.
///
/// An empty `regions` slice scans every region in [`DEFAULT_REGIONS`].
pub fn collect_inventory<C: ApiCaller>(
    caller: &C,
    plan: &CollectionPlan,
    regions: &[String],
    options: &CollectOptions,
) -> anyhow::Result<InventoryDocument> {
    use rayon::prelude::*;

    let defaults: Vec<String>;
    let regions = if regions.is_empty() {
        defaults = DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect();
        defaults.as_slice()
    } else {
        regions
    };

    let mut doc = InventoryDocument {
        metadata: Metadata {
            ingestion_time: Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            regions_scanned: regions.to_vec(),
            profile: Some(options.profile.clone().unwrap_or_else(|| "default".to_string())),
            summary: None,
        },
        ..InventoryDocument::default()
    };

    for service in &plan.global {
        let records = service.run(caller, None, &mut doc.errors.global);
        doc.global_services.insert(service.service.clone(), records);
    }
    tracing::info!(errors = doc.errors.global.len(), "collected global services");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.max_workers.max(1))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to start region worker pool: {e}"))?;
    let scans: Vec<RegionScan> = pool.install(|| {
        regions
            .par_iter()
            .map(|region| collect_region(caller, plan, region))
            .collect()
    });

    for scan in scans {
        if !scan.services.is_empty() {
            doc.regional_services.insert(scan.region.clone(), scan.services);
        }
        if !scan.errors.is_empty() {
            doc.errors.regional.insert(scan.region, scan.errors);
        }
    }

    doc.refresh_summary();
    Ok(doc)
}
