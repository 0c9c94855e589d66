//! High-level counters for one (usually merged) inventory document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{list_field, InventoryDocument, Record};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryStats {
    /// Collection timestamp carried from metadata; `None` when nothing is loaded.
    pub ingestion_time: Option<String>,
    pub regions_scanned: usize,
    /// Regions that carry any service data.
    pub regions_active: usize,
    pub s3_buckets: usize,
    pub iam_users: usize,
    pub iam_roles: usize,
    pub ec2_instances: usize,
    pub vpcs: usize,
    pub lambda_functions: usize,
    pub rds_instances: usize,
    /// Error total as reported in `metadata.summary`.
    pub total_errors: usize,
}

impl InventoryStats {
    pub fn compute(doc: &InventoryDocument) -> Self {
        let mut stats = InventoryStats {
            ingestion_time: doc.metadata.ingestion_time.clone(),
            regions_scanned: doc.metadata.regions_scanned.len(),
            regions_active: doc.regional_services.len(),
            s3_buckets: doc.global_list("s3", "buckets").len(),
            iam_users: doc.global_list("iam", "users").len(),
            iam_roles: doc.global_list("iam", "roles").len(),
            total_errors: doc
                .metadata
                .summary
                .as_ref()
                .map(|s| s.total_errors)
                .unwrap_or(0),
            ..InventoryStats::default()
        };

        for services in doc.regional_services.values() {
            let count = |service: &str, field: &str| {
                services
                    .get(service)
                    .map(|records| list_field(records, field).len())
                    .unwrap_or(0)
            };
            if let Some(ec2) = services.get("ec2") {
                // `instances` holds reservations, each with its own `Instances` list.
                stats.ec2_instances += list_field(ec2, "instances")
                    .iter()
                    .filter_map(Record::from_value)
                    .map(|reservation| reservation.list_at(&["Instances"]).len())
                    .sum::<usize>();
            }
            stats.vpcs += count("ec2", "vpcs");
            stats.lambda_functions += count("lambda", "functions");
            stats.rds_instances += count("rds", "db_instances");
        }
        stats
    }
}

impl From<&InventoryDocument> for InventoryStats {
    fn from(doc: &InventoryDocument) -> Self {
        Self::compute(doc)
    }
}

/// True when a record set holds anything worth keeping: a non-empty list,
/// mapping or string in any field.
pub fn has_data(records: &serde_json::Map<String, Value>) -> bool {
    records.values().any(|v| match v {
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_has_zero_counters() {
        let stats = InventoryStats::compute(&InventoryDocument::default());
        assert_eq!(stats, InventoryStats::default());
    }

    #[test]
    fn counts_across_regions_and_reservations() {
        let doc = InventoryDocument::from_value(json!({
            "metadata": {
                "ingestion_time": "2024-05-01T00:00:00Z",
                "regions_scanned": ["us-east-1", "us-west-2", "eu-west-1"],
                "summary": { "total_errors": 4 }
            },
            "global_services": {
                "s3": { "buckets": [{ "Name": "a" }, { "Name": "b" }] },
                "iam": { "users": [{ "UserName": "u" }], "roles": [] }
            },
            "regional_services": {
                "us-east-1": {
                    "ec2": {
                        "instances": [
                            { "Instances": [{ "InstanceId": "i-1" }, { "InstanceId": "i-2" }] },
                            { "Instances": [{ "InstanceId": "i-3" }] }
                        ],
                        "vpcs": [{ "VpcId": "vpc-1" }]
                    },
                    "lambda": { "functions": [{ "FunctionName": "f" }] }
                },
                "us-west-2": {
                    "ec2": { "vpcs": [{ "VpcId": "vpc-2" }] },
                    "rds": { "db_instances": [{ "DBInstanceIdentifier": "db" }] }
                }
            }
        }))
        .unwrap();

        let stats = InventoryStats::from(&doc);
        assert_eq!(stats.ingestion_time.as_deref(), Some("2024-05-01T00:00:00Z"));
        assert_eq!(stats.regions_scanned, 3);
        assert_eq!(stats.regions_active, 2);
        assert_eq!(stats.s3_buckets, 2);
        assert_eq!(stats.iam_users, 1);
        assert_eq!(stats.iam_roles, 0);
        assert_eq!(stats.ec2_instances, 3);
        assert_eq!(stats.vpcs, 2);
        assert_eq!(stats.lambda_functions, 1);
        assert_eq!(stats.rds_instances, 1);
        assert_eq!(stats.total_errors, 4);
    }

    #[test]
    fn has_data_ignores_empty_and_scalar_fields() {
        let empty = json!({ "vpcs": [], "summary": {}, "alias": "", "count": 0, "flag": true });
        assert!(!has_data(empty.as_object().unwrap()));
        let some = json!({ "vpcs": [], "alias": "prod" });
        assert!(has_data(some.as_object().unwrap()));
    }
}
