//! Multi-source inventory merge.
//!
//! Several collection runs (different accounts, or repeated scans of the same
//! account) are folded into one document before the graph is built:
//!
//! - regions scanned: sorted union
//! - record sets: per-field union. Two lists are unioned with content-based
//!   deduplication, preserving order of first appearance. A field missing from
//!   the accumulated set is copied in. Any other collision keeps the value
//!   already present (first source wins), so the merge is not commutative.
//! - errors: concatenated, never deduplicated (a denial seen in two runs is
//!   reported twice)

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::{InventoryDocument, Metadata, ServiceMap, ServiceRecords};

/// Profile name recorded on merged documents.
pub const MERGED_PROFILE: &str = "merged";

/// Merge `sources` in order, stamping the result with the current time.
pub fn merge(sources: &[InventoryDocument]) -> InventoryDocument {
    merge_at(sources, Utc::now())
}

/// Merge `sources` in order, stamping the result with `merged_at`.
pub fn merge_at(sources: &[InventoryDocument], merged_at: DateTime<Utc>) -> InventoryDocument {
    let mut combined = InventoryDocument {
        metadata: Metadata {
            ingestion_time: Some(merged_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            regions_scanned: Vec::new(),
            profile: Some(MERGED_PROFILE.to_string()),
            summary: None,
        },
        ..InventoryDocument::default()
    };

    let mut regions = BTreeSet::new();
    for source in sources {
        regions.extend(source.metadata.regions_scanned.iter().cloned());

        merge_service_map(&mut combined.global_services, &source.global_services);

        for (region, services) in &source.regional_services {
            match combined.regional_services.get_mut(region) {
                Some(existing) => merge_service_map(existing, services),
                None => {
                    combined
                        .regional_services
                        .insert(region.clone(), services.clone());
                }
            }
        }

        combined
            .errors
            .global
            .extend(source.errors.global.iter().cloned());
        for (region, errors) in &source.errors.regional {
            combined
                .errors
                .regional
                .entry(region.clone())
                .or_default()
                .extend(errors.iter().cloned());
        }
    }

    combined.metadata.regions_scanned = regions.into_iter().collect();
    combined.refresh_summary();

    tracing::debug!(
        sources = sources.len(),
        regions = combined.regional_services.len(),
        global_services = combined.global_services.len(),
        errors = combined.errors.total(),
        "merged inventory sources"
    );
    combined
}

fn merge_service_map(into: &mut ServiceMap, incoming: &ServiceMap) {
    for (service, records) in incoming {
        match into.get_mut(service) {
            Some(existing) => merge_records(existing, records),
            None => {
                into.insert(service.clone(), records.clone());
            }
        }
    }
}

/// Fold `incoming` into `existing` field by field.
pub fn merge_records(existing: &mut ServiceRecords, incoming: &ServiceRecords) {
    for (field, value) in incoming {
        if let Some(current) = existing.get_mut(field) {
            if let (Value::Array(current), Value::Array(items)) = (current, value) {
                union_dedup(current, items);
            }
            continue;
        }
        existing.insert(field.clone(), value.clone());
    }
}

fn union_dedup(current: &mut Vec<Value>, incoming: &[Value]) {
    let mut seen: HashSet<String> = current.iter().map(canonical_key).collect();
    for item in incoming {
        if seen.insert(canonical_key(item)) {
            current.push(item.clone());
        }
    }
}

/// Canonical serialized form of a list item.
///
/// Object keys are emitted in sorted order whatever the map's iteration order,
/// so equal content renders to identical text.
pub fn canonical_key(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(&fields[key.as_str()], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(v: Value) -> InventoryDocument {
        InventoryDocument::from_value(v).unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn merging_a_document_with_itself_adds_nothing() {
        let d = doc(json!({
            "metadata": { "regions_scanned": ["us-east-1"] },
            "global_services": { "s3": { "buckets": [{ "Name": "a" }, { "Name": "b" }] } },
            "regional_services": {
                "us-east-1": { "ec2": { "vpcs": [{ "VpcId": "vpc-1" }] } }
            }
        }));
        let merged = merge_at(&[d.clone(), d.clone()], at());
        assert_eq!(merged.global_list("s3", "buckets").len(), 2);
        assert_eq!(
            merged.regional_services["us-east-1"]["ec2"]["vpcs"]
                .as_array()
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn dedup_ignores_key_order() {
        let a = doc(json!({ "global_services": { "iam": { "roles": [{ "RoleId": "r1", "RoleName": "x" }] } } }));
        let b: InventoryDocument = InventoryDocument::from_json_str(
            r#"{"global_services":{"iam":{"roles":[{"RoleName":"x","RoleId":"r1"},{"RoleId":"r2"}]}}}"#,
        )
        .unwrap();
        let merged = merge_at(&[a, b], at());
        let roles = merged.global_list("iam", "roles");
        assert_eq!(roles.len(), 2);
        assert_eq!(roles[1]["RoleId"], "r2");
    }

    #[test]
    fn canonical_key_sorts_nested_keys() {
        let mut tags = serde_json::Map::new();
        tags.insert("Value".into(), json!("web"));
        tags.insert("Key".into(), json!("Name"));
        let mut record = serde_json::Map::new();
        record.insert("VpcId".into(), json!("vpc-1"));
        record.insert("Tags".into(), Value::Array(vec![Value::Object(tags)]));
        record.insert("Cidr \"a\"".into(), json!(null));

        assert_eq!(
            canonical_key(&Value::Object(record)),
            r#"{"Cidr \"a\"":null,"Tags":[{"Key":"Name","Value":"web"}],"VpcId":"vpc-1"}"#
        );
    }

    #[test]
    fn scalar_conflicts_keep_the_first_source() {
        let d1 = doc(json!({ "global_services": { "organizations": { "organization": { "Id": "o-1" }, "accounts": [] } } }));
        let d2 = doc(json!({ "global_services": { "organizations": { "organization": { "Id": "o-2" }, "extra": 1 } } }));

        let forward = merge_at(&[d1.clone(), d2.clone()], at());
        let reverse = merge_at(&[d2, d1], at());
        let org = |d: &InventoryDocument| d.global_services["organizations"]["organization"]["Id"].clone();
        assert_eq!(org(&forward), json!("o-1"));
        assert_eq!(org(&reverse), json!("o-2"));
        assert_eq!(forward.global_services["organizations"]["extra"], json!(1));
    }

    #[test]
    fn list_against_scalar_keeps_existing_value() {
        let d1 = doc(json!({ "global_services": { "s3": { "buckets": "denied" } } }));
        let d2 = doc(json!({ "global_services": { "s3": { "buckets": [{ "Name": "a" }] } } }));
        let merged = merge_at(&[d1, d2], at());
        assert_eq!(merged.global_services["s3"]["buckets"], json!("denied"));
    }

    #[test]
    fn errors_are_concatenated_and_regions_unioned() {
        let d1 = doc(json!({
            "metadata": { "regions_scanned": ["us-west-2", "us-east-1"] },
            "errors": {
                "global": [{ "resource": "iam:users", "code": "AccessDenied" }],
                "regional": { "us-east-1": [{ "resource": "ec2:vpcs" }] }
            }
        }));
        let d2 = doc(json!({
            "metadata": { "regions_scanned": ["eu-west-1", "us-east-1"] },
            "errors": {
                "global": [{ "resource": "iam:users", "code": "AccessDenied" }],
                "regional": { "us-east-1": [{ "resource": "ec2:vpcs" }], "eu-west-1": [{ "resource": "rds:db_instances" }] }
            }
        }));
        let merged = merge_at(&[d1, d2], at());
        assert_eq!(
            merged.metadata.regions_scanned,
            vec!["eu-west-1", "us-east-1", "us-west-2"]
        );
        assert_eq!(merged.errors.global.len(), 2);
        assert_eq!(merged.errors.regional["us-east-1"].len(), 2);
        assert_eq!(merged.errors.regional["eu-west-1"].len(), 1);
        assert_eq!(merged.metadata.summary.as_ref().unwrap().total_errors, 5);
        assert_eq!(merged.metadata.profile.as_deref(), Some(MERGED_PROFILE));
        assert_eq!(merged.metadata.ingestion_time.as_deref(), Some("2024-05-01T12:00:00Z"));
    }

    #[test]
    fn regions_and_services_new_to_the_merge_are_copied_whole() {
        let d1 = doc(json!({ "regional_services": { "us-east-1": { "ec2": { "vpcs": [{ "VpcId": "vpc-1" }] } } } }));
        let d2 = doc(json!({
            "regional_services": {
                "us-east-1": { "lambda": { "functions": [{ "FunctionName": "f" }] } },
                "eu-west-1": { "ec2": { "vpcs": [{ "VpcId": "vpc-9" }] } }
            }
        }));
        let merged = merge_at(&[d1, d2], at());
        assert_eq!(merged.regional_services.len(), 2);
        assert!(merged.regional_services["us-east-1"].contains_key("lambda"));
        assert!(merged.regional_services["us-east-1"].contains_key("ec2"));
    }

    #[test]
    fn merging_nothing_yields_an_empty_document() {
        let merged = merge_at(&[], at());
        assert!(merged.global_services.is_empty());
        assert!(merged.regional_services.is_empty());
        assert!(merged.errors.is_empty());
        assert!(merged.metadata.regions_scanned.is_empty());
    }
}
