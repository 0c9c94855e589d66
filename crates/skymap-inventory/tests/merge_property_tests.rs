use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Value};
use skymap_inventory::{merge_at, InventoryDocument};

fn region() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("us-east-1".to_string()),
        Just("us-west-2".to_string()),
        Just("eu-west-1".to_string()),
        Just("ap-south-1".to_string()),
    ]
}

fn vpc() -> impl Strategy<Value = Value> {
    (0u8..6, proptest::option::of("[a-z]{1,6}")).prop_map(|(n, name)| match name {
        Some(name) => json!({ "VpcId": format!("vpc-{n}"), "Tags": [{ "Key": "Name", "Value": name }] }),
        None => json!({ "VpcId": format!("vpc-{n}") }),
    })
}

fn denial() -> impl Strategy<Value = Value> {
    "[a-z]{2,8}:[a-z]{2,8}".prop_map(|resource| {
        json!({ "resource": resource, "code": "AccessDenied", "message": "denied" })
    })
}

fn inventory() -> impl Strategy<Value = InventoryDocument> {
    (
        proptest::collection::btree_map(region(), proptest::collection::vec(vpc(), 0..4), 0..4),
        proptest::collection::vec(denial(), 0..3),
    )
        .prop_map(|(regions, errors)| {
            let scanned: Vec<&String> = regions.keys().collect();
            let mut regional = serde_json::Map::new();
            for (region, vpcs) in &regions {
                regional.insert(region.clone(), json!({ "ec2": { "vpcs": vpcs } }));
            }
            InventoryDocument::from_value(json!({
                "metadata": { "regions_scanned": scanned, "profile": "p" },
                "global_services": {},
                "regional_services": regional,
                "errors": { "global": errors, "regional": {} }
            }))
            .unwrap()
        })
}

proptest! {
    #[test]
    fn merging_a_document_with_itself_keeps_its_resources(doc in inventory()) {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let once = merge_at(std::slice::from_ref(&doc), at);
        let twice = merge_at(&[doc.clone(), doc.clone()], at);

        prop_assert_eq!(&once.regional_services, &twice.regional_services);
        prop_assert_eq!(&once.global_services, &twice.global_services);
        prop_assert_eq!(&once.metadata.regions_scanned, &twice.metadata.regions_scanned);
        prop_assert_eq!(twice.errors.total(), 2 * doc.errors.total());
    }

    #[test]
    fn scanned_regions_are_the_sorted_union(a in inventory(), b in inventory()) {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let merged = merge_at(&[a.clone(), b.clone()], at);

        let mut expected: Vec<String> = a
            .metadata
            .regions_scanned
            .iter()
            .chain(&b.metadata.regions_scanned)
            .cloned()
            .collect();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(merged.metadata.regions_scanned, expected);
    }

    #[test]
    fn merged_lists_contain_no_duplicates(a in inventory(), b in inventory()) {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let merged = merge_at(&[a, b], at);

        for services in merged.regional_services.values() {
            if let Some(Value::Array(vpcs)) = services.get("ec2").and_then(|ec2| ec2.get("vpcs")) {
                let mut keys: Vec<String> = vpcs.iter().map(Value::to_string).collect();
                let len = keys.len();
                keys.sort();
                keys.dedup();
                prop_assert_eq!(keys.len(), len);
            }
        }
    }

    #[test]
    fn errors_concatenate_in_source_order(a in inventory(), b in inventory()) {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let merged = merge_at(&[a.clone(), b.clone()], at);

        let expected: Vec<_> = a.errors.global.iter().chain(&b.errors.global).cloned().collect();
        prop_assert_eq!(merged.errors.global, expected);
        prop_assert_eq!(merged.metadata.profile.as_deref(), Some("merged"));
    }
}
