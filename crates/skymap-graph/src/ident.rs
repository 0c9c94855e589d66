//! Node identifier and label synthesis.
//!
//! Every node id has the form `<kind-prefix>:<local-id>`. The local id is the
//! most specific stable identifier a record carries; nested kinds (a service
//! inside a cluster, a record inside a zone) join their parent's local id in
//! front of their own.
//!
//! Lookups never fail: a missing or empty field simply yields no id (the
//! record is skipped) or falls back to a neutral label.

use skymap_inventory::Record;

/// A path of object keys into a record.
pub type FieldPath = &'static [&'static str];

/// Region recorded on nodes of global services.
pub const GLOBAL_REGION: &str = "global";

/// Kind and service of access-error markers.
pub const ERROR_KIND: &str = "error";

pub fn node_id(prefix: &str, local_id: &str) -> String {
    format!("{prefix}:{local_id}")
}

/// Local id of a nested record: `<parent><sep><child>`.
pub fn composite_id(parent: &str, sep: &str, child: &str) -> String {
    format!("{parent}{sep}{child}")
}

/// How a kind finds its local identifier.
#[derive(Debug, Clone, Copy)]
pub enum IdRule {
    Field(FieldPath),
    /// First present field wins (`UserId`, else `UserName`).
    FirstOf(&'static [FieldPath]),
    /// Last segment of a delimited reference (queue URL, topic ARN, zone path).
    LastSegment(FieldPath, char),
    /// Several fields joined with a separator; absent parts render empty.
    Joined(&'static [FieldPath], &'static str),
}

impl IdRule {
    pub fn local_id(&self, record: Record<'_>) -> Option<String> {
        match *self {
            IdRule::Field(path) => record.text_at(path),
            IdRule::FirstOf(paths) => paths.iter().find_map(|p| record.text_at(p)),
            IdRule::LastSegment(path, sep) => record
                .str_at(path)?
                .rsplit(sep)
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            IdRule::Joined(paths, sep) => {
                let parts: Vec<String> = paths
                    .iter()
                    .map(|p| record.text_at(p).unwrap_or_default())
                    .collect();
                if parts.iter().all(String::is_empty) {
                    None
                } else {
                    Some(parts.join(sep))
                }
            }
        }
    }
}

/// Primary part of a label; every variant falls back to the local id.
#[derive(Debug, Clone, Copy)]
pub enum LabelBase {
    LocalId,
    /// The `Name` entry of the record's `Tags` list.
    NameTag,
    Field(FieldPath),
}

/// Parenthesised suffix such as a CIDR block or a volume size.
#[derive(Debug, Clone, Copy)]
pub struct Detail {
    pub path: FieldPath,
    /// Shown when the field is absent.
    pub placeholder: &'static str,
    pub unit: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct LabelRule {
    pub base: LabelBase,
    pub detail: Option<Detail>,
}

impl LabelRule {
    pub const LOCAL_ID: LabelRule = LabelRule {
        base: LabelBase::LocalId,
        detail: None,
    };

    pub const NAME_TAG: LabelRule = LabelRule {
        base: LabelBase::NameTag,
        detail: None,
    };

    pub const fn field(path: FieldPath) -> LabelRule {
        LabelRule {
            base: LabelBase::Field(path),
            detail: None,
        }
    }

    pub const fn with_detail(self, path: FieldPath, placeholder: &'static str, unit: &'static str) -> LabelRule {
        LabelRule {
            base: self.base,
            detail: Some(Detail {
                path,
                placeholder,
                unit,
            }),
        }
    }

    pub fn render(&self, record: Record<'_>, local_id: &str) -> String {
        let base = match self.base {
            LabelBase::LocalId => None,
            LabelBase::NameTag => record.name_tag().filter(|s| !s.is_empty()).map(str::to_string),
            LabelBase::Field(path) => record.text_at(path),
        }
        .unwrap_or_else(|| local_id.to_string());

        match self.detail {
            None => base,
            Some(detail) => {
                let value = record
                    .text_at(detail.path)
                    .unwrap_or_else(|| detail.placeholder.to_string());
                format!("{base} ({value}{})", detail.unit)
            }
        }
    }
}

pub fn error_node_id(scope: &str, seq: u64) -> String {
    format!("{ERROR_KIND}:{scope}:{seq}")
}

pub fn error_label(resource: &str) -> String {
    format!("⚠ {resource}")
}

/// Best-effort match of a DNS alias target against a CDN distribution domain.
///
/// The alias must point into `cloudfront.net` and end with the distribution's
/// domain once trailing dots are trimmed. Near-miss spellings are not matched.
pub fn alias_matches_distribution(alias_dns: &str, distribution_domain: &str) -> bool {
    let domain = distribution_domain.trim_end_matches('.');
    !domain.is_empty()
        && alias_dns.contains("cloudfront.net")
        && alias_dns.trim_end_matches('.').ends_with(domain)
}

/// Bucket name behind an S3 origin domain (`assets.s3.amazonaws.com` -> `assets`).
pub fn s3_origin_bucket(origin_domain: &str) -> Option<&str> {
    if !(origin_domain.contains(".s3.") || origin_domain.ends_with(".s3.amazonaws.com")) {
        return None;
    }
    origin_domain.split(".s3").next().filter(|b| !b.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn rec(v: &Value) -> Record<'_> {
        Record::from_value(v).unwrap()
    }

    #[test]
    fn name_tag_labels_fall_back_to_the_local_id() {
        let tagged = json!({ "VpcId": "vpc-1", "CidrBlock": "10.0.0.0/16", "Tags": [{ "Key": "Name", "Value": "main" }] });
        let untagged = json!({ "VpcId": "vpc-2", "Tags": [{ "Key": "env", "Value": "dev" }] });
        let rule = LabelRule::NAME_TAG.with_detail(&["CidrBlock"], "", "");

        assert_eq!(rule.render(rec(&tagged), "vpc-1"), "main (10.0.0.0/16)");
        assert_eq!(rule.render(rec(&untagged), "vpc-2"), "vpc-2 ()");
    }

    #[test]
    fn missing_capacity_uses_a_placeholder() {
        let vol = json!({ "VolumeId": "vol-1" });
        let rule = LabelRule::NAME_TAG.with_detail(&["Size"], "?", "GB");
        assert_eq!(rule.render(rec(&vol), "vol-1"), "vol-1 (?GB)");

        let sized = json!({ "VolumeId": "vol-2", "Size": 100 });
        assert_eq!(rule.render(rec(&sized), "vol-2"), "vol-2 (100GB)");
    }

    #[test]
    fn id_rules() {
        let user = json!({ "UserName": "alice" });
        assert_eq!(
            IdRule::FirstOf(&[&["UserId"], &["UserName"]]).local_id(rec(&user)).as_deref(),
            Some("alice")
        );

        let zone = json!({ "Id": "/hostedzone/Z123" });
        assert_eq!(IdRule::LastSegment(&["Id"], '/').local_id(rec(&zone)).as_deref(), Some("Z123"));

        let queue = json!({ "url": "https://sqs.us-east-1.amazonaws.com/123/orders/" });
        assert_eq!(IdRule::LastSegment(&["url"], '/').local_id(rec(&queue)), None);

        let record = json!({ "Name": "www.example.com.", "Type": "A" });
        let joined = IdRule::Joined(&[&["Name"], &["Type"]], ":");
        assert_eq!(joined.local_id(rec(&record)).as_deref(), Some("www.example.com.:A"));
        assert_eq!(joined.local_id(rec(&json!({}))), None);

        assert_eq!(IdRule::Field(&["VpcId"]).local_id(rec(&json!({ "VpcId": "" }))), None);
    }

    #[test]
    fn alias_matching_is_a_suffix_heuristic() {
        assert!(alias_matches_distribution("d111.cloudfront.net.", "d111.cloudfront.net"));
        assert!(alias_matches_distribution("d111.cloudfront.net", "d111.cloudfront.net."));
        assert!(!alias_matches_distribution("d111.cloudfront.net.", "d222.cloudfront.net"));
        assert!(!alias_matches_distribution("lb-1.elb.amazonaws.com.", "lb-1.elb.amazonaws.com"));
        assert!(!alias_matches_distribution("d111.cloudfront.net.", ""));
        assert!(!alias_matches_distribution("d111.cloudfront.net.", "..."));
    }

    #[test]
    fn origin_bucket_extraction() {
        assert_eq!(s3_origin_bucket("assets.s3.amazonaws.com"), Some("assets"));
        assert_eq!(s3_origin_bucket("media.s3.eu-west-1.amazonaws.com"), Some("media"));
        assert_eq!(s3_origin_bucket("origin.example.com"), None);
    }

    #[test]
    fn error_ids_embed_scope_and_sequence() {
        assert_eq!(error_node_id("us-east-1", 3), "error:us-east-1:3");
        assert_eq!(error_label("iam:users"), "⚠ iam:users");
    }
}
