//! Typed view over raw resource records.
//!
//! Collector output keeps the provider's field names (`VpcId`, `Tags`,
//! `IpPermissions`, ...). Records are open mappings, so every accessor here
//! degrades to `None`/empty instead of failing on a missing or mistyped field.

use serde_json::{Map, Value};

/// A borrowed resource record (one JSON object).
#[derive(Debug, Clone, Copy)]
pub struct Record<'a>(&'a Map<String, Value>);

impl<'a> Record<'a> {
    pub fn new(fields: &'a Map<String, Value>) -> Self {
        Self(fields)
    }

    /// View a value as a record when it is a JSON object.
    pub fn from_value(value: &'a Value) -> Option<Self> {
        value.as_object().map(Self)
    }

    pub fn fields(&self) -> &'a Map<String, Value> {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.0.get(key)
    }

    /// Follow a path of object keys (`["Endpoint", "Address"]`).
    pub fn at(&self, path: &[&str]) -> Option<&'a Value> {
        let (first, rest) = path.split_first()?;
        let mut cur = self.0.get(*first)?;
        for key in rest {
            cur = cur.as_object()?.get(*key)?;
        }
        Some(cur)
    }

    /// Non-empty string at `path`.
    pub fn str_at(&self, path: &[&str]) -> Option<&'a str> {
        self.at(path)?.as_str().filter(|s| !s.is_empty())
    }

    pub fn str(&self, key: &str) -> Option<&'a str> {
        self.str_at(&[key])
    }

    /// Scalar at `path` rendered as text (strings verbatim, numbers/bools formatted).
    pub fn text_at(&self, path: &[&str]) -> Option<String> {
        match self.at(path)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// List at `path`, or an empty slice.
    pub fn list_at(&self, path: &[&str]) -> &'a [Value] {
        match self.at(path) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    /// Object entries of the list at `path`.
    pub fn records_at(&self, path: &[&str]) -> impl Iterator<Item = Record<'a>> + 'a {
        self.list_at(path).iter().filter_map(Record::from_value)
    }

    /// Non-empty strings of the list at `path`.
    pub fn strings_at(&self, path: &[&str]) -> impl Iterator<Item = &'a str> + 'a {
        self.list_at(path)
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The user-assigned `Name` tag from the record's `Tags` list.
    pub fn name_tag(&self) -> Option<&'a str> {
        self.get("Tags").and_then(name_tag)
    }
}

/// Extract the value of the `Name` entry from a list of `{Key, Value}` tags.
///
/// Anything other than a list (absent, null, a mapping) yields `None`.
pub fn name_tag(tags: &Value) -> Option<&str> {
    tags.as_array()?.iter().find_map(|tag| {
        let tag = tag.as_object()?;
        if tag.get("Key")?.as_str()? == "Name" {
            tag.get("Value")?.as_str()
        } else {
            None
        }
    })
}

/// One ingress rule of a security group.
///
/// Fields are read one at a time, so a mistyped port only blanks that port
/// and never hides the rule's sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpPermission {
    pub protocol: Option<String>,
    pub from_port: Option<String>,
    pub to_port: Option<String>,
    pub ip_ranges: Vec<IpRange>,
    pub group_pairs: Vec<UserIdGroupPair>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpRange {
    pub cidr: Option<String>,
}

/// A peer security group named as a traffic source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserIdGroupPair {
    pub group_id: Option<String>,
    pub user_id: Option<String>,
}

impl IpPermission {
    pub fn from_record(rule: Record<'_>) -> Self {
        Self {
            protocol: rule.text_at(&["IpProtocol"]),
            from_port: rule.text_at(&["FromPort"]),
            to_port: rule.text_at(&["ToPort"]),
            ip_ranges: rule
                .records_at(&["IpRanges"])
                .map(|range| IpRange {
                    cidr: range.str("CidrIp").map(str::to_string),
                })
                .collect(),
            group_pairs: rule
                .records_at(&["UserIdGroupPairs"])
                .map(|pair| UserIdGroupPair {
                    group_id: pair.str("GroupId").map(str::to_string),
                    user_id: pair.text_at(&["UserId"]),
                })
                .collect(),
        }
    }

    /// Every object entry of an `IpPermissions` list.
    pub fn parse_list(rules: &[Value]) -> Vec<IpPermission> {
        rules
            .iter()
            .filter_map(Record::from_value)
            .map(Self::from_record)
            .collect()
    }

    /// `(protocol, ports)` as shown in rule summaries; protocol `-1` means all traffic.
    pub fn protocol_and_ports(&self) -> (String, String) {
        let protocol = self.protocol.clone().unwrap_or_default();
        if protocol == "-1" {
            return ("all".to_string(), "all".to_string());
        }
        let from = self.from_port.as_deref().unwrap_or_default();
        let to = self.to_port.as_deref().unwrap_or_default();
        let ports = if from == to {
            from.to_string()
        } else {
            format!("{from}-{to}")
        };
        (protocol, ports)
    }

    /// Peer security groups this rule admits traffic from.
    pub fn peer_groups(&self) -> impl Iterator<Item = &str> {
        self.group_pairs
            .iter()
            .filter_map(|pair| pair.group_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn name_tag_requires_a_list_with_a_name_key() {
        assert_eq!(
            name_tag(&json!([{ "Key": "env", "Value": "prod" }, { "Key": "Name", "Value": "web" }])),
            Some("web")
        );
        assert_eq!(name_tag(&json!([{ "Key": "env", "Value": "prod" }])), None);
        assert_eq!(name_tag(&json!({ "Name": "web" })), None);
        assert_eq!(name_tag(&Value::Null), None);
    }

    #[test]
    fn paths_degrade_to_none() {
        let v = json!({ "Endpoint": { "Address": "db.local", "Port": 5432 }, "Empty": "" });
        let r = Record::from_value(&v).unwrap();
        assert_eq!(r.str_at(&["Endpoint", "Address"]), Some("db.local"));
        assert_eq!(r.text_at(&["Endpoint", "Port"]).as_deref(), Some("5432"));
        assert_eq!(r.str_at(&["Endpoint", "Port"]), None);
        assert_eq!(r.str_at(&["Endpoint", "Missing", "Deeper"]), None);
        assert_eq!(r.str("Empty"), None);
        assert!(r.list_at(&["Endpoint"]).is_empty());
        assert_eq!(r.at(&[]), None);
    }

    #[test]
    fn rule_ports_render_like_the_console() {
        let rules = IpPermission::parse_list(&[
            json!({ "IpProtocol": "tcp", "FromPort": 443, "ToPort": 443 }),
            json!({ "IpProtocol": "tcp", "FromPort": 1024, "ToPort": 2048 }),
            json!({ "IpProtocol": "-1" }),
            json!("not a rule"),
        ]);
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].protocol_and_ports(), ("tcp".into(), "443".into()));
        assert_eq!(rules[1].protocol_and_ports(), ("tcp".into(), "1024-2048".into()));
        assert_eq!(rules[2].protocol_and_ports(), ("all".into(), "all".into()));
    }

    #[test]
    fn peer_groups_skip_pairs_without_group_ids() {
        let value = json!({
            "IpProtocol": "tcp",
            "UserIdGroupPairs": [{ "GroupId": "sg-1" }, { "UserId": "123" }, { "GroupId": "" }]
        });
        let rule = IpPermission::from_record(Record::from_value(&value).unwrap());
        assert_eq!(rule.peer_groups().collect::<Vec<_>>(), vec!["sg-1"]);
        assert_eq!(rule.group_pairs[1].user_id.as_deref(), Some("123"));
    }

    #[test]
    fn mistyped_ports_keep_the_rest_of_the_rule() {
        let rules = IpPermission::parse_list(&[
            json!({ "IpProtocol": "tcp", "FromPort": "5432", "ToPort": "5432", "UserIdGroupPairs": [{ "GroupId": "sg-1" }] }),
            json!({ "IpProtocol": "udp", "FromPort": [53], "ToPort": 53, "IpRanges": [{ "CidrIp": "10.0.0.0/8" }, "bad"] }),
        ]);
        assert_eq!(rules[0].protocol_and_ports(), ("tcp".into(), "5432".into()));
        assert_eq!(rules[0].peer_groups().collect::<Vec<_>>(), vec!["sg-1"]);
        assert_eq!(rules[1].from_port, None);
        assert_eq!(rules[1].protocol_and_ports(), ("udp".into(), "-53".into()));
        assert_eq!(rules[1].ip_ranges.len(), 1);
    }
}
