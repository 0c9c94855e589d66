//! Per-kind translation registry.
//!
//! Each resource kind is described by a [`KindSpec`]: where its records live,
//! how to derive its id and label, which attributes to copy into node
//! metadata, which embedded references become edges, and which nested record
//! lists become child nodes. The few relationships that need state gathered
//! elsewhere in the document (role ARNs, load balancer ARNs, ingress peers)
//! are expressed as a [`Hook`] run after the node is emitted.
//!
//! Adding a kind means adding one entry to [`GLOBAL_KINDS`] or
//! [`REGIONAL_KINDS`]. Entry order is emission order.

use serde_json::Value;
use skymap_inventory::record::IpPermission;
use skymap_inventory::Record;

use crate::builder::{GraphBuilder, Visit};
use crate::ident::{alias_matches_distribution, node_id, s3_origin_bucket, FieldPath, IdRule, LabelRule};

/// Post-emission hook for relationships that need builder state.
pub type Hook = for<'a> fn(&mut GraphBuilder<'a>, &Visit<'a>);

/// Value used when a metadata field is absent.
#[derive(Debug, Clone, Copy)]
pub enum Fallback {
    Str(&'static str),
    EmptyList,
    False,
}

impl Fallback {
    fn value(self) -> Value {
        match self {
            Fallback::Str(s) => Value::from(s),
            Fallback::EmptyList => Value::Array(Vec::new()),
            Fallback::False => Value::Bool(false),
        }
    }
}

/// How one metadata attribute is computed from a record.
#[derive(Clone, Copy)]
pub enum Meta {
    /// Copied as is; `null` when absent.
    Field(FieldPath),
    Or(FieldPath, Fallback),
    /// Whether the list field has any entries.
    NonEmpty(&'static str),
    /// Length of the list field.
    Len(&'static str),
    /// Entries of `list` whose `field` equals `equals`.
    CountWhere {
        list: &'static str,
        field: &'static str,
        equals: &'static str,
    },
    Derived(fn(Record<'_>) -> Value),
}

impl Meta {
    pub fn eval(&self, record: Record<'_>) -> Value {
        match self {
            Meta::Field(path) => record.at(path).cloned().unwrap_or(Value::Null),
            Meta::Or(path, fallback) => match record.at(path) {
                Some(v) if !v.is_null() => v.clone(),
                _ => fallback.value(),
            },
            Meta::NonEmpty(field) => Value::Bool(!record.list_at(&[*field]).is_empty()),
            Meta::Len(field) => Value::from(record.list_at(&[*field]).len()),
            Meta::CountWhere { list, field, equals } => Value::from(
                record
                    .records_at(&[*list])
                    .filter(|r| r.str(field) == Some(*equals))
                    .count(),
            ),
            Meta::Derived(f) => f(record),
        }
    }
}

/// Where a record names the other end of a relationship.
#[derive(Debug, Clone, Copy)]
pub enum Peer {
    Field(FieldPath),
    /// A list of plain id strings.
    Strings(FieldPath),
    /// A list of records, each carrying the id in `field`.
    Each(FieldPath, &'static str),
    /// One string holding a delimited id list.
    Delimited(FieldPath, char),
}

impl Peer {
    pub fn ids(&self, record: Record<'_>) -> Vec<String> {
        match *self {
            Peer::Field(path) => record.text_at(path).into_iter().collect(),
            Peer::Strings(path) => record.strings_at(path).map(str::to_string).collect(),
            Peer::Each(path, field) => record
                .records_at(path)
                .filter_map(|r| r.text_at(&[field]))
                .collect(),
            Peer::Delimited(path, sep) => record
                .str_at(path)
                .map(|s| {
                    s.split(sep)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// this -> peer
    Outgoing,
    /// peer -> this
    Incoming,
}

/// A direct edge read from an embedded reference.
#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub peer: Peer,
    /// Kind prefix of the peer's node id.
    pub prefix: &'static str,
    pub direction: Direction,
    pub label: &'static str,
    pub edge_type: &'static str,
    /// Emit only when this field is present.
    pub when: Option<FieldPath>,
}

impl Link {
    pub const fn incoming(prefix: &'static str, peer: Peer, label: &'static str, edge_type: &'static str) -> Link {
        Link {
            peer,
            prefix,
            direction: Direction::Incoming,
            label,
            edge_type,
            when: None,
        }
    }

    pub const fn outgoing(prefix: &'static str, peer: Peer, label: &'static str, edge_type: &'static str) -> Link {
        Link {
            peer,
            prefix,
            direction: Direction::Outgoing,
            label,
            edge_type,
            when: None,
        }
    }

    pub const fn when(self, path: FieldPath) -> Link {
        Link {
            when: Some(path),
            ..self
        }
    }
}

/// Nested records that become their own nodes, linked parent -> child.
pub struct Child {
    pub spec: &'static KindSpec,
    /// Separator for a composite `<parent-local>/<child-local>` id; `None`
    /// keeps the child's own id.
    pub join: Option<&'static str>,
    pub label: &'static str,
    pub edge_type: &'static str,
}

pub struct KindSpec {
    /// Node `type`.
    pub kind: &'static str,
    pub prefix: &'static str,
    pub service: &'static str,
    /// Field holding the records: in the service record set for top-level
    /// kinds, in the parent record for children.
    pub field: &'static str,
    /// Records wrap a further list (EC2 reservations wrap `Instances`).
    pub nested: Option<&'static str>,
    pub id: IdRule,
    pub label: LabelRule,
    pub metadata: &'static [(&'static str, Meta)],
    pub links: &'static [Link],
    pub children: &'static [Child],
    pub hook: Option<Hook>,
}

const BASE: KindSpec = KindSpec {
    kind: "",
    prefix: "",
    service: "",
    field: "",
    nested: None,
    id: IdRule::Field(&[]),
    label: LabelRule::LOCAL_ID,
    metadata: &[],
    links: &[],
    children: &[],
    hook: None,
};

const IN_VPC: Link = Link::incoming("vpc", Peer::Field(&["VpcId"]), "hosts", "network");
const VPC_CONTAINS: Link = Link::incoming("vpc", Peer::Field(&["VpcId"]), "contains", "network");
const IN_SUBNET: Link = Link::incoming("subnet", Peer::Field(&["SubnetId"]), "hosts", "network");

// ---------------------------------------------------------------------------
// Global services
// ---------------------------------------------------------------------------

const IAM_POLICY: KindSpec = KindSpec {
    kind: "iam-policy",
    prefix: "iam-policy",
    service: "iam",
    field: "attached_policies",
    id: IdRule::FirstOf(&[&["PolicyArn"], &["PolicyName"]]),
    label: LabelRule::field(&["PolicyName"]),
    ..BASE
};

const IAM_USER: KindSpec = KindSpec {
    kind: "iam-user",
    prefix: "iam-user",
    service: "iam",
    field: "users",
    id: IdRule::FirstOf(&[&["UserId"], &["UserName"]]),
    label: LabelRule::field(&["UserName"]),
    metadata: &[
        ("arn", Meta::Field(&["Arn"])),
        ("mfa_enabled", Meta::NonEmpty("mfa_devices")),
        (
            "active_keys",
            Meta::CountWhere {
                list: "access_keys",
                field: "Status",
                equals: "Active",
            },
        ),
    ],
    children: &[Child {
        spec: &IAM_POLICY,
        join: None,
        label: "attached",
        edge_type: "iam",
    }],
    ..BASE
};

const IAM_GROUP: KindSpec = KindSpec {
    kind: "iam-group",
    prefix: "iam-group",
    service: "iam",
    field: "groups",
    id: IdRule::FirstOf(&[&["GroupId"], &["GroupName"]]),
    label: LabelRule::field(&["GroupName"]),
    metadata: &[("arn", Meta::Field(&["Arn"]))],
    ..BASE
};

const IAM_ROLE: KindSpec = KindSpec {
    kind: "iam-role",
    prefix: "iam-role",
    service: "iam",
    field: "roles",
    id: IdRule::FirstOf(&[&["RoleId"], &["RoleName"]]),
    label: LabelRule::field(&["RoleName"]),
    metadata: &[("arn", Meta::Field(&["Arn"]))],
    hook: Some(index_role),
    ..BASE
};

const S3_BUCKET: KindSpec = KindSpec {
    kind: "s3-bucket",
    prefix: "s3",
    service: "s3",
    field: "buckets",
    id: IdRule::Field(&["Name"]),
    metadata: &[
        ("encryption", Meta::Derived(s3_encryption)),
        ("tags", Meta::Or(&["tagging"], Fallback::EmptyList)),
    ],
    ..BASE
};

const ROUTE53_RECORD: KindSpec = KindSpec {
    kind: "route53-record",
    prefix: "r53-rec",
    service: "route53",
    field: "record_sets",
    id: IdRule::Joined(&[&["Name"], &["Type"]], ":"),
    label: LabelRule::field(&["Name"]).with_detail(&["Type"], "", ""),
    metadata: &[("type", Meta::Field(&["Type"]))],
    hook: Some(alias_to_distribution),
    ..BASE
};

const ROUTE53_ZONE: KindSpec = KindSpec {
    kind: "route53-zone",
    prefix: "r53",
    service: "route53",
    field: "hosted_zones",
    id: IdRule::LastSegment(&["Id"], '/'),
    label: LabelRule::field(&["Name"]),
    children: &[Child {
        spec: &ROUTE53_RECORD,
        join: Some(":"),
        label: "contains",
        edge_type: "dns",
    }],
    ..BASE
};

const ORGANIZATION: KindSpec = KindSpec {
    kind: "organization",
    prefix: "org",
    service: "organizations",
    field: "organization",
    id: IdRule::Field(&["Id"]),
    metadata: &[
        ("master_account_id", Meta::Field(&["MasterAccountId"])),
        ("feature_set", Meta::Field(&["FeatureSet"])),
    ],
    ..BASE
};

const ORG_ACCOUNT: KindSpec = KindSpec {
    kind: "org-account",
    prefix: "account",
    service: "organizations",
    field: "accounts",
    id: IdRule::Field(&["Id"]),
    label: LabelRule::field(&["Name"]),
    metadata: &[
        ("email", Meta::Field(&["Email"])),
        ("status", Meta::Field(&["Status"])),
    ],
    hook: Some(account_in_organization),
    ..BASE
};

const CLOUDFRONT: KindSpec = KindSpec {
    kind: "cloudfront",
    prefix: "cf",
    service: "cloudfront",
    field: "distributions",
    id: IdRule::Field(&["Id"]),
    label: LabelRule::field(&["DomainName"]),
    metadata: &[("status", Meta::Field(&["Status"]))],
    hook: Some(origin_buckets),
    ..BASE
};

/// Global kinds in emission order: identity, storage, DNS, organization, CDN.
pub static GLOBAL_KINDS: &[KindSpec] = &[
    IAM_USER,
    IAM_GROUP,
    IAM_ROLE,
    S3_BUCKET,
    ROUTE53_ZONE,
    ORGANIZATION,
    ORG_ACCOUNT,
    CLOUDFRONT,
];

// ---------------------------------------------------------------------------
// Regional services
// ---------------------------------------------------------------------------

const VPC: KindSpec = KindSpec {
    kind: "vpc",
    prefix: "vpc",
    service: "ec2",
    field: "vpcs",
    id: IdRule::Field(&["VpcId"]),
    label: LabelRule::NAME_TAG.with_detail(&["CidrBlock"], "", ""),
    metadata: &[
        ("cidr", Meta::Field(&["CidrBlock"])),
        ("state", Meta::Field(&["State"])),
    ],
    ..BASE
};

const SUBNET: KindSpec = KindSpec {
    kind: "subnet",
    prefix: "subnet",
    service: "ec2",
    field: "subnets",
    id: IdRule::Field(&["SubnetId"]),
    label: LabelRule::NAME_TAG.with_detail(&["CidrBlock"], "", ""),
    metadata: &[
        ("az", Meta::Field(&["AvailabilityZone"])),
        ("cidr", Meta::Field(&["CidrBlock"])),
        ("public", Meta::Or(&["MapPublicIpOnLaunch"], Fallback::False)),
    ],
    links: &[VPC_CONTAINS],
    hook: Some(track_subnet),
    ..BASE
};

const SECURITY_GROUP: KindSpec = KindSpec {
    kind: "security-group",
    prefix: "sg",
    service: "ec2",
    field: "security_groups",
    id: IdRule::Field(&["GroupId"]),
    label: LabelRule::field(&["GroupName"]),
    metadata: &[
        ("vpc", Meta::Field(&["VpcId"])),
        ("rules", Meta::Derived(ingress_rule_summary)),
    ],
    links: &[VPC_CONTAINS],
    hook: Some(track_security_group),
    ..BASE
};

const INTERNET_GATEWAY: KindSpec = KindSpec {
    kind: "internet-gateway",
    prefix: "igw",
    service: "ec2",
    field: "internet_gateways",
    id: IdRule::Field(&["InternetGatewayId"]),
    label: LabelRule::NAME_TAG,
    links: &[Link::incoming(
        "vpc",
        Peer::Each(&["Attachments"], "VpcId"),
        "attached",
        "network",
    )],
    ..BASE
};

const NAT_GATEWAY: KindSpec = KindSpec {
    kind: "nat-gateway",
    prefix: "nat",
    service: "ec2",
    field: "nat_gateways",
    id: IdRule::Field(&["NatGatewayId"]),
    label: LabelRule::NAME_TAG,
    metadata: &[("state", Meta::Field(&["State"]))],
    links: &[IN_SUBNET, VPC_CONTAINS],
    ..BASE
};

const EC2_INSTANCE: KindSpec = KindSpec {
    kind: "ec2-instance",
    prefix: "ec2",
    service: "ec2",
    field: "instances",
    nested: Some("Instances"),
    id: IdRule::Field(&["InstanceId"]),
    label: LabelRule::NAME_TAG,
    metadata: &[
        ("instance_type", Meta::Field(&["InstanceType"])),
        ("state", Meta::Or(&["State", "Name"], Fallback::Str("unknown"))),
        ("private_ip", Meta::Field(&["PrivateIpAddress"])),
        ("public_ip", Meta::Field(&["PublicIpAddress"])),
        ("vpc", Meta::Field(&["VpcId"])),
        ("subnet", Meta::Field(&["SubnetId"])),
    ],
    links: &[
        IN_SUBNET,
        Link::outgoing("sg", Peer::Each(&["SecurityGroups"], "GroupId"), "member-of", "security"),
    ],
    hook: Some(track_instance),
    ..BASE
};

const VPC_PEERING: KindSpec = KindSpec {
    kind: "vpc-peering",
    prefix: "pcx",
    service: "ec2",
    field: "vpc_peering_connections",
    id: IdRule::Field(&["VpcPeeringConnectionId"]),
    metadata: &[("status", Meta::Or(&["Status", "Code"], Fallback::Str("unknown")))],
    links: &[
        Link::incoming("vpc", Peer::Field(&["RequesterVpcInfo", "VpcId"]), "requester", "network"),
        Link::incoming("vpc", Peer::Field(&["AccepterVpcInfo", "VpcId"]), "accepter", "network"),
    ],
    ..BASE
};

const ELASTIC_IP: KindSpec = KindSpec {
    kind: "elastic-ip",
    prefix: "eip",
    service: "ec2",
    field: "elastic_ips",
    id: IdRule::FirstOf(&[&["AllocationId"], &["PublicIp"]]),
    label: LabelRule::field(&["PublicIp"]),
    links: &[Link::outgoing("ec2", Peer::Field(&["InstanceId"]), "associated", "network")],
    ..BASE
};

const EBS_VOLUME: KindSpec = KindSpec {
    kind: "ebs-volume",
    prefix: "ebs",
    service: "ec2",
    field: "volumes",
    id: IdRule::Field(&["VolumeId"]),
    label: LabelRule::NAME_TAG.with_detail(&["Size"], "?", "GB"),
    metadata: &[
        ("size_gb", Meta::Field(&["Size"])),
        ("state", Meta::Field(&["State"])),
    ],
    links: &[Link::incoming(
        "ec2",
        Peer::Each(&["Attachments"], "InstanceId"),
        "attached",
        "storage",
    )],
    ..BASE
};

const RDS_INSTANCE: KindSpec = KindSpec {
    kind: "rds-instance",
    prefix: "rds",
    service: "rds",
    field: "db_instances",
    id: IdRule::Field(&["DBInstanceIdentifier"]),
    label: LabelRule::NAME_TAG,
    metadata: &[
        ("engine", Meta::Field(&["Engine"])),
        ("class", Meta::Field(&["DBInstanceClass"])),
        ("status", Meta::Field(&["DBInstanceStatus"])),
        ("endpoint", Meta::Field(&["Endpoint", "Address"])),
        ("port", Meta::Field(&["Endpoint", "Port"])),
        ("multi_az", Meta::Field(&["MultiAZ"])),
        ("encrypted", Meta::Field(&["StorageEncrypted"])),
    ],
    links: &[
        Link::incoming("vpc", Peer::Field(&["DBSubnetGroup", "VpcId"]), "hosts", "network"),
        Link::outgoing(
            "sg",
            Peer::Each(&["VpcSecurityGroups"], "VpcSecurityGroupId"),
            "member-of",
            "security",
        ),
    ],
    ..BASE
};

const RDS_CLUSTER: KindSpec = KindSpec {
    kind: "rds-cluster",
    prefix: "rds-cluster",
    service: "rds",
    field: "db_clusters",
    id: IdRule::Field(&["DBClusterIdentifier"]),
    label: LabelRule::NAME_TAG,
    metadata: &[
        ("engine", Meta::Field(&["Engine"])),
        ("status", Meta::Field(&["Status"])),
    ],
    links: &[Link::incoming(
        "rds",
        Peer::Each(&["DBClusterMembers"], "DBInstanceIdentifier"),
        "member-of",
        "database",
    )],
    ..BASE
};

const LAMBDA_FUNCTION: KindSpec = KindSpec {
    kind: "lambda-function",
    prefix: "lambda",
    service: "lambda",
    field: "functions",
    id: IdRule::Field(&["FunctionName"]),
    metadata: &[
        ("runtime", Meta::Field(&["Runtime"])),
        ("vpc", Meta::Field(&["VpcConfig", "VpcId"])),
        ("memory", Meta::Field(&["MemorySize"])),
    ],
    links: &[
        Link::incoming("subnet", Peer::Strings(&["VpcConfig", "SubnetIds"]), "hosts", "network")
            .when(&["VpcConfig", "VpcId"]),
        Link::outgoing("sg", Peer::Strings(&["VpcConfig", "SecurityGroupIds"]), "member-of", "security")
            .when(&["VpcConfig", "VpcId"]),
    ],
    hook: Some(assume_role),
    ..BASE
};

const ECS_SERVICE: KindSpec = KindSpec {
    kind: "ecs-service",
    prefix: "ecs-svc",
    service: "ecs",
    field: "services",
    id: IdRule::Field(&["serviceName"]),
    label: LabelRule::field(&["serviceName"]),
    metadata: &[
        ("launch_type", Meta::Field(&["launchType"])),
        ("desired", Meta::Field(&["desiredCount"])),
        ("running", Meta::Field(&["runningCount"])),
    ],
    links: &[
        Link::incoming(
            "subnet",
            Peer::Strings(&["networkConfiguration", "awsvpcConfiguration", "subnets"]),
            "hosts",
            "network",
        ),
        Link::outgoing(
            "sg",
            Peer::Strings(&["networkConfiguration", "awsvpcConfiguration", "securityGroups"]),
            "member-of",
            "security",
        ),
    ],
    ..BASE
};

const ECS_CLUSTER: KindSpec = KindSpec {
    kind: "ecs-cluster",
    prefix: "ecs-cluster",
    service: "ecs",
    field: "clusters",
    id: IdRule::Field(&["clusterName"]),
    metadata: &[
        ("status", Meta::Field(&["status"])),
        ("running_tasks", Meta::Field(&["runningTasksCount"])),
    ],
    children: &[Child {
        spec: &ECS_SERVICE,
        join: Some("/"),
        label: "runs",
        edge_type: "compute",
    }],
    ..BASE
};

const EKS_CLUSTER: KindSpec = KindSpec {
    kind: "eks-cluster",
    prefix: "eks",
    service: "eks",
    field: "clusters",
    id: IdRule::Field(&["name"]),
    metadata: &[
        ("status", Meta::Field(&["status"])),
        ("version", Meta::Field(&["version"])),
    ],
    links: &[Link::incoming(
        "vpc",
        Peer::Field(&["resourcesVpcConfig", "vpcId"]),
        "hosts",
        "network",
    )],
    ..BASE
};

const LOAD_BALANCER: KindSpec = KindSpec {
    kind: "load-balancer",
    prefix: "alb",
    service: "elb",
    field: "load_balancers_v2",
    id: IdRule::Field(&["LoadBalancerName"]),
    label: LabelRule::LOCAL_ID.with_detail(&["Type"], "alb", ""),
    metadata: &[
        ("dns", Meta::Field(&["DNSName"])),
        ("type", Meta::Field(&["Type"])),
        ("state", Meta::Field(&["State", "Code"])),
    ],
    links: &[
        IN_VPC,
        Link::outgoing("sg", Peer::Strings(&["SecurityGroups"]), "member-of", "security"),
        Link::incoming("subnet", Peer::Each(&["AvailabilityZones"], "SubnetId"), "hosts", "network"),
    ],
    hook: Some(index_load_balancer),
    ..BASE
};

const TARGET_GROUP: KindSpec = KindSpec {
    kind: "target-group",
    prefix: "tg",
    service: "elb",
    field: "target_groups",
    id: IdRule::Field(&["TargetGroupName"]),
    metadata: &[
        ("protocol", Meta::Field(&["Protocol"])),
        ("port", Meta::Field(&["Port"])),
        ("target_type", Meta::Field(&["TargetType"])),
    ],
    hook: Some(route_from_load_balancers),
    ..BASE
};

const AUTOSCALING_GROUP: KindSpec = KindSpec {
    kind: "autoscaling-group",
    prefix: "asg",
    service: "autoscaling",
    field: "auto_scaling_groups",
    id: IdRule::Field(&["AutoScalingGroupName"]),
    metadata: &[
        ("min", Meta::Field(&["MinSize"])),
        ("max", Meta::Field(&["MaxSize"])),
        ("desired", Meta::Field(&["DesiredCapacity"])),
    ],
    links: &[
        Link::incoming("subnet", Peer::Delimited(&["VPCZoneIdentifier"], ','), "hosts", "network"),
        Link::outgoing("ec2", Peer::Each(&["Instances"], "InstanceId"), "manages", "compute"),
    ],
    hook: Some(register_with_target_groups),
    ..BASE
};

const DYNAMODB_TABLE: KindSpec = KindSpec {
    kind: "dynamodb-table",
    prefix: "ddb",
    service: "dynamodb",
    field: "tables",
    id: IdRule::Field(&["TableName"]),
    metadata: &[
        ("status", Meta::Field(&["TableStatus"])),
        ("item_count", Meta::Field(&["ItemCount"])),
    ],
    ..BASE
};

const SQS_QUEUE: KindSpec = KindSpec {
    kind: "sqs-queue",
    prefix: "sqs",
    service: "sqs",
    field: "queues",
    id: IdRule::LastSegment(&["url"], '/'),
    metadata: &[("messages", Meta::Field(&["attributes", "ApproximateNumberOfMessages"]))],
    ..BASE
};

const SNS_TOPIC: KindSpec = KindSpec {
    kind: "sns-topic",
    prefix: "sns",
    service: "sns",
    field: "topics",
    id: IdRule::LastSegment(&["TopicArn"], ':'),
    label: LabelRule::field(&["attributes", "DisplayName"]),
    ..BASE
};

const SECRET: KindSpec = KindSpec {
    kind: "secret",
    prefix: "secret",
    service: "secrets_manager",
    field: "secrets",
    id: IdRule::Field(&["Name"]),
    ..BASE
};

const KMS_KEY: KindSpec = KindSpec {
    kind: "kms-key",
    prefix: "kms",
    service: "kms",
    field: "keys",
    id: IdRule::Field(&["KeyId"]),
    label: LabelRule::field(&["Description"]),
    metadata: &[("state", Meta::Field(&["KeyState"]))],
    ..BASE
};

const CFN_STACK: KindSpec = KindSpec {
    kind: "cfn-stack",
    prefix: "cfn",
    service: "cloudformation",
    field: "stacks",
    id: IdRule::Field(&["StackName"]),
    metadata: &[("status", Meta::Field(&["StackStatus"]))],
    ..BASE
};

const API_GATEWAY: KindSpec = KindSpec {
    kind: "api-gateway",
    prefix: "apigw",
    service: "api_gateway",
    field: "rest_apis",
    id: IdRule::Field(&["id"]),
    label: LabelRule::field(&["name"]),
    ..BASE
};

const ACM_CERTIFICATE: KindSpec = KindSpec {
    kind: "acm-cert",
    prefix: "acm",
    service: "acm",
    field: "certificates",
    id: IdRule::FirstOf(&[&["DomainName"], &["CertificateArn"]]),
    metadata: &[("status", Meta::Field(&["Status"]))],
    ..BASE
};

const CLOUDTRAIL: KindSpec = KindSpec {
    kind: "cloudtrail",
    prefix: "trail",
    service: "cloudtrail",
    field: "trails",
    id: IdRule::Field(&["Name"]),
    metadata: &[("multi_region", Meta::Field(&["IsMultiRegionTrail"]))],
    hook: Some(trail_bucket),
    ..BASE
};

const ELASTICACHE_CLUSTER: KindSpec = KindSpec {
    kind: "elasticache-cluster",
    prefix: "ecache",
    service: "elasticache",
    field: "clusters",
    id: IdRule::Field(&["CacheClusterId"]),
    metadata: &[
        ("engine", Meta::Field(&["Engine"])),
        ("status", Meta::Field(&["CacheClusterStatus"])),
    ],
    links: &[Link::outgoing(
        "sg",
        Peer::Each(&["SecurityGroups"], "SecurityGroupId"),
        "member-of",
        "security",
    )],
    ..BASE
};

const EFS: KindSpec = KindSpec {
    kind: "efs",
    prefix: "efs",
    service: "efs",
    field: "file_systems",
    id: IdRule::Field(&["FileSystemId"]),
    label: LabelRule::field(&["Name"]),
    ..BASE
};

const ECR_REPOSITORY: KindSpec = KindSpec {
    kind: "ecr-repository",
    prefix: "ecr",
    service: "ecr",
    field: "repositories",
    id: IdRule::Field(&["repositoryName"]),
    metadata: &[
        ("uri", Meta::Field(&["repositoryUri"])),
        ("images", Meta::Len("images")),
    ],
    ..BASE
};

const KINESIS_STREAM: KindSpec = KindSpec {
    kind: "kinesis-stream",
    prefix: "kinesis",
    service: "kinesis",
    field: "streams",
    id: IdRule::Field(&["StreamName"]),
    metadata: &[
        ("status", Meta::Field(&["StreamStatus"])),
        ("shards", Meta::Len("Shards")),
    ],
    ..BASE
};

const STATE_MACHINE: KindSpec = KindSpec {
    kind: "state-machine",
    prefix: "sfn",
    service: "step_functions",
    field: "state_machines",
    id: IdRule::Field(&["name"]),
    metadata: &[
        ("arn", Meta::Field(&["stateMachineArn"])),
        ("type", Meta::Field(&["type"])),
    ],
    ..BASE
};

const REDSHIFT_CLUSTER: KindSpec = KindSpec {
    kind: "redshift-cluster",
    prefix: "redshift",
    service: "redshift",
    field: "clusters",
    id: IdRule::Field(&["ClusterIdentifier"]),
    label: LabelRule::NAME_TAG,
    metadata: &[
        ("node_type", Meta::Field(&["NodeType"])),
        ("status", Meta::Field(&["ClusterStatus"])),
        ("encrypted", Meta::Field(&["Encrypted"])),
    ],
    links: &[
        IN_VPC,
        Link::outgoing(
            "sg",
            Peer::Each(&["VpcSecurityGroups"], "VpcSecurityGroupId"),
            "member-of",
            "security",
        ),
    ],
    ..BASE
};

const OPENSEARCH_DOMAIN: KindSpec = KindSpec {
    kind: "opensearch-domain",
    prefix: "opensearch",
    service: "opensearch",
    field: "domains",
    id: IdRule::Field(&["DomainName"]),
    metadata: &[
        ("engine_version", Meta::Field(&["EngineVersion"])),
        ("endpoint", Meta::Field(&["Endpoint"])),
    ],
    links: &[
        Link::incoming("vpc", Peer::Field(&["VPCOptions", "VPCId"]), "hosts", "network"),
        Link::incoming("subnet", Peer::Strings(&["VPCOptions", "SubnetIds"]), "hosts", "network"),
        Link::outgoing(
            "sg",
            Peer::Strings(&["VPCOptions", "SecurityGroupIds"]),
            "member-of",
            "security",
        ),
    ],
    ..BASE
};

/// Regional kinds in emission order. Networks, subnets and security groups
/// come first so that edges from the resources placed in them read naturally.
pub static REGIONAL_KINDS: &[KindSpec] = &[
    VPC,
    SUBNET,
    SECURITY_GROUP,
    INTERNET_GATEWAY,
    NAT_GATEWAY,
    EC2_INSTANCE,
    VPC_PEERING,
    ELASTIC_IP,
    EBS_VOLUME,
    RDS_INSTANCE,
    RDS_CLUSTER,
    LAMBDA_FUNCTION,
    ECS_CLUSTER,
    EKS_CLUSTER,
    LOAD_BALANCER,
    TARGET_GROUP,
    AUTOSCALING_GROUP,
    DYNAMODB_TABLE,
    SQS_QUEUE,
    SNS_TOPIC,
    SECRET,
    KMS_KEY,
    CFN_STACK,
    API_GATEWAY,
    ACM_CERTIFICATE,
    CLOUDTRAIL,
    ELASTICACHE_CLUSTER,
    EFS,
    ECR_REPOSITORY,
    KINESIS_STREAM,
    STATE_MACHINE,
    REDSHIFT_CLUSTER,
    OPENSEARCH_DOMAIN,
];

// ---------------------------------------------------------------------------
// Derived metadata
// ---------------------------------------------------------------------------

fn s3_encryption(record: Record<'_>) -> Value {
    let Some(Value::Object(config)) = record.get("encryption") else {
        return Value::from("none");
    };
    let rules = Record::new(config).list_at(&["ServerSideEncryptionConfiguration", "Rules"]);
    let algorithm = match rules.first() {
        None => "none",
        Some(rule) => Record::from_value(rule)
            .and_then(|r| r.str_at(&["ApplyServerSideEncryptionByDefault", "SSEAlgorithm"]))
            .unwrap_or("unknown"),
    };
    Value::from(algorithm)
}

/// `"<proto>:<ports> from <source>"` for every ingress source.
fn ingress_rule_summary(record: Record<'_>) -> Value {
    let mut lines = Vec::new();
    for rule in IpPermission::parse_list(record.list_at(&["IpPermissions"])) {
        let (protocol, ports) = rule.protocol_and_ports();
        for range in &rule.ip_ranges {
            let source = range.cidr.as_deref().unwrap_or("?");
            lines.push(Value::from(format!("{protocol}:{ports} from {source}")));
        }
        for pair in &rule.group_pairs {
            let source = pair.group_id.as_deref().unwrap_or("?");
            lines.push(Value::from(format!("{protocol}:{ports} from {source}")));
        }
    }
    Value::Array(lines)
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

fn index_role<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    if let Some(arn) = v.record.str("Arn") {
        b.roles_by_arn.entry(arn).or_default().push(v.node_id.clone());
    }
}

/// Exact ARN match between a function's execution role and collected roles.
fn assume_role<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    let Some(role_arn) = v.record.str("Role") else {
        return;
    };
    let roles = b.roles_by_arn.get(role_arn).cloned().unwrap_or_default();
    for role in roles {
        b.add_edge(&v.node_id, &role, "assumes", "iam");
    }
}

fn track_subnet<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    let vpc = v.record.str("VpcId").map(str::to_string);
    b.refs.subnet_vpc.insert(v.local_id.clone(), vpc);
}

fn track_security_group<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    let vpc = v.record.str("VpcId").map(str::to_string);
    b.refs.sg_vpc.insert(v.local_id.clone(), vpc);
    for rule in IpPermission::parse_list(v.record.list_at(&["IpPermissions"])) {
        for peer in rule.peer_groups() {
            b.refs.add_inbound_peer(&v.local_id, peer);
        }
    }
}

fn track_instance<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    let groups = Peer::Each(&["SecurityGroups"], "GroupId").ids(v.record);
    b.refs.instance_sgs.insert(v.local_id.clone(), groups);
}

fn alias_to_distribution<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    let Some(alias) = v.record.str_at(&["AliasTarget", "DNSName"]) else {
        return;
    };
    let distributions = b
        .doc()
        .global("cloudfront")
        .map(|cf| skymap_inventory::list_field(cf, "distributions"))
        .unwrap_or(&[]);
    for dist in distributions.iter().filter_map(Record::from_value) {
        let (Some(domain), Some(id)) = (dist.str("DomainName"), dist.text_at(&["Id"])) else {
            continue;
        };
        if alias_matches_distribution(alias, domain) {
            b.add_edge(&v.node_id, &node_id("cf", &id), "alias-to", "dns");
        }
    }
}

fn origin_buckets<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    for origin in v.record.records_at(&["Origins", "Items"]) {
        if let Some(bucket) = origin.str("DomainName").and_then(s3_origin_bucket) {
            b.defer_edge(&v.node_id, &node_id("s3", bucket), "origin", "cdn");
        }
    }
}

fn trail_bucket<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    if let Some(bucket) = v.record.str("S3BucketName") {
        b.defer_edge(&v.node_id, &node_id("s3", bucket), "logs-to", "logging");
    }
}

/// Account ARNs embed their organization: `...:account/o-xxxx/<account-id>`.
fn account_in_organization<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    let org = v
        .record
        .str("Arn")
        .and_then(|arn| arn.rsplit('/').nth(1))
        .filter(|org| org.starts_with("o-"));
    if let Some(org) = org {
        b.add_edge(&node_id("org", org), &v.node_id, "contains", "organization");
    }
}

fn index_load_balancer<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    if let (Some(arn), Some(name)) = (v.record.str("LoadBalancerArn"), v.record.str("LoadBalancerName")) {
        b.lb_names.entry((v.region, arn)).or_default().push(name);
    }
}

fn route_from_load_balancers<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    if let Some(arn) = v.record.str("TargetGroupArn") {
        b.tg_ids.entry((v.region, arn)).or_insert_with(|| v.node_id.clone());
    }
    for lb_arn in v.record.strings_at(&["LoadBalancerArns"]) {
        let names = b.lb_names.get(&(v.region, lb_arn)).cloned().unwrap_or_default();
        for name in names {
            b.add_edge(&node_id("alb", name), &v.node_id, "routes-to", "network");
        }
    }
}

fn register_with_target_groups<'a>(b: &mut GraphBuilder<'a>, v: &Visit<'a>) {
    for tg_arn in v.record.strings_at(&["TargetGroupARNs"]) {
        if let Some(tg) = b.tg_ids.get(&(v.region, tg_arn)).cloned() {
            b.add_edge(&v.node_id, &tg, "registers-with", "network");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    /// Every registered kind, children included.
    fn all_kinds() -> Vec<&'static KindSpec> {
        fn walk(spec: &'static KindSpec, out: &mut Vec<&'static KindSpec>) {
            out.push(spec);
            for child in spec.children {
                walk(child.spec, out);
            }
        }
        let mut out = Vec::new();
        for spec in GLOBAL_KINDS.iter().chain(REGIONAL_KINDS.iter()) {
            walk(spec, &mut out);
        }
        out
    }

    fn spec_for(kind: &str) -> Option<&'static KindSpec> {
        all_kinds().into_iter().find(|spec| spec.kind == kind)
    }

    #[test]
    fn kinds_and_prefixes_are_unique() {
        let kinds = all_kinds();
        let names: BTreeSet<_> = kinds.iter().map(|k| k.kind).collect();
        let prefixes: BTreeSet<_> = kinds.iter().map(|k| k.prefix).collect();
        assert_eq!(names.len(), kinds.len());
        assert_eq!(prefixes.len(), kinds.len());
        assert!(spec_for("route53-record").is_some());
        assert!(spec_for("error").is_none());
    }

    #[test]
    fn containers_precede_their_members() {
        let pos = |kind: &str| REGIONAL_KINDS.iter().position(|k| k.kind == kind).unwrap();
        for member in ["ec2-instance", "rds-instance", "lambda-function", "load-balancer", "ecs-cluster"] {
            assert!(pos("vpc") < pos(member));
            assert!(pos("subnet") < pos(member));
            assert!(pos("security-group") < pos(member));
        }
        assert!(pos("load-balancer") < pos("target-group"));
        assert!(pos("target-group") < pos("autoscaling-group"));
    }

    #[test]
    fn metadata_rules() {
        let user = json!({
            "UserName": "alice",
            "mfa_devices": [],
            "access_keys": [{ "Status": "Active" }, { "Status": "Inactive" }, { "Status": "Active" }]
        });
        let r = Record::from_value(&user).unwrap();
        assert_eq!(Meta::NonEmpty("mfa_devices").eval(r), json!(false));
        assert_eq!(
            Meta::CountWhere {
                list: "access_keys",
                field: "Status",
                equals: "Active"
            }
            .eval(r),
            json!(2)
        );
        assert_eq!(Meta::Field(&["Arn"]).eval(r), Value::Null);
        assert_eq!(Meta::Or(&["State", "Name"], Fallback::Str("unknown")).eval(r), json!("unknown"));
    }

    #[test]
    fn bucket_encryption_summary() {
        let plain = json!({ "Name": "a", "encryption": {} });
        let kms = json!({
            "Name": "b",
            "encryption": { "ServerSideEncryptionConfiguration": { "Rules": [
                { "ApplyServerSideEncryptionByDefault": { "SSEAlgorithm": "aws:kms" } }
            ] } }
        });
        let odd = json!({ "Name": "c", "encryption": { "ServerSideEncryptionConfiguration": { "Rules": [{}] } } });
        let denied = json!({ "Name": "d", "encryption": [] });
        let enc = |v: &Value| s3_encryption(Record::from_value(v).unwrap());
        assert_eq!(enc(&plain), json!("none"));
        assert_eq!(enc(&kms), json!("aws:kms"));
        assert_eq!(enc(&odd), json!("unknown"));
        assert_eq!(enc(&denied), json!("none"));
    }

    #[test]
    fn ingress_summary_lists_every_source() {
        let sg = json!({
            "GroupId": "sg-2",
            "IpPermissions": [
                { "IpProtocol": "tcp", "FromPort": 443, "ToPort": 443, "IpRanges": [{ "CidrIp": "0.0.0.0/0" }] },
                { "IpProtocol": "-1", "UserIdGroupPairs": [{ "GroupId": "sg-1" }] }
            ]
        });
        let summary = ingress_rule_summary(Record::from_value(&sg).unwrap());
        assert_eq!(summary, json!(["tcp:443 from 0.0.0.0/0", "all:all from sg-1"]));
    }

    #[test]
    fn delimited_and_nested_peers() {
        let asg = json!({ "VPCZoneIdentifier": "subnet-1, subnet-2,", "Instances": [{ "InstanceId": "i-1" }, {}] });
        let r = Record::from_value(&asg).unwrap();
        assert_eq!(
            Peer::Delimited(&["VPCZoneIdentifier"], ',').ids(r),
            vec!["subnet-1", "subnet-2"]
        );
        assert_eq!(Peer::Each(&["Instances"], "InstanceId").ids(r), vec!["i-1"]);
    }
}
