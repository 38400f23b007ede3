use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::condition::condition_list_schema;

/// How the operator relates to a cluster's child Kubernetes objects.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub enum ManagementMode {
    /// The operator owns and mutates the Nimbus/Supervisor/UI objects.
    #[default]
    Create,
    /// The operator only observes externally-owned objects named in
    /// `resourceNames`; it never creates or patches them.
    Reference,
}

/// Externally-owned resource names used in [`ManagementMode::Reference`] mode.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceResourceNames {
    pub nimbus_stateful_set: Option<String>,
    pub supervisor_deployment: Option<String>,
    pub ui_deployment: Option<String>,
    pub nimbus_service: Option<String>,
    pub ui_service: Option<String>,
    pub config_map: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZookeeperSpec {
    /// `host:port` pairs of the coordination service. Never provisioned by
    /// this operator; the cluster it points to is assumed to already exist.
    pub servers: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default = "default_one")]
    pub replicas: i32,
}

fn default_one() -> i32 {
    1
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "storm.stormop.io",
    version = "v1",
    kind = "Cluster",
    plural = "clusters",
    derive = "PartialEq",
    status = "ClusterStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.totalSlots\", \"name\": \"SLOTS\", \"type\": \"integer\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub management_mode: ManagementMode,

    /// Names of pre-existing child objects when `managementMode: reference`.
    #[serde(default)]
    pub resource_names: Option<ReferenceResourceNames>,

    /// Container image coordinates shared by Nimbus/Supervisor/UI, e.g. `apache/storm:2.6.0`.
    pub image: String,

    #[serde(default)]
    pub nimbus: ComponentSpec,

    #[serde(default)]
    pub supervisor: ComponentSpec,

    /// Number of worker slots advertised per supervisor replica.
    #[serde(default = "default_slots_per_supervisor")]
    pub slots_per_supervisor: i32,

    #[serde(default)]
    pub ui: Option<ComponentSpec>,

    pub zookeeper: ZookeeperSpec,

    /// Arbitrary key-value Storm config overrides, merged into `storm.yaml`.
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Whether Nimbus should request a `PersistentVolumeClaim` for its data dir.
    #[serde(default)]
    pub nimbus_persistence: Option<NimbusPersistence>,
}

fn default_slots_per_supervisor() -> i32 {
    4
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NimbusPersistence {
    pub storage_class: Option<String>,
    #[serde(default = "default_storage_size")]
    pub size: String,
}

fn default_storage_size() -> String {
    "10Gi".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEndpoints {
    pub nimbus: Option<String>,
    pub ui: Option<String>,
    #[serde(rename = "restApi")]
    pub rest_api: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub phase: ClusterPhase,

    pub message: Option<String>,

    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<String>,

    #[serde(default)]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub nimbus_ready: i32,

    #[serde(default)]
    pub supervisor_ready: i32,

    #[serde(default)]
    pub ui_ready: i32,

    #[serde(default)]
    pub total_slots: i32,

    #[serde(default)]
    pub used_slots: i32,

    #[serde(default)]
    pub free_slots: i32,

    #[serde(default)]
    pub topology_count: i32,

    #[serde(default)]
    pub endpoints: ClusterEndpoints,

    #[serde(default)]
    #[schemars(schema_with = "condition_list_schema")]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default, Hash)]
pub enum ClusterPhase {
    #[default]
    Unknown,
    Pending,
    Creating,
    Running,
    Updating,
    Failed,
    Terminating,
}

impl FromStr for ClusterPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(Self::Unknown),
            "Pending" => Ok(Self::Pending),
            "Creating" => Ok(Self::Creating),
            "Running" => Ok(Self::Running),
            "Updating" => Ok(Self::Updating),
            "Failed" => Ok(Self::Failed),
            "Terminating" => Ok(Self::Terminating),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Pending => "Pending",
            Self::Creating => "Creating",
            Self::Running => "Running",
            Self::Updating => "Updating",
            Self::Failed => "Failed",
            Self::Terminating => "Terminating",
        };
        write!(f, "{s}")
    }
}

pub const CLUSTER_FINALIZER: &str = "storm.apache.org/stormcluster-finalizer";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_round_trips_through_display_and_from_str() {
        for phase in [
            ClusterPhase::Unknown,
            ClusterPhase::Pending,
            ClusterPhase::Creating,
            ClusterPhase::Running,
            ClusterPhase::Updating,
            ClusterPhase::Failed,
            ClusterPhase::Terminating,
        ] {
            let parsed: ClusterPhase = phase.to_string().parse().unwrap();
            assert_eq!(parsed, phase);
        }
    }

    #[test]
    fn default_management_mode_is_create() {
        assert_eq!(ManagementMode::default(), ManagementMode::Create);
    }
}
