use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, ResourceRequirements, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::condition::condition_list_schema;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverride {
    pub name: String,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

/// Per-container overrides apply only to containers matching by name; pod-level
/// fields replace the underlying defaults wholesale.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateOverride {
    #[serde(default)]
    pub containers: Vec<ContainerOverride>,
    #[serde(default)]
    pub extra_containers: Vec<Container>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub affinity: Option<Affinity>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomMetric {
    pub name: String,
    #[serde(default = "default_target_value")]
    pub target_value: i32,
    /// `pods` or `external`; anything else is rejected at validation time.
    #[serde(default = "default_metric_kind")]
    pub kind: String,
}

fn default_target_value() -> i32 {
    100
}

fn default_metric_kind() -> String {
    "pods".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_replicas")]
    pub min_replicas: i32,
    #[serde(default = "default_max_replicas")]
    pub max_replicas: i32,
    /// Target CPU utilization percentage, e.g. `70`.
    pub target_cpu_utilization_percentage: Option<i32>,
    pub target_memory_utilization_percentage: Option<i32>,
    #[serde(default)]
    pub custom_metrics: Vec<CustomMetric>,
}

fn default_min_replicas() -> i32 {
    1
}

fn default_max_replicas() -> i32 {
    10
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPortRange {
    #[serde(default = "default_port_start")]
    pub start: i32,
    #[serde(default = "default_port_count")]
    pub count: i32,
}

fn default_port_start() -> i32 {
    6700
}

fn default_port_count() -> i32 {
    1
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "storm.stormop.io",
    version = "v1",
    kind = "WorkerPool",
    plural = "workerpools",
    derive = "PartialEq",
    status = "WorkerPoolStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.readyReplicas\", \"name\": \"READY\", \"type\": \"integer\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolSpec {
    pub topology_name: String,

    #[serde(default = "default_one")]
    pub replicas: i32,

    #[serde(default)]
    pub autoscaling: AutoscalingSpec,

    #[serde(default)]
    pub pod_template: PodTemplateOverride,

    /// Joined space-separated into `STORM_WORKER_CHILDOPTS`.
    #[serde(default)]
    pub jvm_options: Vec<String>,

    pub image: Option<String>,

    #[serde(default)]
    pub worker_ports: WorkerPortRange,
}

fn default_one() -> i32 {
    1
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolStatus {
    pub phase: WorkerPoolPhase,

    pub message: Option<String>,

    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<String>,

    #[serde(default)]
    pub observed_generation: Option<i64>,

    pub deployment_name: Option<String>,

    pub autoscaler_name: Option<String>,

    #[serde(default)]
    pub desired_replicas: i32,

    #[serde(default)]
    pub ready_replicas: i32,

    #[serde(default)]
    pub available_replicas: i32,

    #[serde(default)]
    pub unavailable_replicas: i32,

    #[serde(default)]
    pub updated_replicas: i32,

    #[serde(default)]
    #[schemars(schema_with = "condition_list_schema")]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default, Hash)]
pub enum WorkerPoolPhase {
    #[default]
    Unknown,
    Pending,
    Creating,
    Ready,
    Scaling,
    Updating,
    Failed,
    Deleted,
}

impl fmt::Display for WorkerPoolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl FromStr for WorkerPoolPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Unknown" => Self::Unknown,
            "Pending" => Self::Pending,
            "Creating" => Self::Creating,
            "Ready" => Self::Ready,
            "Scaling" => Self::Scaling,
            "Updating" => Self::Updating,
            "Failed" => Self::Failed,
            "Deleted" => Self::Deleted,
            _ => return Err(()),
        })
    }
}

pub const WORKERPOOL_FINALIZER: &str = "storm.apache.org/workerpool-finalizer";

/// Label used on the pool's Deployment/Service selector. No other object
/// in the namespace may reuse this label value for a different pool.
pub fn workerpool_selector_label(name: &str) -> (String, String) {
    ("workerpool".to_string(), name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_label_matches_name() {
        let (k, v) = workerpool_selector_label("w1");
        assert_eq!(k, "workerpool");
        assert_eq!(v, "w1");
    }

    #[test]
    fn autoscaling_defaults_disabled_with_1_10_bounds() {
        let a = AutoscalingSpec::default();
        assert!(!a.enabled);
        assert_eq!(a.min_replicas, 1);
        assert_eq!(a.max_replicas, 10);
    }
}
