use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::condition::condition_list_schema;

/// The literal config key whose value drives rolling-replace semantics.
pub const TOPOLOGY_VERSION_KEY: &str = "topology.version";

/// Value used for `deployedVersion`/`topology.version` when the user never set one.
pub const UNVERSIONED: &str = "unversioned";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UrlJarSource {
    pub url: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub enum ExtractionMode {
    /// Copy the JAR out of the image's writable filesystem with a short-lived pod.
    #[default]
    CopyFromImageFilesystem,
    /// Use the image as an init container that copies the JAR into a shared volume.
    PullFromInitContainer,
    /// Run the image as a long-lived sidecar alongside the extraction job.
    Sidecar,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerJarSource {
    pub image: String,
    pub path: String,
    #[serde(default)]
    pub extraction_mode: ExtractionMode,
    /// Optional expected SHA-256 checksum of the extracted JAR.
    pub checksum: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapJarSource {
    pub name: String,
    pub key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretJarSource {
    pub name: String,
    pub key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreJarSource {
    pub bucket: String,
    pub key: String,
    pub endpoint: Option<String>,
    pub checksum: Option<String>,
}

/// Exactly one of these must be set — enforced by the Validating state, not by
/// the schema (a `oneOf` CRD schema is avoidable complexity none of this
/// operator's CRDs use).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JarSourceSpec {
    pub url: Option<UrlJarSource>,
    pub container: Option<ContainerJarSource>,
    pub config_map: Option<ConfigMapJarSource>,
    pub secret: Option<SecretJarSource>,
    pub object_store: Option<ObjectStoreJarSource>,
}

impl JarSourceSpec {
    /// Number of variants actually populated. Validation requires exactly 1.
    pub fn variant_count(&self) -> usize {
        [
            self.url.is_some(),
            self.container.is_some(),
            self.config_map.is_some(),
            self.secret.is_some(),
            self.object_store.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "storm.stormop.io",
    version = "v1",
    kind = "Topology",
    plural = "topologies",
    derive = "PartialEq",
    status = "TopologyStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.deployedVersion\", \"name\": \"VERSION\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct TopologySpec {
    /// Name of the Cluster this topology is submitted to, in the same namespace.
    pub cluster_name: String,

    /// Logical name as known to Storm. Must be unique within the cluster.
    pub name: String,

    pub main_class: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Key-value Storm config, e.g. `topology.version`, `topology.workers`.
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    #[serde(default)]
    pub jar_source: JarSourceSpec,

    #[serde(default)]
    pub suspend: bool,
}

impl TopologySpec {
    pub fn version(&self) -> String {
        self.config
            .get(TOPOLOGY_VERSION_KEY)
            .cloned()
            .unwrap_or_else(|| UNVERSIONED.to_string())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopologyStatus {
    pub phase: TopologyPhase,

    /// Fine-grained internal state-machine state (finer than `phase`).
    #[serde(default)]
    pub internal_state: TopologyState,

    pub message: Option<String>,

    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<String>,

    #[serde(default)]
    pub observed_generation: Option<i64>,

    /// Version most recently submitted to Storm.
    pub deployed_version: Option<String>,

    pub topology_id: Option<String>,

    #[serde(default)]
    pub workers: i32,

    #[serde(default)]
    pub executors: i32,

    #[serde(default)]
    pub tasks: i32,

    #[serde(default)]
    pub uptime_secs: i64,

    pub last_error: Option<String>,

    #[serde(default)]
    #[schemars(schema_with = "condition_list_schema")]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum TopologyPhase {
    #[default]
    Unknown,
    Pending,
    Validating,
    Downloading,
    Submitting,
    Running,
    Suspended,
    Updating,
    Killing,
    Killed,
    Failed,
}

impl fmt::Display for TopologyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl FromStr for TopologyPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Unknown" => Self::Unknown,
            "Pending" => Self::Pending,
            "Validating" => Self::Validating,
            "Downloading" => Self::Downloading,
            "Submitting" => Self::Submitting,
            "Running" => Self::Running,
            "Suspended" => Self::Suspended,
            "Updating" => Self::Updating,
            "Killing" => Self::Killing,
            "Killed" => Self::Killed,
            "Failed" => Self::Failed,
            _ => return Err(()),
        })
    }
}

/// Fine-grained internal states that drive the kernel directly; `TopologyPhase`
/// is the user-facing projection of this (see `stormop_operator::topologies::reconcile::to_phase`).
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default, Hash)]
pub enum TopologyState {
    #[default]
    Unknown,
    Pending,
    Validating,
    Downloading,
    Submitting,
    Running,
    Suspended,
    Updating,
    Killing,
    Killed,
    Failed,
}

pub const TOPOLOGY_FINALIZER: &str = "storm.apache.org/topology-finalizer";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_unversioned() {
        let spec = TopologySpec::default();
        assert_eq!(spec.version(), UNVERSIONED);
    }

    #[test]
    fn version_reads_config_key() {
        let mut spec = TopologySpec::default();
        spec.config
            .insert(TOPOLOGY_VERSION_KEY.to_string(), "v2".to_string());
        assert_eq!(spec.version(), "v2");
    }

    #[test]
    fn jar_source_variant_count() {
        let mut src = JarSourceSpec::default();
        assert_eq!(src.variant_count(), 0);
        src.url = Some(UrlJarSource {
            url: "https://example/foo.jar".to_string(),
        });
        assert_eq!(src.variant_count(), 1);
        src.container = Some(ContainerJarSource {
            image: "x".to_string(),
            path: "/y".to_string(),
            extraction_mode: ExtractionMode::default(),
            checksum: None,
        });
        assert_eq!(src.variant_count(), 2);
    }
}
