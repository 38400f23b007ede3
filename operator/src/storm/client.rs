use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StormError {
    #[error("topology not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    NotAlive(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl StormError {
    /// Both "not found" and "not alive" are benign-absence sentinels a
    /// reconciler may treat as success on deletion/post-kill paths.
    pub fn is_absence(&self) -> bool {
        matches!(self, StormError::NotFound(_) | StormError::NotAlive(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClusterInfo {
    pub supervisors: i32,
    pub slots_total: i32,
    pub slots_used: i32,
    pub slots_free: i32,
    pub topologies: i32,
    pub nimbus_leader: Option<String>,
    pub nimbus_hosts: Vec<String>,
    pub version: Option<String>,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyStatus {
    Active,
    Inactive,
    Rebalancing,
    Killed,
    Other(String),
}

impl From<&str> for TopologyStatus {
    fn from(s: &str) -> Self {
        match s {
            "ACTIVE" => TopologyStatus::Active,
            "INACTIVE" => TopologyStatus::Inactive,
            "REBALANCING" => TopologyStatus::Rebalancing,
            "KILLED" => TopologyStatus::Killed,
            other => TopologyStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopologySummary {
    pub id: String,
    pub name: String,
    pub status: TopologyStatus,
    pub workers: i32,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone)]
pub struct TopologyDetail {
    pub id: String,
    pub status: TopologyStatus,
    pub workers: i32,
    pub executors: i32,
    pub tasks: i32,
    pub uptime_secs: i64,
}

/// Options accepted by `RebalanceTopology`; all optional, Storm defaults
/// apply when absent.
#[derive(Debug, Clone, Default)]
pub struct RebalanceOptions {
    pub wait_secs: Option<u32>,
    pub num_workers: Option<i32>,
    pub num_executors: Option<BTreeMap<String, i32>>,
}

/// Abstraction over Storm's control plane. Implementations talk either to
/// the UI's REST API or to Nimbus's native Thrift/RPC endpoint; reconcilers
/// never know which.
#[async_trait]
pub trait StormClient: Send + Sync {
    async fn get_cluster_info(&self) -> Result<ClusterInfo, StormError>;

    async fn list_topologies(&self) -> Result<Vec<TopologySummary>, StormError>;

    async fn get_topology(&self, name: &str) -> Result<TopologyDetail, StormError>;

    async fn submit_topology(
        &self,
        name: &str,
        jar_path: &str,
        main_class: &str,
        args: &[String],
        config: &BTreeMap<String, String>,
    ) -> Result<(), StormError>;

    async fn kill_topology(&self, name: &str, wait_secs: u32) -> Result<(), StormError>;

    async fn activate_topology(&self, name: &str) -> Result<(), StormError>;

    async fn deactivate_topology(&self, name: &str) -> Result<(), StormError>;

    async fn rebalance_topology(
        &self,
        name: &str,
        options: RebalanceOptions,
    ) -> Result<(), StormError>;

    async fn get_cluster_configuration(&self) -> Result<BTreeMap<String, String>, StormError>;

    async fn upload_jar(&self, local_path: &str) -> Result<String, StormError>;

    async fn download_jar(&self, url: &str, dest_path: &str) -> Result<(), StormError>;

    async fn close(&self) -> Result<(), StormError>;
}
