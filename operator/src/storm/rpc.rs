use async_trait::async_trait;
use std::collections::BTreeMap;

use super::client::{
    ClusterInfo, RebalanceOptions, StormClient, StormError, TopologyDetail, TopologySummary,
};

/// Placeholder for a native Nimbus Thrift client. The REST transport covers
/// every operation the reconcilers need today; this variant exists so
/// `ClientManager` can swap transports without reconcilers noticing, per the
/// two permitted transport variants.
pub struct RpcStormClient;

#[async_trait]
impl StormClient for RpcStormClient {
    async fn get_cluster_info(&self) -> Result<ClusterInfo, StormError> {
        Err(StormError::Unsupported("RPC transport not implemented"))
    }

    async fn list_topologies(&self) -> Result<Vec<TopologySummary>, StormError> {
        Err(StormError::Unsupported("RPC transport not implemented"))
    }

    async fn get_topology(&self, _name: &str) -> Result<TopologyDetail, StormError> {
        Err(StormError::Unsupported("RPC transport not implemented"))
    }

    async fn submit_topology(
        &self,
        _name: &str,
        _jar_path: &str,
        _main_class: &str,
        _args: &[String],
        _config: &BTreeMap<String, String>,
    ) -> Result<(), StormError> {
        Err(StormError::Unsupported("RPC transport not implemented"))
    }

    async fn kill_topology(&self, _name: &str, _wait_secs: u32) -> Result<(), StormError> {
        Err(StormError::Unsupported("RPC transport not implemented"))
    }

    async fn activate_topology(&self, _name: &str) -> Result<(), StormError> {
        Err(StormError::Unsupported("RPC transport not implemented"))
    }

    async fn deactivate_topology(&self, _name: &str) -> Result<(), StormError> {
        Err(StormError::Unsupported("RPC transport not implemented"))
    }

    async fn rebalance_topology(
        &self,
        _name: &str,
        _options: RebalanceOptions,
    ) -> Result<(), StormError> {
        Err(StormError::Unsupported("RPC transport not implemented"))
    }

    async fn get_cluster_configuration(&self) -> Result<BTreeMap<String, String>, StormError> {
        Err(StormError::Unsupported("RPC transport not implemented"))
    }

    async fn upload_jar(&self, _local_path: &str) -> Result<String, StormError> {
        Err(StormError::Unsupported("RPC transport not implemented"))
    }

    async fn download_jar(&self, _url: &str, _dest_path: &str) -> Result<(), StormError> {
        Err(StormError::Unsupported("RPC transport not implemented"))
    }

    async fn close(&self) -> Result<(), StormError> {
        Ok(())
    }
}
