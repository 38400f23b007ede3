use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::client::{
    ClusterInfo, RebalanceOptions, StormClient, StormError, TopologyDetail, TopologyStatus,
    TopologySummary,
};

/// Talks to Storm UI's JSON HTTP API (`/api/v1/...`). This is the transport
/// the reconcilers use by default; it never constructs a Thrift topology
/// serialization, so submission is delegated to a shell-out tool
/// (`topologies::submit`) rather than done over this client.
pub struct RestStormClient {
    base_url: String,
    http: reqwest::Client,
}

impl RestStormClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, StormError> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| StormError::Transport(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StormError::NotFound(format!("{path} not found")));
        }
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| StormError::Transport(e.to_string()))?;
        if !status.is_success() {
            if body.to_lowercase().contains("not alive") {
                return Err(StormError::NotAlive(body));
            }
            return Err(StormError::Transport(format!("HTTP {status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| StormError::Transport(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ClusterSummaryResp {
    supervisors: i32,
    #[serde(rename = "slotsTotal")]
    slots_total: i32,
    #[serde(rename = "slotsUsed")]
    slots_used: i32,
    #[serde(rename = "topologies")]
    topologies: i32,
    #[serde(rename = "nimbusUptime")]
    nimbus_uptime: Option<String>,
    #[serde(rename = "stormVersion")]
    storm_version: Option<String>,
}

#[derive(Deserialize)]
struct NimbusSummaryResp {
    host: String,
    #[serde(rename = "isLeader")]
    is_leader: bool,
}

#[derive(Deserialize)]
struct NimbusSummaries {
    nimbuses: Vec<NimbusSummaryResp>,
}

#[derive(Deserialize)]
struct TopologySummaryResp {
    id: String,
    name: String,
    status: String,
    #[serde(rename = "workersTotal")]
    workers_total: i32,
    #[serde(rename = "uptimeSeconds")]
    uptime_seconds: i64,
}

#[derive(Deserialize)]
struct TopologyListResp {
    topologies: Vec<TopologySummaryResp>,
}

#[derive(Deserialize)]
struct TopologyDetailResp {
    id: String,
    status: String,
    #[serde(rename = "workersTotal")]
    workers_total: i32,
    #[serde(rename = "executorsTotal")]
    executors_total: i32,
    #[serde(rename = "tasksTotal")]
    tasks_total: i32,
    #[serde(rename = "uptimeSeconds")]
    uptime_seconds: i64,
}

#[async_trait]
impl StormClient for RestStormClient {
    async fn get_cluster_info(&self) -> Result<ClusterInfo, StormError> {
        let summary: ClusterSummaryResp = self.get_json("/api/v1/cluster/summary").await?;
        let nimbuses: NimbusSummaries = self
            .get_json("/api/v1/cluster/nimbus/summary")
            .await
            .unwrap_or(NimbusSummaries { nimbuses: vec![] });
        let nimbus_leader = nimbuses
            .nimbuses
            .iter()
            .find(|n| n.is_leader)
            .map(|n| n.host.clone());
        let nimbus_hosts = nimbuses.nimbuses.iter().map(|n| n.host.clone()).collect();
        Ok(ClusterInfo {
            supervisors: summary.supervisors,
            slots_total: summary.slots_total,
            slots_used: summary.slots_used,
            slots_free: (summary.slots_total - summary.slots_used).max(0),
            topologies: summary.topologies,
            nimbus_leader,
            nimbus_hosts,
            version: summary.storm_version,
            uptime_secs: summary
                .nimbus_uptime
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        })
    }

    async fn list_topologies(&self) -> Result<Vec<TopologySummary>, StormError> {
        let resp: TopologyListResp = self.get_json("/api/v1/topology/summary").await?;
        Ok(resp
            .topologies
            .into_iter()
            .map(|t| TopologySummary {
                id: t.id,
                name: t.name,
                status: TopologyStatus::from(t.status.as_str()),
                workers: t.workers_total,
                uptime_secs: t.uptime_seconds,
            })
            .collect())
    }

    async fn get_topology(&self, name: &str) -> Result<TopologyDetail, StormError> {
        let topologies = self.list_topologies().await?;
        let id = topologies
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.id.clone())
            .ok_or_else(|| StormError::NotFound(format!("topology '{name}' not found")))?;
        let resp: TopologyDetailResp =
            self.get_json(&format!("/api/v1/topology/{id}")).await?;
        Ok(TopologyDetail {
            id: resp.id,
            status: TopologyStatus::from(resp.status.as_str()),
            workers: resp.workers_total,
            executors: resp.executors_total,
            tasks: resp.tasks_total,
            uptime_secs: resp.uptime_seconds,
        })
    }

    async fn submit_topology(
        &self,
        _name: &str,
        _jar_path: &str,
        _main_class: &str,
        _args: &[String],
        _config: &BTreeMap<String, String>,
    ) -> Result<(), StormError> {
        // Storm UI's REST API has no submission verb; submission goes
        // through `topologies::submit::shell_submit` instead.
        Err(StormError::Unsupported(
            "submission is not exposed over the REST API; use shell_submit",
        ))
    }

    async fn kill_topology(&self, name: &str, wait_secs: u32) -> Result<(), StormError> {
        let topologies = self.list_topologies().await?;
        let id = match topologies.iter().find(|t| t.name == name) {
            Some(t) => t.id.clone(),
            None => return Err(StormError::NotAlive(format!("'{name}' is not alive"))),
        };
        let resp = self
            .http
            .post(self.url(&format!("/api/v1/topology/{id}/kill/{wait_secs}")))
            .send()
            .await
            .map_err(|e| StormError::Transport(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            if body.to_lowercase().contains("not alive") {
                Ok(())
            } else {
                Err(StormError::Transport(body))
            }
        }
    }

    async fn activate_topology(&self, name: &str) -> Result<(), StormError> {
        let id = self.get_topology(name).await?.id;
        self.http
            .post(self.url(&format!("/api/v1/topology/{id}/activate")))
            .send()
            .await
            .map_err(|e| StormError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn deactivate_topology(&self, name: &str) -> Result<(), StormError> {
        let id = self.get_topology(name).await?.id;
        self.http
            .post(self.url(&format!("/api/v1/topology/{id}/deactivate")))
            .send()
            .await
            .map_err(|e| StormError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn rebalance_topology(
        &self,
        name: &str,
        options: RebalanceOptions,
    ) -> Result<(), StormError> {
        let id = self.get_topology(name).await?.id;
        let wait = options.wait_secs.unwrap_or(0);
        self.http
            .post(self.url(&format!("/api/v1/topology/{id}/rebalance/{wait}")))
            .send()
            .await
            .map_err(|e| StormError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn get_cluster_configuration(&self) -> Result<BTreeMap<String, String>, StormError> {
        let raw: BTreeMap<String, serde_json::Value> =
            self.get_json("/api/v1/cluster/configuration").await?;
        Ok(raw
            .into_iter()
            .map(|(k, v)| {
                let s = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, s)
            })
            .collect())
    }

    async fn upload_jar(&self, _local_path: &str) -> Result<String, StormError> {
        Err(StormError::Unsupported(
            "JAR upload is not exposed over the REST API",
        ))
    }

    async fn download_jar(&self, url: &str, dest_path: &str) -> Result<(), StormError> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| StormError::Transport(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| StormError::Transport(e.to_string()))?;
        tokio::fs::write(dest_path, &bytes)
            .await
            .map_err(|e| StormError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StormError> {
        Ok(())
    }
}
