use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Client, Resource, api::ObjectMeta};
use std::collections::BTreeMap;

use super::names;
use crate::config::{self, render_logging_config, render_storm_yaml};
use crate::util::{Error, overlay_str_map};
use stormop_types::Cluster;

/// Builds the desired `ConfigMap` for a cluster following the merge
/// pipeline: operator defaults, cluster overrides, zookeeper-derived keys,
/// synthesized keys, then type-normalized rendering. Byte-identical across
/// repeated calls for an unchanged cluster (create idempotence).
pub async fn desired_configmap(
    client: Client,
    cluster: &Cluster,
    operator_namespace: &str,
) -> Result<ConfigMap, Error> {
    let namespace = cluster.meta().namespace.clone().unwrap_or_default();
    let cluster_name = cluster.meta().name.clone().unwrap_or_default();

    let mut merged = config::operator_defaults(client, operator_namespace).await;
    overlay_str_map(&mut merged, &cluster.spec.config);

    let mut zookeeper_keys = BTreeMap::new();
    zookeeper_keys.insert(
        "storm.zookeeper.servers".to_string(),
        config::encode_list(cluster.spec.zookeeper.servers.clone()),
    );
    // Mandatory per-cluster chroot: never overridable, applied last among
    // the zookeeper-derived keys.
    zookeeper_keys.insert(
        "storm.zookeeper.root".to_string(),
        format!("/storm/{cluster_name}"),
    );
    overlay_str_map(&mut merged, &zookeeper_keys);

    let mut synthesized = BTreeMap::new();
    synthesized.insert(
        "nimbus.seeds".to_string(),
        config::encode_list(names::nimbus_seeds(cluster, &namespace)),
    );
    let slots_per_supervisor = cluster.spec.slots_per_supervisor.max(0);
    synthesized.insert(
        "supervisor.slots.ports".to_string(),
        config::encode_list((0..slots_per_supervisor).map(|i| (6700 + i).to_string())),
    );
    if cluster.spec.ui.is_some() {
        synthesized
            .entry("ui.port".to_string())
            .or_insert_with(|| "8080".to_string());
    }
    overlay_str_map(&mut merged, &synthesized);

    let storm_yaml = render_storm_yaml(&merged)?;
    let logging_yaml = render_logging_config();

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(names::configmap_name(cluster)),
            namespace: Some(namespace),
            owner_references: Some(vec![
                cluster
                    .controller_owner_ref(&())
                    .expect("cluster has name/uid set"),
            ]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            ("storm.yaml".to_string(), storm_yaml),
            ("logging.yaml".to_string(), logging_yaml),
        ])),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stormop_types::{ClusterSpec, ComponentSpec, ZookeeperSpec};

    fn test_cluster(name: &str) -> Cluster {
        let mut c = Cluster::new(
            name,
            ClusterSpec {
                image: "apache/storm:2.6.0".to_string(),
                nimbus: ComponentSpec { replicas: 1 },
                supervisor: ComponentSpec { replicas: 3 },
                slots_per_supervisor: 2,
                zookeeper: ZookeeperSpec {
                    servers: vec!["zk-0.zk.default.svc.cluster.local:2181".to_string()],
                },
                ..Default::default()
            },
        );
        c.meta_mut().namespace = Some("default".to_string());
        c.meta_mut().uid = Some("11111111-1111-1111-1111-111111111111".to_string());
        c
    }

    #[test]
    fn zookeeper_root_is_always_the_cluster_chroot() {
        // Exercises the merge pipeline's fixed portion without a live
        // Kubernetes client by constructing the merged map directly.
        let cluster = test_cluster("c1");
        let mut merged = BTreeMap::new();
        overlay_str_map(&mut merged, &cluster.spec.config);
        merged.insert(
            "storm.zookeeper.root".to_string(),
            format!("/storm/{}", cluster.meta().name.clone().unwrap()),
        );
        let yaml = render_storm_yaml(&merged).unwrap();
        assert!(yaml.contains("storm.zookeeper.root: /storm/c1"));
    }

    #[test]
    fn supervisor_slot_ports_are_contiguous_from_6700() {
        let cluster = test_cluster("c1");
        let ports: Vec<i32> = (0..cluster.spec.slots_per_supervisor)
            .map(|i| 6700 + i)
            .collect();
        assert_eq!(ports, vec![6700, 6701]);
    }
}
