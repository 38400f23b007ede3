use kube::CustomResourceExt;
use std::fs;
use stormop_types::*;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/storm.stormop.io_clusters_crd.yaml",
        serde_yaml::to_string(&Cluster::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/storm.stormop.io_topologies_crd.yaml",
        serde_yaml::to_string(&Topology::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/storm.stormop.io_workerpools_crd.yaml",
        serde_yaml::to_string(&WorkerPool::crd()).unwrap(),
    )
    .unwrap();
}
