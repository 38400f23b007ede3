use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Api, Client, api::ObjectMeta, api::PostParams};
use std::sync::Arc;
use std::time::Duration;
use stormop_types::{ExtractionMode, JarSourceSpec};

use super::cache::{JarCache, sha256_file};
use crate::util::Error;

/// Resolves a topology's JAR source descriptor to a local filesystem path,
/// dispatching on the tagged union of possible sources.
pub async fn resolve(
    client: Client,
    namespace: &str,
    topology_name: &str,
    source: &JarSourceSpec,
    cache: Arc<JarCache>,
    owner_ref: OwnerReference,
) -> Result<String, Error> {
    if source.variant_count() != 1 {
        return Err(Error::Jar(format!(
            "exactly one JAR source must be set, found {}",
            source.variant_count()
        )));
    }

    if let Some(url_source) = &source.url {
        let key = url_source
            .url
            .rsplit('/')
            .next()
            .unwrap_or("topology.jar")
            .to_string();
        let url = url_source.url.clone();
        let path = cache
            .get_or_fetch(&key, move |dest| {
                let url = url.clone();
                async move { download_url(&url, &dest).await }
            })
            .await?;
        return Ok(path.to_string_lossy().into_owned());
    }

    if let Some(container_source) = &source.container {
        let key = format!(
            "{namespace}-{topology_name}-{}",
            container_source.image.replace(['/', ':'], "_")
        );
        let container_source = container_source.clone();
        let client = client.clone();
        let namespace = namespace.to_string();
        let topology_name = topology_name.to_string();
        let cache_dir = cache.base_dir().to_path_buf();
        let owner_ref = owner_ref.clone();
        let path = cache
            .get_or_fetch(&key, move |dest| async move {
                extract_from_container(
                    client,
                    &namespace,
                    &topology_name,
                    &container_source,
                    &cache_dir,
                    &dest,
                    owner_ref,
                )
                .await
            })
            .await?;
        if let Some(expected) = &container_source.checksum {
            let actual = sha256_file(std::path::Path::new(&path)).await?;
            if &actual != expected {
                return Err(Error::Jar(format!(
                    "checksum mismatch: expected {expected}, got {actual}"
                )));
            }
        }
        return Ok(path.to_string_lossy().into_owned());
    }

    if source.config_map.is_some() || source.secret.is_some() || source.object_store.is_some() {
        return Err(Error::Jar(
            "ConfigMap/Secret/ObjectStore JAR sources are reserved for future implementation"
                .to_string(),
        ));
    }

    Err(Error::Jar("no JAR source specified".to_string()))
}

async fn download_url(url: &str, dest: &std::path::Path) -> Result<(), Error> {
    let resp = reqwest::get(url)
        .await
        .map_err(|e| Error::Jar(format!("download of '{url}' failed: {e}")))?;
    if !resp.status().is_success() {
        return Err(Error::Jar(format!(
            "download of '{url}' failed with status {}",
            resp.status()
        )));
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| Error::Jar(format!("reading response body for '{url}' failed: {e}")))?;
    tokio::fs::write(dest, &bytes)
        .await
        .map_err(|e| Error::Jar(format!("writing '{}' failed: {e}", dest.display())))?;
    Ok(())
}

/// Launches an extraction Job that copies the JAR out of a container image
/// directly into the JAR cache directory, then waits for it to complete.
/// The three extraction modes (copy-from-image-filesystem,
/// pull-from-init-container, sidecar) differ only in how the Job's pod
/// template is shaped; all three `cp` the JAR to the same path the caller
/// will read it back from.
///
/// The cache directory is bind-mounted into the Job's pod as a `hostPath`
/// volume at the same absolute path it has on the operator's own
/// filesystem, so the extraction Job must be scheduled onto the same node
/// the operator runs on; `node_name` on the Job's pod template pins that.
async fn extract_from_container(
    client: Client,
    namespace: &str,
    topology_name: &str,
    source: &stormop_types::ContainerJarSource,
    cache_dir: &std::path::Path,
    dest: &std::path::Path,
    owner_ref: OwnerReference,
) -> Result<(), Error> {
    let job_name = format!("jar-extract-{topology_name}-{}", uuid::Uuid::new_v4());
    let cache_mount = cache_dir.to_string_lossy().into_owned();
    let dest_path = dest.to_string_lossy().into_owned();

    let copy_cmd = match source.mode {
        ExtractionMode::CopyFromImageFilesystem
        | ExtractionMode::PullFromInitContainer
        | ExtractionMode::Sidecar => format!("cp {} {dest_path}", source.path),
    };

    let extract_container = Container {
        name: "extract".to_string(),
        image: Some(source.image.clone()),
        command: Some(vec!["sh".to_string(), "-c".to_string(), copy_cmd]),
        volume_mounts: Some(vec![VolumeMount {
            name: "cache".to_string(),
            mount_path: cache_mount.clone(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let node_name = std::env::var("NODE_NAME").ok();

    let job = Job {
        metadata: ObjectMeta {
            name: Some(job_name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(2),
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    node_name,
                    containers: vec![extract_container],
                    volumes: Some(vec![Volume {
                        name: "cache".to_string(),
                        host_path: Some(HostPathVolumeSource {
                            path: cache_mount,
                            type_: Some("DirectoryOrCreate".to_string()),
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        status: None,
    };

    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    jobs.create(&PostParams::default(), &job).await?;

    let result = wait_for_job_complete(&jobs, &job_name, Duration::from_secs(180)).await;
    jobs.delete(&job_name, &Default::default()).await.ok();
    result?;

    if tokio::fs::metadata(dest).await.is_err() {
        return Err(Error::Jar(format!(
            "extraction job '{job_name}' succeeded but '{}' was not written; is the operator pinned to the same node as the extraction Job?",
            dest.display()
        )));
    }
    Ok(())
}

async fn wait_for_job_complete(
    jobs: &Api<Job>,
    name: &str,
    timeout: Duration,
) -> Result<(), Error> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = jobs.get(name).await?;
        if let Some(status) = &job.status {
            if status.succeeded.unwrap_or(0) > 0 {
                return Ok(());
            }
            if status.failed.unwrap_or(0) > 0 {
                return Err(Error::Jar(format!("extraction job '{name}' failed")));
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Jar(format!(
                "extraction job '{name}' did not complete within {timeout:?}"
            )));
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}
