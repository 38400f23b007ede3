use super::MANAGER_NAME;
use kube::{
    Api, Client, Error,
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::{clone::Clone, fmt::Debug};
use stormop_types::*;

pub trait Object<S: Status> {
    /// Returns a mutable reference to the status object, initializing
    /// it with the default value if it does not exist.
    fn mut_status(&mut self) -> &mut S;
}

pub trait Status {
    /// Sets the last updated timestamp to the given value.
    fn set_last_updated(&mut self, last_updated: String);

    /// Stamps the generation the controller last acted on.
    fn set_observed_generation(&mut self, generation: Option<i64>);
}

macro_rules! impl_object_status {
    ($kind:ty, $status:ty) => {
        impl Object<$status> for $kind {
            fn mut_status(&mut self) -> &mut $status {
                if self.status.is_some() {
                    return self.status.as_mut().unwrap();
                }
                self.status = Some(Default::default());
                self.status.as_mut().unwrap()
            }
        }

        impl Status for $status {
            fn set_last_updated(&mut self, last_updated: String) {
                self.last_updated = Some(last_updated);
            }

            fn set_observed_generation(&mut self, generation: Option<i64>) {
                self.observed_generation = generation;
            }
        }
    };
}

impl_object_status!(Cluster, ClusterStatus);
impl_object_status!(Topology, TopologyStatus);
impl_object_status!(WorkerPool, WorkerPoolStatus);

/// Patch the resource's status object with the provided function.
/// The function is passed a mutable reference to the status object,
/// which is to be mutated in-place. Move closures are supported.
///
/// Generalized from a single-resource helper to work across any of the
/// three CRDs via the `Object`/`Status` traits above; every call also
/// stamps `lastUpdated` and `observedGeneration` so reconcilers never
/// have to remember to do it themselves.
pub async fn patch_status<S: Status, T>(
    client: Client,
    instance: &T,
    f: impl FnOnce(&mut S),
) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource
        + Object<S>
        + Serialize
        + DeserializeOwned
        + Debug
        + Resource<Scope = NamespaceResourceScope>,
{
    let patch = Patch::Json::<T>({
        let mut modified = instance.clone();
        let generation = modified.meta().generation;
        let status = modified.mut_status();
        f(status);
        status.set_last_updated(chrono::Utc::now().to_rfc3339());
        status.set_observed_generation(generation);
        json_patch::diff(
            &serde_json::to_value(instance).unwrap(),
            &serde_json::to_value(&modified).unwrap(),
        )
    });
    let name = instance.meta().name.as_deref().unwrap();
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let api: Api<T> = Api::namespaced(client, namespace);
    api.patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch)
        .await
}
