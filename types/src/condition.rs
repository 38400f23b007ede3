//! Schema support for embedding Kubernetes-shaped `Condition` objects in our
//! CRD statuses. `k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition`
//! does not derive `JsonSchema`, so any field of type `Vec<Condition>` needs a
//! `#[schemars(schema_with = "...")]` hook to describe itself to the CRD
//! schema generator. This mirrors the approach `stackable-operator` uses in
//! its own `conditions` module.

use schemars::{Schema, SchemaGenerator, json_schema};

/// Returns a [`Schema`] describing a list of `io.k8s.apimachinery.../Condition`
/// objects, for use as `#[schemars(schema_with = "condition_list_schema")]` on
/// a `Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition>` field.
pub fn condition_list_schema(_gen: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "array",
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"],
        "x-kubernetes-patch-strategy": "merge",
        "x-kubernetes-patch-merge-key": "type",
        "items": {
            "type": "object",
            "properties": {
                "lastTransitionTime": { "format": "date-time", "type": "string" },
                "message": { "type": "string" },
                "observedGeneration": { "format": "int64", "type": "integer" },
                "reason": { "type": "string" },
                "status": {
                    "default": "Unknown",
                    "enum": ["Unknown", "True", "False"],
                    "type": "string"
                },
                "type": {
                    "pattern": "^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$",
                    "type": "string"
                }
            },
            "required": ["type", "status", "lastTransitionTime", "reason", "message"]
        }
    })
}

/// Builds (or replaces) a condition of the given `type_` in `conditions`,
/// setting `lastTransitionTime` only when the status actually changed.
pub fn set_condition(
    conditions: &mut Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: impl Into<String>,
    observed_generation: Option<i64>,
) {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
    let status_str = if status { "True" } else { "False" }.to_string();
    let now = Time(chrono::Utc::now());
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status_str {
            existing.last_transition_time = now;
        }
        existing.status = status_str;
        existing.reason = reason.to_string();
        existing.message = message.into();
        existing.observed_generation = observed_generation;
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status_str,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: now,
            observed_generation,
        });
    }
}
