//! Operator-wide default Storm configuration, loaded once per process and
//! merged with per-cluster overrides by `clusters::configmap`.

use kube::{Api, Client, api::ObjectMeta};
use std::collections::BTreeMap;
use tokio::sync::OnceCell;

use crate::util::Error;

/// Name of the ConfigMap the operator reads its defaults from, and the key
/// within it holding the default `storm.yaml` body (as `key: value` lines,
/// one per config entry — the same shape as a cluster's override map).
const DEFAULTS_CONFIGMAP_NAME: &str = "storm-operator-defaults";
const DEFAULTS_CONFIGMAP_KEY: &str = "defaults.yaml";

/// Built-in fallback used when the defaults ConfigMap does not exist. Kept
/// intentionally small: anything a real deployment cares about overriding
/// belongs in the ConfigMap, not baked into the binary.
fn embedded_defaults() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("storm.local.dir".to_string(), "/storm/data".to_string()),
        (
            "topology.message.timeout.secs".to_string(),
            "30".to_string(),
        ),
        (
            "supervisor.worker.timeout.secs".to_string(),
            "30".to_string(),
        ),
        ("nimbus.thrift.port".to_string(), "6627".to_string()),
        ("ui.port".to_string(), "8080".to_string()),
        ("topology.debug".to_string(), "false".to_string()),
    ])
}

static DEFAULTS: OnceCell<BTreeMap<String, String>> = OnceCell::const_new();

/// Loads and caches the operator-wide defaults on first use. Process-wide
/// immutable after first load; a reload is a process restart, matching the
/// lazily-loaded singleton treatment of shared configuration.
pub async fn operator_defaults(client: Client, operator_namespace: &str) -> BTreeMap<String, String> {
    DEFAULTS
        .get_or_init(|| async { load_defaults(client, operator_namespace).await })
        .await
        .clone()
}

async fn load_defaults(client: Client, operator_namespace: &str) -> BTreeMap<String, String> {
    let api: Api<k8s_openapi::api::core::v1::ConfigMap> =
        Api::namespaced(client, operator_namespace);
    match api.get(DEFAULTS_CONFIGMAP_NAME).await {
        Ok(cm) => parse_defaults_configmap(&cm).unwrap_or_else(|| {
            eprintln!(
                "defaults ConfigMap '{DEFAULTS_CONFIGMAP_NAME}' missing key '{DEFAULTS_CONFIGMAP_KEY}', falling back to built-in defaults"
            );
            embedded_defaults()
        }),
        Err(_) => {
            println!("no defaults ConfigMap found, using built-in defaults");
            embedded_defaults()
        }
    }
}

fn parse_defaults_configmap(
    cm: &k8s_openapi::api::core::v1::ConfigMap,
) -> Option<BTreeMap<String, String>> {
    let raw = cm.data.as_ref()?.get(DEFAULTS_CONFIGMAP_KEY)?;
    serde_yaml::from_str::<BTreeMap<String, String>>(raw).ok()
}

/// Keys that must serialize as unquoted integers in the emitted `storm.yaml`.
const INT_KEYS: &[&str] = &[
    "topology.message.timeout.secs",
    "supervisor.worker.timeout.secs",
    "nimbus.thrift.port",
    "ui.port",
    "storm.zookeeper.port",
];

/// Keys that must serialize as unquoted booleans.
const BOOL_KEYS: &[&str] = &["topology.debug"];

/// Keys whose value is a sequence of `LIST_ITEM_SEP`-joined items rather than
/// a scalar, so they must serialize as an unquoted YAML list (Storm's own
/// config parser rejects e.g. `nimbus.seeds` given as a bracketed string).
const LIST_KEYS: &[&str] = &[
    "storm.zookeeper.servers",
    "nimbus.seeds",
    "supervisor.slots.ports",
];

/// Separator used to pack a list-valued config entry into the single
/// `BTreeMap<String, String>` the merge pipeline carries everything in.
/// Not a character any Storm config value legitimately contains.
pub const LIST_ITEM_SEP: &str = "\u{1}";

pub fn encode_list<I: IntoIterator<Item = S>, S: Into<String>>(items: I) -> String {
    items
        .into_iter()
        .map(Into::into)
        .collect::<Vec<_>>()
        .join(LIST_ITEM_SEP)
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedValue {
    Int(i64),
    Bool(bool),
    Str(String),
    List(Vec<NormalizedValue>),
}

/// Applies the type-normalization allow-list: a fixed set of keys become
/// unquoted integers, booleans, or lists; everything else stays a string.
/// List items are themselves normalized item-by-item (so
/// `supervisor.slots.ports` renders as a list of unquoted integers while
/// `nimbus.seeds` renders as a list of strings).
pub fn normalize(key: &str, value: &str) -> NormalizedValue {
    if LIST_KEYS.contains(&key) {
        let items = value
            .split(LIST_ITEM_SEP)
            .filter(|item| !item.is_empty())
            .map(|item| match item.parse::<i64>() {
                Ok(n) => NormalizedValue::Int(n),
                Err(_) => NormalizedValue::Str(item.to_string()),
            })
            .collect();
        return NormalizedValue::List(items);
    }
    if INT_KEYS.contains(&key) {
        if let Ok(n) = value.parse::<i64>() {
            return NormalizedValue::Int(n);
        }
    }
    if BOOL_KEYS.contains(&key) {
        if let Ok(b) = value.parse::<bool>() {
            return NormalizedValue::Bool(b);
        }
    }
    NormalizedValue::Str(value.to_string())
}

fn to_yaml_value(v: NormalizedValue) -> serde_yaml::Value {
    use serde_yaml::Value;
    match v {
        NormalizedValue::Int(n) => Value::Number(n.into()),
        NormalizedValue::Bool(b) => Value::Bool(b),
        NormalizedValue::Str(s) => Value::String(s),
        NormalizedValue::List(items) => {
            Value::Sequence(items.into_iter().map(to_yaml_value).collect())
        }
    }
}

/// Builds the final `storm.yaml` document from an already-merged key-value
/// map, applying type normalization to every entry. Keys are emitted in
/// sorted order (the map is a `BTreeMap`) for byte-identical output across
/// idempotent reconciles.
pub fn render_storm_yaml(merged: &BTreeMap<String, String>) -> Result<String, Error> {
    use serde_yaml::Value;
    let mut mapping = serde_yaml::Mapping::new();
    for (k, v) in merged {
        mapping.insert(Value::String(k.clone()), to_yaml_value(normalize(k, v)));
    }
    Ok(serde_yaml::to_string(&Value::Mapping(mapping))?)
}

/// Placeholder logging configuration shipped alongside `storm.yaml`; Storm's
/// own `cluster.xml`/log4j2 format is out of scope, this emits a minimal
/// YAML stand-in keyed the same way the ConfigMap mounts it.
pub fn render_logging_config() -> String {
    "rootLogger.level: info\n".to_string()
}

pub fn owner_meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_int_keys_as_integers() {
        assert_eq!(
            normalize("nimbus.thrift.port", "6627"),
            NormalizedValue::Int(6627)
        );
    }

    #[test]
    fn normalize_bool_keys_as_booleans() {
        assert_eq!(
            normalize("topology.debug", "true"),
            NormalizedValue::Bool(true)
        );
    }

    #[test]
    fn normalize_unknown_keys_as_strings() {
        assert_eq!(
            normalize("storm.zookeeper.root", "/storm/c1"),
            NormalizedValue::Str("/storm/c1".to_string())
        );
    }

    #[test]
    fn normalize_list_keys_as_lists_with_per_item_typing() {
        let encoded = encode_list(["6700", "6701"]);
        assert_eq!(
            normalize("supervisor.slots.ports", &encoded),
            NormalizedValue::List(vec![NormalizedValue::Int(6700), NormalizedValue::Int(6701)])
        );
        let encoded = encode_list(["nimbus-0.nimbus.default.svc"]);
        assert_eq!(
            normalize("nimbus.seeds", &encoded),
            NormalizedValue::List(vec![NormalizedValue::Str(
                "nimbus-0.nimbus.default.svc".to_string()
            )])
        );
    }

    #[test]
    fn render_emits_unquoted_yaml_sequence_for_list_keys() {
        let mut merged = BTreeMap::new();
        merged.insert(
            "nimbus.seeds".to_string(),
            encode_list(["nimbus-0.nimbus.default.svc"]),
        );
        merged.insert(
            "supervisor.slots.ports".to_string(),
            encode_list(["6700", "6701"]),
        );
        let yaml = render_storm_yaml(&merged).unwrap();
        assert!(yaml.contains("nimbus.seeds:\n- nimbus-0.nimbus.default.svc"));
        assert!(yaml.contains("supervisor.slots.ports:\n- 6700\n- 6701"));
    }

    #[test]
    fn render_emits_unquoted_int_and_bool() {
        let mut merged = BTreeMap::new();
        merged.insert("ui.port".to_string(), "8080".to_string());
        merged.insert("topology.debug".to_string(), "false".to_string());
        merged.insert("storm.zookeeper.root".to_string(), "/storm/c1".to_string());
        let yaml = render_storm_yaml(&merged).unwrap();
        assert!(yaml.contains("ui.port: 8080"));
        assert!(yaml.contains("topology.debug: false"));
        assert!(yaml.contains("storm.zookeeper.root: /storm/c1"));
    }
}
