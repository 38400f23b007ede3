use std::collections::BTreeMap;

/// Overlays `overlay` onto `base`, key by key, with `overlay` winning on
/// conflicts. Used by the cluster config merge pipeline: operator defaults,
/// then cluster overrides, then synthesized keys, each a call to this
/// function in sequence.
pub(crate) fn overlay_str_map(
    base: &mut BTreeMap<String, String>,
    overlay: &BTreeMap<String, String>,
) {
    for (k, v) in overlay {
        base.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_wins_on_conflict() {
        let mut base = BTreeMap::from([("a".to_string(), "1".to_string())]);
        let overlay = BTreeMap::from([("a".to_string(), "2".to_string())]);
        overlay_str_map(&mut base, &overlay);
        assert_eq!(base.get("a"), Some(&"2".to_string()));
    }

    #[test]
    fn overlay_adds_new_keys() {
        let mut base = BTreeMap::new();
        let overlay = BTreeMap::from([("b".to_string(), "3".to_string())]);
        overlay_str_map(&mut base, &overlay);
        assert_eq!(base.get("b"), Some(&"3".to_string()));
    }
}
