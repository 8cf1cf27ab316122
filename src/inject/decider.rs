//! CA injection decision

use std::collections::BTreeMap;

use crate::{CA_INJECT_LABEL, LABEL_VALUE_TRUE};

/// Whether `labels` opt in to CA injection
pub fn opted_in(labels: Option<&BTreeMap<String, String>>) -> bool {
    labels
        .and_then(|l| l.get(CA_INJECT_LABEL))
        .is_some_and(|v| v == LABEL_VALUE_TRUE)
}

/// Decide whether a pod receives CA identity material.
///
/// Either the pod or its namespace opting in is sufficient; the two are OR-ed.
pub fn should_inject_ca(
    pod_labels: Option<&BTreeMap<String, String>>,
    namespace_labels: &BTreeMap<String, String>,
) -> bool {
    opted_in(pod_labels) || opted_in(Some(namespace_labels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn no_labels_means_no_injection() {
        assert!(!should_inject_ca(None, &BTreeMap::new()));
        assert!(!should_inject_ca(Some(&BTreeMap::new()), &BTreeMap::new()));
    }

    #[test]
    fn pod_label_alone_is_sufficient() {
        let pod = labels(&[("ca.inject", "true")]);
        assert!(should_inject_ca(Some(&pod), &BTreeMap::new()));
    }

    #[test]
    fn namespace_label_alone_is_sufficient() {
        let ns = labels(&[("ca.inject", "true")]);
        assert!(should_inject_ca(None, &ns));
    }

    /// Story: a pod cannot opt out of a namespace-wide opt-in
    #[test]
    fn story_pod_false_does_not_override_namespace_true() {
        let pod = labels(&[("ca.inject", "false")]);
        let ns = labels(&[("ca.inject", "true")]);
        assert!(should_inject_ca(Some(&pod), &ns));
    }

    #[test]
    fn only_exact_true_counts() {
        let pod = labels(&[("ca.inject", "True")]);
        let ns = labels(&[("ca.inject", "yes")]);
        assert!(!should_inject_ca(Some(&pod), &ns));
    }
}
