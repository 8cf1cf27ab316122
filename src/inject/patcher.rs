//! Pod patching
//!
//! Every helper here is additive and keyed by name: an entry is appended only
//! when nothing with that name exists yet, whatever its shape. Running any of
//! them twice leaves the pod exactly as one run did, and a pod that already
//! has everything is not touched at all (no `None` becomes `Some(vec![])`).

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapProjection, Container, EnvVar, KeyToPath, Pod, ProjectedVolumeSource,
    ServiceAccountTokenProjection, Volume, VolumeMount, VolumeProjection,
};

use crate::config::InjectionConfig;
use crate::{
    CA_CERT_FILE, CA_CERT_MOUNT_PATH, CA_CERT_VOLUME, CA_TOKEN_EXPIRATION_SECONDS, CA_TOKEN_FILE,
    CA_TOKEN_MOUNT_PATH, CA_TOKEN_VOLUME, ENV_CA_ADDRESS, ENV_CA_CERT_PATH, ENV_OIDC_TOKEN,
    ENV_OIDC_TOKEN_TYPE, ENV_REGISTRY_ADDRESS, LABEL_VALUE_TRUE, SCRAPE_ANNOTATION,
    SCRAPE_PATH_ANNOTATION, SCRAPE_PORT_ANNOTATION,
};

/// Projected volume carrying a service-account token for the CA audience
pub fn ca_token_volume(audience: &str) -> Volume {
    Volume {
        name: CA_TOKEN_VOLUME.to_string(),
        projected: Some(ProjectedVolumeSource {
            sources: Some(vec![VolumeProjection {
                service_account_token: Some(ServiceAccountTokenProjection {
                    audience: Some(audience.to_string()),
                    expiration_seconds: Some(CA_TOKEN_EXPIRATION_SECONDS),
                    path: CA_TOKEN_FILE.to_string(),
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Projected volume carrying the CA certificate config map
pub fn ca_cert_volume() -> Volume {
    Volume {
        name: CA_CERT_VOLUME.to_string(),
        projected: Some(ProjectedVolumeSource {
            sources: Some(vec![VolumeProjection {
                config_map: Some(ConfigMapProjection {
                    name: CA_CERT_VOLUME.to_string(),
                    items: Some(vec![KeyToPath {
                        key: CA_CERT_FILE.to_string(),
                        path: CA_CERT_FILE.to_string(),
                        mode: None,
                    }]),
                    optional: None,
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment entries every container needs to reach the CA, in order
pub fn ca_env(config: &InjectionConfig) -> [(&'static str, String); 4] {
    [
        (ENV_CA_ADDRESS, config.ca_address()),
        (
            ENV_CA_CERT_PATH,
            format!("{}/{}", CA_CERT_MOUNT_PATH, CA_CERT_FILE),
        ),
        (
            ENV_OIDC_TOKEN,
            format!("{}/{}", CA_TOKEN_MOUNT_PATH, CA_TOKEN_FILE),
        ),
        (ENV_OIDC_TOKEN_TYPE, CA_TOKEN_VOLUME.to_string()),
    ]
}

/// Whether the pod declares a volume named `name`
pub fn has_volume(pod: &Pod, name: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .is_some_and(|volumes| volumes.iter().any(|v| v.name == name))
}

/// Whether the container declares an environment entry named `name`
pub fn has_env(container: &Container, name: &str) -> bool {
    container
        .env
        .as_ref()
        .is_some_and(|env| env.iter().any(|e| e.name == name))
}

/// Whether the container declares a volume mount named `name`
pub fn has_mount(container: &Container, name: &str) -> bool {
    container
        .volume_mounts
        .as_ref()
        .is_some_and(|mounts| mounts.iter().any(|m| m.name == name))
}

/// Value of the first `name` entry in any container, in container order
pub fn find_env_value(pod: &Pod, name: &str) -> Option<String> {
    pod.spec.as_ref()?.containers.iter().find_map(|c| {
        c.env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.clone().unwrap_or_default())
    })
}

fn ensure_volume(pod: &mut Pod, volume: Volume) -> bool {
    if has_volume(pod, &volume.name) {
        return false;
    }
    pod.spec
        .get_or_insert_with(Default::default)
        .volumes
        .get_or_insert_with(Vec::new)
        .push(volume);
    true
}

fn ensure_env(container: &mut Container, name: &str, value: &str) -> bool {
    if has_env(container, name) {
        return false;
    }
    container.env.get_or_insert_with(Vec::new).push(EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    });
    true
}

fn ensure_mount(container: &mut Container, name: &str, mount_path: &str) -> bool {
    if has_mount(container, name) {
        return false;
    }
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            ..Default::default()
        });
    true
}

fn containers_mut(pod: &mut Pod) -> impl Iterator<Item = &mut Container> {
    pod.spec
        .iter_mut()
        .flat_map(|spec| spec.containers.iter_mut())
}

/// Add CA token/cert volumes, env entries and mounts that are missing.
///
/// Returns whether anything was added.
pub fn inject_ca_material(pod: &mut Pod, config: &InjectionConfig) -> bool {
    let mut changed = false;
    changed |= ensure_volume(pod, ca_token_volume(&config.ca_service_name));
    changed |= ensure_volume(pod, ca_cert_volume());

    let env = ca_env(config);
    for container in containers_mut(pod) {
        for (name, value) in &env {
            changed |= ensure_env(container, name, value);
        }
        changed |= ensure_mount(container, CA_TOKEN_VOLUME, CA_TOKEN_MOUNT_PATH);
        changed |= ensure_mount(container, CA_CERT_VOLUME, CA_CERT_MOUNT_PATH);
    }
    changed
}

/// Set the registry address on every container that does not define one.
///
/// Returns whether anything was added.
pub fn inject_registry_address(pod: &mut Pod, address: &str) -> bool {
    let mut changed = false;
    for container in containers_mut(pod) {
        changed |= ensure_env(container, ENV_REGISTRY_ADDRESS, address);
    }
    changed
}

/// Add metrics scrape annotations that are missing.
///
/// Returns whether anything was added.
pub fn inject_scrape_annotations(pod: &mut Pod, port: u16, path: &str) -> bool {
    let wanted = [
        (SCRAPE_ANNOTATION, LABEL_VALUE_TRUE.to_string()),
        (SCRAPE_PORT_ANNOTATION, port.to_string()),
        (SCRAPE_PATH_ANNOTATION, path.to_string()),
    ];

    let present = |annotations: &Option<BTreeMap<String, String>>, key: &str| {
        annotations.as_ref().is_some_and(|a| a.contains_key(key))
    };
    if wanted
        .iter()
        .all(|(key, _)| present(&pod.metadata.annotations, key))
    {
        return false;
    }

    let annotations = pod.metadata.annotations.get_or_insert_with(BTreeMap::new);
    for (key, value) in wanted {
        annotations.entry(key.to_string()).or_insert(value);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodSpec, SecretVolumeSource};

    fn config() -> InjectionConfig {
        InjectionConfig {
            ca_service_name: "mesh-ca".to_string(),
            ca_namespace: "mesh-system".to_string(),
            grpc_secure_port: 30062,
            ..Default::default()
        }
    }

    fn pod_with_containers(names: &[&str]) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: names
                    .iter()
                    .map(|n| Container {
                        name: n.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn env_names(container: &Container) -> Vec<&str> {
        container
            .env
            .iter()
            .flatten()
            .map(|e| e.name.as_str())
            .collect()
    }

    fn assert_ca_container(container: &Container) {
        let env: Vec<(&str, Option<&str>)> = container
            .env
            .iter()
            .flatten()
            .map(|e| (e.name.as_str(), e.value.as_deref()))
            .collect();
        assert_eq!(
            env,
            vec![
                ("REGISTRY_CA_ADDRESS", Some("mesh-ca.mesh-system.svc:30062")),
                ("CA_CERT_PATH", Some("/var/run/secrets/ca-cert/ca.crt")),
                ("OIDC_TOKEN", Some("/var/run/secrets/ca-token/token")),
                ("OIDC_TOKEN_TYPE", Some("ca-token")),
            ]
        );

        let mounts: Vec<(&str, &str)> = container
            .volume_mounts
            .iter()
            .flatten()
            .map(|m| (m.name.as_str(), m.mount_path.as_str()))
            .collect();
        assert_eq!(
            mounts,
            vec![
                ("ca-token", "/var/run/secrets/ca-token"),
                ("ca-cert", "/var/run/secrets/ca-cert"),
            ]
        );
    }

    // =========================================================================
    // CA material
    // =========================================================================

    #[test]
    fn token_volume_shape() {
        let mut pod = Pod::default();
        assert!(inject_ca_material(&mut pod, &config()));

        let volumes = pod.spec.as_ref().unwrap().volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].name, "ca-token");

        let sources = volumes[0].projected.as_ref().unwrap().sources.as_ref().unwrap();
        assert_eq!(sources.len(), 1);
        let token = sources[0].service_account_token.as_ref().unwrap();
        assert_eq!(token.path, "token");
        assert_eq!(token.audience.as_deref(), Some("mesh-ca"));
        assert_eq!(token.expiration_seconds, Some(1800));
    }

    #[test]
    fn cert_volume_shape() {
        let mut pod = Pod::default();
        inject_ca_material(&mut pod, &config());

        let volumes = pod.spec.as_ref().unwrap().volumes.as_ref().unwrap();
        assert_eq!(volumes[1].name, "ca-cert");

        let sources = volumes[1].projected.as_ref().unwrap().sources.as_ref().unwrap();
        assert_eq!(sources.len(), 1);
        let config_map = sources[0].config_map.as_ref().unwrap();
        assert_eq!(config_map.name, "ca-cert");
        let items = config_map.items.as_ref().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "ca.crt");
        assert_eq!(items[0].path, "ca.crt");
    }

    #[test]
    fn every_container_gets_env_and_mounts() {
        let mut pod = pod_with_containers(&["test", "test"]);
        inject_ca_material(&mut pod, &config());

        let containers = &pod.spec.as_ref().unwrap().containers;
        assert_eq!(containers.len(), 2);
        for container in containers {
            assert_eq!(container.name, "test");
            assert_ca_container(container);
        }
    }

    #[test]
    fn injection_is_idempotent() {
        let mut once = pod_with_containers(&["app", "sidecar"]);
        inject_ca_material(&mut once, &config());

        let mut twice = once.clone();
        assert!(!inject_ca_material(&mut twice, &config()));
        assert_eq!(once, twice);
    }

    /// Story: a hand-written ca-token volume is kept as the user wrote it
    #[test]
    fn story_existing_volume_of_other_shape_is_kept() {
        let mut pod = pod_with_containers(&["app"]);
        pod.spec.as_mut().unwrap().volumes = Some(vec![Volume {
            name: "ca-token".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some("my-token".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        inject_ca_material(&mut pod, &config());

        let volumes = pod.spec.as_ref().unwrap().volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 2);
        assert!(volumes[0].secret.is_some());
        assert!(volumes[0].projected.is_none());
        assert_eq!(volumes[1].name, "ca-cert");
    }

    #[test]
    fn existing_env_is_not_overwritten_or_duplicated() {
        let mut pod = pod_with_containers(&["app"]);
        pod.spec.as_mut().unwrap().containers[0].env = Some(vec![EnvVar {
            name: "OIDC_TOKEN".to_string(),
            value: Some("/custom/token".to_string()),
            ..Default::default()
        }]);

        inject_ca_material(&mut pod, &config());

        let container = &pod.spec.as_ref().unwrap().containers[0];
        assert_eq!(
            env_names(container),
            vec!["OIDC_TOKEN", "REGISTRY_CA_ADDRESS", "CA_CERT_PATH", "OIDC_TOKEN_TYPE"]
        );
        assert_eq!(
            container.env.as_ref().unwrap()[0].value.as_deref(),
            Some("/custom/token")
        );
    }

    #[test]
    fn containers_are_patched_independently() {
        let mut pod = pod_with_containers(&["first", "second"]);
        pod.spec.as_mut().unwrap().containers[1].volume_mounts = Some(vec![VolumeMount {
            name: "ca-cert".to_string(),
            mount_path: "/etc/ca".to_string(),
            ..Default::default()
        }]);

        inject_ca_material(&mut pod, &config());

        let containers = &pod.spec.as_ref().unwrap().containers;
        assert_ca_container(&containers[0]);

        let mounts = containers[1].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].mount_path, "/etc/ca");
        assert_eq!(mounts[1].name, "ca-token");
    }

    #[test]
    fn user_duplicates_are_preserved() {
        let mut pod = pod_with_containers(&["app"]);
        let dup = EnvVar {
            name: "CA_CERT_PATH".to_string(),
            value: Some("/a".to_string()),
            ..Default::default()
        };
        pod.spec.as_mut().unwrap().containers[0].env = Some(vec![dup.clone(), dup]);

        inject_ca_material(&mut pod, &config());

        let names = env_names(&pod.spec.as_ref().unwrap().containers[0]);
        assert_eq!(names.iter().filter(|n| **n == "CA_CERT_PATH").count(), 2);
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn zero_containers_still_gets_volumes() {
        let mut pod = pod_with_containers(&[]);
        inject_ca_material(&mut pod, &config());
        assert_eq!(
            pod.spec.as_ref().unwrap().volumes.as_ref().map(Vec::len),
            Some(2)
        );
    }

    // =========================================================================
    // Registry address
    // =========================================================================

    #[test]
    fn registry_address_added_where_missing() {
        let mut pod = pod_with_containers(&["a", "b"]);
        pod.spec.as_mut().unwrap().containers[1].env = Some(vec![EnvVar {
            name: "REGISTRY_ADDRESS".to_string(),
            value: Some("zookeeper://mine".to_string()),
            ..Default::default()
        }]);

        assert!(inject_registry_address(&mut pod, "nacos://n.ns.svc"));
        assert_eq!(
            find_env_value(&pod, "REGISTRY_ADDRESS").as_deref(),
            Some("nacos://n.ns.svc")
        );

        let second = &pod.spec.as_ref().unwrap().containers[1];
        assert_eq!(second.env.as_ref().unwrap().len(), 1);
        assert_eq!(
            second.env.as_ref().unwrap()[0].value.as_deref(),
            Some("zookeeper://mine")
        );

        assert!(!inject_registry_address(&mut pod, "nacos://n.ns.svc"));
    }

    #[test]
    fn find_env_value_reads_first_container_that_defines_it() {
        let mut pod = pod_with_containers(&["a", "b"]);
        assert_eq!(find_env_value(&pod, "REGISTRY_ADDRESS"), None);

        pod.spec.as_mut().unwrap().containers[1].env = Some(vec![EnvVar {
            name: "REGISTRY_ADDRESS".to_string(),
            value: Some("some address".to_string()),
            ..Default::default()
        }]);
        assert_eq!(
            find_env_value(&pod, "REGISTRY_ADDRESS").as_deref(),
            Some("some address")
        );
    }

    // =========================================================================
    // Scrape annotations
    // =========================================================================

    #[test]
    fn scrape_annotations_added_once() {
        let mut pod = Pod::default();
        assert!(inject_scrape_annotations(&mut pod, 22222, "/metrics"));

        let annotations = pod.metadata.annotations.clone().unwrap();
        assert_eq!(annotations["prometheus.io/scrape"], "true");
        assert_eq!(annotations["prometheus.io/port"], "22222");
        assert_eq!(annotations["prometheus.io/path"], "/metrics");

        assert!(!inject_scrape_annotations(&mut pod, 22222, "/metrics"));
        assert_eq!(pod.metadata.annotations, Some(annotations));
    }

    #[test]
    fn user_scrape_port_wins() {
        let mut pod = Pod::default();
        pod.metadata.annotations = Some(BTreeMap::from([(
            "prometheus.io/port".to_string(),
            "9090".to_string(),
        )]));

        inject_scrape_annotations(&mut pod, 22222, "/metrics");

        let annotations = pod.metadata.annotations.unwrap();
        assert_eq!(annotations["prometheus.io/port"], "9090");
        assert_eq!(annotations["prometheus.io/scrape"], "true");
    }
}
