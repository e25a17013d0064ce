use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, LocalObjectReference, PodSpec,
    SeccompProfile, SecretVolumeSource, SecurityContext, Service, ServicePort, ServiceSpec,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::controller::AuthSpec;
use crate::reconciling::merge_labels;

/// Mode the API server assigns to projected secret and config map files when none is given.
const DEFAULT_VOLUME_MODE: i32 = 0o644;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MountSource {
    Secret,
    ConfigMap,
}

/// One volume and the mount of it into the workload container.
///
/// `volume` comes from the fixed mount tables and names both the volume and its mount. The
/// projected object keeps its own name, which may not be a valid volume name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Mount {
    pub volume: &'static str,
    pub object: String,
    pub source: MountSource,
    pub path: String,
    pub read_only: bool,
}

/// The parts of a Deployment owned by the operator.
pub(crate) struct Workload {
    pub labels: BTreeMap<String, String>,
    pub container: String,
    pub image: String,
    pub image_pull_secrets: Vec<String>,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub mounts: Vec<Mount>,
    pub port: i32,
    pub replicas: Option<i32>,
}

/// Returns the element called `name`, appending a default one if there is none.
fn entry<'a, T: Default>(
    list: &'a mut Vec<T>,
    name: &str,
    name_of: impl Fn(&T) -> &str,
    set_name: impl FnOnce(&mut T),
) -> &'a mut T {
    match list.iter().position(|item| name_of(item) == name) {
        Some(i) => &mut list[i],
        None => {
            let mut item = T::default();
            set_name(&mut item);
            let i = list.len();
            list.push(item);
            &mut list[i]
        }
    }
}

impl Workload {
    pub fn apply(&self, mut dep: Deployment) -> Deployment {
        merge_labels(&mut dep, &self.labels);

        let spec = dep.spec.get_or_insert_with(DeploymentSpec::default);
        // the selector is immutable after creation
        if spec.selector.match_labels.is_none() && spec.selector.match_expressions.is_none() {
            spec.selector.match_labels = Some(self.labels.clone());
        }
        // no replica count on a new object means one replica
        spec.replicas = self.replicas.or(spec.replicas).or(Some(1));

        let template_meta = spec.template.metadata.get_or_insert_with(Default::default);
        template_meta
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(self.labels.clone());

        let pod = spec.template.spec.get_or_insert_with(PodSpec::default);
        pod.image_pull_secrets = if self.image_pull_secrets.is_empty() {
            None
        } else {
            Some(
                self.image_pull_secrets
                    .iter()
                    .map(|name| LocalObjectReference { name: Some(name.clone()) })
                    .collect(),
            )
        };

        let volumes = pod.volumes.get_or_insert_with(Vec::new);
        for mount in &self.mounts {
            let volume = entry(volumes, mount.volume, |v: &Volume| v.name.as_str(), |v| {
                v.name = mount.volume.to_string()
            });
            match mount.source {
                MountSource::Secret => {
                    volume.config_map = None;
                    volume.secret = Some(SecretVolumeSource {
                        secret_name: Some(mount.object.clone()),
                        default_mode: Some(DEFAULT_VOLUME_MODE),
                        ..Default::default()
                    });
                }
                MountSource::ConfigMap => {
                    volume.secret = None;
                    volume.config_map = Some(ConfigMapVolumeSource {
                        name: Some(mount.object.clone()),
                        default_mode: Some(DEFAULT_VOLUME_MODE),
                        ..Default::default()
                    });
                }
            }
        }

        let container = entry(&mut pod.containers, &self.container, |c: &Container| c.name.as_str(), |c| {
            c.name = self.container.clone()
        });
        container.image = Some(self.image.clone());
        container.image_pull_policy = Some("IfNotPresent".to_string());
        container.command = Some(self.command.clone());
        container.args = Some(self.args.clone());
        container.ports = Some(vec![ContainerPort {
            name: Some("https".to_string()),
            container_port: self.port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]);
        container.volume_mounts = Some(
            self.mounts
                .iter()
                .map(|m| VolumeMount {
                    name: m.volume.to_string(),
                    mount_path: m.path.clone(),
                    // the API server omits `readOnly: false`
                    read_only: m.read_only.then_some(true),
                    ..Default::default()
                })
                .collect(),
        );
        container.security_context = Some(SecurityContext {
            seccomp_profile: Some(SeccompProfile {
                type_: "RuntimeDefault".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });

        dep
    }
}

/// Exposes `target_port` of the pods selected by `labels` as [`super::SERVICE_PORT`].
pub(crate) fn apply_service(
    mut svc: Service,
    labels: &BTreeMap<String, String>,
    target_port: i32,
) -> Service {
    merge_labels(&mut svc, labels);

    let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
    spec.type_ = Some("ClusterIP".to_string());
    spec.selector = Some(labels.clone());

    let ports = spec.ports.get_or_insert_with(Vec::new);
    let port = entry(ports, "https", |p: &ServicePort| p.name.as_deref().unwrap_or_default(), |p| {
        p.name = Some("https".to_string())
    });
    port.port = super::SERVICE_PORT;
    port.target_port = Some(IntOrString::Int(target_port));
    port.protocol = Some("TCP".to_string());

    svc
}

/// `--oidc-*` flags understood by both kcp and kcp-front-proxy.
pub(crate) fn oidc_args(auth: Option<&AuthSpec>) -> Vec<String> {
    let Some(oidc) = auth.and_then(|a| a.oidc.as_ref()) else {
        return vec![];
    };

    let mut args = vec![
        format!("--oidc-issuer-url={}", oidc.issuer_url),
        format!("--oidc-client-id={}", oidc.client_id),
    ];
    let optional = [
        ("groups-claim", &oidc.groups_claim),
        ("username-claim", &oidc.username_claim),
        ("username-prefix", &oidc.username_prefix),
        ("groups-prefix", &oidc.groups_prefix),
    ];
    for (flag, value) in optional {
        if let Some(value) = value {
            args.push(format!("--oidc-{flag}={value}"));
        }
    }
    args
}
