//! Naming, labeling and image policy shared by every builder, plus the builders themselves.
//!
//! All names of dependent objects are derived here so that a volume, the secret it mounts and
//! the certificate producing that secret can never drift apart.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::controller::{FrontProxy, ImageSpec, RootShard};

pub mod frontproxy;
pub mod rootshard;
mod workload;

pub const IMAGE_REPOSITORY: &str = "ghcr.io/kcp-dev/kcp";
pub const IMAGE_TAG: &str = "v0.26.0";

const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
const APP_INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
const APP_MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const APP_COMPONENT_LABEL: &str = "app.kubernetes.io/component";

const APP_NAME: &str = "kcp";
const MANAGED_BY: &str = "kcp-operator";

const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Port kcp and the front-proxy are reached on through their Services.
pub const SERVICE_PORT: i32 = 6443;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum CertificateAuthority {
    Root,
    Server,
    RequestHeaderClient,
    Client,
    ServiceAccount,
}

impl CertificateAuthority {
    /// CAs signed by the root CA, in the order they are applied.
    pub const INTERMEDIATES: [CertificateAuthority; 4] = [
        CertificateAuthority::Server,
        CertificateAuthority::RequestHeaderClient,
        CertificateAuthority::Client,
        CertificateAuthority::ServiceAccount,
    ];

    fn suffix(self) -> &'static str {
        match self {
            CertificateAuthority::Root => "ca",
            CertificateAuthority::Server => "server-ca",
            CertificateAuthority::RequestHeaderClient => "requestheader-client-ca",
            CertificateAuthority::Client => "client-ca",
            CertificateAuthority::ServiceAccount => "service-account-ca",
        }
    }
}

/// Leaf certificates consumed by the workloads.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum CertificateKind {
    Server,
    ServiceAccount,
    VirtualWorkspaces,
    Kubeconfig,
    RequestHeaderClient,
}

impl CertificateKind {
    fn suffix(self) -> &'static str {
        match self {
            CertificateKind::Server => "server",
            CertificateKind::ServiceAccount => "service-account",
            CertificateKind::VirtualWorkspaces => "virtual-workspaces",
            CertificateKind::Kubeconfig => "kubeconfig",
            CertificateKind::RequestHeaderClient => "requestheader",
        }
    }

    /// The CA whose issuer signs this certificate.
    pub fn issuing_ca(self) -> CertificateAuthority {
        match self {
            CertificateKind::Server => CertificateAuthority::Server,
            CertificateKind::ServiceAccount => CertificateAuthority::ServiceAccount,
            CertificateKind::VirtualWorkspaces => CertificateAuthority::Server,
            CertificateKind::Kubeconfig => CertificateAuthority::Client,
            CertificateKind::RequestHeaderClient => CertificateAuthority::RequestHeaderClient,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Component {
    RootShard,
    FrontProxy,
}

impl Component {
    fn label_value(self) -> &'static str {
        match self {
            Component::RootShard => "rootshard",
            Component::FrontProxy => "front-proxy",
        }
    }
}

pub fn resource_labels(component: Component, instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_NAME_LABEL.to_string(), APP_NAME.to_string()),
        (APP_INSTANCE_LABEL.to_string(), instance.to_string()),
        (APP_MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (APP_COMPONENT_LABEL.to_string(), component.label_value().to_string()),
    ])
}

/// Resolves the container image and pull secrets; explicit settings win over the defaults.
pub fn image_settings(image: Option<&ImageSpec>) -> (String, Vec<String>) {
    let repository = image
        .and_then(|i| i.repository.as_deref())
        .filter(|r| !r.is_empty())
        .unwrap_or(IMAGE_REPOSITORY);
    let tag = image
        .and_then(|i| i.tag.as_deref())
        .filter(|t| !t.is_empty())
        .unwrap_or(IMAGE_TAG);
    let pull_secrets = image.map(|i| i.image_pull_secrets.clone()).unwrap_or_default();

    (format!("{repository}:{tag}"), pull_secrets)
}

pub fn root_shard_labels(rs: &RootShard) -> BTreeMap<String, String> {
    resource_labels(Component::RootShard, &rs.name_any())
}

pub fn root_shard_deployment_name(rs: &RootShard) -> String {
    format!("{}-kcp", rs.name_any())
}

pub fn root_shard_service_name(rs: &RootShard) -> String {
    format!("{}-kcp", rs.name_any())
}

/// In-cluster DNS name of the root shard Service.
pub fn root_shard_base_host(rs: &RootShard) -> String {
    let cluster_domain = rs
        .spec
        .cluster_domain
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_CLUSTER_DOMAIN);
    format!(
        "{}.{}.svc.{cluster_domain}",
        root_shard_service_name(rs),
        rs.namespace().unwrap_or_default()
    )
}

pub fn root_shard_base_url(rs: &RootShard) -> String {
    format!("https://{}:{SERVICE_PORT}", root_shard_base_host(rs))
}

pub fn root_shard_certificate_name(rs: &RootShard, kind: CertificateKind) -> String {
    format!("{}-{}", rs.name_any(), kind.suffix())
}

/// Name of the CA Certificate, its secret and its Issuer.
pub fn root_shard_ca_name(rs: &RootShard, ca: CertificateAuthority) -> String {
    format!("{}-{}", rs.name_any(), ca.suffix())
}

/// Secret holding the root CA key pair, which may be provided by the user.
pub fn root_ca_secret_name(rs: &RootShard) -> String {
    rs.spec
        .certificates
        .ca_secret_ref
        .as_ref()
        .filter(|_| rs.spec.certificates.issuer_ref.is_none())
        .map(|s| s.name.clone())
        .unwrap_or_else(|| root_shard_ca_name(rs, CertificateAuthority::Root))
}

pub fn self_signed_issuer_name(rs: &RootShard) -> String {
    format!("{}-selfsigned", rs.name_any())
}

pub fn front_proxy_labels(fp: &FrontProxy) -> BTreeMap<String, String> {
    resource_labels(Component::FrontProxy, &fp.name_any())
}

pub fn front_proxy_deployment_name(fp: &FrontProxy) -> String {
    format!("{}-front-proxy", fp.name_any())
}

pub fn front_proxy_service_name(fp: &FrontProxy) -> String {
    format!("{}-front-proxy", fp.name_any())
}

pub fn front_proxy_certificate_name(
    rs: &RootShard,
    fp: &FrontProxy,
    kind: CertificateKind,
) -> String {
    format!("{}-{}-{}", rs.name_any(), fp.name_any(), kind.suffix())
}

pub fn front_proxy_dynamic_kubeconfig_name(rs: &RootShard, fp: &FrontProxy) -> String {
    format!("{}-{}-dynamic-kubeconfig", rs.name_any(), fp.name_any())
}

pub fn front_proxy_config_name(fp: &FrontProxy) -> String {
    format!("{}-config", fp.name_any())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::controller::SecretReference;
    use crate::reconciling::testing::{front_proxy, root_shard};

    const ALL_CAS: [CertificateAuthority; 5] = [
        CertificateAuthority::Root,
        CertificateAuthority::Server,
        CertificateAuthority::RequestHeaderClient,
        CertificateAuthority::Client,
        CertificateAuthority::ServiceAccount,
    ];

    const ALL_KINDS: [CertificateKind; 5] = [
        CertificateKind::Server,
        CertificateKind::ServiceAccount,
        CertificateKind::VirtualWorkspaces,
        CertificateKind::Kubeconfig,
        CertificateKind::RequestHeaderClient,
    ];

    fn is_dns_label(s: &str) -> bool {
        !s.is_empty()
            && s.len() <= 63
            && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !s.starts_with('-')
            && !s.ends_with('-')
    }

    #[test]
    fn secret_names_are_unique_and_valid() {
        let rs = root_shard("alpha", "kcp");
        let fp = front_proxy("edge", "kcp", "alpha");

        let mut names: Vec<String> = ALL_CAS.iter().map(|ca| root_shard_ca_name(&rs, *ca)).collect();
        names.extend(ALL_KINDS.iter().map(|k| root_shard_certificate_name(&rs, *k)));
        names.extend(ALL_KINDS.iter().map(|k| front_proxy_certificate_name(&rs, &fp, *k)));
        names.push(front_proxy_dynamic_kubeconfig_name(&rs, &fp));

        let unique: BTreeSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len(), "{names:?}");
        assert!(names.iter().all(|n| is_dns_label(n)), "{names:?}");
    }

    #[test]
    fn names_are_deterministic() {
        let rs = root_shard("alpha", "kcp");
        assert_eq!(root_shard_ca_name(&rs, CertificateAuthority::Root), "alpha-ca");
        assert_eq!(root_shard_ca_name(&rs, CertificateAuthority::Client), "alpha-client-ca");
        assert_eq!(
            root_shard_certificate_name(&rs, CertificateKind::Server),
            root_shard_certificate_name(&root_shard("alpha", "kcp"), CertificateKind::Server)
        );
        assert_eq!(root_shard_deployment_name(&rs), "alpha-kcp");
    }

    #[test]
    fn labels_identify_instance_and_component() {
        let labels = root_shard_labels(&root_shard("alpha", "kcp"));
        assert_eq!(labels.len(), 4);
        assert_eq!(labels[APP_NAME_LABEL], "kcp");
        assert_eq!(labels[APP_INSTANCE_LABEL], "alpha");
        assert_eq!(labels[APP_MANAGED_BY_LABEL], "kcp-operator");
        assert_eq!(labels[APP_COMPONENT_LABEL], "rootshard");

        let fp_labels = front_proxy_labels(&front_proxy("edge", "kcp", "alpha"));
        assert_eq!(fp_labels[APP_COMPONENT_LABEL], "front-proxy");
    }

    #[test]
    fn image_override_wins_over_defaults() {
        assert_eq!(image_settings(None).0, "ghcr.io/kcp-dev/kcp:v0.26.0");

        let partial = ImageSpec {
            repository: None,
            tag: Some("v0.27.0".into()),
            image_pull_secrets: vec![],
        };
        assert_eq!(image_settings(Some(&partial)).0, "ghcr.io/kcp-dev/kcp:v0.27.0");

        let full = ImageSpec {
            repository: Some("registry.local/kcp".into()),
            tag: Some("dev".into()),
            image_pull_secrets: vec!["pull".into()],
        };
        assert_eq!(
            image_settings(Some(&full)),
            ("registry.local/kcp:dev".to_string(), vec!["pull".to_string()])
        );
    }

    #[test]
    fn base_url_uses_cluster_domain() {
        let mut rs = root_shard("alpha", "kcp");
        assert_eq!(root_shard_base_url(&rs), "https://alpha-kcp.kcp.svc.cluster.local:6443");
        rs.spec.cluster_domain = Some("corp.internal".into());
        assert_eq!(root_shard_base_host(&rs), "alpha-kcp.kcp.svc.corp.internal");
    }

    #[test]
    fn root_ca_secret_follows_ca_source() {
        let mut rs = root_shard("alpha", "kcp");
        assert_eq!(root_ca_secret_name(&rs), "alpha-ca");
        rs.spec.certificates.ca_secret_ref = Some(SecretReference { name: "byo-ca".into() });
        assert_eq!(root_ca_secret_name(&rs), "byo-ca");
    }
}
