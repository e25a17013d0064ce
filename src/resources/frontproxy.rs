use k8s_openapi::api::core::v1::Service;

pub use certificates::certificate;
pub use config::{dynamic_kubeconfig, path_mapping};
pub use deployment::deployment;

use crate::controller::{FrontProxy, RootShard};
use crate::reconciling::Desired;
use crate::resources::workload::{Mount, MountSource};
use crate::resources::{
    front_proxy_certificate_name, front_proxy_config_name, front_proxy_dynamic_kubeconfig_name,
    front_proxy_labels, front_proxy_service_name, root_ca_secret_name, root_shard_ca_name,
    root_shard_certificate_name, CertificateAuthority, CertificateKind,
};

mod certificates;
mod config;
mod deployment;

/// Port kcp-front-proxy listens on inside the pod.
const SECURE_PORT: i32 = 8443;

/// Leaf certificates owned by a FrontProxy, in the order they are applied.
pub const CERTIFICATES: [CertificateKind; 3] = [
    CertificateKind::Server,
    CertificateKind::Kubeconfig,
    CertificateKind::RequestHeaderClient,
];

/// Volumes of the kcp-front-proxy container.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum FrontProxyMount {
    DynamicKubeconfig,
    KubeconfigClientCert,
    ServiceAccountCert,
    ServerCert,
    RequestHeaderClientCert,
    PathMapping,
    ClientCa,
    RootCa,
}

impl FrontProxyMount {
    pub(crate) const ALL: [FrontProxyMount; 8] = [
        FrontProxyMount::DynamicKubeconfig,
        FrontProxyMount::KubeconfigClientCert,
        FrontProxyMount::ServiceAccountCert,
        FrontProxyMount::ServerCert,
        FrontProxyMount::RequestHeaderClientCert,
        FrontProxyMount::PathMapping,
        FrontProxyMount::ClientCa,
        FrontProxyMount::RootCa,
    ];

    fn object(self, rs: &RootShard, fp: &FrontProxy) -> String {
        match self {
            FrontProxyMount::DynamicKubeconfig => front_proxy_dynamic_kubeconfig_name(rs, fp),
            FrontProxyMount::KubeconfigClientCert => {
                front_proxy_certificate_name(rs, fp, CertificateKind::Kubeconfig)
            }
            FrontProxyMount::ServiceAccountCert => {
                root_shard_certificate_name(rs, CertificateKind::ServiceAccount)
            }
            FrontProxyMount::ServerCert => {
                front_proxy_certificate_name(rs, fp, CertificateKind::Server)
            }
            FrontProxyMount::RequestHeaderClientCert => {
                front_proxy_certificate_name(rs, fp, CertificateKind::RequestHeaderClient)
            }
            FrontProxyMount::PathMapping => front_proxy_config_name(fp),
            FrontProxyMount::ClientCa => root_shard_ca_name(rs, CertificateAuthority::Client),
            FrontProxyMount::RootCa => root_ca_secret_name(rs),
        }
    }

    fn volume(self) -> &'static str {
        match self {
            FrontProxyMount::DynamicKubeconfig => "dynamic-kubeconfig",
            FrontProxyMount::KubeconfigClientCert => "kubeconfig-client-cert",
            FrontProxyMount::ServiceAccountCert => "service-account-cert",
            FrontProxyMount::ServerCert => "server-cert",
            FrontProxyMount::RequestHeaderClientCert => "requestheader-client-cert",
            FrontProxyMount::PathMapping => "path-mapping",
            FrontProxyMount::ClientCa => "client-ca",
            FrontProxyMount::RootCa => "root-ca",
        }
    }

    fn path(self) -> &'static str {
        match self {
            FrontProxyMount::DynamicKubeconfig => "/etc/kcp-front-proxy/kubeconfig",
            FrontProxyMount::KubeconfigClientCert => "/etc/kcp-front-proxy/kubeconfig-client-cert",
            FrontProxyMount::ServiceAccountCert => "/etc/kcp/tls/service-account",
            FrontProxyMount::ServerCert => "/etc/kcp-front-proxy/tls",
            FrontProxyMount::RequestHeaderClientCert => "/etc/kcp-front-proxy/requestheader-client",
            FrontProxyMount::PathMapping => "/etc/kcp-front-proxy/config",
            FrontProxyMount::ClientCa => "/etc/kcp-front-proxy/client-ca",
            FrontProxyMount::RootCa => "/etc/kcp/tls/ca",
        }
    }

    fn file(self, file: &str) -> String {
        format!("{}/{file}", self.path())
    }

    fn mount(self, rs: &RootShard, fp: &FrontProxy) -> Mount {
        Mount {
            volume: self.volume(),
            object: self.object(rs, fp),
            source: match self {
                FrontProxyMount::PathMapping => MountSource::ConfigMap,
                _ => MountSource::Secret,
            },
            path: self.path().to_string(),
            // kcp-front-proxy rewrites its kubeconfig to reach other shards
            read_only: self != FrontProxyMount::DynamicKubeconfig,
        }
    }
}

pub fn service(fp: &FrontProxy) -> Desired<Service> {
    let labels = front_proxy_labels(fp);
    Desired::new(front_proxy_service_name(fp), move |svc| {
        Ok(super::workload::apply_service(svc, &labels, SECURE_PORT))
    })
}
