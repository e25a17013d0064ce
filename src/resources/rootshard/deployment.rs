use k8s_openapi::api::apps::v1::Deployment;

use crate::controller::RootShard;
use crate::reconciling::Desired;
use crate::resources::workload::{oidc_args, Mount, MountSource, Workload};
use crate::resources::{
    image_settings, root_shard_base_url, root_shard_ca_name, root_shard_certificate_name,
    root_shard_deployment_name, root_shard_labels, CertificateAuthority, CertificateKind,
    SERVICE_PORT,
};

const CONTAINER_NAME: &str = "kcp";

/// Secrets mounted into the kcp container.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum RootShardMount {
    ServerCert,
    ServiceAccountCert,
    VirtualWorkspacesCert,
    ClientCa,
    RequestHeaderClientCa,
}

impl RootShardMount {
    pub(crate) const ALL: [RootShardMount; 5] = [
        RootShardMount::ServerCert,
        RootShardMount::ServiceAccountCert,
        RootShardMount::VirtualWorkspacesCert,
        RootShardMount::ClientCa,
        RootShardMount::RequestHeaderClientCa,
    ];

    fn secret(self, rs: &RootShard) -> String {
        match self {
            RootShardMount::ServerCert => root_shard_certificate_name(rs, CertificateKind::Server),
            RootShardMount::ServiceAccountCert => {
                root_shard_certificate_name(rs, CertificateKind::ServiceAccount)
            }
            RootShardMount::VirtualWorkspacesCert => {
                root_shard_certificate_name(rs, CertificateKind::VirtualWorkspaces)
            }
            RootShardMount::ClientCa => root_shard_ca_name(rs, CertificateAuthority::Client),
            RootShardMount::RequestHeaderClientCa => {
                root_shard_ca_name(rs, CertificateAuthority::RequestHeaderClient)
            }
        }
    }

    fn volume(self) -> &'static str {
        match self {
            RootShardMount::ServerCert => "server-cert",
            RootShardMount::ServiceAccountCert => "service-account-cert",
            RootShardMount::VirtualWorkspacesCert => "virtual-workspaces-cert",
            RootShardMount::ClientCa => "client-ca",
            RootShardMount::RequestHeaderClientCa => "requestheader-client-ca",
        }
    }

    fn path(self) -> &'static str {
        match self {
            RootShardMount::ServerCert => "/etc/kcp/tls/server",
            RootShardMount::ServiceAccountCert => "/etc/kcp/tls/service-account",
            RootShardMount::VirtualWorkspacesCert => "/etc/kcp/tls/virtual-workspaces",
            RootShardMount::ClientCa => "/etc/kcp/tls/client-ca",
            RootShardMount::RequestHeaderClientCa => "/etc/kcp/tls/requestheader-client-ca",
        }
    }

    fn file(self, file: &str) -> String {
        format!("{}/{file}", self.path())
    }

    fn mount(self, rs: &RootShard) -> Mount {
        Mount {
            volume: self.volume(),
            object: self.secret(rs),
            source: MountSource::Secret,
            path: self.path().to_string(),
            read_only: true,
        }
    }
}

fn args(rs: &RootShard) -> Vec<String> {
    let external = &rs.spec.external;
    let mut args = vec![
        "--root-directory=".to_string(),
        "--shard-name=root".to_string(),
        format!("--external-hostname={}", external.hostname),
        format!("--shard-base-url={}", root_shard_base_url(rs)),
        format!("--shard-external-url=https://{}:{}", external.hostname, external.port),
        format!("--client-ca-file={}", RootShardMount::ClientCa.file("tls.crt")),
        format!(
            "--requestheader-client-ca-file={}",
            RootShardMount::RequestHeaderClientCa.file("tls.crt")
        ),
        "--requestheader-username-headers=X-Remote-User".to_string(),
        "--requestheader-group-headers=X-Remote-Group".to_string(),
        "--requestheader-extra-headers-prefix=X-Remote-Extra-".to_string(),
        format!("--tls-cert-file={}", RootShardMount::ServerCert.file("tls.crt")),
        format!("--tls-private-key-file={}", RootShardMount::ServerCert.file("tls.key")),
        format!(
            "--service-account-key-file={}",
            RootShardMount::ServiceAccountCert.file("tls.crt")
        ),
        format!(
            "--service-account-private-key-file={}",
            RootShardMount::ServiceAccountCert.file("tls.key")
        ),
        format!(
            "--shard-client-cert-file={}",
            RootShardMount::VirtualWorkspacesCert.file("tls.crt")
        ),
        format!(
            "--shard-client-key-file={}",
            RootShardMount::VirtualWorkspacesCert.file("tls.key")
        ),
    ];

    if !rs.spec.etcd.endpoints.is_empty() {
        args.push(format!("--etcd-servers={}", rs.spec.etcd.endpoints.join(",")));
    }
    args.extend(oidc_args(rs.spec.auth.as_ref()));

    args
}

pub fn deployment(rs: &RootShard) -> Desired<Deployment> {
    let (image, image_pull_secrets) = image_settings(rs.spec.image.as_ref());
    let workload = Workload {
        labels: root_shard_labels(rs),
        container: CONTAINER_NAME.to_string(),
        image,
        image_pull_secrets,
        command: vec!["/kcp".to_string(), "start".to_string()],
        args: args(rs),
        mounts: RootShardMount::ALL.iter().map(|m| m.mount(rs)).collect(),
        port: SERVICE_PORT,
        replicas: rs.spec.replicas,
    };

    Desired::new(root_shard_deployment_name(rs), move |dep| Ok(workload.apply(dep)))
}
