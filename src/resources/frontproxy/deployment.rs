use k8s_openapi::api::apps::v1::Deployment;

use super::config::{KUBECONFIG_KEY, PATH_MAPPING_KEY};
use super::{FrontProxyMount, SECURE_PORT};
use crate::controller::{FrontProxy, RootShard};
use crate::reconciling::Desired;
use crate::resources::workload::{oidc_args, Workload};
use crate::resources::{front_proxy_deployment_name, front_proxy_labels, image_settings};

const CONTAINER_NAME: &str = "kcp-front-proxy";

fn args(fp: &FrontProxy) -> Vec<String> {
    let kubeconfig = FrontProxyMount::DynamicKubeconfig.file(KUBECONFIG_KEY);
    let mut args = vec![
        format!("--secure-port={SECURE_PORT}"),
        format!("--root-kubeconfig={kubeconfig}"),
        format!("--shards-kubeconfig={kubeconfig}"),
        format!("--tls-private-key-file={}", FrontProxyMount::ServerCert.file("tls.key")),
        format!("--tls-cert-file={}", FrontProxyMount::ServerCert.file("tls.crt")),
        format!("--client-ca-file={}", FrontProxyMount::ClientCa.file("tls.crt")),
        format!("--mapping-file={}", FrontProxyMount::PathMapping.file(PATH_MAPPING_KEY)),
        format!(
            "--service-account-key-file={}",
            FrontProxyMount::ServiceAccountCert.file("tls.key")
        ),
    ];
    args.extend(oidc_args(fp.spec.auth.as_ref()));
    args
}

pub fn deployment(rs: &RootShard, fp: &FrontProxy) -> Desired<Deployment> {
    let (image, image_pull_secrets) = image_settings(fp.spec.image.as_ref());
    let workload = Workload {
        labels: front_proxy_labels(fp),
        container: CONTAINER_NAME.to_string(),
        image,
        image_pull_secrets,
        command: vec!["/kcp-front-proxy".to_string()],
        args: args(fp),
        mounts: FrontProxyMount::ALL.iter().map(|m| m.mount(rs, fp)).collect(),
        port: SECURE_PORT,
        replicas: fp.spec.replicas,
    };

    Desired::new(front_proxy_deployment_name(fp), move |dep| Ok(workload.apply(dep)))
}
