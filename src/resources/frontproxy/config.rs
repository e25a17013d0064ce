use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use serde_json::json;

use super::FrontProxyMount;
use crate::controller::{FrontProxy, PathMappingEntry, RootShard};
use crate::reconciling::{merge_labels, Desired};
use crate::resources::{
    front_proxy_config_name, front_proxy_dynamic_kubeconfig_name, front_proxy_labels,
    root_shard_base_url,
};

pub(super) const PATH_MAPPING_KEY: &str = "path-mapping.yaml";
pub(super) const KUBECONFIG_KEY: &str = "kubeconfig";

const KUBECONFIG_CONTEXT: &str = "system:admin";

/// Routes `/clusters/` and `/services/` to the root shard, followed by user supplied entries.
pub(super) fn path_mappings(rs: &RootShard, fp: &FrontProxy) -> Vec<PathMappingEntry> {
    let backend = root_shard_base_url(rs);
    let mut entries: Vec<PathMappingEntry> = ["/clusters/", "/services/"]
        .into_iter()
        .map(|path| PathMappingEntry {
            path: path.to_string(),
            backend: backend.clone(),
            backend_server_ca: FrontProxyMount::RootCa.file("tls.crt"),
            proxy_client_cert: FrontProxyMount::RequestHeaderClientCert.file("tls.crt"),
            proxy_client_key: FrontProxyMount::RequestHeaderClientCert.file("tls.key"),
        })
        .collect();
    entries.extend(fp.spec.additional_path_mappings.iter().cloned());
    entries
}

pub fn path_mapping(rs: &RootShard, fp: &FrontProxy) -> Desired<ConfigMap> {
    let labels = front_proxy_labels(fp);
    let entries = path_mappings(rs, fp);

    Desired::new(front_proxy_config_name(fp), move |mut cm: ConfigMap| {
        merge_labels(&mut cm, &labels);
        cm.data
            .get_or_insert_with(BTreeMap::new)
            .insert(PATH_MAPPING_KEY.to_string(), serde_yaml::to_string(&entries)?);
        Ok(cm)
    })
}

pub(super) fn kubeconfig(rs: &RootShard) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": KUBECONFIG_CONTEXT,
            "cluster": {
                "server": root_shard_base_url(rs),
                "certificate-authority": FrontProxyMount::RootCa.file("tls.crt"),
            },
        }],
        "contexts": [{
            "name": KUBECONFIG_CONTEXT,
            "context": {
                "cluster": KUBECONFIG_CONTEXT,
                "user": KUBECONFIG_CONTEXT,
            },
        }],
        "current-context": KUBECONFIG_CONTEXT,
        "users": [{
            "name": KUBECONFIG_CONTEXT,
            "user": {
                "client-certificate": FrontProxyMount::KubeconfigClientCert.file("tls.crt"),
                "client-key": FrontProxyMount::KubeconfigClientCert.file("tls.key"),
            },
        }],
    })
}

/// Kubeconfig the front-proxy starts from to reach the root shard.
pub fn dynamic_kubeconfig(rs: &RootShard, fp: &FrontProxy) -> Desired<Secret> {
    let labels = front_proxy_labels(fp);
    let kubeconfig = kubeconfig(rs);

    Desired::new(front_proxy_dynamic_kubeconfig_name(rs, fp), move |mut secret: Secret| {
        merge_labels(&mut secret, &labels);
        secret.type_ = Some("Opaque".to_string());
        secret.data.get_or_insert_with(BTreeMap::new).insert(
            KUBECONFIG_KEY.to_string(),
            ByteString(serde_yaml::to_string(&kubeconfig)?.into_bytes()),
        );
        Ok(secret)
    })
}
