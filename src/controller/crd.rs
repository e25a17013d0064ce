use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::certmanager::IssuerReference;
use crate::{Error, Result};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(kind = "RootShard", group = "operator.kcp.io", version = "v1alpha1", namespaced)]
#[kube(status = "RootShardStatus")]
#[serde(rename_all = "camelCase")]
pub struct RootShardSpec {
    pub external: ExternalConfig,
    #[serde(default)]
    pub certificates: Certificates,
    #[serde(default)]
    pub etcd: EtcdConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Defaults to `cluster.local`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalConfig {
    pub hostname: String,
    #[serde(default = "default_external_port")]
    pub port: u16,
}

fn default_external_port() -> u16 {
    6443
}

/// Where the root CA of a RootShard comes from.
///
/// With neither reference set, the operator bootstraps a self-signed root CA.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Certificates {
    /// Issuer that signs the root CA certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_ref: Option<IssuerReference>,
    /// Existing secret holding the root CA key pair. Ignored if `issuerRef` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_secret_ref: Option<SecretReference>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct SecretReference {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RootCaSource {
    SelfSigned,
    Issuer(IssuerReference),
    Secret(String),
}

impl Certificates {
    pub fn root_ca_source(&self) -> Result<RootCaSource> {
        match (&self.issuer_ref, &self.ca_secret_ref) {
            (Some(issuer), _) if issuer.name.is_empty() => Err(Error::Configuration(
                "certificates.issuerRef.name must not be empty".to_string(),
            )),
            (Some(issuer), _) => Ok(RootCaSource::Issuer(issuer.clone())),
            (None, Some(secret)) if secret.name.is_empty() => Err(Error::Configuration(
                "certificates.caSecretRef.name must not be empty".to_string(),
            )),
            (None, Some(secret)) => Ok(RootCaSource::Secret(secret.name.clone())),
            (None, None) => Ok(RootCaSource::SelfSigned),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdConfig {
    /// Empty means kcp runs its embedded etcd.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcConfiguration>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfiguration {
    #[serde(rename = "issuerURL")]
    pub issuer_url: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_claim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_claim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_prefix: Option<String>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(kind = "FrontProxy", group = "operator.kcp.io", version = "v1alpha1", namespaced)]
#[kube(plural = "frontproxies")]
#[kube(status = "FrontProxyStatus")]
#[serde(rename_all = "camelCase")]
pub struct FrontProxySpec {
    pub root_shard: RootShardConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_path_mappings: Vec<PathMappingEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,
    /// Hostname under which the front-proxy is reachable from outside the cluster.
    pub external_hostname: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct RootShardConfig {
    /// RootShard in the same namespace as the FrontProxy.
    #[serde(rename = "ref")]
    pub reference: RootShardReference,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct RootShardReference {
    pub name: String,
}

/// One entry of the front-proxy path mapping file. Field names are dictated by kcp-front-proxy.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct PathMappingEntry {
    pub path: String,
    pub backend: String,
    pub backend_server_ca: String,
    pub proxy_client_cert: String,
    pub proxy_client_key: String,
}

/// Observed status shared by RootShard and FrontProxy.
#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct ComponentStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

pub type RootShardStatus = ComponentStatus;
pub type FrontProxyStatus = ComponentStatus;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    #[default]
    #[serde(rename = "")]
    Unset,
    Provisioning,
    Running,
    Deleting,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}
