use kube::ResourceExt;

use crate::certmanager::{
    Certificate, CertificatePrivateKey, CertificateSpec, IssuerReference, PrivateKeyAlgorithm,
    X509Subject,
};
use crate::controller::{RootCaSource, RootShard};
use crate::reconciling::{merge_labels, Desired};
use crate::resources::{
    root_shard_base_host, root_shard_ca_name, root_shard_certificate_name, root_shard_labels,
    root_shard_service_name, self_signed_issuer_name, CertificateAuthority, CertificateKind,
};
use crate::{Error, Result};

/// CA certificates are valid for ten years.
const CA_DURATION: &str = "87600h";
const CA_RENEW_BEFORE: &str = "720h";

const LEAF_DURATION: &str = "8760h";
const LEAF_RENEW_BEFORE: &str = "360h";

const KEY_SIZE: u32 = 4096;

fn private_key() -> Option<CertificatePrivateKey> {
    Some(CertificatePrivateKey {
        algorithm: PrivateKeyAlgorithm::Rsa,
        size: KEY_SIZE,
    })
}

fn ca_spec(name: &str, issuer_ref: IssuerReference) -> CertificateSpec {
    CertificateSpec {
        is_ca: Some(true),
        common_name: Some(name.to_string()),
        secret_name: name.to_string(),
        duration: Some(CA_DURATION.to_string()),
        renew_before: Some(CA_RENEW_BEFORE.to_string()),
        private_key: private_key(),
        issuer_ref,
        ..Default::default()
    }
}

/// The root of the CA hierarchy.
///
/// Must not be applied when the root CA is provided as a secret: there is nothing to issue it
/// with, and the mutator fails with a configuration error.
pub fn root_ca_certificate(rs: &RootShard) -> Desired<Certificate> {
    let name = root_shard_ca_name(rs, CertificateAuthority::Root);
    let labels = root_shard_labels(rs);
    let certificates = rs.spec.certificates.clone();
    let self_signed = self_signed_issuer_name(rs);
    let parent = format!("{}/{}", rs.namespace().unwrap_or_default(), rs.name_any());

    Desired::new(name.clone(), move |mut cert: Certificate| {
        let issuer_ref = match certificates.root_ca_source()? {
            RootCaSource::Issuer(issuer) => issuer,
            RootCaSource::SelfSigned => IssuerReference::issuer(&self_signed),
            RootCaSource::Secret(_) => {
                return Err(Error::Configuration(format!(
                    "no issuer ref configured in RootShard '{parent}'"
                )))
            }
        };

        merge_labels(&mut cert, &labels);
        cert.spec = ca_spec(&name, issuer_ref);
        Ok(cert)
    })
}

/// An intermediate CA, always issued by the root CA's issuer.
pub fn ca_certificate(rs: &RootShard, ca: CertificateAuthority) -> Desired<Certificate> {
    let name = root_shard_ca_name(rs, ca);
    let root_issuer = root_shard_ca_name(rs, CertificateAuthority::Root);
    let labels = root_shard_labels(rs);

    Desired::new(name.clone(), move |mut cert: Certificate| {
        merge_labels(&mut cert, &labels);
        cert.spec = ca_spec(&name, IssuerReference::issuer(&root_issuer));
        Ok(cert)
    })
}

/// Spec of a leaf certificate issued by the CA that `kind` is routed to.
pub(crate) fn leaf_spec(
    rs: &RootShard,
    name: &str,
    kind: CertificateKind,
    common_name: &str,
    dns_names: Vec<String>,
    organizations: Vec<String>,
) -> CertificateSpec {
    let usages = match kind {
        CertificateKind::Server => vec!["server auth"],
        CertificateKind::VirtualWorkspaces => vec!["server auth", "client auth"],
        CertificateKind::Kubeconfig | CertificateKind::RequestHeaderClient => vec!["client auth"],
        CertificateKind::ServiceAccount => vec![],
    };

    CertificateSpec {
        common_name: Some(common_name.to_string()),
        dns_names,
        secret_name: name.to_string(),
        duration: Some(LEAF_DURATION.to_string()),
        renew_before: Some(LEAF_RENEW_BEFORE.to_string()),
        private_key: private_key(),
        usages: usages.into_iter().map(String::from).collect(),
        subject: (!organizations.is_empty()).then_some(X509Subject { organizations }),
        issuer_ref: IssuerReference::issuer(root_shard_ca_name(rs, kind.issuing_ca())),
        ..Default::default()
    }
}

/// A leaf certificate used by the root shard itself.
pub fn leaf_certificate(rs: &RootShard, kind: CertificateKind) -> Desired<Certificate> {
    let name = root_shard_certificate_name(rs, kind);
    let labels = root_shard_labels(rs);
    let service = root_shard_service_name(rs);
    let namespace = rs.namespace().unwrap_or_default();

    let common_name = match kind {
        CertificateKind::Server => "kcp",
        CertificateKind::ServiceAccount => "kcp-service-account",
        CertificateKind::VirtualWorkspaces => "kcp-virtual-workspaces",
        CertificateKind::Kubeconfig => "kcp-root-shard-client",
        CertificateKind::RequestHeaderClient => "kcp-root-shard-requestheader",
    };
    let dns_names = match kind {
        CertificateKind::Server | CertificateKind::VirtualWorkspaces => vec![
            "localhost".to_string(),
            service.clone(),
            format!("{service}.{namespace}"),
            format!("{service}.{namespace}.svc"),
            root_shard_base_host(rs),
            rs.spec.external.hostname.clone(),
        ],
        _ => vec![],
    };
    let spec = leaf_spec(rs, &name, kind, common_name, dns_names, vec![]);

    Desired::new(name, move |mut cert: Certificate| {
        merge_labels(&mut cert, &labels);
        cert.spec = spec.clone();
        Ok(cert)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SecretReference;
    use crate::reconciling::testing::root_shard;

    fn build(desired: &Desired<Certificate>) -> Result<Certificate> {
        (desired.mutate)(Certificate::default())
    }

    #[test]
    fn self_signed_root_ca_is_a_ten_year_ca() {
        let rs = root_shard("alpha", "kcp");
        let cert = build(&root_ca_certificate(&rs)).unwrap();

        assert_eq!(cert.spec.is_ca, Some(true));
        assert_eq!(cert.spec.secret_name, "alpha-ca");
        assert_eq!(cert.spec.duration.as_deref(), Some("87600h"));
        assert_eq!(cert.spec.private_key, private_key());
        assert_eq!(cert.spec.issuer_ref, IssuerReference::issuer("alpha-selfsigned"));
    }

    #[test]
    fn external_issuer_is_used_verbatim() {
        let mut rs = root_shard("alpha", "kcp");
        let corp = IssuerReference {
            name: "corp-ca".into(),
            kind: Some("ClusterIssuer".into()),
            group: Some("cert-manager.io".into()),
        };
        rs.spec.certificates.issuer_ref = Some(corp.clone());

        let cert = build(&root_ca_certificate(&rs)).unwrap();
        assert_eq!(cert.spec.issuer_ref, corp);
    }

    #[test]
    fn root_ca_from_secret_cannot_be_issued() {
        let mut rs = root_shard("alpha", "kcp");
        rs.spec.certificates.ca_secret_ref = Some(SecretReference { name: "byo".into() });

        let err = build(&root_ca_certificate(&rs)).unwrap_err();
        match err {
            Error::Configuration(msg) => {
                assert_eq!(msg, "no issuer ref configured in RootShard 'kcp/alpha'")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn intermediates_are_issued_by_root() {
        let rs = root_shard("alpha", "kcp");
        for ca in CertificateAuthority::INTERMEDIATES {
            let cert = build(&ca_certificate(&rs, ca)).unwrap();
            assert_eq!(cert.spec.issuer_ref.name, "alpha-ca");
            assert_eq!(cert.spec.duration.as_deref(), Some(CA_DURATION));
            assert_eq!(cert.spec.secret_name, root_shard_ca_name(&rs, ca));
        }
    }

    #[test]
    fn leaves_follow_routing_table() {
        let rs = root_shard("alpha", "kcp");
        let server = build(&leaf_certificate(&rs, CertificateKind::Server)).unwrap();
        assert_eq!(server.spec.issuer_ref.name, "alpha-server-ca");
        assert!(server.spec.dns_names.contains(&"alpha-kcp.kcp.svc.cluster.local".to_string()));
        assert!(server.spec.dns_names.contains(&"api.kcp.example.com".to_string()));
        assert_eq!(server.spec.is_ca, None);

        let sa = build(&leaf_certificate(&rs, CertificateKind::ServiceAccount)).unwrap();
        assert_eq!(sa.spec.issuer_ref.name, "alpha-service-account-ca");
        assert_eq!(sa.spec.duration.as_deref(), Some(LEAF_DURATION));
    }

    #[test]
    fn builders_are_deterministic() {
        let rs = root_shard("alpha", "kcp");
        let a = serde_json::to_value(build(&leaf_certificate(&rs, CertificateKind::Server)).unwrap()).unwrap();
        let b = serde_json::to_value(build(&leaf_certificate(&rs, CertificateKind::Server)).unwrap()).unwrap();
        assert_eq!(a, b);

        let root_a = serde_json::to_value(build(&root_ca_certificate(&rs)).unwrap()).unwrap();
        let root_b = serde_json::to_value(build(&root_ca_certificate(&rs)).unwrap()).unwrap();
        assert_eq!(root_a, root_b);
    }

    #[test]
    fn foreign_labels_are_kept() {
        let rs = root_shard("alpha", "kcp");
        let mut existing = Certificate::default();
        existing.labels_mut().insert("backup".into(), "daily".into());

        let cert = (ca_certificate(&rs, CertificateAuthority::Client).mutate)(existing).unwrap();
        assert_eq!(cert.labels()["backup"], "daily");
        assert_eq!(cert.labels()["app.kubernetes.io/instance"], "alpha");
    }
}
