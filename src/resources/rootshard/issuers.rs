use crate::certmanager::{CaIssuer, Issuer, IssuerSpec, SelfSignedIssuer};
use crate::controller::RootShard;
use crate::reconciling::{merge_labels, Desired};
use crate::resources::{
    root_ca_secret_name, root_shard_ca_name, root_shard_labels, self_signed_issuer_name,
    CertificateAuthority,
};

/// Bootstrap issuer that self-signs the root CA certificate.
pub fn self_signed_issuer(rs: &RootShard) -> Desired<Issuer> {
    let labels = root_shard_labels(rs);
    Desired::new(self_signed_issuer_name(rs), move |mut issuer: Issuer| {
        merge_labels(&mut issuer, &labels);
        issuer.spec = IssuerSpec {
            self_signed: Some(SelfSignedIssuer {}),
            ..Default::default()
        };
        Ok(issuer)
    })
}

/// Issuer signing with the root CA key pair, wherever that comes from.
pub fn root_ca_issuer(rs: &RootShard) -> Desired<Issuer> {
    let labels = root_shard_labels(rs);
    let secret_name = root_ca_secret_name(rs);
    Desired::new(
        root_shard_ca_name(rs, CertificateAuthority::Root),
        move |mut issuer: Issuer| {
            merge_labels(&mut issuer, &labels);
            issuer.spec = ca_issuer_spec(&secret_name);
            Ok(issuer)
        },
    )
}

/// Issuer of an intermediate CA, signing with that CA's own secret.
pub fn ca_issuer(rs: &RootShard, ca: CertificateAuthority) -> Desired<Issuer> {
    let labels = root_shard_labels(rs);
    let name = root_shard_ca_name(rs, ca);
    Desired::new(name.clone(), move |mut issuer: Issuer| {
        merge_labels(&mut issuer, &labels);
        issuer.spec = ca_issuer_spec(&name);
        Ok(issuer)
    })
}

fn ca_issuer_spec(secret_name: &str) -> IssuerSpec {
    IssuerSpec {
        ca: Some(CaIssuer {
            secret_name: secret_name.to_string(),
        }),
        ..Default::default()
    }
}
