use kube::ResourceExt;

use crate::certmanager::Certificate;
use crate::controller::{FrontProxy, RootShard};
use crate::reconciling::{merge_labels, Desired};
use crate::resources::rootshard::leaf_spec;
use crate::resources::{
    front_proxy_certificate_name, front_proxy_labels, front_proxy_service_name, CertificateKind,
};

const COMMON_NAME: &str = "kcp-front-proxy";

/// A leaf certificate of the front-proxy, issued by one of the root shard's CAs.
pub fn certificate(rs: &RootShard, fp: &FrontProxy, kind: CertificateKind) -> Desired<Certificate> {
    let name = front_proxy_certificate_name(rs, fp, kind);
    let labels = front_proxy_labels(fp);

    let dns_names = match kind {
        CertificateKind::Server => {
            let service = front_proxy_service_name(fp);
            let namespace = fp.namespace().unwrap_or_default();
            vec![
                fp.spec.external_hostname.clone(),
                service.clone(),
                format!("{service}.{namespace}"),
                format!("{service}.{namespace}.svc"),
            ]
        }
        _ => vec![],
    };
    let organizations = match kind {
        CertificateKind::Kubeconfig => vec!["system:masters".to_string()],
        _ => vec![],
    };
    let spec = leaf_spec(rs, &name, kind, COMMON_NAME, dns_names, organizations);

    Desired::new(name, move |mut cert: Certificate| {
        merge_labels(&mut cert, &labels);
        cert.spec = spec.clone();
        Ok(cert)
    })
}
