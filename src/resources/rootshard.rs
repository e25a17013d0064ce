use k8s_openapi::api::core::v1::Service;

pub use certificates::{ca_certificate, leaf_certificate, root_ca_certificate};
pub use deployment::deployment;
pub use issuers::{ca_issuer, root_ca_issuer, self_signed_issuer};

use crate::controller::RootShard;
use crate::reconciling::Desired;
use crate::resources::{root_shard_labels, root_shard_service_name, SERVICE_PORT};

mod certificates;
mod deployment;
mod issuers;

pub(crate) use certificates::leaf_spec;

pub fn service(rs: &RootShard) -> Desired<Service> {
    let labels = root_shard_labels(rs);
    Desired::new(root_shard_service_name(rs), move |svc| {
        Ok(super::workload::apply_service(svc, &labels, SERVICE_PORT))
    })
}
