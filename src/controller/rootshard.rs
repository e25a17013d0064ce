use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::controller::{error_action, phase, Context, Phase, RootCaSource, RootShard, RUNNING_REQUEUE};
use crate::reconciling::{ensure, ensure_all, Desired, Owner, Store};
use crate::resources::rootshard;
use crate::resources::{root_shard_deployment_name, CertificateAuthority, CertificateKind};
use crate::{Error, Result};

/// Leaf certificates served or consumed by kcp itself.
const LEAVES: [CertificateKind; 3] = [
    CertificateKind::Server,
    CertificateKind::ServiceAccount,
    CertificateKind::VirtualWorkspaces,
];

#[instrument(skip_all, fields(namespace = ?root_shard.namespace(), name = %root_shard.name_any()))]
pub(in crate::controller) async fn reconcile_root_shard<S: Store>(
    root_shard: Arc<RootShard>,
    ctx: Arc<Context<S>>,
) -> Result<Action> {
    let ns = root_shard
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    info!("Reconciling RootShard \"{}\" in {}", root_shard.name_any(), ns);

    // The trigger may be stale; work from what the store holds now.
    let Some(rs) = ctx.store.get::<RootShard>(&ns, &root_shard.name_any()).await? else {
        debug!("RootShard is gone, nothing to do");
        return Ok(Action::await_change());
    };

    let status = phase::observe(&ctx.store, &rs).await?;
    if status.phase == Phase::Deleting {
        // dependents are garbage collected through their owner references
        return Ok(Action::await_change());
    }

    if let Err(e) = rs.apply(&ctx.store, &ns).await {
        if !e.is_retryable() {
            phase::reject(&ctx.store, &rs, status, &e).await;
        }
        return Err(e);
    }

    let workload = ctx
        .store
        .get::<Deployment>(&ns, &root_shard_deployment_name(&rs))
        .await?;
    phase::conclude(&ctx.store, &rs, status, workload.as_ref()).await?;

    Ok(Action::requeue(RUNNING_REQUEUE))
}

pub(in crate::controller) fn root_shard_error_policy<S>(
    root_shard: Arc<RootShard>,
    error: &Error,
    _ctx: Arc<Context<S>>,
) -> Action {
    warn!(name = %root_shard.name_any(), "RootShard reconciliation failed: {error:?}");
    error_action(error)
}

impl RootShard {
    /// Applies every dependent in the order their references require: issuers before the
    /// certificates they sign, certificates before the workload mounting their secrets.
    async fn apply<S: Store>(&self, store: &S, ns: &str) -> Result<()> {
        let owner = Owner::of(self)?;

        let ca_source = self.spec.certificates.root_ca_source()?;
        if ca_source == RootCaSource::SelfSigned {
            ensure(store, ns, &owner, &rootshard::self_signed_issuer(self)).await?;
        }
        if !matches!(ca_source, RootCaSource::Secret(_)) {
            ensure(store, ns, &owner, &rootshard::root_ca_certificate(self)).await?;
        }
        ensure(store, ns, &owner, &rootshard::root_ca_issuer(self)).await?;

        let intermediates: Vec<Desired<_>> = CertificateAuthority::INTERMEDIATES
            .iter()
            .map(|ca| rootshard::ca_certificate(self, *ca))
            .collect();
        ensure_all(store, ns, &owner, &intermediates).await?;
        let issuers: Vec<Desired<_>> = CertificateAuthority::INTERMEDIATES
            .iter()
            .map(|ca| rootshard::ca_issuer(self, *ca))
            .collect();
        ensure_all(store, ns, &owner, &issuers).await?;

        let leaves: Vec<Desired<_>> = LEAVES
            .iter()
            .map(|kind| rootshard::leaf_certificate(self, *kind))
            .collect();
        ensure_all(store, ns, &owner, &leaves).await?;

        ensure(store, ns, &owner, &rootshard::deployment(self)).await?;
        ensure(store, ns, &owner, &rootshard::service(self)).await?;
        Ok(())
    }
}
