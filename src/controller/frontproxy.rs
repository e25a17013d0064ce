use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::controller::{error_action, phase, Context, FrontProxy, Phase, RootShard, RUNNING_REQUEUE};
use crate::reconciling::{ensure, ensure_all, Desired, Owner, Store};
use crate::resources::frontproxy;
use crate::resources::front_proxy_deployment_name;
use crate::{Error, Result};

#[instrument(skip_all, fields(namespace = ?front_proxy.namespace(), name = %front_proxy.name_any()))]
pub(in crate::controller) async fn reconcile_front_proxy<S: Store>(
    front_proxy: Arc<FrontProxy>,
    ctx: Arc<Context<S>>,
) -> Result<Action> {
    let ns = front_proxy
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    info!("Reconciling FrontProxy \"{}\" in {}", front_proxy.name_any(), ns);

    let Some(fp) = ctx.store.get::<FrontProxy>(&ns, &front_proxy.name_any()).await? else {
        debug!("FrontProxy is gone, nothing to do");
        return Ok(Action::await_change());
    };

    let status = phase::observe(&ctx.store, &fp).await?;
    if status.phase == Phase::Deleting {
        return Ok(Action::await_change());
    }

    let root_shard_name = &fp.spec.root_shard.reference.name;
    let Some(rs) = ctx.store.get::<RootShard>(&ns, root_shard_name).await? else {
        // picked up again through the RootShard watch once it exists
        return Err(Error::RootShardMissing {
            namespace: ns,
            name: root_shard_name.clone(),
        });
    };

    if let Err(e) = fp.apply(&ctx.store, &ns, &rs).await {
        if !e.is_retryable() {
            phase::reject(&ctx.store, &fp, status, &e).await;
        }
        return Err(e);
    }

    let workload = ctx
        .store
        .get::<Deployment>(&ns, &front_proxy_deployment_name(&fp))
        .await?;
    phase::conclude(&ctx.store, &fp, status, workload.as_ref()).await?;

    Ok(Action::requeue(RUNNING_REQUEUE))
}

pub(in crate::controller) fn front_proxy_error_policy<S>(
    front_proxy: Arc<FrontProxy>,
    error: &Error,
    _ctx: Arc<Context<S>>,
) -> Action {
    warn!(name = %front_proxy.name_any(), "FrontProxy reconciliation failed: {error:?}");
    error_action(error)
}

impl FrontProxy {
    async fn apply<S: Store>(&self, store: &S, ns: &str, rs: &RootShard) -> Result<()> {
        let owner = Owner::of(self)?;

        let certificates: Vec<Desired<_>> = frontproxy::CERTIFICATES
            .iter()
            .map(|kind| frontproxy::certificate(rs, self, *kind))
            .collect();
        ensure_all(store, ns, &owner, &certificates).await?;

        ensure(store, ns, &owner, &frontproxy::path_mapping(rs, self)).await?;
        ensure(store, ns, &owner, &frontproxy::dynamic_kubeconfig(rs, self)).await?;
        ensure(store, ns, &owner, &frontproxy::deployment(rs, self)).await?;
        ensure(store, ns, &owner, &frontproxy::service(self)).await?;
        Ok(())
    }
}
