use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::runtime::events::Reporter;
use kube::runtime::reflector::{ObjectRef, Store as ReflectorStore};
use kube::runtime::watcher::Config;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tokio_stream::StreamExt as TokioStreamExt;
use tracing::{error, info};

pub use crd::*;

use crate::certmanager::{Certificate, Issuer};
use crate::controller::frontproxy::{front_proxy_error_policy, reconcile_front_proxy};
use crate::controller::rootshard::{reconcile_root_shard, root_shard_error_policy};
use crate::reconciling::{KubeStore, Object};
use crate::{Error, Result};

mod crd;
mod frontproxy;
pub mod phase;
mod rootshard;

pub const CONTROLLER_NAME: &str = "kcp-operator";

/// Next visit of a healthy parent when no watch event arrives first.
pub(in crate::controller) const RUNNING_REQUEUE: Duration = Duration::from_secs(5 * 60);
/// Backoff after a failed pass that may succeed on its own.
pub(in crate::controller) const RETRY_REQUEUE: Duration = Duration::from_secs(30);

/// Process-level settings, read from the environment.
#[derive(Clone, Debug, Default)]
pub struct State {
    /// Restricts all watches to one namespace; all namespaces when unset.
    pub watch_namespace: Option<String>,
    /// Reported as the instance of the events this controller emits.
    pub pod_name: Option<String>,
}

impl State {
    pub fn from_env() -> Self {
        State {
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .ok()
                .filter(|ns| !ns.is_empty()),
            pod_name: std::env::var("CONTROLLER_POD_NAME").ok(),
        }
    }

    fn to_context(&self, client: Client, reporter: Reporter) -> Arc<Context<KubeStore>> {
        Arc::new(Context {
            store: KubeStore::new(client, reporter),
        })
    }

    fn api<K: Object>(&self, client: &Client) -> Api<K> {
        match &self.watch_namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        }
    }
}

pub(in crate::controller) struct Context<S> {
    pub store: S,
}

pub(in crate::controller) fn error_action(error: &Error) -> Action {
    if error.is_retryable() {
        Action::requeue(RETRY_REQUEUE)
    } else {
        // nothing changes until the parent is edited
        Action::await_change()
    }
}

pub async fn run(state: State) -> Result<()> {
    let client = Client::try_default().await?;
    let root_shards = state.api::<RootShard>(&client);
    let front_proxies = state.api::<FrontProxy>(&client);
    let reporter = Reporter {
        controller: CONTROLLER_NAME.into(),
        instance: state.pod_name.clone(),
    };

    // Verify that we can access the CRDs. If we can't, this usually means that
    // the CRDs are not installed. (Could also be a permissions issue.)
    if let Err(e) = root_shards.list(&ListParams::default().limit(1)).await {
        error!("CRD RootShard is not queryable; {e:?}. Is the CRD installed?");
        return Err(e.into());
    }
    if let Err(e) = front_proxies.list(&ListParams::default().limit(1)).await {
        error!("CRD FrontProxy is not queryable; {e:?}. Is the CRD installed?");
        return Err(e.into());
    }
    info!(namespace = ?state.watch_namespace, "Starting controllers");

    let context = state.to_context(client.clone(), reporter);
    let root_shard_controller = Controller::new(root_shards.clone(), Config::default().any_semantic())
        .owns(state.api::<Certificate>(&client), Config::default().any_semantic())
        .owns(state.api::<Issuer>(&client), Config::default().any_semantic())
        .owns(state.api::<Deployment>(&client), Config::default().any_semantic())
        .owns(state.api::<Service>(&client), Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile_root_shard, root_shard_error_policy, context.clone())
        .map(|_| ());

    let front_proxy_controller = futures::StreamExt::boxed({
        let controller = Controller::new(front_proxies, Config::default().any_semantic());
        let front_proxy_store = controller.store();
        controller
            .owns(state.api::<Certificate>(&client), Config::default().any_semantic())
            .owns(state.api::<ConfigMap>(&client), Config::default().any_semantic())
            .owns(state.api::<Secret>(&client), Config::default().any_semantic())
            .owns(state.api::<Deployment>(&client), Config::default().any_semantic())
            .owns(state.api::<Service>(&client), Config::default().any_semantic())
            .watches(root_shards, Config::default().any_semantic(), move |root_shard| {
                referencing_front_proxies(&front_proxy_store, &root_shard)
            })
            .shutdown_on_signal()
            .run(reconcile_front_proxy, front_proxy_error_policy, context.clone())
            .map(|_| ())
    });

    futures::StreamExt::for_each(
        root_shard_controller.merge(front_proxy_controller),
        |_| futures::future::ready(()))
        .await;
    Ok(())
}

/// FrontProxies in the RootShard's namespace that point at it.
fn referencing_front_proxies(
    front_proxy_store: &ReflectorStore<FrontProxy>,
    root_shard: &RootShard,
) -> Vec<ObjectRef<FrontProxy>> {
    front_proxy_store
        .state()
        .into_iter()
        .filter(|fp| {
            fp.namespace() == root_shard.namespace()
                && fp.spec.root_shard.reference.name == root_shard.name_any()
        })
        .map(|fp| ObjectRef::from_obj(&*fp))
        .collect()
}
