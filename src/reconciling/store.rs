use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, Recorder, Reporter};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::{Error, Result};

/// Any namespaced object the operator reads or writes.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// The cluster state store as seen by the reconcilers.
///
/// `create` and `replace` report a concurrent modification as [`Error::Conflict`]; `replace`
/// carries the resource version of the object it was derived from.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create<K: Object>(&self, namespace: &str, object: &K) -> Result<K>;

    async fn replace<K: Object>(&self, namespace: &str, name: &str, object: &K) -> Result<K>;

    /// Writes the status subresource of `K`.
    async fn apply_status<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()>;

    async fn publish(&self, regarding: &ObjectReference, event: Event) -> Result<()>;
}

/// [`Store`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    reporter: Arc<Reporter>,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, reporter: Reporter) -> Self {
        KubeStore {
            client,
            field_manager: reporter.controller.clone(),
            reporter: Arc::new(reporter),
        }
    }

    fn event_recorder(&self, reference: ObjectReference) -> Recorder {
        Recorder::new(self.client.clone(), (*self.reporter).clone(), reference)
    }

    fn post_params(&self) -> PostParams {
        let mut pp = PostParams::default();
        pp.field_manager = Some(self.field_manager.clone());
        pp
    }
}

fn conflict_aware<K: Object>(name: &str) -> impl FnOnce(kube::Error) -> Error + '_ {
    move |e| match e {
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
            kind: K::kind(&()).into_owned(),
            name: name.to_string(),
        },
        e => Error::KubeError(e),
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create<K: Object>(&self, namespace: &str, object: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let name = object.meta().name.clone().unwrap_or_default();
        api.create(&self.post_params(), object)
            .await
            .map_err(conflict_aware::<K>(&name))
    }

    async fn replace<K: Object>(&self, namespace: &str, name: &str, object: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &self.post_params(), object)
            .await
            .map_err(conflict_aware::<K>(name))
    }

    async fn apply_status<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let new_status_patch = Patch::Apply(json!({
            "apiVersion": K::api_version(&()),
            "kind": K::kind(&()),
            "status": status
        }));
        let ps = PatchParams::apply(&self.field_manager).force();
        api.patch_status(name, &ps, &new_status_patch)
            .await
            .map_err(Error::KubeError)?;

        Ok(())
    }

    async fn publish(&self, regarding: &ObjectReference, event: Event) -> Result<()> {
        self.event_recorder(regarding.clone()).publish(event).await?;
        Ok(())
    }
}
