//! In-memory [`Store`] with optimistic resource versions and fault injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::core::ErrorResponse;
use kube::runtime::events::Event;
use kube::ResourceExt;

use crate::controller::{
    Certificates, ExternalConfig, FrontProxy, FrontProxySpec, RootShard, RootShardConfig,
    RootShardReference, RootShardSpec,
};
use crate::reconciling::{Object, Store};
use crate::{Error, Result};

pub const CONCURRENT_WRITER_ANNOTATION: &str = "test.kcp.io/concurrent-writer";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Create,
    Replace,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Write {
    pub op: Op,
    pub kind: String,
    pub name: String,
}

type Key = (String, String, String);

/// Boolean fields the API server drops from its response when they are `false`.
const OMITTED_WHEN_FALSE: [&str; 3] = ["readOnly", "optional", "readOnlyRootFilesystem"];

/// Stores `object` the way the API server would return it.
fn persisted<K: Object>(object: &K) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(object)?;
    drop_false_flags(&mut value);
    Ok(value)
}

fn drop_false_flags(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|k, v| !(OMITTED_WHEN_FALSE.contains(&k.as_str()) && *v == false));
            map.values_mut().for_each(drop_false_flags);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(drop_false_flags),
        _ => {}
    }
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, serde_json::Value>,
    version: u64,
    writes: Vec<Write>,
    status_writes: Vec<serde_json::Value>,
    events: Vec<String>,
    conflicts: HashMap<(String, String), usize>,
    failures: Vec<(String, String)>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn key<K: Object>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).into_owned(), namespace.to_string(), name.to_string())
}

impl MemoryStore {
    /// Seeds an object as if a user had created it, assigning uid and resource version.
    pub fn insert<K: Object>(&self, mut object: K) -> K {
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        let meta = object.meta_mut();
        meta.uid.get_or_insert_with(|| format!("uid-{version}"));
        meta.resource_version = Some(version);
        let key = key::<K>(&object.namespace().unwrap(), &object.name_any());
        inner.objects.insert(key, serde_json::to_value(&object).unwrap());
        object
    }

    pub fn object<K: Object>(&self, namespace: &str, name: &str) -> Option<K> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&key::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn objects<K: Object>(&self) -> Vec<K> {
        let kind = K::kind(&());
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .map(|(_, v)| serde_json::from_value(v.clone()).unwrap())
            .collect()
    }

    /// Changes an object behind the operator's back, like another controller or a user would.
    pub fn modify<K: Object>(&self, namespace: &str, name: &str, f: impl FnOnce(&mut K)) {
        let mut object: K = self.object(namespace, name).expect("object to modify exists");
        f(&mut object);
        let mut inner = self.inner.lock().unwrap();
        object.meta_mut().resource_version = Some(inner.next_version());
        inner
            .objects
            .insert(key::<K>(namespace, name), serde_json::to_value(&object).unwrap());
    }

    pub fn inject_conflicts(&self, kind: &str, name: &str, times: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.conflicts.insert((kind.to_string(), name.to_string()), times);
    }

    pub fn inject_failure(&self, kind: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.push((kind.to_string(), name.to_string()));
    }

    pub fn writes(&self) -> Vec<Write> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn status_writes(&self) -> Vec<serde_json::Value> {
        self.inner.lock().unwrap().status_writes.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn clear_log(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.writes.clear();
        inner.status_writes.clear();
        inner.events.clear();
    }

    /// Fails the write with an injected error, or simulates a concurrent writer.
    fn intercept<K: Object>(inner: &mut Inner, namespace: &str, name: &str) -> Result<()> {
        let kind = K::kind(&()).into_owned();
        if inner.failures.contains(&(kind.clone(), name.to_string())) {
            return Err(Error::KubeError(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("injected failure for {kind} {name}"),
                reason: "InternalError".to_string(),
                code: 500,
            })));
        }
        let Some(remaining) = inner.conflicts.get_mut(&(kind.clone(), name.to_string())) else {
            return Ok(());
        };
        if *remaining == 0 {
            return Ok(());
        }
        *remaining -= 1;

        let version = inner.next_version();
        if let Some(stored) = inner.objects.get_mut(&key::<K>(namespace, name)) {
            stored["metadata"]["resourceVersion"] = serde_json::Value::String(version.clone());
            stored["metadata"]["annotations"][CONCURRENT_WRITER_ANNOTATION] =
                serde_json::Value::String(version);
        }
        Err(Error::Conflict {
            kind,
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.object(namespace, name))
    }

    async fn create<K: Object>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object.name_any();
        let mut inner = self.inner.lock().unwrap();
        Self::intercept::<K>(&mut inner, namespace, &name)?;
        let key = key::<K>(namespace, &name);
        if inner.objects.contains_key(&key) {
            return Err(Error::Conflict {
                kind: key.0,
                name,
            });
        }

        let mut created = object.clone();
        let version = inner.next_version();
        created.meta_mut().uid = Some(format!("uid-{version}"));
        created.meta_mut().resource_version = Some(version);
        inner.objects.insert(key.clone(), persisted(&created)?);
        inner.writes.push(Write {
            op: Op::Create,
            kind: key.0,
            name,
        });
        Ok(created)
    }

    async fn replace<K: Object>(&self, namespace: &str, name: &str, object: &K) -> Result<K> {
        let mut inner = self.inner.lock().unwrap();
        Self::intercept::<K>(&mut inner, namespace, name)?;
        let key = key::<K>(namespace, name);
        let stored_version = inner
            .objects
            .get(&key)
            .and_then(|v| v["metadata"]["resourceVersion"].as_str().map(String::from));
        if stored_version.is_none() || stored_version != object.meta().resource_version {
            return Err(Error::Conflict {
                kind: key.0,
                name: name.to_string(),
            });
        }

        let mut replaced = object.clone();
        replaced.meta_mut().resource_version = Some(inner.next_version());
        inner.objects.insert(key.clone(), persisted(&replaced)?);
        inner.writes.push(Write {
            op: Op::Replace,
            kind: key.0,
            name: name.to_string(),
        });
        Ok(replaced)
    }

    async fn apply_status<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        let Some(stored) = inner.objects.get_mut(&key::<K>(namespace, name)) else {
            return Err(Error::KubeError(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("{name} not found"),
                reason: "NotFound".to_string(),
                code: 404,
            })));
        };
        stored["status"] = status.clone();
        stored["metadata"]["resourceVersion"] = serde_json::Value::String(version);
        inner.status_writes.push(status);
        Ok(())
    }

    async fn publish(&self, _regarding: &ObjectReference, event: Event) -> Result<()> {
        self.inner.lock().unwrap().events.push(event.reason);
        Ok(())
    }
}

pub fn root_shard(name: &str, namespace: &str) -> RootShard {
    let mut rs = RootShard::new(
        name,
        RootShardSpec {
            external: ExternalConfig {
                hostname: "api.kcp.example.com".to_string(),
                port: 6443,
            },
            certificates: Certificates::default(),
            etcd: Default::default(),
            image: None,
            replicas: None,
            cluster_domain: None,
            auth: None,
        },
    );
    rs.metadata.namespace = Some(namespace.to_string());
    rs
}

pub fn front_proxy(name: &str, namespace: &str, root_shard: &str) -> FrontProxy {
    let mut fp = FrontProxy::new(
        name,
        FrontProxySpec {
            root_shard: RootShardConfig {
                reference: RootShardReference {
                    name: root_shard.to_string(),
                },
            },
            replicas: None,
            auth: None,
            additional_path_mappings: vec![],
            image: None,
            external_hostname: "kcp.example.com".to_string(),
        },
    );
    fp.metadata.namespace = Some(namespace.to_string());
    fp
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Pod;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn false_flags_are_dropped_like_the_api_server_does() {
        let store = MemoryStore::default();
        let pod: Pod = serde_json::from_value(json!({
            "metadata": { "name": "p", "namespace": "kcp" },
            "spec": { "containers": [{
                "name": "c",
                "volumeMounts": [
                    { "name": "a", "mountPath": "/a", "readOnly": false },
                    { "name": "b", "mountPath": "/b", "readOnly": true },
                ],
            }]},
        }))
        .unwrap();
        store.create("kcp", &pod).await.unwrap();

        let stored: Pod = store.object("kcp", "p").unwrap();
        let mounts = stored.spec.unwrap().containers[0].volume_mounts.clone().unwrap();
        assert_eq!(mounts[0].read_only, None);
        assert_eq!(mounts[1].read_only, Some(true));
    }
}
