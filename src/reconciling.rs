//! Idempotent "ensure" protocol for dependent objects.
//!
//! A [`Desired`] couples the name of a dependent object with a mutator that sets every field the
//! operator owns on top of whatever the store currently holds. [`ensure`] fetches, mutates,
//! injects the owner reference and writes only if the result differs from what was read.

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::events::{Event, EventType};
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

pub use store::{KubeStore, Object, Store};

use crate::{Error, Result};

mod store;
#[cfg(test)]
pub(crate) mod testing;

/// Attempts per object before a conflict is handed back to the caller.
const MAX_CONFLICT_RETRIES: usize = 5;

pub type Mutator<K> = Box<dyn Fn(K) -> Result<K> + Send + Sync>;

/// Name and mutator of one dependent object.
pub struct Desired<K> {
    pub name: String,
    pub mutate: Mutator<K>,
}

impl<K> Desired<K> {
    pub fn new(
        name: impl Into<String>,
        mutate: impl Fn(K) -> Result<K> + Send + Sync + 'static,
    ) -> Self {
        Desired {
            name: name.into(),
            mutate: Box::new(mutate),
        }
    }
}

/// The parent all dependents of one pass are attached to.
#[derive(Clone, Debug)]
pub struct Owner {
    pub reference: OwnerReference,
    pub object: ObjectReference,
}

impl Owner {
    pub fn of<P: Object>(parent: &P) -> Result<Self> {
        let reference = parent
            .controller_owner_ref(&())
            .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
        Ok(Owner {
            reference,
            object: parent.object_ref(&()),
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

/// Brings the object named by `desired` in line with its mutator.
///
/// A conflict on write restarts from a fresh read, never from the stale base.
pub async fn ensure<K, S>(
    store: &S,
    namespace: &str,
    owner: &Owner,
    desired: &Desired<K>,
) -> Result<Outcome>
where
    K: Object + Default,
    S: Store,
{
    let kind = K::kind(&());
    let mut attempt = 0;
    loop {
        attempt += 1;
        match ensure_once(store, namespace, owner, desired).await {
            Err(Error::Conflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                debug!(%kind, name = %desired.name, namespace, attempt, "Conflict while writing, retrying from a fresh read");
            }
            Ok(outcome) => {
                if outcome != Outcome::Unchanged {
                    info!(%kind, name = %desired.name, namespace, ?outcome, "Applied dependent object");
                    publish(store, owner, &kind, &desired.name, outcome).await;
                }
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        }
    }
}

async fn ensure_once<K, S>(
    store: &S,
    namespace: &str,
    owner: &Owner,
    desired: &Desired<K>,
) -> Result<Outcome>
where
    K: Object + Default,
    S: Store,
{
    let existing: Option<K> = store.get(namespace, &desired.name).await?;
    let base = match &existing {
        Some(current) => current.clone(),
        None => {
            let mut fresh = K::default();
            fresh.meta_mut().name = Some(desired.name.clone());
            fresh.meta_mut().namespace = Some(namespace.to_string());
            fresh
        }
    };

    let mut object = (desired.mutate)(base)?;
    // Mutators must not rename or move the object.
    object.meta_mut().name = Some(desired.name.clone());
    object.meta_mut().namespace = Some(namespace.to_string());
    set_owner_reference(&mut object, &owner.reference);

    match existing {
        None => {
            store.create(namespace, &object).await?;
            Ok(Outcome::Created)
        }
        Some(current) if serde_json::to_value(&current)? == serde_json::to_value(&object)? => {
            Ok(Outcome::Unchanged)
        }
        Some(_) => {
            store.replace(namespace, &desired.name, &object).await?;
            Ok(Outcome::Updated)
        }
    }
}

/// Applies each object in order and stops at the first error.
pub async fn ensure_all<K, S>(
    store: &S,
    namespace: &str,
    owner: &Owner,
    desired: &[Desired<K>],
) -> Result<()>
where
    K: Object + Default,
    S: Store,
{
    for d in desired {
        ensure(store, namespace, owner, d).await?;
    }
    Ok(())
}

/// Replaces an owner reference with the same uid, or appends one.
fn set_owner_reference<K: Resource>(object: &mut K, owner: &OwnerReference) {
    let refs = object.meta_mut().owner_references.get_or_insert_with(Vec::new);
    match refs.iter_mut().find(|r| r.uid == owner.uid) {
        Some(existing) => *existing = owner.clone(),
        None => refs.push(owner.clone()),
    }
}

async fn publish<S: Store>(store: &S, owner: &Owner, kind: &str, name: &str, outcome: Outcome) {
    let (action, reason) = match outcome {
        Outcome::Created => ("Creating", "DependentCreated"),
        Outcome::Updated => ("Updating", "DependentUpdated"),
        Outcome::Unchanged => return,
    };
    let event = Event {
        type_: EventType::Normal,
        reason: reason.into(),
        note: Some(format!("{kind} \"{name}\"")),
        action: action.into(),
        secondary: None,
    };
    if let Err(e) = store.publish(&owner.object, event).await {
        warn!(owner = %owner.reference.name, "Failed to publish event: {e:?}");
    }
}

/// Merges `labels` into the object's labels, keeping labels set by others.
pub fn merge_labels<K: ResourceExt>(
    object: &mut K,
    labels: &std::collections::BTreeMap<String, String>,
) {
    object
        .labels_mut()
        .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
}
