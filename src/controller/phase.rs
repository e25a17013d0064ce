//! Observed lifecycle of a parent: `"" -> Provisioning -> Running`, and `Deleting` from anywhere.
//!
//! Each transition is written to the status subresource before the pass continues. A parent
//! never leaves `Running` again on its own; only deletion moves it on.

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::{
    ComponentStatus, Condition, ConditionStatus, FrontProxy, Phase, RootShard,
};
use crate::reconciling::{Object, Store};
use crate::{Error, Result};

pub const AVAILABLE_CONDITION: &str = "Available";

/// A parent kind whose status is a [`ComponentStatus`].
pub trait Parent: Object {
    fn observed_status(&self) -> ComponentStatus;
}

impl Parent for RootShard {
    fn observed_status(&self) -> ComponentStatus {
        self.status.clone().unwrap_or_default()
    }
}

impl Parent for FrontProxy {
    fn observed_status(&self) -> ComponentStatus {
        self.status.clone().unwrap_or_default()
    }
}

/// Ready replicas compared to desired replicas of a workload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Readiness {
    pub ready: i32,
    pub desired: i32,
}

impl Readiness {
    pub fn of(deployment: &Deployment) -> Self {
        Readiness {
            ready: deployment
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
            desired: deployment
                .spec
                .as_ref()
                .and_then(|s| s.replicas)
                .unwrap_or(0),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready == self.desired
    }
}

/// Phase at the start of a pass. Deletion takes precedence over everything else.
pub fn on_observe(phase: Phase, deleting: bool) -> Phase {
    match phase {
        _ if deleting => Phase::Deleting,
        Phase::Unset => Phase::Provisioning,
        other => other,
    }
}

/// Phase once the dependents are applied and the workload has been looked at.
pub fn on_readiness(phase: Phase, readiness: Option<Readiness>) -> Phase {
    match (phase, readiness) {
        (Phase::Provisioning, Some(r)) if r.is_ready() => Phase::Running,
        (other, _) => other,
    }
}

/// Sets `condition`, keeping the previous transition time if its status did not change.
fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

fn available(status: ConditionStatus, reason: &str, message: String) -> Condition {
    Condition {
        type_: AVAILABLE_CONDITION.to_string(),
        status,
        reason: Some(reason.to_string()),
        message: Some(message),
        last_transition_time: Some(Utc::now()),
    }
}

impl ComponentStatus {
    pub fn update_required(&self, other: &Self) -> bool {
        self != other
    }
}

async fn write_status<P: Parent, S: Store>(
    store: &S,
    parent: &P,
    current: &ComponentStatus,
    new_status: &ComponentStatus,
) -> Result<()> {
    if !current.update_required(new_status) {
        debug!(new_status = ?new_status, "Not updating status because it is unchanged.");
        return Ok(());
    }

    let ns = parent
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    store
        .apply_status::<P>(&ns, &parent.name_any(), serde_json::to_value(new_status)?)
        .await
}

/// Applies the deletion/initialization transition and persists it.
pub async fn observe<P: Parent, S: Store>(store: &S, parent: &P) -> Result<ComponentStatus> {
    let current = parent.observed_status();
    let deleting = parent.meta().deletion_timestamp.is_some();

    let mut status = current.clone();
    status.phase = on_observe(current.phase, deleting);
    if status.phase != current.phase {
        info!(from = ?current.phase, to = ?status.phase, "Phase transition");
    }
    write_status(store, parent, &current, &status).await?;
    Ok(status)
}

/// Records workload readiness and the resulting phase.
pub async fn conclude<P: Parent, S: Store>(
    store: &S,
    parent: &P,
    current: ComponentStatus,
    workload: Option<&Deployment>,
) -> Result<ComponentStatus> {
    let readiness = workload.map(Readiness::of);

    let mut status = current.clone();
    status.phase = on_readiness(current.phase, readiness);
    if status.phase != current.phase {
        info!(from = ?current.phase, to = ?status.phase, "Phase transition");
    }

    let condition = match readiness {
        Some(r) if r.is_ready() => available(
            ConditionStatus::True,
            "ReplicasReady",
            format!("{}/{} replicas ready", r.ready, r.desired),
        ),
        Some(r) => available(
            ConditionStatus::False,
            "ReplicasNotReady",
            format!("{}/{} replicas ready", r.ready, r.desired),
        ),
        None => available(
            ConditionStatus::Unknown,
            "DeploymentMissing",
            "workload has not been created yet".to_string(),
        ),
    };
    set_condition(&mut status.conditions, condition);

    write_status(store, parent, &current, &status).await?;
    Ok(status)
}

/// Surfaces a configuration error on the parent so the user can correct it.
///
/// Failing to write the condition is logged; the configuration error is what the caller reports.
pub async fn reject<P: Parent, S: Store>(
    store: &S,
    parent: &P,
    current: ComponentStatus,
    error: &Error,
) {
    let mut status = current.clone();
    set_condition(
        &mut status.conditions,
        available(ConditionStatus::False, "InvalidConfiguration", error.to_string()),
    );
    if let Err(e) = write_status(store, parent, &current, &status).await {
        warn!("Failed to record configuration error in status: {e:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};

    fn deployment(desired: i32, ready: Option<i32>) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(desired),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: ready,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn first_observation_starts_provisioning() {
        assert_eq!(on_observe(Phase::Unset, false), Phase::Provisioning);
        assert_eq!(on_observe(Phase::Provisioning, false), Phase::Provisioning);
        assert_eq!(on_observe(Phase::Running, false), Phase::Running);
    }

    #[test]
    fn deletion_wins_over_any_phase() {
        for phase in [Phase::Unset, Phase::Provisioning, Phase::Running, Phase::Deleting] {
            assert_eq!(on_observe(phase, true), Phase::Deleting);
        }
    }

    #[test]
    fn running_once_all_replicas_are_ready() {
        let ready = Readiness::of(&deployment(2, Some(2)));
        let partial = Readiness::of(&deployment(2, Some(1)));
        let none = Readiness::of(&deployment(2, None));

        assert_eq!(on_readiness(Phase::Provisioning, Some(ready)), Phase::Running);
        assert_eq!(on_readiness(Phase::Provisioning, Some(partial)), Phase::Provisioning);
        assert_eq!(on_readiness(Phase::Provisioning, Some(none)), Phase::Provisioning);
        assert_eq!(on_readiness(Phase::Provisioning, None), Phase::Provisioning);
    }

    #[test]
    fn running_does_not_regress() {
        let partial = Readiness::of(&deployment(3, Some(1)));
        assert_eq!(on_readiness(Phase::Running, Some(partial)), Phase::Running);
        assert_eq!(on_readiness(Phase::Deleting, Some(partial)), Phase::Deleting);
    }

    #[test]
    fn condition_transition_time_is_kept_while_status_holds() {
        let mut conditions = vec![];
        set_condition(&mut conditions, available(ConditionStatus::False, "ReplicasNotReady", "0/1".into()));
        let first = conditions[0].last_transition_time;

        set_condition(&mut conditions, available(ConditionStatus::False, "ReplicasNotReady", "0/1".into()));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first);

        set_condition(&mut conditions, available(ConditionStatus::True, "ReplicasReady", "1/1".into()));
        assert_eq!(conditions[0].status, ConditionStatus::True);
    }
}
