//! Dependency Unwinder
//!
//! Runs a kind's [`UnwindStep`]s before its destructive call. Per-dependent
//! detach failures are recorded and the fan-out continues; any error-severity
//! diagnostic stops the unwind before it waits on or deletes anything.

use crate::classifier::{ClassifiedOutcome, classify_delete_outcome};
use crate::config::PollingConfig;
use crate::descriptor::{StatusGate, UnwindStep, descriptor_for};
use crate::diagnostics::Diagnostics;
use crate::error::{Error, RemoteResult};
use crate::model::{ListFilter, Patch, RemoteResource, ResourceKind};
use crate::poller::{StatusObservation, await_status};
use crate::traits::ControlPlane;
use tracing::{debug, info, warn};

/// How the unwind ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindOutcome {
    /// Every step completed; the destructive call may proceed
    Ready,
    /// The resource reached its deleted status while settling
    AlreadyDeleted,
    /// A step failed; the diagnostics say why
    Aborted,
}

/// Read a resource's status, reporting a missing resource as its deleted status
pub(crate) async fn observe_status(
    plane: &dyn ControlPlane,
    kind: ResourceKind,
    id: &str,
) -> RemoteResult<StatusObservation> {
    match plane.get(kind, id).await {
        Ok(resource) => Ok(StatusObservation::now(resource.status)),
        Err(e) if e.is_not_found() => Ok(StatusObservation::now(
            descriptor_for(kind).deleted_status,
        )),
        Err(e) => Err(e),
    }
}

pub struct Unwinder<'a> {
    plane: &'a dyn ControlPlane,
    polling: &'a PollingConfig,
}

impl<'a> Unwinder<'a> {
    pub fn new(plane: &'a dyn ControlPlane, polling: &'a PollingConfig) -> Self {
        Self { plane, polling }
    }

    /// Run every unwind step for `resource` in order
    pub async fn unwind(
        &self,
        kind: ResourceKind,
        resource: &RemoteResource,
    ) -> (UnwindOutcome, Diagnostics) {
        let mut diags = Diagnostics::new();

        for step in descriptor_for(kind).unwind {
            debug!(kind = %kind, resource_id = %resource.id, step = ?step, "Unwind step");

            let result = match *step {
                UnwindStep::DetachDependents {
                    dependent,
                    relation,
                } => {
                    self.detach_dependents(kind, resource, dependent, relation, &mut diags)
                        .await
                }
                UnwindStep::ClearOwnRelation { relation, gate } => {
                    self.clear_own_relation(kind, resource, relation, gate).await
                }
                UnwindStep::DisableFlag { field } => {
                    self.disable_flag(kind, resource, field, &mut diags).await;
                    Ok(())
                }
                UnwindStep::TerminateDependents {
                    dependent,
                    relation,
                } => {
                    self.terminate_dependents(kind, resource, dependent, relation, &mut diags)
                        .await
                }
                UnwindStep::AwaitSettled { targets } => {
                    if diags.has_error() {
                        return (UnwindOutcome::Aborted, diags);
                    }
                    let plane = self.plane;
                    let id = resource.id.as_str();
                    let (reached, poll_diags) = await_status(
                        id,
                        || observe_status(plane, kind, id),
                        targets,
                        &self.polling.teardown,
                    )
                    .await;
                    diags.extend(poll_diags);
                    match reached {
                        None => return (UnwindOutcome::Aborted, diags),
                        Some(status) if status == descriptor_for(kind).deleted_status => {
                            info!(kind = %kind, resource_id = %resource.id, "Resource deleted while settling");
                            return (UnwindOutcome::AlreadyDeleted, diags);
                        }
                        Some(_) => Ok(()),
                    }
                }
            };

            if let Err(err) = result {
                warn!(kind = %kind, resource_id = %resource.id, error = %err, "Unwind aborted");
                diags.push_failure(&err);
                return (UnwindOutcome::Aborted, diags);
            }
        }

        if diags.has_error() {
            (UnwindOutcome::Aborted, diags)
        } else {
            (UnwindOutcome::Ready, diags)
        }
    }

    async fn detach_dependents(
        &self,
        kind: ResourceKind,
        resource: &RemoteResource,
        dependent: ResourceKind,
        relation: &str,
        diags: &mut Diagnostics,
    ) -> Result<(), Error> {
        let filter = ListFilter::new().with(relation, resource.id.as_str());
        let dependents = self.plane.list(dependent, &filter).await.map_err(|e| {
            Error::call(
                format!("failed to list {} attached to {}", dependent, kind),
                &resource.id,
                e,
            )
        })?;

        for dep in dependents {
            let patch = Patch::new().clear(relation);
            match self.plane.patch(dependent, &dep.id, &patch).await {
                Ok(()) => info!(
                    kind = %kind,
                    resource_id = %resource.id,
                    dependent_id = %dep.id,
                    "Detached {}", dependent
                ),
                Err(e) => {
                    warn!(dependent_id = %dep.id, error = %e, "Failed to detach {}", dependent);
                    diags.push_resource_error(format!("failed to detach {}", dependent), &dep.id, e);
                }
            }
        }
        Ok(())
    }

    async fn clear_own_relation(
        &self,
        kind: ResourceKind,
        resource: &RemoteResource,
        relation: &str,
        gate: Option<StatusGate>,
    ) -> Result<(), Error> {
        let Some(owner_id) = resource.relation(relation) else {
            return Ok(());
        };

        if let Some(gate) = gate {
            check_gate(self.plane, &gate, owner_id).await?;
        }

        self.plane
            .patch(kind, &resource.id, &Patch::new().clear(relation))
            .await
            .map_err(|e| Error::call(format!("failed to detach {}", kind), &resource.id, e))?;
        info!(kind = %kind, resource_id = %resource.id, owner_id = %owner_id, "Cleared {}", relation);
        Ok(())
    }

    async fn disable_flag(
        &self,
        kind: ResourceKind,
        resource: &RemoteResource,
        field: &str,
        diags: &mut Diagnostics,
    ) {
        if !resource.flag(field) {
            return;
        }
        let patch = Patch::new().set(field, false);
        match self.plane.patch(kind, &resource.id, &patch).await {
            Ok(()) => info!(kind = %kind, resource_id = %resource.id, "Disabled {}", field),
            Err(e) => diags.push_resource_error(format!("failed to disable {}", field), &resource.id, e),
        }
    }

    async fn terminate_dependents(
        &self,
        kind: ResourceKind,
        resource: &RemoteResource,
        dependent: ResourceKind,
        relation: &str,
        diags: &mut Diagnostics,
    ) -> Result<(), Error> {
        let desc = descriptor_for(dependent);
        let filter = ListFilter::new().with(relation, resource.id.as_str());
        let records = self.plane.list(dependent, &filter).await.map_err(|e| {
            Error::call(
                format!("failed to list {} of {}", dependent, kind),
                &resource.id,
                e,
            )
        })?;

        for record in records.iter().filter(|r| r.status != desc.deleted_status) {
            let result = self.plane.delete(dependent, &record.id).await;
            let reported = result.as_ref().ok().map(|r| r.status.clone());

            let reason = match classify_delete_outcome(result, desc.detail_key, desc.deleted_status) {
                ClassifiedOutcome::Satisfied(reason) => reason,
                ClassifiedOutcome::Fatal(e) => {
                    return Err(Error::call(format!("failed to delete {}", dependent), &record.id, e));
                }
            };
            info!(
                kind = %kind,
                resource_id = %resource.id,
                dependent_id = %record.id,
                "{} {}", dependent, reason.message()
            );

            if reason.is_confirmed() || reported.as_deref() == Some(desc.deleted_status) {
                continue;
            }

            let plane = self.plane;
            let id = record.id.as_str();
            let (reached, poll_diags) = await_status(
                id,
                || observe_status(plane, dependent, id),
                &[desc.deleted_status],
                &self.polling.teardown,
            )
            .await;
            diags.extend(poll_diags);
            if reached.is_none() {
                // exhaustion already recorded an error naming the dependent
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Fail unless the owner at `owner_id` is in the gate's status
pub(crate) async fn check_gate(
    plane: &dyn ControlPlane,
    gate: &StatusGate,
    owner_id: &str,
) -> Result<(), Error> {
    let owner = plane
        .get(gate.owner, owner_id)
        .await
        .map_err(|e| Error::call(format!("failed to get {}", gate.owner), owner_id, e))?;

    if owner.status != gate.required_status {
        return Err(Error::precondition(
            gate.summary,
            owner_id,
            format!("{} (status: {})", gate.message, owner.status),
        ));
    }
    Ok(())
}
