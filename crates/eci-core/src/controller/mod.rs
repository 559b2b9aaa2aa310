// Lifecycle Controller
//
// Generic create/read/update/delete over any resource kind. Everything that
// differs between kinds comes from the descriptor table; the controller only
// sequences calls, polls, unwinds and classifies.
//
// Every operation returns an Outcome: what is known about the resource
// (present, absent, or unknown after a failed read) plus ordered diagnostics. An error-severity diagnostic
// means the operation did not complete.

use crate::classifier::{ClassifiedOutcome, classify_delete_outcome};
use crate::config::{EciConfig, PollingConfig};
use crate::descriptor::{CreateCheck, DeleteMode, ResourceDescriptor, descriptor_for};
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::model::{
    Attributes, DataSourceKind, FieldDeltas, InfraRecord, ListFilter, NAME_ILIKE, Patch,
    RemoteResource, ResourceKind,
};
use crate::poller::await_status;
use crate::traits::ControlPlane;
use crate::unwinder::{UnwindOutcome, Unwinder, check_gate, observe_status};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the last read established about a resource
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "existence", content = "resource", rename_all = "snake_case")]
pub enum Observed {
    Present(RemoteResource),
    /// Never created, deleted, or reported gone by the control plane
    #[default]
    Absent,
    /// The read failed; the resource may still exist
    Unknown,
}

impl Observed {
    pub fn resource(&self) -> Option<&RemoteResource> {
        match self {
            Observed::Present(resource) => Some(resource),
            _ => None,
        }
    }

    pub fn into_resource(self) -> Option<RemoteResource> {
        match self {
            Observed::Present(resource) => Some(resource),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Observed::Present(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Observed::Absent)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Observed::Unknown)
    }
}

/// Result of a lifecycle operation
#[derive(Debug, Clone, Default, Serialize)]
pub struct Outcome {
    pub state: Observed,
    pub diagnostics: Diagnostics,
}

impl Outcome {
    fn absent(diagnostics: Diagnostics) -> Self {
        Self {
            state: Observed::Absent,
            diagnostics,
        }
    }

    fn present(state: RemoteResource, diagnostics: Diagnostics) -> Self {
        Self {
            state: Observed::Present(state),
            diagnostics,
        }
    }

    fn unknown(diagnostics: Diagnostics) -> Self {
        Self {
            state: Observed::Unknown,
            diagnostics,
        }
    }

    /// True when no error-severity diagnostic was recorded
    pub fn is_success(&self) -> bool {
        !self.diagnostics.has_error()
    }
}

/// Result of a catalogue lookup
#[derive(Debug, Clone, Default, Serialize)]
pub struct LookupOutcome {
    /// The single matching entry
    pub entry: Option<InfraRecord>,
    pub diagnostics: Diagnostics,
}

impl LookupOutcome {
    fn failed(diagnostics: Diagnostics) -> Self {
        Self {
            entry: None,
            diagnostics,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.diagnostics.has_error()
    }
}

// Two entries are enough to tell "unique" from "ambiguous".
const LOOKUP_COUNT: usize = 2;

/// Drives resources toward their desired state through a [`ControlPlane`]
pub struct LifecycleController {
    plane: Arc<dyn ControlPlane>,
    polling: PollingConfig,
}

impl LifecycleController {
    pub fn new(plane: Arc<dyn ControlPlane>, polling: PollingConfig) -> Self {
        Self { plane, polling }
    }

    /// Create a controller after validating `config`
    pub fn from_config(plane: Arc<dyn ControlPlane>, config: &EciConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(plane, config.polling))
    }

    pub fn plane(&self) -> &dyn ControlPlane {
        self.plane.as_ref()
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }

    /// Create a resource and wait until it is ready
    ///
    /// Creation checks run before anything is sent. Fields the control plane
    /// only accepts after creation go out in a follow-up patch. When the ready
    /// wait is exhausted the last observed state is still returned, alongside
    /// the error.
    pub async fn create(&self, kind: ResourceKind, spec: &Attributes) -> Outcome {
        let desc = descriptor_for(kind);
        let mut diags = Diagnostics::new();

        for check in desc.create_checks {
            if let Err(err) = self.run_create_check(check, spec).await {
                warn!(kind = %kind, error = %err, "Create check failed");
                diags.push_failure(&err);
                return Outcome::absent(diags);
            }
        }

        let (body, follow_up) = split_post_create(desc, spec);

        let id = match self.plane.create(kind, &body).await {
            Ok(id) => id,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Create failed");
                diags.push_error(format!("failed to create {}", kind), format!("reason: {}", e));
                return Outcome::absent(diags);
            }
        };
        info!(kind = %kind, resource_id = %id, "Created");

        if !follow_up.is_empty() {
            if let Err(e) = self.plane.patch(kind, &id, &follow_up).await {
                diags.push_failure(&Error::call(format!("failed to update {}", kind), &id, e));
                return self.refresh(kind, &id, diags).await;
            }
            debug!(kind = %kind, resource_id = %id, "Applied post-create fields");
        }

        let current = match self.plane.get(kind, &id).await {
            Ok(current) => current,
            Err(e) => {
                diags.push_failure(&Error::call(format!("failed to get {}", kind), &id, e));
                return Outcome::unknown(diags);
            }
        };
        if desc.is_ready(&current.status) {
            return Outcome::present(current, diags);
        }

        let plane = self.plane.as_ref();
        let (reached, poll_diags) = await_status(
            &id,
            || observe_status(plane, kind, &id),
            desc.ready_statuses,
            &self.polling.ready,
        )
        .await;
        diags.extend(poll_diags);

        match reached {
            Some(status) => {
                info!(kind = %kind, resource_id = %id, status = %status, "Resource ready");
                self.refresh(kind, &id, diags).await
            }
            None => Outcome::present(current, diags),
        }
    }

    /// Observe a resource; a missing or deleted resource reads as absent
    pub async fn read(&self, kind: ResourceKind, id: &str) -> Outcome {
        self.refresh(kind, id, Diagnostics::new()).await
    }

    /// Apply field changes to an existing resource
    ///
    /// Changing an immutable field is refused before anything is written; the
    /// outcome still carries the current state. Moving
    /// a relation from one owner to another clears the old edge first and sets
    /// the new one in a second call.
    pub async fn update(&self, kind: ResourceKind, id: &str, deltas: &FieldDeltas) -> Outcome {
        let desc = descriptor_for(kind);
        let mut diags = Diagnostics::new();

        if deltas.is_empty() {
            return self.refresh(kind, id, diags).await;
        }

        if !desc.updatable {
            diags.push_failure(&Error::unsupported(format!(
                "{} cannot be updated in place",
                kind
            )));
            return self.refresh(kind, id, diags).await;
        }

        for delta in deltas.iter().filter(|d| desc.is_immutable(&d.field)) {
            diags.push_error(
                "field requires replacement",
                format!(
                    "{} of {} cannot change in place (resource id: {})",
                    delta.field, kind, id
                ),
            );
        }
        if diags.has_error() {
            return self.refresh(kind, id, diags).await;
        }

        let mut patch = Patch::new();
        for delta in deltas.iter() {
            let is_move =
                desc.relation(&delta.field).is_some() && !delta.old.is_null() && !delta.new.is_null();
            if is_move {
                let detach = Patch::new().clear(delta.field.as_str());
                if let Err(e) = self.plane.patch(kind, id, &detach).await {
                    diags.push_failure(&Error::call(format!("failed to detach {}", kind), id, e));
                    return self.refresh(kind, id, diags).await;
                }
                debug!(kind = %kind, resource_id = %id, field = %delta.field, "Cleared relation before move");
            }
            patch.insert(delta.field.clone(), delta.new.clone());
        }

        if let Err(e) = self.plane.patch(kind, id, &patch).await {
            diags.push_failure(&Error::call(format!("failed to update {}", kind), id, e));
            return self.refresh(kind, id, diags).await;
        }
        info!(kind = %kind, resource_id = %id, "Updated");

        self.refresh(kind, id, diags).await
    }

    /// Delete a resource after unwinding everything that depends on it
    ///
    /// Deleting something that is already gone succeeds without issuing the
    /// destructive call.
    pub async fn delete(&self, kind: ResourceKind, id: &str) -> Outcome {
        let desc = descriptor_for(kind);
        let mut diags = Diagnostics::new();

        let resource = match self.plane.get(kind, id).await {
            Ok(resource) if resource.status == desc.deleted_status => {
                info!(kind = %kind, resource_id = %id, "Already deleted");
                return Outcome::absent(diags);
            }
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => {
                info!(kind = %kind, resource_id = %id, "Resource does not exist");
                return Outcome::absent(diags);
            }
            Err(e) => {
                diags.push_failure(&Error::call(format!("failed to get {}", kind), id, e));
                return Outcome::unknown(diags);
            }
        };

        let (unwound, unwind_diags) = Unwinder::new(self.plane.as_ref(), &self.polling)
            .unwind(kind, &resource)
            .await;
        diags.extend(unwind_diags);
        match unwound {
            UnwindOutcome::Ready => {}
            UnwindOutcome::AlreadyDeleted => return Outcome::absent(diags),
            UnwindOutcome::Aborted => return Outcome::present(resource, diags),
        }

        let (classified, reported) = match desc.delete_mode {
            DeleteMode::Once => self.delete_once(desc, id).await,
            DeleteMode::Retry => self.delete_with_retry(desc, id).await,
        };

        let reason = match classified {
            ClassifiedOutcome::Satisfied(reason) => reason,
            ClassifiedOutcome::Fatal(e) => {
                warn!(kind = %kind, resource_id = %id, error = %e, "Delete failed");
                diags.push_failure(&Error::call(format!("failed to delete {}", kind), id, e));
                return Outcome::present(resource, diags);
            }
        };
        info!(kind = %kind, resource_id = %id, "{}", reason.message());

        let confirmed = reason.is_confirmed() || reported.as_deref() == Some(desc.deleted_status);
        if desc.confirm_delete && !confirmed {
            let plane = self.plane.as_ref();
            let (reached, poll_diags) = await_status(
                id,
                || observe_status(plane, kind, id),
                &[desc.deleted_status],
                &self.polling.teardown,
            )
            .await;
            diags.extend(poll_diags);
            if reached.is_none() {
                return Outcome::present(resource, diags);
            }
        }

        Outcome::absent(diags)
    }

    async fn delete_once(
        &self,
        desc: &ResourceDescriptor,
        id: &str,
    ) -> (ClassifiedOutcome, Option<String>) {
        let result = self.plane.delete(desc.kind, id).await;
        let reported = result.as_ref().ok().map(|r| r.status.clone());
        (
            classify_delete_outcome(result, desc.detail_key, desc.deleted_status),
            reported,
        )
    }

    /// Repeat the destructive call until it classifies as satisfied
    ///
    /// At least one call is always made.
    async fn delete_with_retry(
        &self,
        desc: &ResourceDescriptor,
        id: &str,
    ) -> (ClassifiedOutcome, Option<String>) {
        let policy = &self.polling.delete_retry;
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let (classified, reported) = self.delete_once(desc, id).await;
            let ClassifiedOutcome::Fatal(e) = &classified else {
                return (classified, reported);
            };

            attempt += 1;
            if attempt >= attempts {
                return (classified, reported);
            }

            let delay = policy.delay_for(attempt - 1);
            warn!(
                kind = %desc.kind,
                resource_id = %id,
                attempt,
                error = %e,
                delay_ms = delay.as_millis() as u64,
                "Delete rejected, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Resolve a catalogue entry (zone, region, instance type, image) by name
    ///
    /// `scope` carries extra filters such as the `region_id` a zone lookup
    /// requires. Exactly one entry must match.
    pub async fn lookup(
        &self,
        source: DataSourceKind,
        name: &str,
        scope: &ListFilter,
    ) -> LookupOutcome {
        let label = source.label();
        let mut diags = Diagnostics::new();

        if let Some(missing) = source
            .required_filters()
            .iter()
            .find(|field| !scope.criteria().any(|(f, _)| f == **field))
        {
            diags.push_error(
                format!("invalid {} lookup", label),
                format!("a {} lookup requires the {} filter", label, missing),
            );
            return LookupOutcome::failed(diags);
        }

        let filter = scope.clone().with(NAME_ILIKE, name);
        let mut entries = match self.plane.lookup(source, &filter, LOOKUP_COUNT).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(source = %source, error = %e, "Lookup failed");
                diags.push_error(format!("error while fetching {}s", label), format!("error: {}", e));
                return LookupOutcome::failed(diags);
            }
        };

        match entries.len() {
            0 => diags.push_error(
                format!("No such {}", label),
                format!("no {} named {:?} was returned; check the name", label, name),
            ),
            1 => {
                let entry = entries.pop();
                if let Some(found) = &entry {
                    debug!(source = %source, id = %found.id, "Resolved {}", label);
                }
                return LookupOutcome {
                    entry,
                    diagnostics: diags,
                };
            }
            _ => diags.push_error(
                format!("Multiple {} returned", label),
                format!("more than one {} matches {:?}; select it by id", label, name),
            ),
        }
        LookupOutcome::failed(diags)
    }

    async fn run_create_check(&self, check: &CreateCheck, spec: &Attributes) -> Result<()> {
        match *check {
            CreateCheck::OwnerStatus { relation, gate } => {
                let Some(owner_id) = spec.get(relation).and_then(Value::as_str) else {
                    return Ok(());
                };
                check_gate(self.plane.as_ref(), &gate, owner_id).await
            }
            CreateCheck::OwnerFlagUnset {
                relation,
                owner,
                flag,
                summary,
                message,
            } => {
                let Some(owner_id) = spec.get(relation).and_then(Value::as_str) else {
                    return Ok(());
                };
                let current = self
                    .plane
                    .get(owner, owner_id)
                    .await
                    .map_err(|e| Error::call(format!("failed to get {}", owner), owner_id, e))?;
                if current.flag(flag) {
                    return Err(Error::precondition(summary, owner_id, message));
                }
                Ok(())
            }
        }
    }

    async fn refresh(&self, kind: ResourceKind, id: &str, mut diags: Diagnostics) -> Outcome {
        match self.plane.get(kind, id).await {
            Ok(current) if current.status == descriptor_for(kind).deleted_status => {
                Outcome::absent(diags)
            }
            Ok(current) => Outcome::present(current, diags),
            Err(e) if e.is_not_found() => Outcome::absent(diags),
            Err(e) => {
                diags.push_failure(&Error::call(format!("failed to get {}", kind), id, e));
                Outcome::unknown(diags)
            }
        }
    }
}

/// Split a create spec into the create body and the post-create patch
fn split_post_create(desc: &ResourceDescriptor, spec: &Attributes) -> (Attributes, Patch) {
    let mut body = spec.clone();
    let mut follow_up = Patch::new();
    for field in desc.post_create_fields {
        if let Some(value) = body.remove(*field)
            && !value.is_null()
        {
            follow_up.insert(*field, value);
        }
    }
    (body, follow_up)
}
