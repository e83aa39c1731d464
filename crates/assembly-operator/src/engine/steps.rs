//! The ordered steps of a reconciliation pass.

use std::time::Duration;

use assembly_lm::{
    ChangeAssemblyStateRequest, CreateAssemblyRequest, DeleteAssemblyRequest,
    UpgradeAssemblyRequest,
};

use super::{EngineSettings, PassContext, RequeueDirective, StartedIntent, SyncEngine};
use crate::crd::{
    AssemblySpec, AssemblyStatus, IntentType, LifecycleState, ProcessRecord, ProcessStatus,
};
use crate::error::Error;

/// A step of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    /// Read the remote Assembly and its latest process into the status.
    RefreshObservedState,
    /// Stop while the last process is still running.
    GateInFlightProcess,
    /// Create or delete the remote Assembly.
    SyncExistence,
    /// Move the remote Assembly to the intended state.
    SyncDesiredState,
    /// Correct descriptor and property drift.
    SyncAttributes,
}

impl SyncStep {
    /// Steps in execution order.
    pub const ORDER: [Self; 5] = [
        Self::RefreshObservedState,
        Self::GateInFlightProcess,
        Self::SyncExistence,
        Self::SyncDesiredState,
        Self::SyncAttributes,
    ];
}

/// Why a pass stopped early.
#[derive(Debug)]
pub struct Halt {
    /// Whether to run another pass without waiting for a change.
    pub requeue: bool,
    /// Delay before that pass.
    pub delay: Option<Duration>,
    /// The error that stopped the pass, if any.
    pub error: Option<Error>,
}

impl Halt {
    /// Stop with nothing left to do.
    #[must_use]
    pub const fn done() -> Self {
        Self {
            requeue: false,
            delay: None,
            error: None,
        }
    }

    /// Stop and check again after the process poll interval.
    #[must_use]
    pub const fn poll(settings: &EngineSettings) -> Self {
        Self {
            requeue: true,
            delay: Some(settings.process_poll_interval),
            error: None,
        }
    }

    /// Stop because of `error`, retrying after the error interval.
    #[must_use]
    pub const fn error(error: Error, settings: &EngineSettings) -> Self {
        Self {
            requeue: true,
            delay: Some(settings.error_requeue_interval),
            error: Some(error),
        }
    }

    /// The requeue directive this halt asks for.
    #[must_use]
    pub const fn directive(&self) -> RequeueDirective {
        RequeueDirective {
            requeue: self.requeue,
            requeue_after: self.delay,
        }
    }
}

/// Result of a single step.
#[derive(Debug)]
pub enum StepOutcome {
    /// Move on to the next step.
    Continue,
    /// End the pass.
    Halt(Halt),
}

/// Returns true when the observed descriptor differs from the declared one,
/// or any declared property is missing or different.
///
/// Observed properties that are not declared are not drift.
#[must_use]
pub fn detect_drift(spec: &AssemblySpec, status: &AssemblyStatus) -> bool {
    if status.descriptor_name.as_deref() != Some(spec.descriptor_name.as_str()) {
        return true;
    }
    spec.properties
        .iter()
        .any(|(name, value)| status.properties.get(name) != Some(value))
}

impl SyncEngine {
    /// Runs one step against the pass context.
    pub async fn run_step(&self, step: SyncStep, ctx: &mut PassContext) -> StepOutcome {
        match step {
            SyncStep::RefreshObservedState => self.refresh_observed_state(ctx).await,
            SyncStep::GateInFlightProcess => self.gate_in_flight_process(ctx),
            SyncStep::SyncExistence => self.sync_existence(ctx).await,
            SyncStep::SyncDesiredState => self.sync_desired_state(ctx).await,
            SyncStep::SyncAttributes => self.sync_attributes(ctx).await,
        }
    }

    pub(super) async fn refresh_observed_state(&self, ctx: &mut PassContext) -> StepOutcome {
        let name = ctx.key.name.clone();
        let known_id = ctx.assembly.status.as_ref().and_then(|s| s.id.clone());

        let mut remote = None;
        if let Some(id) = known_id {
            match self.lm.get_assembly_by_id(&id).await {
                Ok(Some(found)) => remote = Some(found),
                Ok(None) => {
                    tracing::info!(assembly_id = %id, "assembly id no longer known to LM, looking up by name");
                    ctx.assembly.status_mut().id = None;
                }
                Err(e) => {
                    return self.halt_on(Error::lm(format!("failed to get assembly {id}"), e));
                }
            }
        }
        if remote.is_none() {
            match self.lm.get_assembly_by_name(&name).await {
                Ok(found) => remote = found,
                Err(e) => {
                    return self.halt_on(Error::lm(format!("failed to get assembly {name}"), e));
                }
            }
        }

        let lookup = match ctx.started.as_ref() {
            Some(started) => self.lm.get_process_by_id(&started.process_id).await,
            None => self.lm.get_latest_process_for_name(&name).await,
        };
        let process = match lookup {
            Ok(process) => process,
            Err(e) => {
                return self.halt_on(Error::lm(format!("failed to get latest process for {name}"), e));
            }
        };

        let process = process.filter(|process| {
            let belongs = match remote.as_ref() {
                Some(found) => found.id == process.assembly_id,
                None => ProcessStatus::parse(&process.status).is_some_and(ProcessStatus::is_ongoing),
            };
            if !belongs {
                tracing::debug!(
                    process_id = %process.id,
                    assembly_id = %process.assembly_id,
                    "ignoring process of another assembly instance"
                );
            }
            belongs
        });

        let mut unreadable = None;
        let record = match process {
            Some(process) => match ProcessRecord::from_remote(&process) {
                Ok(record) => Some(record),
                Err(e) => {
                    unreadable = Some(e);
                    ctx.assembly.status.as_ref().and_then(|s| s.last_process.clone())
                }
            },
            // A process just started may not be visible yet; keep the planned record.
            None if ctx.started.is_some() => ctx
                .assembly
                .status
                .as_ref()
                .and_then(|s| s.last_process.clone()),
            None => None,
        };

        let status = ctx.assembly.status_mut();
        match remote {
            Some(found) => {
                status.state = LifecycleState::from_remote(&found.state);
                status.descriptor_name = Some(found.descriptor_name.clone()).filter(|d| !d.is_empty());
                status.properties = found.property_map();
                status.id = Some(found.id);
            }
            None => {
                status.state = LifecycleState::NotFound;
                status.id = None;
                status.descriptor_name = None;
                status.properties.clear();
            }
        }
        status.last_process = record;

        tracing::debug!(
            state = %status.state,
            assembly_id = ?status.id,
            last_process = ?status.last_process.as_ref().map(|p| (&p.id, p.status)),
            "observed state refreshed"
        );
        match unreadable {
            Some(e) => self.halt_on(e),
            None => StepOutcome::Continue,
        }
    }

    fn gate_in_flight_process(&self, ctx: &PassContext) -> StepOutcome {
        let in_flight = ctx
            .assembly
            .status
            .as_ref()
            .and_then(|s| s.last_process.as_ref())
            .filter(|p| p.is_ongoing());
        match in_flight {
            Some(process) => {
                tracing::info!(
                    process_id = %process.id,
                    process_status = %process.status,
                    "waiting for in-flight process"
                );
                StepOutcome::Halt(Halt::poll(&self.settings))
            }
            None => StepOutcome::Continue,
        }
    }

    async fn sync_existence(&self, ctx: &mut PassContext) -> StepOutcome {
        let state = ctx.assembly.status_or_default().state;

        if ctx.assembly.is_deleting() {
            if state == LifecycleState::NotFound {
                if ctx.assembly.remove_finalizer() {
                    tracing::info!("assembly removed from LM, releasing finalizer");
                    ctx.finalizer_removed = true;
                }
                return StepOutcome::Halt(Halt::done());
            }
            if ctx.assembly.has_finalizer() {
                return self.start_intent(ctx, IntentType::Delete).await;
            }
            return StepOutcome::Halt(Halt::done());
        }

        if ctx.assembly.add_finalizer() {
            match self.store.update(&ctx.assembly).await {
                Ok(persisted) => ctx.assembly.metadata = persisted.metadata,
                Err(err) if err.is_not_found() => {
                    ctx.resource_gone = true;
                    return StepOutcome::Halt(Halt::done());
                }
                Err(err) => return self.halt_on(err),
            }
        }

        if state == LifecycleState::NotFound {
            if let Err(err) = validate_intended_state(&ctx.assembly.spec) {
                return self.halt_on(err);
            }
            return self.start_intent(ctx, IntentType::Create).await;
        }
        StepOutcome::Continue
    }

    async fn sync_desired_state(&self, ctx: &mut PassContext) -> StepOutcome {
        let state = ctx.assembly.status_or_default().state;
        if state == ctx.assembly.spec.intended_state {
            return StepOutcome::Continue;
        }
        if let Err(err) = validate_intended_state(&ctx.assembly.spec) {
            return self.halt_on(err);
        }
        tracing::info!(
            observed = %state,
            intended = %ctx.assembly.spec.intended_state,
            "assembly not in intended state"
        );
        self.start_intent(ctx, IntentType::ChangeState).await
    }

    async fn sync_attributes(&self, ctx: &mut PassContext) -> StepOutcome {
        let status = ctx.assembly.status_or_default();
        if !detect_drift(&ctx.assembly.spec, &status) {
            return StepOutcome::Continue;
        }
        tracing::info!(
            observed_descriptor = ?status.descriptor_name,
            declared_descriptor = %ctx.assembly.spec.descriptor_name,
            "assembly descriptor or properties drifted"
        );
        self.start_intent(ctx, IntentType::Update).await
    }

    async fn start_intent(&self, ctx: &mut PassContext, intent_type: IntentType) -> StepOutcome {
        let name = ctx.key.name.clone();
        let spec = &ctx.assembly.spec;
        let (action, result) = match intent_type {
            IntentType::Create => (
                "create",
                self.lm
                    .create_assembly(CreateAssemblyRequest {
                        assembly_name: name.clone(),
                        descriptor_name: spec.descriptor_name.clone(),
                        intended_state: spec.intended_state.as_str().to_string(),
                        properties: spec.properties.clone(),
                    })
                    .await,
            ),
            IntentType::ChangeState => (
                "change state of",
                self.lm
                    .change_assembly_state(ChangeAssemblyStateRequest {
                        assembly_name: name.clone(),
                        intended_state: spec.intended_state.as_str().to_string(),
                    })
                    .await,
            ),
            IntentType::Update => (
                "upgrade",
                self.lm
                    .upgrade_assembly(UpgradeAssemblyRequest {
                        assembly_name: name.clone(),
                        descriptor_name: spec.descriptor_name.clone(),
                        properties: spec.properties.clone(),
                    })
                    .await,
            ),
            IntentType::Delete => (
                "delete",
                self.lm
                    .delete_assembly(DeleteAssemblyRequest {
                        assembly_name: name.clone(),
                    })
                    .await,
            ),
        };

        match result {
            Ok(process_id) => {
                self.metrics.record_intent(intent_type, true);
                tracing::info!(
                    intent_type = %intent_type,
                    process_id = %process_id,
                    "intent accepted by LM"
                );
                ctx.assembly.status_mut().last_process =
                    Some(ProcessRecord::planned(process_id.clone(), intent_type));
                ctx.started = Some(StartedIntent {
                    intent_type,
                    process_id,
                });
                StepOutcome::Halt(Halt::poll(&self.settings))
            }
            Err(e) => {
                self.metrics.record_intent(intent_type, false);
                self.halt_on(Error::lm(format!("failed to {action} assembly {name}"), e))
            }
        }
    }

    fn halt_on(&self, error: Error) -> StepOutcome {
        StepOutcome::Halt(Halt::error(error, &self.settings))
    }
}

fn validate_intended_state(spec: &AssemblySpec) -> Result<(), Error> {
    if spec.intended_state.is_intendable() {
        Ok(())
    } else {
        Err(Error::invalid_resource(format!(
            "intendedState {} is not one of Created, Installed, Inactive, Active",
            spec.intended_state
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(descriptor: &str, props: &[(&str, &str)]) -> AssemblySpec {
        AssemblySpec {
            descriptor_name: descriptor.to_string(),
            intended_state: LifecycleState::Active,
            properties: props
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    fn observed(descriptor: Option<&str>, props: &[(&str, &str)]) -> AssemblyStatus {
        AssemblyStatus {
            descriptor_name: descriptor.map(str::to_string),
            properties: props
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..AssemblyStatus::default()
        }
    }

    #[test]
    fn matching_descriptor_and_properties_is_not_drift() {
        assert!(!detect_drift(
            &spec("assembly::a::1.0", &[("size", "2")]),
            &observed(Some("assembly::a::1.0"), &[("size", "2"), ("extra", "x")]),
        ));
    }

    #[test]
    fn descriptor_change_is_drift() {
        assert!(detect_drift(
            &spec("assembly::a::2.0", &[]),
            &observed(Some("assembly::a::1.0"), &[]),
        ));
        assert!(detect_drift(&spec("assembly::a::1.0", &[]), &observed(None, &[])));
    }

    #[test]
    fn changed_or_missing_property_is_drift() {
        assert!(detect_drift(
            &spec("assembly::a::1.0", &[("size", "3")]),
            &observed(Some("assembly::a::1.0"), &[("size", "2")]),
        ));
        assert!(detect_drift(
            &spec("assembly::a::1.0", &[("zone", "eu")]),
            &observed(Some("assembly::a::1.0"), &[]),
        ));
    }

    #[test]
    fn step_order_is_fixed() {
        assert_eq!(SyncStep::ORDER[0], SyncStep::RefreshObservedState);
        assert_eq!(SyncStep::ORDER[4], SyncStep::SyncAttributes);
    }

    #[test]
    fn halt_directives() {
        let settings = EngineSettings::default();
        assert_eq!(Halt::done().directive(), RequeueDirective::done());
        assert_eq!(
            Halt::poll(&settings).directive(),
            RequeueDirective::after(settings.process_poll_interval)
        );
        let halt = Halt::error(Error::store("x"), &settings);
        assert_eq!(halt.directive().requeue_after, Some(settings.error_requeue_interval));
    }

    #[test]
    fn only_reachable_states_can_be_intended() {
        let mut declared = spec("assembly::a::1.0", &[]);
        assert!(validate_intended_state(&declared).is_ok());
        declared.intended_state = LifecycleState::Broken;
        assert!(validate_intended_state(&declared).is_err());
    }
}
