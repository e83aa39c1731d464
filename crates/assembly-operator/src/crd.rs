//! The `Assembly` custom resource and its closed vocabularies.
//!
//! Field doc comments become the descriptions of the generated CRD schema.

use std::collections::BTreeMap;
use std::fmt;

use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Finalizer guarding remote deletion of an Assembly.
pub const FINALIZER: &str = "stratoss.accantosystems.com/assembly-finalizer";

/// Desired state of an Assembly.
#[derive(CustomResource, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "stratoss.accantosystems.com",
    version = "v1alpha1",
    kind = "Assembly",
    plural = "assemblies",
    namespaced,
    status = "AssemblyStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Synchronized","type":"string","jsonPath":".status.syncState.status","description":"Whether the last reconciliation of this Assembly with LM succeeded"}"#,
    printcolumn = r#"{"name":"Descriptor","type":"string","jsonPath":".status.descriptorName","description":"The observed descriptor of the Assembly"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state","description":"The observed state of the Assembly"}"#,
    printcolumn = r#"{"name":"LastProcess","type":"string","jsonPath":".status.lastProcess.intentType","description":"The type of the last observed process"}"#,
    printcolumn = r#"{"name":"ProcessStatus","type":"string","jsonPath":".status.lastProcess.status","description":"The status of the last observed process"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp","description":"How long this Assembly has existed"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AssemblySpec {
    /// Descriptor the Assembly is modelled on, in the form `assembly::<name>::<version>`.
    pub descriptor_name: String,
    /// State the Assembly should end up in.
    pub intended_state: LifecycleState,
    /// Property values configuring the Assembly. Valid names are those defined
    /// on the descriptor in use.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Observed state of an Assembly, owned by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyStatus {
    /// LM identifier of the Assembly, set once LM confirmed it exists.
    #[serde(rename = "assemblyId", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Observed descriptor, in the form `assembly::<name>::<version>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor_name: Option<String>,
    /// Observed property values.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Observed lifecycle state.
    #[serde(default)]
    pub state: LifecycleState,
    /// The last process observed for the Assembly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_process: Option<ProcessRecord>,
    /// Outcome of the last reconciliation.
    #[serde(default)]
    pub sync_state: SyncState,
}

/// Lifecycle states of an Assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum LifecycleState {
    /// LM has no Assembly with this name.
    NotFound,
    /// No state observed yet.
    #[default]
    None,
    /// Created but not installed.
    Created,
    /// Installed but not running.
    Installed,
    /// Installed and stopped.
    Inactive,
    /// LM considers the Assembly broken.
    Broken,
    /// Running.
    Active,
    /// A lifecycle transition failed.
    Failed,
    /// LM reported a state outside this vocabulary.
    #[serde(rename = "ERROR")]
    Error,
}

impl LifecycleState {
    /// Returns the wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::None => "None",
            Self::Created => "Created",
            Self::Installed => "Installed",
            Self::Inactive => "Inactive",
            Self::Broken => "Broken",
            Self::Active => "Active",
            Self::Failed => "Failed",
            Self::Error => "ERROR",
        }
    }

    /// Parses a state name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "NotFound" => Self::NotFound,
            "None" => Self::None,
            "Created" => Self::Created,
            "Installed" => Self::Installed,
            "Inactive" => Self::Inactive,
            "Broken" => Self::Broken,
            "Active" => Self::Active,
            "Failed" => Self::Failed,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    /// Translates a state reported by LM. Unknown values become [`Self::Error`].
    #[must_use]
    pub fn from_remote(value: &str) -> Self {
        Self::parse(value).unwrap_or_else(|| {
            tracing::warn!(state = value, "LM reported an unknown assembly state");
            Self::Error
        })
    }

    /// Returns true for states an Assembly can be asked to reach.
    #[must_use]
    pub const fn is_intendable(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Installed | Self::Inactive | Self::Active
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of LM process, named the way the operator reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum IntentType {
    /// The Assembly is being created.
    Create,
    /// The Assembly is moving between lifecycle states.
    ChangeState,
    /// The descriptor or properties are being changed.
    Update,
    /// The Assembly is being removed.
    Delete,
}

impl IntentType {
    /// Returns the wire name of the intent type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::ChangeState => "ChangeState",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }

    /// Translates an intent type reported by LM.
    ///
    /// LM's own names (`CreateAssembly`, ...) and the local names are both
    /// accepted. Anything else yields `None`.
    #[must_use]
    pub fn from_remote(value: &str) -> Option<Self> {
        match value {
            "CreateAssembly" | "Create" => Some(Self::Create),
            "ChangeAssemblyState" | "ChangeState" => Some(Self::ChangeState),
            "UpgradeAssembly" | "Update" => Some(Self::Update),
            "DeleteAssembly" | "Delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an LM process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ProcessStatus {
    /// Accepted, not yet scheduled.
    Planned,
    /// Scheduled, waiting to run.
    Pending,
    /// Running.
    #[serde(rename = "In Progress")]
    InProgress,
    /// Finished successfully.
    Completed,
    /// Cancelled before finishing.
    Cancelled,
    /// Finished unsuccessfully.
    Failed,
}

impl ProcessStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "Planned",
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }

    /// Parses a status name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "Planned" => Self::Planned,
            "Pending" => Self::Pending,
            "In Progress" => Self::InProgress,
            "Completed" => Self::Completed,
            "Cancelled" => Self::Cancelled,
            "Failed" => Self::Failed,
            _ => return None,
        })
    }

    /// Returns true while the process has not finished.
    #[must_use]
    pub const fn is_ongoing(self) -> bool {
        matches!(self, Self::Planned | Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A process recorded in the Assembly status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    /// LM process id.
    #[serde(rename = "processId")]
    pub id: String,
    /// Kind of process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_type: Option<IntentType>,
    /// Status of the process.
    pub status: ProcessStatus,
    /// Reason for the status, usually only set on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
}

impl ProcessRecord {
    /// Records a process the operator just started.
    #[must_use]
    pub fn planned(id: impl Into<String>, intent_type: IntentType) -> Self {
        Self {
            id: id.into(),
            intent_type: Some(intent_type),
            status: ProcessStatus::Planned,
            status_reason: None,
        }
    }

    /// Translates a process reported by LM.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedRemoteValue`] if the process status is not
    /// part of the known vocabulary, since the operator cannot tell whether
    /// such a process is still running.
    pub fn from_remote(process: &assembly_lm::Process) -> Result<Self> {
        let status =
            ProcessStatus::parse(&process.status).ok_or_else(|| Error::UnexpectedRemoteValue {
                field: "process status",
                value: process.status.clone(),
            })?;
        let intent_type = IntentType::from_remote(&process.intent_type);
        if intent_type.is_none() {
            tracing::warn!(
                process_id = %process.id,
                intent_type = %process.intent_type,
                "LM reported an unknown intent type"
            );
        }
        Ok(Self {
            id: process.id.clone(),
            intent_type,
            status,
            status_reason: process.status_reason.clone().filter(|r| !r.is_empty()),
        })
    }

    /// Returns true while the process has not finished.
    #[must_use]
    pub const fn is_ongoing(&self) -> bool {
        self.status.is_ongoing()
    }
}

/// Outcome of the last reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SyncStatus {
    /// The last reconciliation succeeded.
    #[default]
    #[serde(rename = "OK")]
    Ok,
    /// The last reconciliation failed.
    #[serde(rename = "ERROR")]
    Error,
}

/// Reconciliation bookkeeping shown to users.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SyncState {
    /// Whether the last reconciliation succeeded.
    pub status: SyncStatus,
    /// Error message of the last failed reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of consecutive reconciliations that failed with this error.
    #[serde(default)]
    pub attempts: u32,
}

impl Assembly {
    /// Returns the status, or the default status when none was written yet.
    #[must_use]
    pub fn status_or_default(&self) -> AssemblyStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Returns a mutable status, creating the default status if missing.
    pub fn status_mut(&mut self) -> &mut AssemblyStatus {
        self.status.get_or_insert_with(AssemblyStatus::default)
    }

    /// Returns true when the resource carries the operator finalizer.
    #[must_use]
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    /// Returns true once Kubernetes has marked the resource for deletion.
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// Adds the operator finalizer. Returns false if it was already present.
    pub fn add_finalizer(&mut self) -> bool {
        if self.has_finalizer() {
            return false;
        }
        self.finalizers_mut().push(FINALIZER.to_string());
        true
    }

    /// Removes the operator finalizer. Returns false if it was not present.
    pub fn remove_finalizer(&mut self) -> bool {
        let finalizers = self.finalizers_mut();
        let before = finalizers.len();
        finalizers.retain(|f| f != FINALIZER);
        finalizers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn assembly() -> Assembly {
        Assembly::new(
            "svc-a",
            AssemblySpec {
                descriptor_name: "assembly::svcA::1.0".into(),
                intended_state: LifecycleState::Active,
                properties: BTreeMap::new(),
            },
        )
    }

    #[test]
    fn lifecycle_state_wire_names() {
        assert_eq!(
            serde_json::to_value(LifecycleState::Error).expect("encode"),
            "ERROR"
        );
        assert_eq!(LifecycleState::from_remote("Active"), LifecycleState::Active);
        assert_eq!(LifecycleState::from_remote("Exploded"), LifecycleState::Error);
        assert_eq!(LifecycleState::default(), LifecycleState::None);
        assert!(LifecycleState::Active.is_intendable());
        assert!(!LifecycleState::NotFound.is_intendable());
        assert!(!LifecycleState::Broken.is_intendable());
    }

    #[test]
    fn intent_type_translation_table() {
        assert_eq!(IntentType::from_remote("CreateAssembly"), Some(IntentType::Create));
        assert_eq!(
            IntentType::from_remote("ChangeAssemblyState"),
            Some(IntentType::ChangeState)
        );
        assert_eq!(IntentType::from_remote("UpgradeAssembly"), Some(IntentType::Update));
        assert_eq!(IntentType::from_remote("DeleteAssembly"), Some(IntentType::Delete));
        assert_eq!(IntentType::from_remote("Update"), Some(IntentType::Update));
        assert_eq!(IntentType::from_remote("HealAssembly"), None);
    }

    #[test]
    fn process_status_ongoing_set() {
        assert!(ProcessStatus::Planned.is_ongoing());
        assert!(ProcessStatus::Pending.is_ongoing());
        assert!(ProcessStatus::InProgress.is_ongoing());
        assert!(!ProcessStatus::Completed.is_ongoing());
        assert!(!ProcessStatus::Cancelled.is_ongoing());
        assert!(!ProcessStatus::Failed.is_ongoing());
        assert_eq!(
            serde_json::to_value(ProcessStatus::InProgress).expect("encode"),
            "In Progress"
        );
    }

    #[test]
    fn unknown_process_status_is_rejected() {
        let remote = assembly_lm::Process {
            id: "p1".into(),
            assembly_id: "a1".into(),
            intent_type: "CreateAssembly".into(),
            status: "Paused".into(),
            status_reason: None,
        };
        let err = ProcessRecord::from_remote(&remote).expect_err("unknown status");
        assert!(matches!(err, Error::UnexpectedRemoteValue { .. }));
    }

    #[test]
    fn status_serializes_with_resource_field_names() {
        let status = AssemblyStatus {
            id: Some("a1".into()),
            descriptor_name: Some("assembly::svcA::1.0".into()),
            properties: BTreeMap::new(),
            state: LifecycleState::Active,
            last_process: Some(ProcessRecord::planned("p1", IntentType::Create)),
            sync_state: SyncState {
                status: SyncStatus::Error,
                error: Some("boom".into()),
                attempts: 2,
            },
        };
        let value = serde_json::to_value(&status).expect("encode");
        assert_eq!(value["assemblyId"], "a1");
        assert_eq!(value["lastProcess"]["processId"], "p1");
        assert_eq!(value["lastProcess"]["intentType"], "Create");
        assert_eq!(value["syncState"]["status"], "ERROR");
        assert_eq!(value["syncState"]["attempts"], 2);
    }

    #[test]
    fn spec_properties_default_to_empty() {
        let spec: AssemblySpec = serde_json::from_str(
            r#"{"descriptorName": "assembly::svcA::1.0", "intendedState": "Installed"}"#,
        )
        .expect("decode");
        assert!(spec.properties.is_empty());
        assert_eq!(spec.intended_state, LifecycleState::Installed);
    }

    #[test]
    fn finalizer_helpers_are_idempotent() {
        let mut resource = assembly();
        assert!(!resource.has_finalizer());
        assert!(resource.add_finalizer());
        assert!(!resource.add_finalizer());
        assert_eq!(resource.finalizers(), &[FINALIZER.to_string()]);
        assert!(resource.remove_finalizer());
        assert!(!resource.remove_finalizer());
        assert!(!resource.is_deleting());
    }

    #[test]
    fn crd_carries_print_columns_and_status() {
        let crd = Assembly::crd();
        assert_eq!(crd.spec.group, "stratoss.accantosystems.com");
        assert_eq!(crd.spec.names.plural, "assemblies");
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().is_some_and(|s| s.status.is_some()));
        let columns: Vec<&str> = version
            .additional_printer_columns
            .as_ref()
            .map(|cols| cols.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(
            columns,
            [
                "Synchronized",
                "Descriptor",
                "State",
                "LastProcess",
                "ProcessStatus",
                "Age"
            ]
        );
    }
}
