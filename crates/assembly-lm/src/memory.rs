//! In-memory LM for tests.
//!
//! [`InMemoryLm`] keeps an assembly table and a process table. Intents create
//! processes in `Planned` status and apply their effect only once a test
//! completes the process, mirroring the asynchronous behavior of the real
//! service. Every accepted intent is recorded, and failures can be scripted
//! per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::client::LmApi;
use crate::error::{Error, Result};
use crate::types::{
    Assembly, AssemblyProperty, ChangeAssemblyStateRequest, CreateAssemblyRequest,
    DeleteAssemblyRequest, Process, UpgradeAssemblyRequest,
};

/// Operations of [`LmApi`], used to script failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LmOperation {
    /// `create_assembly`
    Create,
    /// `upgrade_assembly`
    Upgrade,
    /// `change_assembly_state`
    ChangeState,
    /// `delete_assembly`
    Delete,
    /// `get_assembly_by_id`
    GetAssemblyById,
    /// `get_assembly_by_name`
    GetAssemblyByName,
    /// `get_latest_process_for_name`
    GetLatestProcess,
    /// `get_process_by_id`
    GetProcessById,
}

/// An intent accepted by [`InMemoryLm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedIntent {
    /// A create request.
    Create(CreateAssemblyRequest),
    /// An upgrade request.
    Upgrade(UpgradeAssemblyRequest),
    /// A change-state request.
    ChangeState(ChangeAssemblyStateRequest),
    /// A delete request.
    Delete(DeleteAssemblyRequest),
}

impl RecordedIntent {
    /// Returns the LM intent type name of the request.
    #[must_use]
    pub const fn intent_type(&self) -> &'static str {
        match self {
            Self::Create(_) => "CreateAssembly",
            Self::Upgrade(_) => "UpgradeAssembly",
            Self::ChangeState(_) => "ChangeAssemblyState",
            Self::Delete(_) => "DeleteAssembly",
        }
    }

    /// Returns the name of the assembly the intent targets.
    #[must_use]
    pub fn assembly_name(&self) -> &str {
        match self {
            Self::Create(r) => &r.assembly_name,
            Self::Upgrade(r) => &r.assembly_name,
            Self::ChangeState(r) => &r.assembly_name,
            Self::Delete(r) => &r.assembly_name,
        }
    }
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    status: u16,
    body: String,
}

#[derive(Debug, Clone)]
struct ProcessEntry {
    process: Process,
    assembly_name: String,
    effect: Option<RecordedIntent>,
    sequence: u64,
}

#[derive(Debug, Default)]
struct State {
    assemblies: HashMap<String, Assembly>,
    processes: HashMap<String, ProcessEntry>,
    intents: Vec<RecordedIntent>,
    next_failures: HashMap<LmOperation, VecDeque<ScriptedFailure>>,
    persistent_failures: HashMap<LmOperation, ScriptedFailure>,
    next_id: u64,
    auto_complete: bool,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn check_failure(&mut self, op: LmOperation) -> Result<()> {
        let scripted = self
            .next_failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.persistent_failures.get(&op).cloned());
        match scripted {
            Some(failure) => Err(Error::UnexpectedStatus {
                operation: format!("{op:?}"),
                status: failure.status,
                body: failure.body,
            }),
            None => Ok(()),
        }
    }

    fn assembly_by_name(&self, name: &str) -> Option<&Assembly> {
        self.assemblies.values().find(|a| a.name == name)
    }

    fn start_process(
        &mut self,
        assembly_id: String,
        assembly_name: &str,
        intent: RecordedIntent,
    ) -> String {
        let id = self.next_id("process");
        let sequence = self.next_id;
        let process = Process {
            id: id.clone(),
            assembly_id,
            intent_type: intent.intent_type().to_string(),
            status: "Planned".to_string(),
            status_reason: None,
        };
        self.intents.push(intent.clone());
        self.processes.insert(
            id.clone(),
            ProcessEntry {
                process,
                assembly_name: assembly_name.to_string(),
                effect: Some(intent),
                sequence,
            },
        );
        if self.auto_complete {
            self.finish(&id, "Completed", None);
        }
        id
    }

    fn finish(&mut self, process_id: &str, status: &str, reason: Option<String>) -> bool {
        let Some(entry) = self.processes.get_mut(process_id) else {
            return false;
        };
        entry.process.status = status.to_string();
        entry.process.status_reason = reason;
        let effect = if status == "Completed" {
            entry.effect.take()
        } else {
            None
        };
        let assembly_id = entry.process.assembly_id.clone();
        if let Some(effect) = effect {
            self.apply(&assembly_id, effect);
        }
        true
    }

    fn apply(&mut self, assembly_id: &str, effect: RecordedIntent) {
        match effect {
            RecordedIntent::Create(request) => {
                if let Some(assembly) = self.assemblies.get_mut(assembly_id) {
                    assembly.state = request.intended_state;
                }
            }
            RecordedIntent::ChangeState(request) => {
                if let Some(assembly) = self.assemblies.get_mut(assembly_id) {
                    assembly.state = request.intended_state;
                }
            }
            RecordedIntent::Upgrade(request) => {
                if let Some(assembly) = self.assemblies.get_mut(assembly_id) {
                    assembly.descriptor_name = request.descriptor_name;
                    assembly.properties = to_properties(&request.properties);
                }
            }
            RecordedIntent::Delete(_) => {
                self.assemblies.remove(assembly_id);
            }
        }
    }
}

fn to_properties(map: &BTreeMap<String, String>) -> Vec<AssemblyProperty> {
    map.iter()
        .map(|(name, value)| AssemblyProperty {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

fn not_found(op: LmOperation, name: &str) -> Error {
    Error::UnexpectedStatus {
        operation: format!("{op:?}"),
        status: 404,
        body: format!("assembly {name} not found"),
    }
}

/// Scriptable in-memory [`LmApi`].
#[derive(Debug, Default)]
pub struct InMemoryLm {
    state: Mutex<State>,
}

impl InMemoryLm {
    /// Creates an empty LM.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an LM that completes every process as soon as it starts.
    #[must_use]
    pub fn with_auto_complete() -> Self {
        Self {
            state: Mutex::new(State {
                auto_complete: true,
                ..State::default()
            }),
        }
    }

    /// Inserts an assembly directly and returns its id.
    pub async fn seed_assembly(
        &self,
        name: &str,
        descriptor_name: &str,
        state: &str,
        properties: &BTreeMap<String, String>,
    ) -> String {
        let mut s = self.state.lock().await;
        let id = s.next_id("assembly");
        s.assemblies.insert(
            id.clone(),
            Assembly {
                id: id.clone(),
                name: name.to_string(),
                state: state.to_string(),
                descriptor_name: descriptor_name.to_string(),
                properties: to_properties(properties),
            },
        );
        id
    }

    /// Inserts a process directly and returns its id. The process carries no
    /// effect; completing it changes nothing.
    pub async fn seed_process(
        &self,
        assembly_name: &str,
        assembly_id: &str,
        intent_type: &str,
        status: &str,
    ) -> String {
        let mut s = self.state.lock().await;
        let id = s.next_id("process");
        let sequence = s.next_id;
        s.processes.insert(
            id.clone(),
            ProcessEntry {
                process: Process {
                    id: id.clone(),
                    assembly_id: assembly_id.to_string(),
                    intent_type: intent_type.to_string(),
                    status: status.to_string(),
                    status_reason: None,
                },
                assembly_name: assembly_name.to_string(),
                effect: None,
                sequence,
            },
        );
        id
    }

    /// Returns the assembly with the given name.
    pub async fn assembly(&self, name: &str) -> Option<Assembly> {
        self.state.lock().await.assembly_by_name(name).cloned()
    }

    /// Returns a process by id.
    pub async fn process(&self, id: &str) -> Option<Process> {
        self.state
            .lock()
            .await
            .processes
            .get(id)
            .map(|e| e.process.clone())
    }

    /// Overwrites the state of the named assembly, emulating out-of-band changes.
    pub async fn set_assembly_state(&self, name: &str, state: &str) {
        let mut s = self.state.lock().await;
        if let Some(assembly) = s.assemblies.values_mut().find(|a| a.name == name) {
            assembly.state = state.to_string();
        }
    }

    /// Returns every accepted intent in submission order.
    pub async fn intents(&self) -> Vec<RecordedIntent> {
        self.state.lock().await.intents.clone()
    }

    /// Completes a process and applies its effect.
    pub async fn complete_process(&self, id: &str) -> bool {
        self.state.lock().await.finish(id, "Completed", None)
    }

    /// Fails a process without applying its effect.
    pub async fn fail_process(&self, id: &str, reason: &str) -> bool {
        self.state
            .lock()
            .await
            .finish(id, "Failed", Some(reason.to_string()))
    }

    /// Sets a process status without applying any effect.
    pub async fn set_process_status(&self, id: &str, status: &str) -> bool {
        let mut s = self.state.lock().await;
        match s.processes.get_mut(id) {
            Some(entry) => {
                entry.process.status = status.to_string();
                true
            }
            None => false,
        }
    }

    /// Completes every ongoing process in start order.
    pub async fn complete_all(&self) {
        let mut s = self.state.lock().await;
        let mut pending: Vec<(u64, String)> = s
            .processes
            .values()
            .filter(|e| matches!(e.process.status.as_str(), "Planned" | "Pending" | "In Progress"))
            .map(|e| (e.sequence, e.process.id.clone()))
            .collect();
        pending.sort();
        for (_, id) in pending {
            s.finish(&id, "Completed", None);
        }
    }

    /// Makes the next call of `op` fail with the given status and body.
    pub async fn fail_next(&self, op: LmOperation, status: u16, body: &str) {
        self.state
            .lock()
            .await
            .next_failures
            .entry(op)
            .or_default()
            .push_back(ScriptedFailure {
                status,
                body: body.to_string(),
            });
    }

    /// Makes every call of `op` fail until [`Self::clear_failures`].
    pub async fn fail_always(&self, op: LmOperation, status: u16, body: &str) {
        self.state.lock().await.persistent_failures.insert(
            op,
            ScriptedFailure {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Removes all scripted failures.
    pub async fn clear_failures(&self) {
        let mut s = self.state.lock().await;
        s.next_failures.clear();
        s.persistent_failures.clear();
    }
}

#[async_trait]
impl LmApi for InMemoryLm {
    async fn create_assembly(&self, request: CreateAssemblyRequest) -> Result<String> {
        let mut s = self.state.lock().await;
        s.check_failure(LmOperation::Create)?;
        if s.assembly_by_name(&request.assembly_name).is_some() {
            return Err(Error::UnexpectedStatus {
                operation: "Create Assembly".to_string(),
                status: 409,
                body: format!("assembly {} already exists", request.assembly_name),
            });
        }
        let id = s.next_id("assembly");
        s.assemblies.insert(
            id.clone(),
            Assembly {
                id: id.clone(),
                name: request.assembly_name.clone(),
                state: "None".to_string(),
                descriptor_name: request.descriptor_name.clone(),
                properties: to_properties(&request.properties),
            },
        );
        let name = request.assembly_name.clone();
        Ok(s.start_process(id, &name, RecordedIntent::Create(request)))
    }

    async fn upgrade_assembly(&self, request: UpgradeAssemblyRequest) -> Result<String> {
        let mut s = self.state.lock().await;
        s.check_failure(LmOperation::Upgrade)?;
        let id = s
            .assembly_by_name(&request.assembly_name)
            .map(|a| a.id.clone())
            .ok_or_else(|| not_found(LmOperation::Upgrade, &request.assembly_name))?;
        let name = request.assembly_name.clone();
        Ok(s.start_process(id, &name, RecordedIntent::Upgrade(request)))
    }

    async fn change_assembly_state(&self, request: ChangeAssemblyStateRequest) -> Result<String> {
        let mut s = self.state.lock().await;
        s.check_failure(LmOperation::ChangeState)?;
        let id = s
            .assembly_by_name(&request.assembly_name)
            .map(|a| a.id.clone())
            .ok_or_else(|| not_found(LmOperation::ChangeState, &request.assembly_name))?;
        let name = request.assembly_name.clone();
        Ok(s.start_process(id, &name, RecordedIntent::ChangeState(request)))
    }

    async fn delete_assembly(&self, request: DeleteAssemblyRequest) -> Result<String> {
        let mut s = self.state.lock().await;
        s.check_failure(LmOperation::Delete)?;
        let id = s
            .assembly_by_name(&request.assembly_name)
            .map(|a| a.id.clone())
            .ok_or_else(|| not_found(LmOperation::Delete, &request.assembly_name))?;
        let name = request.assembly_name.clone();
        Ok(s.start_process(id, &name, RecordedIntent::Delete(request)))
    }

    async fn get_assembly_by_id(&self, id: &str) -> Result<Option<Assembly>> {
        let mut s = self.state.lock().await;
        s.check_failure(LmOperation::GetAssemblyById)?;
        Ok(s.assemblies.get(id).cloned())
    }

    async fn get_assembly_by_name(&self, name: &str) -> Result<Option<Assembly>> {
        let mut s = self.state.lock().await;
        s.check_failure(LmOperation::GetAssemblyByName)?;
        Ok(s.assembly_by_name(name).cloned())
    }

    async fn get_latest_process_for_name(&self, name: &str) -> Result<Option<Process>> {
        let mut s = self.state.lock().await;
        s.check_failure(LmOperation::GetLatestProcess)?;
        Ok(s.processes
            .values()
            .filter(|e| e.assembly_name == name)
            .max_by_key(|e| e.sequence)
            .map(|e| e.process.clone()))
    }

    async fn get_process_by_id(&self, id: &str) -> Result<Option<Process>> {
        let mut s = self.state.lock().await;
        s.check_failure(LmOperation::GetProcessById)?;
        Ok(s.processes.get(id).map(|e| e.process.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(name: &str) -> CreateAssemblyRequest {
        CreateAssemblyRequest {
            assembly_name: name.to_string(),
            descriptor_name: "assembly::svcA::1.0".to_string(),
            intended_state: "Active".to_string(),
            properties: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn create_is_visible_immediately_and_applied_on_completion() {
        let lm = InMemoryLm::new();
        let process_id = lm.create_assembly(create("svc-a")).await.expect("create");

        let assembly = lm.get_assembly_by_name("svc-a").await.expect("get").expect("exists");
        assert_eq!(assembly.state, "None");
        let process = lm.get_process_by_id(&process_id).await.expect("get").expect("exists");
        assert_eq!(process.status, "Planned");
        assert_eq!(process.assembly_id, assembly.id);

        assert!(lm.complete_process(&process_id).await);
        let assembly = lm.assembly("svc-a").await.expect("exists");
        assert_eq!(assembly.state, "Active");
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let lm = InMemoryLm::new();
        lm.create_assembly(create("svc-a")).await.expect("create");
        let err = lm.create_assembly(create("svc-a")).await.expect_err("duplicate");
        assert!(err.is_conflict());
        assert_eq!(lm.intents().await.len(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let lm = InMemoryLm::new();
        lm.fail_next(LmOperation::GetAssemblyByName, 503, "busy").await;
        assert!(lm.get_assembly_by_name("x").await.is_err());
        assert!(lm.get_assembly_by_name("x").await.expect("ok").is_none());

        lm.fail_always(LmOperation::GetAssemblyByName, 500, "down").await;
        assert!(lm.get_assembly_by_name("x").await.is_err());
        assert!(lm.get_assembly_by_name("x").await.is_err());
        lm.clear_failures().await;
        assert!(lm.get_assembly_by_name("x").await.is_ok());
    }

    #[tokio::test]
    async fn completed_delete_removes_assembly() {
        let lm = InMemoryLm::with_auto_complete();
        lm.create_assembly(create("svc-a")).await.expect("create");
        lm.delete_assembly(DeleteAssemblyRequest {
            assembly_name: "svc-a".to_string(),
        })
        .await
        .expect("delete");
        assert!(lm.assembly("svc-a").await.is_none());
        let latest = lm
            .get_latest_process_for_name("svc-a")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(latest.intent_type, "DeleteAssembly");
        assert_eq!(latest.status, "Completed");
    }
}
