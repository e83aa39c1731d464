//! Wire types exchanged with LM.
//!
//! Values stay in LM's own vocabulary here (plain strings for states, intent
//! types and process statuses). Translation into the operator's closed enums
//! happens on the operator side.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An Assembly instance as reported by the LM topology API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assembly {
    /// LM identifier of the assembly.
    pub id: String,
    /// Unique assembly name.
    pub name: String,
    /// Current lifecycle state (e.g. `Active`).
    #[serde(default)]
    pub state: String,
    /// Descriptor the assembly is modelled on (`assembly::<name>::<version>`).
    #[serde(default)]
    pub descriptor_name: String,
    /// Property values applied to the assembly.
    #[serde(default)]
    pub properties: Vec<AssemblyProperty>,
}

impl Assembly {
    /// Returns the properties as a name/value map.
    ///
    /// Later duplicates win.
    #[must_use]
    pub fn property_map(&self) -> BTreeMap<String, String> {
        self.properties
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }
}

/// A single assembly property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyProperty {
    /// Property name.
    pub name: String,
    /// Property value.
    #[serde(default)]
    pub value: String,
}

/// An LM process: the asynchronous unit of work started by an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Process identifier.
    pub id: String,
    /// Identifier of the assembly the process acts on.
    #[serde(default)]
    pub assembly_id: String,
    /// LM intent type (e.g. `CreateAssembly`).
    #[serde(default)]
    pub intent_type: String,
    /// LM process status (e.g. `In Progress`).
    pub status: String,
    /// Reason for the status, usually only set on failure.
    #[serde(default)]
    pub status_reason: Option<String>,
}

/// Body of `POST /api/intent/createAssembly`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssemblyRequest {
    /// Name of the new assembly.
    pub assembly_name: String,
    /// Descriptor to model the assembly on.
    pub descriptor_name: String,
    /// State the assembly should reach.
    pub intended_state: String,
    /// Initial property values.
    pub properties: BTreeMap<String, String>,
}

/// Body of `POST /api/intent/upgradeAssembly`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeAssemblyRequest {
    /// Name of the assembly to upgrade.
    pub assembly_name: String,
    /// Descriptor to move to.
    pub descriptor_name: String,
    /// Property values to apply.
    pub properties: BTreeMap<String, String>,
}

/// Body of `POST /api/intent/changeAssemblyState`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAssemblyStateRequest {
    /// Name of the assembly.
    pub assembly_name: String,
    /// State the assembly should reach.
    pub intended_state: String,
}

/// Body of `POST /api/intent/deleteAssembly`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAssemblyRequest {
    /// Name of the assembly to delete.
    pub assembly_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembly_decodes_topology_payload() {
        let json = r#"{
            "id": "a1",
            "name": "svc-a",
            "state": "Active",
            "descriptorName": "assembly::svcA::1.0",
            "properties": [{"name": "size", "value": "2"}, {"name": "zone"}]
        }"#;
        let assembly: Assembly = serde_json::from_str(json).expect("decode");
        assert_eq!(assembly.descriptor_name, "assembly::svcA::1.0");
        let props = assembly.property_map();
        assert_eq!(props.get("size").map(String::as_str), Some("2"));
        assert_eq!(props.get("zone").map(String::as_str), Some(""));
    }

    #[test]
    fn process_tolerates_missing_optional_fields() {
        let json = r#"{"id": "p1", "status": "In Progress"}"#;
        let process: Process = serde_json::from_str(json).expect("decode");
        assert_eq!(process.status, "In Progress");
        assert!(process.assembly_id.is_empty());
        assert!(process.status_reason.is_none());
    }

    #[test]
    fn create_request_uses_lm_field_names() {
        let request = CreateAssemblyRequest {
            assembly_name: "svc-a".into(),
            descriptor_name: "assembly::svcA::1.0".into(),
            intended_state: "Active".into(),
            properties: BTreeMap::from([("size".to_string(), "2".to_string())]),
        };
        let value = serde_json::to_value(&request).expect("encode");
        assert_eq!(value["assemblyName"], "svc-a");
        assert_eq!(value["intendedState"], "Active");
        assert_eq!(value["properties"]["size"], "2");
    }
}
