use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Boolean option that callers send either as a JSON bool or as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Flag::Bool(b) => Some(*b),
            Flag::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Provision parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub resource_group_name: String,
    #[serde(default)]
    pub storage_account_name: String,
    #[serde(default)]
    pub use_https: Option<Flag>,
    #[serde(default)]
    pub sku_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub custom_domain_name: Option<String>,
    #[serde(default)]
    pub use_sub_domain: Option<Flag>,
    #[serde(default)]
    pub enable_encryption: Option<Flag>,
}

impl Configuration {
    /// Names every required field that is still empty.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.subscription_id.is_empty() { missing.push("subscription_id"); }
        if self.resource_group_name.is_empty() { missing.push("resource_group_name"); }
        if self.storage_account_name.is_empty() { missing.push("storage_account_name"); }
        missing
    }
}

/// Bind parameters. Only `share` is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindOptions {
    #[serde(rename = "share", default)]
    pub file_share_name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub gid: String,
    #[serde(default)]
    pub file_mode: String,
    #[serde(default)]
    pub dir_mode: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub vers: String,
    #[serde(default)]
    pub mount: String,
}

impl BindOptions {
    /// Mount entries contributed by the caller; `share` and `mount` are not mount options.
    pub fn to_entries(&self) -> BTreeMap<String, String> {
        let mut ret = BTreeMap::new();
        let mut put = |k: &str, v: &str| {
            if !v.is_empty() { ret.insert(k.to_string(), v.to_string()); }
        };
        put("uid", &self.uid);
        put("gid", &self.gid);
        put("file_mode", &self.file_mode);
        put("dir_mode", &self.dir_mode);
        put("vers", &self.vers);
        if self.readonly {
            ret.insert("readonly".to_string(), "true".to_string());
        }
        ret
    }
}

/// A file share known to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileShare {
    pub instance_id: String,
    pub file_share_name: String,
    /// True when the broker created the share rather than adopting it.
    pub is_created: bool,
    pub count: u32,
    #[serde(default)]
    pub url: String,
}

impl FileShare {
    pub fn absent(instance_id: &str, file_share_name: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            file_share_name: file_share_name.to_string(),
            is_created: false,
            count: 0,
            url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_id: String,
    pub plan_id: String,
    pub organization_guid: String,
    pub space_guid: String,
    pub subscription_id: String,
    pub resource_group_name: String,
    pub storage_account_name: String,
    pub use_https: bool,
    /// Governs whether deprovision may delete the account.
    pub is_created_storage_account: bool,
    #[serde(default)]
    pub file_shares: BTreeMap<String, FileShare>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionDetails {
    pub service_id: String,
    pub plan_id: String,
    pub organization_guid: String,
    pub space_guid: String,
    #[serde(default, rename = "parameters")]
    pub raw_parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindDetails {
    #[serde(default)]
    pub app_guid: String,
    pub plan_id: String,
    pub service_id: String,
    #[serde(default, rename = "parameters")]
    pub raw_parameters: Option<serde_json::Value>,
}

/// Stored per binding so unbind can recover the share name.
pub type BindingDetails = BindDetails;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionedServiceSpec {
    pub is_async: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeprovisionServiceSpec {
    pub is_async: bool,
    pub operation_data: String,
}

/// Polling states of the asynchronous-operation contract. Every operation
/// here completes synchronously, so the broker itself never returns one;
/// the protocol adapter uses these to shape its `last_operation` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LastOperationState {
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastOperation {
    pub state: LastOperationState,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedDevice {
    pub volume_id: String,
    pub mount_config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeMount {
    pub driver: String,
    pub container_dir: String,
    pub mode: String,
    pub device_type: String,
    pub device: SharedDevice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    /// Always an empty object; the cloud controller rejects a null.
    pub credentials: serde_json::Value,
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicePlan {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    pub bindable: bool,
    pub plan_updateable: bool,
    pub tags: Vec<String>,
    pub requires: Vec<String>,
    pub plans: Vec<ServicePlan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_operation_states_serialize_in_snake_case() -> anyhow::Result<()> {
        let op = LastOperation { state: LastOperationState::InProgress, description: "creating".into() };
        assert_eq!(serde_json::to_value(&op)?, serde_json::json!({ "state": "in_progress", "description": "creating" }));
        assert_eq!(serde_json::to_value(LastOperationState::Succeeded)?, "succeeded");
        assert_eq!(serde_json::to_value(LastOperationState::Failed)?, "failed");
        Ok(())
    }

    #[test]
    fn bind_entries_skip_empty_share_and_mount() {
        let opts: BindOptions = serde_json::from_value(serde_json::json!({
            "share": "s1", "uid": "1000", "readonly": true, "mount": "/data", "dir_mode": ""
        }))
        .expect("options");
        let entries = opts.to_entries();
        assert_eq!(entries.get("uid").map(String::as_str), Some("1000"));
        assert_eq!(entries.get("readonly").map(String::as_str), Some("true"));
        assert!(!entries.contains_key("share"));
        assert!(!entries.contains_key("mount"));
        assert!(!entries.contains_key("dir_mode"));
    }

    #[test]
    fn missing_keys_lists_each_absent_field() {
        let cfg = Configuration { resource_group_name: "rg".into(), ..Default::default() };
        assert_eq!(cfg.missing_keys(), vec!["subscription_id", "storage_account_name"]);
    }

    #[test]
    fn flag_parses_text() {
        assert_eq!(Flag::Text("true".into()).as_bool(), Some(true));
        assert_eq!(Flag::Text("nope".into()).as_bool(), None);
        assert_eq!(Flag::Bool(false).as_bool(), Some(false));
    }
}
