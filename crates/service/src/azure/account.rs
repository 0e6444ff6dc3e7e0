use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::broker::domain::Configuration;
use crate::errors::BrokerError;

const DEFAULT_LOCATION: &str = "westus";

/// Replication SKUs accepted when the broker creates an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SkuName {
    #[serde(rename = "Standard_GRS")]
    StandardGrs,
    #[serde(rename = "Standard_LRS")]
    StandardLrs,
    #[default]
    #[serde(rename = "Standard_RAGRS")]
    StandardRagrs,
    #[serde(rename = "Standard_ZRS")]
    StandardZrs,
}

impl SkuName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkuName::StandardGrs => "Standard_GRS",
            SkuName::StandardLrs => "Standard_LRS",
            SkuName::StandardRagrs => "Standard_RAGRS",
            SkuName::StandardZrs => "Standard_ZRS",
        }
    }
}

impl fmt::Display for SkuName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for SkuName {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Standard_GRS" => Ok(SkuName::StandardGrs),
            "Standard_LRS" => Ok(SkuName::StandardLrs),
            "Standard_RAGRS" => Ok(SkuName::StandardRagrs),
            "Standard_ZRS" => Ok(SkuName::StandardZrs),
            other => Err(BrokerError::Validation(format!(
                "The SkuName {other:?} to create the storage account is invalid. It must be Standard_GRS, Standard_LRS, Standard_RAGRS or Standard_ZRS"
            ))),
        }
    }
}

/// Coordinates of a storage account plus the options used if the broker creates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAccount {
    pub subscription_id: String,
    pub resource_group_name: String,
    pub storage_account_name: String,
    pub use_https: bool,
    pub sku_name: SkuName,
    pub location: String,
    pub custom_domain_name: Option<String>,
    pub use_sub_domain: bool,
    pub enable_encryption: bool,
}

impl StorageAccount {
    /// Resolve an account from provision parameters, applying defaults.
    ///
    /// Unparseable boolean flags keep their defaults; an unknown SKU is a
    /// validation error.
    pub fn from_configuration(configuration: &Configuration) -> Result<Self, BrokerError> {
        let sku_name = match configuration.sku_name.as_deref() {
            Some(s) if !s.is_empty() => s.parse()?,
            _ => SkuName::default(),
        };
        let location = configuration
            .location
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string());

        Ok(Self {
            subscription_id: configuration.subscription_id.clone(),
            resource_group_name: configuration.resource_group_name.clone(),
            storage_account_name: configuration.storage_account_name.clone(),
            use_https: configuration.use_https.as_ref().and_then(|f| f.as_bool()).unwrap_or(true),
            sku_name,
            location,
            custom_domain_name: configuration.custom_domain_name.clone().filter(|d| !d.is_empty()),
            use_sub_domain: configuration.use_sub_domain.as_ref().and_then(|f| f.as_bool()).unwrap_or(false),
            enable_encryption: configuration.enable_encryption.as_ref().and_then(|f| f.as_bool()).unwrap_or(false),
        })
    }

    /// Coordinates of an already provisioned account.
    pub fn existing(subscription_id: &str, resource_group_name: &str, storage_account_name: &str, use_https: bool) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            resource_group_name: resource_group_name.to_string(),
            storage_account_name: storage_account_name.to_string(),
            use_https,
            sku_name: SkuName::default(),
            location: DEFAULT_LOCATION.to_string(),
            custom_domain_name: None,
            use_sub_domain: false,
            enable_encryption: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration(raw: serde_json::Value) -> Configuration {
        serde_json::from_value(raw).expect("configuration")
    }

    #[test]
    fn defaults_apply_when_options_absent() -> Result<(), BrokerError> {
        let account = StorageAccount::from_configuration(&configuration(serde_json::json!({
            "subscription_id": "sub", "resource_group_name": "rg", "storage_account_name": "acct"
        })))?;
        assert!(account.use_https);
        assert_eq!(account.sku_name, SkuName::StandardRagrs);
        assert_eq!(account.location, "westus");
        assert!(account.custom_domain_name.is_none());
        assert!(!account.enable_encryption);
        Ok(())
    }

    #[test]
    fn flags_accept_strings_and_bools() -> Result<(), BrokerError> {
        let account = StorageAccount::from_configuration(&configuration(serde_json::json!({
            "storage_account_name": "acct",
            "use_https": "false",
            "use_sub_domain": true,
            "enable_encryption": "not-a-bool",
            "sku_name": "Standard_LRS",
            "location": "eastus"
        })))?;
        assert!(!account.use_https);
        assert!(account.use_sub_domain);
        assert!(!account.enable_encryption);
        assert_eq!(account.sku_name, SkuName::StandardLrs);
        assert_eq!(account.location, "eastus");
        Ok(())
    }

    #[test]
    fn unknown_sku_is_rejected() {
        let err = StorageAccount::from_configuration(&configuration(serde_json::json!({ "sku_name": "Premium_LRS" })))
            .expect_err("invalid sku");
        assert!(matches!(err, BrokerError::Validation(msg) if msg.contains("Premium_LRS")));
    }
}
