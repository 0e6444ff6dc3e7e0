use std::collections::{BTreeMap, BTreeSet};

use crate::errors::BrokerError;

/// Mount option policy: which keys callers may set, overridable defaults,
/// and forced values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub allowed: BTreeSet<String>,
    pub forced: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
}

impl MountOptions {
    /// Build from a comma separated allow-list and `key:value` defaults.
    /// A default whose key is not allowed becomes forced.
    pub fn read_conf(allowed: &str, defaults: &str) -> Result<Self, BrokerError> {
        let allowed: BTreeSet<String> = split(allowed).map(str::to_string).collect();
        let mut forced = BTreeMap::new();
        let mut options = BTreeMap::new();
        for entry in split(defaults) {
            let Some((k, v)) = entry.split_once(':').filter(|(k, _)| !k.trim().is_empty()) else {
                return Err(BrokerError::Validation(format!("invalid default mount option {entry:?}, expected key:value")));
            };
            let (k, v) = (k.trim().to_string(), v.trim().to_string());
            if allowed.contains(&k) {
                options.insert(k, v);
            } else {
                forced.insert(k, v);
            }
        }
        Ok(Self { allowed, forced, options })
    }

    pub fn from_config(cfg: &configs::MountConfig) -> Result<Self, BrokerError> {
        Self::read_conf(&cfg.allowed_options, &cfg.default_options)
    }

    /// Apply caller entries; rejects the whole set if any key is not allowed.
    pub fn set_entries(&mut self, entries: BTreeMap<String, String>) -> Result<(), BrokerError> {
        let rejected: Vec<&str> = entries.keys().filter(|k| !self.allowed.contains(*k)).map(String::as_str).collect();
        if !rejected.is_empty() {
            return Err(BrokerError::Validation(format!("Not allowed options: {}", rejected.join(", "))));
        }
        self.options.extend(entries);
        Ok(())
    }

    /// Effective mount options, forced values last.
    pub fn make_config(&self) -> BTreeMap<String, String> {
        let mut config = self.options.clone();
        config.extend(self.forced.iter().map(|(k, v)| (k.clone(), v.clone())));
        config
    }
}

fn split(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn allowed_default_can_be_overridden() -> Result<(), BrokerError> {
        let mut mount = MountOptions::read_conf("share,uid,vers", "vers:3.0")?;
        mount.set_entries(entries(&[("vers", "2.1"), ("uid", "1000")]))?;
        assert_eq!(mount.make_config(), entries(&[("uid", "1000"), ("vers", "2.1")]));
        Ok(())
    }

    #[test]
    fn fixed_default_cannot_be_set_by_caller() -> Result<(), BrokerError> {
        let mut mount = MountOptions::read_conf("share,uid", "vers:3.0")?;
        assert_eq!(mount.forced, entries(&[("vers", "3.0")]));
        let err = mount.set_entries(entries(&[("vers", "1.0"), ("gid", "1")])).expect_err("not allowed");
        assert_eq!(err.to_string(), "Not allowed options: gid, vers");
        assert_eq!(mount.make_config(), entries(&[("vers", "3.0")]));
        Ok(())
    }

    #[test]
    fn malformed_default_is_rejected() {
        assert!(MountOptions::read_conf("uid", "uid").is_err());
        assert!(MountOptions::read_conf("uid", ":1").is_err());
    }

    #[test]
    fn config_defaults_parse_into_policy() -> Result<(), BrokerError> {
        let mount = MountOptions::from_config(&configs::MountConfig::default())?;
        assert!(mount.allowed.contains("share"));
        assert_eq!(mount.options, entries(&[("vers", "3.0")]));

        let bad = configs::MountConfig { allowed_options: "uid".into(), default_options: "vers".into() };
        assert!(MountOptions::from_config(&bad).is_err());
        Ok(())
    }
}
