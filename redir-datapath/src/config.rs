//! Datapath configuration file.
//!
//! ```json
//! {
//!   "auto_redirect": { "target": "10.0.0.1:7893", "icmp_redirect_ifindex": 4 },
//!   "tun": { "proxy_mark": 354, "tun_ifindex": 7 },
//!   "flow_table": { "capacity": 65535, "shards": 16 }
//! }
//! ```
//!
//! Both interception modes are optional; an absent section leaves the
//! corresponding parameter store empty and that mode passes all traffic.

use crate::conntrack::{DEFAULT_CAPACITY, DEFAULT_SHARDS, FlowTable};
use crate::error::{DatapathError, Result};
use crate::params::{RedirectParams, TunParams};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddrV4;
use std::num::NonZeroUsize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatapathConfig {
    #[serde(default)]
    pub auto_redirect: Option<AutoRedirectConfig>,
    #[serde(default)]
    pub tun: Option<TunConfig>,
    #[serde(default)]
    pub flow_table: FlowTableConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoRedirectConfig {
    /// Proxy listener new connections are redirected to
    pub target: SocketAddrV4,
    /// Interface ICMP is diverted to, 0 disables
    #[serde(default)]
    pub icmp_redirect_ifindex: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunConfig {
    pub proxy_mark: u32,
    pub tun_ifindex: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowTableConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_shards")]
    pub shards: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_shards() -> usize {
    DEFAULT_SHARDS
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            shards: DEFAULT_SHARDS,
        }
    }
}

impl DatapathConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            auto_redirect = config.auto_redirect.is_some(),
            tun = config.tun.is_some(),
            "Loaded datapath configuration"
        );
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.flow_table.validate()?;
        if let Some(auto_redirect) = &self.auto_redirect {
            auto_redirect.validate()?;
        }
        if let Some(tun) = &self.tun {
            tun.validate()?;
        }
        Ok(())
    }

    pub fn redirect_params(&self) -> Option<RedirectParams> {
        self.auto_redirect.as_ref().map(AutoRedirectConfig::params)
    }

    pub fn tun_params(&self) -> Option<TunParams> {
        self.tun.as_ref().map(TunConfig::params)
    }
}

impl AutoRedirectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target.ip().is_unspecified() {
            return Err(DatapathError::Config(format!(
                "redirect target {} has an unspecified address",
                self.target
            )));
        }
        if self.target.port() == 0 {
            return Err(DatapathError::Config(format!(
                "redirect target {} has port 0",
                self.target
            )));
        }
        Ok(())
    }

    pub fn params(&self) -> RedirectParams {
        RedirectParams::new(self.target).with_icmp_redirect(self.icmp_redirect_ifindex)
    }
}

impl TunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tun_ifindex == 0 {
            return Err(DatapathError::Config(
                "tun_ifindex must name an interface".to_string(),
            ));
        }
        Ok(())
    }

    pub fn params(&self) -> TunParams {
        TunParams::new(self.proxy_mark, self.tun_ifindex)
    }
}

impl FlowTableConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(DatapathError::Config(
                "flow_table.capacity must be greater than 0".to_string(),
            ));
        }
        if self.shards == 0 {
            return Err(DatapathError::Config(
                "flow_table.shards must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<FlowTable> {
        self.validate()?;
        let capacity = NonZeroUsize::new(self.capacity).ok_or_else(|| {
            DatapathError::Config("flow_table.capacity must be greater than 0".to_string())
        })?;
        Ok(FlowTable::with_shards(capacity, self.shards))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv4Addr;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DatapathConfig::from_json_str("{}").unwrap();
        assert_eq!(config.auto_redirect, None);
        assert_eq!(config.tun, None);
        assert_eq!(config.flow_table.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.flow_table.shards, DEFAULT_SHARDS);
        assert_eq!(config.redirect_params(), None);
    }

    #[test]
    fn test_full_config() {
        let config = DatapathConfig::from_json_str(
            r#"{
                "auto_redirect": { "target": "10.0.0.1:7893", "icmp_redirect_ifindex": 4 },
                "tun": { "proxy_mark": 354, "tun_ifindex": 7 },
                "flow_table": { "capacity": 1024 }
            }"#,
        )
        .unwrap();

        let params = config.redirect_params().unwrap();
        assert_eq!(
            params.target,
            Some(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 7893))
        );
        assert_eq!(params.icmp_redirect(), Some(4));

        let tun = config.tun_params().unwrap();
        assert_eq!(tun.proxy_mark, 354);
        assert_eq!(tun.tun_interface(), Some(7));

        assert_eq!(config.flow_table.capacity, 1024);
        assert_eq!(config.flow_table.shards, DEFAULT_SHARDS);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            r#"{ "auto_redirect": { "target": "0.0.0.0:7893" } }"#,
            r#"{ "auto_redirect": { "target": "10.0.0.1:0" } }"#,
            r#"{ "tun": { "proxy_mark": 1, "tun_ifindex": 0 } }"#,
            r#"{ "flow_table": { "capacity": 0 } }"#,
            r#"{ "flow_table": { "shards": 0 } }"#,
        ];
        for case in cases {
            assert!(
                matches!(
                    DatapathConfig::from_json_str(case),
                    Err(DatapathError::Config(_))
                ),
                "accepted {case}"
            );
        }
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let result = DatapathConfig::from_json_str(r#"{ "redirect": {} }"#);
        assert!(matches!(result, Err(DatapathError::Json(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "auto_redirect": {{ "target": "127.0.0.1:1080" }} }}"#
        )
        .unwrap();

        let config = DatapathConfig::load(file.path()).unwrap();
        assert_eq!(config.redirect_params().unwrap().icmp_redirect(), None);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = DatapathConfig::load(dir.path().join("missing.json"));
        assert!(matches!(result, Err(DatapathError::Io(_))));
    }

    #[test]
    fn test_build_flow_table() {
        let table = FlowTableConfig {
            capacity: 8,
            shards: 2,
        }
        .build()
        .unwrap();
        assert_eq!(table.capacity(), 8);
        assert!(table.is_empty());
    }
}
