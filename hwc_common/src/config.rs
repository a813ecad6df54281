//! Provider configuration: region, credentials and endpoints.

use ::std::{collections::BTreeMap, fs::File, io::BufReader};

use ::anyhow::anyhow;
use ::serde::{de::DeserializeOwned, Deserialize};
use ::serde_json::from_reader;

use crate::error::{HwcError, Result};

pub const DEFAULT_CLOUD: &str = "myhuaweicloud.com";
pub const DEFAULT_MAX_RETRIES: u32 = 5;

fn default_cloud() -> String {
    DEFAULT_CLOUD.to_owned()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub region: String,
    /// Falls back to the region's default project when absent.
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Only for temporary credentials.
    #[serde(default)]
    pub security_token: Option<String>,
    /// IAM token, used instead of AK/SK when set.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    /// Custom endpoints keyed by service name, e.g. `"dmsv2": "https://dms.internal/"`.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub enterprise_project_id: Option<String>,
    /// How many times a throttled (429) request is retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub insecure: bool,
}

impl ProviderConfig {
    /// Build the configuration from `HW_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Fill the credential fields left empty in the file from the environment.
    pub fn with_env_fallback(self) -> Result<Self> {
        self.fill_from(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let region = lookup("HW_REGION_NAME").ok_or_else(|| {
            HwcError::fail_to_load_config(anyhow!("HW_REGION_NAME is not set"))
        })?;
        let config = Self {
            region,
            project_id: None,
            access_key: String::new(),
            secret_key: String::new(),
            security_token: None,
            auth_token: None,
            cloud: default_cloud(),
            endpoints: BTreeMap::new(),
            enterprise_project_id: None,
            max_retries: DEFAULT_MAX_RETRIES,
            insecure: false,
        };
        config.fill_from(lookup)
    }

    fn fill_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if self.access_key.is_empty() {
            self.access_key = non_empty("HW_ACCESS_KEY").unwrap_or_default();
        }
        if self.secret_key.is_empty() {
            self.secret_key = non_empty("HW_SECRET_KEY").unwrap_or_default();
        }
        self.security_token = self.security_token.or_else(|| non_empty("HW_SECURITY_TOKEN"));
        self.auth_token = self.auth_token.or_else(|| non_empty("HW_AUTH_TOKEN"));
        self.project_id = self.project_id.or_else(|| non_empty("HW_PROJECT_ID"));
        self.enterprise_project_id = self
            .enterprise_project_id
            .or_else(|| non_empty("HW_ENTERPRISE_PROJECT_ID"));
        if let Some(cloud) = non_empty("HW_CLOUD") {
            if self.cloud == DEFAULT_CLOUD {
                self.cloud = cloud;
            }
        }
        if let Some(retries) = non_empty("HW_MAX_RETRIES") {
            self.max_retries = retries.parse().map_err(|e| {
                HwcError::fail_to_load_config(anyhow!("invalid HW_MAX_RETRIES {}: {}", retries, e))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.auth_token.is_some() {
            return Ok(());
        }
        match (self.access_key.is_empty(), self.secret_key.is_empty()) {
            (false, false) => Ok(()),
            (true, true) => Err(HwcError::fail_to_load_config(anyhow!(
                "no credentials: set access_key and secret_key, or auth_token"
            ))),
            (true, false) => Err(HwcError::fail_to_load_config(anyhow!(
                "access_key is missing"
            ))),
            (false, true) => Err(HwcError::fail_to_load_config(anyhow!(
                "secret_key is missing"
            ))),
        }
    }
}

/// Load the configuration from a JSON file.
pub fn load_config<C: DeserializeOwned>(path: &str) -> Result<C> {
    let file = File::open(path)
        .map_err(|e| HwcError::fail_to_load_config(anyhow!("cannot open {}: {}", path, e)))?;
    let reader = BufReader::new(file);
    from_reader(reader).map_err(HwcError::fail_to_load_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::anyhow::Result;
    use ::serde_json::{from_value, json};

    #[test]
    fn missing_field_region() {
        let config = json!(
            {
                "access_key": "ak",
                "secret_key": "sk"
            }
        );
        let result = from_value::<ProviderConfig>(config);
        assert_eq!(result.unwrap_err().to_string(), "missing field `region`");
    }

    #[test]
    fn deny_unknown_fields() {
        let config = json!(
            {
                "region": "cn-north-4",
                "unknown_field": "unknown"
            }
        );
        let result = from_value::<ProviderConfig>(config);
        assert!(result
            .unwrap_err()
            .to_string()
            .starts_with("unknown field `unknown_field`, expected one of `region`"));
    }

    #[test]
    fn deserialize_provider_config() -> Result<()> {
        let config = json!(
            {
                "region": "cn-north-4",
                "project_id": "0123",
                "access_key": "ak",
                "secret_key": "sk",
                "endpoints": {
                    "dmsv2": "https://dms.internal/"
                }
            }
        );
        let result = from_value::<ProviderConfig>(config)?;
        assert_eq!(
            result,
            ProviderConfig {
                region: "cn-north-4".to_owned(),
                project_id: Some("0123".to_owned()),
                access_key: "ak".to_owned(),
                secret_key: "sk".to_owned(),
                security_token: None,
                auth_token: None,
                cloud: "myhuaweicloud.com".to_owned(),
                endpoints: BTreeMap::from([(
                    "dmsv2".to_owned(),
                    "https://dms.internal/".to_owned()
                )]),
                enterprise_project_id: None,
                max_retries: 5,
                insecure: false,
            }
        );
        Ok(())
    }

    #[test]
    fn config_from_env_lookup() {
        let env = BTreeMap::from([
            ("HW_REGION_NAME", "ap-southeast-1"),
            ("HW_ACCESS_KEY", "ak"),
            ("HW_SECRET_KEY", "sk"),
            ("HW_CLOUD", "myhuaweicloud.eu"),
            ("HW_MAX_RETRIES", "2"),
        ]);
        let config =
            ProviderConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.region, "ap-southeast-1");
        assert_eq!(config.access_key, "ak");
        assert_eq!(config.cloud, "myhuaweicloud.eu");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.project_id, None);
    }

    #[test]
    fn config_from_env_without_region() {
        let err = ProviderConfig::from_lookup(|_| None).unwrap_err();
        assert_eq!(err.to_string(), "Fail to load config: HW_REGION_NAME is not set");
    }

    #[test]
    fn file_values_win_over_env() {
        let config = from_value::<ProviderConfig>(json!({
            "region": "cn-north-4",
            "access_key": "file-ak",
            "secret_key": "file-sk",
        }))
        .unwrap();
        let config = config
            .fill_from(|key| match key {
                "HW_ACCESS_KEY" => Some("env-ak".to_owned()),
                "HW_PROJECT_ID" => Some("env-project".to_owned()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.access_key, "file-ak");
        assert_eq!(config.project_id.as_deref(), Some("env-project"));
    }

    #[test]
    fn missing_secret_key() {
        let config = from_value::<ProviderConfig>(json!({
            "region": "cn-north-4",
            "access_key": "ak",
        }))
        .unwrap();
        let err = config.fill_from(|_| None).unwrap_err();
        assert_eq!(err.to_string(), "Fail to load config: secret_key is missing");
    }

    #[test]
    fn invalid_max_retries() {
        let env = BTreeMap::from([
            ("HW_REGION_NAME", "cn-north-4"),
            ("HW_AUTH_TOKEN", "token"),
            ("HW_MAX_RETRIES", "many"),
        ]);
        let err =
            ProviderConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains("invalid HW_MAX_RETRIES many"));
    }
}
