pub mod service_client;
pub mod signer;

use ::hwc_common::{anyhow::anyhow, config::ProviderConfig, error::HwcError};

#[derive(Clone)]
pub enum Credentials {
    /// Permanent or temporary access key.
    AkSk {
        access_key: String,
        secret_key: String,
        security_token: Option<String>,
    },
    /// IAM token, sent as `X-Auth-Token`.
    Token { token: String },
}

impl Credentials {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, HwcError> {
        if let Some(token) = &config.auth_token {
            return Ok(Self::Token {
                token: token.clone(),
            });
        }
        if config.access_key.is_empty() || config.secret_key.is_empty() {
            return Err(HwcError::unauthorized(anyhow!(
                "access_key and secret_key must both be set"
            )));
        }
        Ok(Self::AkSk {
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            security_token: config.security_token.clone(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // keep secrets out of logs
        match self {
            Self::AkSk { access_key, .. } => write!(f, "AkSk({})", access_key),
            Self::Token { .. } => write!(f, "Token"),
        }
    }
}
