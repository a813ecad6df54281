//! Non-ok HTTP responses of the HuaweiCloud APIs.

use ::std::fmt::Display;

use ::serde::Deserialize;

/// A response whose status code is not in the expected ok codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub method: String,
    pub url: String,
    /// Raw response body, usually the vendor error envelope.
    pub body: String,
}

/// Vendor error envelope, e.g. `{"error_code": "DMS.00400026", "error_msg": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VendorError {
    #[serde(alias = "code", alias = "errorCode")]
    pub error_code: String,
    #[serde(default, alias = "message", alias = "error_message", alias = "errorMessage")]
    pub error_msg: String,
}

/// Some services nest the envelope under `error`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Flat(VendorError),
    Nested { error: VendorError },
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Parse the body as a vendor error envelope.
    /// Returns `None` when the body is not JSON or has no error code.
    pub fn vendor_error(&self) -> Option<VendorError> {
        match ::serde_json::from_str::<Envelope>(&self.body).ok()? {
            Envelope::Flat(e) | Envelope::Nested { error: e } => Some(e),
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Unexpected HTTP response code when accessing [{} {}], got {}",
            self.method, self.url, self.status
        )?;
        if !self.body.is_empty() {
            write!(f, "\n{}", self.body)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}
