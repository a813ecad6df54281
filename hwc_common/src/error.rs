use ::std::fmt::{Debug, Display};

use ::anyhow::anyhow;

use crate::api_error::ApiError;

pub type Result<T> = std::result::Result<T, HwcError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwcErrorType {
    NotFound,
    NotAllowed,
    IllegalArgument,
    Unauthorized,
    RequestFailed,
    DeserializeFailed,
    FailToSignRequest,
    FailToLoadConfig,
    UnexpectedState,
    TargetFailed,
    Timeout,
    Cancelled,
}

impl Display for HwcErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let description = match self {
            Self::NotFound => "Not found",
            Self::NotAllowed => "Not allowed",
            Self::IllegalArgument => "Illegal argument",
            Self::Unauthorized => "Unauthorized",
            Self::RequestFailed => "Request failed",
            Self::DeserializeFailed => "Deserialize failed",
            Self::FailToSignRequest => "Fail to sign request",
            Self::FailToLoadConfig => "Fail to load config",
            Self::UnexpectedState => "Unexpected state",
            Self::TargetFailed => "Target failed",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{}", description)
    }
}

/// Error of all the HuaweiCloud provider crates.
///
/// `error` keeps the detail, `error_type` is what callers match on.
/// `resource_id` is set when the remote resource exists although the operation failed.
pub struct HwcError {
    error_type: HwcErrorType,
    error: anyhow::Error,
    resource_id: Option<String>,
}

macro_rules! define_constructor {
    ($name: ident, $error_type: expr) => {
        pub fn $name<E>(error: E) -> Self
        where
            E: Into<anyhow::Error>,
        {
            Self::new($error_type, error.into())
        }
    };
}

impl HwcError {
    fn new(error_type: HwcErrorType, error: anyhow::Error) -> Self {
        Self {
            error_type,
            error,
            resource_id: None,
        }
    }

    define_constructor!(not_found, HwcErrorType::NotFound);
    define_constructor!(not_allowed, HwcErrorType::NotAllowed);
    define_constructor!(illegal_argument, HwcErrorType::IllegalArgument);
    define_constructor!(unauthorized, HwcErrorType::Unauthorized);
    define_constructor!(deserialize_failed, HwcErrorType::DeserializeFailed);
    define_constructor!(fail_to_sign_request, HwcErrorType::FailToSignRequest);
    define_constructor!(fail_to_load_config, HwcErrorType::FailToLoadConfig);
    define_constructor!(unexpected_state, HwcErrorType::UnexpectedState);
    define_constructor!(target_failed, HwcErrorType::TargetFailed);
    define_constructor!(timeout, HwcErrorType::Timeout);
    define_constructor!(cancelled, HwcErrorType::Cancelled);

    /// Non-ok response from the remote API.
    pub fn request_failed(error: ApiError) -> Self {
        Self::new(HwcErrorType::RequestFailed, error.into())
    }

    /// Transport level failure, no response was received.
    pub fn connection_failed<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::new(HwcErrorType::RequestFailed, error.into())
    }

    pub fn get_error_type(&self) -> HwcErrorType {
        self.error_type
    }

    /// The failed HTTP response behind this error, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        self.error.downcast_ref::<ApiError>()
    }

    pub fn is_not_found(&self) -> bool {
        self.error_type == HwcErrorType::NotFound
            || self.api_error().is_some_and(ApiError::is_not_found)
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    /// Prepend a context message while keeping the error type.
    pub fn context(self, message: impl Display + Send + Sync + 'static) -> Self {
        Self {
            error: self.error.context(message),
            ..self
        }
    }
}

impl Display for HwcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:#}", self.error_type, self.error)
    }
}

impl Debug for HwcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwcError")
            .field("error_type", &self.error_type)
            .field("error", &self.error)
            .field("resource_id", &self.resource_id)
            .finish()
    }
}

impl std::error::Error for HwcError {}

impl From<std::io::Error> for HwcError {
    fn from(value: std::io::Error) -> Self {
        Self::fail_to_load_config(value)
    }
}

impl From<serde_json::Error> for HwcError {
    fn from(value: serde_json::Error) -> Self {
        Self::deserialize_failed(value)
    }
}

/// Shortcut for the common "field is missing in the response" failure.
pub fn missing_field(field: &str, body: &serde_json::Value) -> HwcError {
    HwcError::deserialize_failed(anyhow!(
        "unable to find `{}` in the response: {}",
        field,
        body
    ))
}
