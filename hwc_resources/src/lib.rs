//! Resource handlers for HuaweiCloud services.
//!
//! Each handler drives one kind of remote resource through its lifecycle:
//! it sends the mutating request, waits for the control plane to settle with
//! [StateChangeConf], and reads the observed state back.

use ::std::time::Duration;

use ::hwc_common::{
    anyhow::anyhow,
    error::{HwcError, Result},
    path_search::{path_search, path_search_array},
    serde_json::Value,
};
use ::hwc_waiter::{StateChangeConf, StateRefresh};

pub mod gaussdb;
pub mod rocketmq;

/// Upper bounds of the lifecycle operations of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Timeouts {
    pub const fn new(create: Duration, update: Duration, delete: Duration) -> Self {
        Self {
            create,
            update,
            delete,
        }
    }
}

/// Initial delay and interval of one polling stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    pub delay: Duration,
    pub poll_interval: Duration,
}

impl WaitSettings {
    pub const fn new(delay: Duration, poll_interval: Duration) -> Self {
        Self {
            delay,
            poll_interval,
        }
    }

    pub const fn from_secs(delay: u64, poll_interval: u64) -> Self {
        Self::new(
            Duration::from_secs(delay),
            Duration::from_secs(poll_interval),
        )
    }

    pub(crate) fn state_change<R: StateRefresh>(&self, refresh: R) -> StateChangeConf<R> {
        StateChangeConf::new(refresh)
            .delay(self.delay)
            .poll_interval(self.poll_interval)
    }
}

/// Lifecycle of one kind of remote resource.
#[allow(async_fn_in_trait)]
pub trait Resource {
    /// Desired configuration, as written by the user.
    type Config;
    /// Observed state, as reported by the remote API.
    type State;

    /// Create the resource and wait until it is usable.
    /// If it fails after the resource came into existence, the error carries its id.
    async fn create(&self, config: &Self::Config) -> Result<Self::State>;

    /// `None` if the resource does not exist anymore.
    async fn read(&self, id: &str) -> Result<Option<Self::State>>;

    /// Apply the difference between `prior` and `planned`.
    async fn update(&self, id: &str, prior: &Self::Config, planned: &Self::Config)
        -> Result<Self::State>;

    /// Delete the resource and wait until it is gone.
    /// A resource which is already absent is not an error.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Map a 404 to `None`.
pub(crate) fn found(response: Result<Value>) -> Result<Option<Value>> {
    match response {
        Ok(body) => Ok(Some(body)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Error for a resource which vanished while it was being managed.
pub(crate) fn disappeared(kind: &str, id: &str) -> HwcError {
    HwcError::not_found(anyhow!("{} {} disappeared", kind, id)).with_resource_id(id)
}

/// Scalar at `expr` as a string, numbers and booleans included.
pub(crate) fn text(expr: &str, body: &Value) -> String {
    match path_search(expr, body) {
        Some(Value::String(s)) => s.clone(),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn strings(expr: &str, body: &Value) -> Vec<String> {
    path_search_array(expr, body)
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect()
}

/// `None` for an empty string.
pub(crate) fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

/// Reject the update if any of the flagged fields changed, naming all of them.
pub(crate) fn ensure_unchanged(kind: &str, changes: &[(&str, bool)]) -> Result<()> {
    let changed: Vec<_> = changes
        .iter()
        .filter(|(_, changed)| *changed)
        .map(|(field, _)| *field)
        .collect();
    if changed.is_empty() {
        return Ok(());
    }
    Err(HwcError::not_allowed(anyhow!(
        "updating {} of a {} is not supported",
        changed.join(", "),
        kind
    )))
}

/// Difference of a counter which can only grow.
pub(crate) fn growth(field: &str, prior: Option<i64>, planned: Option<i64>) -> Result<i64> {
    let diff = planned.unwrap_or(0) - prior.unwrap_or(0);
    if diff < 0 {
        return Err(HwcError::not_allowed(anyhow!(
            "{} can only be increased, from {} to {} is a decrease",
            field,
            prior.unwrap_or(0),
            planned.unwrap_or(0)
        )));
    }
    Ok(diff)
}
