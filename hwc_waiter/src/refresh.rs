use ::std::future::Future;

use ::hwc_common::{error::Result, path_search::path_search_str, serde_json::Value};

/// Logical state of a resource that no longer exists.
pub const DELETED: &str = "DELETED";

/// Result of one status check.
#[derive(Debug, Clone, PartialEq)]
pub struct Refreshed<T> {
    /// Raw object returned by the remote API.
    pub object: T,
    pub state: String,
}

impl<T> Refreshed<T> {
    pub fn new(object: T, state: impl Into<String>) -> Self {
        Self {
            object,
            state: state.into(),
        }
    }
}

/// One status check against the remote API.
#[allow(async_fn_in_trait)]
pub trait StateRefresh {
    type Object;

    async fn refresh(&mut self) -> Result<Refreshed<Self::Object>>;
}

impl<F, Fut, T> StateRefresh for F
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Refreshed<T>>>,
{
    type Object = T;

    async fn refresh(&mut self) -> Result<Refreshed<T>> {
        self().await
    }
}

/// Classify a response by the status found at `status_path`.
/// A 404 becomes [DELETED] with a null object, other errors are returned as they are.
pub fn refreshed_or_deleted(response: Result<Value>, status_path: &str) -> Result<Refreshed<Value>> {
    match response {
        Ok(body) => {
            let state = path_search_str(status_path, &body, "").to_owned();
            Ok(Refreshed::new(body, state))
        }
        Err(e) if e.is_not_found() => Ok(Refreshed::new(Value::Null, DELETED)),
        Err(e) => Err(e),
    }
}
