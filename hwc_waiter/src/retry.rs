use ::std::{future::Future, time::Duration};

use ::hwc_common::{
    anyhow::anyhow,
    api_error::ApiError,
    error::{HwcError, Result},
    tokio::{
        self,
        time::{sleep, sleep_until, Instant},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::{refresh::StateRefresh, state_change::StateChangeConf};

/// Vendor error codes meaning "another operation is in progress on this resource".
///
/// Only codes confirmed against the vendor error catalog belong here,
/// any other code is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCode {
    /// DMS instance is being modified by another request.
    DmsInstanceBusy,
    /// CBC order of the resource is still being processed.
    CbcOrderBusy,
}

impl ConflictCode {
    pub const ALL: [Self; 2] = [Self::DmsInstanceBusy, Self::CbcOrderBusy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DmsInstanceBusy => "DMS.00400026",
            Self::CbcOrderBusy => "CBC.99003651",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }
}

/// Decide whether a failed mutating request should be retried.
///
/// Only a 400 response whose error envelope carries a [ConflictCode] is retryable.
/// The error is returned unchanged either way.
pub fn handle_multi_operations_error(err: HwcError) -> (bool, HwcError) {
    let retry = err
        .api_error()
        .filter(|e| e.status == 400)
        .and_then(ApiError::vendor_error)
        .and_then(|e| ConflictCode::from_code(&e.error_code))
        .is_some();
    (retry, err)
}

/// Issue a mutating request once the resource is idle, again and again while it conflicts
/// with another operation.
///
/// Before every attempt `wait` polls the resource until it reaches its target state.
/// The whole loop, waits included, is bounded by `timeout`.
pub struct RetryWithWaitForState<W> {
    wait: StateChangeConf<W>,
    timeout: Duration,
}

impl<W: StateRefresh> RetryWithWaitForState<W> {
    pub fn new(wait: StateChangeConf<W>, timeout: Duration) -> Self {
        Self {
            wait: wait.timeout(timeout),
            timeout,
        }
    }

    pub async fn run<T, F, Fut>(mut self, retry_fn: F, cancel: &CancellationToken) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut last_conflict = None;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HwcError::cancelled(anyhow!(
                "cancelled while retrying the request"
            ))),
            _ = sleep_until(deadline) => Err(HwcError::timeout(anyhow!(
                "timeout after {:?} while the resource is busy, last error: {}",
                self.timeout,
                last_conflict.unwrap_or_else(|| "none".to_owned())
            ))),
            result = Self::attempts(&mut self.wait, retry_fn, cancel, &mut last_conflict) => result,
        }
    }

    async fn attempts<T, F, Fut>(
        wait: &mut StateChangeConf<W>,
        mut retry_fn: F,
        cancel: &CancellationToken,
        last_conflict: &mut Option<String>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            wait.wait_for_state(cancel).await?;
            attempt += 1;
            debug!("Attempt {} of the request", attempt);
            let err = match retry_fn().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let (retry, err) = handle_multi_operations_error(err);
            if !retry {
                return Err(err);
            }
            warn!("Attempt {} conflicts with another operation: {}", attempt, err);
            *last_conflict = Some(err.to_string());
            sleep(wait.poll_interval).await;
        }
    }
}
