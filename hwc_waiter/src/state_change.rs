use ::std::time::Duration;

use ::hwc_common::{
    anyhow::anyhow,
    error::{HwcError, Result},
    tokio::{
        self,
        time::{sleep, sleep_until, Instant},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::refresh::{Refreshed, StateRefresh};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Polls a [StateRefresh] until the state is one of `target`.
///
/// Each observed state is checked in this order:
/// `target` ends the wait successfully, `failure` ends it with an error,
/// `pending` keeps polling, and anything else is an unexpected state.
pub struct StateChangeConf<R> {
    refresh: R,
    pending: Vec<String>,
    target: Vec<String>,
    failure: Vec<String>,
    timeout: Duration,
    delay: Duration,
    pub(crate) poll_interval: Duration,
    continuous_target_occurrence: u32,
}

fn to_states<I, S>(states: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    states.into_iter().map(Into::into).collect()
}

impl<R: StateRefresh> StateChangeConf<R> {
    pub fn new(refresh: R) -> Self {
        Self {
            refresh,
            pending: Vec::new(),
            target: Vec::new(),
            failure: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            delay: Duration::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
            continuous_target_occurrence: 1,
        }
    }

    pub fn pending<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = to_states(states);
        self
    }

    pub fn target<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = to_states(states);
        self
    }

    /// States meaning the operation has failed on the remote side.
    pub fn failure<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure = to_states(states);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wait before the first poll.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Number of consecutive polls that must observe a target state.
    pub fn continuous_target_occurrence(mut self, occurrence: u32) -> Self {
        self.continuous_target_occurrence = occurrence.max(1);
        self
    }

    /// Poll until a target state is observed and return the object of that poll.
    ///
    /// Errors:
    /// - `IllegalArgument` if no target state is configured,
    /// - `TargetFailed` for a state in `failure`,
    /// - `UnexpectedState` for a state in none of the sets,
    ///   an empty `pending` accepts any state as pending,
    /// - `Timeout` when `timeout` elapses first, with the last observed state,
    /// - `Cancelled` when `cancel` is triggered,
    /// - any error of the refresh function, unchanged.
    pub async fn wait_for_state(&mut self, cancel: &CancellationToken) -> Result<R::Object> {
        if self.target.is_empty() {
            return Err(HwcError::illegal_argument(anyhow!(
                "no target state to wait for"
            )));
        }
        let deadline = Instant::now() + self.timeout;
        let mut last_state = None;
        let sets = Sets {
            pending: &self.pending,
            target: &self.target,
            failure: &self.failure,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HwcError::cancelled(anyhow!(
                "cancelled while waiting for state to become {}",
                self.target_description()
            ))),
            _ = sleep_until(deadline) => Err(HwcError::timeout(anyhow!(
                "timeout while waiting for state to become {} (last state: '{}', timeout: {:?})",
                self.target_description(),
                last_state.as_deref().unwrap_or(""),
                self.timeout
            ))),
            result = Self::poll(
                &mut self.refresh,
                &sets,
                self.delay,
                self.poll_interval,
                self.continuous_target_occurrence,
                &mut last_state,
            ) => result,
        }
    }

    fn target_description(&self) -> String {
        format!("'{}'", self.target.join(", "))
    }

    async fn poll(
        refresh: &mut R,
        sets: &Sets<'_>,
        delay: Duration,
        poll_interval: Duration,
        continuous_target_occurrence: u32,
        last_state: &mut Option<String>,
    ) -> Result<R::Object> {
        if !delay.is_zero() {
            debug!("Waiting {:?} before the first state check", delay);
            sleep(delay).await;
        }
        let mut polls = 0u32;
        let mut target_hits = 0u32;
        loop {
            let Refreshed { object, state } = refresh.refresh().await?;
            polls += 1;
            debug!(
                "Waiting for state to become {:?}, poll {}: '{}'",
                sets.target, polls, state
            );
            *last_state = Some(state.clone());

            if sets.target.contains(&state) {
                target_hits += 1;
                if target_hits >= continuous_target_occurrence {
                    info!("Reached state '{}' after {} polls", state, polls);
                    return Ok(object);
                }
            } else if sets.failure.contains(&state) {
                return Err(HwcError::target_failed(anyhow!(
                    "failed to reach target state {:?}, got '{}'",
                    sets.target,
                    state
                )));
            } else if sets.pending.is_empty() || sets.pending.contains(&state) {
                target_hits = 0;
            } else {
                return Err(HwcError::unexpected_state(anyhow!(
                    "unexpected state '{}', wanted target {:?}",
                    state,
                    sets.target
                )));
            }
            sleep(poll_interval).await;
        }
    }
}

struct Sets<'a> {
    pending: &'a [String],
    target: &'a [String],
    failure: &'a [String],
}
