use ::std::time::Duration;

use ::hwc_client::service_client::{RequestOpts, ServiceClient};
use ::hwc_common::{
    anyhow::anyhow,
    error::{HwcError, Result},
    path_search::{path_search_str, path_search_string},
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::debug,
};
use ::hwc_waiter::Refreshed;
use ::reqwest::Method;

use crate::WaitSettings;

const JOB_URL: &str = "v3/{project_id}/jobs?id={job_id}";

pub const PENDING: [&str; 2] = ["Pending", "Running"];
pub const COMPLETED: &str = "Completed";
pub const FAILED: &str = "Failed";

/// `job_id` of the response to an asynchronous request.
pub fn job_id(body: &Value) -> Result<String> {
    path_search_string("job_id", body)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            HwcError::deserialize_failed(anyhow!("job_id is not found in API response"))
        })
}

async fn job_status(client: &ServiceClient, job_id: &str) -> Result<Refreshed<Value>> {
    let url = client.build_url(JOB_URL, &[("job_id", job_id)])?;
    let body = client
        .request(Method::GET, &url, &RequestOpts::new())
        .await?;
    let status = path_search_str("job.status", &body, "").to_owned();
    debug!("Job {} is {}", job_id, status);
    Ok(Refreshed::new(body, status))
}

/// Wait until the job is `Completed`, `Failed` is an error.
pub async fn wait_for_job(
    client: &ServiceClient,
    job_id: &str,
    settings: WaitSettings,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Value> {
    settings
        .state_change(move || job_status(client, job_id))
        .pending(PENDING)
        .target([COMPLETED])
        .failure([FAILED])
        .timeout(timeout)
        .wait_for_state(cancel)
        .await
        .map_err(|e| e.context(format!("error waiting for job {} to be completed", job_id)))
}

#[cfg(test)]
mod tests {
    use ::hwc_common::{error::HwcErrorType, serde_json::json};

    use super::*;

    #[test]
    fn job_id_from_body() {
        assert_eq!(job_id(&json!({"job_id": "j-1"})).unwrap(), "j-1");

        for body in [json!({}), json!({"job_id": ""}), json!({"job_id": 1})] {
            let err = job_id(&body).unwrap_err();
            assert_eq!(err.get_error_type(), HwcErrorType::DeserializeFailed);
        }
    }
}
