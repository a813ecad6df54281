use ::std::time::Duration;

use ::hwc_common::{
    anyhow::anyhow,
    api_error::ApiError,
    config::{ProviderConfig, DEFAULT_MAX_RETRIES},
    error::{HwcError, Result},
    serde_json::{self, Value},
    tokio,
    tracing::{debug, warn},
};
use ::reqwest::{Method, StatusCode};
use ::time::OffsetDateTime;
use ::urlencoding::encode;

use crate::{signer::Signer, Credentials};

/// Options of a single request.
#[derive(Debug, Default, Clone)]
pub struct RequestOpts {
    json_body: Option<Value>,
    /// Empty means any 2xx.
    ok_codes: Vec<u16>,
    headers: Vec<(String, String)>,
}

impl RequestOpts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Null members are dropped before sending.
    pub fn json_body(mut self, body: Value) -> Self {
        self.json_body = Some(remove_nil(body));
        self
    }

    pub fn ok_codes(mut self, codes: &[u16]) -> Self {
        self.ok_codes = codes.to_vec();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    fn is_ok(&self, status: StatusCode) -> bool {
        if self.ok_codes.is_empty() {
            status.is_success()
        } else {
            self.ok_codes.contains(&status.as_u16())
        }
    }
}

/// Client of one HuaweiCloud service in one region.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    /// Always ends with `/`.
    endpoint: String,
    project_id: Option<String>,
    credentials: Credentials,
    max_retries: u32,
    client: reqwest::Client,
}

impl ServiceClient {
    /// Create a client for `service`, e.g. `dmsv2` or `gaussdb`.
    pub fn new(config: &ProviderConfig, service: &str) -> Result<Self> {
        let endpoint = match config.endpoints.get(service) {
            Some(endpoint) => normalize_endpoint(endpoint),
            None => format!("https://{}.{}.{}/", service, config.region, config.cloud),
        };
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(HwcError::fail_to_load_config)?;
        debug!("Endpoint of {} in {}: {}", service, config.region, endpoint);
        Ok(Self {
            endpoint,
            project_id: config.project_id.clone(),
            credentials: Credentials::from_config(config)?,
            max_retries: config.max_retries,
            client,
        })
    }

    pub fn with_endpoint(endpoint: &str, project_id: Option<&str>, credentials: Credentials) -> Self {
        Self {
            endpoint: normalize_endpoint(endpoint),
            project_id: project_id.map(str::to_owned),
            credentials,
            max_retries: DEFAULT_MAX_RETRIES,
            client: reqwest::Client::new(),
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Build a full URL from a path template like `v2/{project_id}/instances/{instance_id}`.
    /// `{project_id}` comes from the client unless given in `params`.
    pub fn build_url(&self, template: &str, params: &[(&str, &str)]) -> Result<String> {
        let mut url = self.endpoint.clone();
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            url.push_str(&rest[..start]);
            let end = rest[start..].find('}').ok_or_else(|| {
                HwcError::illegal_argument(anyhow!("unclosed placeholder in {}", template))
            })? + start;
            let name = &rest[start + 1..end];
            let value = params
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| *v)
                .or_else(|| (name == "project_id").then(|| self.project_id()).flatten())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    HwcError::illegal_argument(anyhow!(
                        "no value for {{{}}} in {}",
                        name,
                        template
                    ))
                })?;
            url.push_str(&encode(value));
            rest = &rest[end + 1..];
        }
        url.push_str(rest);
        Ok(url)
    }

    /// Send a request and return the response body as JSON, `Value::Null` if it is empty.
    pub async fn request(&self, method: Method, url: &str, opts: &RequestOpts) -> Result<Value> {
        let mut retries = 0;
        loop {
            let request = self.build_request(method.clone(), url, opts)?;
            debug!("Send request {} {}", method, url);
            let response = self
                .client
                .execute(request)
                .await
                .map_err(HwcError::connection_failed)?;
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && retries < self.max_retries {
                let wait = throttle_backoff(retries);
                warn!(
                    "Request {} {} is throttled, retry {} of {} in {:?}",
                    method,
                    url,
                    retries + 1,
                    self.max_retries,
                    wait
                );
                tokio::time::sleep(wait).await;
                retries += 1;
                continue;
            }

            let body = response.text().await.map_err(HwcError::connection_failed)?;
            debug!("Response of {} {}: {}", method, url, status);
            if !opts.is_ok(status) {
                return Err(HwcError::request_failed(ApiError {
                    status: status.as_u16(),
                    method: method.to_string(),
                    url: url.to_owned(),
                    body,
                }));
            }
            return parse_body(&body);
        }
    }

    fn build_request(&self, method: Method, url: &str, opts: &RequestOpts) -> Result<reqwest::Request> {
        let mut builder = self.client.request(method, url);
        if let Some(body) = &opts.json_body {
            builder = builder.json(body);
        }
        for (name, value) in &opts.headers {
            builder = builder.header(name, value);
        }
        if let Some(project_id) = &self.project_id {
            builder = builder.header("X-Project-Id", project_id);
        }
        builder = match &self.credentials {
            Credentials::AkSk {
                security_token: Some(token),
                ..
            } => builder.header("X-Security-Token", token),
            Credentials::Token { token } => builder.header("X-Auth-Token", token),
            Credentials::AkSk { .. } => builder,
        };
        let mut request = builder.build().map_err(HwcError::illegal_argument)?;
        if let Credentials::AkSk {
            access_key,
            secret_key,
            ..
        } = &self.credentials
        {
            Signer::new(access_key, secret_key).sign(&mut request, OffsetDateTime::now_utc())?;
        }
        Ok(request)
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.ends_with('/') {
        endpoint.to_owned()
    } else {
        format!("{}/", endpoint)
    }
}

fn parse_body(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(HwcError::deserialize_failed)
}

/// Wait before retrying a throttled request: 2^retries minutes, at most 30 minutes.
pub fn throttle_backoff(retries: u32) -> Duration {
    let minutes = 2u64.saturating_pow(retries).min(30);
    Duration::from_secs(minutes * 60)
}

/// Drop null members of objects, recursively.
pub fn remove_nil(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, remove_nil(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(remove_nil).collect()),
        other => other,
    }
}
