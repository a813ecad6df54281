#![allow(dead_code)]

use ::std::time::Duration;

use ::httpmock::{Mock, MockServer};
use ::hwc_client::{service_client::ServiceClient, Credentials};
use ::hwc_common::tokio;
use ::hwc_resources::{Timeouts, WaitSettings};

pub const PROJECT_ID: &str = "0123";
pub const REGION: &str = "cn-north-4";

/// Poll right away, again and again.
pub const NO_WAIT: WaitSettings = WaitSettings::new(Duration::ZERO, Duration::from_millis(10));

pub const SHORT_TIMEOUTS: Timeouts = Timeouts::new(
    Duration::from_secs(5),
    Duration::from_secs(5),
    Duration::from_secs(5),
);

/// Client signing with dummy AK/SK against the mock server, without throttling retries.
pub fn client(server: &MockServer) -> ServiceClient {
    let credentials = Credentials::AkSk {
        access_key: "ak".to_owned(),
        secret_key: "sk".to_owned(),
        security_token: None,
    };
    ServiceClient::with_endpoint(&server.base_url(), Some(PROJECT_ID), credentials).max_retries(0)
}

/// Block until `mock` has served `hits` requests.
pub async fn served(mock: &Mock<'_>, hits: usize) {
    while mock.hits_async().await < hits {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
