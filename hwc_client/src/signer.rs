//! AK/SK request signing (`SDK-HMAC-SHA256`).

use ::hmac::{Hmac, Mac};
use ::hwc_common::{
    anyhow::anyhow,
    error::{HwcError, Result},
};
use ::reqwest::{
    header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, HOST},
    Request,
};
use ::sha2::{Digest, Sha256};
use ::time::{macros::format_description, OffsetDateTime};
use ::urlencoding::{decode, encode};

pub const ALGORITHM: &str = "SDK-HMAC-SHA256";
pub const HEADER_SDK_DATE: &str = "x-sdk-date";

pub struct Signer<'a> {
    access_key: &'a str,
    secret_key: &'a str,
}

impl<'a> Signer<'a> {
    pub fn new(access_key: &'a str, secret_key: &'a str) -> Self {
        Self {
            access_key,
            secret_key,
        }
    }

    /// Add `Host`, `X-Sdk-Date` and `Authorization` to the request.
    /// All other headers must already be set, they are part of the signature.
    pub fn sign(&self, request: &mut Request, now: OffsetDateTime) -> Result<()> {
        let date = now
            .format(format_description!(
                "[year][month][day]T[hour][minute][second]Z"
            ))
            .map_err(HwcError::fail_to_sign_request)?;
        let host = host_of(request)?;
        let headers = request.headers_mut();
        headers.insert(HOST, to_header_value(&host)?);
        headers.insert(
            HeaderName::from_static(HEADER_SDK_DATE),
            to_header_value(&date)?,
        );

        let (canonical, signed_headers) = canonical_request(request)?;
        let string_to_sign = format!(
            "{}\n{}\n{}",
            ALGORITHM,
            date,
            hex::encode(Sha256::digest(canonical.as_bytes()))
        );
        let signature = self.signature(&string_to_sign)?;
        let authorization = format!(
            "{} Access={}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.access_key, signed_headers, signature
        );
        request
            .headers_mut()
            .insert(AUTHORIZATION, to_header_value(&authorization)?);
        Ok(())
    }

    fn signature(&self, string_to_sign: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| HwcError::fail_to_sign_request(anyhow!("invalid secret key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

fn to_header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(HwcError::fail_to_sign_request)
}

fn host_of(request: &Request) -> Result<String> {
    let url = request.url();
    let host = url
        .host_str()
        .ok_or_else(|| HwcError::fail_to_sign_request(anyhow!("no host in url {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_owned(),
    })
}

/// Returns the canonical request and the signed header list.
fn canonical_request(request: &Request) -> Result<(String, String)> {
    let url = request.url();

    let mut uri = String::new();
    for segment in url.path().split('/').filter(|s| !s.is_empty()) {
        let segment = decode(segment).map_err(HwcError::fail_to_sign_request)?;
        uri.push('/');
        uri.push_str(&encode(&segment));
    }
    uri.push('/');

    let mut query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (encode(&k).into_owned(), encode(&v).into_owned()))
        .collect();
    query.sort();
    let query = query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut headers = Vec::new();
    for (name, value) in request.headers() {
        if *name == CONTENT_TYPE {
            continue;
        }
        let value = value.to_str().map_err(HwcError::fail_to_sign_request)?;
        headers.push((name.as_str().to_owned(), value.trim().to_owned()));
    }
    headers.sort();
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let body = request
        .body()
        .and_then(|b| b.as_bytes())
        .unwrap_or_default();

    let canonical = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method().as_str(),
        uri,
        query,
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(body))
    );
    Ok((canonical, signed_headers))
}
