use std::time::Duration;

use http::{
    HeaderMap, Request, Response, Uri, Version,
    header::HOST,
    uri::{Authority, PathAndQuery, Scheme},
};
use hyper::{Body, Client, client::HttpConnector};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};

use crate::{error::PipelineError, tls::upstream_client_config};

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

pub fn upstream_client() -> HttpClient {
    let https = HttpsConnectorBuilder::new()
        .with_tls_config(upstream_client_config())
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder().build(https)
}

/// Absolute URL of the upstream resource for an inbound request.
///
/// Absolute-form targets are kept; origin-form targets take their authority
/// from `Host`. A missing scheme is `https` on port 443 and `http` otherwise.
pub fn normalize_target(uri: &Uri, headers: &HeaderMap) -> Result<Uri, PipelineError> {
    let authority = match uri.authority() {
        Some(authority) => authority.clone(),
        None => headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| PipelineError::InvalidTarget("missing host".to_string()))?
            .parse::<Authority>()
            .map_err(|err| PipelineError::InvalidTarget(err.to_string()))?,
    };

    let scheme = match uri.scheme() {
        Some(scheme) => scheme.clone(),
        None if authority.port_u16() == Some(443) => Scheme::HTTPS,
        None => Scheme::HTTP,
    };

    let path_and_query = uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|err| PipelineError::InvalidTarget(err.to_string()))
}

/// Sends one upstream request mirroring `req`. Headers are copied verbatim,
/// including repeated ones. No retry.
pub async fn fetch(
    client: &HttpClient,
    req: Request<Body>,
    target: Uri,
    timeout: Option<Duration>,
) -> Result<Response<Body>, PipelineError> {
    let (parts, body) = req.into_parts();
    let mut upstream = Request::builder()
        .method(parts.method)
        .uri(target)
        .version(Version::HTTP_11)
        .body(body)
        .map_err(|err| PipelineError::InvalidTarget(err.to_string()))?;
    *upstream.headers_mut() = parts.headers;

    let pending = client.request(upstream);
    let response = match timeout {
        Some(limit) => tokio::time::timeout(limit, pending)
            .await
            .map_err(|_| PipelineError::Timeout(limit.as_secs()))??,
        None => pending.await?,
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn host(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn absolute_targets_are_kept() {
        let uri: Uri = "https://example.com:8443/a?b=c".parse().unwrap();
        let target = normalize_target(&uri, &HeaderMap::new()).unwrap();
        assert_eq!(target.to_string(), "https://example.com:8443/a?b=c");
    }

    #[test]
    fn scheme_is_inferred_from_port() {
        let uri: Uri = "/page".parse().unwrap();
        let plain = normalize_target(&uri, &host("example.com")).unwrap();
        assert_eq!(plain.to_string(), "http://example.com/page");

        let tls = normalize_target(&uri, &host("example.com:443")).unwrap();
        assert_eq!(tls.scheme(), Some(&Scheme::HTTPS));
        assert_eq!(tls.authority().map(|a| a.as_str()), Some("example.com:443"));
    }

    #[test]
    fn origin_form_without_host_is_rejected() {
        let uri: Uri = "/page".parse().unwrap();
        let err = normalize_target(&uri, &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_fetch_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let target: Uri = format!("http://{addr}/").parse().unwrap();
        let err = fetch(&upstream_client(), req, target, Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(_)));
    }
}
