use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use wxcore::net::{HttpClient, HttpRequest, HttpResponse};

/// HTTP client implementation using `ureq` for synchronous HTTP requests.
/// Since `ureq` is blocking, all requests are wrapped in `tokio::task::spawn_blocking`.
#[derive(Debug, Clone, Default)]
pub struct UreqHttpClient {
    default_timeout: Option<Duration>,
}

impl UreqHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline applied to requests that do not set their own.
    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl HttpClient for UreqHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let timeout = request.timeout.or(self.default_timeout);

        // Since ureq is blocking, we must use spawn_blocking
        tokio::task::spawn_blocking(move || {
            let response = match request.method.as_str() {
                "GET" => {
                    let mut req = ureq::get(&request.url)
                        .config()
                        .http_status_as_error(false)
                        .timeout_global(timeout)
                        .build();
                    for (key, value) in &request.headers {
                        req = req.header(key, value);
                    }
                    req.call()?
                }
                "POST" => {
                    let mut req = ureq::post(&request.url)
                        .config()
                        .http_status_as_error(false)
                        .timeout_global(timeout)
                        .build();
                    for (key, value) in &request.headers {
                        req = req.header(key, value);
                    }
                    match request.body {
                        Some(body) => req.send(&body[..])?,
                        None => req.send(&[])?,
                    }
                }
                method => {
                    return Err(anyhow::anyhow!("Unsupported HTTP method: {}", method));
                }
            };

            let status_code = response.status().as_u16();

            // Set-Cookie may repeat, so headers are kept as pairs.
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();

            let mut body = response.into_body();
            let body_bytes = body.read_to_vec()?;

            Ok(HttpResponse {
                status_code,
                headers,
                body: body_bytes,
            })
        })
        .await?
    }
}
