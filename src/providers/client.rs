use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::rate_limit::{RateLimiter, RetryPolicy};
use crate::config::ClientConfig;
use crate::error::{ReconcileError, ReconcileResult};

/// Largest page both trackers serve. A larger request is silently capped by
/// the server, which would make every page look like the last one.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> ReconcileResult<Self> {
        let value = serde_json::to_value(body).map_err(|e| ReconcileError::Decode(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    #[cfg(test)]
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Host the request goes to; rate limits are tracked per host.
    pub fn endpoint(&self) -> String {
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.url.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json<T: DeserializeOwned>(&self) -> ReconcileResult<T> {
        serde_json::from_str(&self.body).map_err(|e| ReconcileError::Decode(e.to_string()))
    }
}

/// Sends a single request. Transport-level failures come back as
/// [`ReconcileError::RemoteUnavailable`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> ReconcileResult<ApiResponse>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> ReconcileResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tracker-reconcile/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReconcileError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &ApiRequest) -> ReconcileResult<ApiResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Patch => self.client.patch(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ReconcileError::RemoteUnavailable(format!("{} {}: {e}", request.method.as_str(), request.url)))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = resp
            .text()
            .await
            .map_err(|e| ReconcileError::RemoteUnavailable(format!("reading body from {}: {e}", request.url)))?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// How a collection signals its last page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStrategy {
    /// A page shorter than the page size is the last one.
    SizeBoundary,
    /// The `Link` header stops carrying `rel="next"` on the last page.
    NextLink,
}

#[derive(Debug, Clone)]
pub struct PagedQuery {
    pub path: String,
    pub params: Vec<(String, String)>,
    pub strategy: PageStrategy,
}

impl PagedQuery {
    pub fn new(path: impl Into<String>, strategy: PageStrategy) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
            strategy,
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Authenticated client for one tracker API, with retries, rate limiting and
/// pagination.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    token: String,
    accept: &'static str,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    page_size: u32,
    page_delay: Duration,
    clock: Clock,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, base_url: &str, token: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            accept: "application/json",
            limiter: Arc::new(RateLimiter::new()),
            policy: RetryPolicy::default(),
            page_size: 100,
            page_delay: Duration::ZERO,
            clock: Arc::new(|| chrono::Utc::now().timestamp()),
        }
    }

    pub fn with_config(mut self, config: &ClientConfig) -> Self {
        self.policy = RetryPolicy::from_config(config);
        if config.page_size > MAX_PAGE_SIZE {
            warn!(
                configured = config.page_size,
                max = MAX_PAGE_SIZE,
                "Page size above the server maximum, using the maximum"
            );
        }
        self.page_size = config.page_size.clamp(1, MAX_PAGE_SIZE);
        self.page_delay = Duration::from_millis(config.page_delay_ms);
        self
    }

    #[cfg(test)]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_accept(mut self, accept: &'static str) -> Self {
        self.accept = accept;
        self
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn send(&self, request: ApiRequest) -> ReconcileResult<ApiResponse> {
        let request = request
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", self.accept);
        let endpoint = request.endpoint();
        let slot = self.limiter.endpoint(&endpoint);
        let mut attempt = 1;

        loop {
            let outcome = {
                let mut state = slot.lock().await;
                if let Some(wait) = state.exhausted_wait((self.clock)()) {
                    if !self.policy.wait_on_exhaustion {
                        return Err(ReconcileError::RemoteExhausted {
                            endpoint,
                            wait_secs: wait.as_secs(),
                        });
                    }
                    let wait = wait + self.policy.margin;
                    warn!(endpoint = %endpoint, wait_secs = wait.as_secs(), "Rate limit budget spent; waiting for reset");
                    tokio::time::sleep(wait).await;
                    state.remaining = None;
                }

                debug!(method = request.method.as_str(), url = %request.url, attempt, "Sending request");
                let result = self.transport.execute(&request).await;
                if let Ok(resp) = &result {
                    state.update(&resp.headers, (self.clock)());
                }
                result.and_then(|resp| classify(&endpoint, resp))
            };

            match outcome {
                Ok(resp) => return Ok(resp),
                Err(ReconcileError::RateLimited(_)) => {
                    let state = *slot.lock().await;
                    let wait = self.policy.rate_limited_wait(&state, (self.clock)());
                    if !self.policy.wait_on_exhaustion {
                        return Err(ReconcileError::RemoteExhausted {
                            endpoint,
                            wait_secs: wait.as_secs(),
                        });
                    }
                    warn!(endpoint = %endpoint, wait_secs = wait.as_secs(), "Rate limited; retrying after wait");
                    tokio::time::sleep(wait).await;
                    slot.lock().await.remaining = None;
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(url = %request.url, attempt, error = %e, "Transient failure; backing off {}ms", delay.as_millis());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ReconcileResult<T> {
        self.send(ApiRequest::get(self.url(path))).await?.json()
    }

    pub async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ReconcileResult<T> {
        let request = ApiRequest::new(Method::Post, self.url(path)).json(body)?;
        self.send(request).await?.json()
    }

    pub async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> ReconcileResult<ApiResponse> {
        let request = ApiRequest::new(Method::Post, self.url(path)).json(body)?;
        self.send(request).await
    }

    pub async fn patch_json<B: Serialize + Sync>(&self, path: &str, body: &B) -> ReconcileResult<ApiResponse> {
        let request = ApiRequest::new(Method::Patch, self.url(path)).json(body)?;
        self.send(request).await
    }

    /// Lazily walk every page of a collection, yielding records in order.
    pub fn paginate<'a, T>(&'a self, query: PagedQuery) -> impl Stream<Item = ReconcileResult<T>> + Send + 'a
    where
        T: DeserializeOwned + Send + 'a,
    {
        let query = Arc::new(query);
        stream::try_unfold(Some(1u32), move |page| {
            let query = Arc::clone(&query);
            async move {
                match page {
                    Some(page) => self.fetch_page::<T>(&query, page).await,
                    None => Ok(None),
                }
            }
        })
        .map_ok(|records| stream::iter(records.into_iter().map(Ok::<T, ReconcileError>)))
        .try_flatten()
    }

    pub async fn collect_all<T>(&self, query: PagedQuery) -> ReconcileResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let path = query.path.clone();
        let records: Vec<T> = self.paginate(query).try_collect().await?;
        debug!(path = %path, count = records.len(), "Collected records");
        Ok(records)
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        query: &PagedQuery,
        page: u32,
    ) -> ReconcileResult<Option<(Vec<T>, Option<u32>)>> {
        if page > 1 && !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }

        let mut request = ApiRequest::get(self.url(&query.path));
        for (key, value) in &query.params {
            request = request.query(key, value);
        }
        let request = request
            .query("page", page)
            .query("per_page", self.page_size);

        let resp = self.send(request).await?;
        let records: Vec<T> = resp.json()?;
        debug!(path = %query.path, page, count = records.len(), "Fetched page");

        if records.is_empty() {
            return Ok(None);
        }
        let more = match query.strategy {
            PageStrategy::SizeBoundary => records.len() >= self.page_size as usize,
            PageStrategy::NextLink => resp.header("link").is_some_and(has_next_link),
        };
        Ok(Some((records, more.then_some(page + 1))))
    }
}

fn classify(endpoint: &str, resp: ApiResponse) -> ReconcileResult<ApiResponse> {
    match resp.status {
        200..=299 => Ok(resp),
        429 => Err(ReconcileError::RateLimited(endpoint.to_string())),
        403 if resp.body.to_ascii_lowercase().contains("rate limit") => {
            Err(ReconcileError::RateLimited(endpoint.to_string()))
        }
        500..=599 => Err(ReconcileError::RemoteUnavailable(format!(
            "{endpoint} returned {}: {}",
            resp.status,
            truncate(&resp.body, 200)
        ))),
        status => Err(ReconcileError::RemoteRejected {
            status,
            body: truncate(&resp.body, 500),
        }),
    }
}

pub fn has_next_link(link: &str) -> bool {
    link.split(',').any(|part| {
        part.split(';')
            .skip(1)
            .any(|param| param.trim().replace(' ', "") == "rel=\"next\"")
    })
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
