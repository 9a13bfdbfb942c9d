use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::RwLock;
use url::Url;

use crate::error::TransportError;
use crate::models::auth::{RefreshRequest, RefreshResponse, Tokens};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/";
const REFRESH_PATH: &str = "auth/refresh/";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartFile {
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Multipart body kept as data so it can be rebuilt for a replayed request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MultipartPayload {
    pub fields: Vec<(String, String)>,
    pub file: Option<MultipartFile>,
}

impl MultipartPayload {
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.file = Some(MultipartFile {
            field: field.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    fn to_form(&self) -> Result<Form, reqwest::Error> {
        let mut form = Form::new();
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }

        if let Some(file) = &self.file {
            let part = Part::bytes(file.bytes.clone())
                .file_name(file.file_name.clone())
                .mime_str(&file.mime_type)?;
            form = form.part(file.field.clone(), part);
        }

        Ok(form)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(MultipartPayload),
}

/// Outbound request relative to the API base URL.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    pub fn post_multipart(path: impl Into<String>, body: MultipartPayload) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Multipart(body),
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns the decoded response body.
    async fn send(&self, request: ApiRequest) -> Result<Value, TransportError>;
}

/// Access/refresh tokens shared by every clone of an `ApiClient`.
#[derive(Clone, Debug, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Tokens>>,
}

impl TokenStore {
    pub fn new(tokens: Tokens) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tokens)),
        }
    }

    pub async fn access(&self) -> Option<String> {
        self.inner.read().await.access.clone()
    }

    pub async fn refresh(&self) -> Option<String> {
        self.inner.read().await.refresh.clone()
    }

    pub async fn set_access(&self, access: String) {
        self.inner.write().await.access = Some(access);
    }

    pub async fn clear(&self) {
        *self.inner.write().await = Tokens::default();
    }

    pub async fn snapshot(&self) -> Tokens {
        self.inner.read().await.clone()
    }
}

/// HTTP client shared by every backend service: base URL, default headers,
/// bearer auth and one token refresh per request on `401`.
#[derive(Clone)]
pub struct ApiClient {
    base_url: Url,
    client: reqwest::Client,
    tokens: TokenStore,
}

impl ApiClient {
    pub fn new(base_url: &str, tokens: Tokens) -> Result<Self, TransportError> {
        let base_url = normalize_base_url(base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            "X-Requested-With",
            HeaderValue::from_static("XMLHttpRequest"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            base_url,
            client,
            tokens: TokenStore::new(tokens),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    async fn execute(&self, request: &ApiRequest) -> Result<reqwest::Response, TransportError> {
        let url = self.endpoint(&request.path)?;
        log::debug!("{:?} {}", request.method, url);

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(access) = self.tokens.access().await {
            builder = builder.bearer_auth(access);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Multipart(payload) => builder.multipart(payload.to_form()?),
        };

        Ok(builder.send().await?)
    }

    /// Exchanges the refresh token for a new access token. Any failure
    /// clears the stored tokens.
    async fn refresh_access_token(&self) -> Option<String> {
        let refresh = match self.tokens.refresh().await {
            Some(refresh) => refresh,
            None => {
                log::warn!("Got 401 without a refresh token, clearing session.");
                self.tokens.clear().await;
                return None;
            }
        };

        let result: Result<RefreshResponse, TransportError> = async {
            let response = self
                .client
                .post(self.endpoint(REFRESH_PATH)?)
                .json(&RefreshRequest { refresh: &refresh })
                .send()
                .await?;
            let body = decode_response(response).await?;
            Ok(serde_json::from_value(body)?)
        }
        .await;

        match result {
            Ok(refreshed) => {
                log::info!("Access token refreshed.");
                self.tokens.set_access(refreshed.access.clone()).await;
                Some(refreshed.access)
            }
            Err(e) => {
                log::warn!("Token refresh failed, clearing session: {}", e);
                self.tokens.clear().await;
                None
            }
        }
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn send(&self, request: ApiRequest) -> Result<Value, TransportError> {
        let mut response = self.execute(&request).await?;

        if response.status() == StatusCode::UNAUTHORIZED
            && self.refresh_access_token().await.is_some()
        {
            response = self.execute(&request).await?;
        }

        decode_response(response).await
    }
}

fn normalize_base_url(base_url: &str) -> Result<Url, TransportError> {
    let mut base_url = base_url.trim().to_string();
    if !base_url.ends_with('/') {
        base_url.push('/');
    }

    Ok(Url::parse(&base_url)?)
}

async fn decode_response(response: reqwest::Response) -> Result<Value, TransportError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    Ok(serde_json::from_str(&body)?)
}
