use std::time::Duration;

use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub type Method = reqwest::Method;
pub type StatusCode = reqwest::StatusCode;
pub type Url = reqwest::Url;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server replied with status: {0}")]
    Response(StatusCode),

    #[error(transparent)]
    Client(reqwest::Error),

    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Server(reqwest::Error),
}

#[derive(Debug)]
pub struct Response(reqwest::Response);

impl Response {
    pub fn status(&self) -> StatusCode {
        self.0.status()
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        self.0.json().await.map_err(ClientError::Server)
    }

    pub async fn text(self) -> Result<String, ClientError> {
        self.0.text().await.map_err(ClientError::Server)
    }
}

/// Thin wrapper around [reqwest::Client] carrying the device access
/// key and a bounded per-request timeout.
///
/// The access key is sent verbatim as the `Authorization` header on
/// every request, which is the header format the hub expects.
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    timeout: Duration,
    access_key: Option<String>,
}

impl Default for Client {
    /// Default client with a timeout of 15 seconds.
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

impl Client {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            access_key: None,
        }
    }

    pub fn with_access_key(self, access_key: impl Into<String>) -> Self {
        Self {
            access_key: Some(access_key.into()),
            ..self
        }
    }

    pub async fn get<Res>(&self, url: &Url) -> Result<Res, ClientError>
    where
        Res: DeserializeOwned,
    {
        wrap_status_error(self.request(Method::GET, url, Ok).await?)?
            .json()
            .await
    }

    /// GET where the server signals "nothing here" with an empty
    /// body rather than a 404.
    pub async fn get_optional<Res>(&self, url: &Url) -> Result<Option<Res>, ClientError>
    where
        Res: DeserializeOwned,
    {
        let body = wrap_status_error(self.request(Method::GET, url, Ok).await?)?
            .text()
            .await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    pub async fn post<Payload, Res>(&self, url: &Url, payload: &Payload) -> Result<Res, ClientError>
    where
        Payload: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        wrap_status_error(
            self.request(Method::POST, url, |req| Ok(req.json(payload)))
                .await?,
        )?
        .json()
        .await
    }

    /// POST a plain-text payload, decoding a JSON response.
    pub async fn post_text<Res>(&self, url: &Url, payload: String) -> Result<Res, ClientError>
    where
        Res: DeserializeOwned,
    {
        wrap_status_error(
            self.request(Method::POST, url, |req| {
                Ok(req.header("Content-Type", "text/plain").body(payload))
            })
            .await?,
        )?
        .json()
        .await
    }

    /// Thin wrapper around [reqwest::Request], this is your gateway to
    /// a fully customizable client if this type's methods won't do.
    pub async fn request<D>(
        &self,
        method: Method,
        url: &Url,
        decorator: D,
    ) -> Result<Response, ClientError>
    where
        D: FnOnce(RequestBuilder) -> Result<RequestBuilder, ClientError>,
    {
        let mut request = self
            .client
            .request(method, url.clone())
            .timeout(self.timeout);

        if let Some(key) = &self.access_key {
            request = request.header("Authorization", key);
        }

        request = decorator(request)?;

        Ok(Response(request.send().await.map_err(ClientError::Client)?))
    }
}

fn wrap_status_error(res: Response) -> Result<Response, ClientError> {
    match res.status() {
        status if status.is_success() => Ok(res),
        status => Err(ClientError::Response(status)),
    }
}
