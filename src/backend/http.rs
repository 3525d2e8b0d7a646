//! Live Vault client over the HTTP API (reqwest, rustls).
use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{BackendError, MountInput, VaultBackend};

#[derive(Clone, Debug)]
pub struct HttpBackendOptions {
    pub address: String,
    pub token: String,
    pub namespace: Option<String>,
    pub timeout: Duration,
    pub insecure_skip_tls: bool,
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    address: String,
    token: String,
    namespace: Option<String>,
}

impl HttpBackend {
    pub fn connect(opts: HttpBackendOptions) -> Result<Self, BackendError> {
        let mut builder = Client::builder().timeout(opts.timeout);
        if opts.insecure_skip_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| BackendError::Request(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            address: opts.address.trim_end_matches('/').to_string(),
            token: opts.token,
            namespace: opts.namespace.filter(|ns| !ns.is_empty()),
        })
    }

    /// Underlying reqwest client, shared with the attack loop.
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, BackendError> {
        let url = format!("{}/v1/{}", self.address, path.trim_start_matches('/'));
        debug!(%method, %url, "vault request");
        let mut builder = self
            .client
            .request(method, url)
            .header("X-Vault-Token", &self.token);
        if let Some(ns) = &self.namespace {
            builder = builder.header("X-Vault-Namespace", ns);
        }
        if let Some(payload) = body {
            builder = builder.json(payload);
        }
        builder
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    // Vault reports failures as {"errors": [...]}; fall back to the raw body.
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        _ => body,
    };
    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait::async_trait]
impl VaultBackend for HttpBackend {
    fn address(&self) -> &str {
        &self.address
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    async fn mount(&self, path: &str, input: &MountInput) -> Result<(), BackendError> {
        let body =
            serde_json::to_value(input).map_err(|e| BackendError::Decode(e.to_string()))?;
        let path = format!("sys/mounts/{}", path.trim_matches('/'));
        check(self.request(Method::POST, &path, Some(&body)).await?).await?;
        Ok(())
    }

    async fn write(&self, path: &str, body: Value) -> Result<(), BackendError> {
        check(self.request(Method::POST, path, Some(&body)).await?).await?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Value>, BackendError> {
        let response = self.request(Method::GET, path, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response).await?;
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(Some(body))
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        check(self.request(Method::DELETE, path, None).await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_normalizes_address_and_namespace() {
        let backend = HttpBackend::connect(HttpBackendOptions {
            address: "http://127.0.0.1:8200/".into(),
            token: "root".into(),
            namespace: Some(String::new()),
            timeout: Duration::from_secs(5),
            insecure_skip_tls: false,
        })
        .expect("client");
        assert_eq!(backend.address(), "http://127.0.0.1:8200");
        assert_eq!(backend.token(), "root");
        assert_eq!(backend.namespace(), None);
    }
}
