use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use common::{LocationStatus, StatusSnapshot};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::daemon::control::UriRequest;

/// Client of a running daemon's control API.
pub struct ControlClient {
    base: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
pub struct StatusReply {
    pub status: StatusSnapshot,
    pub summary: String,
}

impl ControlClient {
    pub fn new(addr: SocketAddr) -> Result<Self> {
        // A manual mount waits for the mount itself, which may take a while.
        let http = Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build HTTP client")?;
        Ok(ControlClient {
            base: format!("http://{addr}"),
            http,
        })
    }

    pub async fn status(&self) -> Result<StatusReply> {
        self.get("/status").await
    }

    pub async fn locations(&self) -> Result<Vec<LocationStatus>> {
        self.get("/locations").await
    }

    pub async fn check(&self) -> Result<String> {
        self.post("/check", None).await
    }

    pub async fn mount_all(&self) -> Result<String> {
        self.post("/mount-all", None).await
    }

    pub async fn unmount_all(&self) -> Result<String> {
        self.post("/unmount-all", None).await
    }

    pub async fn mount(&self, uri: &str) -> Result<String> {
        self.post("/mount", Some(uri)).await
    }

    pub async fn unmount(&self, uri: &str) -> Result<String> {
        self.post("/unmount", Some(uri)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .with_context(|| format!("failed to reach automount daemon at {}", self.base))?;
        let resp = check(resp).await?;
        resp.json()
            .await
            .with_context(|| format!("invalid reply from {path}"))
    }

    async fn post(&self, path: &str, uri: Option<&str>) -> Result<String> {
        let mut req = self.http.post(format!("{}{path}", self.base));
        if let Some(uri) = uri {
            req = req.json(&UriRequest {
                uri: uri.to_string(),
            });
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("failed to reach automount daemon at {}", self.base))?;
        let body: Value = check(resp)
            .await?
            .json()
            .await
            .with_context(|| format!("invalid reply from {path}"))?;
        Ok(message(&body))
    }
}

fn message(body: &Value) -> String {
    body["msg"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    bail!("daemon replied {status}: {}", message(&body))
}
