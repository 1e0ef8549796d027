//! Minimal Block Storage v3 client: create and delete volumes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

const AUTH_HEADER: &str = "X-Auth-Token";

#[derive(Debug, thiserror::Error)]
pub enum CinderError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cinder returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("config: {0}")]
    Config(String),
}

impl From<CinderError> for fuxi_core::Error {
    fn from(e: CinderError) -> Self { fuxi_core::Error::backend(e.to_string()) }
}

/// Request body of a volume create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateVolume {
    /// GiB.
    pub size: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Volume {
    pub id: String,
    pub size: u64,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Serialize)]
struct CreateEnvelope<'a> {
    volume: &'a CreateVolume,
}

#[derive(Deserialize)]
struct VolumeEnvelope {
    volume: Volume,
}

/// Block storage operations the Cinder plugin needs.
#[async_trait]
pub trait BlockStorage: Send + Sync {
    async fn create_volume(&self, request: &CreateVolume) -> Result<Volume, CinderError>;
    /// Deleting an unknown volume succeeds.
    async fn delete_volume(&self, id: &str) -> Result<(), CinderError>;
}

/// Talks to a project-scoped volume endpoint (`.../v3/{project_id}`) with a
/// pre-issued token.
#[derive(Debug, Clone)]
pub struct CinderClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl CinderClient {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, CinderError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(CinderError::Config("empty volume endpoint".into()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoint, token: token.into() })
    }

    pub fn endpoint(&self) -> &str { &self.endpoint }

    async fn error_for(response: reqwest::Response) -> CinderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        CinderError::Status { status, body }
    }
}

#[async_trait]
impl BlockStorage for CinderClient {
    async fn create_volume(&self, request: &CreateVolume) -> Result<Volume, CinderError> {
        let response = self
            .http
            .post(format!("{}/volumes", self.endpoint))
            .header(AUTH_HEADER, &self.token)
            .json(&CreateEnvelope { volume: request })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        let created: VolumeEnvelope = response.json().await?;
        debug!(volume = %created.volume.id, size = created.volume.size, "cinder volume created");
        Ok(created.volume)
    }

    async fn delete_volume(&self, id: &str) -> Result<(), CinderError> {
        let response = self
            .http
            .delete(format!("{}/volumes/{id}", self.endpoint))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(volume = %id, "cinder volume already gone");
                Ok(())
            }
            _ => Err(Self::error_for(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CinderClient {
        CinderClient::new(format!("{}/v3/proj", server.uri()), "tok", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn create_posts_volume_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/proj/volumes"))
            .and(header("X-Auth-Token", "tok"))
            .and(body_json(serde_json::json!({
                "volume": { "size": 5, "name": "pvc-u1", "volume_type": "ssd" }
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
                "volume": { "id": "vol-1", "size": 5, "status": "creating" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let req = CreateVolume { size: 5, name: "pvc-u1".into(), volume_type: Some("ssd".into()), availability_zone: None };
        let vol = client(&server).create_volume(&req).await.unwrap();
        assert_eq!(vol.id, "vol-1");
        assert_eq!(vol.size, 5);
    }

    #[tokio::test]
    async fn create_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(413).set_body_string("VolumeSizeExceedsAvailableQuota"))
            .mount(&server)
            .await;

        let req = CreateVolume { size: 500, name: "pvc-u2".into(), volume_type: None, availability_zone: None };
        let err = client(&server).create_volume(&req).await.unwrap_err();
        assert!(matches!(&err, CinderError::Status { status: 413, body } if body.contains("Quota")));
        assert!(matches!(fuxi_core::Error::from(err), fuxi_core::Error::Backend(_)));
    }

    #[tokio::test]
    async fn delete_treats_not_found_as_done() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v3/proj/volumes/vol-gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v3/proj/volumes/vol-busy"))
            .respond_with(ResponseTemplate::new(400).set_body_string("volume is attached"))
            .mount(&server)
            .await;

        let c = client(&server);
        assert!(c.delete_volume("vol-gone").await.is_ok());
        assert!(matches!(c.delete_volume("vol-busy").await, Err(CinderError::Status { status: 400, .. })));
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        assert!(matches!(CinderClient::new("/", "t", Duration::from_secs(1)), Err(CinderError::Config(_))));
    }
}
