//! `CtfdGateway` over the CTFd REST API (v1)

use std::time::Duration;

use async_trait::async_trait;
use ctfd_state::{
    ChallengeFields, CtfdGateway, FileUpload, FlagFields, GatewayResult, HintFields,
    RemoteChallenge, RemoteFile, RemoteFlag, RemoteHint, RemoteId, RemoteTag, RemoteTopic,
};
use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::wire::{self, Envelope, WireChallenge, WireFile, WireFlag, WireHint, WireValueRow};

/// CTFd gateway backed by a pooled `reqwest::Client`.
///
/// Cheap to share across concurrent passes; it holds no per-pass state.
pub struct HttpGateway {
    config: ClientConfig,
    http: reqwest::Client,
}

/// Body of a create response when only the new id matters.
#[derive(Debug, Deserialize)]
struct WireCreated {
    id: u64,
}

impl HttpGateway {
    /// Create a gateway for the configured instance
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::Setup(e.to_string()))?;

        Ok(HttpGateway { config, http })
    }

    /// Create gateway from environment variables
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.config.base_url(), path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        if let Some(key) = &self.config.api_key {
            return req.header(AUTHORIZATION, format!("Token {key}"));
        }
        match (&self.config.session, &self.config.nonce) {
            (Some(session), Some(nonce)) => req
                .header(COOKIE, format!("session={session}"))
                .header("CSRF-Token", nonce),
            (Some(session), None) => req.header(COOKIE, format!("session={session}")),
            _ => req,
        }
    }

    /// Send a request and turn HTTP-level failures into errors.
    async fn send(
        &self,
        operation: &str,
        entity: &'static str,
        target: &str,
        req: RequestBuilder,
    ) -> Result<Response, ClientError> {
        debug!(operation, target, "ctfd request");
        let response = self.authorize(req).send().await?;
        let status = response.status();
        debug!(operation, target, status = status.as_u16(), "ctfd response");

        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound {
                entity,
                id: target.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Envelope<Value>>(&body)
                .map(|e| e.failure_message())
                .unwrap_or(body);
            return Err(ClientError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn envelope<T: DeserializeOwned>(
        &self,
        operation: &str,
        entity: &'static str,
        target: &str,
        req: RequestBuilder,
    ) -> Result<Option<T>, ClientError> {
        let response = self.send(operation, entity, target, req).await?;
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        let envelope: Envelope<T> =
            serde_json::from_slice(&body).map_err(|e| ClientError::Decode {
                operation: operation.to_string(),
                detail: e.to_string(),
            })?;
        if !envelope.success {
            return Err(ClientError::Api {
                operation: operation.to_string(),
                message: envelope.failure_message(),
            });
        }
        Ok(envelope.data)
    }

    /// Call an endpoint whose envelope must carry `data`.
    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        entity: &'static str,
        target: &str,
        req: RequestBuilder,
    ) -> Result<T, ClientError> {
        self.envelope(operation, entity, target, req)
            .await?
            .ok_or_else(|| ClientError::Decode {
                operation: operation.to_string(),
                detail: "response has no data".to_string(),
            })
    }

    /// Call an endpoint whose only output is success.
    async fn call_unit(
        &self,
        operation: &str,
        entity: &'static str,
        target: &str,
        req: RequestBuilder,
    ) -> Result<(), ClientError> {
        self.envelope::<Value>(operation, entity, target, req)
            .await
            .map(|_| ())
    }

    async fn read_requirements(
        &self,
        id: &RemoteId,
    ) -> Result<Option<ctfd_state::Requirements>, ClientError> {
        let url = self.api(&format!("/challenges/{id}/requirements"));
        let reqs: Option<wire::WireRequirements> = self
            .envelope("get challenge requirements", "challenge", id.as_str(), self.http.get(url))
            .await?;
        Ok(reqs.and_then(|r| r.into_requirements()))
    }
}

#[async_trait]
impl CtfdGateway for HttpGateway {
    async fn create_challenge(&self, fields: &ChallengeFields) -> GatewayResult<RemoteChallenge> {
        let body = wire::challenge_body(fields)?;
        let req = self.http.post(self.api("/challenges")).json(&body);
        let created: WireChallenge = self
            .call("create challenge", "challenge", &fields.name, req)
            .await?;
        Ok(created.into_remote(fields.requirements.clone()))
    }

    async fn get_challenge(&self, id: &RemoteId) -> GatewayResult<RemoteChallenge> {
        let req = self.http.get(self.api(&format!("/challenges/{id}")));
        let wire: WireChallenge = self
            .call("get challenge", "challenge", id.as_str(), req)
            .await?;
        let requirements = self.read_requirements(id).await?;
        Ok(wire.into_remote(requirements))
    }

    async fn update_challenge(
        &self,
        id: &RemoteId,
        fields: &ChallengeFields,
    ) -> GatewayResult<RemoteChallenge> {
        let body = wire::challenge_body(fields)?;
        let req = self
            .http
            .patch(self.api(&format!("/challenges/{id}")))
            .json(&body);
        let updated: WireChallenge = self
            .call("update challenge", "challenge", id.as_str(), req)
            .await?;
        Ok(updated.into_remote(fields.requirements.clone()))
    }

    async fn delete_challenge(&self, id: &RemoteId) -> GatewayResult<()> {
        let req = self.http.delete(self.api(&format!("/challenges/{id}")));
        Ok(self
            .call_unit("delete challenge", "challenge", id.as_str(), req)
            .await?)
    }

    async fn list_flags(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteFlag>> {
        let req = self
            .http
            .get(self.api(&format!("/challenges/{challenge}/flags")));
        let rows: Vec<WireFlag> = self
            .call("list flags", "challenge", challenge.as_str(), req)
            .await?;
        Ok(rows.into_iter().map(RemoteFlag::from).collect())
    }

    async fn create_flag(
        &self,
        challenge: &RemoteId,
        fields: &FlagFields,
    ) -> GatewayResult<RemoteFlag> {
        let body = wire::flag_body(Some(wire::numeric_id(challenge)?), fields)?;
        let req = self.http.post(self.api("/flags")).json(&body);
        let row: WireFlag = self
            .call("create flag", "challenge", challenge.as_str(), req)
            .await?;
        Ok(row.into())
    }

    async fn update_flag(&self, id: &RemoteId, fields: &FlagFields) -> GatewayResult<RemoteFlag> {
        let body = wire::flag_body(None, fields)?;
        let req = self
            .http
            .patch(self.api(&format!("/flags/{id}")))
            .json(&body);
        let row: WireFlag = self.call("update flag", "flag", id.as_str(), req).await?;
        Ok(row.into())
    }

    async fn delete_flag(&self, id: &RemoteId) -> GatewayResult<()> {
        let req = self.http.delete(self.api(&format!("/flags/{id}")));
        Ok(self.call_unit("delete flag", "flag", id.as_str(), req).await?)
    }

    async fn list_hints(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteHint>> {
        let req = self
            .http
            .get(self.api(&format!("/challenges/{challenge}/hints")));
        let rows: Vec<WireHint> = self
            .call("list hints", "challenge", challenge.as_str(), req)
            .await?;
        Ok(rows.into_iter().map(RemoteHint::from).collect())
    }

    async fn create_hint(
        &self,
        challenge: &RemoteId,
        fields: &HintFields,
    ) -> GatewayResult<RemoteHint> {
        let body = wire::hint_body(Some(wire::numeric_id(challenge)?), fields)?;
        let req = self.http.post(self.api("/hints")).json(&body);
        let row: WireHint = self
            .call("create hint", "challenge", challenge.as_str(), req)
            .await?;
        Ok(row.into())
    }

    async fn update_hint(&self, id: &RemoteId, fields: &HintFields) -> GatewayResult<RemoteHint> {
        let body = wire::hint_body(None, fields)?;
        let req = self
            .http
            .patch(self.api(&format!("/hints/{id}")))
            .json(&body);
        let row: WireHint = self.call("update hint", "hint", id.as_str(), req).await?;
        Ok(row.into())
    }

    async fn delete_hint(&self, id: &RemoteId) -> GatewayResult<()> {
        let req = self.http.delete(self.api(&format!("/hints/{id}")));
        Ok(self.call_unit("delete hint", "hint", id.as_str(), req).await?)
    }

    async fn list_files(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteFile>> {
        let req = self
            .http
            .get(self.api(&format!("/challenges/{challenge}/files")));
        let rows: Vec<WireFile> = self
            .call("list files", "challenge", challenge.as_str(), req)
            .await?;
        Ok(rows.into_iter().map(RemoteFile::from).collect())
    }

    async fn create_file(
        &self,
        challenge: &RemoteId,
        upload: &FileUpload,
    ) -> GatewayResult<RemoteFile> {
        let form = Form::new()
            .text("challenge", wire::numeric_id(challenge)?.to_string())
            .text("type", "challenge")
            .part(
                "file",
                Part::bytes(upload.content.clone()).file_name(upload.name.clone()),
            );
        let req = self.http.post(self.api("/files")).multipart(form);
        let rows: Vec<WireFile> = self
            .call("upload file", "challenge", challenge.as_str(), req)
            .await?;
        let row = rows.into_iter().next().ok_or_else(|| ClientError::Decode {
            operation: "upload file".to_string(),
            detail: "no file in response".to_string(),
        })?;
        Ok(row.into())
    }

    async fn fetch_file_content(&self, file: &RemoteFile) -> GatewayResult<Vec<u8>> {
        let url = format!("{}/files/{}", self.config.base_url(), file.location);
        let response = self
            .send("fetch file", "file", &file.location, self.http.get(url))
            .await?;
        let bytes = response.bytes().await.map_err(ClientError::from)?;
        Ok(bytes.to_vec())
    }

    async fn delete_file(&self, id: &RemoteId) -> GatewayResult<()> {
        let req = self.http.delete(self.api(&format!("/files/{id}")));
        Ok(self.call_unit("delete file", "file", id.as_str(), req).await?)
    }

    async fn list_tags(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteTag>> {
        let req = self
            .http
            .get(self.api(&format!("/challenges/{challenge}/tags")));
        let rows: Vec<WireValueRow> = self
            .call("list tags", "challenge", challenge.as_str(), req)
            .await?;
        Ok(rows.into_iter().map(RemoteTag::from).collect())
    }

    async fn create_tag(&self, challenge: &RemoteId, value: &str) -> GatewayResult<RemoteTag> {
        let body = json!({
            "challenge": wire::numeric_id(challenge)?,
            "value": value,
        });
        let req = self.http.post(self.api("/tags")).json(&body);
        let row: WireValueRow = self
            .call("create tag", "challenge", challenge.as_str(), req)
            .await?;
        Ok(row.into())
    }

    async fn delete_tag(&self, id: &RemoteId) -> GatewayResult<()> {
        let req = self.http.delete(self.api(&format!("/tags/{id}")));
        Ok(self.call_unit("delete tag", "tag", id.as_str(), req).await?)
    }

    async fn list_topics(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteTopic>> {
        let req = self
            .http
            .get(self.api(&format!("/challenges/{challenge}/topics")));
        let rows: Vec<WireValueRow> = self
            .call("list topics", "challenge", challenge.as_str(), req)
            .await?;
        Ok(rows.into_iter().map(RemoteTopic::from).collect())
    }

    async fn create_topic(
        &self,
        challenge: &RemoteId,
        value: &str,
    ) -> GatewayResult<RemoteTopic> {
        let body = json!({
            "challenge": wire::numeric_id(challenge)?,
            "type": "challenge",
            "value": value,
        });
        let req = self.http.post(self.api("/topics")).json(&body);
        // The response describes the challenge-topic association, not the topic.
        let created: WireCreated = self
            .call("create topic", "challenge", challenge.as_str(), req)
            .await?;
        Ok(RemoteTopic {
            id: RemoteId::from(created.id),
            value: value.to_string(),
        })
    }

    async fn delete_topic(&self, id: &RemoteId) -> GatewayResult<()> {
        let req = self
            .http
            .delete(self.api("/topics"))
            .query(&[("type", "challenge"), ("target_id", id.as_str())]);
        Ok(self.call_unit("delete topic", "topic", id.as_str(), req).await?)
    }
}
