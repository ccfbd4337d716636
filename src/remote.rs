use thiserror::Error;
use tracing::{debug, instrument};

use crate::model::{
    Command, CommandStatus, ConfigDocument, DeviceInfo, DumpResponse, SetConfigResponse,
    TelemetryAck,
};
use crate::telemetry::TelemetryMessage;
use crate::types::Uuid;
use crate::util::http::{Client, ClientError, Method, Url};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The hub replied 2xx but flagged the operation as failed.
    #[error("hub rejected request: {0}")]
    Rejected(String),

    #[error("invalid endpoint URL")]
    InvalidEndpoint,
}

/// Typed surface over the hub's per-device API.
///
/// Every resource lives under `{endpoint}/{uuid}` and is
/// authenticated with the device access key carried by the inner
/// [Client]. All calls are plain request/response; retry policy is
/// the caller's business.
#[derive(Debug, Clone)]
pub struct RemoteApi {
    client: Client,
    endpoint: Url,
    uuid: Uuid,
}

impl RemoteApi {
    pub fn new(client: Client, endpoint: Url, uuid: Uuid) -> Self {
        Self {
            client,
            endpoint,
            uuid,
        }
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    // Build `{endpoint}/{uuid}/{resource}`. An empty resource yields
    // the trailing-slash device info path.
    fn device_url(&self, resource: &str) -> Result<Url, RequestError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| RequestError::InvalidEndpoint)?
            .pop_if_empty()
            .push(self.uuid.as_str())
            .push(resource);
        Ok(url)
    }

    /// `GET /{uuid}/` — the device info document.
    #[instrument(level = "debug", skip_all, fields(uuid = %self.uuid))]
    pub async fn get_device_info(&self) -> Result<DeviceInfo, RequestError> {
        let url = self.device_url("")?;
        Ok(self.client.get(&url).await?)
    }

    /// `GET /{uuid}/config` — the full configuration document. A
    /// version of 0 means the device was never provisioned.
    #[instrument(level = "debug", skip_all, fields(uuid = %self.uuid))]
    pub async fn get_config(&self) -> Result<ConfigDocument, RequestError> {
        let url = self.device_url("config")?;
        Ok(self.client.get(&url).await?)
    }

    /// `POST /{uuid}/config` — push the working document. Returns
    /// the authoritative version the hub assigned.
    #[instrument(level = "debug", skip_all, fields(uuid = %self.uuid, version = doc.version))]
    pub async fn set_config(&self, doc: &ConfigDocument) -> Result<SetConfigResponse, RequestError> {
        let url = self.device_url("config")?;
        let res: SetConfigResponse = self.client.post(&url, doc).await?;
        if !res.success {
            return Err(RequestError::Rejected(
                res.error.unwrap_or_else(|| "no error given".to_owned()),
            ));
        }
        Ok(res)
    }

    /// `GET /{uuid}/command` — the single pending command, if any.
    /// The hub signals "no command" with an empty body.
    #[instrument(level = "debug", skip_all, fields(uuid = %self.uuid))]
    pub async fn get_command(&self) -> Result<Option<Command>, RequestError> {
        let url = self.device_url("command")?;
        Ok(self.client.get_optional(&url).await?)
    }

    /// `POST /{uuid}/command` — report command execution progress.
    #[instrument(level = "debug", skip_all, fields(uuid = %self.uuid, status = ?status))]
    pub async fn report_command_status(&self, status: CommandStatus) -> Result<(), RequestError> {
        let url = self.device_url("command")?;
        let body = serde_json::json!({ "status": status });
        // The response body carries nothing we act on
        self.client
            .request(Method::POST, &url, |req| Ok(req.json(&body)))
            .await
            .and_then(|res| match res.status() {
                status if status.is_success() => Ok(()),
                status => Err(ClientError::Response(status)),
            })?;
        Ok(())
    }

    /// `POST /{uuid}/telemetry` — flush the full snapshot, returning
    /// the server acknowledgement that drives drift detection.
    #[instrument(level = "debug", skip_all, fields(uuid = %self.uuid))]
    pub async fn send_telemetry(
        &self,
        message: &TelemetryMessage,
    ) -> Result<TelemetryAck, RequestError> {
        let url = self.device_url("telemetry")?;
        let ack: TelemetryAck = self.client.post(&url, message).await?;
        debug!(
            success = ack.success,
            config_version = ack.config_version,
            command_pending = ack.command_pending,
            "telemetry acknowledged"
        );
        Ok(ack)
    }

    /// `POST /{uuid}/dump` — upload a free-text diagnostic dump.
    #[instrument(level = "debug", skip_all, fields(uuid = %self.uuid))]
    pub async fn send_dump(&self, dump: String) -> Result<(), RequestError> {
        let url = self.device_url("dump")?;
        let res: DumpResponse = self.client.post_text(&url, dump).await?;
        if !res.success {
            return Err(RequestError::Rejected(
                res.error.unwrap_or_else(|| "no error given".to_owned()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn api(server: &Server) -> RemoteApi {
        RemoteApi::new(
            Client::default().with_access_key("test-key"),
            server.url().parse().unwrap(),
            Uuid::from("dev-1"),
        )
    }

    #[tokio::test]
    async fn get_config_hits_the_device_path() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/dev-1/config")
            .match_header("authorization", "test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"version": 3, "generalProperties": {"fwVersion": "2.7001"}}"#)
            .create_async()
            .await;

        let doc = api(&server).get_config().await.unwrap();

        assert_eq!(doc.version, 3);
        assert_eq!(
            doc.get("generalProperties"),
            Some(&json!({"fwVersion": "2.7001"}))
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unprovisioned_config_has_version_zero() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/dev-1/config")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let doc = api(&server).get_config().await.unwrap();
        assert_eq!(doc.version, 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn set_config_returns_acknowledged_version() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/dev-1/config")
            .match_body(Matcher::PartialJson(json!({ "version": 6 })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "version": 6}"#)
            .create_async()
            .await;

        let mut doc = ConfigDocument::default();
        doc.version = 6;
        let res = api(&server).set_config(&doc).await.unwrap();

        assert_eq!(res.version, 6);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn set_config_failure_flag_is_an_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/dev-1/config")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": false, "error": "stale version"}"#)
            .create_async()
            .await;

        let res = api(&server).set_config(&ConfigDocument::default()).await;

        assert!(matches!(res, Err(RequestError::Rejected(msg)) if msg == "stale version"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_command_body_means_no_command() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/dev-1/command")
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        let cmd = api(&server).get_command().await.unwrap();
        assert!(cmd.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn command_report_posts_wire_status() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/dev-1/command")
            .match_body(Matcher::Json(json!({ "status": "in_progress" })))
            .with_status(200)
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;

        api(&server)
            .report_command_status(CommandStatus::InProgress)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn telemetry_flush_parses_server_signals() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/dev-1/telemetry")
            .match_body(Matcher::PartialJson(
                json!({ "common": { "status": "online" } }),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "config_version": 9, "command": true}"#)
            .create_async()
            .await;

        let mut message = TelemetryMessage::new("online", "0.1.0");
        message.custom.insert("temperature".into(), json!(21));
        let ack = api(&server).send_telemetry(&message).await.unwrap();

        assert!(ack.success);
        assert_eq!(ack.config_version, 9);
        assert!(ack.command_pending);
        assert_eq!(ack.info_version, 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn dump_is_posted_as_plain_text() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/dev-1/dump")
            .match_header("content-type", "text/plain")
            .match_body("cpu load: 3%")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;

        api(&server)
            .send_dump("cpu load: 3%".to_owned())
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
