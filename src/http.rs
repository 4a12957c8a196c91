use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::remote::{
    ChangeRecord, EntryKind, RemoteEntry, RemoteError, RemoteFolder, RemoteResult, RemoteStore,
};

/// JSON-over-HTTP implementation of [`RemoteStore`]
///
/// Every request carries basic-auth credentials. HTTP statuses are folded into
/// the [`RemoteError`] vocabulary: 404 is `NotFound`, 409 is `Collision`, and
/// everything else (including transport failures) is `Transient`.
pub struct HttpRemote {
    client: Client,
    base: String,
    username: String,
    password: String,
}

#[derive(Serialize)]
struct CreateEntryBody<'a> {
    parent_id: Option<&'a str>,
    path: &'a str,
    kind: EntryKind,
}

impl HttpRemote {
    /// Create a client from the server section of the configuration
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base: config.server.endpoint.trim_end_matches('/').to_string(),
            username: config.server.username.clone(),
            password: config.server.password.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, builder: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(response),
            status => Err(map_status(status)),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> RemoteResult<T> {
        debug!("GET {}", path);
        let response = self.send(self.client.get(self.url(path))).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Transient(format!("Malformed response body: {}", e)))
    }
}

/// Fold an HTTP status into the remote error vocabulary
fn map_status(status: StatusCode) -> RemoteError {
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        StatusCode::CONFLICT => RemoteError::Collision,
        other => RemoteError::Transient(format!("Unexpected HTTP status: {}", other)),
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn get_folders(&self) -> RemoteResult<Vec<RemoteFolder>> {
        self.get_json("folders").await
    }

    async fn get_folder(&self, folder_id: &str) -> RemoteResult<RemoteFolder> {
        self.get_json(&format!("folders/{}", folder_id)).await
    }

    async fn get_folder_as_entry(&self, folder_id: &str) -> RemoteResult<RemoteEntry> {
        self.get_json(&format!("folders/{}/root", folder_id)).await
    }

    async fn get_entries(&self, folder_id: &str) -> RemoteResult<Vec<RemoteEntry>> {
        self.get_json(&format!("folders/{}/entries", folder_id))
            .await
    }

    async fn get_entry(&self, folder_id: &str, entry_id: &str) -> RemoteResult<RemoteEntry> {
        self.get_json(&format!("folders/{}/entries/{}", folder_id, entry_id))
            .await
    }

    async fn get_latest_change(
        &self,
        folder_id: &str,
        entry_id: &str,
    ) -> RemoteResult<Option<ChangeRecord>> {
        let changes: Vec<ChangeRecord> = self
            .get_json(&format!(
                "folders/{}/entries/{}/changes?max=1",
                folder_id, entry_id
            ))
            .await?;
        Ok(changes.into_iter().next())
    }

    async fn create_entry(
        &self,
        folder_id: &str,
        parent_id: &str,
        path: &str,
        kind: EntryKind,
    ) -> RemoteResult<RemoteEntry> {
        debug!("POST folders/{}/entries ({})", folder_id, path);
        let body = CreateEntryBody {
            parent_id: Some(parent_id),
            path,
            kind,
        };
        let response = self
            .send(
                self.client
                    .post(self.url(&format!("folders/{}/entries", folder_id)))
                    .json(&body),
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Transient(format!("Malformed response body: {}", e)))
    }

    async fn delete_entry(&self, folder_id: &str, entry_id: &str) -> RemoteResult<()> {
        debug!("DELETE folders/{}/entries/{}", folder_id, entry_id);
        self.send(
            self.client
                .delete(self.url(&format!("folders/{}/entries/{}", folder_id, entry_id))),
        )
        .await?;
        Ok(())
    }

    async fn read_file(&self, folder_id: &str, entry_id: &str) -> RemoteResult<Vec<u8>> {
        debug!("GET folders/{}/entries/{}/content", folder_id, entry_id);
        let response = self
            .send(self.client.get(self.url(&format!(
                "folders/{}/entries/{}/content",
                folder_id, entry_id
            ))))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Transient(format!("Truncated response body: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn write_file(
        &self,
        folder_id: &str,
        entry_id: &str,
        content: &[u8],
    ) -> RemoteResult<()> {
        debug!(
            "PUT folders/{}/entries/{}/content ({} bytes)",
            folder_id,
            entry_id,
            content.len()
        );
        self.send(
            self.client
                .put(self.url(&format!(
                    "folders/{}/entries/{}/content",
                    folder_id, entry_id
                )))
                .body(content.to_vec()),
        )
        .await?;
        Ok(())
    }
}
