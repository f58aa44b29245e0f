//! Transport to the remote store.

use std::time::Duration;

use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;

use super::error::{SyncError, SyncResult};
use super::protocol::{
    CreateNoteRequest, DeletedNotesFeed, ServerNote, SyncRequest, SyncResponse, TrashListResponse,
    TrashedNote, UpdateNoteRequest,
};
use crate::config::SyncSettings;
use crate::util::{is_http_url, normalize_text_option};

/// Operations the sync engine needs from the remote store.
///
/// Every call carries the session's bearer token.
#[allow(async_fn_in_trait)]
pub trait SyncTransport {
    /// Push local changes and pull remote ones (`POST /notes/sync`)
    async fn sync(&self, token: &str, request: &SyncRequest) -> SyncResult<SyncResponse>;

    /// Create or upsert a note by client-chosen id (`POST /notes`)
    async fn create_note(&self, token: &str, request: &CreateNoteRequest)
        -> SyncResult<ServerNote>;

    /// Partially update a note (`PUT /notes/{id}`)
    async fn update_note(
        &self,
        token: &str,
        id: &str,
        request: &UpdateNoteRequest,
    ) -> SyncResult<ServerNote>;

    /// Move a note to the remote trash (`DELETE /notes/{id}`)
    async fn delete_note(&self, token: &str, id: &str) -> SyncResult<()>;

    /// Restore a note from the remote trash (`POST /notes/trash/{id}/restore`)
    async fn restore_note(&self, token: &str, id: &str) -> SyncResult<()>;

    /// Permanently delete a note (`DELETE /notes/trash/{id}`)
    async fn purge_note(&self, token: &str, id: &str) -> SyncResult<()>;

    /// List the remote trash (`GET /notes/trash/all`)
    async fn list_trash(&self, token: &str) -> SyncResult<Vec<TrashedNote>>;

    /// Notes permanently deleted since the cursor (`GET /notes/trash/sync`)
    async fn deleted_since(&self, token: &str, since: Option<&str>)
        -> SyncResult<DeletedNotesFeed>;

    /// Read one note (`GET /notes/{id}`)
    async fn get_note(&self, token: &str, id: &str) -> SyncResult<ServerNote>;
}

/// [`SyncTransport`] over HTTPS.
#[derive(Clone)]
pub struct HttpSyncClient {
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpSyncClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let base_url = normalize_text_option(Some(base_url.into()))
            .ok_or_else(|| SyncError::NotConfigured("API URL must not be empty".to_string()))?;
        if !is_http_url(&base_url) {
            return Err(SyncError::NotConfigured(
                "API URL must include http:// or https://".to_string(),
            ));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Build a client from settings; local-only settings are rejected.
    pub fn from_settings(settings: &SyncSettings) -> SyncResult<Self> {
        let base_url = settings.api_base_url.clone().ok_or_else(|| {
            SyncError::NotConfigured("NOTESYNC_API_URL is not set".to_string())
        })?;
        Self::new(base_url, settings.http_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        token: &str,
    ) -> SyncResult<T> {
        let response = Self::send(request, token).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|error| SyncError::InvalidPayload(error.to_string()))
    }

    async fn send_ack(&self, request: RequestBuilder, token: &str) -> SyncResult<()> {
        Self::send(request, token).await.map(drop)
    }

    async fn send(request: RequestBuilder, token: &str) -> SyncResult<reqwest::Response> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SyncError::Unauthorized(
                "missing bearer token".to_string(),
            ));
        }

        let response = request
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SyncError::from_response(status, &body))
        }
    }
}

impl SyncTransport for HttpSyncClient {
    async fn sync(&self, token: &str, request: &SyncRequest) -> SyncResult<SyncResponse> {
        let builder = self.client.post(self.url("/notes/sync")).json(request);
        self.send_json(builder, token).await
    }

    async fn create_note(
        &self,
        token: &str,
        request: &CreateNoteRequest,
    ) -> SyncResult<ServerNote> {
        let builder = self.client.post(self.url("/notes")).json(request);
        self.send_json(builder, token).await
    }

    async fn update_note(
        &self,
        token: &str,
        id: &str,
        request: &UpdateNoteRequest,
    ) -> SyncResult<ServerNote> {
        let builder = self
            .client
            .put(self.url(&format!("/notes/{}", urlencoding::encode(id))))
            .json(request);
        self.send_json(builder, token).await
    }

    async fn delete_note(&self, token: &str, id: &str) -> SyncResult<()> {
        let builder = self
            .client
            .delete(self.url(&format!("/notes/{}", urlencoding::encode(id))));
        self.send_ack(builder, token).await
    }

    async fn restore_note(&self, token: &str, id: &str) -> SyncResult<()> {
        let builder = self.client.post(self.url(&format!(
            "/notes/trash/{}/restore",
            urlencoding::encode(id)
        )));
        self.send_ack(builder, token).await
    }

    async fn purge_note(&self, token: &str, id: &str) -> SyncResult<()> {
        let builder = self
            .client
            .delete(self.url(&format!("/notes/trash/{}", urlencoding::encode(id))));
        self.send_ack(builder, token).await
    }

    async fn list_trash(&self, token: &str) -> SyncResult<Vec<TrashedNote>> {
        let builder = self.client.get(self.url("/notes/trash/all"));
        let response: TrashListResponse = self.send_json(builder, token).await?;
        Ok(response.notes)
    }

    async fn deleted_since(
        &self,
        token: &str,
        since: Option<&str>,
    ) -> SyncResult<DeletedNotesFeed> {
        let mut builder = self.client.get(self.url("/notes/trash/sync"));
        if let Some(since) = since {
            builder = builder.query(&[("lastSyncTime", since)]);
        }
        self.send_json(builder, token).await
    }

    async fn get_note(&self, token: &str, id: &str) -> SyncResult<ServerNote> {
        let builder = self
            .client
            .get(self.url(&format!("/notes/{}", urlencoding::encode(id))));
        self.send_json(builder, token).await
    }
}

/// A missing transport stands for local-only mode: every call reports
/// [`SyncError::NotConfigured`].
impl<T: SyncTransport> SyncTransport for Option<T> {
    async fn sync(&self, token: &str, request: &SyncRequest) -> SyncResult<SyncResponse> {
        match self {
            Some(transport) => transport.sync(token, request).await,
            None => Err(local_only()),
        }
    }

    async fn create_note(
        &self,
        token: &str,
        request: &CreateNoteRequest,
    ) -> SyncResult<ServerNote> {
        match self {
            Some(transport) => transport.create_note(token, request).await,
            None => Err(local_only()),
        }
    }

    async fn update_note(
        &self,
        token: &str,
        id: &str,
        request: &UpdateNoteRequest,
    ) -> SyncResult<ServerNote> {
        match self {
            Some(transport) => transport.update_note(token, id, request).await,
            None => Err(local_only()),
        }
    }

    async fn delete_note(&self, token: &str, id: &str) -> SyncResult<()> {
        match self {
            Some(transport) => transport.delete_note(token, id).await,
            None => Err(local_only()),
        }
    }

    async fn restore_note(&self, token: &str, id: &str) -> SyncResult<()> {
        match self {
            Some(transport) => transport.restore_note(token, id).await,
            None => Err(local_only()),
        }
    }

    async fn purge_note(&self, token: &str, id: &str) -> SyncResult<()> {
        match self {
            Some(transport) => transport.purge_note(token, id).await,
            None => Err(local_only()),
        }
    }

    async fn list_trash(&self, token: &str) -> SyncResult<Vec<TrashedNote>> {
        match self {
            Some(transport) => transport.list_trash(token).await,
            None => Err(local_only()),
        }
    }

    async fn deleted_since(
        &self,
        token: &str,
        since: Option<&str>,
    ) -> SyncResult<DeletedNotesFeed> {
        match self {
            Some(transport) => transport.deleted_since(token, since).await,
            None => Err(local_only()),
        }
    }

    async fn get_note(&self, token: &str, id: &str) -> SyncResult<ServerNote> {
        match self {
            Some(transport) => transport.get_note(token, id).await,
            None => Err(local_only()),
        }
    }
}

fn local_only() -> SyncError {
    SyncError::NotConfigured("NOTESYNC_API_URL is not set".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_base_urls() {
        assert!(matches!(
            HttpSyncClient::new("", Duration::from_secs(5)),
            Err(SyncError::NotConfigured(_))
        ));
        assert!(matches!(
            HttpSyncClient::new("notes.example.com", Duration::from_secs(5)),
            Err(SyncError::NotConfigured(_))
        ));
    }

    #[test]
    fn new_trims_trailing_slash() {
        let client = HttpSyncClient::new("https://notes.example.com/", Duration::from_secs(5))
            .unwrap();
        assert_eq!(client.base_url(), "https://notes.example.com");
        assert_eq!(client.url("/notes"), "https://notes.example.com/notes");
    }

    #[test]
    fn from_settings_requires_api_url() {
        let settings = SyncSettings::default();
        assert!(matches!(
            HttpSyncClient::from_settings(&settings),
            Err(SyncError::NotConfigured(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_token_is_rejected_before_sending() {
        let client =
            HttpSyncClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let result = client.get_note("  ", "abc").await;
        assert!(matches!(result, Err(SyncError::Unauthorized(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_transport_reports_local_only_mode() {
        let transport: Option<HttpSyncClient> = None;
        let result = transport.sync("token", &SyncRequest::default()).await;
        assert!(matches!(result, Err(SyncError::NotConfigured(_))));
        let result = transport.purge_note("token", "abc").await;
        assert!(matches!(result, Err(SyncError::NotConfigured(_))));
    }
}
