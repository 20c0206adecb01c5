use crate::error::NexusError;
use crate::types::drive::{ChangeListPage, FileListPage, StartPageToken};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

const FILE_FIELDS: &str = "id, name, mimeType, modifiedTime, thumbnailLink, webViewLink, trashed";

/// The slice of the Drive v3 REST API the indexer consumes.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// One page of non-trashed files.
    async fn list_files(
        &self,
        access_token: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<FileListPage, NexusError>;

    /// Fresh cursor for the change feed.
    async fn start_page_token(&self, access_token: &str) -> Result<String, NexusError>;

    /// One page of the change feed starting at `page_token`.
    async fn list_changes(
        &self,
        access_token: &str,
        page_token: &str,
        page_size: u32,
    ) -> Result<ChangeListPage, NexusError>;
}

pub struct GoogleDriveApi {
    client: reqwest::Client,
    base_url: Url,
}

impl GoogleDriveApi {
    /// `base_url` is the API root, e.g. `https://www.googleapis.com/drive/v3/`.
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, NexusError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<T, NexusError> {
        let mut url = self.base_url.join(path)?;
        url.query_pairs_mut().extend_pairs(query);

        let resp = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            debug!(path, %status, "Drive request failed");
            return Err(NexusError::UpstreamStatus(status));
        }
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl DriveApi for GoogleDriveApi {
    async fn list_files(
        &self,
        access_token: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<FileListPage, NexusError> {
        let page_size = page_size.to_string();
        let fields = format!("nextPageToken, files({FILE_FIELDS})");
        let mut query = vec![
            ("pageSize", page_size.as_str()),
            ("fields", fields.as_str()),
            ("q", "trashed=false"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get_json("files", access_token, &query).await
    }

    async fn start_page_token(&self, access_token: &str) -> Result<String, NexusError> {
        let token: StartPageToken = self
            .get_json("changes/startPageToken", access_token, &[])
            .await?;
        Ok(token.start_page_token)
    }

    async fn list_changes(
        &self,
        access_token: &str,
        page_token: &str,
        page_size: u32,
    ) -> Result<ChangeListPage, NexusError> {
        let page_size = page_size.to_string();
        let fields =
            format!("nextPageToken, newStartPageToken, changes(fileId, removed, file({FILE_FIELDS}))");
        let query = [
            ("pageToken", page_token),
            ("pageSize", page_size.as_str()),
            ("fields", fields.as_str()),
        ];
        self.get_json("changes", access_token, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Query,
        http::{HeaderMap, StatusCode},
        routing::get,
    };
    use serde_json::{Value, json};
    use std::collections::HashMap;

    async fn mock_drive() -> String {
        async fn files(
            headers: HeaderMap,
            Query(q): Query<HashMap<String, String>>,
        ) -> Result<Json<Value>, StatusCode> {
            if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer tok") {
                return Err(StatusCode::UNAUTHORIZED);
            }
            assert_eq!(q.get("q").map(String::as_str), Some("trashed=false"));
            let body = match q.get("pageToken").map(String::as_str) {
                None => json!({
                    "files": [{"id": "1", "name": "Budget2024.xlsx", "mimeType": "application/vnd.ms-excel"}],
                    "nextPageToken": "p2"
                }),
                Some("p2") => json!({"files": [{"id": "2", "name": "notes.txt"}]}),
                Some(_) => return Err(StatusCode::BAD_REQUEST),
            };
            Ok(Json(body))
        }

        let app = Router::new()
            .route("/drive/v3/files", get(files))
            .route(
                "/drive/v3/changes/startPageToken",
                get(|| async { Json(json!({"startPageToken": "c1"})) }),
            )
            .route(
                "/drive/v3/changes",
                get(|| async {
                    Json(json!({
                        "changes": [{"fileId": "1", "removed": true}],
                        "newStartPageToken": "c2"
                    }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/drive/v3")
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test]
    async fn lists_files_page_by_page() {
        let api = GoogleDriveApi::new(client(), &mock_drive().await).unwrap();

        let first = api.list_files("tok", None, 1000).await.unwrap();
        assert_eq!(first.files.len(), 1);
        assert_eq!(first.files[0].mime_type.as_deref(), Some("application/vnd.ms-excel"));
        assert_eq!(first.next_page_token.as_deref(), Some("p2"));

        let second = api.list_files("tok", Some("p2"), 1000).await.unwrap();
        assert_eq!(second.files[0].id, "2");
        assert!(second.next_page_token.is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let api = GoogleDriveApi::new(client(), &mock_drive().await).unwrap();
        let err = api.list_files("wrong", None, 10).await.unwrap_err();
        assert!(matches!(err, NexusError::UpstreamStatus(StatusCode::UNAUTHORIZED)));
    }

    #[tokio::test]
    async fn reads_change_feed() {
        let api = GoogleDriveApi::new(client(), &mock_drive().await).unwrap();
        assert_eq!(api.start_page_token("tok").await.unwrap(), "c1");

        let page = api.list_changes("tok", "c1", 100).await.unwrap();
        assert_eq!(page.changes[0].file_id.as_deref(), Some("1"));
        assert_eq!(page.changes[0].removed, Some(true));
        assert_eq!(page.new_start_page_token.as_deref(), Some("c2"));
    }
}
