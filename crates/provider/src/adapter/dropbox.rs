//! Dropbox provider.
//!
//! Talks to the Dropbox HTTP API v2 directly with [`reqwest`]. Authorization
//! uses the OAuth 2 code flow with PKCE and offline access: only the refresh
//! token is persisted, access tokens are exchanged on demand and cached in the
//! adapter's [`ClientCache`].

use super::http::{CONNECT_TIMEOUT, REQUEST_TIMEOUT, classify_status, http_client, transport};
use crate::auth::Authorizer;
use crate::client::ClientCache;
use crate::credentials::{CredentialStore, credential_key};
use crate::decide::parse_timestamp;
use crate::error::{ErrorKind, Result};
use crate::models::{ListPage, Provider, RemoteFile, RemoteItem, RevisionKind, UploadMode};
use crate::path::normalize;
use crate::ProviderAdapter;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use exn::{OptionExt, ResultExt};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

const API_URL: &str = "https://api.dropboxapi.com";
const CONTENT_URL: &str = "https://content.dropboxapi.com";
const AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const REFRESH_TOKEN: &str = "refresh-token";
/// Applies to connecting and to the account check done when a client is
/// created; a slow or captive network should fail fast instead of hanging a
/// sync.

#[derive(Clone)]
struct DropboxClient {
    access_token: String,
}

/// Dropbox provider.
pub struct DropboxAdapter {
    app_key: String,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialStore>,
    client: ClientCache<DropboxClient>,
}

impl DropboxAdapter {
    pub fn new(app_key: impl Into<String>, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let http = http_client(CONNECT_TIMEOUT, REQUEST_TIMEOUT)?;
        Ok(Self {
            app_key: app_key.into(),
            http,
            credentials,
            client: ClientCache::new(),
        })
    }

    fn refresh_token_key() -> String {
        credential_key(Provider::Dropbox, REFRESH_TOKEN)
    }

    fn authorize_url(&self, pkce: &Pkce) -> String {
        format!(
            "{AUTHORIZE_URL}?client_id={}&response_type=code&token_access_type=offline&code_challenge={}&code_challenge_method=S256",
            self.app_key, pkce.challenge,
        )
    }

    async fn client(&self) -> Result<DropboxClient> {
        self.client
            .get_or_try_init(|| async {
                let Some(refresh_token) = self.credentials.get(&Self::refresh_token_key()).await? else {
                    exn::bail!(ErrorKind::Unauthorized(Provider::Dropbox));
                };
                let token = self.token(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str())]).await?;
                let client = DropboxClient { access_token: token.access_token };
                self.check_user(&client).await?;
                tracing::debug!("refreshed Dropbox access token");
                Ok(client)
            })
            .await
    }

    async fn token(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.app_key.as_str()));
        let response =
            self.http.post(format!("{API_URL}/oauth2/token")).form(&form).send().await.map_err(transport)?;
        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            // `invalid_grant`: the refresh token was revoked or the code expired.
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body.trim(), "Dropbox rejected token request");
            exn::bail!(ErrorKind::Unauthorized(Provider::Dropbox));
        }
        let response = ensure_success(response, "/oauth2/token").await?;
        response.json().await.map_err(transport)
    }

    async fn check_user(&self, client: &DropboxClient) -> Result<()> {
        let response = self
            .http
            .post(format!("{API_URL}/2/check/user"))
            .bearer_auth(&client.access_token)
            .timeout(CONNECT_TIMEOUT)
            .json(&serde_json::json!({ "query": "todosync" }))
            .send()
            .await
            .map_err(transport)?;
        ensure_success(response, "/").await.map(|_| ())
    }

    async fn rpc<B, R>(&self, endpoint: &str, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let client = self.client().await?;
        let response = self
            .http
            .post(format!("{API_URL}/2/{endpoint}"))
            .bearer_auth(&client.access_token)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        let response = self.client.check(ensure_success(response, path).await).await?;
        response.json().await.map_err(transport)
    }

    async fn content(&self, endpoint: &str, path: &str, arg: &str, body: Option<String>) -> Result<Response> {
        let client = self.client().await?;
        let mut request = self
            .http
            .post(format!("{CONTENT_URL}/2/{endpoint}"))
            .bearer_auth(&client.access_token)
            .header("Dropbox-API-Arg", arg);
        if let Some(body) = body {
            request = request.header(reqwest::header::CONTENT_TYPE, "application/octet-stream").body(body);
        }
        let response = request.send().await.map_err(transport)?;
        self.client.check(ensure_success(response, path).await).await
    }
}

#[async_trait]
impl ProviderAdapter for DropboxAdapter {
    fn provider(&self) -> Provider {
        Provider::Dropbox
    }

    fn revision_kind(&self) -> RevisionKind {
        RevisionKind::Exact
    }

    async fn authenticate(&self, authorizer: &dyn Authorizer) -> Result<()> {
        match self.create_client().await {
            Ok(()) => return Ok(()),
            Err(err) if matches!(&*err, ErrorKind::Unauthorized(_)) => {},
            Err(err) => return Err(err),
        }
        let pkce = Pkce::generate();
        let code = authorizer.authorization_code(Provider::Dropbox, &self.authorize_url(&pkce)).await?;
        let token = self
            .token(&[("grant_type", "authorization_code"), ("code", code.trim()), ("code_verifier", pkce.verifier.as_str())])
            .await?;
        let refresh_token = token
            .refresh_token
            .ok_or_raise(|| ErrorKind::Authorization("Dropbox did not issue a refresh token".to_string()))?;
        let client = DropboxClient { access_token: token.access_token };
        self.check_user(&client).await?;
        self.credentials.set(&Self::refresh_token_key(), &refresh_token).await?;
        self.client.set(client).await;
        tracing::info!("signed in to Dropbox");
        Ok(())
    }

    async fn create_client(&self) -> Result<()> {
        self.client().await.map(|_| ())
    }

    async fn has_credentials(&self) -> Result<bool> {
        Ok(self.credentials.get(&Self::refresh_token_key()).await?.is_some())
    }

    async fn sign_out(&self) -> Result<()> {
        if let Ok(client) = self.client().await {
            let revoked = self
                .http
                .post(format!("{API_URL}/2/auth/token/revoke"))
                .bearer_auth(&client.access_token)
                .send()
                .await;
            if let Err(err) = revoked {
                tracing::warn!(error = %err, "could not revoke Dropbox token");
            }
        }
        self.client.invalidate().await;
        self.credentials.remove(&Self::refresh_token_key()).await?;
        tracing::info!("signed out of Dropbox");
        Ok(())
    }

    async fn list_files(&self, path: &str, cursor: Option<&str>) -> Result<ListPage> {
        let page: ListFolderResponse = match cursor {
            Some(cursor) => self.rpc("files/list_folder/continue", path, &serde_json::json!({ "cursor": cursor })).await?,
            None => {
                let path = normalize(path)?;
                let body = serde_json::json!({ "path": api_path(&path), "recursive": true });
                self.rpc("files/list_folder", &path, &body).await?
            },
        };
        Ok(page.into_list_page())
    }

    async fn get_metadata(&self, path: &str) -> Result<RemoteFile> {
        let path = normalize(path)?;
        let metadata: Metadata = self.rpc("files/get_metadata", &path, &serde_json::json!({ "path": api_path(&path) })).await?;
        match metadata {
            Metadata::File(file) => file.into_remote_file(&path),
            _ => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    async fn download_file(&self, path: &str) -> Result<String> {
        let path = normalize(path)?;
        let arg = api_arg(&serde_json::json!({ "path": api_path(&path) }))?;
        let response = self.content("files/download", &path, &arg, None).await?;
        response.text().await.map_err(transport)
    }

    async fn upload_file(&self, path: &str, content: &str, mode: UploadMode) -> Result<RemoteFile> {
        let path = normalize(path)?;
        let mode = match mode {
            UploadMode::Create => "add",
            UploadMode::Update => "overwrite",
        };
        let arg = api_arg(&serde_json::json!({
            "path": path,
            "mode": mode,
            "autorename": false,
            "mute": true,
        }))?;
        let response = self.content("files/upload", &path, &arg, Some(content.to_string())).await?;
        let file: FileMetadata = response.json().await.map_err(transport)?;
        tracing::debug!(%path, revision = %file.rev, mode, "uploaded to Dropbox");
        file.into_remote_file(&path)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let _: serde_json::Value = self.rpc("files/delete_v2", &path, &serde_json::json!({ "path": api_path(&path) })).await?;
        Ok(())
    }
}

/// Turn a non-success response into a classified error.
///
/// Doesn't touch the client cache: token refreshes run inside the cache's
/// initializer, callers outside of it route results through
/// [`ClientCache::check`].
async fn ensure_success(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::CONFLICT => exn::bail!(classify_api_error(path, &body)),
        _ => exn::bail!(classify_status(Provider::Dropbox, status, path, &body)),
    }
}

/// The API spells the root folder as the empty string.
fn api_path(path: &str) -> &str {
    match path {
        "/" => "",
        path => path,
    }
}

/// Serialize the `Dropbox-API-Arg` header. HTTP header values have to be
/// ASCII, so everything else is escaped as JSON `\uXXXX` sequences.
fn api_arg(value: &serde_json::Value) -> Result<String> {
    let json = serde_json::to_string(value).or_raise(|| ErrorKind::Backend("could not encode API argument".to_string()))?;
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        match c.is_ascii() {
            true => escaped.push(c),
            false => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    escaped.push_str(&format!("\\u{unit:04x}"));
                }
            },
        }
    }
    Ok(escaped)
}

/// Dropbox reports endpoint-specific failures as `409` with an error summary
/// such as `path/not_found/..` or `path/conflict/file/..`.
fn classify_api_error(path: &str, body: &str) -> ErrorKind {
    let summary = serde_json::from_str::<ApiError>(body).map(|e| e.error_summary).unwrap_or_else(|_| body.to_string());
    if summary.contains("not_found") {
        ErrorKind::NotFound(path.to_string())
    } else if summary.contains("conflict") {
        ErrorKind::Conflict(path.to_string())
    } else {
        ErrorKind::Backend(summary)
    }
}

struct Pkce {
    verifier: String,
    challenge: String,
}
impl Pkce {
    fn generate() -> Self {
        // 64 characters from the unreserved set, within the 43..=128 RFC 7636 allows.
        Self::from_verifier(format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()))
    }

    fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self { verifier, challenge }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error_summary: String,
}

#[derive(Deserialize)]
struct ListFolderResponse {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}
impl ListFolderResponse {
    fn into_list_page(self) -> ListPage {
        let items = self
            .entries
            .into_iter()
            .filter_map(|entry| match entry {
                Metadata::File(file) => {
                    let path = file.path_lower.clone()?;
                    file.into_remote_file(&path).ok().map(RemoteItem::File)
                },
                Metadata::Folder(folder) => Some(RemoteItem::Folder { path: folder.path_lower?, name: folder.name }),
                Metadata::Other => None,
            })
            .collect();
        ListPage { items, cursor: Some(self.cursor), has_more: self.has_more }
    }
}

#[derive(Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum Metadata {
    File(FileMetadata),
    Folder(FolderMetadata),
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct FileMetadata {
    name: String,
    path_lower: Option<String>,
    rev: String,
    content_hash: Option<String>,
    server_modified: Option<String>,
}
impl FileMetadata {
    fn into_remote_file(self, requested: &str) -> Result<RemoteFile> {
        // Files without a lower-cased path aren't mounted for this app.
        let path = self.path_lower.ok_or_raise(|| ErrorKind::NotFound(requested.to_string()))?;
        Ok(RemoteFile {
            name: self.name,
            path,
            revision: self.rev,
            modified: self.server_modified.as_deref().and_then(parse_timestamp),
            content_hash: self.content_hash,
        })
    }
}

#[derive(Deserialize)]
struct FolderMetadata {
    name: String,
    path_lower: Option<String>,
}
