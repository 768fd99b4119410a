//! WebDAV provider.
//!
//! Uses plain HTTP verbs through [`reqwest`] with basic authentication.
//! Metadata comes from `PROPFIND` multistatus responses, parsed with
//! [`quick_xml`] by local element name so that whatever namespace prefix the
//! server picks (`d:`, `D:`, none) doesn't matter.
//!
//! WebDAV has no revision tokens that every server supports, so the
//! `getlastmodified` timestamp is used as the revision (normalized to RFC
//! 3339), see [`RevisionKind::Timestamp`].

use super::http::{CONNECT_TIMEOUT, REQUEST_TIMEOUT, classify_status, http_client, transport};
use crate::ProviderAdapter;
use crate::auth::{Authorizer, BasicCredentials};
use crate::client::ClientCache;
use crate::credentials::{CredentialStore, credential_key};
use crate::decide::{format_timestamp, parse_timestamp};
use crate::error::{ErrorKind, Result};
use crate::models::{ListPage, Provider, RemoteFile, RemoteItem, RevisionKind, UploadMode};
use crate::path::{file_name, normalize, parent};
use async_trait::async_trait;
use exn::ResultExt;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Response};
use std::sync::Arc;
use url::Url;

const URL_KEY: &str = "url";
const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getlastmodified/>
    <d:getetag/>
    <d:getcontentlength/>
  </d:prop>
</d:propfind>"#;

#[derive(Clone)]
struct WebDavClient {
    base: Url,
    username: String,
    password: String,
}
impl WebDavClient {
    fn new(url: &str, username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let base = Url::parse(url.trim()).or_raise(|| ErrorKind::InvalidPath(url.to_string()))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            exn::bail!(ErrorKind::InvalidPath(url.to_string()));
        }
        Ok(Self { base, username: username.into(), password: password.into() })
    }

    /// Server URL for a remote path. Collections get a trailing slash.
    fn url_for(&self, path: &str, collection: bool) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let Ok(mut segments) = url.path_segments_mut() else {
                exn::bail!(ErrorKind::InvalidPath(path.to_string()));
            };
            segments.pop_if_empty();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
            if collection {
                segments.push("");
            }
        }
        Ok(url)
    }

    /// Decoded path of the base URL, without trailing slash.
    fn base_path(&self) -> String {
        let path = self.base.path();
        let decoded = urlencoding::decode(path).map_or_else(|_| path.to_string(), |p| p.into_owned());
        decoded.trim_end_matches('/').to_string()
    }
}

/// WebDAV provider.
pub struct WebDavAdapter {
    http: reqwest::Client,
    credentials: Arc<dyn CredentialStore>,
    client: ClientCache<WebDavClient>,
}

impl WebDavAdapter {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let http = http_client(CONNECT_TIMEOUT, REQUEST_TIMEOUT)?;
        Ok(Self { http, credentials, client: ClientCache::new() })
    }

    fn key(field: &str) -> String {
        credential_key(Provider::WebDav, field)
    }

    async fn client(&self) -> Result<WebDavClient> {
        self.client
            .get_or_try_init(|| async {
                let url = self.credentials.get(&Self::key(URL_KEY)).await?;
                let username = self.credentials.get(&Self::key(USERNAME_KEY)).await?;
                let password = self.credentials.get(&Self::key(PASSWORD_KEY)).await?;
                match (url, username, password) {
                    (Some(url), Some(username), Some(password)) => WebDavClient::new(&url, username, password),
                    _ => exn::bail!(ErrorKind::Unauthorized(Provider::WebDav)),
                }
            })
            .await
    }

    /// Send a request with an explicit client, bypassing the cache.
    async fn send_with(
        &self,
        client: &WebDavClient,
        method: Method,
        path: &str,
        collection: bool,
        headers: HeaderMap,
        body: Option<String>,
    ) -> Result<Response> {
        let url = client.url_for(path, collection)?;
        let mut request = self
            .http
            .request(method, url)
            .basic_auth(&client.username, Some(&client.password))
            .headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        exn::bail!(classify_status(Provider::WebDav, status, path, &body))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        collection: bool,
        headers: HeaderMap,
        body: Option<String>,
    ) -> Result<Response> {
        let client = self.client().await?;
        self.client.check(self.send_with(&client, method, path, collection, headers, body).await).await
    }

    async fn propfind_with(&self, client: &WebDavClient, dir: &str, depth: u8) -> Result<Vec<(String, DavEntry)>> {
        let response =
            self.send_with(client, propfind_method()?, dir, true, propfind_headers(depth), Some(PROPFIND_BODY.to_string())).await?;
        let xml = response.text().await.map_err(transport)?;
        let base_path = client.base_path();
        Ok(parse_multistatus(&xml)?.into_iter().map(|entry| (href_to_path(&base_path, &entry.href), entry)).collect())
    }

    async fn propfind(&self, dir: &str, depth: u8) -> Result<Vec<(String, DavEntry)>> {
        let client = self.client().await?;
        self.client.check(self.propfind_with(&client, dir, depth).await).await
    }
}

#[async_trait]
impl ProviderAdapter for WebDavAdapter {
    fn provider(&self) -> Provider {
        Provider::WebDav
    }

    fn revision_kind(&self) -> RevisionKind {
        RevisionKind::Timestamp
    }

    async fn authenticate(&self, authorizer: &dyn Authorizer) -> Result<()> {
        match self.propfind("/", 0).await {
            Ok(_) => return Ok(()),
            Err(err) if matches!(&*err, ErrorKind::Unauthorized(_)) => {},
            Err(err) => return Err(err),
        }
        let BasicCredentials { url, username, password } = authorizer.basic_credentials(Provider::WebDav).await?;
        let client = WebDavClient::new(&url, username, password)?;
        self.propfind_with(&client, "/", 0).await?;
        self.credentials.set(&Self::key(URL_KEY), client.base.as_str()).await?;
        self.credentials.set(&Self::key(USERNAME_KEY), &client.username).await?;
        self.credentials.set(&Self::key(PASSWORD_KEY), &client.password).await?;
        tracing::info!(url = %client.base, "signed in to WebDAV");
        self.client.set(client).await;
        Ok(())
    }

    async fn create_client(&self) -> Result<()> {
        self.client().await.map(|_| ())
    }

    async fn has_credentials(&self) -> Result<bool> {
        Ok(self.credentials.get(&Self::key(URL_KEY)).await?.is_some())
    }

    async fn sign_out(&self) -> Result<()> {
        self.client.invalidate().await;
        for field in [URL_KEY, USERNAME_KEY, PASSWORD_KEY] {
            self.credentials.remove(&Self::key(field)).await?;
        }
        tracing::info!("signed out of WebDAV");
        Ok(())
    }

    async fn list_files(&self, path: &str, _cursor: Option<&str>) -> Result<ListPage> {
        let dir = normalize(path)?;
        let items = self
            .propfind(&dir, 1)
            .await?
            .into_iter()
            // The collection itself is part of a depth 1 response.
            .filter(|(path, _)| *path != dir)
            .map(|(path, entry)| match entry.collection {
                true => RemoteItem::Folder { name: file_name(&path).to_string(), path },
                false => RemoteItem::File(entry.into_remote_file(path)),
            })
            .collect();
        Ok(ListPage { items, cursor: None, has_more: false })
    }

    async fn get_metadata(&self, path: &str) -> Result<RemoteFile> {
        let path = normalize(path)?;
        // Some servers answer depth 0 requests on plain files inconsistently,
        // the parent listing is reliable everywhere.
        let entries = match self.propfind(parent(&path), 1).await {
            Ok(entries) => entries,
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => exn::bail!(ErrorKind::NotFound(path)),
            Err(err) => return Err(err),
        };
        entries
            .into_iter()
            .find(|(candidate, entry)| !entry.collection && *candidate == path)
            .map(|(path, entry)| entry.into_remote_file(path))
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn download_file(&self, path: &str) -> Result<String> {
        let path = normalize(path)?;
        let response = self.send(Method::GET, &path, false, HeaderMap::new(), None).await?;
        response.text().await.map_err(transport)
    }

    async fn upload_file(&self, path: &str, content: &str, mode: UploadMode) -> Result<RemoteFile> {
        let path = normalize(path)?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        if mode == UploadMode::Create {
            match self.get_metadata(&path).await {
                Ok(_) => exn::bail!(ErrorKind::Conflict(path)),
                Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => {},
                Err(err) => return Err(err),
            }
            // Closes the gap between the check above and the write.
            headers.insert(reqwest::header::IF_NONE_MATCH, HeaderValue::from_static("*"));
        }
        self.send(Method::PUT, &path, false, headers, Some(content.to_string())).await?;
        tracing::debug!(%path, %mode, "uploaded to WebDAV");
        self.get_metadata(&path).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        self.send(Method::DELETE, &path, false, HeaderMap::new(), None).await.map(|_| ())
    }
}

fn propfind_method() -> Result<Method> {
    Method::from_bytes(b"PROPFIND").or_raise(|| ErrorKind::Backend("invalid HTTP method".to_string()))
}

fn propfind_headers(depth: u8) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml; charset=utf-8"));
    headers.insert("Depth", HeaderValue::from(u32::from(depth)));
    headers
}

/// One `<response>` element of a multistatus document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct DavEntry {
    href: String,
    collection: bool,
    last_modified: Option<String>,
    etag: Option<String>,
    content_length: Option<u64>,
}
impl DavEntry {
    fn into_remote_file(self, path: String) -> RemoteFile {
        let modified = self.last_modified.as_deref().and_then(parse_timestamp);
        let revision = match (modified, self.last_modified, self.etag) {
            (Some(modified), _, _) => format_timestamp(modified),
            (None, Some(raw), _) => raw,
            (None, None, Some(etag)) => etag,
            (None, None, None) => String::new(),
        };
        RemoteFile {
            name: file_name(&path).to_string(),
            path,
            revision,
            modified,
            content_hash: None,
        }
    }
}

fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut stack: Vec<Vec<u8>> = Vec::new();
    loop {
        let event = reader.read_event().or_raise(|| ErrorKind::Backend("invalid multistatus response".to_string()))?;
        match event {
            Event::Start(element) => {
                let name = element.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"response" => current = Some(DavEntry::default()),
                    b"collection" => current.iter_mut().for_each(|entry| entry.collection = true),
                    _ => {},
                }
                stack.push(name);
            },
            Event::Empty(element) => {
                if element.local_name().as_ref() == b"collection" {
                    current.iter_mut().for_each(|entry| entry.collection = true);
                }
            },
            Event::End(element) => {
                stack.pop();
                if element.local_name().as_ref() == b"response"
                    && let Some(entry) = current.take()
                {
                    entries.push(entry);
                }
            },
            Event::Text(text) => {
                let text = text.unescape().or_raise(|| ErrorKind::Backend("invalid multistatus response".to_string()))?;
                let (Some(entry), Some(element)) = (current.as_mut(), stack.last()) else {
                    continue;
                };
                match element.as_slice() {
                    b"href" => entry.href = text.into_owned(),
                    b"getlastmodified" => entry.last_modified = Some(text.into_owned()),
                    b"getetag" => entry.etag = Some(text.into_owned()),
                    b"getcontentlength" => entry.content_length = text.parse().ok(),
                    _ => {},
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(entries)
}

/// Turn a multistatus `href` into a remote path relative to the server's
/// base path.
fn href_to_path(base_path: &str, href: &str) -> String {
    let href = match href.starts_with("http://") || href.starts_with("https://") {
        true => Url::parse(href).map_or_else(|_| href.to_string(), |url| url.path().to_string()),
        false => href.to_string(),
    };
    let decoded = urlencoding::decode(&href).map_or_else(|_| href.clone(), |p| p.into_owned());
    let relative = decoded.strip_prefix(base_path).unwrap_or(&decoded);
    normalize(relative).unwrap_or_else(|_| format!("/{}", relative.trim_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentials;
    use rstest::rstest;

    const NEXTCLOUD_LISTING: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/remote.php/dav/files/me/Todo/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:getlastmodified>Fri, 01 Mar 2024 09:00:00 GMT</d:getlastmodified>
        <d:getetag>&quot;65e19a50&quot;</d:getetag>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/dav/files/me/Todo/todo.txt</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getlastmodified>Fri, 01 Mar 2024 10:00:00 GMT</d:getlastmodified>
        <d:getetag>&quot;1c2b&quot;</d:getetag>
        <d:getcontentlength>42</d:getcontentlength>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/dav/files/me/Todo/Eink%c3%a4ufe%20Liste.txt</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getlastmodified>Sat, 02 Mar 2024 08:30:00 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/dav/files/me/Todo/Archive/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection></d:collection></d:resourcetype>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn test_parse_multistatus() {
        let entries = parse_multistatus(NEXTCLOUD_LISTING).unwrap();
        assert_eq!(entries.len(), 4);
        assert!(entries[0].collection);
        assert_eq!(
            entries[1],
            DavEntry {
                href: "/remote.php/dav/files/me/Todo/todo.txt".to_string(),
                collection: false,
                last_modified: Some("Fri, 01 Mar 2024 10:00:00 GMT".to_string()),
                etag: Some("\"1c2b\"".to_string()),
                content_length: Some(42),
            }
        );
        assert!(!entries[2].collection);
        assert!(entries[3].collection);
    }

    #[test]
    fn test_parse_multistatus_without_prefix() {
        let xml = r#"<multistatus xmlns="DAV:"><response><href>/todo.txt</href><propstat><prop>
            <resourcetype/><getlastmodified>Fri, 01 Mar 2024 10:00:00 GMT</getlastmodified>
            </prop></propstat></response></multistatus>"#;
        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].href, "/todo.txt");
    }

    #[test]
    fn test_parse_multistatus_rejects_garbage() {
        let err = parse_multistatus("<d:multistatus><d:response></d:multistatus>").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Backend(_)));
    }

    #[rstest]
    #[case("/remote.php/dav/files/me", "/remote.php/dav/files/me/Todo/todo.txt", "/Todo/todo.txt")]
    #[case("/remote.php/dav/files/me", "/remote.php/dav/files/me/Todo/", "/Todo")]
    #[case("/remote.php/dav/files/me", "/remote.php/dav/files/me/", "/")]
    #[case("/remote.php/dav/files/me", "https://cloud.example.com/remote.php/dav/files/me/todo.txt", "/todo.txt")]
    #[case("/remote.php/dav/files/me", "/remote.php/dav/files/me/Eink%c3%a4ufe%20Liste.txt", "/Einkäufe Liste.txt")]
    #[case("", "/todo.txt", "/todo.txt")]
    fn test_href_to_path(#[case] base: &str, #[case] href: &str, #[case] expected: &str) {
        assert_eq!(href_to_path(base, href), expected);
    }

    #[rstest]
    #[case("https://dav.example.com/remote.php/dav/files/me/", "/Todo Lists/todo.txt", false, "https://dav.example.com/remote.php/dav/files/me/Todo%20Lists/todo.txt")]
    #[case("https://dav.example.com/remote.php/dav/files/me", "/todo.txt", false, "https://dav.example.com/remote.php/dav/files/me/todo.txt")]
    #[case("https://dav.example.com/dav/", "/", true, "https://dav.example.com/dav/")]
    #[case("https://dav.example.com/", "/Todo", true, "https://dav.example.com/Todo/")]
    fn test_url_for(#[case] base: &str, #[case] path: &str, #[case] collection: bool, #[case] expected: &str) {
        let client = WebDavClient::new(base, "me", "secret").unwrap();
        assert_eq!(client.url_for(path, collection).unwrap().as_str(), expected);
    }

    #[rstest]
    #[case("ftp://dav.example.com/")]
    #[case("not a url")]
    fn test_client_rejects_bad_url(#[case] url: &str) {
        assert!(WebDavClient::new(url, "me", "secret").is_err());
    }

    #[test]
    fn test_revision_is_normalized_timestamp() {
        let entries = parse_multistatus(NEXTCLOUD_LISTING).unwrap();
        let file = entries[1].clone().into_remote_file("/Todo/todo.txt".to_string());
        assert_eq!(file.revision, "2024-03-01T10:00:00Z");
        assert_eq!(file.name, "todo.txt");
        assert!(file.content_hash.is_none());
    }

    #[test]
    fn test_revision_falls_back_to_etag() {
        let entry = DavEntry { etag: Some("\"abc\"".to_string()), ..DavEntry::default() };
        assert_eq!(entry.into_remote_file("/todo.txt".to_string()).revision, "\"abc\"");
    }

    #[tokio::test]
    async fn test_missing_credentials_is_unauthorized() {
        let adapter = WebDavAdapter::new(Arc::new(MemoryCredentials::default())).unwrap();
        let err = adapter.create_client().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unauthorized(Provider::WebDav)));
    }

    #[tokio::test]
    async fn test_sign_out_clears_credentials() {
        let credentials = Arc::new(MemoryCredentials::with_values([
            ("WebDAV-url", "https://dav.example.com/"),
            ("WebDAV-username", "me"),
            ("WebDAV-password", "secret"),
        ]));
        let adapter = WebDavAdapter::new(credentials.clone()).unwrap();
        adapter.create_client().await.unwrap();
        assert!(adapter.has_credentials().await.unwrap());
        adapter.sign_out().await.unwrap();
        assert!(!adapter.has_credentials().await.unwrap());
        assert_eq!(credentials.get("WebDAV-password").await.unwrap(), None);
    }
}
