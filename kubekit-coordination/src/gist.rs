//! A minimal client for one mutable remote document: a GitHub gist.
//!
//! The gist API offers exactly what the lock needs and nothing more: fetch
//! the latest document and replace its contents. There is no conditional
//! write, so callers that need mutual exclusion must build it themselves
//! (see [`crate::lock`]).

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.github.com/gists";
const GITHUB_JSON: &str = "application/vnd.github+json";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum GistError {
    /// The access token contains characters that cannot go into a header.
    #[error("access token is not a valid http header value")]
    InvalidToken,

    /// Transport-level or protocol-level failure talking to the API.
    #[error("gist api request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response carried no files; the server's message is attached.
    #[error("gist {id:?} has no files: {message}")]
    NotFound { id: String, message: String },
}

pub type Result<T, E = GistError> = std::result::Result<T, E>;

/// The subset of a gist document the client reads and writes.
#[derive(Debug, Deserialize)]
struct Gist {
    #[serde(default)]
    files: BTreeMap<String, GistFile>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct GistFile {
    #[serde(default)]
    content: String,
}

/// Reads and overwrites a named gist using bearer credentials.
///
/// The client does not retry; in-flight requests are aborted by dropping the
/// returned future.
pub struct GistClient {
    http: reqwest::Client,
    base_url: String,
}

impl GistClient {
    /// Build a client for the public GitHub API.
    ///
    /// # Errors
    ///
    /// [`GistError::InvalidToken`] if the token cannot form a header,
    /// [`GistError::Http`] if the underlying client cannot be built.
    pub fn new(access_token: &str) -> Result<Self> {
        Self::with_base_url(access_token, DEFAULT_BASE_URL)
    }

    /// Build a client against a custom endpoint (e.g. a GitHub Enterprise
    /// host, or a test server).
    ///
    /// # Errors
    ///
    /// Same as [`GistClient::new`].
    pub fn with_base_url(access_token: &str, base_url: &str) -> Result<Self> {
        let token = access_token.trim();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| GistError::InvalidToken)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_JSON));
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Fetch the content of the document's first file.
    ///
    /// # Errors
    ///
    /// [`GistError::NotFound`] when the response has no files (the server
    /// message is attached), [`GistError::Http`] on transport failure.
    pub async fn get(&self, id: &str) -> Result<String> {
        let gist = self.fetch(id).await?;
        match gist.files.into_values().next() {
            Some(file) => Ok(file.content),
            None => Err(GistError::NotFound {
                id: id.to_owned(),
                message: gist.message.unwrap_or_default(),
            }),
        }
    }

    /// Replace the content of the document's first file, leaving the others
    /// untouched.
    ///
    /// # Errors
    ///
    /// [`GistError::NotFound`] when the document has no files,
    /// [`GistError::Http`] on transport failure or a rejected write.
    pub async fn update(&self, id: &str, content: &str) -> Result<()> {
        let mut gist = self.fetch(id).await?;
        let Some(first) = gist.files.keys().next().cloned() else {
            return Err(GistError::NotFound {
                id: id.to_owned(),
                message: gist.message.unwrap_or_default(),
            });
        };
        if let Some(file) = gist.files.get_mut(&first) {
            file.content = content.to_owned();
        }

        tracing::debug!(gist = %id, file = %first, "writing document");
        self.http
            .patch(self.url(id))
            .json(&serde_json::json!({ "files": gist.files }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Gist> {
        let response = self.http.get(self.url(id)).send().await?;
        Ok(response.json().await?)
    }

    fn url(&self, id: &str) -> String {
        format!("{}/{id}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::InMemoryGist;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_returns_the_first_file_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/g1"))
            .and(header("accept", GITHUB_JSON))
            .and(header("authorization", "Bearer tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": {
                    "lock.json": { "content": "secret" },
                    "z-other.txt": { "content": "ignored" },
                },
            })))
            .mount(&server)
            .await;

        let client = GistClient::with_base_url("tok-123\n", &server.uri()).unwrap();
        assert_eq!(client.get("g1").await.unwrap(), "secret");
    }

    #[tokio::test]
    async fn missing_files_surfaces_the_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "Not Found",
            })))
            .mount(&server)
            .await;

        let client = GistClient::with_base_url("tok", &server.uri()).unwrap();
        let err = client.get("missing").await.unwrap_err();
        assert!(
            matches!(err, GistError::NotFound { ref message, .. } if message == "Not Found"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn update_then_get_round_trips() {
        let server = MockServer::start().await;
        let gist = InMemoryGist::mount(&server, "g1", "before").await;

        let client = GistClient::with_base_url("tok", &server.uri()).unwrap();
        client.update("g1", "after").await.unwrap();
        assert_eq!(client.get("g1").await.unwrap(), "after");
        assert_eq!(gist.content(), "after");
    }

    #[test]
    fn token_with_newline_is_rejected_only_if_interior() {
        // Surrounding whitespace is stripped; interior control characters
        // cannot form a header value.
        assert!(GistClient::new(" tok \n").is_ok());
        assert!(matches!(
            GistClient::new("to\nk"),
            Err(GistError::InvalidToken)
        ));
    }
}
