//! Loading request definition files

use std::path::PathBuf;
use tracing::{debug, info};

use crate::errors::HttpError;
use crate::types::{RequestDefinition, RequestFile};

/// Where request files come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSource {
    /// Read from a local directory
    Directory(PathBuf),
    /// Download relative to a base URL
    BaseUrl(String),
}

impl RequestSource {
    /// `base_url` wins when set, otherwise files are read from `dir`
    pub fn resolve(base_url: &str, dir: impl Into<PathBuf>) -> Self {
        if base_url.trim().is_empty() {
            RequestSource::Directory(dir.into())
        } else {
            RequestSource::BaseUrl(base_url.to_string())
        }
    }
}

/// Load every request from `files`, in file order
///
/// Fails when a file cannot be read or parsed, or when all of them
/// together hold no request at all.
pub async fn load_requests(
    source: &RequestSource,
    files: &[String],
    client: &reqwest::Client,
) -> Result<Vec<RequestDefinition>, HttpError> {
    let mut requests = Vec::new();

    for file in files {
        let content = match source {
            RequestSource::Directory(dir) => read_local(dir, file).await?,
            RequestSource::BaseUrl(base) => download(client, base, file).await?,
        };

        let parsed: RequestFile = serde_json::from_str(&content)?;
        debug!("Loaded {} requests from {}", parsed.requests.len(), file);
        requests.extend(parsed.requests);
    }

    if requests.is_empty() {
        return Err(HttpError::NoRequests(files.to_vec()));
    }

    info!("Loaded {} requests from {} files", requests.len(), files.len());
    Ok(requests)
}

async fn read_local(dir: &std::path::Path, file: &str) -> Result<String, HttpError> {
    let path = dir.join(file);
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| HttpError::FileRead {
            path: path.display().to_string(),
            source,
        })
}

async fn download(client: &reqwest::Client, base: &str, file: &str) -> Result<String, HttpError> {
    let url = crate::transport::join_url(base, file)?;
    let response = client.get(url.clone()).send().await?;

    if !response.status().is_success() {
        return Err(HttpError::DownloadFailed {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(response.text().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_loads_files_in_order() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"requests":[{"path":"/one"},{"path":"/two"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("b.json"), r#"{"requests":[{"path":"/three"}]}"#).unwrap();

        let source = RequestSource::resolve("", dir.path());
        let requests = load_requests(
            &source,
            &["a.json".into(), "b.json".into()],
            &reqwest::Client::new(),
        )
        .await
        .unwrap();

        let paths: Vec<_> = requests.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/one", "/two", "/three"]);
    }

    #[tokio::test]
    async fn test_missing_file_and_empty_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("empty.json"), r#"{"requests":[]}"#).unwrap();
        let source = RequestSource::Directory(dir.path().to_path_buf());
        let client = reqwest::Client::new();

        let missing = load_requests(&source, &["nope.json".into()], &client).await;
        assert!(matches!(missing, Err(HttpError::FileRead { .. })));

        let empty = load_requests(&source, &["empty.json".into()], &client).await;
        assert!(matches!(empty, Err(HttpError::NoRequests(_))));
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let source = RequestSource::Directory(dir.path().to_path_buf());

        let result = load_requests(&source, &["bad.json".into()], &reqwest::Client::new()).await;
        assert!(matches!(result, Err(HttpError::InvalidJson(_))));
    }

    #[test]
    fn test_base_url_takes_precedence() {
        assert_eq!(
            RequestSource::resolve("https://files.example.com/", "TestFiles"),
            RequestSource::BaseUrl("https://files.example.com/".into())
        );
        assert_eq!(
            RequestSource::resolve("  ", "TestFiles"),
            RequestSource::Directory(PathBuf::from("TestFiles"))
        );
    }
}
