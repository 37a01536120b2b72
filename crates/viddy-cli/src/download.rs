//! Output download.

use std::path::Path;

use anyhow::{bail, Context};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Stream `url` into `path`, returning the number of bytes written.
///
/// The file is written under a temporary name and renamed once complete, so
/// an interrupted download never leaves a truncated file at `path`.
pub async fn download_to(client: &reqwest::Client, url: &str, path: &Path) -> anyhow::Result<u64> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("requesting {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!("download failed with HTTP {}", status.as_u16());
    }

    let partial = path.with_extension("part");
    let written = match write_body(response, &partial).await {
        Ok(written) => written,
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
                warn!(path = %partial.display(), "Could not remove partial download: {}", remove_err);
            }
            return Err(e);
        }
    };

    tokio::fs::rename(&partial, path)
        .await
        .with_context(|| format!("moving download to {}", path.display()))?;

    info!(path = %path.display(), bytes = written, "Downloaded result");
    Ok(written)
}

async fn write_body(response: reqwest::Response, partial: &Path) -> anyhow::Result<u64> {
    let mut file = tokio::fs::File::create(partial)
        .await
        .with_context(|| format!("creating {}", partial.display()))?;

    let mut written = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("reading response body")?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/out1.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 2048]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip_with_audio_desc.mp4");
        let url = format!("{}/out1.mp4", server.uri());

        let written = download_to(&reqwest::Client::new(), &url, &target)
            .await
            .unwrap();
        assert_eq!(written, 2048);
        assert_eq!(std::fs::read(&target).unwrap().len(), 2048);
        assert!(!target.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_download_error_status_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.mp4");
        let url = format!("{}/expired", server.uri());

        let err = download_to(&reqwest::Client::new(), &url, &target)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_truncated_body_removes_partial_file() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = tcp.read(&mut request).await;
            tcp.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 4096\r\n\r\n")
                .await
                .unwrap();
            tcp.write_all(&[1u8; 128]).await.unwrap();
            // Connection drops before the advertised length.
        });

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.mp4");
        let url = format!("http://{}/out.mp4", addr);

        let err = download_to(&reqwest::Client::new(), &url, &target)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("reading response body"));
        assert!(!target.exists());
        assert!(!target.with_extension("part").exists());
    }
}
