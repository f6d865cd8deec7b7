use anyhow::Context;
use futures_util::StreamExt;
use indicatif::ProgressBar;
use reqwest::{Client, StatusCode};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::Result;

/// HTTP client shared by cover, segment and listing requests
pub fn build_client(user_agent: &str) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")
}

/// Stream `url` into `dest`.
///
/// Returns the response status; the file is only written when it is `200 OK`.
pub async fn download_to_file(
    client: &Client,
    url: &str,
    dest: &Path,
    progress: Option<&ProgressBar>,
) -> Result<StatusCode> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request failed: {}", url))?;

    let status = response.status();
    if status != StatusCode::OK {
        return Ok(status);
    }

    if let Some(progress) = progress {
        progress.set_length(response.content_length().unwrap_or(0));
        progress.set_position(0);
    }

    let mut file = fs_err::File::create(dest)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = fs_err::remove_file(dest);
                return Err(anyhow::Error::new(e).context(format!("Download interrupted: {}", url)));
            }
        };
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        if let Some(progress) = progress {
            progress.set_position(downloaded);
        }
    }

    file.flush()?;
    Ok(status)
}

/// GET a page and return its body as text
pub async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request failed: {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to fetch {}: HTTP {}", url, response.status());
    }

    Ok(response.text().await?)
}
