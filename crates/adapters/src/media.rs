//! Fetching source media before upload

use reqwest::Client;
use skymirror_domain::{MediaKind, PublishError};

/// Media bytes ready to upload
#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl DownloadedMedia {
    /// File name with an extension matching the mime type
    pub fn file_name(&self) -> String {
        let extension = match self.mime_type.as_str() {
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "video/mp4" => "mp4",
            "video/quicktime" => "mov",
            m if m.starts_with("video/") => "mp4",
            _ => "jpg",
        };
        format!("media.{}", extension)
    }
}

/// Download one media item from the source CDN or blob endpoint
pub async fn download(client: &Client, url: &str, kind: MediaKind) -> Result<DownloadedMedia, PublishError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PublishError::Media(format!("download of {} failed: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(PublishError::Media(format!(
            "download of {} returned {}",
            url,
            response.status()
        )));
    }

    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| v.starts_with("image/") || v.starts_with("video/"))
        .unwrap_or_else(|| match kind {
            MediaKind::Image => "image/jpeg".to_string(),
            MediaKind::Video => "video/mp4".to_string(),
        });

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PublishError::Media(format!("download of {} failed: {}", url, e)))?
        .to_vec();

    tracing::debug!(url = %url, bytes = bytes.len(), mime_type = %mime_type, "Downloaded media");

    Ok(DownloadedMedia { bytes, mime_type })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_uses_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![1, 2, 3]),
            )
            .mount(&server)
            .await;

        let media = download(&Client::new(), &format!("{}/img.png", server.uri()), MediaKind::Image)
            .await
            .unwrap();

        assert_eq!(media.bytes, vec![1, 2, 3]);
        assert_eq!(media.mime_type, "image/png");
        assert_eq!(media.file_name(), "media.png");
    }

    #[tokio::test]
    async fn test_download_falls_back_to_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blob"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/octet-stream")
                    .set_body_bytes(vec![0; 8]),
            )
            .mount(&server)
            .await;

        let media = download(&Client::new(), &format!("{}/blob", server.uri()), MediaKind::Video)
            .await
            .unwrap();

        assert_eq!(media.mime_type, "video/mp4");
    }

    #[tokio::test]
    async fn test_download_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = download(&Client::new(), &format!("{}/gone", server.uri()), MediaKind::Image).await;

        assert!(matches!(result, Err(PublishError::Media(_))));
    }
}
