//! Media upload through the v2 media endpoints

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use skymirror_domain::PublishError;
use std::time::Duration;

use super::TwitterPoster;
use crate::media::DownloadedMedia;

const CHUNK_SIZE: usize = 4 * 1024 * 1024;
const MAX_STATUS_POLLS: usize = 20;
const MAX_POLL_WAIT_SECS: u64 = 10;

#[derive(Deserialize)]
struct UploadResponse {
    data: UploadData,
}

#[derive(Deserialize)]
struct UploadData {
    id: String,
    #[serde(default)]
    processing_info: Option<ProcessingInfo>,
}

#[derive(Deserialize)]
struct ProcessingInfo {
    state: String,
    #[serde(default)]
    check_after_secs: Option<u64>,
}

fn media_part(media: &DownloadedMedia, bytes: Vec<u8>) -> Result<Part, PublishError> {
    Part::bytes(bytes)
        .file_name(media.file_name())
        .mime_str(&media.mime_type)
        .map_err(|e| PublishError::Media(e.to_string()))
}

impl TwitterPoster {
    async fn send_upload(&self, form: Form) -> Result<UploadData, PublishError> {
        let response = self
            .client
            .post(self.url("/2/media/upload"))
            .header("Authorization", self.bearer())
            .multipart(form)
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let upload: UploadResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| PublishError::Media(e.to_string()))?;
        Ok(upload.data)
    }

    /// Single-request image upload
    pub(super) async fn upload_image(&self, media: &DownloadedMedia) -> Result<String, PublishError> {
        let form = Form::new()
            .text("media_category", "tweet_image")
            .part("media", media_part(media, media.bytes.clone())?);

        let data = self.send_upload(form).await?;
        tracing::debug!(media_id = %data.id, "Image uploaded");
        Ok(data.id)
    }

    /// Chunked INIT/APPEND/FINALIZE upload, then wait for processing
    pub(super) async fn upload_video(&self, media: &DownloadedMedia) -> Result<String, PublishError> {
        let init = Form::new()
            .text("command", "INIT")
            .text("media_type", media.mime_type.clone())
            .text("total_bytes", media.bytes.len().to_string())
            .text("media_category", "tweet_video");
        let media_id = self.send_upload(init).await?.id;

        for (index, chunk) in media.bytes.chunks(CHUNK_SIZE).enumerate() {
            let append = Form::new()
                .text("command", "APPEND")
                .text("media_id", media_id.clone())
                .text("segment_index", index.to_string())
                .part("media", media_part(media, chunk.to_vec())?);
            self.send_upload(append).await?;
        }

        let finalize = Form::new()
            .text("command", "FINALIZE")
            .text("media_id", media_id.clone());
        let mut processing = self.send_upload(finalize).await?.processing_info;

        let mut polls = 0;
        while let Some(info) = processing {
            match info.state.as_str() {
                "succeeded" => break,
                "failed" => {
                    return Err(PublishError::Media(format!(
                        "video {} failed processing",
                        media_id
                    )));
                }
                _ if polls >= MAX_STATUS_POLLS => {
                    return Err(PublishError::Media(format!(
                        "video {} still processing after {} checks",
                        media_id, polls
                    )));
                }
                state => {
                    let wait = info.check_after_secs.unwrap_or(1).min(MAX_POLL_WAIT_SECS);
                    tracing::debug!(media_id = %media_id, state = %state, wait_secs = wait, "Waiting for video processing");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    polls += 1;
                    processing = self.upload_status(&media_id).await?;
                }
            }
        }

        tracing::debug!(media_id = %media_id, "Video uploaded");
        Ok(media_id)
    }

    async fn upload_status(&self, media_id: &str) -> Result<Option<ProcessingInfo>, PublishError> {
        let response = self
            .client
            .get(self.url("/2/media/upload"))
            .header("Authorization", self.bearer())
            .query(&[("command", "STATUS"), ("media_id", media_id)])
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let upload: UploadResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| PublishError::Media(e.to_string()))?;
        Ok(upload.data.processing_info)
    }

    pub(super) async fn set_alt_text(&self, media_id: &str, alt: &str) -> Result<(), PublishError> {
        let response = self
            .client
            .post(self.url("/2/media/metadata"))
            .header("Authorization", self.bearer())
            .json(&serde_json::json!({
                "id": media_id,
                "metadata": { "alt_text": { "text": alt } }
            }))
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        self.check(response).await?;
        Ok(())
    }
}
