use super::SegmentationService;
use crate::params::SegmentationParams;
use crate::{Error, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use image::ImageFormat;
use reqwest::{multipart, Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Serialize)]
struct CallRequest {
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    event_id: String,
}

/// Client for the segmentation app's Gradio HTTP API.
///
/// Each call uploads the image, queues a prediction on the named endpoint,
/// waits for its completion event and fetches the produced file. Input and
/// output are staged in temp files that are removed when the call returns,
/// whether it succeeded or not.
pub struct GradioSegmentationClient {
    client: Client,
    base_url: String,
    api_prefix: String,
    api_name: String,
    temp_dir: PathBuf,
}

impl GradioSegmentationClient {
    pub fn new(base_url: String, api_prefix: String, api_name: String) -> Self {
        Self::new_with_client(base_url, api_prefix, api_name, Client::new())
    }

    pub fn new_with_client(
        base_url: String,
        api_prefix: String,
        api_name: String,
        client: Client,
    ) -> Self {
        let api_prefix = api_prefix.trim().trim_end_matches('/');
        let api_prefix = if api_prefix.is_empty() || api_prefix.starts_with('/') {
            api_prefix.to_string()
        } else {
            format!("/{}", api_prefix)
        };

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_prefix,
            api_name: api_name.trim().trim_start_matches('/').to_string(),
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Stage temp files under `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = dir;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.api_prefix, path)
    }

    async fn stage_input(&self, png: &[u8]) -> Result<NamedTempFile> {
        let input = tempfile::Builder::new()
            .prefix("evitsam-input-")
            .suffix(".png")
            .tempfile_in(&self.temp_dir)?;
        tokio::fs::write(input.path(), png).await?;
        Ok(input)
    }

    async fn upload(&self, input: &Path) -> Result<String> {
        let bytes = tokio::fs::read(input).await?;
        let file_name = input
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image.png")
            .to_string();

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/png")?;
        let form = multipart::Form::new().part("files", part);

        tracing::debug!("Uploading {} to segmentation app", input.display());
        let response = self
            .client
            .post(self.endpoint("/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to upload image to segmentation app: {}", e);
                e
            })?;
        let response = ensure_success(response, "Upload").await?;

        let paths: Vec<String> = response.json().await?;
        paths
            .into_iter()
            .next()
            .ok_or_else(|| Error::Segmentation("Upload returned no file path".to_string()))
    }

    async fn submit(&self, server_path: &str, params: &SegmentationParams) -> Result<String> {
        // Slot 1 is not bound by this endpoint.
        let request = CallRequest {
            data: vec![
                json!({ "path": server_path, "meta": { "_type": "gradio.FileData" } }),
                Value::Null,
                json!(params.points_per_side),
                json!(params.pred_iou_thresh),
                json!(params.stability_score_thresh),
                json!(params.box_nms_thresh),
            ],
        };

        let response = self
            .client
            .post(self.endpoint(&format!("/call/{}", self.api_name)))
            .json(&request)
            .send()
            .await?;
        let response = ensure_success(response, "Prediction request").await?;

        let call: CallResponse = response.json().await?;
        Ok(call.event_id)
    }

    async fn await_result(&self, event_id: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.endpoint(&format!("/call/{}/{}", self.api_name, event_id)))
            .send()
            .await?;
        let response = ensure_success(response, "Result stream").await?;

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| {
                tracing::error!("Error in segmentation result stream: {}", e);
                Error::Segmentation(format!("Result stream failed: {}", e))
            })?;
            match event.event.as_str() {
                "complete" => return Ok(serde_json::from_str(&event.data)?),
                "error" => {
                    let detail = match event.data.trim() {
                        "" | "null" => "no details".to_string(),
                        other => other.to_string(),
                    };
                    tracing::error!("Segmentation app reported an error: {}", detail);
                    return Err(Error::Segmentation(format!(
                        "Remote model reported an error: {}",
                        detail
                    )));
                }
                other => tracing::debug!("Skipping '{}' event from result stream", other),
            }
        }

        Err(Error::Segmentation(
            "Result stream ended without a result".to_string(),
        ))
    }

    /// Resolve the download URL of the first output file.
    fn result_location(&self, output: &Value) -> Result<String> {
        let first = match output {
            Value::Array(items) => items.first(),
            other => Some(other),
        };
        let mut current = first.ok_or_else(|| {
            Error::Segmentation("Remote model returned no outputs".to_string())
        })?;

        loop {
            match current {
                Value::String(path) => {
                    return Ok(self.endpoint(&format!("/file={}", path)));
                }
                Value::Object(map) => {
                    if let Some(url) = map.get("url").and_then(Value::as_str) {
                        return Ok(url.to_string());
                    }
                    if let Some(path) = map.get("path").and_then(Value::as_str) {
                        return Ok(self.endpoint(&format!("/file={}", path)));
                    }
                    match map.get("value") {
                        Some(inner) => current = inner,
                        None => break,
                    }
                }
                _ => break,
            }
        }

        Err(Error::Segmentation(format!(
            "Unrecognized output from remote model: {}",
            output
        )))
    }

    async fn download_result(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let mut response = ensure_success(response, "Result download").await?;

        let output = tempfile::Builder::new()
            .prefix("evitsam-output-")
            .tempfile_in(&self.temp_dir)?;
        let mut file = tokio::fs::File::from_std(output.as_file().try_clone()?);
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        Ok(tokio::fs::read(output.path()).await?)
    }
}

async fn ensure_success(response: Response, stage: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await?;
    tracing::error!(
        "{} to segmentation app failed (status {}): {}",
        stage,
        status,
        error_text
    );
    Err(Error::Segmentation(format!(
        "{} failed (status {}): {}",
        stage, status, error_text
    )))
}

/// Re-encode any supported image as PNG for upload.
async fn normalize_to_png(image: Vec<u8>) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let decoded = image::load_from_memory(&image)?;
        let mut png = Vec::new();
        decoded.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    })
    .await
    .map_err(|e| Error::Invariant(format!("Image encoding task join error: {}", e)))?
}

#[async_trait]
impl SegmentationService for GradioSegmentationClient {
    async fn segment(&self, image: &[u8], params: &SegmentationParams) -> Result<Vec<u8>> {
        let png = normalize_to_png(image.to_vec()).await?;
        let input = self.stage_input(&png).await?;

        let server_path = self.upload(input.path()).await?;
        let event_id = self.submit(&server_path, params).await?;
        tracing::info!("Queued segmentation {} ({})", event_id, params);

        let output = self.await_result(&event_id).await?;
        let location = self.result_location(&output)?;
        let bytes = self.download_result(&location).await?;

        if bytes.is_empty() {
            return Err(Error::Segmentation(
                "Remote model returned an empty image".to_string(),
            ));
        }

        tracing::info!("Segmentation {} returned {} bytes", event_id, bytes.len());
        Ok(bytes)
    }
}
