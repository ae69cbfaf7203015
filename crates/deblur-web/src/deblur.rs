//! Client for the external deblurring service

use ephemeral_blob_store::Payload;
use reqwest::{header, multipart, Client};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of asking the deblur service to process an upload
#[derive(Debug)]
pub enum DeblurOutcome {
    Processed(Payload),
    /// No real processing happened; the note says why
    Fallback(&'static str),
}

/// Sends uploads to the deblur service as multipart `image` + `id`
pub struct DeblurClient {
    client: Client,
    api_url: Option<String>,
}

impl DeblurClient {
    pub fn new(api_url: Option<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, api_url })
    }

    pub fn is_configured(&self) -> bool {
        self.api_url.is_some()
    }

    /// Process an image, falling back instead of failing when the service
    /// is missing, unreachable or returns an error
    pub async fn process(&self, id: &str, image: &Payload) -> DeblurOutcome {
        let Some(api_url) = &self.api_url else {
            info!(id, "Deblur service not configured, using original image");
            return DeblurOutcome::Fallback("Using original image (deblur service not configured)");
        };

        match self.send(api_url, id, image).await {
            Ok(Some(processed)) => {
                debug!(id, size = processed.size(), "Received processed image");
                DeblurOutcome::Processed(processed)
            }
            Ok(None) => DeblurOutcome::Fallback("Using original image (deblur service failed)"),
            Err(e) => {
                warn!(id, error = %e, "Deblur service request failed");
                DeblurOutcome::Fallback("Using original image (deblur service error)")
            }
        }
    }

    async fn send(
        &self,
        api_url: &str,
        id: &str,
        image: &Payload,
    ) -> reqwest::Result<Option<Payload>> {
        let part = multipart::Part::stream(image.data.clone())
            .file_name(format!("{}.upload", id))
            .mime_str(&image.content_type)?;
        let form = multipart::Form::new()
            .part("image", part)
            .text("id", id.to_string());

        debug!(id, url = %api_url, size = image.size(), "Sending image to deblur service");
        let response = self.client.post(api_url).multipart(form).send().await?;

        if !response.status().is_success() {
            warn!(id, status = %response.status(), "Deblur service returned an error");
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let data = response.bytes().await?;

        if data.is_empty() {
            warn!(id, "Deblur service returned an empty body");
            return Ok(None);
        }

        Ok(Some(Payload { data, content_type }))
    }
}
