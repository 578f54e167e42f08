//! REST client for the synthesis and identity-swap HTTP endpoints.
//!
//! Every call carries its own timeout: generation can take minutes while
//! the availability check and progress poll must return quickly.

use std::time::Duration;

use crate::messages::{
    strip_data_url, GenerateRequest, GenerateResponse, ProgressResponse, SwapRequest, SwapResponse,
};

/// Per-endpoint request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForgeTimeouts {
    pub synthesis: Duration,
    pub swap: Duration,
    pub availability: Duration,
    pub progress: Duration,
}

impl Default for ForgeTimeouts {
    fn default() -> Self {
        Self {
            synthesis: Duration::from_secs(600),
            swap: Duration::from_secs(180),
            availability: Duration::from_secs(5),
            progress: Duration::from_secs(2),
        }
    }
}

/// HTTP client for one synthesis service and its swap extension.
pub struct ForgeApi {
    client: reqwest::Client,
    api_url: String,
    swap_url: String,
    timeouts: ForgeTimeouts,
}

/// Errors from the synthesis / swap REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ForgeApiError {
    /// The HTTP request itself failed (network, DNS, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Forge API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response that carried no image.
    #[error("{0} returned no image")]
    EmptyResult(&'static str),
}

impl ForgeApi {
    /// Create a client where synthesis and swap share one base URL.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:7861`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url.clone(), api_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`], with a
    /// separate base URL for the swap endpoints.
    pub fn with_client(client: reqwest::Client, api_url: String, swap_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            swap_url: swap_url.trim_end_matches('/').to_string(),
            timeouts: ForgeTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: ForgeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Run one synthesis request.
    ///
    /// Sends `POST /generate` and returns the first image as plain base64
    /// (any data-URL prefix removed).
    pub async fn generate(&self, request: &GenerateRequest) -> Result<String, ForgeApiError> {
        let response = self
            .client
            .post(format!("{}/generate", self.api_url))
            .timeout(self.timeouts.synthesis)
            .json(request)
            .send()
            .await?;

        let body: GenerateResponse = Self::parse_response(response).await?;
        body.images
            .into_iter()
            .find(|img| !img.trim().is_empty())
            .map(|img| strip_data_url(&img).to_string())
            .ok_or(ForgeApiError::EmptyResult("synthesis"))
    }

    /// Check `GET /swap/capabilities`. Any failure means unavailable.
    pub async fn swap_available(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/swap/capabilities", self.swap_url))
            .timeout(self.timeouts.availability)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::debug!(status = response.status().as_u16(), "Swap availability check rejected");
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "Swap availability check failed");
                false
            }
        }
    }

    /// Submit one identity swap via `POST /swap`. Returns plain base64.
    pub async fn swap(&self, request: &SwapRequest) -> Result<String, ForgeApiError> {
        let response = self
            .client
            .post(format!("{}/swap", self.swap_url))
            .timeout(self.timeouts.swap)
            .json(request)
            .send()
            .await?;

        let body: SwapResponse = Self::parse_response(response).await?;
        body.into_image()
            .map(|img| strip_data_url(&img).to_string())
            .ok_or(ForgeApiError::EmptyResult("swap"))
    }

    /// Current synthesis progress as a fraction from `GET /progress`.
    pub async fn progress(&self) -> Result<f64, ForgeApiError> {
        let response = self
            .client
            .get(format!("{}/progress", self.api_url))
            .timeout(self.timeouts.progress)
            .send()
            .await?;

        let body: ProgressResponse = Self::parse_response(response).await?;
        Ok(body.progress)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ForgeApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ForgeApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ForgeApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ForgeApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
