use async_trait::async_trait;

use crate::api::{ForgeApi, ForgeApiError};
use crate::messages::{GenerateRequest, SwapRequest};

/// The image-producing side of a generation run.
///
/// Implemented by [`ForgeApi`] for real runs and by in-memory fakes in
/// tests. All images cross this boundary as plain base64 PNG.
#[async_trait]
pub trait ImageService: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ForgeApiError>;

    async fn swap_available(&self) -> bool;

    async fn swap(&self, request: &SwapRequest) -> Result<String, ForgeApiError>;

    /// Progress of the in-flight synthesis as a fraction.
    async fn progress(&self) -> Result<f64, ForgeApiError>;
}

#[async_trait]
impl ImageService for ForgeApi {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ForgeApiError> {
        ForgeApi::generate(self, request).await
    }

    async fn swap_available(&self) -> bool {
        ForgeApi::swap_available(self).await
    }

    async fn swap(&self, request: &SwapRequest) -> Result<String, ForgeApiError> {
        ForgeApi::swap(self, request).await
    }

    async fn progress(&self) -> Result<f64, ForgeApiError> {
        ForgeApi::progress(self).await
    }
}
