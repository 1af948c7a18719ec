//! Remote generative capabilities used by the pipeline and the clustering pass.

use anyhow::Result;

pub mod openai;

pub use openai::OpenAiClient;

/// Trait implemented by language-generation backends.
pub trait TextGenerator {
    /// Returns the model's text reply, or `None` when the reply carried no content.
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<Option<String>>;
}

/// Trait implemented by image-generation backends.
pub trait ImageGenerator {
    /// Returns the base64 payload of one generated image, or `None` when the
    /// response carried no image data.
    fn generate(&self, request: &ImageRequest<'_>) -> Result<Option<String>>;
}

/// Request envelope for a single chat-style completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    /// Model selector.
    pub model: &'a str,
    /// System instruction.
    pub system: &'a str,
    /// User instruction.
    pub user: &'a str,
    /// Maximum output length in tokens.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Request envelope for a single image.
#[derive(Debug, Clone)]
pub struct ImageRequest<'a> {
    /// Model selector.
    pub model: &'a str,
    /// Image description.
    pub prompt: &'a str,
    /// Target resolution, e.g. `1024x1024`.
    pub size: &'a str,
    /// Quality tier, e.g. `hd`.
    pub quality: &'a str,
}

impl<T: TextGenerator + ?Sized> TextGenerator for &T {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<Option<String>> {
        (**self).complete(request)
    }
}

impl<T: ImageGenerator + ?Sized> ImageGenerator for &T {
    fn generate(&self, request: &ImageRequest<'_>) -> Result<Option<String>> {
        (**self).generate(request)
    }
}
