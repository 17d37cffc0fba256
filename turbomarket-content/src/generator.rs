use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::GenerationError;

/// Sampling settings for text generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default = "GenerationOptions::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "GenerationOptions::default_temperature")]
    pub temperature: f32,
}

impl GenerationOptions {
    const fn default_max_tokens() -> u32 {
        2048
    }

    const fn default_temperature() -> f32 {
        0.7
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: Self::default_max_tokens(),
            temperature: Self::default_temperature(),
        }
    }
}

/// Settings for hero image generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOptions {
    pub model: String,
    pub size: String,
    pub quality: String,
    pub style: String,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            model: "dall-e-3".into(),
            size: "1024x1024".into(),
            quality: "hd".into(),
            style: "vivid".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedText {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub url: String,
}

/// Text and image models
#[async_trait]
pub trait ContentGenerator: Send + Sync + std::fmt::Debug {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GeneratedText, GenerationError>;

    async fn generate_image(
        &self,
        prompt: &str,
        options: &ImageOptions,
    ) -> Result<GeneratedImage, GenerationError>;
}

/// Produces the same well-formed email for every prompt, without calling a
/// model
#[derive(Debug, Default, Clone)]
pub struct DryRunGenerator;

#[async_trait]
impl ContentGenerator for DryRunGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<GeneratedText, GenerationError> {
        let headline = prompt
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("TurboMarket");

        let text = serde_json::json!({
            "subject": "A message from TurboMarket",
            "preheader": headline,
            "content": {
                "hook": "Here is what's new.",
                "body": format!("<p>{}</p>", crate::render::escape(headline)),
                "cta": "Learn more",
                "footer": "You are receiving this email because you signed up.",
            }
        })
        .to_string();

        Ok(GeneratedText { text })
    }

    async fn generate_image(
        &self,
        _prompt: &str,
        options: &ImageOptions,
    ) -> Result<GeneratedImage, GenerationError> {
        Ok(GeneratedImage {
            url: format!("https://images.turbomarket.invalid/dry-run/{}.png", options.size),
        })
    }
}

/// Replays queued responses in order; useful for exercising failure paths
///
/// Text calls consume the text script and image calls the image script.
/// An exhausted script answers with [`GenerationError::Empty`].
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    texts: Mutex<VecDeque<Result<String, String>>>,
    images: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.texts.lock().push_back(Ok(text.into()));
        self
    }

    #[must_use]
    pub fn then_text_error(self, message: impl Into<String>) -> Self {
        self.texts.lock().push_back(Err(message.into()));
        self
    }

    #[must_use]
    pub fn then_image(self, url: impl Into<String>) -> Self {
        self.images.lock().push_back(Ok(url.into()));
        self
    }

    #[must_use]
    pub fn then_image_error(self, message: impl Into<String>) -> Self {
        self.images.lock().push_back(Err(message.into()));
        self
    }

    /// Every prompt received, text and image alike
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    fn next(
        &self,
        script: &Mutex<VecDeque<Result<String, String>>>,
        prompt: &str,
    ) -> Result<String, GenerationError> {
        self.prompts.lock().push(prompt.to_string());
        match script.lock().pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(GenerationError::Provider(message)),
            None => Err(GenerationError::Empty("script exhausted".into())),
        }
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<GeneratedText, GenerationError> {
        self.next(&self.texts, prompt)
            .map(|text| GeneratedText { text })
    }

    async fn generate_image(
        &self,
        prompt: &str,
        _options: &ImageOptions,
    ) -> Result<GeneratedImage, GenerationError> {
        self.next(&self.images, prompt)
            .map(|url| GeneratedImage { url })
    }
}
