use std::sync::Arc;

use serde::{Deserialize, Serialize};
use turbomarket_common::{CampaignRequest, ContentMetadata, EmailContent, internal};
use turbomarket_tracing::traced;

use crate::{
    ContentError, ContentGenerator, GenerationOptions, ImageOptions, parse::parse_content,
    prompt::{content_prompt, image_prompt},
};

/// Model settings, as they appear in the `content` configuration section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    pub text: GenerationOptions,
    pub image: ImageOptions,
}

/// Turns a [`CampaignRequest`] into [`EmailContent`]
#[derive(Debug, Clone)]
pub struct ContentComposer {
    generator: Arc<dyn ContentGenerator>,
    config: ComposerConfig,
}

impl ContentComposer {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self::with_config(generator, ComposerConfig::default())
    }

    pub const fn with_config(generator: Arc<dyn ContentGenerator>, config: ComposerConfig) -> Self {
        Self { generator, config }
    }

    /// Generate, parse and illustrate one email.
    ///
    /// A failed hero image does not fail the email; it is logged and the
    /// content carries no image.
    ///
    /// # Errors
    /// [`ContentError::Generation`] when the text model fails and
    /// [`ContentError::Malformed`] when its output is not an email document
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(email_type = %request.email_type, user_id = %request.user_id)), timing(precision = "ms"), slow(ms = 20000))]
    pub async fn compose(&self, request: &CampaignRequest) -> Result<EmailContent, ContentError> {
        let generated = self
            .generator
            .generate(&content_prompt(request), &self.config.text)
            .await?;

        let email = parse_content(&generated.text)?;

        let hero_image_url = if request.wants_hero_image() {
            match self
                .generator
                .generate_image(&image_prompt(&request.email_type), &self.config.image)
                .await
            {
                Ok(image) => Some(image.url),
                Err(err) => {
                    internal!(
                        level = WARN,
                        "Hero image generation failed for {} campaign, sending without one: {err}",
                        request.email_type
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(EmailContent {
            subject: email.subject,
            preheader_text: email.preheader,
            hook: email.content.hook,
            body_html: email.content.body,
            cta_text: email.content.cta,
            footer_html: email.content.footer,
            hero_image_url,
            metadata: ContentMetadata::for_request(request),
        })
    }
}
