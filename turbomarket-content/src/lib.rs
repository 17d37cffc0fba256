//! Marketing email content from a campaign request.
//!
//! A [`ContentGenerator`] wraps the text and image models. [`ContentComposer`]
//! drives one generation: build the prompt, parse the model's JSON, fetch a
//! hero image where the campaign type calls for one, and stamp provenance.

mod composer;
mod error;
mod generator;
pub mod parse;
pub mod prompt;
mod render;

pub use composer::{ComposerConfig, ContentComposer};
pub use error::{ContentError, GenerationError, MalformedContentError};
pub use generator::{
    ContentGenerator, DryRunGenerator, GeneratedImage, GeneratedText, GenerationOptions,
    ImageOptions, ScriptedGenerator,
};
pub use render::render_html;
