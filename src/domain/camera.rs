//! Image-producing peripheral driven by string commands.

use anyhow::Result;
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::peripheral::{CommandHandler, CommandResult, DataPublisher, Media, PeripheralData};

pub const IMAGE_WIDTH: usize = 600;
pub const IMAGE_HEIGHT: usize = 400;

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),
    #[error("Command must be a string, got {0}")]
    NotAString(String),
}

/// Encoded content ready to be wrapped in a media record
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedContent {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    pub metadata: Option<Value>,
}

/// Produces content for a command, or `None` if the command is not supported.
///
/// Generation is CPU-bound and runs on the blocking pool.
pub trait ContentGenerator: Send + Sync {
    fn generate(&self, command: &str) -> Option<GeneratedContent>;
}

/// Binary PPM (P6) encoding of an RGB buffer
pub fn encode_ppm(width: usize, height: usize, rgb: &[u8]) -> Vec<u8> {
    let mut out = format!("P6\n{width} {height}\n255\n").into_bytes();
    out.extend_from_slice(rgb);
    out
}

/// Uniformly random RGB pixels for the `uniform` command
#[derive(Debug, Default)]
pub struct UniformNoiseGenerator {
    seed: Option<u64>,
}

impl UniformNoiseGenerator {
    pub fn with_seed(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

impl ContentGenerator for UniformNoiseGenerator {
    fn generate(&self, command: &str) -> Option<GeneratedContent> {
        if command != "uniform" {
            return None;
        }
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut rgb = vec![0u8; IMAGE_WIDTH * IMAGE_HEIGHT * 3];
        rng.fill(rgb.as_mut_slice());

        Some(GeneratedContent {
            name: "uniform.ppm".into(),
            mime_type: "image/x-portable-pixmap".into(),
            data: encode_ppm(IMAGE_WIDTH, IMAGE_HEIGHT, &rgb),
            metadata: Some(json!({ "width": IMAGE_WIDTH, "height": IMAGE_HEIGHT })),
        })
    }
}

/// Camera peripheral. Exclusivity is the caller's business, see
/// [`crate::controller::CommandController`].
pub struct Camera {
    name: String,
    generator: Arc<dyn ContentGenerator>,
    publisher: DataPublisher,
}

impl Camera {
    pub fn new(
        name: impl Into<String>,
        generator: Arc<dyn ContentGenerator>,
        publisher: DataPublisher,
    ) -> Self {
        Self {
            name: name.into(),
            generator,
            publisher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Produce the content for `command`, publish it and return it.
    pub async fn capture(&self, command: &Value) -> Result<CommandResult> {
        let command = command
            .as_str()
            .ok_or_else(|| CommandError::NotAString(command.to_string()))?
            .to_string();

        let generator = Arc::clone(&self.generator);
        let requested = command.clone();
        let content = tokio::task::spawn_blocking(move || generator.generate(&requested))
            .await?
            .ok_or_else(|| CommandError::Unknown(command.clone()))?;

        let media = Media::new(
            &self.name,
            &content.name,
            &content.mime_type,
            content.data,
            content.metadata,
        );
        debug!(peripheral = %self.name, %command, bytes = media.data.len(), "captured");
        self.publisher.publish(PeripheralData::Media(media.clone()));
        Ok(CommandResult::with_media(media))
    }
}

#[async_trait]
impl CommandHandler for Camera {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, command: &Value) -> Result<CommandResult> {
        self.capture(command).await
    }
}
