use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// One reading of one physical quantity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    pub id: Uuid,
    pub peripheral: String,
    pub quantity: String,
    pub unit: String,
    pub value: f64,
    pub datetime: DateTime<Utc>,
}

impl Measurement {
    pub fn new(peripheral: &str, quantity: &str, unit: &str, value: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            peripheral: peripheral.to_string(),
            quantity: quantity.to_string(),
            unit: unit.to_string(),
            value,
            datetime: Utc::now(),
        }
    }
}

/// Measurements of one quantity folded over an aggregation window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateMeasurement {
    pub id: Uuid,
    pub peripheral: String,
    pub quantity: String,
    pub unit: String,
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: DateTime<Utc>,
}

/// A binary artefact produced by a peripheral
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Media {
    pub id: Uuid,
    pub peripheral: String,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub metadata: Option<serde_json::Value>,
    pub datetime: DateTime<Utc>,
}

impl Media {
    pub fn new(
        peripheral: &str,
        name: &str,
        mime_type: &str,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peripheral: peripheral.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            data,
            metadata,
            datetime: Utc::now(),
        }
    }
}

/// Outcome of a peripheral command. Empty when the command did nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandResult {
    pub media: Option<Media>,
}

impl CommandResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_media(media: Media) -> Self {
        Self { media: Some(media) }
    }

    pub fn is_empty(&self) -> bool {
        self.media.is_none()
    }
}

/// A peripheral that accepts commands producing a [`CommandResult`]
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, command: &serde_json::Value) -> Result<CommandResult>;
}

/// Everything a peripheral can hand to the rest of the kit
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralData {
    Measurement(Measurement),
    Aggregate(AggregateMeasurement),
    Media(Media),
}

/// Sending side of the kit's data stream.
///
/// Publishing never fails the caller: if nobody listens any more the data is
/// dropped with a warning.
#[derive(Debug, Clone)]
pub struct DataPublisher {
    tx: mpsc::UnboundedSender<PeripheralData>,
}

impl DataPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PeripheralData>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, data: PeripheralData) {
        if self.tx.send(data).is_err() {
            warn!("data stream closed, dropping peripheral data");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_emptiness() {
        assert!(CommandResult::empty().is_empty());
        let media = Media::new("camera", "uniform.ppm", "image/x-portable-pixmap", vec![1, 2], None);
        assert!(!CommandResult::with_media(media).is_empty());
    }

    #[tokio::test]
    async fn test_publish_after_receiver_dropped_does_not_panic() {
        let (publisher, rx) = DataPublisher::channel();
        drop(rx);
        publisher.publish(PeripheralData::Measurement(Measurement::new(
            "t", "Temperature", "Degrees Celsius", 20.0,
        )));
    }
}
