//! Cue file model: timed cue data attached to a piece of media.
//!
//! The protocol layer treats cue files as opaque payloads addressed by
//! content hash. The model is typed so that files read from disk are
//! validated before they are ever served.

use serde::{Deserialize, Serialize};

/// A complete cue file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CueFile {
    pub length_millis: f64,
    pub layers: Vec<AnyLayer>,
}

/// Any of the supported layer kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnyLayer {
    Percussion(Layer<PercussionSettings>),
    Tones(Layer<()>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer<Settings> {
    pub settings: Settings,
    pub events: Vec<CueFileEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercussionSettings {
    /// Default length for a percussion event.
    pub default_length_millis: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CueFileEvent {
    pub timestamp_millis: f64,
    pub states: Vec<CueFileEventState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CueFileEventState {
    pub millis_delta: f64,
    pub values: BasicEventStateValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasicEventStateValues {
    pub amplitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
}

impl CueFile {
    /// An empty file of the given length.
    pub fn empty(length_millis: f64) -> Self {
        Self {
            length_millis,
            layers: Vec::new(),
        }
    }

    /// Content hash: hex BLAKE3 of the file's JSON encoding.
    pub fn content_hash(&self) -> String {
        // Serializing plain data with string keys cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

/// Prepare a file for consumption: events are sorted by timestamp and
/// percussion events without explicit states get an attack at 0 and a
/// release after the layer's default length.
pub fn prepare_file(file: CueFile) -> CueFile {
    CueFile {
        length_millis: file.length_millis,
        layers: file.layers.into_iter().map(prepare_layer).collect(),
    }
}

fn prepare_layer(layer: AnyLayer) -> AnyLayer {
    match layer {
        AnyLayer::Percussion(mut layer) => {
            let defaults = [
                CueFileEventState {
                    millis_delta: 0.0,
                    values: BasicEventStateValues { amplitude: 1.0, pitch: None },
                },
                CueFileEventState {
                    millis_delta: layer.settings.default_length_millis,
                    values: BasicEventStateValues { amplitude: 0.0, pitch: None },
                },
            ];
            for event in &mut layer.events {
                if event.states.is_empty() {
                    event.states = defaults.to_vec();
                }
            }
            sort_events(&mut layer.events);
            AnyLayer::Percussion(layer)
        }
        AnyLayer::Tones(mut layer) => {
            sort_events(&mut layer.events);
            AnyLayer::Tones(layer)
        }
    }
}

fn sort_events(events: &mut [CueFileEvent]) {
    events.sort_by(|a, b| a.timestamp_millis.total_cmp(&b.timestamp_millis));
}
