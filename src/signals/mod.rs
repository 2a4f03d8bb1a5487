// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Voice-activity signals fed into the scheduler by an upstream VAD front-end.

pub mod classifier;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use classifier::{SignalClassifier, SignalDecision};

/// Errors for signals that cannot be interpreted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalError {
    #[error("confidence {0} is not within [0, 1]")]
    InvalidConfidence(f64),
    #[error("audio level {0} is not a finite, non-negative number")]
    InvalidAudioLevel(f64),
}

/// Classification of one audio segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    VoiceStart,
    VoiceContinuous,
    VoiceEnd,
    SilenceDetected,
    NoiseDetected,
}

impl SignalKind {
    /// `true` for kinds that mean the user is talking.
    pub fn is_voice(self) -> bool {
        matches!(self, Self::VoiceStart | Self::VoiceContinuous)
    }

    /// `true` for kinds that mean the user stopped talking.
    pub fn is_silence(self) -> bool {
        matches!(self, Self::VoiceEnd | Self::SilenceDetected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VoiceStart => "voice_start",
            Self::VoiceContinuous => "voice_continuous",
            Self::VoiceEnd => "voice_end",
            Self::SilenceDetected => "silence_detected",
            Self::NoiseDetected => "noise_detected",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timestamped, confidence-scored voice-activity signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSignal {
    pub kind: SignalKind,
    /// Capture time in milliseconds on the front-end's clock.
    pub timestamp_ms: u64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_level: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl VoiceSignal {
    pub fn new(kind: SignalKind, timestamp_ms: u64, confidence: f64) -> Self {
        Self {
            kind,
            timestamp_ms,
            confidence,
            duration_ms: None,
            audio_level: None,
            metadata: HashMap::new(),
        }
    }

    pub fn voice_start(timestamp_ms: u64, confidence: f64) -> Self {
        Self::new(SignalKind::VoiceStart, timestamp_ms, confidence)
    }

    pub fn voice_continuous(timestamp_ms: u64, confidence: f64) -> Self {
        Self::new(SignalKind::VoiceContinuous, timestamp_ms, confidence)
    }

    pub fn voice_end(timestamp_ms: u64, confidence: f64) -> Self {
        Self::new(SignalKind::VoiceEnd, timestamp_ms, confidence)
    }

    pub fn silence(timestamp_ms: u64, confidence: f64) -> Self {
        Self::new(SignalKind::SilenceDetected, timestamp_ms, confidence)
    }

    pub fn noise(timestamp_ms: u64, confidence: f64, audio_level: f64) -> Self {
        Self::new(SignalKind::NoiseDetected, timestamp_ms, confidence).with_audio_level(audio_level)
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_audio_level(mut self, audio_level: f64) -> Self {
        self.audio_level = Some(audio_level);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Reject signals whose numeric fields cannot be interpreted.
    pub fn validate(&self) -> Result<(), SignalError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(SignalError::InvalidConfidence(self.confidence));
        }
        if let Some(level) = self.audio_level {
            if !level.is_finite() || level < 0.0 {
                return Err(SignalError::InvalidAudioLevel(level));
            }
        }
        Ok(())
    }
}
