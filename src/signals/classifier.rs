// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Signal classifier. Pure decision logic with no scheduler dependencies.
//!
//! Turns one [`VoiceSignal`] into an interrupt or resume decision. The
//! classifier keeps a small ring buffer of recently seen signals so it can
//! measure how long the user has been talking (or silent) without any clock of
//! its own: all durations are derived from signal timestamps, so the output is
//! deterministic for a given buffer and [`VadSensitivity`].

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::VadSensitivity;
use crate::signals::{SignalKind, VoiceSignal};

/// Number of recent signals kept for duration calculations.
pub const SIGNAL_BUFFER_SIZE: usize = 10;

/// Confidence reported when continuous voice forces an interruption.
const CONTINUOUS_VOICE_CONFIDENCE: f64 = 0.9;
/// Confidence reported when enough silence suggests resuming.
const SILENCE_RESUME_CONFIDENCE: f64 = 0.8;
/// Lower bound for dampened noise confidence.
const NOISE_CONFIDENCE_FLOOR: f64 = 0.3;
/// Multiplier applied to the confidence of loud noise.
const NOISE_DAMPENING: f64 = 0.7;

/// Result of classifying one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDecision {
    pub should_interrupt: bool,
    pub should_resume: bool,
    pub confidence: f64,
    pub reason: String,
}

impl SignalDecision {
    fn interrupt(confidence: f64, reason: &str) -> Self {
        Self {
            should_interrupt: true,
            should_resume: false,
            confidence,
            reason: reason.to_string(),
        }
    }

    fn resume(confidence: f64, reason: &str) -> Self {
        Self {
            should_interrupt: false,
            should_resume: true,
            confidence,
            reason: reason.to_string(),
        }
    }

    fn no_action(confidence: f64, reason: &str) -> Self {
        Self {
            should_interrupt: false,
            should_resume: false,
            confidence,
            reason: reason.to_string(),
        }
    }

    /// `true` when the decision asks for neither action.
    pub fn is_no_action(&self) -> bool {
        !self.should_interrupt && !self.should_resume
    }
}

/// Voice-activity classifier backed by a fixed-size signal buffer.
pub struct SignalClassifier {
    sensitivity: VadSensitivity,
    buffer: VecDeque<VoiceSignal>,
}

impl SignalClassifier {
    pub fn new(sensitivity: VadSensitivity) -> Self {
        Self {
            sensitivity,
            buffer: VecDeque::with_capacity(SIGNAL_BUFFER_SIZE),
        }
    }

    /// Classify `signal`, recording it in the buffer first.
    pub fn classify(&mut self, signal: &VoiceSignal) -> SignalDecision {
        if self.buffer.len() == SIGNAL_BUFFER_SIZE {
            self.buffer.pop_front();
        }
        self.buffer.push_back(signal.clone());

        match signal.kind {
            SignalKind::VoiceStart => {
                if signal.confidence >= self.sensitivity.voice_threshold {
                    SignalDecision::interrupt(signal.confidence, "Voice activity detected")
                } else {
                    SignalDecision::no_action(signal.confidence, "Voice confidence below threshold")
                }
            }
            SignalKind::VoiceContinuous => {
                let duration = self.trailing_span(signal, SignalKind::is_voice);
                if duration > self.sensitivity.continuous_voice_timeout_ms {
                    SignalDecision::interrupt(
                        CONTINUOUS_VOICE_CONFIDENCE,
                        "Continuous voice timeout exceeded",
                    )
                } else {
                    SignalDecision::no_action(signal.confidence, "Continuous voice within timeout")
                }
            }
            SignalKind::VoiceEnd | SignalKind::SilenceDetected => {
                let span = self.trailing_span(signal, SignalKind::is_silence);
                let silence = span.max(signal.duration_ms.unwrap_or(0));
                if silence >= self.sensitivity.silence_timeout_ms {
                    SignalDecision::resume(SILENCE_RESUME_CONFIDENCE, "Sufficient silence detected")
                } else {
                    SignalDecision::no_action(signal.confidence, "Silence below timeout")
                }
            }
            SignalKind::NoiseDetected => {
                let level = signal.audio_level.unwrap_or(0.0);
                if level > self.sensitivity.noise_threshold {
                    let dampened = (signal.confidence * NOISE_DAMPENING).max(NOISE_CONFIDENCE_FLOOR);
                    SignalDecision::no_action(dampened, "Background noise detected")
                } else {
                    SignalDecision::no_action(signal.confidence, "Noise below threshold")
                }
            }
        }
    }

    /// Replace the thresholds. The buffer is kept.
    pub fn update_sensitivity(&mut self, sensitivity: VadSensitivity) {
        self.sensitivity = sensitivity;
    }

    pub fn sensitivity(&self) -> &VadSensitivity {
        &self.sensitivity
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Time covered by the run of buffered signals ending at `current` whose
    /// kinds all satisfy `in_run`.
    fn trailing_span(&self, current: &VoiceSignal, in_run: fn(SignalKind) -> bool) -> u64 {
        let run_start = self
            .buffer
            .iter()
            .rev()
            .take_while(|s| in_run(s.kind))
            .map(|s| s.timestamp_ms)
            .last()
            .unwrap_or(current.timestamp_ms);
        current.timestamp_ms.saturating_sub(run_start)
    }
}

impl Default for SignalClassifier {
    fn default() -> Self {
        Self::new(VadSensitivity::default())
    }
}

impl fmt::Debug for SignalClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalClassifier")
            .field("sensitivity", &self.sensitivity)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
