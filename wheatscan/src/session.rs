//! Session state for one image at a time, as immutable snapshots driven by discrete events.
//!
//! Submitting an image issues a fresh [`RequestToken`]. A response carrying any other
//! token is stale (the user moved on to another image) and is dropped.

use log::{debug, warn};
use std::path::PathBuf;

use crate::api::DetectionResponse;
use crate::detection::{DetectionSet, Sensitivity};
use crate::metrics::{recompute, Metrics};

/// Identifies one in-flight detection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Hands out strictly increasing tokens.
#[derive(Debug, Default)]
pub struct TokenIssuer {
    next: u64,
}

impl TokenIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self) -> RequestToken {
        self.next += 1;
        RequestToken(self.next)
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    ImageSelected { path: PathBuf, token: RequestToken },
    SensitivityChanged(Sensitivity),
    DetectionSucceeded {
        token: RequestToken,
        response: DetectionResponse,
    },
    DetectionFailed { token: RequestToken, error: String },
    Reset,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub image: Option<PathBuf>,
    pub sensitivity: Sensitivity,
    pub loading: bool,
    pub pending: Option<RequestToken>,
    pub result: Option<DetectionResponse>,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new(sensitivity: Sensitivity) -> Self {
        Self {
            sensitivity,
            ..Self::default()
        }
    }

    pub fn threshold(&self) -> f64 {
        self.sensitivity.confidence_threshold()
    }

    pub fn detections(&self) -> Option<&DetectionSet> {
        self.result.as_ref().map(|r| &r.detections)
    }

    /// Metrics for the current threshold, `None` until a response has arrived.
    pub fn metrics(&self) -> Option<Metrics> {
        self.result
            .as_ref()
            .map(|r| recompute(&r.detections, self.threshold(), &r.server))
    }

    /// Produce the next snapshot. `self` is left untouched.
    pub fn apply(&self, event: SessionEvent) -> SessionState {
        match event {
            SessionEvent::ImageSelected { path, token } => SessionState {
                image: Some(path),
                sensitivity: self.sensitivity,
                loading: true,
                pending: Some(token),
                result: None,
                last_error: None,
            },
            SessionEvent::SensitivityChanged(sensitivity) => SessionState {
                sensitivity,
                ..self.clone()
            },
            SessionEvent::DetectionSucceeded { token, response } => {
                if !self.is_pending(token) {
                    debug!("Discarding stale detection response #{}", token.value());
                    return self.clone();
                }
                SessionState {
                    loading: false,
                    pending: None,
                    result: Some(response),
                    last_error: None,
                    ..self.clone()
                }
            }
            SessionEvent::DetectionFailed { token, error } => {
                if !self.is_pending(token) {
                    debug!("Discarding stale detection failure #{}", token.value());
                    return self.clone();
                }
                warn!("Detection failed: {error}");
                SessionState {
                    loading: false,
                    pending: None,
                    result: None,
                    last_error: Some(error),
                    ..self.clone()
                }
            }
            SessionEvent::Reset => SessionState::new(self.sensitivity),
        }
    }

    fn is_pending(&self, token: RequestToken) -> bool {
        self.pending == Some(token)
    }
}
