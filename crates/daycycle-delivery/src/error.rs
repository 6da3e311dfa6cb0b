//! Error types for the delivery module.

use std::time::Duration;

use thiserror::Error;

use daycycle_ipc::{DeliveryMode, FaultKind};

/// The declared sources cannot be played at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// Neither a manifest nor a complete segment set was declared.
    #[error("No playable source available")]
    NoPlayableSource,

    /// A segmented mode was requested but its file set is missing.
    #[error("No segment set declared for {0}")]
    MissingSegments(DeliveryMode),

    /// A segment set lacks one of its keys.
    #[error("Segment set for {mode} is missing {key}")]
    MissingPart { mode: DeliveryMode, key: String },

    /// The mode has no parts.
    #[error("Mode {0} is not segmented")]
    NotSegmented(DeliveryMode),
}

/// Failures reported while delivering the broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network hiccup, recovered in place.
    #[error("Transient delivery error: {0}")]
    TransientDelivery(String),

    /// Decode glitch, one in-place recovery per report.
    #[error("Recoverable media error: {0}")]
    RecoverableMedia(String),

    /// The runtime cannot decode the stream.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Anything else the backend gave up on.
    #[error("Fatal delivery error: {0}")]
    FatalDelivery(String),

    /// A transient error was not followed by a ready signal in time.
    #[error("No ready signal within {0:?} of reload")]
    RecoveryWindowExpired(Duration),
}

impl DeliveryError {
    /// Classify a backend failure.
    ///
    /// Returns `None` for non-fatal failures of unknown kind, which the
    /// backend handles on its own.
    pub fn classify(kind: FaultKind, detail: &str, fatal: bool) -> Option<Self> {
        let detail = detail.to_string();
        match kind {
            FaultKind::Network => Some(Self::TransientDelivery(detail)),
            FaultKind::Media => Some(Self::RecoverableMedia(detail)),
            FaultKind::UnsupportedCodec => Some(Self::UnsupportedFormat(detail)),
            FaultKind::Other if fatal => Some(Self::FatalDelivery(detail)),
            FaultKind::Other => None,
        }
    }

    /// Whether the error ends the continuous path.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_) | Self::FatalDelivery(_) | Self::RecoveryWindowExpired(_)
        )
    }
}

/// Errors returned by the playback surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    /// `play()` was refused, usually by an autoplay policy.
    #[error("Playback rejected: {0}")]
    PlayRejected(String),

    /// The surface refused to change position.
    #[error("Seek refused: {0}")]
    SeekRefused(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let network = DeliveryError::classify(FaultKind::Network, "timeout", true).unwrap();
        assert!(matches!(network, DeliveryError::TransientDelivery(_)));
        assert!(!network.is_fatal());

        let media = DeliveryError::classify(FaultKind::Media, "bad frame", true).unwrap();
        assert!(matches!(media, DeliveryError::RecoverableMedia(_)));
        assert!(!media.is_fatal());

        let codec = DeliveryError::classify(FaultKind::UnsupportedCodec, "ac-4", false).unwrap();
        assert!(codec.is_fatal());

        let other = DeliveryError::classify(FaultKind::Other, "key system", true).unwrap();
        assert!(matches!(other, DeliveryError::FatalDelivery(_)));

        assert_eq!(DeliveryError::classify(FaultKind::Other, "stall", false), None);
    }
}
