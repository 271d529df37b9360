use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output aspect ratio requested for every generation.
pub const OUTPUT_ASPECT_RATIO: &str = "3:4";

/// Maximum number of results kept in the session history.
pub const HISTORY_LIMIT: usize = 15;

pub const SCENARIO_PRESETS: &[&str] = &[
    "Industrial Loft NY",
    "Sunset Beach",
    "Cyberpunk Tokyo",
    "European Studio",
    "Monaco Luxury",
    "Paris in Autumn",
    "Futuristic Lab",
    "Sahara Desert",
    "Japanese Garden",
    "Rooftop Party",
    "Royal Palace",
    "Urban Graffiti",
    "Misty Forest",
    "Arctic Ice",
    "Sci-Fi Space Station",
    "Ancient Library",
    "Provence Lavender Fields",
    "Future Mall",
    "Rock Concert",
    "Mediterranean Yacht",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Angle {
    #[default]
    Front,
    Back,
    RightSide,
    LeftSide,
    Lowered,
    Leaning,
}

impl Angle {
    pub const ALL: [Angle; 6] = [
        Angle::Front,
        Angle::Back,
        Angle::RightSide,
        Angle::LeftSide,
        Angle::Lowered,
        Angle::Leaning,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Angle::Front => "front",
            Angle::Back => "back",
            Angle::RightSide => "right-side",
            Angle::LeftSide => "left-side",
            Angle::Lowered => "lowered",
            Angle::Leaning => "leaning",
        }
    }

    /// Parses a user-facing angle token. Separators and case are ignored.
    pub fn from_token(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|ch| !matches!(ch, '-' | '_' | ' '))
            .map(|ch| ch.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "front" => Some(Angle::Front),
            "back" => Some(Angle::Back),
            "rightside" | "right" => Some(Angle::RightSide),
            "leftside" | "left" => Some(Angle::LeftSide),
            "lowered" => Some(Angle::Lowered),
            "leaning" => Some(Angle::Leaning),
            _ => None,
        }
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    #[default]
    Standard,
    Enhanced,
}

impl QualityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::Standard => "standard",
            QualityTier::Enhanced => "enhanced",
        }
    }

    pub fn from_token(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standard" | "std" | "hd" => Some(QualityTier::Standard),
            "enhanced" | "pro" | "ultra" | "4k" => Some(QualityTier::Enhanced),
            _ => None,
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two independent generation outputs of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Primary,
    FlatLay,
}

impl Slot {
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Primary => "primary",
            Slot::FlatLay => "flat_lay",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingCredential,
    CredentialRejected,
    RemoteRejected,
    RemoteUnavailable,
    NoImageInResponse,
    EncodingError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MissingCredential => "missing_credential",
            ErrorKind::CredentialRejected => "credential_rejected",
            ErrorKind::RemoteRejected => "remote_rejected",
            ErrorKind::RemoteUnavailable => "remote_unavailable",
            ErrorKind::NoImageInResponse => "no_image_in_response",
            ErrorKind::EncodingError => "encoding_error",
        }
    }

    /// True when the user has to fix something outside the app; retrying is pointless.
    pub fn requires_configuration(self) -> bool {
        matches!(self, ErrorKind::MissingCredential)
    }

    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::MissingCredential => {
                "Configuration required: no API credential found. Set API_KEY (or GEMINI_API_KEY) in the environment."
            }
            ErrorKind::CredentialRejected => {
                "The selected credential cannot be used for this quality tier. Select another key."
            }
            ErrorKind::RemoteRejected => {
                "Invalid key: the API key is not valid or lacks permission for this model."
            }
            ErrorKind::RemoteUnavailable => {
                "Connection or quota error: the service may be overloaded or the quota is exhausted. Try again shortly or use the Standard tier."
            }
            ErrorKind::NoImageInResponse => {
                "The model answered without an image. Try again or adjust the photos."
            }
            ErrorKind::EncodingError => "The selected image could not be read. Choose the file again.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of the image encoder or the generation client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
