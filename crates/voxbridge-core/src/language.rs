//! The supported natural-language set.
//!
//! A participant speaks and listens in exactly one of these languages for
//! the whole call (single-language-per-user rule). Language auto-detection
//! is out of scope; the code arrives with the participant metadata.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::VoiceId;

/// Languages carried by the translation core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Hebrew.
    He,
    /// English.
    En,
    /// Russian.
    Ru,
}

impl Language {
    /// BCP-47-ish two-letter code used on the wire and in adapter calls.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::He => "he",
            Self::En => "en",
            Self::Ru => "ru",
        }
    }

    /// Parse a two-letter code; `None` for anything outside the supported set.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "he" => Some(Self::He),
            "en" => Some(Self::En),
            "ru" => Some(Self::Ru),
            _ => None,
        }
    }

    /// Synthesizer voice used for listeners without a cloned voice of their own.
    #[must_use]
    pub fn default_voice(self) -> VoiceId {
        match self {
            Self::He => VoiceId::new("he_default"),
            Self::En => VoiceId::new("en_default"),
            Self::Ru => VoiceId::new("ru_default"),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
