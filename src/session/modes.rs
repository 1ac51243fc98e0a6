//! Preset conversation modes.
//!
//! A closed set: each mode bundles a system prompt with sampling parameters.
//! Unknown ids are rejected with the list of valid ones.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TallyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Default,
    Concise,
    Creative,
    Technical,
    Tutor,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::Default,
        Mode::Concise,
        Mode::Creative,
        Mode::Technical,
        Mode::Tutor,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Mode::Default => "default",
            Mode::Concise => "concise",
            Mode::Creative => "creative",
            Mode::Technical => "technical",
            Mode::Tutor => "tutor",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mode::Default => "Balanced general assistant",
            Mode::Concise => "Short, direct answers",
            Mode::Creative => "Imaginative writing partner",
            Mode::Technical => "Precise technical expert",
            Mode::Tutor => "Patient step-by-step teacher",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Mode::Default => "You are a helpful, friendly assistant.",
            Mode::Concise => {
                "You are a concise assistant. Answer in as few words as possible without losing accuracy."
            }
            Mode::Creative => {
                "You are a creative writing partner. Be imaginative, vivid and playful."
            }
            Mode::Technical => {
                "You are a senior software engineer. Give precise, technically rigorous answers with code where useful."
            }
            Mode::Tutor => {
                "You are a patient tutor. Explain step by step and check understanding with short questions."
            }
        }
    }

    pub fn temperature(&self) -> f64 {
        match self {
            Mode::Default => 0.7,
            Mode::Concise => 0.3,
            Mode::Creative => 1.0,
            Mode::Technical => 0.2,
            Mode::Tutor => 0.5,
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            Mode::Default => 1024,
            Mode::Concise => 256,
            Mode::Creative => 2048,
            Mode::Technical => 2048,
            Mode::Tutor => 1536,
        }
    }

    pub fn ids() -> Vec<&'static str> {
        Self::ALL.iter().map(Mode::id).collect()
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Mode {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.id() == wanted)
            .ok_or_else(|| TallyError::UnknownMode {
                requested: s.to_string(),
                valid: Self::ids(),
            })
    }
}
