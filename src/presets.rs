//! Objection presets: named sets of objection definitions handed to the
//! analysis backend.
//!
//! `BuiltinPresets` ships the standard set under the id `default`.
//! `DirectoryPresets` reads `<dir>/<preset_id>.json`, accepting either a bare
//! array of definitions or `{"objections": [...]}`, and falls through to the
//! built-in set for ids it has no file for.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::DEFAULT_PRESET_ID;
use crate::models::ObjectionDef;

#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("Preset not found: {0}")]
    NotFound(String),

    #[error("Invalid preset id: {0:?}")]
    InvalidId(String),

    #[error("I/O error reading preset: {0}")]
    Io(#[from] std::io::Error),

    #[error("Preset {preset_id} is not valid JSON: {source}")]
    Parse {
        preset_id: String,
        #[source]
        source: serde_json::Error,
    },
}

pub trait PresetProvider: Send + Sync {
    fn load(&self, preset_id: &str) -> Result<Vec<ObjectionDef>, PresetError>;
}

// ═══════════════════════════════════════════════════════════
// Built-in presets
// ═══════════════════════════════════════════════════════════

/// (id, name, short name, formal language, argument)
const DEFAULT_OBJECTIONS: &[(&str, &str, &str, &str, &str)] = &[
    (
        "vague",
        "Vague and Ambiguous",
        "Vague",
        "Responding Party objects to this request on the grounds that it is vague and ambiguous.",
        "The request uses undefined or open-ended terms, leaving Responding Party to guess at what is sought.",
    ),
    (
        "overbroad",
        "Overbroad",
        "Overbroad",
        "Responding Party objects to this request on the grounds that it is overbroad as to time and scope.",
        "The request is not limited to a reasonable time period or subject matter and sweeps in documents unrelated to the claims.",
    ),
    (
        "unduly_burdensome",
        "Unduly Burdensome",
        "Burdensome",
        "Responding Party objects to this request on the grounds that it is unduly burdensome and oppressive.",
        "Compliance would require a search whose cost is out of proportion to any likely benefit.",
    ),
    (
        "compound",
        "Compound",
        "Compound",
        "Responding Party objects to this request on the grounds that it is compound, conjunctive, or disjunctive.",
        "The request combines several distinct categories of documents into a single demand.",
    ),
    (
        "relevance",
        "Relevance",
        "Relevance",
        "Responding Party objects to this request on the grounds that it seeks documents that are neither relevant to the subject matter of this action nor reasonably calculated to lead to the discovery of admissible evidence.",
        "The documents sought have no bearing on any claim or defense in this action.",
    ),
    (
        "privilege",
        "Attorney-Client Privilege / Work Product",
        "Privilege",
        "Responding Party objects to this request to the extent it seeks documents protected by the attorney-client privilege or the attorney work product doctrine.",
        "The request reaches communications with counsel and materials prepared in anticipation of litigation.",
    ),
    (
        "privacy",
        "Privacy",
        "Privacy",
        "Responding Party objects to this request to the extent it seeks information protected by the right of privacy of Responding Party or third parties.",
        "The request seeks private financial, medical, or personal information without a showing of compelling need.",
    ),
];

/// The built-in `default` preset.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinPresets;

impl BuiltinPresets {
    pub fn default_objections() -> Vec<ObjectionDef> {
        DEFAULT_OBJECTIONS
            .iter()
            .map(|(id, name, short_name, formal, argument)| ObjectionDef {
                id: id.to_string(),
                name: name.to_string(),
                short_name: short_name.to_string(),
                formal_language: formal.to_string(),
                argument_template: argument.to_string(),
            })
            .collect()
    }
}

impl PresetProvider for BuiltinPresets {
    fn load(&self, preset_id: &str) -> Result<Vec<ObjectionDef>, PresetError> {
        if preset_id == DEFAULT_PRESET_ID {
            Ok(Self::default_objections())
        } else {
            Err(PresetError::NotFound(preset_id.to_string()))
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Directory presets
// ═══════════════════════════════════════════════════════════

#[derive(Deserialize)]
#[serde(untagged)]
enum PresetFile {
    Wrapped { objections: Vec<ObjectionDef> },
    Bare(Vec<ObjectionDef>),
}

impl PresetFile {
    fn into_objections(self) -> Vec<ObjectionDef> {
        match self {
            Self::Wrapped { objections } | Self::Bare(objections) => objections,
        }
    }
}

pub struct DirectoryPresets {
    dir: PathBuf,
}

impl DirectoryPresets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, preset_id: &str) -> Result<PathBuf, PresetError> {
        let valid = !preset_id.is_empty()
            && preset_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(PresetError::InvalidId(preset_id.to_string()));
        }
        Ok(self.dir.join(format!("{preset_id}.json")))
    }
}

impl PresetProvider for DirectoryPresets {
    fn load(&self, preset_id: &str) -> Result<Vec<ObjectionDef>, PresetError> {
        let path = self.path_for(preset_id)?;
        if !path.is_file() {
            tracing::debug!(preset_id, path = %path.display(), "No preset file, trying built-in");
            return BuiltinPresets.load(preset_id);
        }

        let raw = std::fs::read_to_string(&path)?;
        let parsed: PresetFile = serde_json::from_str(&raw).map_err(|source| PresetError::Parse {
            preset_id: preset_id.to_string(),
            source,
        })?;
        let objections = parsed.into_objections();
        tracing::info!(preset_id, count = objections.len(), "Loaded objection preset");
        Ok(objections)
    }
}
