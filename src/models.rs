//! Domain types shared by the pipeline, the analysis engine and the
//! session collaborator.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Requests
// ═══════════════════════════════════════════════════════════

/// A single numbered request extracted from a discovery document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: u32,
    /// Request number as printed ("1", "12", "3.a").
    pub number: String,
    pub text: String,
    #[serde(default)]
    pub raw_text: String,

    // Suggestions (filled by analysis)
    #[serde(default)]
    pub suggested_objections: Vec<String>,
    #[serde(default)]
    pub suggested_documents: Vec<String>,
    #[serde(default)]
    pub objection_reasoning: BTreeMap<String, String>,
    #[serde(default)]
    pub objection_arguments: BTreeMap<String, String>,
    #[serde(default)]
    pub ai_notes: String,

    // User selections (pre-filled from suggestions)
    #[serde(default)]
    pub selected_objections: Vec<String>,
    #[serde(default)]
    pub selected_documents: Vec<String>,
    #[serde(default)]
    pub user_notes: String,
    #[serde(default = "default_include")]
    pub include_in_response: bool,
}

fn default_include() -> bool {
    true
}

impl RequestRecord {
    pub fn new(id: u32, number: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id,
            number: number.into(),
            raw_text: text.clone(),
            text,
            suggested_objections: Vec::new(),
            suggested_documents: Vec::new(),
            objection_reasoning: BTreeMap::new(),
            objection_arguments: BTreeMap::new(),
            ai_notes: String::new(),
            selected_objections: Vec::new(),
            selected_documents: Vec::new(),
            user_notes: String::new(),
            include_in_response: true,
        }
    }

    /// Copy an analysis entry into the suggestion fields and pre-fill the
    /// selections from it. User notes and inclusion are left alone.
    pub fn apply_analysis(&mut self, entry: &AnalysisEntry) {
        self.suggested_objections = entry.objections.clone();
        self.suggested_documents = entry.documents.clone();
        self.objection_reasoning = entry.reasoning.clone();
        self.objection_arguments = entry.arguments.clone();
        self.ai_notes = entry.notes.clone();
        self.selected_objections = entry.objections.clone();
        self.selected_documents = entry.documents.clone();
    }
}

/// A request as returned by record extraction, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRequest {
    pub number: String,
    pub text: String,
    /// Header plus body as found in the document, when the parser kept it.
    #[serde(default)]
    pub raw_text: String,
}

impl ExtractedRequest {
    pub fn new(number: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            text: text.into(),
            raw_text: String::new(),
        }
    }

    pub fn into_record(self, id: u32) -> RequestRecord {
        let raw_text = if self.raw_text.is_empty() {
            self.text.clone()
        } else {
            self.raw_text
        };
        RequestRecord {
            raw_text,
            ..RequestRecord::new(id, self.number, self.text)
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Supporting documents and objections
// ═══════════════════════════════════════════════════════════

/// A responsive document the analysis may point at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub bates_start: Option<String>,
    #[serde(default)]
    pub bates_end: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// An objection definition from a preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectionDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    pub formal_language: String,
    #[serde(default)]
    pub argument_template: String,
}

// ═══════════════════════════════════════════════════════════
// Analysis results
// ═══════════════════════════════════════════════════════════

/// Where an analysis entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    #[default]
    Ai,
    Fallback,
}

/// Suggested objections and documents for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalysisEntry {
    #[serde(default)]
    pub objections: Vec<String>,
    #[serde(default, alias = "objection_reasoning")]
    pub reasoning: BTreeMap<String, String>,
    #[serde(default, alias = "objection_arguments")]
    pub arguments: BTreeMap<String, String>,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub source: EntrySource,
}

impl AnalysisEntry {
    pub fn is_fallback(&self) -> bool {
        self.source == EntrySource::Fallback
    }
}

/// Analysis keyed by request number.
pub type AnalysisMap = HashMap<String, AnalysisEntry>;

/// Number of entries in `map` that came from local fallback.
pub fn fallback_count(map: &AnalysisMap) -> usize {
    map.values().filter(|e| e.is_fallback()).count()
}

// ═══════════════════════════════════════════════════════════
// Caption metadata
// ═══════════════════════════════════════════════════════════

/// Caption and header information derived from a document's first pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseMetadata {
    pub court_name: String,
    pub header_plaintiffs: String,
    pub header_defendants: String,
    pub case_no: String,
    pub propounding_party: String,
    pub responding_party: String,
    pub set_number: String,
    pub document_title: String,
    pub filename: String,
    pub multiple_plaintiffs: bool,
    pub multiple_defendants: bool,
    pub multiple_propounding_parties: bool,
    pub multiple_responding_parties: bool,
}

impl Default for CaseMetadata {
    fn default() -> Self {
        Self {
            court_name: String::new(),
            header_plaintiffs: "PLAINTIFF".into(),
            header_defendants: "DEFENDANT".into(),
            case_no: String::new(),
            propounding_party: "Defendant".into(),
            responding_party: "Plaintiff".into(),
            set_number: "ONE".into(),
            document_title: String::new(),
            filename: String::new(),
            multiple_plaintiffs: false,
            multiple_defendants: false,
            multiple_propounding_parties: false,
            multiple_responding_parties: false,
        }
    }
}

impl CaseMetadata {
    /// Fill in a title and filename derived from the parties when the
    /// extractor left them blank.
    pub fn with_derived_titles(mut self) -> Self {
        let responding = self.responding_party.to_uppercase();
        let propounding = self.propounding_party.to_uppercase();
        if self.document_title.trim().is_empty() {
            self.document_title = format!(
                "{responding}'S RESPONSES TO {propounding}'S {} SET OF REQUESTS FOR PRODUCTION OF DOCUMENTS",
                self.set_number
            );
        }
        if self.filename.trim().is_empty() {
            self.filename = format!("{responding} RESPONSES TO {propounding} RFP SET {}", self.set_number);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════

/// The working state of one response being prepared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub source_filename: String,
    #[serde(default)]
    pub records: Vec<RequestRecord>,
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
    #[serde(default)]
    pub analysis_complete: bool,
    #[serde(default)]
    pub analysis_error: Option<String>,
    #[serde(default = "default_preset")]
    pub objection_preset_id: String,
    #[serde(default)]
    pub metadata: Option<CaseMetadata>,
    pub updated_at: DateTime<Utc>,
}

fn default_preset() -> String {
    "default".into()
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_filename: String::new(),
            records: Vec::new(),
            documents: Vec::new(),
            analysis_complete: false,
            analysis_error: None,
            objection_preset_id: default_preset(),
            metadata: None,
            updated_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Apply an analysis to every record that has an entry. Records are
    /// matched by number first, then by id.
    pub fn apply_analysis(&mut self, analysis: &AnalysisMap) -> usize {
        let mut applied = 0;
        for record in &mut self.records {
            let entry = analysis
                .get(&record.number)
                .or_else(|| analysis.get(&record.id.to_string()));
            if let Some(entry) = entry {
                record.apply_analysis(entry);
                applied += 1;
            }
        }
        applied
    }
}
