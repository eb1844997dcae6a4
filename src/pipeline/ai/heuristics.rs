//! Local, network-free substitutes for the remote backend: keyword-based
//! objection analysis, a pattern parser for numbered requests, and a regex
//! caption reader.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use super::types::AnalysisContext;
use crate::models::{AnalysisEntry, AnalysisMap, CaseMetadata, EntrySource, ExtractedRequest, RequestRecord};

// ═══════════════════════════════════════════════════════════
// Fallback analysis
// ═══════════════════════════════════════════════════════════

/// Objection id → phrases that suggest it. Relevance has no reliable signal.
const OBJECTION_KEYWORDS: &[(&str, &[&str])] = &[
    ("vague", &["any", "all", "relating to", "concerning", "regarding"]),
    ("overbroad", &["all", "any and all", "each and every", "whatsoever"]),
    ("unduly_burdensome", &["all", "any and all", "every"]),
    ("compound", &["and/or", " and ", "including but not limited to"]),
    ("relevance", &[]),
];

const FALLBACK_NOTES: &str = "Analysis performed using keyword matching (AI service not available).";
const DEFAULT_ARGUMENT: &str = "This objection applies to the request as written.";

/// Keyword analysis for `records`. Always returns exactly one entry per
/// record, keyed by request number, each marked as fallback output.
pub fn fallback_analysis(records: &[RequestRecord], context: &AnalysisContext) -> AnalysisMap {
    let known: HashSet<&str> = context.objections.iter().map(|o| o.id.as_str()).collect();

    records
        .iter()
        .map(|record| {
            let text = record.text.to_lowercase();

            let objections: Vec<String> = OBJECTION_KEYWORDS
                .iter()
                .filter(|(id, _)| known.is_empty() || known.contains(id))
                .filter(|(_, keywords)| keywords.iter().any(|kw| text.contains(kw)))
                .map(|(id, _)| id.to_string())
                .collect();

            let words: HashSet<&str> = text.split_whitespace().filter(|w| w.chars().count() > 4).collect();
            let documents: Vec<String> = context
                .documents
                .iter()
                .filter(|doc| {
                    let name = doc.filename.to_lowercase();
                    let description = doc.description.to_lowercase();
                    words.iter().any(|w| name.contains(w) || description.contains(w))
                })
                .map(|doc| doc.id.clone())
                .collect();

            let mut reasoning = BTreeMap::new();
            let mut arguments = BTreeMap::new();
            for objection in &context.objections {
                let why = if objections.contains(&objection.id) {
                    "Keywords in the request suggest this objection may apply."
                } else {
                    "No clear indicators that this objection applies."
                };
                reasoning.insert(objection.id.clone(), why.to_string());
                let argument = if objection.argument_template.is_empty() {
                    DEFAULT_ARGUMENT
                } else {
                    objection.argument_template.as_str()
                };
                arguments.insert(objection.id.clone(), argument.to_string());
            }

            let entry = AnalysisEntry {
                objections,
                reasoning,
                arguments,
                documents,
                notes: FALLBACK_NOTES.to_string(),
                source: EntrySource::Fallback,
            };
            (record.number.clone(), entry)
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Request parser
// ═══════════════════════════════════════════════════════════

/// Header patterns tried in order. The first one matching at least twice wins.
static REQUEST_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?im)REQUEST\s+(?:FOR\s+PRODUCTION\s+)?(?:OF\s+DOCUMENTS\s+)?(?:NO\.?|NUMBER|#)\s*(\d+)\s*[:.]?\s*",
        r"(?im)REQUEST\s+(?:NO\.?|NUMBER|#)\s*(\d+)\s*[:.]?\s*",
        r"(?im)RFP\s+(?:NO\.?|NUMBER|#)\s*(\d+)\s*[:.]?\s*",
        r"(?im)DEMAND\s+(?:NO\.?|NUMBER|#)\s*(\d+)\s*[:.]?\s*",
        r"(?im)INTERROGATORY\s+(?:NO\.?|NUMBER|#)\s*(\d+)\s*[:.]?\s*",
        r"(?im)^\s*(\d+)\.\s+",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static PAGE_FOOTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Page\s+\d+\s+of\s+\d+").unwrap());
static TRAILING_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[?\d+\]?\s*$").unwrap());
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());

const MIN_REQUEST_CHARS: usize = 10;
const MIN_PARAGRAPH_CHARS: usize = 20;
const PARAGRAPH_KEYWORDS: &[&str] = &["produce", "document", "relating to", "concerning", "regarding"];

/// Split document text into numbered requests without the remote backend.
pub fn parse_requests(text: &str) -> Vec<ExtractedRequest> {
    for pattern in REQUEST_PATTERNS.iter() {
        let headers: Vec<_> = pattern.captures_iter(text).collect();
        if headers.len() < 2 {
            continue;
        }

        let mut requests = Vec::new();
        for (i, caps) in headers.iter().enumerate() {
            let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let end = headers
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(text.len(), |m| m.start());

            let body = clean_request_text(&text[whole.end()..end]);
            if body.chars().count() < MIN_REQUEST_CHARS {
                continue;
            }
            requests.push(ExtractedRequest {
                number: number.as_str().to_string(),
                text: body,
                raw_text: text[whole.start()..end].trim().to_string(),
            });
        }

        if !requests.is_empty() {
            return requests;
        }
    }

    paragraph_requests(text)
}

/// Last resort: paragraphs that read like document requests, numbered in order.
fn paragraph_requests(text: &str) -> Vec<ExtractedRequest> {
    PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| p.chars().count() >= MIN_PARAGRAPH_CHARS)
        .filter(|p| {
            let lower = p.to_lowercase();
            PARAGRAPH_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .enumerate()
        .map(|(i, p)| ExtractedRequest {
            number: (i + 1).to_string(),
            text: clean_request_text(p),
            raw_text: p.to_string(),
        })
        .collect()
}

/// Drop page footers, collapse whitespace, strip trailing reference numbers.
pub fn clean_request_text(text: &str) -> String {
    let text = PAGE_FOOTER.replace_all(text, "");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = TRAILING_REF.replace(&text, "");
    text.trim().to_string()
}

// ═══════════════════════════════════════════════════════════
// Caption reader
// ═══════════════════════════════════════════════════════════

static CASE_NO_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)CASE\s*(?:NO\.?|NUMBER|#)[:\s]*([A-Z0-9\-:]+)",
        r"(?i)(?:NO\.?|NUMBER|#)[:\s]*([A-Z]{1,3}\d{5,})",
        r"(\d+:\d+-[A-Za-z]+-\d+-[A-Z]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

// Court names and party lists stop at the end of their line.
static COURT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(SUPERIOR\s+COURT\s+OF\s+[A-Z \t,]+)",
        r"(UNITED\s+STATES\s+DISTRICT\s+COURT[A-Z \t,]+)",
        r"(CIRCUIT\s+COURT\s+OF\s+[A-Z \t,]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static CAPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Z][A-Za-z \t,.]+?)\s+(?:vs\.?|v\.)\s+([A-Z][A-Za-z \t,.]+?)(?:\n|CASE|$)")
        .unwrap()
});

static SET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"SET\s+(?:NO\.?\s*)?(ONE|TWO|THREE|FOUR|FIVE|FIRST|SECOND|THIRD|FOURTH|FIFTH|\d+)",
        r"(FIRST|SECOND|THIRD|FOURTH|FIFTH)\s+SET",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const DEFAULT_COURT: &str = "Superior Court of California";

/// Best-effort caption data from the first page(s). Missing pieces keep
/// their defaults; the title and filename are always derived.
pub fn extract_case_metadata(text: &str) -> CaseMetadata {
    let mut meta = CaseMetadata {
        court_name: DEFAULT_COURT.to_string(),
        ..CaseMetadata::default()
    };
    let upper = text.to_uppercase();

    if let Some(case_no) = first_capture(&CASE_NO_PATTERNS, text) {
        meta.case_no = case_no;
    }
    if let Some(court) = first_capture(&COURT_PATTERNS, &upper) {
        meta.court_name = title_case(&court);
    }
    if let Some(caps) = CAPTION.captures(text) {
        if let (Some(p), Some(d)) = (caps.get(1), caps.get(2)) {
            meta.header_plaintiffs = p.as_str().trim().to_string();
            meta.header_defendants = d.as_str().trim().to_string();
        }
    }

    meta.multiple_plaintiffs = lists_several(&meta.header_plaintiffs);
    meta.multiple_defendants = lists_several(&meta.header_defendants);

    // Requests are assumed to run from the defendants to the plaintiffs
    meta.multiple_propounding_parties = meta.multiple_defendants;
    meta.propounding_party = if meta.multiple_defendants {
        format!("Defendants {}", meta.header_defendants)
    } else {
        format!("Defendant {}", meta.header_defendants)
    };
    meta.multiple_responding_parties = meta.multiple_plaintiffs;
    meta.responding_party = if meta.multiple_plaintiffs {
        format!("Plaintiffs {}", meta.header_plaintiffs)
    } else {
        format!("Plaintiff {}", meta.header_plaintiffs)
    };

    if let Some(set) = first_capture(&SET_PATTERNS, &upper) {
        meta.set_number = set;
    }

    let responding = meta.responding_party.to_uppercase();
    let propounding = meta.propounding_party.to_uppercase();
    meta.document_title = format!(
        "{responding}'S RESPONSES TO {propounding}'S {} SET OF REQUESTS FOR PRODUCTION OF DOCUMENTS",
        set_ordinal(&meta.set_number)
    );
    meta.filename = format!("{responding} RESPONSES TO {propounding} RFP SET {}", meta.set_number);
    meta
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|p| p.captures(text)?.get(1).map(|m| m.as_str().trim().to_string()))
}

fn lists_several(parties: &str) -> bool {
    let lower = parties.to_lowercase();
    [",", ";", " and ", "et al"].iter().any(|sep| lower.contains(sep))
}

fn set_ordinal(set_number: &str) -> String {
    let upper = set_number.to_uppercase();
    let ordinal = match upper.as_str() {
        "1" | "ONE" => "FIRST",
        "2" | "TWO" => "SECOND",
        "3" | "THREE" => "THIRD",
        "4" | "FOUR" => "FOURTH",
        "5" | "FIVE" => "FIFTH",
        other => other,
    };
    ordinal.to_string()
}

/// Uppercase the first letter of every alphabetic run, lowercase the rest.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}
