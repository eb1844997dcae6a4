use serde_json::{json, Value};

use crate::models::{DocumentRef, ObjectionDef, RequestRecord};

pub const RECORDS_TOOL: &str = "submit_requests";
pub const METADATA_TOOL: &str = "submit_case_info";
pub const ANALYSIS_TOOL: &str = "submit_analysis";

pub const RECORDS_MAX_TOKENS: u32 = 8000;
pub const METADATA_MAX_TOKENS: u32 = 1000;
pub const ANALYSIS_MAX_TOKENS: u32 = 16000;

// ═══════════════════════════════════════════════════════════
// Prompts
// ═══════════════════════════════════════════════════════════

/// Prompt for splitting a discovery document into numbered requests.
pub fn build_records_prompt(full_text: &str) -> String {
    format!(
        r#"You are extracting the individual requests for production from a legal discovery document.

RULES:
1. Copy each request's text VERBATIM. Do not fix spelling, grammar, punctuation,
   capitalization or spacing. Do not add or drop words.
2. Extract the number from headers such as "REQUEST NO. 1:", "REQUEST FOR PRODUCTION NO. 1:",
   "DEMAND NO. 1:" or "1." but leave the header itself out of the text.
3. Skip definitions, instructions, signature blocks and page headers or footers.
4. A request ends where the next numbered request starts or a definitions,
   instructions or signature section begins.

<document>
{full_text}
</document>

Call the {RECORDS_TOOL} tool with every request in order."#
    )
}

/// Prompt for reading caption data from the first page(s).
pub fn build_metadata_prompt(first_pages_text: &str) -> String {
    format!(
        r#"You are reading the caption of a Request for Production of Documents.

<document>
{first_pages_text}
</document>

Extract:
- court_name: ALL CAPS, parts separated by "\n", no commas
  (e.g. "SUPERIOR COURT OF CALIFORNIA\nCOUNTY OF LOS ANGELES").
- header_plaintiffs / header_defendants: names exactly as in the caption.
- case_no: exactly as printed (e.g. "BC123456", "2:24-cv-01234-ABC").
- propounding_party: who is sending the requests, as written in the document.
- responding_party: who the requests are directed to, as written in the document.
- set_number: "ONE", "TWO", ... from the title; "ONE" when not stated.
- document_title: "[RESPONDING PARTY]'S RESPONSES TO [PROPOUNDING PARTY]'S [ORDINAL] SET OF
  REQUESTS FOR PRODUCTION OF DOCUMENTS".
- filename: a short ALL CAPS version of the title without dates, extensions or special characters.
- multiple_plaintiffs / multiple_defendants: more than one party in the caption (including "et al.").
- multiple_propounding_parties / multiple_responding_parties: more than one party sending or
  receiving these particular requests.

Make a best guess from context for anything not stated. Call the {METADATA_TOOL} tool."#
    )
}

/// Prompt for analyzing one chunk of requests.
pub fn build_analysis_prompt(
    records: &[RequestRecord],
    documents: &[DocumentRef],
    objections: &[ObjectionDef],
) -> String {
    let objections_text = objections
        .iter()
        .map(|o| format!("- {}: {}", o.id, o.name))
        .collect::<Vec<_>>()
        .join("\n");

    let documents_text = if documents.is_empty() {
        "(No documents provided)".to_string()
    } else {
        documents.iter().map(format_document).collect::<Vec<_>>().join("\n")
    };

    let requests_text = records
        .iter()
        .map(|r| format!("REQUEST {}:\n{}", r.number, r.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are a legal assistant reviewing Requests for Production of Documents in a civil case.
Suggest objections and identify potentially responsive documents for each request.

## Available Objections
{objections_text}

## Available Documents
{documents_text}

## Requests
{requests_text}

## For each request provide
1. objections: only those clearly warranted by the request's wording.
2. objection_reasoning: ONE sentence per available objection, keyed by objection id,
   saying why it does or does not apply.
3. objection_arguments: ONE persuasive sentence per available objection, keyed by objection id,
   written as if the objection is raised and specific to this request.
4. documents: ids of documents that look responsive from filename, Bates range or description.
5. notes: one or two sentences of analysis.

Key results by request NUMBER. Use only objection ids and document ids listed above.
Call the {ANALYSIS_TOOL} tool."#
    )
}

fn format_document(doc: &DocumentRef) -> String {
    let mut line = format!("- {}: {}", doc.id, doc.filename);
    if let Some(start) = doc.bates_start.as_deref().filter(|s| !s.is_empty()) {
        line.push_str(&format!(" (Bates: {start}"));
        if let Some(end) = doc.bates_end.as_deref().filter(|s| !s.is_empty()) {
            line.push_str(&format!("-{end}"));
        }
        line.push(')');
    }
    if !doc.description.is_empty() {
        line.push_str(&format!(" - {}", doc.description));
    }
    line
}

// ═══════════════════════════════════════════════════════════
// Tool schemas
// ═══════════════════════════════════════════════════════════

pub fn records_tool() -> Value {
    json!({
        "name": RECORDS_TOOL,
        "description": "Submit the requests extracted from the document. Text must be verbatim.",
        "input_schema": {
            "type": "object",
            "properties": {
                "requests": {
                    "type": "array",
                    "description": "Requests in document order",
                    "items": {
                        "type": "object",
                        "properties": {
                            "number": { "type": "string", "description": "Request number as printed" },
                            "text": { "type": "string", "description": "Exact request text" }
                        },
                        "required": ["number", "text"]
                    }
                }
            },
            "required": ["requests"]
        }
    })
}

pub fn metadata_tool() -> Value {
    let text = |description: &str| json!({ "type": "string", "description": description });
    let flag = |description: &str| json!({ "type": "boolean", "description": description });
    json!({
        "name": METADATA_TOOL,
        "description": "Submit the case information read from the document caption",
        "input_schema": {
            "type": "object",
            "properties": {
                "court_name": text("Court name, ALL CAPS, parts separated by \\n, no commas"),
                "header_plaintiffs": text("Plaintiff name(s) as in the caption"),
                "header_defendants": text("Defendant name(s) as in the caption"),
                "case_no": text("Case number as printed"),
                "propounding_party": text("Party that propounded the requests"),
                "responding_party": text("Party that must respond"),
                "set_number": text("Set number, e.g. ONE, TWO"),
                "document_title": text("Formal title for the response document"),
                "filename": text("Short ALL CAPS filename without extension"),
                "multiple_plaintiffs": flag("More than one plaintiff in the caption"),
                "multiple_defendants": flag("More than one defendant in the caption"),
                "multiple_propounding_parties": flag("Requests propounded by more than one party"),
                "multiple_responding_parties": flag("Requests addressed to more than one party")
            },
            "required": [
                "court_name", "header_plaintiffs", "header_defendants", "case_no",
                "propounding_party", "responding_party", "document_title", "filename",
                "multiple_plaintiffs", "multiple_defendants",
                "multiple_propounding_parties", "multiple_responding_parties"
            ]
        }
    })
}

pub fn analysis_tool() -> Value {
    let by_objection = |description: &str| {
        json!({
            "type": "object",
            "description": description,
            "additionalProperties": { "type": "string" }
        })
    };
    json!({
        "name": ANALYSIS_TOOL,
        "description": "Submit suggested objections and responsive documents per request",
        "input_schema": {
            "type": "object",
            "properties": {
                "analyses": {
                    "type": "object",
                    "description": "Analysis keyed by request number",
                    "additionalProperties": {
                        "type": "object",
                        "properties": {
                            "objections": { "type": "array", "items": { "type": "string" } },
                            "objection_reasoning": by_objection("One sentence per objection id"),
                            "objection_arguments": by_objection("One persuasive sentence per objection id"),
                            "documents": { "type": "array", "items": { "type": "string" } },
                            "notes": { "type": "string" }
                        },
                        "required": ["objections", "objection_reasoning", "objection_arguments", "documents", "notes"]
                    }
                }
            },
            "required": ["analyses"]
        }
    })
}
