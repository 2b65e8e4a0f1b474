//! Report schema boundary
//!
//! Model output is untrusted free text. It becomes a `Report` only through
//! `parse_report`, which fails with a schema error rather than guessing.

use crate::error::PipelineError;
use crate::models::Report;

/// JSON shape the model is asked to produce
pub const REPORT_SCHEMA: &str = r#"{
  "company_name": "string",
  "income_statement": {
    "revenue":  [ { "label": "string", "amount_current": number, "amount_prior": number, "note_ref": integer | null } ],
    "expenses": [ <line item> ],
    "net_profit": { "current": number | null, "prior": number | null }
  },
  "balance_sheet": {
    "assets": [ <line item> ],
    "liabilities": [ <line item> ],
    "equity": [ <line item> ],
    "total_assets": { "current": number | null, "prior": number | null },
    "total_liabilities": { "current": number | null, "prior": number | null },
    "total_equity": { "current": number | null, "prior": number | null }
  },
  "cash_flow": {
    "operating": [ <line item> ],
    "investing": [ <line item> ],
    "financing": [ <line item> ],
    "net_change_in_cash": { "current": number | null, "prior": number | null }
  },
  "summary": "string",
  "notes": [ "string" ]
}"#;

/// Parse raw model text strictly as a `Report`
pub fn parse_report(raw: &str) -> Result<Report, PipelineError> {
    let cleaned = strip_code_fence(raw);

    let report: Report = serde_json::from_str(cleaned)
        .map_err(|e| PipelineError::schema(raw, format!("invalid report JSON: {}", e)))?;

    if report.company_name.trim().is_empty() {
        return Err(PipelineError::schema(raw, "company_name is empty"));
    }

    Ok(report)
}

fn strip_code_fence(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
