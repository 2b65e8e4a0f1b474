//! Core data models for the report pipeline

use crate::workflow::GenerationPreferences;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Source Documents =================
//

/// An uploaded financial document. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    /// Plain-text documents can be read without a vision-capable model
    pub fn is_textual(&self) -> bool {
        self.media_type.starts_with("text/")
    }
}

/// The two documents a comparative report is built from
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub company_name: Option<String>,
    pub current_period: SourceDocument,
    pub prior_period: SourceDocument,
    pub preferences: GenerationPreferences,
}

//
// ================= Report =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReportingPeriod {
    Current,
    Prior,
}

impl ReportingPeriod {
    pub const ALL: [ReportingPeriod; 2] = [ReportingPeriod::Current, ReportingPeriod::Prior];
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportingPeriod::Current => "current",
            ReportingPeriod::Prior => "prior",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialLineItem {
    pub label: String,
    pub amount_current: f64,
    pub amount_prior: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_ref: Option<u32>,
}

impl FinancialLineItem {
    pub fn new(label: impl Into<String>, amount_current: f64, amount_prior: f64) -> Self {
        Self {
            label: label.into(),
            amount_current,
            amount_prior,
            note_ref: None,
        }
    }

    pub fn amount(&self, period: ReportingPeriod) -> f64 {
        match period {
            ReportingPeriod::Current => self.amount_current,
            ReportingPeriod::Prior => self.amount_prior,
        }
    }
}

/// A derived total. Either period may be absent when the source omits it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SummaryFigure {
    pub current: Option<f64>,
    pub prior: Option<f64>,
}

impl SummaryFigure {
    pub fn both(current: f64, prior: f64) -> Self {
        Self {
            current: Some(current),
            prior: Some(prior),
        }
    }

    pub fn get(&self, period: ReportingPeriod) -> Option<f64> {
        match period {
            ReportingPeriod::Current => self.current,
            ReportingPeriod::Prior => self.prior,
        }
    }
}

/// Sum one period across an ordered list of line items
pub fn sum_period(items: &[FinancialLineItem], period: ReportingPeriod) -> f64 {
    items.iter().map(|item| item.amount(period)).sum()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IncomeStatement {
    pub revenue: Vec<FinancialLineItem>,
    pub expenses: Vec<FinancialLineItem>,
    #[serde(default)]
    pub net_profit: SummaryFigure,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BalanceSheet {
    pub assets: Vec<FinancialLineItem>,
    pub liabilities: Vec<FinancialLineItem>,
    pub equity: Vec<FinancialLineItem>,
    #[serde(default)]
    pub total_assets: SummaryFigure,
    #[serde(default)]
    pub total_liabilities: SummaryFigure,
    #[serde(default)]
    pub total_equity: SummaryFigure,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CashFlowStatement {
    pub operating: Vec<FinancialLineItem>,
    pub investing: Vec<FinancialLineItem>,
    pub financing: Vec<FinancialLineItem>,
    #[serde(default)]
    pub net_change_in_cash: SummaryFigure,
}

/// A complete comparative report. Corrections replace it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub company_name: String,
    pub income_statement: IncomeStatement,
    pub balance_sheet: BalanceSheet,
    pub cash_flow: CashFlowStatement,
    pub summary: String,
    #[serde(default)]
    pub notes: Vec<String>,
}

//
// ================= Verification =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Passed,
    PassedWithWarnings,
    Failed,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationStatus::Passed => "Passed",
            VerificationStatus::PassedWithWarnings => "Passed with warnings",
            VerificationStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Prefix marking a check that could not run because a figure was absent
pub const MISSING_DATA_NOTE: &str = "missing data";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationCheck {
    pub name: String,
    pub principle: String,
    pub period: ReportingPeriod,
    pub expected: f64,
    pub reported: f64,
    pub discrepancy: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl VerificationCheck {
    pub fn is_missing_data(&self) -> bool {
        self.notes
            .as_deref()
            .is_some_and(|n| n.starts_with(MISSING_DATA_NOTE))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
    pub checks: Vec<VerificationCheck>,
    pub overall_status: VerificationStatus,
    pub generated_at: DateTime<Utc>,
}

impl VerificationResult {
    /// Derive the overall status from individual checks
    pub fn from_checks(checks: Vec<VerificationCheck>) -> Self {
        let overall_status = overall_status(&checks);
        Self {
            checks,
            overall_status,
            generated_at: Utc::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.overall_status == VerificationStatus::Failed
    }

    /// Failed checks the model can act on (missing-data gaps excluded)
    pub fn actionable_failures(&self) -> impl Iterator<Item = &VerificationCheck> {
        self.checks
            .iter()
            .filter(|c| !c.passed && !c.is_missing_data())
    }
}

fn overall_status(checks: &[VerificationCheck]) -> VerificationStatus {
    let mut warnings = false;
    for check in checks.iter().filter(|c| !c.passed) {
        if !check.is_missing_data() {
            return VerificationStatus::Failed;
        }
        warnings = true;
    }
    if warnings {
        VerificationStatus::PassedWithWarnings
    } else {
        VerificationStatus::Passed
    }
}

//
// ================= Orchestration =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationAttempt {
    pub attempt_number: u32,
    pub report: Option<Report>,
    pub verification: Option<VerificationResult>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Generating,
    Verifying,
    Correcting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Generating => "generating",
            Phase::Verifying => "verifying",
            Phase::Correcting => "correcting",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub attempt_number: u32,
    pub phase: Phase,
}

/// Terminal result of a successful run. This is what the host persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedReport {
    pub run_id: Uuid,
    pub company_name: String,
    pub report: Report,
    pub verification: VerificationResult,
    pub attempts: u32,
    pub cost_usd: f64,
}
