//! Verification engine for accounting identities
//!
//! Rules-based verification of a generated report.
//! Deterministic, no I/O.

use crate::models::{
    sum_period, Report, ReportingPeriod, VerificationCheck, VerificationResult, MISSING_DATA_NOTE,
};
use tracing::info;

/// Default absolute rounding tolerance, in reporting currency units
pub const DEFAULT_TOLERANCE: f64 = 1.0;

pub const BALANCE_SHEET_EQUATION: &str = "Balance Sheet Equation";
pub const INCOME_STATEMENT_INTEGRITY: &str = "Income Statement Integrity";
pub const CASH_FLOW_INTEGRITY: &str = "Cash Flow Integrity";

/// Trait for verification rules
pub trait VerificationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn principle(&self) -> &'static str;

    /// Evaluate the identity for one period
    fn evaluate(&self, report: &Report, period: ReportingPeriod) -> RuleOutcome;
}

/// Raw figures produced by a rule, before tolerance is applied
pub enum RuleOutcome {
    Evaluated { expected: f64, reported: f64 },
    MissingData { missing: Vec<&'static str> },
}

/// Verification engine that enforces rules
pub struct VerificationEngine {
    rules: Vec<Box<dyn VerificationRule>>,
    tolerance: f64,
}

impl VerificationEngine {
    pub fn new(tolerance: f64) -> Self {
        Self {
            rules: Vec::new(),
            tolerance,
        }
    }

    pub fn add_rule(&mut self, rule: Box<dyn VerificationRule>) {
        self.rules.push(rule);
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Verify a report snapshot (sync, no I/O)
    pub fn verify(&self, report: &Report) -> VerificationResult {
        let mut checks = Vec::with_capacity(self.rules.len() * ReportingPeriod::ALL.len());

        for period in ReportingPeriod::ALL {
            for rule in &self.rules {
                checks.push(self.to_check(rule.as_ref(), report, period));
            }
        }

        let result = VerificationResult::from_checks(checks);

        info!(
            rule_count = self.rules.len(),
            failed = result.checks.iter().filter(|c| !c.passed).count(),
            status = %result.overall_status,
            "Verification completed"
        );

        result
    }

    fn to_check(
        &self,
        rule: &dyn VerificationRule,
        report: &Report,
        period: ReportingPeriod,
    ) -> VerificationCheck {
        match rule.evaluate(report, period) {
            RuleOutcome::Evaluated { expected, reported } => {
                let discrepancy = reported - expected;
                let passed = discrepancy.abs() <= self.tolerance;
                VerificationCheck {
                    name: rule.name().to_string(),
                    principle: rule.principle().to_string(),
                    period,
                    expected,
                    reported,
                    discrepancy,
                    passed,
                    notes: (!passed).then(|| {
                        format!(
                            "Off by {:.2} (tolerance {:.2})",
                            discrepancy, self.tolerance
                        )
                    }),
                }
            }
            RuleOutcome::MissingData { missing } => VerificationCheck {
                name: rule.name().to_string(),
                principle: rule.principle().to_string(),
                period,
                expected: 0.0,
                reported: 0.0,
                discrepancy: 0.0,
                passed: false,
                notes: Some(format!("{}: {}", MISSING_DATA_NOTE, missing.join(", "))),
            },
        }
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        create_default_verification_engine(DEFAULT_TOLERANCE)
    }
}

/// Collect the names of absent figures, or the values when all are present
fn require<const N: usize>(
    figures: [(&'static str, Option<f64>); N],
) -> Result<[f64; N], Vec<&'static str>> {
    let missing: Vec<&'static str> = figures
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| *name)
        .collect();

    if !missing.is_empty() {
        return Err(missing);
    }
    Ok(figures.map(|(_, value)| value.unwrap_or_default()))
}

//
// ========== Accounting Identity Rules ==========
//

/// Rule: total assets equal total liabilities plus total equity
pub struct BalanceSheetEquationRule;

impl VerificationRule for BalanceSheetEquationRule {
    fn name(&self) -> &'static str {
        BALANCE_SHEET_EQUATION
    }

    fn principle(&self) -> &'static str {
        "Total Assets = Total Liabilities + Total Equity"
    }

    fn evaluate(&self, report: &Report, period: ReportingPeriod) -> RuleOutcome {
        let sheet = &report.balance_sheet;
        match require([
            ("total_assets", sheet.total_assets.get(period)),
            ("total_liabilities", sheet.total_liabilities.get(period)),
            ("total_equity", sheet.total_equity.get(period)),
        ]) {
            Ok([assets, liabilities, equity]) => RuleOutcome::Evaluated {
                expected: liabilities + equity,
                reported: assets,
            },
            Err(missing) => RuleOutcome::MissingData { missing },
        }
    }
}

/// Rule: net profit equals revenue less expenses
pub struct IncomeStatementIntegrityRule;

impl VerificationRule for IncomeStatementIntegrityRule {
    fn name(&self) -> &'static str {
        INCOME_STATEMENT_INTEGRITY
    }

    fn principle(&self) -> &'static str {
        "Net Profit = Total Revenue - Total Expenses"
    }

    fn evaluate(&self, report: &Report, period: ReportingPeriod) -> RuleOutcome {
        let income = &report.income_statement;
        match require([("net_profit", income.net_profit.get(period))]) {
            Ok([net_profit]) => RuleOutcome::Evaluated {
                expected: sum_period(&income.revenue, period)
                    - sum_period(&income.expenses, period),
                reported: net_profit,
            },
            Err(missing) => RuleOutcome::MissingData { missing },
        }
    }
}

/// Rule: net change in cash equals the sum of the three activity sections
pub struct CashFlowIntegrityRule;

impl VerificationRule for CashFlowIntegrityRule {
    fn name(&self) -> &'static str {
        CASH_FLOW_INTEGRITY
    }

    fn principle(&self) -> &'static str {
        "Net Change in Cash = Operating + Investing + Financing"
    }

    fn evaluate(&self, report: &Report, period: ReportingPeriod) -> RuleOutcome {
        let cash = &report.cash_flow;
        match require([("net_change_in_cash", cash.net_change_in_cash.get(period))]) {
            Ok([net_change]) => RuleOutcome::Evaluated {
                expected: sum_period(&cash.operating, period)
                    + sum_period(&cash.investing, period)
                    + sum_period(&cash.financing, period),
                reported: net_change,
            },
            Err(missing) => RuleOutcome::MissingData { missing },
        }
    }
}

/// Create a verification engine with the three standard identities
pub fn create_default_verification_engine(tolerance: f64) -> VerificationEngine {
    let mut engine = VerificationEngine::new(tolerance);
    engine.add_rule(Box::new(BalanceSheetEquationRule));
    engine.add_rule(Box::new(IncomeStatementIntegrityRule));
    engine.add_rule(Box::new(CashFlowIntegrityRule));
    engine
}

//
// ================= Tests =================
//
