//! Corrector trait and implementations
//!
//! Feeds failed verification checks back to the model and parses the
//! answer as a brand-new Report. The previous report is never patched.

use crate::client::{ChatRequest, Message, ResilientClient, ResponseFormat, TaskType};
use crate::error::PipelineError;
use crate::generator::{Draft, MAX_OUTPUT_TOKENS, SYSTEM_PROMPT};
use crate::models::{Report, VerificationCheck, VerificationResult};
use crate::schema::{parse_report, REPORT_SCHEMA};
use crate::verification::{
    BALANCE_SHEET_EQUATION, CASH_FLOW_INTEGRITY, INCOME_STATEMENT_INTEGRITY,
};
use crate::workflow::GenerationPreferences;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Low temperature keeps corrections close to deterministic
pub const CORRECTION_TEMPERATURE: f32 = 0.1;

#[async_trait]
pub trait Corrector: Send + Sync {
    async fn correct(
        &self,
        report: &Report,
        verification: &VerificationResult,
        preferences: &GenerationPreferences,
    ) -> Result<Draft, PipelineError>;
}

/// One instruction per actionable failed check
pub fn correction_instructions(verification: &VerificationResult) -> Vec<String> {
    verification
        .actionable_failures()
        .map(instruction_for)
        .collect()
}

fn instruction_for(check: &VerificationCheck) -> String {
    let period = check.period;
    let reported = check.reported;
    let expected = check.expected;
    let discrepancy = check.discrepancy;

    match check.name.as_str() {
        BALANCE_SHEET_EQUATION => format!(
            "[{period}] Balance sheet does not balance: total_assets is {reported:.2} but \
             total_liabilities + total_equity is {expected:.2} (discrepancy {discrepancy:+.2}). \
             Re-read the equity section and adjust the equity line items (for example retained \
             earnings or reserves) and total_equity by {discrepancy:+.2} so that \
             total_assets = total_liabilities + total_equity. Change total_assets only if an \
             asset line was misread."
        ),
        INCOME_STATEMENT_INTEGRITY => format!(
            "[{period}] Income statement does not reconcile: net_profit is {reported:.2} but \
             revenue minus expenses is {expected:.2} (discrepancy {discrepancy:+.2}). Check for \
             missing or double-counted revenue and expense lines, then set net_profit so that \
             net_profit = sum(revenue) - sum(expenses)."
        ),
        CASH_FLOW_INTEGRITY => format!(
            "[{period}] Cash flow does not reconcile: net_change_in_cash is {reported:.2} but \
             operating + investing + financing is {expected:.2} (discrepancy {discrepancy:+.2}). \
             Check the sign of each outflow and any missing activity lines, then make \
             net_change_in_cash equal the sum of the three sections."
        ),
        other => format!(
            "[{period}] Check '{other}' ({}) failed: reported {reported:.2}, expected \
             {expected:.2} (discrepancy {discrepancy:+.2}). Fix the underlying figures.",
            check.principle
        ),
    }
}

pub struct LlmCorrector {
    client: Arc<ResilientClient>,
}

impl LlmCorrector {
    pub fn new(client: Arc<ResilientClient>) -> Self {
        Self { client }
    }

    fn build_prompt(report_json: &str, instructions: &[String]) -> String {
        format!(
            r#"The financial report below failed automated accounting checks.

PREVIOUS REPORT:
{}

REQUIRED CORRECTIONS:
- {}

Rules:
- Apply every correction above.
- Keep all other figures, labels and line-item order unchanged.
- Return the COMPLETE corrected report, not a diff.
- Return ONLY valid JSON matching this schema, no explanation text:
{}"#,
            report_json,
            instructions.join("\n- "),
            REPORT_SCHEMA,
        )
    }
}

#[async_trait]
impl Corrector for LlmCorrector {
    async fn correct(
        &self,
        report: &Report,
        verification: &VerificationResult,
        preferences: &GenerationPreferences,
    ) -> Result<Draft, PipelineError> {
        let instructions = correction_instructions(verification);
        let report_json = serde_json::to_string_pretty(report)
            .map_err(|e| PipelineError::schema(String::new(), format!("report not serializable: {}", e)))?;

        let selection = self.client.select_model(
            TaskType::Correction,
            preferences.requirements(false),
            preferences.budget(),
        )?;

        let chat = ChatRequest {
            model_id: selection.model_id().to_string(),
            messages: vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(Self::build_prompt(&report_json, &instructions)),
            ],
            temperature: CORRECTION_TEMPERATURE,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            response_format: ResponseFormat::Structured,
        };

        info!(
            model_id = %chat.model_id,
            corrections = instructions.len(),
            "Requesting report correction"
        );

        let response = self.client.invoke(&chat).await?;
        let corrected = match parse_report(&response.generated_text) {
            Ok(report) => report,
            Err(e) => {
                warn!(model_id = %response.model_id, error = %e, "Corrected report failed schema parse");
                self.client.invalidate(&chat).await;
                return Err(e);
            }
        };

        Ok(Draft {
            report: corrected,
            model_id: response.model_id.clone(),
            cost_usd: response.billed_cost(),
        })
    }
}
