//! Generator trait and implementations
//!
//! The Generator turns two source documents into a first-draft Report.
//! The model's output is parsed strictly; nothing is repaired here.

use crate::client::{
    Attachment, ChatRequest, Message, ResilientClient, ResponseFormat, TaskType,
};
use crate::error::PipelineError;
use crate::models::{Report, ReportRequest, SourceDocument};
use crate::schema::{parse_report, REPORT_SCHEMA};
use crate::workflow::GenerationPreferences;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const GENERATION_TEMPERATURE: f32 = 0.2;
pub const MAX_OUTPUT_TOKENS: u32 = 8_192;

/// A parsed report together with what producing it cost
#[derive(Debug, Clone)]
pub struct Draft {
    pub report: Report,
    pub model_id: String,
    /// Zero when the response was replayed from cache
    pub cost_usd: f64,
}

/// Trait for first-draft generation (LLM controlled)
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &ReportRequest) -> Result<Draft, PipelineError>;
}

pub struct LlmGenerator {
    client: Arc<ResilientClient>,
}

impl LlmGenerator {
    pub fn new(client: Arc<ResilientClient>) -> Self {
        Self { client }
    }

    fn build_prompt(request: &ReportRequest) -> String {
        let company = request
            .company_name
            .as_deref()
            .map(|name| format!("The company is {}.", name))
            .unwrap_or_else(|| "Identify the company from the documents.".to_string());

        format!(
            r#"Two financial documents are attached.
- "{}" covers the CURRENT reporting period.
- "{}" covers the PRIOR reporting period.

{}

Extract a comparative financial report:
- Put each line item in the section it belongs to, in the order it appears.
- amount_current comes from the current-period document, amount_prior from the prior-period document.
- Expenses and outflows are positive in "expenses"; cash outflows are negative in cash flow sections.
- Fill every summary figure you can read. Use null for a figure the documents do not state; never invent one.
- Totals must satisfy: total_assets = total_liabilities + total_equity, net_profit = revenue - expenses,
  net_change_in_cash = operating + investing + financing.
- "summary" is a short comparative narrative; "notes" lists caveats and assumptions.

Return ONLY valid JSON matching this schema, no explanation text:
{}"#,
            request.current_period.name,
            request.prior_period.name,
            company,
            REPORT_SCHEMA,
        )
    }

    fn attachment(document: &SourceDocument) -> Attachment {
        Attachment {
            name: document.name.clone(),
            media_type: document.media_type.clone(),
            data: Arc::new(document.bytes.clone()),
        }
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, request: &ReportRequest) -> Result<Draft, PipelineError> {
        let needs_vision =
            !request.current_period.is_textual() || !request.prior_period.is_textual();
        let preferences: GenerationPreferences = request.preferences;

        let selection = self.client.select_model(
            TaskType::Generation,
            preferences.requirements(needs_vision),
            preferences.budget(),
        )?;

        let chat = ChatRequest {
            model_id: selection.model_id().to_string(),
            messages: vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(Self::build_prompt(request))
                    .with_attachment(Self::attachment(&request.current_period))
                    .with_attachment(Self::attachment(&request.prior_period)),
            ],
            temperature: GENERATION_TEMPERATURE,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            response_format: ResponseFormat::Structured,
        };

        info!(model_id = %chat.model_id, "Generating report");

        let response = self.client.invoke(&chat).await?;
        let report = match parse_report(&response.generated_text) {
            Ok(report) => report,
            Err(e) => {
                warn!(model_id = %response.model_id, error = %e, "Generated report failed schema parse");
                self.client.invalidate(&chat).await;
                return Err(e);
            }
        };

        Ok(Draft {
            report,
            model_id: response.model_id.clone(),
            cost_usd: response.billed_cost(),
        })
    }
}

pub(crate) const SYSTEM_PROMPT: &str = r#"You are a meticulous financial analyst.
You read financial statements and return structured, internally consistent figures.
You never fabricate numbers that are not supported by the source documents."#;
