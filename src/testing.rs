//! Test doubles and fixtures shared by unit tests

use crate::client::{ChatRequest, Completion, ModelTransport, TokenUsage, MODEL_CATALOG};
use crate::error::ClientError;
use crate::models::{
    BalanceSheet, CashFlowStatement, FinancialLineItem, IncomeStatement, Report, SourceDocument,
    SummaryFigure,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

enum Scripted {
    Reply(Completion),
    Delayed(Duration, Completion),
    Fail(ClientError),
}

/// Transport that replays a queue of canned outcomes and counts calls
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
    listing_calls: AtomicUsize,
    credential: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            listing_calls: AtomicUsize::new(0),
            credential: true,
        }
    }

    pub fn without_credential() -> Self {
        Self {
            credential: false,
            ..Self::new()
        }
    }

    pub fn push_completion(&self, completion: Completion) {
        self.script.lock().push_back(Scripted::Reply(completion));
    }

    pub fn push_text(&self, text: &str) {
        self.push_completion(completion(text));
    }

    pub fn push_delayed_text(&self, delay: Duration, text: &str) {
        self.script
            .lock()
            .push_back(Scripted::Delayed(delay, completion(text)));
    }

    pub fn push_error(&self, error: ClientError) {
        self.script.lock().push_back(Scripted::Fail(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

fn completion(text: &str) -> Completion {
    Completion {
        model_id: "gemini-2.0-flash".to_string(),
        generated_text: text.to_string(),
        token_usage: TokenUsage {
            input: 1_000,
            output: 500,
        },
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    fn endpoint(&self) -> &str {
        "scripted://models"
    }

    fn has_credential(&self) -> bool {
        self.credential
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Reply(completion)) => Ok(completion),
            Some(Scripted::Delayed(delay, completion)) => {
                tokio::time::sleep(delay).await;
                Ok(completion)
            }
            Some(Scripted::Fail(error)) => Err(error),
            None => Err(ClientError::Network("script exhausted".to_string())),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        Ok(MODEL_CATALOG
            .iter()
            .map(|m| m.model_id.to_string())
            .collect())
    }
}

pub fn documents() -> (SourceDocument, SourceDocument) {
    (
        SourceDocument::new("fy2024.pdf", "application/pdf", b"%PDF-1.7 current".to_vec()),
        SourceDocument::new("fy2023.pdf", "application/pdf", b"%PDF-1.7 prior".to_vec()),
    )
}

/// A report whose three identities hold in both periods for the given
/// balance sheet totals. Prior-period totals are the current ones less 100,000
/// of assets and liabilities.
pub fn balanced_report(total_assets: f64, total_liabilities: f64, total_equity: f64) -> Report {
    let prior_assets = total_assets - 100_000.0;
    let prior_liabilities = total_liabilities - 100_000.0;

    Report {
        company_name: "Acme Holdings".to_string(),
        income_statement: IncomeStatement {
            revenue: vec![FinancialLineItem::new("Sales", 900_000.0, 800_000.0)],
            expenses: vec![
                FinancialLineItem::new("Cost of sales", 500_000.0, 450_000.0),
                FinancialLineItem::new("Administrative expenses", 150_000.0, 140_000.0),
            ],
            net_profit: SummaryFigure::both(250_000.0, 210_000.0),
        },
        balance_sheet: BalanceSheet {
            assets: vec![
                FinancialLineItem::new("Cash", total_assets * 0.5, prior_assets * 0.5),
                FinancialLineItem::new("Property", total_assets * 0.5, prior_assets * 0.5),
            ],
            liabilities: vec![FinancialLineItem::new(
                "Borrowings",
                total_liabilities,
                prior_liabilities,
            )],
            equity: vec![FinancialLineItem::new(
                "Share capital and reserves",
                total_equity,
                total_equity,
            )],
            total_assets: SummaryFigure::both(total_assets, prior_assets),
            total_liabilities: SummaryFigure::both(total_liabilities, prior_liabilities),
            total_equity: SummaryFigure::both(total_equity, total_equity),
        },
        cash_flow: CashFlowStatement {
            operating: vec![FinancialLineItem::new("Cash from operations", 300_000.0, 250_000.0)],
            investing: vec![FinancialLineItem::new("Capital expenditure", -120_000.0, -100_000.0)],
            financing: vec![FinancialLineItem::new("Dividends paid", -80_000.0, -60_000.0)],
            net_change_in_cash: SummaryFigure::both(100_000.0, 90_000.0),
        },
        summary: "Revenue grew 12.5% year on year.".to_string(),
        notes: vec!["Figures in USD.".to_string()],
    }
}
