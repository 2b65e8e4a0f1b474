//! Static model catalog and the selection policy over it

use super::request::TokenUsage;
use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelConfig {
    pub model_id: &'static str,
    pub supports_vision: bool,
    pub supports_reasoning: bool,
    pub supports_audio: bool,
    pub cost_per_million_input: f64,
    pub cost_per_million_output: f64,
    pub context_window: u64,
}

impl ModelConfig {
    /// USD cost of a call with the given token usage
    pub fn cost(&self, usage: TokenUsage) -> f64 {
        usage.input as f64 * self.cost_per_million_input / 1e6
            + usage.output as f64 * self.cost_per_million_output / 1e6
    }
}

pub const MODEL_CATALOG: &[ModelConfig] = &[
    ModelConfig {
        model_id: "gemini-2.0-flash",
        supports_vision: true,
        supports_reasoning: false,
        supports_audio: true,
        cost_per_million_input: 0.10,
        cost_per_million_output: 0.40,
        context_window: 1_048_576,
    },
    ModelConfig {
        model_id: "gemini-2.0-flash-lite",
        supports_vision: true,
        supports_reasoning: false,
        supports_audio: false,
        cost_per_million_input: 0.075,
        cost_per_million_output: 0.30,
        context_window: 1_048_576,
    },
    ModelConfig {
        model_id: "gemini-2.5-flash",
        supports_vision: true,
        supports_reasoning: true,
        supports_audio: true,
        cost_per_million_input: 0.30,
        cost_per_million_output: 2.50,
        context_window: 1_048_576,
    },
    ModelConfig {
        model_id: "gemini-2.5-pro",
        supports_vision: true,
        supports_reasoning: true,
        supports_audio: true,
        cost_per_million_input: 1.25,
        cost_per_million_output: 10.00,
        context_window: 1_048_576,
    },
    ModelConfig {
        model_id: "gemini-1.5-pro",
        supports_vision: true,
        supports_reasoning: false,
        supports_audio: true,
        cost_per_million_input: 1.25,
        cost_per_million_output: 5.00,
        context_window: 2_097_152,
    },
    ModelConfig {
        model_id: "gemma-3-27b-it",
        supports_vision: false,
        supports_reasoning: false,
        supports_audio: false,
        cost_per_million_input: 0.05,
        cost_per_million_output: 0.10,
        context_window: 131_072,
    },
];

pub fn find_model(model_id: &str) -> Option<&'static ModelConfig> {
    MODEL_CATALOG.iter().find(|m| m.model_id == model_id)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Ocr,
    Analysis,
    Generation,
    Correction,
    Audio,
}

impl TaskType {
    /// Token volume of a typical request, used for budget filtering
    pub fn representative_usage(&self) -> TokenUsage {
        let (input, output) = match self {
            TaskType::Ocr => (4_000, 2_000),
            TaskType::Analysis => (20_000, 4_000),
            TaskType::Generation => (30_000, 8_000),
            TaskType::Correction => (15_000, 8_000),
            TaskType::Audio => (10_000, 1_000),
        };
        TokenUsage { input, output }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Cost,
    Speed,
    Quality,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Cost => "cost",
            Priority::Speed => "speed",
            Priority::Quality => "quality",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Requirements {
    pub priority: Priority,
    #[serde(default)]
    pub needs_vision: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Budget {
    pub max_cost_per_request: f64,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_cost_per_request: 0.50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSelection {
    pub model: &'static ModelConfig,
    pub alternatives: Vec<&'static ModelConfig>,
    pub estimated_cost: f64,
    pub justification: String,
}

impl ModelSelection {
    pub fn model_id(&self) -> &'static str {
        self.model.model_id
    }
}

/// Pick a model for `task` from `catalog`
pub fn select_model(
    catalog: &'static [ModelConfig],
    task: TaskType,
    requirements: Requirements,
    budget: Budget,
) -> Result<ModelSelection, ClientError> {
    let needs_vision = requirements.needs_vision || task == TaskType::Ocr;
    let needs_audio = task == TaskType::Audio;
    let usage = task.representative_usage();

    let capable: Vec<&'static ModelConfig> = catalog
        .iter()
        .filter(|m| !needs_vision || m.supports_vision)
        .filter(|m| !needs_audio || m.supports_audio)
        .collect();

    if capable.is_empty() {
        return Err(ClientError::Validation(format!(
            "no model supports task {:?} (vision: {})",
            task, needs_vision
        )));
    }

    let mut candidates: Vec<&'static ModelConfig> = capable
        .iter()
        .copied()
        .filter(|m| m.cost(usage) <= budget.max_cost_per_request)
        .collect();

    if candidates.is_empty() {
        return Err(ClientError::Validation(format!(
            "no capable model fits the ${:.4} per-request budget",
            budget.max_cost_per_request
        )));
    }

    let by_cost =
        |a: &&ModelConfig, b: &&ModelConfig| a.cost(usage).partial_cmp(&b.cost(usage)).unwrap_or(Ordering::Equal);

    match requirements.priority {
        Priority::Cost => candidates.sort_by(by_cost),
        Priority::Speed => candidates.sort_by(|a, b| b.context_window.cmp(&a.context_window)),
        Priority::Quality => candidates.sort_by(|a, b| {
            b.supports_reasoning
                .cmp(&a.supports_reasoning)
                .then(b.context_window.cmp(&a.context_window))
        }),
    }

    let model = candidates[0];
    let estimated_cost = model.cost(usage);
    let alternatives: Vec<&'static ModelConfig> = candidates.iter().skip(1).take(2).copied().collect();

    let justification = format!(
        "{} selected for {:?} with {} priority: {} of {} capable models fit the ${:.4} budget; \
         estimated ${:.4} per request{}{}",
        model.model_id,
        task,
        requirements.priority,
        candidates.len(),
        capable.len(),
        budget.max_cost_per_request,
        estimated_cost,
        if model.supports_reasoning { ", reasoning-capable" } else { "" },
        if needs_vision { ", vision-capable" } else { "" },
    );

    Ok(ModelSelection {
        model,
        alternatives,
        estimated_cost,
        justification,
    })
}
