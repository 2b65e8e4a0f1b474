//! Workflow instruction classifier
//!
//! Best-effort keyword scoring over free-text instructions, e.g.
//! "keep it cheap" or "the statements are scanned images". The result only
//! tunes model selection for Generator and Corrector; it carries no
//! execution guarantees.

use crate::client::{Budget, Priority, Requirements};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationPreferences {
    pub priority: Priority,
    pub needs_vision: bool,
    pub max_cost_per_request: f64,
}

impl Default for GenerationPreferences {
    fn default() -> Self {
        Self {
            priority: Priority::Quality,
            needs_vision: false,
            max_cost_per_request: Budget::default().max_cost_per_request,
        }
    }
}

impl GenerationPreferences {
    pub fn requirements(&self, needs_vision: bool) -> Requirements {
        Requirements {
            priority: self.priority,
            needs_vision: self.needs_vision || needs_vision,
        }
    }

    pub fn budget(&self) -> Budget {
        Budget {
            max_cost_per_request: self.max_cost_per_request,
        }
    }
}

/// Static keyword lists, zero allocation
const COST_KEYWORDS: &[&str] = &[
    "cheap", "cheapest", "low cost", "lowest cost", "budget", "inexpensive", "save money",
    "economical",
];

const SPEED_KEYWORDS: &[&str] = &[
    "fast", "quick", "quickly", "asap", "urgent", "speed", "rapid", "large document",
];

const QUALITY_KEYWORDS: &[&str] = &[
    "accurate", "accuracy", "precise", "thorough", "detailed", "careful", "best", "audit",
    "high quality",
];

const VISION_KEYWORDS: &[&str] = &[
    "scan", "scanned", "image", "photo", "screenshot", "handwritten", "ocr", "picture",
];

/// Workflow instruction classifier
pub struct WorkflowClassifier;

impl WorkflowClassifier {
    /// Classify free-text instructions into generation preferences
    pub fn classify(instructions: &str, defaults: GenerationPreferences) -> GenerationPreferences {
        let text = instructions.to_lowercase();

        let score = |keywords: &[&str]| keywords.iter().filter(|kw| text.contains(**kw)).count();

        let scores = [
            (Priority::Cost, score(COST_KEYWORDS)),
            (Priority::Speed, score(SPEED_KEYWORDS)),
            (Priority::Quality, score(QUALITY_KEYWORDS)),
        ];

        let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
        let leaders: Vec<Priority> = scores
            .iter()
            .filter(|(_, s)| *s == best && best > 0)
            .map(|(p, _)| *p)
            .collect();

        // Ties are ambiguous; keep the default
        let priority = match leaders.as_slice() {
            [single] => *single,
            _ => defaults.priority,
        };

        GenerationPreferences {
            priority,
            needs_vision: defaults.needs_vision || score(VISION_KEYWORDS) > 0,
            max_cost_per_request: parse_budget(&text).unwrap_or(defaults.max_cost_per_request),
        }
    }
}

/// Pick up an explicit ceiling such as "under $0.10 per request"
fn parse_budget(text: &str) -> Option<f64> {
    let start = text.find('$')?;
    let digits: String = text[start + 1..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse::<f64>().ok().filter(|v| *v > 0.0)
}
