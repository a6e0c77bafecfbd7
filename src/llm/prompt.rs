//! Prompt assembly.
//!
//! Wording comes from the active prompt template; this module only fixes the
//! structure around it (weights block, response shape, data sections).

use crate::models::TickerData;
use serde_json::{json, Value};

/// Active template plus the rendered weights block
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub template: String,
    pub weights_section: String,
}

/// Data blocks for one ticker in a batch prompt
#[derive(Debug, Clone, Copy)]
pub struct TickerSection<'a> {
    pub ticker: &'a str,
    pub data: &'a TickerData,
}

impl PromptContext {
    pub fn new(template: impl Into<String>, weights_section: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            weights_section: weights_section.into(),
        }
    }

    pub fn single(&self, ticker: &str, data: &TickerData) -> String {
        format!(
            "{template}\n\
             Recommended Weights:\n\
             {weights}\n\
             Respond in this format:\n\
             ```json\n\
             {{\n  \
               \"ticker\": \"{ticker}\",\n  \
               \"intraday_trend_movement_probability\": {{\n    \
                 \"probability_value\": \"in %\",\n    \
                 \"confidence\": \"int 1-10\",\n    \
                 \"justification\": \"Short conclusion, key factors, keywords.\",\n    \
                 \"fundamental_impact\": \"brief assessment, keywords\",\n    \
                 \"extra\": \"Optional brief remark or outlook.\"\n  \
               }}\n\
             }}\n\
             ```\n\
             Chart Data 5m:\n{intraday}\n\
             Chart Data 1d:\n{daily}\n\
             Fundamental Data:\n{fundamentals}",
            template = self.template.trim(),
            weights = self.weights_section,
            ticker = ticker,
            intraday = data.intraday,
            daily = data.daily,
            fundamentals = data.fundamentals,
        )
    }

    pub fn batch(&self, sections: &[TickerSection<'_>]) -> String {
        let data_block = sections
            .iter()
            .map(|s| {
                format!(
                    "Ticker: {}\nChart Data 5m:\n{}\n\nChart Data 1d:\n{}\n\nFundamental Data:\n{}\n",
                    s.ticker, s.data.intraday, s.data.daily, s.data.fundamentals
                )
            })
            .collect::<Vec<_>>()
            .join("\n---\n");

        format!(
            "{}\nRecommended Weights for Your Analysis:\n{}\n\nDATA SECTIONS:\n{}",
            self.template.trim(),
            self.weights_section,
            data_block
        )
    }
}

/// Response schema for single-ticker calls: a list of per-ticker verdicts
pub fn single_response_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "ticker": {"type": "STRING"},
                "intraday_trend_movement_probability": {
                    "type": "OBJECT",
                    "properties": {
                        "probability_value": {"type": "STRING"},
                        "confidence": {"type": "INTEGER"},
                        "justification": {"type": "STRING"},
                        "fundamental_impact": {"type": "STRING"},
                        "extra": {"type": "STRING", "nullable": true}
                    },
                    "required": ["probability_value", "confidence", "justification", "fundamental_impact"]
                }
            },
            "required": ["ticker", "intraday_trend_movement_probability"]
        }
    })
}
