use crate::store::Weights;
use chrono::NaiveDate;
use std::fmt;

/// A parsed bot command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Analyze { ticker: String, date: Option<String> },
    /// Empty `tickers` means the configured list
    AnalyzeAll { tickers: Vec<String>, date: Option<String> },
    History,
    SetWeights(Weights),
    MyWeights,
    ResetWeights,
    SetMyPrompt(String),
    MyPrompt,
    PromptHistory,
    ResetPrompt,
    Unknown(String),
}

/// Malformed arguments; the message is shown to the user
#[derive(Debug, Clone, PartialEq)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}

const DATE_HELP: &str = "Invalid date format. Use YYYY-MM-DD.";

impl Command {
    /// `None` when the text is not a command at all
    pub fn parse(text: &str) -> Option<Result<Command, UsageError>> {
        let text = text.trim();
        let body = text.strip_prefix('/')?;
        let (head, rest) = match body.find(char::is_whitespace) {
            Some(idx) => (&body[..idx], body[idx..].trim()),
            None => (body, ""),
        };
        // "/analyze@my_bot" in group chats
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        let args: Vec<&str> = rest.split_whitespace().collect();

        Some(match name.as_str() {
            "start" | "help" => Ok(Command::Start),
            "analyze" => parse_analyze(&args),
            "analyze_all" => parse_analyze_all(&args),
            "history" => Ok(Command::History),
            "setweights" => parse_weights(&args).map(Command::SetWeights),
            "myweights" => Ok(Command::MyWeights),
            "resetweights" => Ok(Command::ResetWeights),
            "setmyprompt" if rest.is_empty() => Err(UsageError("Please provide a prompt text".to_string())),
            "setmyprompt" => Ok(Command::SetMyPrompt(rest.to_string())),
            "myprompt" => Ok(Command::MyPrompt),
            "prompthistory" => Ok(Command::PromptHistory),
            "resetprompt" => Ok(Command::ResetPrompt),
            other => Ok(Command::Unknown(other.to_string())),
        })
    }
}

fn is_date(arg: &str) -> bool {
    NaiveDate::parse_from_str(arg, "%Y-%m-%d").is_ok()
}

fn parse_analyze(args: &[&str]) -> Result<Command, UsageError> {
    let (ticker, date) = match args {
        [ticker] => (ticker, None),
        [ticker, date] if is_date(date) => (ticker, Some(date.to_string())),
        [_, _] => return Err(UsageError(DATE_HELP.to_string())),
        _ => {
            return Err(UsageError(
                "Usage: /analyze <TICKER> [YYYY-MM-DD]".to_string(),
            ))
        }
    };
    Ok(Command::Analyze {
        ticker: ticker.to_uppercase(),
        date,
    })
}

fn parse_analyze_all(args: &[&str]) -> Result<Command, UsageError> {
    let (date, symbols) = match args.split_last() {
        Some((last, rest)) if is_date(last) => (Some(last.to_string()), rest),
        _ => (None, args),
    };

    let mut tickers: Vec<String> = Vec::new();
    for symbol in symbols.iter().flat_map(|token| token.split(',')) {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() && !tickers.contains(&symbol) {
            tickers.push(symbol);
        }
    }
    Ok(Command::AnalyzeAll { tickers, date })
}

fn parse_weights(args: &[&str]) -> Result<Weights, UsageError> {
    let mut weights = Weights::new();
    for arg in args {
        let Some((feature, value)) = arg.split_once(':') else {
            continue;
        };
        let weight = value
            .trim()
            .parse::<f64>()
            .map_err(|_| UsageError(format!("Invalid value for {}: {}", feature, value)))?;
        weights.insert(feature.trim().to_string(), weight);
    }
    if weights.is_empty() {
        return Err(UsageError(
            "Please provide weights in format: feature:value".to_string(),
        ));
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(text: &str) -> Command {
        Command::parse(text).unwrap().unwrap()
    }

    fn usage(text: &str) -> String {
        Command::parse(text).unwrap().unwrap_err().0
    }

    #[test]
    fn test_not_a_command() {
        assert!(Command::parse("hello").is_none());
    }

    #[test]
    fn test_analyze() {
        assert_eq!(
            ok("/analyze aapl"),
            Command::Analyze {
                ticker: "AAPL".to_string(),
                date: None
            }
        );
        assert_eq!(
            ok("/analyze@trend_bot msft 2024-03-01"),
            Command::Analyze {
                ticker: "MSFT".to_string(),
                date: Some("2024-03-01".to_string())
            }
        );
        assert_eq!(usage("/analyze msft 03/01/2024"), DATE_HELP);
        assert!(usage("/analyze").starts_with("Usage"));
        assert!(usage("/analyze a b c").starts_with("Usage"));
    }

    #[test]
    fn test_analyze_all_date_is_last_argument() {
        assert_eq!(
            ok("/analyze_all aapl,msft nvda 2024-03-01"),
            Command::AnalyzeAll {
                tickers: vec!["AAPL".to_string(), "MSFT".to_string(), "NVDA".to_string()],
                date: Some("2024-03-01".to_string())
            }
        );
        assert_eq!(
            ok("/analyze_all 2024-03-01"),
            Command::AnalyzeAll {
                tickers: vec![],
                date: Some("2024-03-01".to_string())
            }
        );
        assert_eq!(
            ok("/analyze_all"),
            Command::AnalyzeAll {
                tickers: vec![],
                date: None
            }
        );
        assert_eq!(
            ok("/analyze_all aapl,,AAPL"),
            Command::AnalyzeAll {
                tickers: vec!["AAPL".to_string()],
                date: None
            }
        );
    }

    #[test]
    fn test_set_weights() {
        match ok("/setweights trend:0.5 momentum:0.3 junk") {
            Command::SetWeights(w) => {
                assert_eq!(w.len(), 2);
                assert_eq!(w.get("trend"), Some(&0.5));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(usage("/setweights trend:lots"), "Invalid value for trend: lots");
        assert!(usage("/setweights").starts_with("Please provide weights"));
    }

    #[test]
    fn test_set_prompt_keeps_layout() {
        assert_eq!(
            ok("/setmyprompt Rank these.\nBe brief."),
            Command::SetMyPrompt("Rank these.\nBe brief.".to_string())
        );
        assert_eq!(usage("/setmyprompt"), "Please provide a prompt text");
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(ok("/start"), Command::Start);
        assert_eq!(ok("/history"), Command::History);
        assert_eq!(ok("/ResetPrompt"), Command::ResetPrompt);
        assert_eq!(ok("/frobnicate"), Command::Unknown("frobnicate".to_string()));
    }
}
