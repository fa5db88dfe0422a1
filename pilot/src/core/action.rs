//! Action grammar: parsing, mechanical repair, and the premature-completion heuristic.
//!
//! ```text
//! fill(bid, text)  click(bid)  press(bid, key)  goto(url)  scroll(dx, dy)
//! send_msg_to_user(text)
//! ```
//!
//! Repairs never block execution. Every repaired statement is a fixed point: validating
//! it again yields the same code and no further repairs.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*;?\s*$").unwrap());
static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());
static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*(\+[A-Za-z0-9_]+)*$").unwrap());
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```(?:[A-Za-z]+\n)?\s*(.*?)\s*```\s*$").unwrap());

/// Phrases that mark a final message as incomplete or as a question back to the user.
const HEDGING_PHRASES: &[&str] = &[
    "would you like",
    "do you want",
    "if you want",
    "if you'd like",
    "shall i",
    "let me know if",
    "i couldn't find",
    "i could not find",
    "i was unable",
    "i wasn't able",
    "unable to find",
    "i can't find",
    "i cannot find",
];

/// A mechanical fix applied to action code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Repair {
    /// Removed markdown back-ticks or a fenced block around the statement.
    StrippedFence,
    /// Dropped arguments beyond the second on `fill`.
    DroppedExtraArgument,
    /// Quoted a bare numeric element id.
    QuotedBid,
    /// Quoted a bare key name on `press`.
    QuotedKey,
}

impl Repair {
    pub fn describe(self) -> &'static str {
        match self {
            Repair::StrippedFence => "removed markdown fence around action",
            Repair::DroppedExtraArgument => "dropped extra trailing argument to fill",
            Repair::QuotedBid => "quoted numeric element id",
            Repair::QuotedKey => "quoted key name for press",
        }
    }
}

/// Validated (and possibly repaired) action code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedAction {
    pub code: String,
    pub repairs: Vec<Repair>,
}

/// Parsed action statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Fill { bid: String, text: String },
    Click { bid: String },
    Press { bid: String, key: String },
    Goto { url: String },
    Scroll { dx: f64, dy: f64 },
    SendMsgToUser { text: String },
    /// Anything outside the fixed vocabulary; passed through untouched.
    Unknown,
}

/// Validate `code` against the action grammar, repairing known mistakes.
pub fn validate_action(code: &str) -> CheckedAction {
    let mut repairs = Vec::new();
    let mut code = code.trim().to_string();

    if let Some(inner) = strip_fence(&code) {
        code = inner;
        while let Some(inner) = strip_fence(&code) {
            code = inner;
        }
        repairs.push(Repair::StrippedFence);
    }

    let Some((name, args)) = split_call(&code) else {
        return CheckedAction { code, repairs };
    };
    let mut args = args;
    let mut touched = false;

    match name.as_str() {
        "fill" => {
            if args.len() > 2 {
                args.truncate(2);
                repairs.push(Repair::DroppedExtraArgument);
                touched = true;
            }
            if quote_numeric(args.first_mut()) {
                repairs.push(Repair::QuotedBid);
                touched = true;
            }
        }
        "click" => {
            if quote_numeric(args.first_mut()) {
                repairs.push(Repair::QuotedBid);
                touched = true;
            }
        }
        "press" => {
            if quote_numeric(args.first_mut()) {
                repairs.push(Repair::QuotedBid);
                touched = true;
            }
            if let Some(key) = args.get_mut(1)
                && KEY_RE.is_match(key)
            {
                *key = quote(key);
                repairs.push(Repair::QuotedKey);
                touched = true;
            }
        }
        _ => {}
    }

    if touched {
        code = format!("{name}({})", args.join(", "));
    }
    CheckedAction { code, repairs }
}

/// Parse a statement into a typed action. Does not repair.
pub fn parse_action(code: &str) -> Action {
    let Some((name, args)) = split_call(code.trim()) else {
        return Action::Unknown;
    };
    let string_arg = |idx: usize| args.get(idx).and_then(|arg| unquote(arg));
    let number_arg = |idx: usize| args.get(idx).and_then(|arg| arg.parse::<f64>().ok());

    match (name.as_str(), args.len()) {
        ("fill", 2) => match (string_arg(0), string_arg(1)) {
            (Some(bid), Some(text)) => Action::Fill { bid, text },
            _ => Action::Unknown,
        },
        ("click", 1) => string_arg(0).map_or(Action::Unknown, |bid| Action::Click { bid }),
        ("press", 2) => match (string_arg(0), string_arg(1)) {
            (Some(bid), Some(key)) => Action::Press { bid, key },
            _ => Action::Unknown,
        },
        ("goto", 1) => string_arg(0).map_or(Action::Unknown, |url| Action::Goto { url }),
        ("scroll", 2) => match (number_arg(0), number_arg(1)) {
            (Some(dx), Some(dy)) => Action::Scroll { dx, dy },
            _ => Action::Unknown,
        },
        ("send_msg_to_user", 1) => {
            string_arg(0).map_or(Action::Unknown, |text| Action::SendMsgToUser { text })
        }
        _ => Action::Unknown,
    }
}

/// First hedging phrase found in a final message, if any.
pub fn find_hedging_phrase(message: &str) -> Option<&'static str> {
    let lowered = message.to_lowercase().replace('\u{2019}', "'");
    HEDGING_PHRASES
        .iter()
        .copied()
        .find(|phrase| lowered.contains(phrase))
}

fn strip_fence(code: &str) -> Option<String> {
    if let Some(caps) = FENCE_RE.captures(code) {
        return caps.get(1).map(|m| m.as_str().trim().to_string());
    }
    let trimmed = code.trim_matches('`');
    if trimmed.len() != code.len() && !trimmed.is_empty() {
        return Some(trimmed.trim().to_string());
    }
    None
}

fn split_call(code: &str) -> Option<(String, Vec<String>)> {
    let caps = CALL_RE.captures(code)?;
    let name = caps.get(1)?.as_str().to_string();
    let args = split_args(caps.get(2)?.as_str())?;
    Some((name, args))
}

/// Split a call's argument list at top-level commas, keeping quoted literals verbatim.
///
/// Returns `None` for an unterminated string literal.
fn split_args(raw: &str) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote_char: Option<char> = None;
    let mut escaped = false;

    for ch in raw.chars() {
        if let Some(q) = quote_char {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote_char = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => {
                quote_char = Some(ch);
                current.push(ch);
            }
            ',' => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if quote_char.is_some() {
        return None;
    }
    let last = current.trim();
    if !last.is_empty() || !args.is_empty() {
        args.push(last.to_string());
    }
    Some(args)
}

fn quote_numeric(arg: Option<&mut String>) -> bool {
    match arg {
        Some(value) if NUMERIC_RE.is_match(value) => {
            *value = quote(value);
            true
        }
        _ => false,
    }
}

fn quote(value: &str) -> String {
    format!("'{value}'")
}

fn unquote(literal: &str) -> Option<String> {
    let mut chars = literal.chars();
    let open = chars.next()?;
    if (open != '\'' && open != '"') || literal.len() < 2 || !literal.ends_with(open) {
        return None;
    }
    let body = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut escaped = false;
    for ch in body.chars() {
        if escaped {
            out.push(match ch {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_actions_pass_through_untouched() {
        for code in [
            "fill('12', 'fax machine')",
            "click(\"13\")",
            "press('12', 'Enter')",
            "goto('https://shop.test')",
            "scroll(0, 300)",
            "send_msg_to_user(\"$279.49\")",
        ] {
            let checked = validate_action(code);
            assert_eq!(checked.code, code);
            assert!(checked.repairs.is_empty(), "{code}");
        }
    }

    #[test]
    fn drops_third_argument_to_fill() {
        let checked = validate_action("fill('12', 'query', True)");
        assert_eq!(checked.code, "fill('12', 'query')");
        assert_eq!(checked.repairs, vec![Repair::DroppedExtraArgument]);
    }

    #[test]
    fn quotes_numeric_bid_on_click_and_fill() {
        assert_eq!(validate_action("click(13)").code, "click('13')");
        let checked = validate_action("fill(12, 'a, b')");
        assert_eq!(checked.code, "fill('12', 'a, b')");
        assert_eq!(checked.repairs, vec![Repair::QuotedBid]);
    }

    #[test]
    fn quotes_key_name_on_press() {
        let checked = validate_action("press('12', Enter)");
        assert_eq!(checked.code, "press('12', 'Enter')");
        assert_eq!(checked.repairs, vec![Repair::QuotedKey]);
        assert_eq!(
            validate_action("press('12', ControlOrMeta+a)").code,
            "press('12', 'ControlOrMeta+a')"
        );
        let checked = validate_action("press(3, Enter)");
        assert_eq!(checked.code, "press('3', 'Enter')");
        assert_eq!(checked.repairs, vec![Repair::QuotedBid, Repair::QuotedKey]);
    }

    #[test]
    fn strips_markdown_fences() {
        let checked = validate_action("```python\nclick(13)\n```");
        assert_eq!(checked.code, "click('13')");
        assert_eq!(checked.repairs, vec![Repair::StrippedFence, Repair::QuotedBid]);
        assert_eq!(validate_action("`click('4')`").code, "click('4')");
    }

    #[test]
    fn strips_nested_fences_in_one_pass() {
        let checked = validate_action("```\n`click(13)`\n```");
        assert_eq!(checked.code, "click('13')");
        assert_eq!(checked.repairs, vec![Repair::StrippedFence, Repair::QuotedBid]);
        assert_eq!(validate_action("` `click('1')` `").code, "click('1')");
    }

    #[test]
    fn repair_is_a_fixed_point() {
        for code in [
            "fill(12, 'query', 'extra', 4)",
            "click(7)",
            "press(3, Enter)",
            "```click(13)```",
            "```\n`click(13)`\n```",
            "` `click('1')` `",
            "scroll(0, 200)",
            "noop(",
            "mouse_click(1, 2)",
            "",
        ] {
            let once = validate_action(code);
            let twice = validate_action(&once.code);
            assert_eq!(twice.code, once.code, "{code}");
            assert!(twice.repairs.is_empty(), "{code}");
        }
    }

    #[test]
    fn unknown_statements_are_not_rewritten() {
        let checked = validate_action("hover(5, 6)");
        assert_eq!(checked.code, "hover(5, 6)");
        assert_eq!(parse_action(&checked.code), Action::Unknown);
    }

    #[test]
    fn parses_typed_actions() {
        assert_eq!(
            parse_action("fill('12', 'it\\'s')"),
            Action::Fill {
                bid: "12".to_string(),
                text: "it's".to_string()
            }
        );
        assert_eq!(parse_action("scroll(0, -200.5)"), Action::Scroll { dx: 0.0, dy: -200.5 });
        assert_eq!(
            parse_action("send_msg_to_user(\"Price: $10, shipping free\")"),
            Action::SendMsgToUser {
                text: "Price: $10, shipping free".to_string()
            }
        );
        assert_eq!(parse_action("click(13)"), Action::Unknown);
    }

    #[test]
    fn hedging_phrases_are_case_insensitive() {
        assert_eq!(
            find_hedging_phrase("Found it. Would you like me to order?"),
            Some("would you like")
        );
        assert_eq!(find_hedging_phrase("I couldn\u{2019}t find the price"), Some("i couldn't find"));
        assert_eq!(find_hedging_phrase("$279.49"), None);
    }
}
