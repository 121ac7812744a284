// ABOUTME: Arithmetic simplifier applied to text before and after macro/stat substitution.
// ABOUTME: Collapses sign runs, folds numeric runs, and evaluates min/max/floor/ceil/round.

use std::fmt;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::tokenizer::next_boundary;

const NUM: &str = r"(?:\d+(?:\.\d+)?|\.\d+)";

/// Two or more signs, possibly spaced, that sit in front of a number.
static SIGN_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([-+](?:\s*[-+])+)(\s*[\d.])").expect("hardcoded regex"));

/// A number followed by at least one `op number` pair.
static CHAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?:[-+]\s*)?{NUM}(?:\s*[-+*/%^]\s*(?:[-+]\s*)?{NUM})+"
    ))
    .expect("hardcoded regex")
});

/// One `op number` pair within a chain; used to find where each operand ends.
static CHAIN_TERM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\s*([-+*/%^])\s*(?:[-+]\s*)?{NUM}")).expect("hardcoded regex")
});

static LEADING_OPERAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^(?:[-+]\s*)?{NUM}")).expect("hardcoded regex"));

/// A parenthesized chain or single number.
static PAREN_GROUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"\(\s*((?:[-+]\s*)?{NUM}(?:\s*[-+*/%^]\s*(?:[-+]\s*)?{NUM})*)\s*\)"
    ))
    .expect("hardcoded regex")
});

static FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(min|max|floor|ceil|round)\s*\(([^()]*)\)").expect("hardcoded regex")
});

static DIE_SIZE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[dD]\d").expect("hardcoded regex"));

/// Outcome of evaluating an arithmetic expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluated {
    Number(f64),
    /// The expression evaluated to NaN.
    NaN,
    /// The expression was malformed, divided by zero, or overflowed.
    Error,
}

impl Evaluated {
    pub fn value(&self) -> Option<f64> {
        match self {
            Evaluated::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn from_f64(value: f64) -> Self {
        if value.is_nan() {
            Evaluated::NaN
        } else if value.is_infinite() {
            Evaluated::Error
        } else {
            Evaluated::Number(value)
        }
    }
}

impl fmt::Display for Evaluated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluated::Number(n) => write!(f, "{}", format_number(*n)),
            Evaluated::NaN => write!(f, "(NaN)"),
            Evaluated::Error => write!(f, "(ERR)"),
        }
    }
}

/// Formats a number the way it should appear in resolved text.
///
/// Whole numbers lose their fractional part and negative zero prints as `0`.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else {
        format!("{value}")
    }
}

/// Parses text that is nothing but a (possibly signed) number.
pub fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text).trim_start();
    if unsigned.is_empty() || !unsigned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let value: f64 = unsigned.parse().ok()?;
    Some(if text.starts_with('-') { -value } else { value })
}

/// Evaluates an arithmetic expression of numbers and `+ - * / % ^`.
///
/// `^` is right-associative exponentiation and binds tighter than unary signs,
/// so `-2^2` is `-4`. Division or remainder by zero is an error.
pub fn evaluate(expr: &str) -> Evaluated {
    let mut eval = Evaluator {
        chars: expr.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
    };
    match eval.expression() {
        Some(value) if eval.pos == eval.chars.len() => Evaluated::from_f64(value),
        _ => Evaluated::Error,
    }
}

struct Evaluator {
    chars: Vec<char>,
    pos: usize,
}

impl Evaluator {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expression(&mut self) -> Option<f64> {
        let mut left = self.term()?;
        loop {
            if self.eat('+') {
                left += self.term()?;
            } else if self.eat('-') {
                left -= self.term()?;
            } else {
                return Some(left);
            }
        }
    }

    fn term(&mut self) -> Option<f64> {
        let mut left = self.unary()?;
        loop {
            if self.eat('*') {
                left *= self.unary()?;
            } else if self.eat('/') {
                let right = self.unary()?;
                if right == 0.0 {
                    return None;
                }
                left /= right;
            } else if self.eat('%') {
                let right = self.unary()?;
                if right == 0.0 {
                    return None;
                }
                left %= right;
            } else {
                return Some(left);
            }
        }
    }

    fn unary(&mut self) -> Option<f64> {
        if self.eat('-') {
            Some(-self.unary()?)
        } else if self.eat('+') {
            self.unary()
        } else {
            self.power()
        }
    }

    fn power(&mut self) -> Option<f64> {
        let base = self.atom()?;
        if self.eat('^') {
            Some(base.powf(self.unary()?))
        } else {
            Some(base)
        }
    }

    fn atom(&mut self) -> Option<f64> {
        if self.eat('(') {
            let value = self.expression()?;
            return self.eat(')').then_some(value);
        }
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        self.chars[start..self.pos].iter().collect::<String>().parse().ok()
    }
}

/// Rewrites every run of two or more signs in front of a number into the single
/// sign it amounts to: `--5` becomes `+5`, `+-5` becomes `-5`.
pub fn collapse_signs(input: &str) -> String {
    fixed_point(input, |text| {
        SIGN_RUN
            .replace_all(text, |caps: &Captures<'_>| {
                let minuses = caps[1].chars().filter(|&c| c == '-').count();
                let sign = if minuses % 2 == 1 { '-' } else { '+' };
                format!("{sign}{}", &caps[2])
            })
            .into_owned()
    })
}

/// Folds parenthesized groups and runs of numbers joined by operators into
/// their values, after collapsing sign runs. Runs that belong to dice notation
/// (`2d6`, `(1+1)d6`) or that would change meaning because of a tighter operator
/// on either side are left alone.
pub fn simplify_simple(input: &str) -> String {
    fixed_point(input, |text| {
        let collapsed = collapse_signs(text);
        let grouped = replace_outside_dice_counts(&collapsed, &PAREN_GROUP, paren_candidate);
        replace_outside_dice_counts(&grouped, &CHAIN, chain_candidate)
    })
}

/// Evaluates `min`, `max`, `floor`, `ceil` and `round` calls whose arguments
/// reduce to numbers. Calls directly followed by a die size are skipped.
pub fn simplify_functions(input: &str) -> String {
    fixed_point(input, |text| {
        replace_outside_dice_counts(text, &FUNCTION, function_candidate)
    })
}

/// Runs every simplification pass until the text stops changing.
///
/// # Examples
///
/// ```
/// use diceforge::math::simplify;
///
/// assert_eq!(simplify("--5"), "+5");
/// assert_eq!(simplify("min(2,7,4)"), "2");
/// assert_eq!(simplify("1d20+3+2"), "1d20+5");
/// assert_eq!(simplify("||2*3||"), "||6||");
/// ```
pub fn simplify(input: &str) -> String {
    let output = fixed_point(input, |text| simplify_functions(&simplify_simple(text)));
    if output != input {
        tracing::trace!(input, output = %output, "simplified");
    }
    output
}

fn fixed_point(input: &str, pass: impl Fn(&str) -> String) -> String {
    let mut current = input.to_string();
    loop {
        let next = pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Replaces matches of `regex` for which `candidate` yields a replacement.
///
/// `candidate` returns the end of the text it replaces (which may be shorter
/// than the match) and the replacement. Rejected matches are retried one
/// character later so a valid suffix can still be found.
fn replace_candidates(
    input: &str,
    regex: &Regex,
    candidate: impl Fn(&str, &Captures<'_>) -> Option<(usize, String)>,
) -> String {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;
    let mut pos = 0;

    while pos <= input.len() {
        let Some(caps) = regex.captures_at(input, pos) else {
            break;
        };
        let Some(whole) = caps.get(0) else {
            break;
        };
        match candidate(input, &caps) {
            Some((end, replacement)) => {
                output.push_str(&input[last..whole.start()]);
                output.push_str(&replacement);
                last = end;
                pos = end.max(next_boundary(input, whole.start()));
            }
            None => pos = next_boundary(input, whole.start()),
        }
    }

    output.push_str(&input[last.min(input.len())..]);
    output
}

/// Like `replace_candidates`, but leaves every match inside a dice count
/// such as `(2+3)d6` or `max(1+1,2)d6` untouched.
fn replace_outside_dice_counts(
    input: &str,
    regex: &Regex,
    candidate: impl Fn(&str, &Captures<'_>) -> Option<(usize, String)>,
) -> String {
    let protected = dice_count_spans(input);
    replace_candidates(input, regex, |text, caps| {
        let whole = caps.get(0)?;
        if protected
            .iter()
            .any(|span| whole.start() < span.end && span.start < whole.end())
        {
            return None;
        }
        candidate(text, caps)
    })
}

/// Spans of parenthesized groups, with any function name before them, that
/// are directly followed by a die size.
fn dice_count_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    for (close, _) in text.match_indices(')') {
        if !DIE_SIZE_SUFFIX.is_match(&text[close + 1..]) {
            continue;
        }
        let mut depth = 0usize;
        let mut open = None;
        for (i, c) in text[..=close].char_indices().rev() {
            match c {
                ')' => depth += 1,
                '(' => {
                    depth -= 1;
                    if depth == 0 {
                        open = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(open) = open else {
            continue;
        };
        let before = text[..open].trim_end();
        let name_start = before
            .trim_end_matches(|c: char| c.is_alphanumeric() || c == '_')
            .len();
        let start = if name_start < before.len() { name_start } else { open };
        spans.push(start..close + 1);
    }
    spans
}

fn prev_char(text: &str, pos: usize) -> Option<char> {
    text[..pos].chars().next_back()
}

fn next_char(text: &str, pos: usize) -> Option<char> {
    text[pos..].chars().next()
}

fn prev_non_space(text: &str, pos: usize) -> Option<char> {
    text[..pos].chars().rev().find(|c| !c.is_whitespace())
}

fn next_non_space(text: &str, pos: usize) -> Option<char> {
    text[pos..].chars().find(|c| !c.is_whitespace())
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn starts_with_sign(text: &str) -> bool {
    text.starts_with(['+', '-'])
}

fn paren_candidate(input: &str, caps: &Captures<'_>) -> Option<(usize, String)> {
    let whole = caps.get(0)?;
    // A word right before the paren makes this a function call.
    if prev_char(input, whole.start()).is_some_and(is_word_char) {
        return None;
    }
    // `(2+3)d6` is dice notation.
    if next_char(input, whole.end()).is_some_and(|c| is_word_char(c) || c == '(') {
        return None;
    }
    let inner = &caps[1];
    let result = evaluate(inner);
    if let Evaluated::Number(n) = result {
        if n < 0.0 && next_non_space(input, whole.end()) == Some('^') {
            return None;
        }
    }
    Some((whole.end(), render(inner, result)))
}

fn chain_candidate(input: &str, caps: &Captures<'_>) -> Option<(usize, String)> {
    let whole = caps.get(0)?;
    let text = whole.as_str();
    let signed = starts_with_sign(text);

    let prev = prev_non_space(input, whole.start());
    if signed {
        if matches!(prev, Some('*' | '/' | '%' | '^')) {
            return None;
        }
    } else if prev_char(input, whole.start()).is_some_and(is_word_char)
        || matches!(prev, Some('+' | '-' | '*' | '/' | '%' | '^' | ')'))
    {
        return None;
    }

    // Absolute end offsets of each operand, with the operator that preceded it.
    let first_end = whole.start() + LEADING_OPERAND.find(text)?.end();
    let mut ends = vec![(first_end, None)];
    let mut offset = first_end;
    while let Some(term) = CHAIN_TERM.captures(&input[offset..whole.end()]) {
        let matched = term.get(0)?;
        if matched.start() != 0 {
            break;
        }
        let op = term[1].chars().next();
        offset += matched.end();
        ends.push((offset, op));
    }

    // Try the longest run first, trimming operands until what follows is safe.
    for cut in (1..ends.len()).rev() {
        let end = ends[cut].0;
        let ops: Vec<char> = ends[1..=cut].iter().filter_map(|(_, op)| *op).collect();
        if !safe_to_fold(input, end, &ops) {
            continue;
        }
        let expr = &input[whole.start()..end];
        return Some((end, render(expr, evaluate(expr))));
    }
    None
}

fn safe_to_fold(input: &str, end: usize, ops: &[char]) -> bool {
    if next_char(input, end).is_some_and(is_word_char) {
        return false;
    }
    match next_non_space(input, end) {
        Some('^' | '(') => false,
        Some('*' | '/' | '%') => ops.iter().all(|op| matches!(op, '*' | '/' | '%')),
        _ => true,
    }
}

fn render(expr: &str, result: Evaluated) -> String {
    match result {
        Evaluated::Number(n) if n >= 0.0 && starts_with_sign(expr.trim_start()) => {
            format!("+{}", format_number(n))
        }
        other => other.to_string(),
    }
}

fn function_candidate(input: &str, caps: &Captures<'_>) -> Option<(usize, String)> {
    let whole = caps.get(0)?;
    if DIE_SIZE_SUFFIX.is_match(&input[whole.end()..]) {
        return None;
    }

    let name = caps[1].to_ascii_lowercase();
    let args_text = caps[2].trim();
    if args_text.is_empty() {
        return Some((whole.end(), Evaluated::Error.to_string()));
    }

    let mut args = Vec::new();
    for arg in args_text.split(',') {
        let reduced = simplify_simple(arg.trim());
        match reduced.as_str() {
            "(ERR)" => return Some((whole.end(), Evaluated::Error.to_string())),
            "(NaN)" => return Some((whole.end(), Evaluated::NaN.to_string())),
            _ => args.push(parse_number(&reduced)?),
        }
    }

    let result = match (name.as_str(), args.as_slice()) {
        ("min", _) => args.iter().copied().fold(f64::INFINITY, f64::min),
        ("max", _) => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ("floor", [x]) => x.floor(),
        ("ceil", [x]) => x.ceil(),
        // Halves round toward positive infinity.
        ("round", [x]) => (x + 0.5).floor(),
        _ => return Some((whole.end(), Evaluated::Error.to_string())),
    };
    Some((whole.end(), Evaluated::from_f64(result).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_signs() {
        assert_eq!(collapse_signs("--5"), "+5");
        assert_eq!(collapse_signs("+-3"), "-3");
        assert_eq!(collapse_signs("3 - - -2"), "3 -2");
        assert_eq!(collapse_signs("1d20+-2"), "1d20-2");
        assert_eq!(collapse_signs("no signs"), "no signs");
    }

    #[test]
    fn test_collapse_signs_needs_a_number() {
        assert_eq!(collapse_signs("-- note"), "-- note");
    }

    #[test]
    fn test_simplify_examples() {
        assert_eq!(simplify("--5"), "+5");
        assert_eq!(simplify("+-3"), "-3");
        assert_eq!(simplify("min(2,7,4)"), "2");
        assert_eq!(simplify("floor(3.7)"), "3");
    }

    #[test]
    fn test_precedence() {
        assert_eq!(simplify("2+3*4"), "14");
        assert_eq!(simplify("(2+3)*4"), "20");
        assert_eq!(simplify("2^3^2"), "512");
        assert_eq!(simplify("-2^2"), "-4");
        assert_eq!(simplify("7%4"), "3");
        assert_eq!(simplify("1/4"), "0.25");
    }

    #[test]
    fn test_leading_sign_kept_when_non_negative() {
        assert_eq!(simplify("+2+3"), "+5");
        assert_eq!(simplify("-2+3"), "+1");
        assert_eq!(simplify("-5+3"), "-2");
        assert_eq!(simplify("2+3"), "5");
    }

    #[test]
    fn test_dice_left_intact() {
        assert_eq!(simplify("2d6"), "2d6");
        assert_eq!(simplify("1d20+3+2"), "1d20+5");
        assert_eq!(simplify("1d20-3+1"), "1d20-2");
        assert_eq!(simplify("1+2+1d6"), "3+1d6");
        assert_eq!(simplify("2*3+1d6"), "6+1d6");
        assert_eq!(simplify("1+2*1d6"), "1+2*1d6");
        assert_eq!(simplify("(2+3)d6"), "(2+3)d6");
        assert_eq!(simplify("4d6dl1 + 2 - 1"), "4d6dl1 +1");
    }

    #[test]
    fn test_tighter_operator_blocks_fold() {
        assert_eq!(simplify("x*2+3"), "x*2+3");
        assert_eq!(simplify("2+3*x"), "2+3*x");
        assert_eq!(simplify("2*3*x"), "6*x");
        assert_eq!(simplify("2*-3+4"), "-2");
    }

    #[test]
    fn test_errors() {
        assert_eq!(simplify("1/0"), "(ERR)");
        assert_eq!(simplify("roll 5%0 now"), "roll (ERR) now");
        assert_eq!(simplify("(-8)^0.5"), "(-8)^0.5");
        assert_eq!(simplify("0-4^0.5"), "-2");
    }

    #[test]
    fn test_nan() {
        assert_eq!(evaluate("(0-8)^0.5"), Evaluated::NaN);
        assert_eq!(Evaluated::NaN.to_string(), "(NaN)");
    }

    #[test]
    fn test_spoilers_preserved() {
        assert_eq!(simplify("||2+3||"), "||5||");
        assert_eq!(simplify("||--4||"), "||+4||");
        assert_eq!(simplify("||max(1,9)||"), "||9||");
    }

    #[test]
    fn test_functions() {
        assert_eq!(simplify("max(1, 2+3, 4)"), "5");
        assert_eq!(simplify("ceil(3.2)"), "4");
        assert_eq!(simplify("round(2.5)"), "3");
        assert_eq!(simplify("round(-2.5)"), "-2");
        assert_eq!(simplify("MIN(3,1)"), "1");
        assert_eq!(simplify("max(min(2,3),1)"), "2");
        assert_eq!(simplify("floor(1,2)"), "(ERR)");
        assert_eq!(simplify("min()"), "(ERR)");
    }

    #[test]
    fn test_function_before_die_size_is_skipped() {
        assert_eq!(simplify("max(1,2)d6"), "max(1,2)d6");
    }

    #[test]
    fn test_dice_count_groups_are_not_rewritten() {
        assert_eq!(simplify("max(1+1,2)d6"), "max(1+1,2)d6");
        assert_eq!(simplify("((1+2))d6"), "((1+2))d6");
        assert_eq!(simplify("max(min(1,2),3)d6"), "max(min(1,2),3)d6");
        assert_eq!(simplify("1+2+(2+3)d6"), "3+(2+3)d6");
        assert_eq!(simplify("(2+3)d6 + (1+1)"), "(2+3)d6 + 2");
    }

    #[test]
    fn test_function_with_dice_args_is_skipped() {
        assert_eq!(simplify("max(1d6, 3)"), "max(1d6, 3)");
    }

    #[test]
    fn test_evaluate() {
        assert_eq!(evaluate("1 + 2 * 3"), Evaluated::Number(7.0));
        assert_eq!(evaluate("2^-1"), Evaluated::Number(0.5));
        assert_eq!(evaluate("1 +"), Evaluated::Error);
        assert_eq!(evaluate("4/0"), Evaluated::Error);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" -3.5 "), Some(-3.5));
        assert_eq!(parse_number("+7"), Some(7.0));
        assert_eq!(parse_number("1d6"), None);
        assert_eq!(parse_number(""), None);
    }
}
