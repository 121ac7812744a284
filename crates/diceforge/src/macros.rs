// ABOUTME: Macro definitions, tiered lookup, placeholder parsing and call prefixes.
// ABOUTME: Expands `{arg}` placeholders, `N#`/`NkhM#`/fortune prefixes and nested `[macro]` references.

use std::collections::BTreeSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::ast::{DropKeepType, Sign, TestType};
use crate::config::read_json;
use crate::error::Result;
use crate::tokenizer::{tokenize, Token, TokenParsers};

/// Placeholders in a macro body. Stat-block references are listed first so
/// `{pc::str}` is never read as a placeholder with a default.
static PLACEHOLDER_PARSERS: Lazy<TokenParsers> = Lazy::new(|| {
    TokenParsers::from_patterns(&[
        ("stat", r"\{[^{}]*::[^{}]*\}"),
        (
            "arg",
            r"(?i)(?:\b(ac|dc|vs)\s+)?\{\s*(\w+|\.\.\.|…)\s*(?::([^:{}][^{}]*)?)?\}",
        ),
    ])
    .expect("hardcoded regex")
});

/// Arguments following a macro name.
static ARG_PARSERS: Lazy<TokenParsers> = Lazy::new(|| {
    TokenParsers::from_patterns(&[
        ("named", r#"([\w-]+)=(?:"([^"]*)"|(\S*))"#),
        ("quoted", r#""([^"]*)""#),
        ("bare", r"\S+"),
    ])
    .expect("hardcoded regex")
});

static KEEP_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(\d*)(kh|kl|dh|dl)(\d*)\s*#\s*").expect("hardcoded regex"));
static COUNT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*#\s*").expect("hardcoded regex"));
static FORTUNE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([-+])\s*").expect("hardcoded regex"));

static DICE_TERM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d*)d(\d+)").expect("hardcoded regex"));
static FORTUNE_D20: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b1d20\b").expect("hardcoded regex"));

/// `[name args]` inside a macro body.
static MACRO_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*([^\[\]\s]+)\s*([^\[\]]*)\]").expect("hardcoded regex"));

/// What a macro body produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MacroKind {
    #[default]
    Dice,
    Table,
    Math,
    Items,
    TableUrl,
}

/// A user-authored template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub dice: String,
    #[serde(rename = "type", default)]
    pub kind: MacroKind,
}

impl Macro {
    /// Creates a dice macro with no category.
    pub fn dice(name: impl Into<String>, dice: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: None,
            dice: dice.into(),
            kind: MacroKind::Dice,
        }
    }
}

/// Looks up macros by name.
pub trait MacroSource {
    fn find_macro(&self, name: &str) -> Option<Macro>;
}

impl<F> MacroSource for F
where
    F: Fn(&str) -> Option<Macro>,
{
    fn find_macro(&self, name: &str) -> Option<Macro> {
        self(name)
    }
}

/// Macros grouped by owner. Lookup tries character, user, game, server,
/// then global macros, and names match case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroTiers {
    pub character: Vec<Macro>,
    pub user: Vec<Macro>,
    pub game: Vec<Macro>,
    pub server: Vec<Macro>,
    pub global: Vec<Macro>,
}

impl MacroTiers {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    fn tiers(&self) -> [(&'static str, &[Macro]); 5] {
        [
            ("character", self.character.as_slice()),
            ("user", self.user.as_slice()),
            ("game", self.game.as_slice()),
            ("server", self.server.as_slice()),
            ("global", self.global.as_slice()),
        ]
    }
}

impl MacroSource for MacroTiers {
    fn find_macro(&self, name: &str) -> Option<Macro> {
        self.tiers().into_iter().find_map(|(tier, macros)| {
            let found = macros.iter().find(|m| m.name.eq_ignore_ascii_case(name))?;
            tracing::trace!(name, tier, "found macro");
            Some(found.clone())
        })
    }
}

/// Which call argument a placeholder takes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArgKey {
    /// `{name}`, matched case-insensitively against `name=value` arguments.
    Named(String),
    /// `{0}`, `{1}`: positional arguments, zero-based.
    Indexed(usize),
    /// `{...}` or `{…}`: every positional argument no indexed placeholder uses.
    Remaining,
}

impl ArgKey {
    fn parse(key: &str) -> Self {
        match key {
            "..." | "…" => ArgKey::Remaining,
            _ => match key.parse() {
                Ok(index) if key.bytes().all(|b| b.is_ascii_digit()) => ArgKey::Indexed(index),
                _ => ArgKey::Named(key.to_lowercase()),
            },
        }
    }
}

/// A `{key}` or `{key:default}` placeholder in a macro body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroPlaceholder {
    pub key: ArgKey,
    pub default_value: Option<String>,
    /// The `ac`/`dc`/`vs` written just before the placeholder, kept for display.
    pub hint: Option<TestType>,
}

impl MacroPlaceholder {
    fn from_token(token: &Token) -> Self {
        Self {
            key: ArgKey::parse(token.capture(1).unwrap_or_default()),
            default_value: token.capture(2).map(|d| d.trim().to_string()),
            hint: token.capture(0).and_then(TestType::from_alias),
        }
    }
}

/// Lists a body's placeholders, keeping only the first occurrence of each key.
pub fn parse_placeholders(body: &str) -> Vec<MacroPlaceholder> {
    let mut seen = BTreeSet::new();
    tokenize(body, &PLACEHOLDER_PARSERS)
        .iter()
        .filter(|token| token.is("arg"))
        .map(MacroPlaceholder::from_token)
        .filter(|placeholder| seen.insert(placeholder.key.clone()))
        .collect()
}

/// Positional and `key=value` arguments of a macro call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroArgs {
    pub indexed: Vec<String>,
    /// Named arguments with lowercased keys, in call order.
    pub named: Vec<(String, String)>,
}

impl MacroArgs {
    /// Parses `a "b c" key=value key2="d e"`.
    pub fn parse(text: &str) -> Self {
        let mut args = Self::default();
        for token in tokenize(text, &ARG_PARSERS) {
            match token.key {
                "named" => {
                    let key = token.capture(0).unwrap_or_default().to_lowercase();
                    let value = token.capture(1).or(token.capture(2)).unwrap_or_default();
                    args.named.push((key, value.to_string()));
                }
                "quoted" => args
                    .indexed
                    .push(token.capture(0).unwrap_or_default().to_string()),
                "bare" => args.indexed.push(token.matched),
                _ => {}
            }
        }
        args
    }

    /// The first argument named `key`.
    pub fn named(&self, key: &str) -> Option<&str> {
        self.named
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Substitutes call arguments into a body's placeholders.
///
/// A placeholder takes its argument, else its default, else stays in the text
/// wrapped in backticks. The remaining-args placeholder becomes the unused
/// positional arguments joined by spaces, or its default when there are none.
///
/// # Examples
///
/// ```
/// use diceforge::macros::{expand_placeholders, MacroArgs};
///
/// let args = MacroArgs::parse("3 target=15");
/// assert_eq!(expand_placeholders("1d20+{0} vs {target}", &args), "1d20+3 vs 15");
/// assert_eq!(expand_placeholders("1d8+{mod}", &args), "1d8+`{mod}`");
/// ```
pub fn expand_placeholders(body: &str, args: &MacroArgs) -> String {
    let tokens = tokenize(body, &PLACEHOLDER_PARSERS);
    let used: BTreeSet<usize> = tokens
        .iter()
        .filter(|token| token.is("arg"))
        .filter_map(|token| match ArgKey::parse(token.capture(1).unwrap_or_default()) {
            ArgKey::Indexed(index) => Some(index),
            _ => None,
        })
        .collect();
    let remaining: Vec<&str> = args
        .indexed
        .iter()
        .enumerate()
        .filter(|(index, _)| !used.contains(index))
        .map(|(_, arg)| arg.as_str())
        .collect();

    tokens
        .into_iter()
        .map(|token| {
            if !token.is("arg") {
                return token.matched;
            }
            let placeholder = MacroPlaceholder::from_token(&token);
            let value = match &placeholder.key {
                ArgKey::Named(key) => args.named(key).map(str::to_string),
                ArgKey::Indexed(index) => args.indexed.get(*index).cloned(),
                ArgKey::Remaining if !remaining.is_empty() => Some(remaining.join(" ")),
                ArgKey::Remaining => Some(String::new()),
            };
            let value = match (value, placeholder.default_value) {
                (Some(value), Some(default)) if value.is_empty() => Some(default),
                (None, default) => default,
                (value, _) => value,
            };

            let brace = token.matched.find('{').unwrap_or(0);
            let (hint, placeholder_text) = token.matched.split_at(brace);
            match value {
                Some(value) => format!("{hint}{value}"),
                None => format!("{hint}`{placeholder_text}`"),
            }
        })
        .collect()
}

/// A marker written directly before a macro name in a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroCallPrefix {
    /// `N#`: expand the macro N times.
    RollCount(u32),
    /// `+` or `-`: roll the body's d20s with advantage or disadvantage,
    /// rewriting each `1d20` to `2d20kh1` or `2d20kl1`.
    Fortune(Sign),
    /// `NkhM#` and friends: apply a drop/keep to the body's first dice term.
    Keep {
        dice_count: Option<u32>,
        specifier: DropKeepType,
        keep_count: Option<u32>,
    },
}

/// Parses a prefix at the very start of `call`, returning it and the text after it.
///
/// Numbers too long for `u32` saturate to `u32::MAX`, which the engine rejects
/// against its dice count limit.
///
/// # Examples
///
/// ```
/// use diceforge::macros::{parse_call_prefix, MacroCallPrefix};
///
/// let (prefix, rest) = parse_call_prefix("3#attack").unwrap();
/// assert_eq!(prefix, MacroCallPrefix::RollCount(3));
/// assert_eq!(rest, "attack");
/// assert!(parse_call_prefix("attack").is_none());
/// ```
pub fn parse_call_prefix(call: &str) -> Option<(MacroCallPrefix, &str)> {
    let optional = |caps: &Captures<'_>, i: usize| {
        caps.get(i)
            .filter(|m| !m.is_empty())
            .map(|m| saturating_count(m.as_str()))
    };

    if let Some(caps) = KEEP_PREFIX.captures(call) {
        let prefix = MacroCallPrefix::Keep {
            dice_count: optional(&caps, 1),
            specifier: DropKeepType::from_alias(&caps[2]),
            keep_count: optional(&caps, 3),
        };
        return Some((prefix, rest(call, &caps)));
    }
    if let Some(caps) = COUNT_PREFIX.captures(call) {
        let count = saturating_count(&caps[1]);
        return Some((MacroCallPrefix::RollCount(count), rest(call, &caps)));
    }
    if let Some(caps) = FORTUNE_PREFIX.captures(call) {
        let sign = if &caps[1] == "-" { Sign::Minus } else { Sign::Plus };
        let remainder = rest(call, &caps);
        if !remainder.is_empty() {
            return Some((MacroCallPrefix::Fortune(sign), remainder));
        }
    }
    None
}

fn saturating_count(digits: &str) -> u32 {
    digits.parse().unwrap_or(u32::MAX)
}

fn rest<'a>(call: &'a str, caps: &Captures<'_>) -> &'a str {
    caps.get(0).map_or(call, |m| &call[m.end()..])
}

/// Applies a call prefix to an expanded body, returning one body per roll.
pub fn apply_call_prefix(body: &str, prefix: Option<&MacroCallPrefix>) -> Vec<String> {
    let Some(prefix) = prefix else {
        return vec![body.to_string()];
    };
    tracing::debug!(?prefix, body, "applying macro prefix");
    match *prefix {
        MacroCallPrefix::RollCount(count) => vec![body.to_string(); count.max(1) as usize],
        MacroCallPrefix::Fortune(sign) => {
            let replacement = match sign {
                Sign::Plus => "2d20kh1",
                Sign::Minus => "2d20kl1",
            };
            vec![FORTUNE_D20.replace_all(body, replacement).into_owned()]
        }
        MacroCallPrefix::Keep {
            dice_count,
            specifier,
            keep_count,
        } => {
            let rewritten = DICE_TERM.replacen(body, 1, |caps: &Captures<'_>| {
                let count = dice_count.map_or_else(
                    || match &caps[1] {
                        "" => "1".to_string(),
                        count => count.to_string(),
                    },
                    |count| count.to_string(),
                );
                format!(
                    "{count}d{}{}{}",
                    &caps[2],
                    specifier.alias(),
                    keep_count.unwrap_or(1)
                )
            });
            vec![rewritten.into_owned()]
        }
    }
}

/// Expands a macro's placeholders with `args`, then inlines every `[name args]`
/// reference to a known macro. References that would recurse into a macro
/// already being expanded, or nest deeper than `max_depth`, are left escaped.
pub fn expand_macro_body<M>(mac: &Macro, args: &MacroArgs, source: &M, max_depth: usize) -> String
where
    M: MacroSource + ?Sized,
{
    let mut stack = vec![mac.name.to_lowercase()];
    let body = expand_placeholders(&mac.dice, args);
    flatten(&body, source, max_depth, &mut stack)
}

fn flatten<M>(text: &str, source: &M, max_depth: usize, stack: &mut Vec<String>) -> String
where
    M: MacroSource + ?Sized,
{
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for caps in MACRO_REF.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let Some(found) = source.find_macro(&caps[1]) else {
            continue;
        };
        output.push_str(&text[last..whole.start()]);
        last = whole.end();

        let name = found.name.to_lowercase();
        if stack.contains(&name) || stack.len() >= max_depth {
            tracing::warn!(macro_name = %name, depth = stack.len(), "macro reference not expanded");
            output.push_str(&format!("`{}`", whole.as_str()));
            continue;
        }

        let body = expand_placeholders(&found.dice, &MacroArgs::parse(&caps[2]));
        stack.push(name);
        output.push_str(&flatten(&body, source, max_depth, stack));
        stack.pop();
    }
    output.push_str(&text[last..]);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> MacroTiers {
        MacroTiers {
            character: vec![Macro::dice("attack", "1d20+{mod:0} vs {ac:10}")],
            user: vec![Macro::dice("Attack", "1d20+99"), Macro::dice("dmg", "1d8+{0}")],
            global: vec![
                Macro::dice("full", "[attack mod=5] [dmg 3]"),
                Macro::dice("loop", "1d6 [loop]"),
                Macro::dice("ping", "[pong]"),
                Macro::dice("pong", "1d4 [ping]"),
            ],
            ..MacroTiers::default()
        }
    }

    #[test]
    fn test_tier_order() {
        let found = tiers().find_macro("ATTACK").unwrap();
        assert_eq!(found.dice, "1d20+{mod:0} vs {ac:10}");
        assert!(tiers().find_macro("missing").is_none());
    }

    #[test]
    fn test_macro_json() {
        let tiers = MacroTiers::from_json(
            r#"{"server": [{"name": "loot", "dice": "1d100", "type": "tableUrl", "category": "gm"}]}"#,
        )
        .unwrap();
        let found = tiers.find_macro("loot").unwrap();
        assert_eq!(found.kind, MacroKind::TableUrl);
        assert_eq!(found.category.as_deref(), Some("gm"));

        let plain = MacroTiers::from_json(r#"{"user": [{"name": "x", "dice": "1d6"}]}"#).unwrap();
        assert_eq!(plain.user[0].kind, MacroKind::Dice);
    }

    #[test]
    fn test_parse_placeholders() {
        let placeholders = parse_placeholders("{0}d6+{mod:2} vs {AC:15} {0} {...} {pc::str}");
        assert_eq!(
            placeholders,
            vec![
                MacroPlaceholder {
                    key: ArgKey::Indexed(0),
                    default_value: None,
                    hint: None
                },
                MacroPlaceholder {
                    key: ArgKey::Named("mod".into()),
                    default_value: Some("2".into()),
                    hint: None
                },
                MacroPlaceholder {
                    key: ArgKey::Named("ac".into()),
                    default_value: Some("15".into()),
                    hint: Some(TestType::Vs)
                },
                MacroPlaceholder {
                    key: ArgKey::Remaining,
                    default_value: None,
                    hint: None
                },
            ]
        );
    }

    #[test]
    fn test_ellipsis_character() {
        let placeholders = parse_placeholders("{…}");
        assert_eq!(placeholders[0].key, ArgKey::Remaining);
    }

    #[test]
    fn test_parse_args() {
        let args = MacroArgs::parse(r#"goblin "two words" AC=15 note="a b" x="#);
        assert_eq!(args.indexed, vec!["goblin", "two words"]);
        assert_eq!(args.named("ac"), Some("15"));
        assert_eq!(args.named("note"), Some("a b"));
        assert_eq!(args.named("x"), Some(""));
    }

    #[test]
    fn test_expand_placeholders() {
        let args = MacroArgs::parse("2 ac=17");
        assert_eq!(
            expand_placeholders("1d20+{0}+{mod:1} vs {ac:10}", &args),
            "1d20+2+1 vs 17"
        );
        assert_eq!(expand_placeholders("{1}", &args), "`{1}`");
        assert_eq!(expand_placeholders("ac {target}", &args), "ac `{target}`");
    }

    #[test]
    fn test_expand_leaves_stat_blocks() {
        let args = MacroArgs::parse("");
        assert_eq!(expand_placeholders("1d20+{pc::str}", &args), "1d20+{pc::str}");
        assert_eq!(
            expand_placeholders("{pc::str:{0}}", &MacroArgs::parse("4")),
            "{pc::str:4}"
        );
    }

    #[test]
    fn test_expand_remaining() {
        let args = MacroArgs::parse("a b c");
        assert_eq!(expand_placeholders("{1}: {...}", &args), "b: a c");
        assert_eq!(expand_placeholders("1d6 {...}", &MacroArgs::default()), "1d6 ");
        assert_eq!(
            expand_placeholders("1d6 {...:fire}", &MacroArgs::default()),
            "1d6 fire"
        );
    }

    #[test]
    fn test_parse_prefixes() {
        assert_eq!(
            parse_call_prefix("2kh1#attack"),
            Some((
                MacroCallPrefix::Keep {
                    dice_count: Some(2),
                    specifier: DropKeepType::KeepHighest,
                    keep_count: Some(1)
                },
                "attack"
            ))
        );
        assert_eq!(
            parse_call_prefix("kl#attack").map(|(p, _)| p),
            Some(MacroCallPrefix::Keep {
                dice_count: None,
                specifier: DropKeepType::KeepLowest,
                keep_count: None
            })
        );
        assert_eq!(
            parse_call_prefix("4# dmg"),
            Some((MacroCallPrefix::RollCount(4), "dmg"))
        );
        assert_eq!(
            parse_call_prefix("-attack"),
            Some((MacroCallPrefix::Fortune(Sign::Minus), "attack"))
        );
        assert_eq!(
            parse_call_prefix("99999999999kh1#x").map(|(p, _)| p),
            Some(MacroCallPrefix::Keep {
                dice_count: Some(u32::MAX),
                specifier: DropKeepType::KeepHighest,
                keep_count: Some(1)
            })
        );
        assert_eq!(
            parse_call_prefix("99999999999#x"),
            Some((MacroCallPrefix::RollCount(u32::MAX), "x"))
        );
        assert_eq!(parse_call_prefix("+"), None);
        assert_eq!(parse_call_prefix("attack 2#"), None);
    }

    #[test]
    fn test_apply_roll_count() {
        let bodies = apply_call_prefix("1d6", Some(&MacroCallPrefix::RollCount(3)));
        assert_eq!(bodies, vec!["1d6", "1d6", "1d6"]);
        assert_eq!(apply_call_prefix("1d6", None), vec!["1d6"]);
    }

    #[test]
    fn test_apply_fortune() {
        let plus = MacroCallPrefix::Fortune(Sign::Plus);
        assert_eq!(
            apply_call_prefix("1d20+5 then 11d20 and 1d20kh1", Some(&plus)),
            vec!["2d20kh1+5 then 11d20 and 1d20kh1"]
        );
        let minus = MacroCallPrefix::Fortune(Sign::Minus);
        assert_eq!(apply_call_prefix("1d20", Some(&minus)), vec!["2d20kl1"]);
    }

    #[test]
    fn test_apply_keep() {
        let keep = MacroCallPrefix::Keep {
            dice_count: Some(4),
            specifier: DropKeepType::KeepHighest,
            keep_count: Some(3),
        };
        assert_eq!(apply_call_prefix("1d6+2 1d4", Some(&keep)), vec!["4d6kh3+2 1d4"]);

        let keep = MacroCallPrefix::Keep {
            dice_count: None,
            specifier: DropKeepType::DropLowest,
            keep_count: None,
        };
        assert_eq!(apply_call_prefix("d8", Some(&keep)), vec!["1d8dl1"]);
    }

    #[test]
    fn test_flatten_nested() {
        let tiers = tiers();
        let full = tiers.find_macro("full").unwrap();
        assert_eq!(
            expand_macro_body(&full, &MacroArgs::default(), &tiers, 16),
            "1d20+5 vs 10 1d8+3"
        );
    }

    #[test]
    fn test_flatten_unknown_reference_untouched() {
        let mac = Macro::dice("inline", "[vs 15] [1d6]");
        assert_eq!(
            expand_macro_body(&mac, &MacroArgs::default(), &tiers(), 16),
            "[vs 15] [1d6]"
        );
    }

    #[test]
    fn test_flatten_cycles() {
        let tiers = tiers();
        let looped = tiers.find_macro("loop").unwrap();
        assert_eq!(
            expand_macro_body(&looped, &MacroArgs::default(), &tiers, 16),
            "1d6 `[loop]`"
        );
        let ping = tiers.find_macro("ping").unwrap();
        assert_eq!(
            expand_macro_body(&ping, &MacroArgs::default(), &tiers, 16),
            "1d4 `[ping]`"
        );
    }

    #[test]
    fn test_flatten_depth_limit() {
        let tiers = tiers();
        let full = tiers.find_macro("full").unwrap();
        assert_eq!(
            expand_macro_body(&full, &MacroArgs::default(), &tiers, 1),
            "`[attack mod=5]` `[dmg 3]`"
        );
    }

    #[test]
    fn test_closure_source() {
        let source = |name: &str| (name == "d").then(|| Macro::dice("d", "1d4"));
        let mac = Macro::dice("outer", "[d]+1");
        assert_eq!(expand_macro_body(&mac, &MacroArgs::default(), &source, 4), "1d4+1");
    }
}
