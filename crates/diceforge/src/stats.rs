// ABOUTME: Stat-block resolver for `{subject::key:default}` references in roll and macro text.
// ABOUTME: Substitutes character stats recursively, escaping unknown and cyclic references.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::config::{read_json, EngineConfig};
use crate::error::Result;
use crate::math;

/// `{subject::key}` or `{subject::key:default}`, where subject is a quoted
/// phrase or a bare run of words.
static STAT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\s*(?:"([^"{}]+)"|([^"{}:]+?))\s*::\s*([^{}:]+?)\s*(?::([^{}]*))?\}"#)
        .expect("hardcoded regex")
});

const PC_ALIASES: &[&str] = &["pc", "stat"];
const ALT_ALIASES: &[&str] = &["alt", "companion", "hireling", "familiar"];

/// Whose stats a reference reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum StatSubject {
    /// The active character.
    Pc,
    /// The active character's first companion.
    Alt,
    /// Any character looked up by name.
    Named(String),
}

/// A parsed `{subject::key:default}` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatBlockReference {
    /// Character name for named lookups.
    pub char_name: Option<String>,
    /// The reserved subject word used, lowercased, for self references.
    pub char_type: Option<String>,
    pub is_pc_type: bool,
    pub is_alt_type: bool,
    pub stat_key: String,
    pub default_value: Option<String>,
    /// Lowercased `subject::key`, used only to detect cycles.
    pub stack_value: String,
}

impl StatBlockReference {
    fn from_captures(caps: &Captures<'_>) -> Self {
        let quoted = caps.get(1).map(|m| m.as_str().trim());
        let bare = caps.get(2).map(|m| m.as_str().trim());
        let stat_key = caps[3].trim().to_string();
        let default_value = caps.get(4).map(|m| m.as_str().trim().to_string());

        let reserved = bare
            .map(str::to_ascii_lowercase)
            .filter(|word| PC_ALIASES.contains(&word.as_str()) || ALT_ALIASES.contains(&word.as_str()));

        match reserved {
            Some(char_type) => {
                let is_pc_type = PC_ALIASES.contains(&char_type.as_str());
                let subject = if is_pc_type { "pc" } else { "alt" };
                Self {
                    char_name: None,
                    stack_value: format!("{subject}::{}", stat_key.to_lowercase()),
                    is_pc_type,
                    is_alt_type: !is_pc_type,
                    char_type: Some(char_type),
                    stat_key,
                    default_value,
                }
            }
            None => {
                let name = quoted.or(bare).unwrap_or_default().to_string();
                Self {
                    stack_value: format!("{}::{}", name.to_lowercase(), stat_key.to_lowercase()),
                    char_name: Some(name),
                    char_type: None,
                    is_pc_type: false,
                    is_alt_type: false,
                    stat_key,
                    default_value,
                }
            }
        }
    }

    pub fn subject(&self) -> StatSubject {
        if self.is_pc_type {
            StatSubject::Pc
        } else if self.is_alt_type {
            StatSubject::Alt
        } else {
            StatSubject::Named(self.char_name.clone().unwrap_or_default())
        }
    }
}

/// Read-only access to character stats.
pub trait StatSource {
    /// Returns the raw value of `key` for `subject`, if the subject and key exist.
    fn get_stat(&self, subject: &StatSubject, key: &str) -> Option<String>;
}

impl<F> StatSource for F
where
    F: Fn(&StatSubject, &str) -> Option<String>,
{
    fn get_stat(&self, subject: &StatSubject, key: &str) -> Option<String> {
        self(subject, key)
    }
}

/// One character's stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatSheet {
    pub name: String,
    #[serde(default)]
    pub stats: BTreeMap<String, serde_json::Value>,
}

impl StatSheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stats: BTreeMap::new(),
        }
    }

    pub fn with_stat(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.stats.insert(key.into(), value.into());
        self
    }

    /// Case-insensitive lookup. Numbers and booleans come back as their JSON text.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = self
            .stats
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)?;
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// The characters visible to a resolution call, loadable from JSON.
///
/// ```json
/// {
///   "pc": { "name": "Ayla", "stats": { "str": 3, "hp": "{pc::con}+8" } },
///   "companions": [{ "name": "Rook", "stats": { "bite": "1d6" } }],
///   "characters": [{ "name": "Goblin King", "stats": { "ac": 15 } }]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatSheets {
    pub pc: Option<StatSheet>,
    pub companions: Vec<StatSheet>,
    pub characters: Vec<StatSheet>,
}

impl StatSheets {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    fn sheet(&self, subject: &StatSubject) -> Option<&StatSheet> {
        match subject {
            StatSubject::Pc => self.pc.as_ref(),
            StatSubject::Alt => self.companions.first(),
            StatSubject::Named(name) => self
                .pc
                .iter()
                .chain(&self.companions)
                .chain(&self.characters)
                .find(|sheet| sheet.name.eq_ignore_ascii_case(name)),
        }
    }
}

impl StatSource for StatSheets {
    fn get_stat(&self, subject: &StatSubject, key: &str) -> Option<String> {
        self.sheet(subject)?.get(key)
    }
}

/// Lists the unescaped stat-block references in `text`, in order.
pub fn parse_stat_blocks(text: &str) -> Vec<StatBlockReference> {
    STAT_BLOCK
        .captures_iter(text)
        .filter(|caps| {
            caps.get(0)
                .is_some_and(|m| !is_escaped(text, m.as_str(), m.start()))
        })
        .map(|caps| StatBlockReference::from_captures(&caps))
        .collect()
}

/// Replaces every stat-block reference in `text`, then simplifies the result.
///
/// Found values are resolved recursively. References that are unknown (with
/// no default) or that would recurse into themselves are left in place,
/// wrapped in backticks so they are not scanned again.
///
/// # Examples
///
/// ```
/// use diceforge::stats::{resolve_stat_blocks, StatSheet, StatSheets};
/// use diceforge::EngineConfig;
///
/// let sheets = StatSheets {
///     pc: Some(StatSheet::new("Ayla").with_stat("str", 3)),
///     ..StatSheets::default()
/// };
/// let config = EngineConfig::default();
/// assert_eq!(resolve_stat_blocks("1d20+{pc::str}+2", &sheets, &config), "1d20+5");
/// assert_eq!(resolve_stat_blocks("{pc::hp:10}", &sheets, &config), "10");
/// ```
pub fn resolve_stat_blocks<S>(text: &str, source: &S, config: &EngineConfig) -> String
where
    S: StatSource + ?Sized,
{
    let mut resolver = Resolver {
        source,
        max_passes: config.max_stat_passes,
        passes: 0,
        stack: Vec::new(),
    };
    let resolved = resolver.resolve(text);
    math::simplify(&resolved)
}

struct Resolver<'a, S: ?Sized> {
    source: &'a S,
    max_passes: usize,
    passes: usize,
    /// Stack values of the references currently being expanded.
    stack: Vec<String>,
}

impl<S: StatSource + ?Sized> Resolver<'_, S> {
    fn resolve(&mut self, text: &str) -> String {
        let mut current = text.to_string();
        loop {
            if self.passes >= self.max_passes {
                tracing::warn!(max_passes = self.max_passes, text = %current, "stat resolution pass limit reached");
                return current;
            }
            self.passes += 1;

            let next = self.pass(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn pass(&mut self, text: &str) -> String {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;
        for caps in STAT_BLOCK.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if is_escaped(text, whole.as_str(), whole.start()) {
                continue;
            }
            output.push_str(&text[last..whole.start()]);
            let reference = StatBlockReference::from_captures(&caps);
            output.push_str(&self.substitute(&reference, whole.as_str()));
            last = whole.end();
        }
        output.push_str(&text[last..]);
        output
    }

    fn substitute(&mut self, reference: &StatBlockReference, matched: &str) -> String {
        if self.stack.contains(&reference.stack_value) {
            tracing::debug!(reference = %reference.stack_value, "cyclic stat reference");
            return escape(matched);
        }

        let value = self
            .source
            .get_stat(&reference.subject(), &reference.stat_key)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| reference.default_value.clone());
        let Some(value) = value else {
            tracing::debug!(reference = %reference.stack_value, "unresolved stat reference");
            return escape(matched);
        };

        self.stack.push(reference.stack_value.clone());
        let resolved = self.resolve(&value);
        self.stack.pop();
        tracing::trace!(reference = %reference.stack_value, value = %resolved, "substituted stat");
        resolved
    }
}

fn escape(matched: &str) -> String {
    format!("`{matched}`")
}

fn is_escaped(text: &str, matched: &str, start: usize) -> bool {
    text[..start].ends_with('`') && text[start + matched.len()..].starts_with('`')
}
