// ABOUTME: Engine facade binding configuration, stat lookup and macro lookup.
// ABOUTME: Resolves text, rolls expressions and runs macro calls end to end.

use std::fmt;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::macros::{
    apply_call_prefix, expand_macro_body, parse_call_prefix, MacroArgs, MacroCallPrefix,
    MacroKind, MacroSource, MacroTiers,
};
use crate::parser::parse_with_config;
use crate::roller::{roll_expression, DiceRoll, Rng};
use crate::stats::{resolve_stat_blocks, StatSheets, StatSource};

/// One line of macro output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MacroOutput {
    /// A line that contained dice and was rolled.
    Roll(DiceRoll),
    /// A line with no dice, or from a macro kind this engine does not roll.
    Text { text: String },
}

impl fmt::Display for MacroOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroOutput::Roll(roll) => write!(f, "{roll}"),
            MacroOutput::Text { text } => write!(f, "{text}"),
        }
    }
}

/// Resolves and rolls text against a stat source and a macro source.
///
/// # Examples
///
/// ```
/// use diceforge::{Engine, EngineConfig, FastRng, Macro, MacroTiers, StatSheet, StatSheets};
///
/// let stats = StatSheets {
///     pc: Some(StatSheet::new("Ayla").with_stat("str", 3)),
///     ..StatSheets::default()
/// };
/// let macros = MacroTiers {
///     user: vec![Macro::dice("hit", "1d20+{pc::str}+{bonus:0}")],
///     ..MacroTiers::default()
/// };
/// let engine = Engine::with_sources(EngineConfig::default(), stats, macros);
///
/// assert_eq!(engine.expand_macro("hit bonus=2").unwrap(), vec!["1d20+5"]);
///
/// let mut rng = FastRng::with_seed(7);
/// let outputs = engine.run_macro("+hit", &mut rng).unwrap();
/// assert_eq!(outputs.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Engine<S = StatSheets, M = MacroTiers> {
    config: EngineConfig,
    stats: S,
    macros: M,
}

impl Engine {
    /// Creates an engine with no characters and no macros.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_sources(config, StatSheets::default(), MacroTiers::default())
    }
}

impl<S: StatSource, M: MacroSource> Engine<S, M> {
    pub fn with_sources(config: EngineConfig, stats: S, macros: M) -> Self {
        Self {
            config,
            stats,
            macros,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Substitutes stat blocks and simplifies the arithmetic in `text`.
    pub fn resolve_text(&self, text: &str) -> String {
        resolve_stat_blocks(text, &self.stats, &self.config)
    }

    /// Resolves `text`, then parses and rolls it.
    pub fn roll(&self, text: &str, rng: &mut impl Rng) -> Result<DiceRoll> {
        let resolved = self.resolve_text(text);
        let expression = parse_with_config(&resolved, &self.config)?;
        Ok(roll_expression(&expression, rng, &self.config))
    }

    /// Expands a macro call into resolved lines, one per roll, without rolling them.
    ///
    /// The call is an optional prefix, the macro name and its arguments, e.g.
    /// `2kh1#attack goblin ac=15`. Surrounding brackets are accepted.
    pub fn expand_macro(&self, call: &str) -> Result<Vec<String>> {
        Ok(self.expand(call)?.1)
    }

    /// Expands a macro call and rolls every line that contains dice.
    pub fn run_macro(&self, call: &str, rng: &mut impl Rng) -> Result<Vec<MacroOutput>> {
        let (kind, lines) = self.expand(call)?;
        let mut outputs = Vec::with_capacity(lines.len());
        for line in lines {
            if kind != MacroKind::Dice {
                outputs.push(MacroOutput::Text { text: line });
                continue;
            }
            match parse_with_config(&line, &self.config) {
                Ok(expression) => {
                    outputs.push(MacroOutput::Roll(roll_expression(&expression, rng, &self.config)))
                }
                Err(Error::NoDice(_)) => outputs.push(MacroOutput::Text { text: line }),
                Err(e) => return Err(e),
            }
        }
        Ok(outputs)
    }

    fn expand(&self, call: &str) -> Result<(MacroKind, Vec<String>)> {
        let call = call.trim();
        let call = call
            .strip_prefix('[')
            .and_then(|c| c.strip_suffix(']'))
            .unwrap_or(call);

        let (prefix, rest) = match parse_call_prefix(call) {
            Some((prefix, rest)) => (Some(prefix), rest),
            None => (None, call),
        };
        let counts = match prefix {
            Some(MacroCallPrefix::RollCount(count)) => [Some(count), None],
            Some(MacroCallPrefix::Keep {
                dice_count,
                keep_count,
                ..
            }) => [dice_count, keep_count],
            _ => [None, None],
        };
        if let Some(count) = counts
            .into_iter()
            .flatten()
            .find(|&count| count > self.config.max_dice_count)
        {
            return Err(Error::InvalidDiceCount(count));
        }

        let rest = rest.trim_start();
        let (name, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if name.is_empty() {
            return Err(Error::EmptyMacroCall);
        }
        let found = self
            .macros
            .find_macro(name)
            .ok_or_else(|| Error::MacroNotFound(name.to_string()))?;

        let args = MacroArgs::parse(tail);
        let body = expand_macro_body(&found, &args, &self.macros, self.config.max_macro_depth);
        let lines: Vec<String> = apply_call_prefix(&body, prefix.as_ref())
            .iter()
            .flat_map(|body| body.lines())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| self.resolve_text(line))
            .collect();
        tracing::debug!(macro_name = %found.name, ?prefix, lines = lines.len(), "expanded macro");
        Ok((found.kind, lines))
    }
}
