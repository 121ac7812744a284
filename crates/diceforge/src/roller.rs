// ABOUTME: Dice rolling and the manipulation pipeline (drop/keep, explode, threshold, no-sort).
// ABOUTME: Produces per-part roll snapshots and whole-expression results with display text.

use std::fmt;

use serde::Serialize;

use crate::annotate::{annotate, render_description};
use crate::ast::{
    DicePart, DiceTest, DropKeep, DropKeepType, Manipulation, Sign, Threshold, ThresholdType,
};
use crate::config::EngineConfig;
use crate::parser::DiceExpression;

/// Source of uniformly distributed integers.
pub trait Rng {
    /// Generate a random number in the range [min, max].
    fn int(&mut self, min: u32, max: u32) -> u32;

    /// Roll a single die with the given number of sides.
    fn roll(&mut self, sides: u32) -> u32 {
        self.int(1, sides)
    }
}

/// Default RNG using fastrand.
pub struct FastRng(fastrand::Rng);

impl FastRng {
    pub fn new() -> Self {
        Self(fastrand::Rng::new())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self(fastrand::Rng::with_seed(seed))
    }
}

impl Default for FastRng {
    fn default() -> Self {
        Self::new()
    }
}

impl Rng for FastRng {
    fn int(&mut self, min: u32, max: u32) -> u32 {
        if max <= min {
            return min;
        }
        self.0.u32(min..=max)
    }
}

/// One generated or fixed die value and everything that happened to it.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RollDatum {
    pub value: i64,
    /// Position in generation order.
    pub index: usize,
    pub is_fixed: bool,
    pub is_dropped: bool,
    /// This die triggered an explosion.
    pub is_exploded: bool,
    /// This die was added by an explosion.
    pub is_explosion: bool,
    pub is_max: bool,
    pub is_min: bool,
    pub is_above_threshold: bool,
    pub is_below_threshold: bool,
    /// Value counted in place of `value` after a threshold clamp.
    pub threshold: Option<i64>,
    /// Decorated display text, filled in by the annotator.
    pub text: String,
}

impl RollDatum {
    fn new(value: i64, index: usize, sides: u32) -> Self {
        let sides = i64::from(sides);
        Self {
            value,
            index,
            is_max: value == sides,
            is_min: value == 1 && sides > 1,
            ..Self::default()
        }
    }

    /// The value this die contributes to a sum.
    pub fn effective_value(&self) -> i64 {
        self.threshold.unwrap_or(self.value)
    }
}

/// Snapshot of a dice part after rolling and manipulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortedRollResult {
    /// Rolls in generation order.
    pub by_index: Vec<RollDatum>,
    /// Rolls from highest to lowest value, ties in generation order.
    pub by_value: Vec<RollDatum>,
    /// Number of rolls still counted after manipulation.
    pub count: usize,
    /// Number of rolls before manipulation.
    pub initial_count: usize,
    pub sum: i64,
    pub initial_sum: i64,
    pub no_sort: bool,
}

impl SortedRollResult {
    /// Rolls in the order they should be displayed.
    pub fn display_order(&self) -> &[RollDatum] {
        if self.no_sort {
            &self.by_index
        } else {
            &self.by_value
        }
    }
}

/// Roll a single dice part and run its manipulations.
pub fn roll_part(part: &DicePart, rng: &mut impl Rng, config: &EngineConfig) -> SortedRollResult {
    if part.is_modifier() {
        let value = i64::from(part.count);
        return SortedRollResult {
            by_index: Vec::new(),
            by_value: Vec::new(),
            count: 0,
            initial_count: 0,
            sum: value,
            initial_sum: value,
            no_sort: false,
        };
    }

    let count = part.count as usize;
    let mut rolls: Vec<RollDatum> = part
        .fixed_rolls
        .iter()
        .take(count)
        .enumerate()
        .map(|(index, &value)| RollDatum {
            is_fixed: true,
            ..RollDatum::new(value, index, part.sides)
        })
        .collect();
    while rolls.len() < count {
        let value = i64::from(rng.roll(part.sides));
        rolls.push(RollDatum::new(value, rolls.len(), part.sides));
    }

    let initial_count = rolls.len();
    let initial_sum = sum(&rolls);

    for manipulation in &part.manipulations {
        match manipulation {
            Manipulation::DropKeep(drop_keep) => {
                apply_drop_keep(&mut rolls, *drop_keep, config.explosions_droppable)
            }
            Manipulation::Explode(face) => apply_explode(&mut rolls, part.sides, *face, rng),
            Manipulation::Threshold(threshold) => apply_threshold(&mut rolls, *threshold),
            Manipulation::NoSort => {}
        }
        tracing::trace!(part = %part, %manipulation, "applied manipulation");
    }

    for roll in &mut rolls {
        roll.text = annotate(roll);
    }

    let mut by_value = rolls.clone();
    by_value.sort_by(|a, b| b.value.cmp(&a.value).then(a.index.cmp(&b.index)));

    SortedRollResult {
        count: rolls.iter().filter(|r| !r.is_dropped).count(),
        initial_count,
        sum: sum(&rolls),
        initial_sum,
        no_sort: part.has_no_sort(),
        by_value,
        by_index: rolls,
    }
}

fn sum(rolls: &[RollDatum]) -> i64 {
    rolls
        .iter()
        .filter(|r| !r.is_dropped)
        .map(RollDatum::effective_value)
        .fold(0, i64::saturating_add)
}

/// Marks dice dropped according to a drop/keep descriptor.
///
/// Works on a copy of the still-counted rolls sorted ascending by value, ties
/// by generation order, and never reorders `rolls` itself.
fn apply_drop_keep(rolls: &mut [RollDatum], drop_keep: DropKeep, explosions_droppable: bool) {
    if drop_keep.value == 0 || drop_keep.kind == DropKeepType::None {
        return;
    }

    let mut candidates: Vec<(i64, usize)> = rolls
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.is_dropped && (explosions_droppable || !r.is_explosion))
        .map(|(i, r)| (r.value, i))
        .collect();
    candidates.sort_by_key(|&(value, i)| (value, rolls[i].index));

    let n = candidates.len();
    let k = (drop_keep.value as usize).min(n);
    let to_drop = match drop_keep.kind {
        DropKeepType::DropLowest => &candidates[..k],
        DropKeepType::DropHighest => &candidates[n - k..],
        DropKeepType::KeepLowest => &candidates[k..],
        DropKeepType::KeepHighest => &candidates[..n - k],
        DropKeepType::None => &candidates[..0],
    };
    for &(_, i) in to_drop {
        rolls[i].is_dropped = true;
    }
}

/// Appends one new die for each counted die showing the trigger face.
///
/// Each die explodes at most once; dice added here can only explode in a
/// later explode stage.
fn apply_explode(rolls: &mut Vec<RollDatum>, sides: u32, face: Option<i64>, rng: &mut impl Rng) {
    let trigger = face.unwrap_or(i64::from(sides));
    let exploding: Vec<usize> = rolls
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.is_dropped && !r.is_exploded && r.value == trigger)
        .map(|(i, _)| i)
        .collect();

    for i in exploding {
        rolls[i].is_exploded = true;
        let value = i64::from(rng.roll(sides));
        let index = rolls.len();
        rolls.push(RollDatum {
            is_explosion: true,
            ..RollDatum::new(value, index, sides)
        });
    }
}

/// Clamps counted dice that cross the threshold, keeping the rolled value for display.
fn apply_threshold(rolls: &mut [RollDatum], threshold: Threshold) {
    for roll in rolls.iter_mut().filter(|r| !r.is_dropped) {
        let current = roll.effective_value();
        match threshold.kind {
            ThresholdType::Above if current > threshold.value => {
                roll.threshold = Some(threshold.value);
                roll.is_above_threshold = true;
                roll.is_below_threshold = false;
            }
            ThresholdType::Below if current < threshold.value => {
                roll.threshold = Some(threshold.value);
                roll.is_below_threshold = true;
                roll.is_above_threshold = false;
            }
            _ => {}
        }
    }
}

/// One rolled dice part.
#[derive(Debug, Clone, Serialize)]
pub struct PartRoll {
    pub part: DicePart,
    pub result: SortedRollResult,
    /// The part's sum with its sign applied.
    pub total: i64,
}

/// Result of rolling a full dice expression.
#[derive(Debug, Clone, Serialize)]
pub struct DiceRoll {
    pub label: String,
    pub parts: Vec<PartRoll>,
    pub total: i64,
    pub test: Option<DiceTest>,
    /// Whether the total passed `test`, if there is one.
    pub success: Option<bool>,
    /// Formatted line showing the roll.
    pub expression: String,
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

/// Roll every part of a parsed expression.
pub fn roll_expression(
    expression: &DiceExpression,
    rng: &mut impl Rng,
    config: &EngineConfig,
) -> DiceRoll {
    let parts: Vec<PartRoll> = expression
        .parts
        .iter()
        .map(|part| {
            let result = roll_part(part, rng, config);
            PartRoll {
                total: part.sign.apply(result.sum),
                part: part.clone(),
                result,
            }
        })
        .collect();

    let total = parts.iter().map(|p| p.total).fold(0, i64::saturating_add);
    let test = expression.test();
    let success = test.map(|t| t.check(total));
    let expression_text = format_roll(&expression.label, &parts, total, test, success);
    tracing::debug!(total, expression = %expression_text, "rolled");

    DiceRoll {
        label: expression.label.clone(),
        parts,
        total,
        test,
        success,
        expression: expression_text,
    }
}

fn format_roll(
    label: &str,
    parts: &[PartRoll],
    total: i64,
    test: Option<DiceTest>,
    success: Option<bool>,
) -> String {
    let mut terms = Vec::with_capacity(parts.len());
    for (i, roll) in parts.iter().enumerate() {
        let mut term = if roll.part.is_modifier() {
            let text = roll.part.to_string();
            if i == 0 {
                text.trim_start_matches('+').to_string()
            } else {
                text
            }
        } else {
            let dice: Vec<&str> = roll
                .result
                .display_order()
                .iter()
                .map(|r| r.text.as_str())
                .collect();
            let sign = if i > 0 && roll.part.sign == Sign::Plus {
                "+"
            } else {
                ""
            };
            format!("{sign}{}[{}]", roll.part, dice.join(", "))
        };
        if !roll.part.description.is_empty() {
            term.push(' ');
            term.push_str(&render_description(&roll.part.description));
        }
        terms.push(term);
    }

    let mut line = String::new();
    if !label.is_empty() {
        line.push_str(label);
        line.push(' ');
    }
    line.push_str(&terms.join(" "));
    line.push_str(&format!(" = {total}"));
    if let (Some(test), Some(success)) = (test, success) {
        let outcome = if success { "success" } else { "failure" };
        line.push_str(&format!(" {test} {outcome}"));
    }
    line
}
