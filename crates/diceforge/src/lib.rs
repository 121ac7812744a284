// ABOUTME: Core library for resolving and rolling tabletop dice and macro text.
// ABOUTME: Tokenizer, arithmetic simplifier, dice pipeline, annotator, stat blocks and macros.

//! # Diceforge
//!
//! A dice-expression and macro-resolution engine for chat-based tabletop games.
//!
//! ## Quick Start
//!
//! ```
//! use diceforge::{roll_with_rng, simplify, FastRng};
//!
//! // Roll dice
//! let result = diceforge::roll("4d6dl1 + 2 fire").unwrap();
//! println!("{}", result);  // e.g., "4d6dl1[**6**, 4, 3, ~~2~~] +2 **fire** = 15"
//!
//! // Reproducible rolls
//! let mut rng = FastRng::with_seed(42);
//! let result = roll_with_rng("2d20kh1+5 ac 15", &mut rng).unwrap();
//! assert!(result.success.is_some());
//!
//! // Arithmetic only
//! assert_eq!(simplify("floor(3.7) + max(1, 4)"), "7");
//! ```
//!
//! ## Supported Notation
//!
//! - Dice terms: `2d6`, `d20`, `-1d4`, fixed rolls `3d6(2,5,1)`
//! - Drop/keep: `4d6dl1`, `4d6dh1`, `2d20kh1`, `2d20kl1`
//! - Exploding dice: `1d6!`, `3d6!5`, `1d6!!`
//! - Thresholds: `4d6th5`/`4d6max5`, `4d6tl2`/`4d6min2`
//! - No sort: `4d6ns`
//! - Tests: `1d20+5 ac 15`, `1d20 dc 12`, `2d6 >= 8`
//! - Stat blocks: `{pc::str}`, `{"Goblin King"::ac:12}`
//! - Macro calls: `attack goblin ac=15`, `3#dmg`, `2kh1#attack`, `+attack`
//! - Spoilers: `||1d20+5||`

pub mod annotate;
pub mod ast;
pub mod config;
pub mod engine;
pub mod error;
pub mod macros;
pub mod math;
pub mod parser;
pub mod roller;
pub mod stats;
pub mod tokenizer;

pub use ast::{
    DicePart, DiceTest, DropKeep, DropKeepType, Manipulation, Sign, TestType, Threshold,
    ThresholdType,
};
pub use config::EngineConfig;
pub use engine::{Engine, MacroOutput};
pub use error::{Error, Result};
pub use macros::{
    ArgKey, Macro, MacroArgs, MacroCallPrefix, MacroKind, MacroPlaceholder, MacroSource,
    MacroTiers,
};
pub use math::simplify;
pub use parser::DiceExpression;
pub use roller::{DiceRoll, FastRng, PartRoll, RollDatum, Rng, SortedRollResult};
pub use stats::{StatBlockReference, StatSheet, StatSheets, StatSource, StatSubject};

/// Parse and roll a dice expression in one step.
///
/// The text is simplified first, so `1d20+2+3` rolls as `1d20+5`.
///
/// # Examples
///
/// ```
/// let result = diceforge::roll("2d6 + 5").unwrap();
/// println!("Total: {}", result.total);
/// println!("Expression: {}", result.expression);
/// ```
pub fn roll(expr: &str) -> Result<DiceRoll> {
    roll_with_rng(expr, &mut FastRng::new())
}

/// Parse and roll with a custom RNG.
///
/// Useful for testing or when you need reproducible results.
///
/// # Examples
///
/// ```
/// use diceforge::{roll_with_rng, FastRng};
///
/// let mut rng = FastRng::with_seed(42);
/// let result = roll_with_rng("2d6", &mut rng).unwrap();
/// ```
pub fn roll_with_rng(expr: &str, rng: &mut impl Rng) -> Result<DiceRoll> {
    Engine::new(EngineConfig::default()).roll(expr, rng)
}

/// Parse a dice expression without rolling.
///
/// # Examples
///
/// ```
/// let expr = diceforge::parse("4d6dl1").unwrap();
/// assert_eq!(expr.parts[0].count, 4);
/// assert_eq!(expr.parts[0].sides, 6);
/// ```
pub fn parse(input: &str) -> Result<DiceExpression> {
    parser::parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_basic() {
        let result = roll("2d6").unwrap();
        assert!(result.total >= 2 && result.total <= 12);
    }

    #[test]
    fn test_roll_with_drop() {
        let result = roll("4d6dl1").unwrap();
        assert!(result.total >= 3 && result.total <= 18);
    }

    #[test]
    fn test_roll_expression() {
        let result = roll("2d6 + 5").unwrap();
        assert!(result.total >= 7 && result.total <= 17);
    }

    #[test]
    fn test_roll_simplifies_first() {
        let result = roll("1d1+2+3").unwrap();
        assert_eq!(result.total, 6);
        assert_eq!(result.parts.len(), 2);
    }

    #[test]
    fn test_roll_seeded() {
        let mut rng = FastRng::with_seed(42);
        let a = roll_with_rng("4d6", &mut rng).unwrap();
        let mut rng = FastRng::with_seed(42);
        let b = roll_with_rng("4d6", &mut rng).unwrap();
        assert_eq!(a.total, b.total);
        assert_eq!(a.expression, b.expression);
    }

    #[test]
    fn test_roll_errors() {
        assert!(matches!(roll("nothing here"), Err(Error::NoDice(_))));
        assert!(matches!(roll("1d0"), Err(Error::InvalidDiceSides(0))));
    }

    #[test]
    fn test_roll_huge_numbers_without_panicking() {
        let mut rng = FastRng::with_seed(1);
        let result = roll_with_rng("2d6(9223372036854775807,9223372036854775807)", &mut rng).unwrap();
        assert_eq!(result.total, 20000);
        let result = roll_with_rng("2d6tl9223372036854775807", &mut rng).unwrap();
        assert_eq!(result.total, 20000);
    }

    #[test]
    fn test_roll_fractional_modifier() {
        let mut rng = FastRng::with_seed(1);
        let result = roll_with_rng("1d1+5/2", &mut rng).unwrap();
        assert_eq!(result.total, 4);
        assert_eq!(result.parts.len(), 2);
        assert!(result.parts[1].part.description.is_empty());

        assert!(matches!(
            roll_with_rng("1d1+5000000000", &mut rng),
            Err(Error::InvalidModifier(_))
        ));
    }

    #[test]
    fn test_parse() {
        let expr = parse("1d20+5 ac 15").unwrap();
        assert_eq!(expr.parts.len(), 2);
        assert!(expr.test().is_some());
    }
}
