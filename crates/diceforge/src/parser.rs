// ABOUTME: Parser turning resolved roll text into dice parts.
// ABOUTME: Drives the shared tokenizer and folds its tokens into signed terms with manipulations.

use once_cell::sync::Lazy;

use crate::ast::{
    DicePart, DiceTest, DropKeep, DropKeepType, Manipulation, Sign, TestType, Threshold,
    ThresholdType,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::tokenizer::{tokenize, Token, TokenParsers};

/// Token patterns for roll text. Order matters: `dice` must win ties against `mod`.
static DICE_PARSERS: Lazy<TokenParsers> = Lazy::new(|| {
    TokenParsers::from_patterns(&[
        (
            "dice",
            r"(?i)(?:([-+])\s*)?\b(\d*)d(\d+)(?:\((\d+(?:\s*,\s*\d+)*)\))?",
        ),
        ("test", r"(?i)(?:\b(ac|dc|vs)\s*|(>=|<=|>|<|=)\s*)(\d+)"),
        ("dropKeep", r"(?i)(dl|dh|kl|kh)(\d*)"),
        ("threshold", r"(?i)(th|tl|max|min)(\d+)"),
        ("explode", r"!(\d*)"),
        ("noSort", r"(?i)ns"),
        ("mod", r"([-+])?\s*(\d+(?:\.\d+)?)"),
    ])
    .expect("hardcoded regex")
});

/// A parsed roll: optional leading label text followed by dice parts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiceExpression {
    /// Text before the first dice part.
    pub label: String,
    pub parts: Vec<DicePart>,
}

impl DiceExpression {
    /// The first test attached to any part, which applies to the whole roll.
    pub fn test(&self) -> Option<DiceTest> {
        self.parts.iter().find_map(|part| part.test)
    }
}

/// Parser for roll text.
pub struct Parser<'a> {
    config: &'a EngineConfig,
    expression: DiceExpression,
    current: Option<DicePart>,
    /// True while tokens directly follow a dice term, so suffixes are manipulations.
    in_suffix: bool,
}

impl<'a> Parser<'a> {
    /// Create a new parser bound to the given limits.
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            expression: DiceExpression::default(),
            current: None,
            in_suffix: false,
        }
    }

    /// Parse the input into dice parts.
    pub fn parse(mut self, input: &str) -> Result<DiceExpression> {
        for token in tokenize(input, &DICE_PARSERS) {
            self.token(token)?;
        }
        self.finish_part();

        let mut expression = self.expression;
        expression.label = expression.label.trim().to_string();
        if expression.parts.is_empty() {
            return Err(Error::NoDice(input.to_string()));
        }
        tracing::debug!(input, parts = expression.parts.len(), "parsed dice");
        Ok(expression)
    }

    fn token(&mut self, token: Token) -> Result<()> {
        match token.key {
            "dice" => {
                let part = self.dice_part(&token)?;
                self.start_part(part);
                self.in_suffix = true;
            }
            "mod" => {
                let first = self.current.is_none()
                    && self.expression.parts.is_empty()
                    && self.expression.label.trim().is_empty();
                match token.non_empty(0) {
                    Some(sign) => {
                        let value = parse_modifier(token.capture(1))?;
                        self.start_part(DicePart::modifier(parse_sign(sign), value));
                    }
                    None if first => {
                        let value = parse_modifier(token.capture(1))?;
                        self.start_part(DicePart::modifier(Sign::Plus, value));
                    }
                    None => self.text(&token.matched),
                }
                self.in_suffix = false;
            }
            "test" if self.current.is_some() => {
                let alias = token.non_empty(0).or(token.non_empty(1)).unwrap_or_default();
                if let (Some(kind), Some(part)) = (TestType::from_alias(alias), self.current.as_mut()) {
                    part.test = Some(DiceTest {
                        kind,
                        value: parse_bounded(token.capture(2), i64::MAX),
                    });
                }
                self.in_suffix = false;
            }
            "dropKeep" | "threshold" | "explode" | "noSort" if self.in_suffix => {
                let manipulation = manipulation(&token, self.config);
                if let Some(part) = self.current.as_mut() {
                    part.manipulations.push(manipulation);
                }
            }
            _ => {
                self.text(&token.matched);
                self.in_suffix = false;
            }
        }
        Ok(())
    }

    fn dice_part(&self, token: &Token) -> Result<DicePart> {
        let count = token.non_empty(1).map_or(1, |c| parse_u32(Some(c)));
        let sides = parse_u32(token.capture(2));
        if count == 0 || count > self.config.max_dice_count {
            return Err(Error::InvalidDiceCount(count));
        }
        if sides == 0 || sides > self.config.max_dice_sides {
            return Err(Error::InvalidDiceSides(sides));
        }

        let mut part = DicePart::dice(count, sides);
        if let Some(sign) = token.non_empty(0) {
            part.sign = parse_sign(sign);
        }
        if let Some(fixed) = token.non_empty(3) {
            let max = i64::from(self.config.max_dice_sides);
            part.fixed_rolls = fixed
                .split(',')
                .map(|v| parse_bounded(Some(v.trim()), max))
                .collect();
        }
        Ok(part)
    }

    fn start_part(&mut self, part: DicePart) {
        self.finish_part();
        self.current = Some(part);
    }

    fn finish_part(&mut self) {
        if let Some(mut part) = self.current.take() {
            part.description = part.description.trim().to_string();
            self.expression.parts.push(part);
        }
    }

    fn text(&mut self, text: &str) {
        match self.current.as_mut() {
            Some(part) => part.description.push_str(text),
            None => self.expression.label.push_str(text),
        }
    }
}

fn manipulation(token: &Token, config: &EngineConfig) -> Manipulation {
    match token.key {
        "dropKeep" => Manipulation::DropKeep(DropKeep {
            kind: DropKeepType::from_alias(token.capture(0).unwrap_or_default()),
            value: token.non_empty(1).map_or(1, |v| parse_u32(Some(v))),
        }),
        "threshold" => {
            let kind = match token.capture(0).map(str::to_ascii_lowercase).as_deref() {
                Some("th" | "max") => ThresholdType::Above,
                _ => ThresholdType::Below,
            };
            Manipulation::Threshold(Threshold {
                kind,
                value: parse_bounded(token.capture(1), i64::from(config.max_dice_sides)),
            })
        }
        "explode" => Manipulation::Explode(token.non_empty(0).and_then(|v| v.parse().ok())),
        _ => Manipulation::NoSort,
    }
}

fn parse_sign(sign: &str) -> Sign {
    if sign == "-" {
        Sign::Minus
    } else {
        Sign::Plus
    }
}

fn parse_u32(text: Option<&str>) -> u32 {
    text.and_then(|t| t.parse().ok()).unwrap_or(u32::MAX)
}

/// Parses digits, capping the value at `max`. Digits too long for `i64` cap too.
fn parse_bounded(text: Option<&str>, max: i64) -> i64 {
    match text {
        Some(t) if !t.is_empty() => t.parse::<i64>().map_or(max, |v| v.min(max)),
        _ => 0,
    }
}

/// Parses a flat modifier, rounding decimals left by the simplifier half up.
fn parse_modifier(text: Option<&str>) -> Result<u32> {
    let text = text.unwrap_or_default();
    let value: f64 = text
        .parse()
        .map_err(|_| Error::InvalidModifier(text.to_string()))?;
    let rounded = (value + 0.5).floor();
    if !(0.0..=f64::from(u32::MAX)).contains(&rounded) {
        return Err(Error::InvalidModifier(text.to_string()));
    }
    Ok(rounded as u32)
}

/// Parse roll text into dice parts using the default limits.
pub fn parse(input: &str) -> Result<DiceExpression> {
    parse_with_config(input, &EngineConfig::default())
}

/// Parse roll text into dice parts using the given limits.
pub fn parse_with_config(input: &str, config: &EngineConfig) -> Result<DiceExpression> {
    Parser::new(config).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_keep(kind: DropKeepType, value: u32) -> Manipulation {
        Manipulation::DropKeep(DropKeep { kind, value })
    }

    #[test]
    fn test_parse_basic_roll() {
        let expr = parse("2d6").unwrap();
        assert_eq!(expr.parts, vec![DicePart::dice(2, 6)]);
    }

    #[test]
    fn test_parse_implicit_count() {
        let expr = parse("d20").unwrap();
        assert_eq!(expr.parts[0].count, 1);
        assert_eq!(expr.parts[0].sides, 20);
    }

    #[test]
    fn test_parse_manipulations_in_order() {
        let expr = parse("4d6dl1!ns").unwrap();
        assert_eq!(
            expr.parts[0].manipulations,
            vec![
                drop_keep(DropKeepType::DropLowest, 1),
                Manipulation::Explode(None),
                Manipulation::NoSort,
            ]
        );
    }

    #[test]
    fn test_parse_keep_default_count() {
        let expr = parse("2d20kh").unwrap();
        assert_eq!(
            expr.parts[0].manipulations,
            vec![drop_keep(DropKeepType::KeepHighest, 1)]
        );
    }

    #[test]
    fn test_parse_thresholds() {
        let expr = parse("4d6tl2th5").unwrap();
        assert_eq!(
            expr.parts[0].manipulations,
            vec![
                Manipulation::Threshold(Threshold {
                    kind: ThresholdType::Below,
                    value: 2
                }),
                Manipulation::Threshold(Threshold {
                    kind: ThresholdType::Above,
                    value: 5
                }),
            ]
        );
        let expr = parse("4d6min3").unwrap();
        assert!(matches!(
            expr.parts[0].manipulations[0],
            Manipulation::Threshold(Threshold {
                kind: ThresholdType::Below,
                value: 3
            })
        ));
    }

    #[test]
    fn test_parse_explode_face() {
        let expr = parse("3d6!5").unwrap();
        assert_eq!(expr.parts[0].manipulations, vec![Manipulation::Explode(Some(5))]);
    }

    #[test]
    fn test_parse_fixed_rolls() {
        let expr = parse("3d6(2,5,1)").unwrap();
        assert_eq!(expr.parts[0].fixed_rolls, vec![2, 5, 1]);
    }

    #[test]
    fn test_parse_expression() {
        let expr = parse("2d6 + 5 - 1d4").unwrap();
        assert_eq!(expr.parts.len(), 3);
        assert_eq!(expr.parts[1], DicePart::modifier(Sign::Plus, 5));
        assert_eq!(expr.parts[2].sign, Sign::Minus);
        assert_eq!(expr.parts[2].sides, 4);
    }

    #[test]
    fn test_parse_descriptions() {
        let expr = parse("attack 1d20+5 to hit 2d6 fire").unwrap();
        assert_eq!(expr.label, "attack");
        assert_eq!(expr.parts[1].description, "to hit");
        assert_eq!(expr.parts[2].description, "fire");
    }

    #[test]
    fn test_suffix_text_after_description_is_text() {
        let expr = parse("1d6 khaki dl1").unwrap();
        assert!(expr.parts[0].manipulations.is_empty());
        assert_eq!(expr.parts[0].description, "khaki dl1");
    }

    #[test]
    fn test_parse_test() {
        let expr = parse("1d20+7 vs 15").unwrap();
        assert_eq!(
            expr.test(),
            Some(DiceTest {
                kind: TestType::Vs,
                value: 15
            })
        );
        let expr = parse("1d20 >= 10").unwrap();
        assert_eq!(expr.test().map(|t| t.kind), Some(TestType::GreaterOrEqual));
    }

    #[test]
    fn test_leading_number_is_modifier() {
        let expr = parse("3+1d6").unwrap();
        assert_eq!(expr.parts[0], DicePart::modifier(Sign::Plus, 3));
        assert_eq!(expr.parts[1].sides, 6);
    }

    #[test]
    fn test_unsigned_number_in_description() {
        let expr = parse("1d8 slashing 2 hands").unwrap();
        assert_eq!(expr.parts.len(), 1);
        assert_eq!(expr.parts[0].description, "slashing 2 hands");
    }

    #[test]
    fn test_fixed_rolls_capped_at_max_sides() {
        let expr = parse("2d6(9223372036854775807,99999999999999999999)").unwrap();
        assert_eq!(expr.parts[0].fixed_rolls, vec![10000, 10000]);
    }

    #[test]
    fn test_threshold_capped_at_max_sides() {
        let expr = parse("2d6tl9223372036854775807").unwrap();
        assert_eq!(
            expr.parts[0].manipulations,
            vec![Manipulation::Threshold(Threshold {
                kind: ThresholdType::Below,
                value: 10000
            })]
        );
    }

    #[test]
    fn test_decimal_modifier_rounds() {
        let expr = parse("1d4+2.5").unwrap();
        assert_eq!(expr.parts[1], DicePart::modifier(Sign::Plus, 3));
        assert!(expr.parts[1].description.is_empty());

        let expr = parse("1d4-1.25").unwrap();
        assert_eq!(expr.parts[1], DicePart::modifier(Sign::Minus, 1));
    }

    #[test]
    fn test_oversized_modifier_rejected() {
        assert!(matches!(
            parse("1d1+5000000000"),
            Err(Error::InvalidModifier(text)) if text == "5000000000"
        ));
    }

    #[test]
    fn test_parse_no_dice() {
        assert!(matches!(parse("hello"), Err(Error::NoDice(_))));
    }

    #[test]
    fn test_parse_limits() {
        let config = EngineConfig {
            max_dice_count: 10,
            ..EngineConfig::default()
        };
        assert!(matches!(
            parse_with_config("11d6", &config),
            Err(Error::InvalidDiceCount(11))
        ));
        assert!(matches!(parse("0d6"), Err(Error::InvalidDiceCount(0))));
        assert!(matches!(parse("1d0"), Err(Error::InvalidDiceSides(0))));
    }
}
