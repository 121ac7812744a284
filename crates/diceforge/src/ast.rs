// ABOUTME: Types for parsed dice expressions: dice parts, manipulations and tests.
// ABOUTME: Represents terms like "-4d6dl1!" or "+3 fire" before they are rolled.

use std::fmt;

use serde::Serialize;

/// The sign joining a dice part to the rest of the expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Sign {
    #[default]
    Plus,
    Minus,
}

impl Sign {
    pub fn apply(&self, value: i64) -> i64 {
        match self {
            Sign::Plus => value,
            Sign::Minus => -value,
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Plus => write!(f, "+"),
            Sign::Minus => write!(f, "-"),
        }
    }
}

/// One additive term of a roll expression (e.g. `2d6dl1` or `+3`).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DicePart {
    pub sign: Sign,
    /// Number of dice, or the flat value when `sides` is 0.
    pub count: u32,
    /// Die size; 0 for a flat modifier.
    pub sides: u32,
    /// Values to use instead of rolling, consumed before any random rolls.
    pub fixed_rolls: Vec<i64>,
    /// Manipulations applied left to right after rolling.
    pub manipulations: Vec<Manipulation>,
    /// Free text trailing the term.
    pub description: String,
    pub test: Option<DiceTest>,
}

impl DicePart {
    /// Creates a dice term with no manipulations.
    pub fn dice(count: u32, sides: u32) -> Self {
        Self {
            count,
            sides,
            ..Self::default()
        }
    }

    /// Creates a flat modifier term.
    pub fn modifier(sign: Sign, value: u32) -> Self {
        Self {
            sign,
            count: value,
            ..Self::default()
        }
    }

    pub fn is_modifier(&self) -> bool {
        self.sides == 0
    }

    pub fn has_no_sort(&self) -> bool {
        self.manipulations.contains(&Manipulation::NoSort)
    }
}

impl fmt::Display for DicePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_modifier() {
            return write!(f, "{}{}", self.sign, self.count);
        }
        if self.sign == Sign::Minus {
            write!(f, "-")?;
        }
        write!(f, "{}d{}", self.count, self.sides)?;
        if !self.fixed_rolls.is_empty() {
            let fixed: Vec<String> = self.fixed_rolls.iter().map(i64::to_string).collect();
            write!(f, "({})", fixed.join(","))?;
        }
        for manipulation in &self.manipulations {
            write!(f, "{manipulation}")?;
        }
        Ok(())
    }
}

/// Which dice a drop/keep manipulation removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropKeepType {
    None,
    DropLowest,
    DropHighest,
    KeepLowest,
    KeepHighest,
}

impl DropKeepType {
    pub fn alias(&self) -> &'static str {
        match self {
            DropKeepType::None => "",
            DropKeepType::DropLowest => "dl",
            DropKeepType::DropHighest => "dh",
            DropKeepType::KeepLowest => "kl",
            DropKeepType::KeepHighest => "kh",
        }
    }

    pub fn from_alias(alias: &str) -> Self {
        match alias.to_ascii_lowercase().as_str() {
            "dl" => DropKeepType::DropLowest,
            "dh" => DropKeepType::DropHighest,
            "kl" => DropKeepType::KeepLowest,
            "kh" => DropKeepType::KeepHighest,
            _ => DropKeepType::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DropKeep {
    pub kind: DropKeepType,
    pub value: u32,
}

/// Which side of a threshold is clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThresholdType {
    /// Rolls above the value count as the value.
    Above,
    /// Rolls below the value count as the value.
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Threshold {
    pub kind: ThresholdType,
    pub value: i64,
}

/// A post-roll transform applied to a dice part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Manipulation {
    DropKeep(DropKeep),
    /// Explode dice showing the given face (the max face when `None`).
    Explode(Option<i64>),
    Threshold(Threshold),
    /// Present rolls in the order they were generated.
    NoSort,
}

impl fmt::Display for Manipulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Manipulation::DropKeep(dk) => write!(f, "{}{}", dk.kind.alias(), dk.value),
            Manipulation::Explode(None) => write!(f, "!"),
            Manipulation::Explode(Some(face)) => write!(f, "!{face}"),
            Manipulation::Threshold(t) => match t.kind {
                ThresholdType::Above => write!(f, "th{}", t.value),
                ThresholdType::Below => write!(f, "tl{}", t.value),
            },
            Manipulation::NoSort => write!(f, "ns"),
        }
    }
}

/// How a roll total is checked against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestType {
    Ac,
    Dc,
    Vs,
    Equal,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl TestType {
    pub fn from_alias(alias: &str) -> Option<Self> {
        match alias.to_ascii_lowercase().as_str() {
            "ac" => Some(TestType::Ac),
            "dc" => Some(TestType::Dc),
            "vs" => Some(TestType::Vs),
            "=" => Some(TestType::Equal),
            ">" => Some(TestType::GreaterThan),
            ">=" => Some(TestType::GreaterOrEqual),
            "<" => Some(TestType::LessThan),
            "<=" => Some(TestType::LessOrEqual),
            _ => None,
        }
    }

    pub fn alias(&self) -> &'static str {
        match self {
            TestType::Ac => "ac",
            TestType::Dc => "dc",
            TestType::Vs => "vs",
            TestType::Equal => "=",
            TestType::GreaterThan => ">",
            TestType::GreaterOrEqual => ">=",
            TestType::LessThan => "<",
            TestType::LessOrEqual => "<=",
        }
    }
}

/// A target the total of a roll is tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiceTest {
    pub kind: TestType,
    pub value: i64,
}

impl DiceTest {
    /// Check if the given total passes this test.
    ///
    /// `ac`, `dc` and `vs` succeed when the total meets or beats the target.
    pub fn check(&self, total: i64) -> bool {
        match self.kind {
            TestType::Ac | TestType::Dc | TestType::Vs | TestType::GreaterOrEqual => {
                total >= self.value
            }
            TestType::Equal => total == self.value,
            TestType::GreaterThan => total > self.value,
            TestType::LessThan => total < self.value,
            TestType::LessOrEqual => total <= self.value,
        }
    }
}

impl fmt::Display for DiceTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TestType::Ac | TestType::Dc | TestType::Vs => {
                write!(f, "{} {}", self.kind.alias(), self.value)
            }
            _ => write!(f, "{}{}", self.kind.alias(), self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_dice_part() {
        let mut part = DicePart::dice(4, 6);
        part.manipulations.push(Manipulation::DropKeep(DropKeep {
            kind: DropKeepType::DropLowest,
            value: 1,
        }));
        part.manipulations.push(Manipulation::Explode(None));
        assert_eq!(part.to_string(), "4d6dl1!");
    }

    #[test]
    fn test_display_fixed_and_sign() {
        let mut part = DicePart::dice(3, 6);
        part.sign = Sign::Minus;
        part.fixed_rolls = vec![2, 5, 1];
        assert_eq!(part.to_string(), "-3d6(2,5,1)");
    }

    #[test]
    fn test_display_modifier() {
        assert_eq!(DicePart::modifier(Sign::Minus, 3).to_string(), "-3");
        assert_eq!(DicePart::modifier(Sign::Plus, 2).to_string(), "+2");
    }

    #[test]
    fn test_drop_keep_alias() {
        assert_eq!(DropKeepType::from_alias("KH"), DropKeepType::KeepHighest);
        assert_eq!(DropKeepType::from_alias("xx"), DropKeepType::None);
        assert_eq!(DropKeepType::DropLowest.alias(), "dl");
    }

    #[test]
    fn test_dice_test_check() {
        let ac = DiceTest {
            kind: TestType::Ac,
            value: 15,
        };
        assert!(ac.check(15));
        assert!(!ac.check(14));

        let lt = DiceTest {
            kind: TestType::LessThan,
            value: 5,
        };
        assert!(lt.check(4));
        assert!(!lt.check(5));
        assert_eq!(ac.to_string(), "ac 15");
        assert_eq!(lt.to_string(), "<5");
    }
}
