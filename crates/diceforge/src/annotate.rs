// ABOUTME: Result annotator: decorates each die's value with markdown-style markers.
// ABOUTME: Also renders part descriptions without breaking emoji.

use once_cell::sync::Lazy;

use crate::roller::RollDatum;
use crate::tokenizer::{tokenize, TokenParsers};

static EMOJI_PARSERS: Lazy<TokenParsers> = Lazy::new(|| {
    TokenParsers::from_patterns(&[
        ("customEmoji", r"<a?:\w{2,}:\d+>"),
        (
            "emoji",
            r"\p{Extended_Pictographic}(?:\x{FE0F}|\x{200D}\p{Extended_Pictographic})*",
        ),
    ])
    .expect("hardcoded regex")
});

/// Builds the display text for a single die.
///
/// Markers are layered in a fixed order that downstream display code relies on:
/// fixed or threshold, explosion, above/below threshold, max/min, dropped.
///
/// # Examples
///
/// ```
/// use diceforge::annotate::annotate;
/// use diceforge::RollDatum;
///
/// let roll = RollDatum { value: 6, is_max: true, is_dropped: true, ..RollDatum::default() };
/// assert_eq!(annotate(&roll), "~~**6**~~");
/// ```
pub fn annotate(roll: &RollDatum) -> String {
    let mut text = match (roll.threshold, roll.is_fixed) {
        (Some(threshold), true) => format!("__{}__→{threshold}", roll.value),
        (Some(threshold), false) => format!("{}→{threshold}", roll.value),
        (None, true) => format!("__{}__", roll.value),
        (None, false) => roll.value.to_string(),
    };

    if roll.is_explosion {
        text = format!("↳{text}");
    }
    if roll.is_exploded {
        text.push('!');
    }

    if roll.is_above_threshold {
        text = format!("⌈{text}⌉");
    } else if roll.is_below_threshold {
        text = format!("⌊{text}⌋");
    }

    if roll.is_max {
        text = format!("**{text}**");
    } else if roll.is_min {
        text = format!("*{text}*");
    }

    if roll.is_dropped {
        text = format!("~~{text}~~");
    }
    text
}

/// Bolds the words of a description, leaving emoji and surrounding spaces untouched.
pub fn render_description(description: &str) -> String {
    tokenize(description, &EMOJI_PARSERS)
        .into_iter()
        .map(|token| {
            if !token.is(crate::tokenizer::UNKNOWN) {
                return token.matched;
            }
            let core = token.matched.trim();
            if core.is_empty() {
                return token.matched;
            }
            let start = token.matched.len() - token.matched.trim_start().len();
            let end = start + core.len();
            format!(
                "{}**{core}**{}",
                &token.matched[..start],
                &token.matched[end..]
            )
        })
        .collect()
}
