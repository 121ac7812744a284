// ABOUTME: Error types for the diceforge library.
// ABOUTME: Covers dice parsing limits, macro lookup, and configuration loading.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No dice found in '{0}'")]
    NoDice(String),

    #[error("Invalid dice count: {0}")]
    InvalidDiceCount(u32),

    #[error("Invalid dice sides: {0}")]
    InvalidDiceSides(u32),

    #[error("Invalid modifier: {0}")]
    InvalidModifier(String),

    #[error("Macro not found: {0}")]
    MacroNotFound(String),

    #[error("Macro call has no macro name")]
    EmptyMacroCall,

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Unable to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
