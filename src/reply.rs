//! Reply grammar for generated text
//!
//! The engine echoes the prompt and appends the model's reply, so a raw
//! generation looks like:
//!
//! ```text
//! <s>[INST] Mouse+Cat [/INST] Steam Engine 🚂</s>
//! ```
//!
//! Grammar of the reply segment (everything after the last marker):
//!
//! ```text
//! combine := item
//! split   := item "+" item
//! item    := word " " emoji        (split on the last space)
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::symbol::{SymbolPair, SymbolResult};

/// Marker separating the echoed prompt from the model's reply
pub const DEFAULT_REPLY_MARKER: &str = " [/INST] ";

/// End-of-sequence text the engine may leave at the end of a generation
pub const DEFAULT_TERMINATOR: &str = "</s>";

/// Separator between the two items of a split reply
pub const PAIR_SEPARATOR: char = '+';

/// Named failure modes of the reply grammar
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    /// The marker never appears in the generated text
    #[error("reply marker {0:?} not found in generated text")]
    MissingReplyMarker(String),

    /// Nothing follows the marker
    #[error("reply after marker is empty")]
    EmptyReply,

    /// A split reply has no `+` between its two items
    #[error("expected two '+'-joined items in {0:?}")]
    MissingPairSeparator(String),

    /// An item has no space between word and emoji
    #[error("no space between word and emoji in {0:?}")]
    MissingSeparator(String),

    /// The word part of an item is empty
    #[error("missing word in {0:?}")]
    MissingWord(String),

    /// The emoji part of an item is empty
    #[error("missing emoji in {0:?}")]
    MissingEmoji(String),
}

/// Delimiters used when parsing generated text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// Marker preceding the model's reply
    pub marker: String,
    /// Trailing end-of-sequence text stripped before parsing
    pub terminator: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            marker: DEFAULT_REPLY_MARKER.to_string(),
            terminator: DEFAULT_TERMINATOR.to_string(),
        }
    }
}

/// Parser for combine and split replies
#[derive(Debug, Clone, Default)]
pub struct ReplyParser {
    config: ReplyConfig,
}

impl ReplyParser {
    /// Create a parser with the given delimiters
    pub fn new(config: ReplyConfig) -> Self {
        Self { config }
    }

    /// Isolate the model's reply from the echoed prompt
    pub fn reply<'a>(&self, raw: &'a str) -> Result<&'a str, ReplyError> {
        let body = if self.config.terminator.is_empty() {
            raw
        } else {
            raw.strip_suffix(self.config.terminator.as_str())
                .unwrap_or(raw)
        };

        let (_, reply) = body
            .rsplit_once(self.config.marker.as_str())
            .ok_or_else(|| ReplyError::MissingReplyMarker(self.config.marker.clone()))?;

        let reply = reply.trim();
        if reply.is_empty() {
            return Err(ReplyError::EmptyReply);
        }
        Ok(reply)
    }

    /// Parse a combine generation into one result
    pub fn parse_combine(&self, raw: &str) -> Result<SymbolResult, ReplyError> {
        parse_item(self.reply(raw)?)
    }

    /// Parse a split generation into an ordered pair of results
    pub fn parse_split(&self, raw: &str) -> Result<SymbolPair, ReplyError> {
        let reply = self.reply(raw)?;
        let (first, second) = reply
            .split_once(PAIR_SEPARATOR)
            .ok_or_else(|| ReplyError::MissingPairSeparator(reply.to_string()))?;

        Ok(SymbolPair(parse_item(first.trim())?, parse_item(second.trim())?))
    }
}

/// Split `word emoji` on its last space
fn parse_item(item: &str) -> Result<SymbolResult, ReplyError> {
    let (word, emoji) = item
        .rsplit_once(' ')
        .ok_or_else(|| ReplyError::MissingSeparator(item.to_string()))?;

    let word = word.trim_end();
    if word.is_empty() {
        return Err(ReplyError::MissingWord(item.to_string()));
    }
    if emoji.is_empty() {
        return Err(ReplyError::MissingEmoji(item.to_string()));
    }

    Ok(SymbolResult::new(word, emoji))
}
