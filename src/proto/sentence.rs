// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{
    error::{CollectorError, Result},
    proto::codec::encode_sentence,
};

/// Reply code carried in the first word of every device sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Intermediate record; more sentences follow for the same tag.
    Re,
    /// Terminal success.
    Done,
    /// Device-reported error, terminal for the call.
    Trap,
    /// Fatal connection-ending error.
    Fatal,
}

impl ReplyKind {
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "!re" => Some(Self::Re),
            "!done" => Some(Self::Done),
            "!trap" => Some(Self::Trap),
            "!fatal" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// `!done`, `!trap` and `!fatal` end the call; `!re` does not.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Re)
    }
}

/// An outgoing sentence: a command path followed by attribute words.
#[derive(Debug, Clone)]
pub struct Sentence {
    words: Vec<String>,
}

impl Sentence {
    pub fn command(path: impl Into<String>) -> Self {
        Self {
            words: vec![path.into()],
        }
    }

    /// Appends a `=key=value` attribute word.
    pub fn attr(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.words.push(format!("={key}={}", value.as_ref()));
        self
    }

    /// Appends an API attribute word (`.key=value`), e.g. `.tag`.
    pub fn api_attr(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.words.push(format!(".{key}={}", value.as_ref()));
        self
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn to_wire(&self) -> Bytes {
        encode_sentence(&self.words)
    }
}

/// A parsed device reply: reply code, routing tag and attribute map.
#[derive(Debug, Clone)]
pub struct Reply {
    pub kind: ReplyKind,
    pub tag: Option<String>,
    pub attrs: BTreeMap<String, String>,
}

impl Reply {
    /// Parses the word list of one incoming sentence.
    ///
    /// Words shaped `=key=value` land in `attrs`; `.tag=value` fills `tag`;
    /// bare path tokens are ignored. An empty sentence or an unknown reply
    /// code is a framing violation.
    pub fn parse(words: &[String]) -> Result<Self> {
        let first = words
            .first()
            .ok_or_else(|| CollectorError::wire("empty reply sentence"))?;
        let kind = ReplyKind::parse(first).ok_or_else(|| {
            CollectorError::wire(format!("unknown reply code {first:?}"))
        })?;

        let mut tag = None;
        let mut attrs = BTreeMap::new();
        for word in &words[1..] {
            if let Some(rest) = word.strip_prefix('=') {
                if let Some((key, value)) = rest.split_once('=') {
                    attrs.insert(key.to_string(), value.to_string());
                }
            } else if let Some(rest) = word.strip_prefix('.')
                && let Some((key, value)) = rest.split_once('=')
                && key == "tag"
            {
                tag = Some(value.to_string());
            }
        }

        Ok(Self { kind, tag, attrs })
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Human-readable error text of a `!trap`/`!fatal` reply.
    pub fn trap_message(&self) -> String {
        self.attr("message")
            .map(str::to_string)
            .unwrap_or_else(|| "device returned an error".to_string())
    }
}
