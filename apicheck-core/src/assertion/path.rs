//! Dotted/bracketed paths into a JSON body, e.g. `data.items[0].id` or
//! `[2].name`.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{key}"),
            Segment::Index(index) => write!(f, "[{index}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path \"{path}\": {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: String,
}

/// A parsed path. The empty path addresses the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn parse(path: &str) -> Result<JsonPath, PathError> {
        let invalid = |reason: &str| PathError {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut chars = path.chars().peekable();
        let mut key = String::new();
        // Whether a '.' was just consumed, so a key must follow.
        let mut expect_key = false;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if key.is_empty() && (segments.is_empty() || expect_key) {
                        return Err(invalid("empty key"));
                    }
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    expect_key = true;
                }
                '[' => {
                    if expect_key && key.is_empty() {
                        return Err(invalid("expected a key after '.'"));
                    }
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            Some(_) => return Err(invalid("index must be a non-negative integer")),
                            None => return Err(invalid("unclosed '['")),
                        }
                    }
                    let index = digits
                        .parse()
                        .map_err(|_| invalid("index must be a non-negative integer"))?;
                    segments.push(Segment::Index(index));
                    expect_key = false;
                    if let Some(next) = chars.peek() {
                        if *next != '.' && *next != '[' {
                            return Err(invalid("expected '.' or '[' after ']'"));
                        }
                    }
                }
                ']' => return Err(invalid("unexpected ']'")),
                c => {
                    key.push(c);
                    expect_key = false;
                }
            }
        }

        if !key.is_empty() {
            segments.push(Segment::Key(key));
        } else if expect_key {
            return Err(invalid("trailing '.'"));
        }

        Ok(JsonPath { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Walks `value`, returning the addressed node.
    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |node, segment| match segment {
                Segment::Key(key) => node.as_object()?.get(key),
                Segment::Index(index) => node.as_array()?.get(*index),
            })
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 && matches!(segment, Segment::Key(_)) {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}
