//! # ODL metadata parser
//!
//! HDF-EOS granules carry their inventory metadata (including the G-ring that
//! outlines the swath) as ODL text stored in global attributes such as
//! `CoreMetadata.0` or `ArchiveMetadata.0`. The text is a nesting of
//!
//! ```text
//! GROUP = NAME
//!   OBJECT = CHILD
//!     VALUE = (1.0, 2.0, 3.0)
//!   END_OBJECT = CHILD
//! END_GROUP = NAME
//! ```
//!
//! [`parse_odl`] turns it into an [`OdlGroup`] tree keyed by the group/object
//! names and the attribute keys. Values are kept as raw text; use
//! [`parse_tuple`] for the parenthesised numeric lists.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::{Result, SidecarError};

#[derive(Debug, Clone, PartialEq)]
pub enum OdlValue {
    Text(String),
    Group(OdlGroup),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OdlGroup {
    entries: BTreeMap<String, OdlValue>,
}

impl OdlGroup {
    pub fn get(&self, key: &str) -> Option<&OdlValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Follows `path` through nested groups.
    pub fn lookup(&self, path: &[&str]) -> Option<&OdlValue> {
        let (last, parents) = path.split_last()?;
        let mut group = self;
        for key in parents {
            match group.entries.get(*key)? {
                OdlValue::Group(child) => group = child,
                OdlValue::Text(_) => return None,
            }
        }
        group.entries.get(*last)
    }

    /// Text value at `path`, or a parse error naming the missing path.
    pub fn text_at(&self, path: &[&str]) -> Result<&str> {
        match self.lookup(path) {
            Some(OdlValue::Text(text)) => Ok(text),
            Some(OdlValue::Group(_)) => Err(SidecarError::parse(format!(
                "{} is a group, not a value",
                path.join("/")
            ))),
            None => Err(SidecarError::parse(format!("metadata has no {}", path.join("/")))),
        }
    }

    /// Adds the entries of `other`; keys already present are replaced.
    pub fn merge(&mut self, other: OdlGroup) {
        self.entries.extend(other.entries);
    }
}

enum Line<'a> {
    Pair(&'a str, &'a str),
    Other(&'a str),
}

fn split_line(line: &str) -> Line<'_> {
    match line.split_once('=') {
        Some((key, value)) => Line::Pair(key.trim(), value.trim()),
        None => Line::Other(line.trim()),
    }
}

fn unbalanced(text: &str) -> bool {
    text.matches('(').count() > text.matches(')').count()
}

fn parse_block(lines: &[Line<'_>], pos: &mut usize, open: Option<(&str, &str)>) -> Result<OdlGroup> {
    let mut group = OdlGroup::default();
    let mut last_key: Option<String> = None;

    while *pos < lines.len() {
        let line = &lines[*pos];
        *pos += 1;

        match *line {
            Line::Pair(key @ ("GROUP" | "OBJECT"), name) => {
                let child = parse_block(lines, pos, Some((key, name)))?;
                group.entries.insert(name.to_string(), OdlValue::Group(child));
                last_key = None;
            }
            Line::Pair(key @ ("END_GROUP" | "END_OBJECT"), name) => {
                return match open {
                    Some((kind, open_name)) if key[4..] == *kind && name == open_name => Ok(group),
                    Some((kind, open_name)) => Err(SidecarError::parse(format!(
                        "{} = {} closes {} = {}",
                        key, name, kind, open_name
                    ))),
                    None => Err(SidecarError::parse(format!("{} = {} without an opening {}", key, name, &key[4..]))),
                };
            }
            Line::Pair(key, value) => {
                group.entries.insert(key.to_string(), OdlValue::Text(value.to_string()));
                last_key = Some(key.to_string());
            }
            Line::Other("") | Line::Other("END") => {}
            Line::Other(text) => {
                // continuation of a parenthesised list spanning lines
                let target = match &last_key {
                    Some(key) => group.entries.get_mut(key.as_str()),
                    None => None,
                };
                match target {
                    Some(OdlValue::Text(value)) if unbalanced(value) => {
                        value.push(' ');
                        value.push_str(text);
                    }
                    _ => warn!("Ignoring stray metadata line: {}", text),
                }
            }
        }
    }

    match open {
        Some((kind, name)) => Err(SidecarError::parse(format!("{} = {} is never closed", kind, name))),
        None => Ok(group),
    }
}

/// Parses ODL metadata text into a tree.
pub fn parse_odl(text: &str) -> Result<OdlGroup> {
    let lines: Vec<Line<'_>> = text.lines().map(|line| split_line(line.trim())).collect();
    let mut pos = 0;
    let group = parse_block(&lines, &mut pos, None)?;
    debug!("Parsed {} metadata lines into {} top-level entries", lines.len(), group.len());
    Ok(group)
}

/// Parses a parenthesised list such as `(10.5, -3.25, 7)`.
pub fn parse_tuple(value: &str) -> Result<Vec<f64>> {
    let inner = value.trim().trim_start_matches('(').trim_end_matches(')');
    if inner.trim().is_empty() {
        return Err(SidecarError::parse(format!("empty list: {:?}", value)));
    }
    inner
        .split(',')
        .map(|item| {
            item.trim()
                .parse::<f64>()
                .map_err(|e| SidecarError::parse(format!("bad number {:?} in {:?}: {}", item.trim(), value, e)))
        })
        .collect()
}
