//! # hpa-config
//!
//! In-memory editor for the sectioned `key = value` text format shared by
//! the host configuration (`hplip.conf`), the plugin state file
//! (`hplip.state`) and the remote plugin index (`plugin.conf`).
//!
//! A [`ConfigDocument`] is an ordered list of parsed [`Line`] records. Reads
//! walk the records; writes edit records structurally and never touch any
//! line other than the one being updated, inserted or removed, so a document
//! that is parsed and rendered without edits is reproduced byte for byte.
//!
//! ```
//! use hpa_config::ConfigDocument;
//!
//! let mut doc = ConfigDocument::parse("[plugin]\ninstalled = 0\n");
//! assert!(doc.set(Some("plugin"), "installed", Some("1")).unwrap());
//! assert!(doc.set(Some("Plugin"), "version", Some("3.21.8")).unwrap());
//! assert_eq!(doc.get(Some("PLUGIN"), "Version"), Some("3.21.8"));
//! assert_eq!(doc.to_string(), "[plugin]\ninstalled = 1\nversion = 3.21.8\n");
//! ```

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use thiserror::Error;

#[cfg(test)]
mod proptests;

/// Errors raised when an edit would produce an unparseable line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Key is empty, contains `=` or a line break, or would parse as a header/comment.
    #[error("invalid key {0:?}")]
    InvalidKey(String),

    /// Section name is empty or contains `]` or a line break.
    #[error("invalid section name {0:?}")]
    InvalidSection(String),

    /// Value contains a line break or starts or ends with whitespace,
    /// which would not read back unchanged.
    #[error("invalid value for key {key:?}: values must fit on one line without surrounding blanks")]
    InvalidValue { key: String },
}

/// One line of a configuration document.
///
/// Every variant keeps the raw text of the line (without its `\n`
/// terminator) so rendering reproduces the input exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// `[name]` section header.
    Section { raw: String, name: String },
    /// `key = value` entry. `value` is the byte range of the value in `raw`.
    Entry {
        raw: String,
        key: String,
        value: Range<usize>,
    },
    /// Blank lines, comments and anything else that does not parse.
    Other(String),
}

impl Line {
    /// Parse a single line (without its terminator).
    ///
    /// A `[` without a closing `]` is not a header; it is kept as
    /// [`Line::Other`] and does not end the enclosing section.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim_start();

        if let Some(rest) = trimmed.strip_prefix('[') {
            return match rest.find(']') {
                Some(end) => Line::Section {
                    raw: raw.to_string(),
                    name: rest[..end].trim().to_string(),
                },
                None => Line::Other(raw.to_string()),
            };
        }

        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            return Line::Other(raw.to_string());
        }

        let Some(eq) = raw.find('=') else {
            return Line::Other(raw.to_string());
        };

        let key = raw[..eq].trim();
        if key.is_empty() {
            return Line::Other(raw.to_string());
        }

        let after = &raw[eq + 1..];
        let start = eq + 1 + (after.len() - after.trim_start().len());
        let end = (raw.trim_end().len()).max(start);

        Line::Entry {
            raw: raw.to_string(),
            key: key.to_string(),
            value: start..end,
        }
    }

    /// Raw text of the line.
    pub fn raw(&self) -> &str {
        match self {
            Line::Section { raw, .. } | Line::Entry { raw, .. } => raw,
            Line::Other(raw) => raw,
        }
    }

    /// Section name if this line is a header.
    pub fn section_name(&self) -> Option<&str> {
        match self {
            Line::Section { name, .. } => Some(name),
            _ => None,
        }
    }

    /// `(key, value)` if this line is an entry.
    pub fn entry(&self) -> Option<(&str, &str)> {
        match self {
            Line::Entry { raw, key, value } => Some((key, &raw[value.clone()])),
            _ => None,
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Line::Other(raw) if raw.trim().is_empty())
    }

    fn matches_key(&self, wanted: &str) -> bool {
        matches!(self, Line::Entry { key, .. } if key.eq_ignore_ascii_case(wanted))
    }
}

/// Parsed configuration document.
///
/// Section and key lookups are ASCII case-insensitive. Entries that appear
/// before the first section header belong to the root section, addressed
/// with `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    lines: Vec<Line>,
    trailing_newline: bool,
}

impl ConfigDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse text into a document. Never fails; unparseable lines are kept
    /// verbatim as [`Line::Other`].
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            return Self::default();
        }

        let trailing_newline = text.ends_with('\n');
        let body = if trailing_newline {
            &text[..text.len() - 1]
        } else {
            text
        };

        Self {
            lines: body.split('\n').map(Line::parse).collect(),
            trailing_newline,
        }
    }

    /// All lines in document order.
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// True if the document has no lines at all.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Names of all section headers in document order (duplicates included).
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(Line::section_name)
    }

    /// True if a header with this name (case-insensitive) exists.
    pub fn has_section(&self, section: &str) -> bool {
        self.sections().any(|name| name.eq_ignore_ascii_case(section))
    }

    /// Entries of a section in document order. For a section name that
    /// appears more than once, entries of every occurrence are returned.
    pub fn entries<'a>(
        &'a self,
        section: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.scoped(section)
            .filter_map(move |(idx, _)| self.lines[idx].entry())
    }

    /// Look up a value. The first matching key inside the matching section
    /// wins; with `section == None` only entries before the first header are
    /// considered.
    pub fn get(&self, section: Option<&str>, key: &str) -> Option<&str> {
        self.scoped(section)
            .find(|(idx, _)| self.lines[*idx].matches_key(key))
            .and_then(|(idx, _)| self.lines[idx].entry())
            .map(|(_, value)| value)
    }

    /// Set, update or delete a value.
    ///
    /// - `Some(value)` updates the first matching entry in place (keeping
    ///   its key spelling and spacing) or appends `key = value` after the
    ///   last non-blank line of the section, creating the section header at
    ///   the end of the document if it does not exist yet.
    /// - `None` removes every matching entry of the section.
    ///
    /// Values with leading or trailing whitespace are rejected, since
    /// reading strips it. Returns whether the rendered document changed;
    /// writing the value already present returns `false`.
    pub fn set(
        &mut self,
        section: Option<&str>,
        key: &str,
        value: Option<&str>,
    ) -> Result<bool, ConfigError> {
        validate_key(key)?;
        if let Some(name) = section {
            validate_section(name)?;
        }

        let Some(value) = value else {
            return Ok(self.remove(section, key));
        };
        if value.contains(['\n', '\r']) || value.trim() != value {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
            });
        }

        let existing = self
            .scoped(section)
            .find(|(idx, _)| self.lines[*idx].matches_key(key))
            .map(|(idx, _)| idx);

        if let Some(idx) = existing {
            let Line::Entry { raw, value: span, .. } = &mut self.lines[idx] else {
                return Ok(false);
            };
            if &raw[span.clone()] == value {
                return Ok(false);
            }
            raw.replace_range(span.clone(), value);
            *span = span.start..span.start + value.len();
            return Ok(true);
        }

        let entry = Line::parse(&format!("{} = {}", key, value));
        match self.insertion_point(section) {
            Some(at) => self.insert_line(at, entry),
            None => {
                // `section` is Some here: the root section always has an
                // insertion point.
                let name = section.unwrap_or_default();
                let at = self.lines.len();
                self.insert_line(at, Line::parse(&format!("[{}]", name)));
                self.insert_line(at + 1, entry);
            }
        }
        Ok(true)
    }

    fn remove(&mut self, section: Option<&str>, key: &str) -> bool {
        let doomed: Vec<usize> = self
            .scoped(section)
            .filter(|(idx, _)| self.lines[*idx].matches_key(key))
            .map(|(idx, _)| idx)
            .collect();

        for idx in doomed.iter().rev() {
            self.lines.remove(*idx);
        }
        !doomed.is_empty()
    }

    fn insert_line(&mut self, at: usize, line: Line) {
        if at == self.lines.len() {
            self.trailing_newline = true;
        }
        self.lines.insert(at, line);
    }

    /// Index at which a new entry for `section` goes, or `None` if the
    /// section has no header yet.
    fn insertion_point(&self, section: Option<&str>) -> Option<usize> {
        let (body_start, header_found) = match section {
            None => (0, true),
            Some(name) => match self
                .lines
                .iter()
                .position(|line| matches!(line.section_name(), Some(n) if n.eq_ignore_ascii_case(name)))
            {
                Some(header) => (header + 1, true),
                None => (0, false),
            },
        };
        if !header_found {
            return None;
        }

        let body_end = self.lines[body_start..]
            .iter()
            .position(|line| line.section_name().is_some())
            .map_or(self.lines.len(), |offset| body_start + offset);

        let last_content = self.lines[body_start..body_end]
            .iter()
            .rposition(|line| !line.is_blank())
            .map_or(body_start, |offset| body_start + offset + 1);

        Some(last_content)
    }

    /// Iterate `(index, line)` pairs that belong to `section`.
    fn scoped<'a>(
        &'a self,
        section: Option<&'a str>,
    ) -> impl Iterator<Item = (usize, &'a Line)> + 'a {
        let mut current: Option<&'a str> = None;
        self.lines
            .iter()
            .enumerate()
            .filter(move |&(_, line)| {
                if let Some(name) = line.section_name() {
                    current = Some(name);
                    return false;
                }
                match (section, current) {
                    (None, None) => true,
                    (Some(wanted), Some(name)) => wanted.eq_ignore_ascii_case(name),
                    _ => false,
                }
            })
    }
}

fn validate_key(key: &str) -> Result<(), ConfigError> {
    let trimmed = key.trim();
    let bad = trimmed.is_empty()
        || trimmed != key
        || key.contains(['=', '\n', '\r'])
        || key.starts_with(['[', '#', ';']);
    if bad {
        return Err(ConfigError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn validate_section(name: &str) -> Result<(), ConfigError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name || name.contains([']', '\n', '\r']) {
        return Err(ConfigError::InvalidSection(name.to_string()));
    }
    Ok(())
}

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (idx, line) in self.lines.iter().enumerate() {
            f.write_str(line.raw())?;
            if idx < last || self.trailing_newline {
                f.write_str("\n")?;
            }
        }
        Ok(())
    }
}

impl FromStr for ConfigDocument {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}
