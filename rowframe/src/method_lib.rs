//! "Lite" method libraries: line-oriented files of
//! `place-notation<TAB>payload` records.

use std::fmt::{Display, Formatter};
use std::io::BufRead;

use crate::{Method, PlaceNotationError, Stage};

/// One line of a lite library.
#[derive(Debug, Clone)]
pub struct LibraryEntry {
    pub place_notation: String,
    /// Everything after the first tab, usually the method's name
    pub payload: String,
    /// 1-indexed source line, for error reporting
    pub line: usize,
}

impl LibraryEntry {
    pub fn method(&self, stage: Stage) -> Result<Method, PlaceNotationError> {
        Method::parse(&self.place_notation, stage)
    }
}

/// A method library read from a lite (tab-separated) file.
#[derive(Debug, Clone, Default)]
pub struct LiteLibrary {
    entries: Vec<LibraryEntry>,
}

impl LiteLibrary {
    /// Reads a library, one entry per non-empty line.  Lines starting with
    /// `#` are comments.
    pub fn read(reader: impl BufRead) -> std::io::Result<Self> {
        let mut entries = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (pn, payload) = match trimmed.split_once('\t') {
                Some((pn, payload)) => (pn, payload.trim()),
                None => (trimmed, ""),
            };
            entries.push(LibraryEntry {
                place_notation: pn.trim().to_owned(),
                payload: payload.to_owned(),
                line: i + 1,
            });
        }
        Ok(LiteLibrary { entries })
    }

    /// The colon-separated default library paths from `METHOD_LIBRARY`.
    pub fn default_paths() -> Vec<std::path::PathBuf> {
        std::env::var("METHOD_LIBRARY")
            .map(|v| v.split(':').map(Into::into).collect())
            .unwrap_or_default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LibraryEntry> {
        self.entries.iter()
    }

    /// Looks a method up by (case-insensitive) payload.  On failure, the
    /// error carries the closest payloads by edit distance.
    pub fn find(&self, name: &str) -> Result<&LibraryEntry, MethodNotFound> {
        let lower = name.to_lowercase();
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.payload.to_lowercase() == lower)
        {
            return Ok(entry);
        }
        let mut scored: Vec<(usize, &str)> = self
            .entries
            .iter()
            .map(|e| {
                (
                    edit_distance::edit_distance(&lower, &e.payload.to_lowercase()),
                    e.payload.as_str(),
                )
            })
            .collect();
        scored.sort();
        Err(MethodNotFound {
            name: name.to_owned(),
            suggestions: scored
                .into_iter()
                .take(3)
                .map(|(_, p)| p.to_owned())
                .collect(),
        })
    }
}

/// Error returned by [`LiteLibrary::find`].
#[derive(Debug, Clone)]
pub struct MethodNotFound {
    pub name: String,
    pub suggestions: Vec<String>,
}

impl Display for MethodNotFound {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "method '{}' not found in the libraries", self.name)?;
        if !self.suggestions.is_empty() {
            write!(f, " (closest: {})", self.suggestions.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for MethodNotFound {}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB: &str = "\
&x16x16x16,12\tPlain Bob Minor
&x3x4x2x3x4x5,2\tCambridge Surprise Minor
# a comment line

34x34.16x12x16x12x16,16\tKent fragment
";

    #[test]
    fn read_and_find() {
        let lib = LiteLibrary::read(LIB.as_bytes()).unwrap();
        assert_eq!(lib.len(), 3);
        let pb = lib.find("plain bob minor").unwrap();
        assert_eq!(pb.line, 1);
        assert!(pb.method(Stage::MINOR).is_ok());
    }

    #[test]
    fn suggestions() {
        let lib = LiteLibrary::read(LIB.as_bytes()).unwrap();
        let err = lib.find("Cambrige Surprise Minor").unwrap_err();
        assert_eq!(err.suggestions[0], "Cambridge Surprise Minor");
    }
}
