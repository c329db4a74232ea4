//! Token substitution.
//!
//! A [`PathMap`] is an ordered token → value mapping. Substitution walks the
//! tokens in insertion order and replaces every occurrence of each one before
//! moving to the next. Replaced text is never scanned again, so a value that
//! happens to contain a marker is emitted verbatim.

use sslpack_schema::Token;

/// Ordered mapping from token to replacement value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMap {
    entries: Vec<(Token, String)>,
}

enum Segment {
    Pending(String),
    Done(String),
}

impl PathMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a token. An existing token keeps its position.
    pub fn insert(&mut self, token: Token, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(t, _)| *t == token) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((token, value)),
        }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, token: Token, value: impl Into<String>) -> Self {
        self.insert(token, value);
        self
    }

    pub fn get(&self, token: Token) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Token, &str)> {
        self.entries.iter().map(|(t, v)| (*t, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace every token in `text` with its value.
    pub fn substitute(&self, text: &str) -> String {
        self.render(text, None)
    }

    /// Like [`substitute`](Self::substitute), but substituted values use the
    /// platform path separator. Literal text is left alone, so command-line
    /// switches such as `/VERYSILENT` survive.
    pub fn substitute_native(&self, text: &str) -> String {
        self.render(text, native_separator())
    }

    /// Substitute, then normalize separators across the whole result.
    /// Meant for strings that are a path in their entirety.
    pub fn substitute_path(&self, text: &str) -> String {
        let rendered = self.substitute(text);
        match native_separator() {
            Some(sep) => rendered.replace('/', &sep.to_string()),
            None => rendered,
        }
    }

    pub(crate) fn render(&self, text: &str, separator: Option<char>) -> String {
        let mut segments = vec![Segment::Pending(text.to_string())];

        for (token, value) in &self.entries {
            let marker = token.marker();
            let value = match separator {
                Some(sep) => value.replace('/', &sep.to_string()),
                None => value.clone(),
            };

            let mut next = Vec::with_capacity(segments.len());
            for segment in segments {
                match segment {
                    Segment::Pending(s) if s.contains(marker) => {
                        let mut parts = s.split(marker);
                        if let Some(head) = parts.next().filter(|p| !p.is_empty()) {
                            next.push(Segment::Pending(head.to_string()));
                        }
                        for part in parts {
                            next.push(Segment::Done(value.clone()));
                            if !part.is_empty() {
                                next.push(Segment::Pending(part.to_string()));
                            }
                        }
                    }
                    other => next.push(other),
                }
            }
            segments = next;
        }

        segments
            .into_iter()
            .map(|s| match s {
                Segment::Pending(s) | Segment::Done(s) => s,
            })
            .collect()
    }
}

fn native_separator() -> Option<char> {
    (std::path::MAIN_SEPARATOR != '/').then_some(std::path::MAIN_SEPARATOR)
}

/// The version-derived tokens for a specific version string.
pub fn version_tokens(version: &str) -> [(Token, String); 5] {
    let numeric: String = version
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let components: Vec<&str> = numeric.split('.').collect();
    let take = |n: usize| components[..components.len().min(n)].join(".");

    [
        (Token::DottedVersion, version.to_string()),
        (Token::WindowsDottedVersion, take(4)),
        (Token::MsiDottedVersion, take(3)),
        (Token::UnderscoreVersion, version.replace('.', "_")),
        (Token::HyphenVersion, version.replace('.', "-")),
    ]
}
