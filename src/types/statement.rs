//! Statement types for data samples.
//!
//! A sample is an ordered set of labeled-graph statements. Blank terms are
//! local identifiers: two samples that differ only by a renaming of blank
//! terms are considered equal by the isomorphism filters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io::{BufRead, Write};

/// A term in subject, predicate or object position.
///
/// Implements `Ord` so samples iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Term {
    /// Globally named resource.
    Iri {
        /// The IRI string.
        value: String,
    },
    /// Locally scoped anonymous resource.
    Blank {
        /// Local label, only meaningful within one sample.
        label: String,
    },
    /// Literal value with optional datatype or language tag.
    Literal {
        /// Lexical form.
        value: String,
        /// Datatype IRI.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datatype: Option<String>,
        /// Language tag.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
}

impl Term {
    /// Create an IRI term.
    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri { value: value.into() }
    }

    /// Create a blank term.
    pub fn blank(label: impl Into<String>) -> Self {
        Self::Blank { label: label.into() }
    }

    /// Create a plain literal.
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    /// Create a typed literal.
    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    /// Whether this term is a blank identifier.
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Blank { .. })
    }

    /// Blank label, if this is a blank term.
    pub fn blank_label(&self) -> Option<&str> {
        match self {
            Self::Blank { label } => Some(label),
            _ => None,
        }
    }

    /// Approximate heap footprint in bytes.
    pub fn estimated_bytes(&self) -> usize {
        match self {
            Self::Iri { value } => value.len(),
            Self::Blank { label } => label.len(),
            Self::Literal {
                value,
                datatype,
                language,
            } => {
                value.len()
                    + datatype.as_ref().map_or(0, String::len)
                    + language.as_ref().map_or(0, String::len)
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iri { value } => write!(f, "<{}>", value),
            Self::Blank { label } => write!(f, "_:{}", label),
            Self::Literal {
                value,
                datatype: Some(dt),
                ..
            } => write!(f, "{:?}^^<{}>", value, dt),
            Self::Literal {
                value,
                language: Some(lang),
                ..
            } => write!(f, "{:?}@{}", value, lang),
            Self::Literal { value, .. } => write!(f, "{:?}", value),
        }
    }
}

/// A single subject–predicate–object statement.
///
/// Ordering is canonical: subject, then predicate, then object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Statement {
    /// Subject term.
    pub subject: Term,
    /// Predicate term.
    pub predicate: Term,
    /// Object term.
    pub object: Term,
}

impl Statement {
    /// Create a new statement.
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    /// Terms in position order.
    pub fn terms(&self) -> [&Term; 3] {
        [&self.subject, &self.predicate, &self.object]
    }

    /// Whether any position holds a blank term.
    pub fn has_blank(&self) -> bool {
        self.terms().iter().any(|t| t.is_blank())
    }

    /// Approximate heap footprint in bytes.
    pub fn estimated_bytes(&self) -> usize {
        self.terms().iter().map(|t| t.estimated_bytes()).sum()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// Ordered statement set standing in for a dataset at one point in a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sample {
    statements: BTreeSet<Statement>,
}

impl Sample {
    /// Create an empty sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Check if the sample is empty.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Insert a statement. Returns `false` if it was already present.
    pub fn insert(&mut self, statement: Statement) -> bool {
        self.statements.insert(statement)
    }

    /// Remove a statement. Returns `true` if it was present.
    pub fn remove(&mut self, statement: &Statement) -> bool {
        self.statements.remove(statement)
    }

    /// Check membership.
    pub fn contains(&self, statement: &Statement) -> bool {
        self.statements.contains(statement)
    }

    /// Iterate statements in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }

    /// Statements in `self` that are not in `other`.
    pub fn difference(&self, other: &Sample) -> Sample {
        self.statements
            .difference(&other.statements)
            .cloned()
            .collect()
    }

    /// Approximate heap footprint in bytes, used for memory accounting.
    pub fn estimated_bytes(&self) -> usize {
        self.statements.iter().map(Statement::estimated_bytes).sum()
    }

    /// Write as JSON Lines, one statement per line.
    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for statement in &self.statements {
            serde_json::to_writer(&mut writer, statement)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    /// Read JSON Lines written by [`Sample::write_jsonl`]. Blank lines are skipped.
    pub fn read_jsonl<R: BufRead>(reader: R) -> std::io::Result<Self> {
        let mut sample = Sample::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let statement: Statement = serde_json::from_str(&line)?;
            sample.insert(statement);
        }
        Ok(sample)
    }
}

impl FromIterator<Statement> for Sample {
    fn from_iter<I: IntoIterator<Item = Statement>>(iter: I) -> Self {
        Self {
            statements: iter.into_iter().collect(),
        }
    }
}

impl Extend<Statement> for Sample {
    fn extend<I: IntoIterator<Item = Statement>>(&mut self, iter: I) {
        self.statements.extend(iter);
    }
}

impl<'a> IntoIterator for &'a Sample {
    type Item = &'a Statement;
    type IntoIter = std::collections::btree_set::Iter<'a, Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn st(s: &str, p: &str, o: &str) -> Statement {
        Statement::new(Term::iri(s), Term::iri(p), Term::literal(o))
    }

    #[test]
    fn test_sample_is_a_set() {
        let mut sample = Sample::new();
        assert!(sample.insert(st("a", "p", "1")));
        assert!(!sample.insert(st("a", "p", "1")));
        assert_eq!(sample.len(), 1);
    }

    #[test]
    fn test_difference() {
        let a: Sample = vec![st("a", "p", "1"), st("b", "p", "2")].into_iter().collect();
        let b: Sample = vec![st("b", "p", "2"), st("c", "p", "3")].into_iter().collect();

        let added = a.difference(&b);
        assert_eq!(added.len(), 1);
        assert!(added.contains(&st("a", "p", "1")));
    }

    #[test]
    fn test_jsonl_codec() {
        let sample: Sample = vec![
            st("a", "p", "1"),
            Statement::new(Term::blank("x"), Term::iri("p"), Term::typed_literal("2", "xsd:int")),
        ]
        .into_iter()
        .collect();

        let mut buf = Vec::new();
        sample.write_jsonl(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert_eq!(text.lines().count(), 2);

        let read = Sample::read_jsonl(buf.as_slice()).unwrap();
        assert_eq!(read, sample);
    }

    #[test]
    fn test_display() {
        let s = Statement::new(Term::blank("b0"), Term::iri("p"), Term::literal("x"));
        assert_eq!(s.to_string(), "_:b0 <p> \"x\" .");
    }
}
