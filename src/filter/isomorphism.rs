//! Sample isomorphism over blank terms.
//!
//! Two samples are isomorphic when some bijection between their blank
//! labels maps one statement set onto the other. Ground statements (no
//! blank term) must therefore match exactly.
//!
//! ## Algorithm
//!
//! 1. Compare sizes and ground statements.
//! 2. Colour refinement: every blank starts with the same colour; each round
//!    recolours a blank with an xxh64 digest of its current colour and the
//!    sorted signatures of the statements it occurs in. Both samples are
//!    refined in lockstep and rejected as soon as their colour multisets
//!    differ.
//! 3. Backtracking search for a bijection that only pairs blanks of equal
//!    colour. A partial mapping is rejected as soon as a statement whose
//!    blanks are all mapped has no image in the other sample.

use std::collections::{BTreeMap, BTreeSet};

use crate::canonical::{combine_hashes, shape_fingerprint, term_hash};
use crate::types::{Sample, Statement, Term};

const SELF_MARK: u64 = 3;
const OTHER_MARK: u64 = 4;

/// Check whether two samples are equal up to a renaming of blank terms.
pub fn is_isomorphic(a: &Sample, b: &Sample) -> bool {
    if a.len() != b.len() {
        return false;
    }
    if shape_fingerprint(a) != shape_fingerprint(b) {
        tracing::trace!("Isomorphism rejected by shape fingerprint");
        return false;
    }

    let mut left = BlankGraph::new(a);
    let mut right = BlankGraph::new(b);

    if left.ground != right.ground
        || left.statements.len() != right.statements.len()
        || left.labels.len() != right.labels.len()
    {
        return false;
    }
    if left.labels.is_empty() {
        return true;
    }

    if !refine_pair(&mut left, &mut right) {
        tracing::trace!("Isomorphism rejected by colour refinement");
        return false;
    }

    let found = Matcher::new(&left, &right, b).search();
    tracing::trace!(found, blanks = left.labels.len(), "Isomorphism search finished");
    found
}

/// Blank-labelled part of a sample with per-blank colours.
struct BlankGraph<'a> {
    ground: BTreeSet<&'a Statement>,
    statements: Vec<&'a Statement>,
    labels: Vec<&'a str>,
    index: BTreeMap<&'a str, usize>,
    /// Statement indices each blank occurs in.
    incident: Vec<Vec<usize>>,
    colours: Vec<u64>,
}

impl<'a> BlankGraph<'a> {
    fn new(sample: &'a Sample) -> Self {
        let mut ground = BTreeSet::new();
        let mut statements = Vec::new();
        let mut labels = Vec::new();
        let mut index = BTreeMap::new();
        let mut incident: Vec<Vec<usize>> = Vec::new();

        for statement in sample.iter() {
            if !statement.has_blank() {
                ground.insert(statement);
                continue;
            }
            let position = statements.len();
            statements.push(statement);
            for label in statement.terms().iter().filter_map(|t| t.blank_label()) {
                let blank = *index.entry(label).or_insert_with(|| {
                    labels.push(label);
                    incident.push(Vec::new());
                    labels.len() - 1
                });
                if incident[blank].last() != Some(&position) {
                    incident[blank].push(position);
                }
            }
        }

        let colours = vec![0; labels.len()];
        Self {
            ground,
            statements,
            labels,
            index,
            incident,
            colours,
        }
    }

    fn blank_index(&self, term: &Term) -> Option<usize> {
        term.blank_label().and_then(|l| self.index.get(l).copied())
    }

    /// Signature of a statement seen from `focus`.
    fn statement_signature(&self, statement: usize, focus: usize) -> u64 {
        let parts = self.statements[statement].terms().map(|term| match self.blank_index(term) {
            Some(b) if b == focus => combine_hashes(&[SELF_MARK]),
            Some(b) => combine_hashes(&[OTHER_MARK, self.colours[b]]),
            None => term_hash(term),
        });
        combine_hashes(&parts)
    }

    fn refine_once(&mut self) {
        let next = (0..self.labels.len())
            .map(|blank| {
                let mut parts: Vec<u64> = self.incident[blank]
                    .iter()
                    .map(|s| self.statement_signature(*s, blank))
                    .collect();
                parts.sort_unstable();
                parts.insert(0, self.colours[blank]);
                combine_hashes(&parts)
            })
            .collect();
        self.colours = next;
    }

    fn colour_histogram(&self) -> BTreeMap<u64, usize> {
        let mut histogram = BTreeMap::new();
        for colour in &self.colours {
            *histogram.entry(*colour).or_insert(0) += 1;
        }
        histogram
    }
}

/// Refine both graphs in lockstep until the partition stops splitting.
/// Returns `false` as soon as the colour histograms differ.
fn refine_pair(left: &mut BlankGraph<'_>, right: &mut BlankGraph<'_>) -> bool {
    let mut classes = 1;
    for _ in 0..left.labels.len() {
        left.refine_once();
        right.refine_once();
        let histogram = left.colour_histogram();
        if histogram != right.colour_histogram() {
            return false;
        }
        if histogram.len() == classes {
            break;
        }
        classes = histogram.len();
    }
    true
}

struct Matcher<'g, 'a> {
    left: &'g BlankGraph<'a>,
    right: &'g BlankGraph<'a>,
    target: &'a Sample,
    /// Left blanks ordered by colour class size, smallest first.
    order: Vec<usize>,
    mapping: Vec<Option<usize>>,
    used: Vec<bool>,
}

impl<'g, 'a> Matcher<'g, 'a> {
    fn new(left: &'g BlankGraph<'a>, right: &'g BlankGraph<'a>, target: &'a Sample) -> Self {
        let histogram = left.colour_histogram();
        let mut order: Vec<usize> = (0..left.labels.len()).collect();
        order.sort_by_key(|b| (histogram[&left.colours[*b]], left.colours[*b], *b));
        Self {
            left,
            right,
            target,
            order,
            mapping: vec![None; left.labels.len()],
            used: vec![false; right.labels.len()],
        }
    }

    fn search(&mut self) -> bool {
        self.extend(0)
    }

    fn extend(&mut self, depth: usize) -> bool {
        let Some(&blank) = self.order.get(depth) else {
            return true;
        };
        let colour = self.left.colours[blank];
        for candidate in 0..self.right.labels.len() {
            if self.used[candidate] || self.right.colours[candidate] != colour {
                continue;
            }
            self.mapping[blank] = Some(candidate);
            self.used[candidate] = true;
            if self.consistent(blank) && self.extend(depth + 1) {
                return true;
            }
            self.mapping[blank] = None;
            self.used[candidate] = false;
        }
        false
    }

    /// Every fully mapped statement touching `blank` must exist in the target.
    fn consistent(&self, blank: usize) -> bool {
        self.left.incident[blank]
            .iter()
            .all(|s| match self.image(self.left.statements[*s]) {
                Some(mapped) => self.target.contains(&mapped),
                None => true,
            })
    }

    /// Image of a statement under the current mapping, `None` while some of
    /// its blanks are unmapped.
    fn image(&self, statement: &Statement) -> Option<Statement> {
        let map = |term: &Term| -> Option<Term> {
            match self.left.blank_index(term) {
                Some(b) => {
                    let target = self.mapping[b]?;
                    Some(Term::blank(self.right.labels[target]))
                }
                None => Some(term.clone()),
            }
        };
        Some(Statement::new(
            map(&statement.subject)?,
            map(&statement.predicate)?,
            map(&statement.object)?,
        ))
    }
}
