//! Finite groups of [`Row`]s, used as part-end groups.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use crate::{IncompatibleStages, Row, RowBuf, Stage};

/// A finite subgroup of the symmetric group on a [`Stage`]'s bells, stored
/// as its full element list in generation order (rounds first).
#[derive(Clone)]
pub struct Group {
    rows: Vec<RowBuf>,
    lookup: HashMap<RowBuf, usize>,
}

impl Group {
    /// The group containing only rounds.
    pub fn trivial(stage: Stage) -> Self {
        Self::closure(std::iter::once(RowBuf::rounds(stage))).unwrap()
    }

    /// Closes a set of generators under composition.
    pub fn closure(
        generators: impl IntoIterator<Item = RowBuf>,
    ) -> Result<Self, IncompatibleStages> {
        let gens: Vec<RowBuf> = generators.into_iter().collect();
        let stage = gens
            .first()
            .map(|r| r.stage())
            .expect("can't close an empty generator list");
        for g in &gens {
            IncompatibleStages::check(stage, g.stage())?;
        }

        let mut rows = vec![RowBuf::rounds(stage)];
        let mut lookup = HashMap::new();
        lookup.insert(rows[0].clone(), 0);
        // Repeated right-multiplication to a fixed point
        let mut frontier = 0;
        while frontier < rows.len() {
            for g in &gens {
                let next = &rows[frontier] * g;
                if !lookup.contains_key(&next) {
                    lookup.insert(next.clone(), rows.len());
                    rows.push(next);
                }
            }
            frontier += 1;
        }
        Ok(Group { rows, lookup })
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.rows[0].stage()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Groups always contain rounds, so are never empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn is_trivial(&self) -> bool {
        self.rows.len() == 1
    }

    pub fn contains(&self, row: &Row) -> bool {
        self.lookup.contains_key(row)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> + Clone {
        self.rows.iter().map(|r| r.as_row())
    }

    /// The label of the right coset `G·r`: its lexicographically least
    /// element.  Rows in the same coset always map to the same label.
    pub fn rcoset_label(&self, r: &Row) -> RowBuf {
        let mut label = self.rows[0].as_row() * r;
        for g in &self.rows[1..] {
            let candidate = g.as_row() * r;
            if candidate < label {
                label = candidate;
            }
        }
        label
    }
}

impl Debug for Group {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rows.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stage;

    #[test]
    fn trivial() {
        let g = Group::trivial(Stage::MAJOR);
        assert_eq!(g.len(), 1);
        assert!(g.contains(&RowBuf::rounds(Stage::MAJOR)));
    }

    #[test]
    fn cyclic_part_ends() {
        // The cyclic group generated by 13456782 has order 7
        let gen = RowBuf::parse("13456782").unwrap();
        let g = Group::closure([gen]).unwrap();
        assert_eq!(g.len(), 7);
        assert!(g.contains(&RowBuf::parse("18234567").unwrap()));
    }

    #[test]
    fn non_cyclic_closure() {
        // Two transpositions acting on disjoint pairs generate a 4-group
        let a = RowBuf::parse("2134").unwrap();
        let b = RowBuf::parse("1243").unwrap();
        let g = Group::closure([a, b]).unwrap();
        assert_eq!(g.len(), 4);
        assert!(g.contains(&RowBuf::parse("2143").unwrap()));
    }

    #[test]
    fn coset_labels() {
        let g = Group::closure([RowBuf::parse("13456782").unwrap()]).unwrap();
        let r = RowBuf::parse("21345678").unwrap();
        let label = g.rcoset_label(&r);
        // Every member of the coset maps to the same label
        for e in g.iter() {
            assert_eq!(g.rcoset_label(&(e * r.as_row())), label);
        }
        // The label is an element of the coset
        assert!(g.iter().any(|e| e * r.as_row() == label));
    }
}
