//! Dense multiplication tables: a set of rows closed under right
//! multiplication, reduced modulo a part-end group and indexed by small
//! integers so that transposition becomes array lookup.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::ops::Mul;

use index_vec::IndexVec;

use crate::{Group, Row, RowBuf, Stage};

index_vec::define_index_type! {
    /// The dense index of a coset representative within a [`MultTable`].
    pub struct RowIdx = u32;
}

/// A precomputed transposition: for a fixed row `c`, maps `index(r)` to
/// `index(r * c)` for every representative in the table.
#[derive(Clone, PartialEq, Eq)]
pub struct PostCol {
    cols: IndexVec<RowIdx, RowIdx>,
}

impl Mul<&PostCol> for RowIdx {
    type Output = RowIdx;

    #[inline]
    fn mul(self, rhs: &PostCol) -> RowIdx {
        rhs.cols[self]
    }
}

/// A dense integer-indexed representation of a row set (usually an extent or
/// its in-course half), reduced modulo a part-end [`Group`] and, optionally,
/// a post-group acting on the right.
pub struct MultTable {
    stage: Stage,
    /// One representative per coset, in first-seen order
    reps: IndexVec<RowIdx, RowBuf>,
    /// Every row of the source set, mapped to its coset's index
    lookup: HashMap<RowBuf, RowIdx>,
    group_size: usize,
}

impl MultTable {
    /// Builds a table from a row source.  `part_ends` (and the optional
    /// `post_group`) partition the source into cosets `G·r·H`; each coset
    /// gets one dense index.
    pub fn new(
        rows: impl IntoIterator<Item = RowBuf>,
        part_ends: &Group,
        post_group: Option<&Group>,
    ) -> Result<Self, TableError> {
        let source: Vec<RowBuf> = rows.into_iter().collect();
        let stage = source.first().map(|r| r.stage()).ok_or(TableError::EmptySource)?;
        let source_set: std::collections::HashSet<&RowBuf> = source.iter().collect();

        let mut reps: IndexVec<RowIdx, RowBuf> = IndexVec::new();
        let mut lookup: HashMap<RowBuf, RowIdx> = HashMap::new();
        for r in &source {
            if lookup.contains_key(r) {
                continue;
            }
            let idx = reps.push(r.clone());
            // Mark the whole coset G·r·H.  The part ends must act within
            // the source set; the post group may map outside it (its job is
            // lookup of transposed rows modulo H).
            for g in part_ends.iter() {
                let gr = g * r.as_row();
                if !source_set.contains(&gr) {
                    return Err(TableError::PartEndConflictsExtent);
                }
                match post_group {
                    Some(h_group) => {
                        for h in h_group.iter() {
                            lookup.entry(&gr * h).or_insert(idx);
                        }
                    }
                    None => {
                        lookup.insert(gr, idx);
                    }
                }
            }
        }

        // The part-end action is free, so the cosets partition the source
        if reps.len() * part_ends.len() != source.len() {
            return Err(TableError::PartEndConflictsExtent);
        }

        Ok(MultTable {
            stage,
            reps,
            lookup,
            group_size: part_ends.len(),
        })
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The number of cosets in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.reps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.reps.is_empty()
    }

    /// The order of the part-end group used to reduce the table.
    #[inline]
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// The representative row of a coset.
    #[inline]
    pub fn row(&self, idx: RowIdx) -> &Row {
        &self.reps[idx]
    }

    /// The coset index of a row, or `None` if the row is outside the source
    /// set.
    pub fn find(&self, row: &Row) -> Option<RowIdx> {
        self.lookup.get(row).copied()
    }

    /// An iterator over `(index, representative)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (RowIdx, &Row)> {
        self.reps
            .iter_enumerated()
            .map(|(i, r)| (i, r.as_row()))
    }

    pub fn indices(&self) -> impl Iterator<Item = RowIdx> {
        (0..self.reps.len()).map(RowIdx::from_usize)
    }

    /// Precomputes right multiplication by `c` as a [`PostCol`].  Fails with
    /// [`TableError::PostColumnConflict`] if the action leaves the source
    /// set (i.e. does not descend to the cosets).
    pub fn compute_post_col(&self, c: &Row) -> Result<PostCol, TableError> {
        let mut cols = IndexVec::with_capacity(self.reps.len());
        for rep in &self.reps {
            let product = rep.as_row() * c;
            let idx = self
                .find(&product)
                .ok_or_else(|| TableError::PostColumnConflict(c.to_owned()))?;
            cols.push(idx);
        }
        Ok(PostCol { cols })
    }
}

/// The ways that building a [`MultTable`] can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    EmptySource,
    /// The part-end group does not act freely within the row source, so the
    /// cosets don't partition it
    PartEndConflictsExtent,
    /// Right multiplication by this row leaves the row source
    PostColumnConflict(RowBuf),
}

impl Display for TableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::EmptySource => write!(f, "multiplication table has no rows"),
            TableError::PartEndConflictsExtent => {
                write!(f, "the part-end group conflicts with the extent")
            }
            TableError::PostColumnConflict(r) => {
                write!(f, "transposition by '{}' does not preserve the table", r)
            }
        }
    }
}

impl std::error::Error for TableError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExtentIterator, InCourseExtentIterator, Stage};

    #[test]
    fn whole_extent_trivial_group() {
        let part_ends = Group::trivial(Stage::MINOR);
        let table = MultTable::new(
            ExtentIterator::new(5, 1, Stage::MINOR),
            &part_ends,
            None,
        )
        .unwrap();
        assert_eq!(table.len(), 120);
        assert_eq!(table.group_size(), 1);

        // Transposition by a lead head permutes the table
        let lh = RowBuf::parse("135264").unwrap();
        let col = table.compute_post_col(&lh).unwrap();
        let rounds_idx = table.find(&RowBuf::rounds(Stage::MINOR)).unwrap();
        assert_eq!(table.row(rounds_idx * &col), lh.as_row());
    }

    #[test]
    fn part_end_cosets() {
        // The 3-part group on minor: 1 fixed, (234)(56)? -- use cyclic 3-part
        let part_end = RowBuf::parse("156423").unwrap(); // order 3
        let g = Group::closure([part_end]).unwrap();
        assert_eq!(g.len(), 3);
        let table = MultTable::new(
            ExtentIterator::new(5, 1, Stage::MINOR),
            &g,
            None,
        )
        .unwrap();
        assert_eq!(table.len() * table.group_size(), 120);
        assert_eq!(table.len(), 40);
    }

    #[test]
    fn in_course_rejects_odd_part_end() {
        // An odd part end can't partition the in-course extent
        let g = Group::closure([RowBuf::parse("214365").unwrap()]).unwrap();
        let result = MultTable::new(InCourseExtentIterator::new(5, 1, Stage::MINOR), &g, None);
        assert_eq!(result.err(), Some(TableError::PartEndConflictsExtent));
    }

    #[test]
    fn post_column_conflict() {
        let table = MultTable::new(
            InCourseExtentIterator::new(5, 1, Stage::MINOR),
            &Group::trivial(Stage::MINOR),
            None,
        )
        .unwrap();
        // An odd row maps the in-course extent out of itself
        let odd = RowBuf::parse("213465").unwrap();
        assert!(matches!(
            table.compute_post_col(&odd),
            Err(TableError::PostColumnConflict(_))
        ));
        // An even row is fine, and the column is a bijection
        let even = RowBuf::parse("214365").unwrap();
        let col = table.compute_post_col(&even).unwrap();
        let mut seen = vec![false; table.len()];
        for i in table.indices() {
            let j = i * &col;
            assert!(!seen[j.index()]);
            seen[j.index()] = true;
        }
    }
}
