//! Lazy enumeration of extents: every row on a stage, with optional fixed
//! hunt bells at the front and fixed tenors at the back.

use crate::{Parity, RowBuf, Stage};

/// Iterates, in lexicographic order, over every row of a [`Stage`] in which
/// the first `hunts` bells and the last `stage - hunts - working` bells are
/// fixed in their home places.  Yields `working!` rows.
pub struct ExtentIterator {
    stage: Stage,
    hunts: usize,
    working: usize,
    /// The next row to yield, or `None` once the extent is exhausted
    next: Option<RowBuf>,
}

impl ExtentIterator {
    pub fn new(working: usize, hunts: usize, stage: Stage) -> Self {
        assert!(hunts + working <= stage.num_bells());
        ExtentIterator {
            stage,
            hunts,
            working,
            next: Some(RowBuf::rounds(stage)),
        }
    }

    /// The number of rows this extent contains.
    pub fn size(&self) -> usize {
        use factorial::Factorial;
        self.working.factorial()
    }

    /// Advances `row`'s working window to the lexicographically next
    /// permutation.  Returns `false` once the window has wrapped back to
    /// ascending order.
    fn next_permutation(row: &mut RowBuf, lo: usize, hi: usize) -> bool {
        if hi - lo < 2 {
            return false;
        }
        // Find the longest descending suffix
        let mut i = hi - 1;
        while i > lo && row[i - 1] >= row[i] {
            i -= 1;
        }
        if i == lo {
            // Whole window is descending: wrap around to ascending
            Self::reverse_window(row, lo, hi);
            return false;
        }
        // Swap the pivot with the least element of the suffix greater than it
        let mut j = hi - 1;
        while row[j] <= row[i - 1] {
            j -= 1;
        }
        row.swap(i - 1, j);
        Self::reverse_window(row, i, hi);
        true
    }

    fn reverse_window(row: &mut RowBuf, lo: usize, hi: usize) {
        let (mut a, mut b) = (lo, hi);
        while a + 1 < b {
            b -= 1;
            row.swap(a, b);
            a += 1;
        }
    }
}

impl Iterator for ExtentIterator {
    type Item = RowBuf;

    fn next(&mut self) -> Option<RowBuf> {
        let current = self.next.take()?;
        let mut next = current.clone();
        if Self::next_permutation(&mut next, self.hunts, self.hunts + self.working) {
            self.next = Some(next);
        }
        Some(current)
    }
}

/// The in-course half of an extent: only even-parity rows.  For every
/// arrangement of all-but-the-last-two working bells, exactly one order of
/// the final pair is in course, so this yields `working! / 2` rows and
/// adjacent rows differ by an even permutation.
pub struct InCourseExtentIterator {
    inner: ExtentIterator,
}

impl InCourseExtentIterator {
    pub fn new(working: usize, hunts: usize, stage: Stage) -> Self {
        InCourseExtentIterator {
            inner: ExtentIterator::new(working, hunts, stage),
        }
    }

    /// The number of rows this extent contains.
    pub fn size(&self) -> usize {
        let full = self.inner.size();
        if self.inner.working < 2 {
            full
        } else {
            full / 2
        }
    }
}

impl Iterator for InCourseExtentIterator {
    type Item = RowBuf;

    fn next(&mut self) -> Option<RowBuf> {
        loop {
            let row = self.inner.next()?;
            if row.parity() == Parity::Even {
                return Some(row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bell;
    use itertools::Itertools;

    #[test]
    fn full_extent_minimus() {
        let rows: Vec<String> = ExtentIterator::new(4, 0, Stage::MINIMUS)
            .map(|r| r.to_string())
            .collect();
        assert_eq!(rows.len(), 24);
        assert_eq!(rows[0], "1234");
        assert_eq!(rows[1], "1243");
        assert_eq!(rows[23], "4321");
        assert_eq!(rows.iter().unique().count(), 24);
    }

    #[test]
    fn in_course_extent_minimus() {
        let rows: Vec<RowBuf> = InCourseExtentIterator::new(4, 0, Stage::MINIMUS).collect();
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].to_string(), "1234");
        assert_eq!(rows[1].to_string(), "1342");
        assert_eq!(rows[2].to_string(), "1423");
        assert_eq!(rows[11].to_string(), "4321");
        assert!(rows.iter().all(|r| r.parity() == Parity::Even));
        assert_eq!(rows.iter().unique().count(), 12);
    }

    #[test]
    fn hunts_and_tenors_fixed() {
        // 8 bells, treble fixed in front, two tenors behind: 5! rows
        let rows: Vec<RowBuf> = ExtentIterator::new(5, 1, Stage::MAJOR).collect();
        assert_eq!(rows.len(), 120);
        for r in &rows {
            assert_eq!(r[0], Bell::TREBLE);
            assert!(r.fixes_tail(6));
        }
    }

    #[test]
    fn in_course_with_hunt() {
        let rows: Vec<RowBuf> = InCourseExtentIterator::new(5, 1, Stage::MINOR).collect();
        assert_eq!(rows.len(), 60);
        assert!(rows.iter().all(|r| r.parity() == Parity::Even));
        assert!(rows.iter().all(|r| r[0] == Bell::TREBLE));
    }

    #[test]
    fn degenerate_extents() {
        assert_eq!(ExtentIterator::new(0, 1, Stage::MINOR).count(), 1);
        assert_eq!(InCourseExtentIterator::new(1, 0, Stage::MINOR).count(), 1);
    }
}
