//! Changes: permutations made of disjoint adjacent swaps, written as place
//! notation.

use std::fmt::{Debug, Display, Formatter};
use std::ops::Mul;

use crate::{Bell, Parity, Row, RowBuf, Stage};

/// A single change on some [`Stage`]: a set of *places* (bells which stay
/// put), with every other bell swapping with an adjacent neighbour.
///
/// **Invariant**: `places` is sorted and deduplicated, and the gaps between
/// consecutive places (and the ends of the row) all have even length.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Change {
    stage: Stage,
    places: Vec<usize>,
}

impl Change {
    /// The cross change (no places).  Only exists on even [`Stage`]s.
    pub fn cross(stage: Stage) -> Result<Self, PlaceNotationError> {
        Self::from_places(Vec::new(), stage)
    }

    /// Builds a `Change` from a list of explicit places, adding the implicit
    /// external places that the pairing requires.  An interior gap of odd
    /// length cannot be paired and is an error.
    pub fn from_places(
        mut places: Vec<usize>,
        stage: Stage,
    ) -> Result<Self, PlaceNotationError> {
        let n = stage.num_bells();
        places.sort_unstable();
        places.dedup();
        if places.is_empty() {
            // A cross on an odd stage leaves one bell unpaired
            if n % 2 == 1 {
                return Err(PlaceNotationError::CrossOnOddStage(stage));
            }
            return Ok(Change { stage, places });
        }
        if let Some(&p) = places.last() {
            if p >= n {
                return Err(PlaceNotationError::PlaceOutOfStage(
                    Bell::from_index(p.min(Bell::MAX_BELLS - 1)).unwrap(),
                    stage,
                ));
            }
        }
        // Interior gaps must pair up exactly
        for pair in places.windows(2) {
            if (pair[1] - pair[0]) % 2 == 0 {
                return Err(PlaceNotationError::UnpairableGap(pair[0], pair[1]));
            }
        }
        // Add implicit external places where an end gap has odd length
        if places[0] % 2 == 1 {
            places.insert(0, 0);
        }
        if (n - 1 - places[places.len() - 1]) % 2 == 1 {
            places.push(n - 1);
        }
        Ok(Change { stage, places })
    }

    /// Parses a single change: `-`, `x` or `X` for the cross, otherwise a
    /// string of place symbols.
    pub fn parse(s: &str, stage: Stage) -> Result<Self, PlaceNotationError> {
        if let "-" | "x" | "X" = s {
            return Self::cross(stage);
        }
        if s.is_empty() {
            return Err(PlaceNotationError::EmptyChange);
        }
        let mut places = Vec::with_capacity(s.len());
        for c in s.chars() {
            let b = Bell::from_name(c).ok_or(PlaceNotationError::InvalidChar(c))?;
            places.push(b.index());
        }
        Self::from_places(places, stage)
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The sorted places of this `Change`.
    #[inline]
    pub fn places(&self) -> &[usize] {
        &self.places
    }

    #[inline]
    pub fn is_cross(&self) -> bool {
        self.places.is_empty()
    }

    #[inline]
    pub fn count_places(&self) -> usize {
        self.places.len()
    }

    /// Does this `Change` make a place strictly inside the row?
    pub fn has_internal_places(&self) -> bool {
        let n = self.stage.num_bells();
        self.places.iter().any(|&p| p > 0 && p + 1 < n)
    }

    /// Is a place made at the given position?
    #[inline]
    pub fn finds_place(&self, place: usize) -> bool {
        self.places.binary_search(&place).is_ok()
    }

    /// The parity: even iff an even number of pairs swap.
    pub fn parity(&self) -> Parity {
        Parity::from_swap_count((self.stage.num_bells() - self.places.len()) / 2)
    }

    /// The start positions of the swapped pairs, in increasing order.
    pub fn swaps(&self) -> Vec<usize> {
        let n = self.stage.num_bells();
        let mut swaps = Vec::with_capacity((n - self.places.len()) / 2);
        let mut next_place = self.places.iter().peekable();
        let mut i = 0;
        while i < n {
            if next_place.peek() == Some(&&i) {
                next_place.next();
                i += 1;
            } else {
                swaps.push(i);
                i += 2;
            }
        }
        swaps
    }

    /// Do the bells in places `i` and `i + 1` swap over?
    pub fn finds_swap(&self, i: usize) -> bool {
        self.swaps().contains(&i)
    }

    /// The same `Change` with the row order reversed (place `p` becomes
    /// `n - 1 - p`).
    pub fn reverse(&self) -> Change {
        let n = self.stage.num_bells();
        let mut places: Vec<usize> = self.places.iter().map(|&p| n - 1 - p).collect();
        places.reverse();
        Change {
            stage: self.stage,
            places,
        }
    }

    /// Applies this `Change` in place: `row := row * self`.
    pub fn permute(&self, row: &mut RowBuf) {
        assert_eq!(self.stage, row.stage());
        for s in self.swaps() {
            row.swap(s, s + 1);
        }
    }

    /// This `Change` as a [`RowBuf`] (rounds with the pairs swapped).
    pub fn to_row(&self) -> RowBuf {
        let mut r = RowBuf::rounds(self.stage);
        self.permute(&mut r);
        r
    }

    /// The length of the longest run of adjacent places.
    pub fn longest_place_run(&self) -> usize {
        let mut longest = 0;
        let mut run = 0;
        let mut prev = usize::MAX;
        for &p in &self.places {
            run = if prev != usize::MAX && p == prev + 1 {
                run + 1
            } else {
                1
            };
            longest = longest.max(run);
            prev = p;
        }
        longest
    }
}

impl Mul<&Change> for &Row {
    type Output = RowBuf;

    /// `(r * c)[i] = r[c[i]]`: the row one change later.
    ///
    /// # Panics
    ///
    /// Panics if the [`Stage`]s don't match.
    fn mul(self, rhs: &Change) -> RowBuf {
        let mut out = self.to_owned();
        rhs.permute(&mut out);
        out
    }
}

impl Mul<&Change> for &RowBuf {
    type Output = RowBuf;

    fn mul(self, rhs: &Change) -> RowBuf {
        self.as_row() * rhs
    }
}

impl Display for Change {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_cross() {
            write!(f, "-")
        } else {
            for &p in &self.places {
                write!(f, "{}", Bell::from_index(p).unwrap())?;
            }
            Ok(())
        }
    }
}

impl Debug for Change {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Change({})", self)
    }
}

/////////////////////////
// CHANGES ENUMERATION //
/////////////////////////

/// An [`Iterator`] over every [`Change`] of a [`Stage`] whose swaps all lie
/// within a window of `working` places starting at `offset`; all places
/// outside the window are fixed.  Yields `Fib(working + 1)` changes.
pub struct ChangesIterator {
    changes: std::vec::IntoIter<Change>,
}

impl ChangesIterator {
    pub fn new(working: usize, offset: usize, stage: Stage) -> Self {
        assert!(offset + working <= stage.num_bells());
        let mut out = Vec::new();
        let mut swaps = Vec::new();
        Self::generate(offset, offset + working, stage, &mut swaps, &mut out);
        ChangesIterator {
            changes: out.into_iter(),
        }
    }

    /// Every change on the whole stage.
    pub fn all(stage: Stage) -> Self {
        Self::new(stage.num_bells(), 0, stage)
    }

    fn generate(
        pos: usize,
        end: usize,
        stage: Stage,
        swaps: &mut Vec<usize>,
        out: &mut Vec<Change>,
    ) {
        if pos >= end {
            let mut places: Vec<usize> = Vec::new();
            let mut covered = swaps.iter().peekable();
            let mut i = 0;
            while i < stage.num_bells() {
                if covered.peek() == Some(&&i) {
                    covered.next();
                    i += 2;
                } else {
                    places.push(i);
                    i += 1;
                }
            }
            out.push(Change {
                stage,
                places,
            });
            return;
        }
        // Make a place at `pos`
        Self::generate(pos + 1, end, stage, swaps, out);
        // Or swap `pos` with `pos + 1`
        if pos + 1 < end {
            swaps.push(pos);
            Self::generate(pos + 2, end, stage, swaps, out);
            swaps.pop();
        }
    }
}

impl Iterator for ChangesIterator {
    type Item = Change;

    fn next(&mut self) -> Option<Change> {
        self.changes.next()
    }
}

////////////////////////////
// PLACE NOTATION PARSING //
////////////////////////////

/// A parsed block of place notation: a whole lead's worth of [`Change`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PnBlock {
    changes: Vec<Change>,
}

impl PnBlock {
    /// Parses a place-notation string.  `.` or whitespace separate changes;
    /// `-`, `x`, `X` is the cross; a leading `&` makes the block palindromic
    /// (all but the last change are mirrored); a leading `+` marks an
    /// explicitly asymmetric block; `,` separates blocks; `a..b` expands to
    /// the run of places from `a` to `b`.
    pub fn parse(s: &str, stage: Stage) -> Result<Self, PlaceNotationError> {
        let mut changes = Vec::new();
        for block in s.split(',') {
            Self::parse_block(block, stage, &mut changes)?;
        }
        if changes.is_empty() {
            return Err(PlaceNotationError::EmptyBlock);
        }
        Ok(PnBlock { changes })
    }

    fn parse_block(
        block: &str,
        stage: Stage,
        out: &mut Vec<Change>,
    ) -> Result<(), PlaceNotationError> {
        let mut chars = block.chars().peekable();
        let mut is_sym = false;
        // Skip leading whitespace, then an optional `&`/`+` prefix
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }
        match chars.peek() {
            Some('&') => {
                is_sym = true;
                chars.next();
            }
            Some('+') => {
                chars.next();
            }
            _ => {}
        }

        let block_start = out.len();
        let mut token = String::new();
        let mut flush =
            |token: &mut String, out: &mut Vec<Change>| -> Result<(), PlaceNotationError> {
                if !token.is_empty() {
                    out.push(Change::parse(token, stage)?);
                    token.clear();
                }
                Ok(())
            };
        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    // A second dot makes a `a..b` place range
                    if chars.peek() == Some(&'.') {
                        chars.next();
                        let from = token
                            .pop()
                            .and_then(Bell::from_name)
                            .ok_or(PlaceNotationError::MalformedRange)?;
                        let to = chars
                            .next()
                            .and_then(Bell::from_name)
                            .ok_or(PlaceNotationError::MalformedRange)?;
                        if to < from {
                            return Err(PlaceNotationError::MalformedRange);
                        }
                        for i in from.index()..=to.index() {
                            token.push(Bell::from_index(i).unwrap().name());
                        }
                    } else {
                        flush(&mut token, out)?;
                    }
                }
                c if c.is_whitespace() => flush(&mut token, out)?,
                '-' | 'x' | 'X' => {
                    flush(&mut token, out)?;
                    out.push(Change::cross(stage)?);
                }
                c if Bell::is_symbol(c) => token.push(c),
                c => return Err(PlaceNotationError::InvalidChar(c)),
            }
        }
        flush(&mut token, out)?;

        if out.len() == block_start {
            return Err(PlaceNotationError::EmptyBlock);
        }
        if is_sym {
            // Mirror all but the last change of the block
            for i in (block_start..out.len() - 1).rev() {
                out.push(out[i].clone());
            }
        }
        Ok(())
    }

    #[inline]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }

    /// Formats a sequence of changes, emitting `.` only between two adjacent
    /// non-cross changes.
    pub fn format(changes: &[Change]) -> String {
        let mut s = String::new();
        let mut last_was_places = false;
        for c in changes {
            if last_was_places && !c.is_cross() {
                s.push('.');
            }
            s.push_str(&c.to_string());
            last_was_places = !c.is_cross();
        }
        s
    }

    /// If the block is palindromic about its midpoint (with a separate
    /// lead-end change), formats it in the folded `&…,le` form.
    pub fn format_folded(&self) -> Option<String> {
        let l = self.changes.len();
        if l < 2 || l % 2 != 0 {
            return None;
        }
        let body = &self.changes[..l - 1];
        if !(0..body.len()).all(|i| body[i] == body[body.len() - 1 - i]) {
            return None;
        }
        Some(format!(
            "&{},{}",
            Self::format(&self.changes[..l / 2]),
            self.changes[l - 1]
        ))
    }
}

impl Display for PnBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Self::format(&self.changes))
    }
}

/* ===== ERRORS ===== */

/// The ways that place notation can fail to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceNotationError {
    EmptyChange,
    EmptyBlock,
    InvalidChar(char),
    PlaceOutOfStage(Bell, Stage),
    UnpairableGap(usize, usize),
    CrossOnOddStage(Stage),
    MalformedRange,
}

impl Display for PlaceNotationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaceNotationError::EmptyChange => write!(f, "empty change"),
            PlaceNotationError::EmptyBlock => write!(f, "empty place notation block"),
            PlaceNotationError::InvalidChar(c) => {
                write!(f, "'{}' is not valid in place notation", c)
            }
            PlaceNotationError::PlaceOutOfStage(b, stage) => {
                write!(f, "place '{}' is outside stage {}", b, stage)
            }
            PlaceNotationError::UnpairableGap(a, b) => write!(
                f,
                "invalid place notation: the bells between places {} and {} cannot pair up",
                Bell::from_index(*a).unwrap(),
                Bell::from_index(*b).unwrap()
            ),
            PlaceNotationError::CrossOnOddStage(stage) => {
                write!(f, "a cross is impossible on {} bells", stage)
            }
            PlaceNotationError::MalformedRange => write!(f, "malformed place range"),
        }
    }
}

impl std::error::Error for PlaceNotationError {}

/* ===== TESTS ===== */

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(s: &str, n: u8) -> Change {
        Change::parse(s, Stage::new(n)).unwrap()
    }

    #[test]
    fn implicit_places() {
        assert_eq!(ch("4", 8), ch("14", 8));
        assert_eq!(ch("1", 8), ch("18", 8));
        assert_eq!(ch("5", 5).places(), &[4]);
        assert_eq!(ch("3", 5).places(), &[2]);
        assert_eq!(ch("25", 8), ch("1258", 8));
        assert_eq!(ch("12", 8).places(), &[0, 1]);
        assert!(matches!(
            Change::parse("13", Stage::new(8)),
            Err(PlaceNotationError::UnpairableGap(0, 2))
        ));
        assert!(matches!(
            Change::parse("-", Stage::new(5)),
            Err(PlaceNotationError::CrossOnOddStage(_))
        ));
    }

    #[test]
    fn involution_and_parity() {
        for s in ["-", "12", "14", "58", "1"] {
            let c = ch(s, 8);
            let r = c.to_row();
            assert!((&r * &r).is_rounds(), "{} should be an involution", s);
            assert_eq!(c.parity(), r.parity());
        }
        assert_eq!(ch("-", 8).parity(), Parity::Even); // 4 pairs
        assert_eq!(ch("12", 8).parity(), Parity::Odd); // 3 pairs
    }

    #[test]
    fn swaps_and_places() {
        let c = ch("14", 8);
        assert_eq!(c.swaps(), vec![1, 4, 6]);
        assert!(c.finds_place(0) && c.finds_place(3));
        assert!(c.finds_swap(1) && !c.finds_swap(2));
        assert!(c.has_internal_places());
        assert!(!ch("18", 8).has_internal_places());
        assert_eq!(ch("1234", 8).longest_place_run(), 4);
        assert_eq!(ch("14", 8).longest_place_run(), 1);
    }

    #[test]
    fn reverse() {
        assert_eq!(ch("12", 8).reverse(), ch("78", 8));
        assert_eq!(ch("14", 8).reverse(), ch("58", 8));
        assert_eq!(ch("-", 8).reverse(), ch("-", 8));
    }

    #[test]
    fn parse_format_round_trip() {
        for s in ["-", "12", "14", "1", "58", "123456"] {
            let c = ch(s, 8);
            assert_eq!(Change::parse(&c.to_string(), c.stage()).unwrap(), c);
        }
    }

    #[test]
    fn changes_iterator_counts() {
        // Fibonacci: 1, 1, 2, 3, 5, 8, 13, 21, 34
        assert_eq!(ChangesIterator::all(Stage::MINOR).count(), 13);
        assert_eq!(ChangesIterator::all(Stage::MAJOR).count(), 34);
        // All changes within a window fix everything outside it
        for c in ChangesIterator::new(4, 2, Stage::MAJOR) {
            assert!(c.finds_place(0) && c.finds_place(1) && c.finds_place(6));
        }
    }

    #[test]
    fn pn_block_parsing() {
        // Plain Bob Minor
        let pb = PnBlock::parse("&x.16.x.16.x.16,12", Stage::MINOR).unwrap();
        assert_eq!(pb.len(), 12);
        assert_eq!(pb.changes()[0], ch("-", 6));
        assert_eq!(pb.changes()[1], ch("16", 6));
        assert_eq!(pb.changes()[10], ch("16", 6));
        assert_eq!(pb.changes()[11], ch("12", 6));
        assert_eq!(pb.format_folded().unwrap(), "&-16-16-16,12");

        // Separators are only needed between places
        let pb2 = PnBlock::parse("&x16x16x16,12", Stage::MINOR).unwrap();
        assert_eq!(pb, pb2);

        // Asymmetric block
        let orig = PnBlock::parse("+36.14.56.36.14.56", Stage::MINOR).unwrap();
        assert_eq!(orig.len(), 6);

        // Place ranges
        assert_eq!(
            PnBlock::parse("1..4", Stage::MINOR).unwrap().changes()[0],
            ch("1234", 6)
        );
    }

    #[test]
    fn cross_dot_formatting() {
        let changes = vec![ch("-", 6), ch("16", 6), ch("16", 6), ch("-", 6)];
        assert_eq!(PnBlock::format(&changes), "-16.16-");
    }
}
