//! Methods: an ordered sequence of [`Change`]s making up one lead.

use std::fmt::{Debug, Display, Formatter};

use crate::{Bell, Change, PlaceNotationError, PnBlock, Row, RowBuf, Stage};

/// The class of a method, following the treble's path through one lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// No hunt bell
    Principle,
    /// The treble plain hunts
    Plain,
    /// Treble-dodging, all cross sections external
    TrebleBob,
    /// Treble-dodging, all cross sections internal
    Surprise,
    /// Treble-dodging, mixed cross sections
    Delight,
    /// Any other treble path
    Alliance,
}

impl Class {
    pub fn name(self) -> &'static str {
        match self {
            Class::Principle => "principle",
            Class::Plain => "plain",
            Class::TrebleBob => "treble bob",
            Class::Surprise => "surprise",
            Class::Delight => "delight",
            Class::Alliance => "alliance",
        }
    }
}

/// A method: one lead's worth of [`Change`]s.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Method {
    stage: Stage,
    changes: Vec<Change>,
}

impl Method {
    pub fn new(stage: Stage, changes: Vec<Change>) -> Self {
        debug_assert!(changes.iter().all(|c| c.stage() == stage));
        Method { stage, changes }
    }

    /// Parses a method from place notation.
    pub fn parse(pn: &str, stage: Stage) -> Result<Self, PlaceNotationError> {
        Ok(Method {
            stage,
            changes: PnBlock::parse(pn, stage)?.into_changes(),
        })
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The lead length.
    #[inline]
    pub fn lead_len(&self) -> usize {
        self.changes.len()
    }

    #[inline]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// The lead-end change (the last change of the lead).
    pub fn lead_end_change(&self) -> &Change {
        self.changes.last().expect("methods are never empty")
    }

    /// The lead head: the product of all the changes in the lead.
    pub fn lead_head(&self) -> RowBuf {
        let mut r = RowBuf::rounds(self.stage);
        for c in &self.changes {
            c.permute(&mut r);
        }
        r
    }

    /// The half-lead head: the product of the first half of the lead.
    pub fn half_lead_head(&self) -> RowBuf {
        let mut r = RowBuf::rounds(self.stage);
        for c in &self.changes[..self.changes.len() / 2] {
            c.permute(&mut r);
        }
        r
    }

    /// The rows of one lead, starting from a given row.  The lead head row
    /// (equal to `start * lead_head()`) is *not* included.
    pub fn lead_rows_from(&self, start: &Row) -> Vec<RowBuf> {
        let mut rows = Vec::with_capacity(self.changes.len());
        let mut r = start.to_owned();
        for c in &self.changes {
            rows.push(r.clone());
            c.permute(&mut r);
        }
        rows
    }

    /// The rows of one lead starting from rounds.
    pub fn lead_rows(&self) -> Vec<RowBuf> {
        self.lead_rows_from(&RowBuf::rounds(self.stage))
    }

    /// The number of leads in a plain course (the order of the lead head).
    pub fn leads(&self) -> usize {
        self.lead_head().order()
    }

    /// Every row of the plain course, starting from rounds.  The course is
    /// `leads() * lead_len()` rows long.
    pub fn plain_course_rows(&self) -> Vec<RowBuf> {
        let mut rows = Vec::with_capacity(self.leads() * self.lead_len());
        let mut head = RowBuf::rounds(self.stage);
        loop {
            rows.extend(self.lead_rows_from(&head));
            let mut next = head.clone();
            for c in &self.changes {
                c.permute(&mut next);
            }
            head = next;
            if head.is_rounds() {
                return rows;
            }
        }
    }

    /// The bells whose orbit under the lead head is trivial.
    pub fn hunt_bells(&self) -> Vec<Bell> {
        let lh = self.lead_head();
        self.stage
            .bells()
            .filter(|b| lh[b.index()] == *b)
            .collect()
    }

    /// The treble's place in each row of the lead, including the lead head
    /// row (`lead_len() + 1` entries).
    pub fn treble_path(&self) -> Vec<usize> {
        let mut path = Vec::with_capacity(self.changes.len() + 1);
        let mut r = RowBuf::rounds(self.stage);
        path.push(0);
        for c in &self.changes {
            c.permute(&mut r);
            path.push(r.place_of(Bell::TREBLE).unwrap());
        }
        path
    }

    /* ===== SYMMETRY ===== */

    /// Palindromic symmetry about any point.
    pub fn has_palindromic_symmetry(&self) -> bool {
        let n = self.changes.len();
        let (pivots, half) = if n % 2 == 0 {
            (n / 2, n / 2)
        } else {
            (n, n / 2 + 1)
        };
        (0..pivots).any(|i| {
            (1..half).all(|j| self.changes[(i + j) % n] == self.changes[(i + n - j) % n])
        })
    }

    /// Every change is its own front-to-back mirror.
    pub fn has_mirror_symmetry(&self) -> bool {
        self.changes.iter().all(|c| *c == c.reverse())
    }

    /// The second half of the lead is the mirror of the first.
    pub fn has_glide_symmetry(&self) -> bool {
        let n = self.changes.len();
        if n % 2 == 1 {
            return false;
        }
        (0..n / 2).all(|i| self.changes[i] == self.changes[i + n / 2].reverse())
    }

    /// Rotational symmetry about a change or about a row.
    pub fn has_rotational_symmetry(&self) -> bool {
        let n = self.changes.len();
        // About a change
        for i in 0..n / 2 + 1 {
            if (0..n / 2 + 1)
                .all(|j| self.changes[(i + j) % n] == self.changes[(n + i - j) % n].reverse())
            {
                return true;
            }
        }
        // About a row
        for i in 0..n / 2 + 1 {
            if (0..n / 2)
                .all(|j| self.changes[(i + j + 1) % n] == self.changes[(n + i - j) % n].reverse())
            {
                return true;
            }
        }
        false
    }

    /// The symmetry signature, a subset of `"PMGR"`.
    pub fn symmetry_string(&self) -> String {
        let mut s = String::new();
        if self.has_palindromic_symmetry() {
            s.push('P');
        }
        if self.has_mirror_symmetry() {
            s.push('M');
        }
        if self.has_glide_symmetry() {
            s.push('G');
        }
        if self.has_rotational_symmetry() {
            s.push('R');
        }
        s
    }

    /* ===== CLASSIFICATION ===== */

    /// Classifies this method by its treble path.
    pub fn class(&self) -> Class {
        let path = self.treble_path();
        if *path.last().unwrap() != 0 {
            return Class::Principle;
        }
        let l = self.lead_len();
        // Count the treble's blows in each place
        let mut counts = vec![0usize; self.stage.num_bells()];
        for &p in &path[..l] {
            counts[p] += 1;
        }
        let per_place = counts[0];
        if counts.iter().any(|&c| c != per_place) || per_place % 2 != 0 || per_place == 0 {
            return Class::Alliance;
        }
        if per_place == 2 {
            return Class::Plain;
        }

        // Treble-dodging: look at the changes as the treble crosses between
        // dodging positions, excluding the half lead and lead end
        let mut internal = 0;
        let mut external = 0;
        for i in 0..l {
            if i == l / 2 - 1 || i == l - 1 {
                continue;
            }
            if path[i] / 2 != path[i + 1] / 2 {
                if self.changes[i].has_internal_places() {
                    internal += 1;
                } else {
                    external += 1;
                }
            }
        }
        match (internal, external) {
            (0, 0) => Class::Alliance,
            (0, _) => Class::TrebleBob,
            (_, 0) => Class::Surprise,
            _ => Class::Delight,
        }
    }

    /// Is the lead head a power of the plain-bob lead head for this method's
    /// hunt-bell count?
    pub fn is_regular(&self) -> bool {
        self.lead_head().is_pb_lead_head(self.hunt_bells().len())
    }

    /// The coursing order of the two heaviest working bells, written from
    /// the bell that courses the tenor.  Fails if the tenors are in
    /// different orbits of the lead head.
    pub fn coursing_order(&self) -> Option<String> {
        let n = self.stage.num_bells();
        let lh = self.lead_head();
        let mut b = n - 1;
        let mut i = 0;
        loop {
            b = lh[b].index();
            i += 1;
            if i > n {
                return None;
            }
            if b >= n - 2 {
                break;
            }
        }
        if b == n - 1 {
            return None; // the tenors are in different orbits
        }

        // cg = lh^i maps each bell to the one coursing it
        let mut cg = lh.clone();
        for _ in 1..i {
            cg = &cg * &lh;
        }
        let mut s = String::new();
        s.push(Bell::from_index(b).unwrap().name());
        loop {
            b = cg[b].index();
            s.push(Bell::from_index(b).unwrap().name());
            if b == n - 1 {
                return Some(s);
            }
        }
    }

    /// The traditional single-letter lead-end code used for minor and
    /// doubles methods, `"?"` where no code applies.
    pub fn old_lhcode(&self) -> &'static str {
        match self.stage.num_bells() {
            6 => self.old_lhcode_6(),
            5 => self.old_lhcode_5(),
            _ => "?",
        }
    }

    fn old_lhcode_6(&self) -> &'static str {
        let lh = self.lead_head().to_string();
        let back = self.lead_end_change();
        let seconds = back.places() == [0, 1];
        if !seconds && back.places() != [0] {
            if back.places() != [0, 3] {
                return "?";
            }
            return match lh.as_str() {
                "145362" => "X",
                "162534" => "Y",
                _ => "?",
            };
        }
        match lh.as_str() {
            "135264" => {
                if seconds {
                    "G"
                } else {
                    "L"
                }
            }
            "136245" => {
                if seconds {
                    "Q"
                } else {
                    "?"
                }
            }
            "134625" => {
                if seconds {
                    "?"
                } else {
                    "W"
                }
            }
            "142635" => {
                if seconds {
                    "K"
                } else {
                    "O"
                }
            }
            "142563" => {
                if seconds {
                    "P"
                } else {
                    "?"
                }
            }
            "146532" => {
                if seconds {
                    "?"
                } else {
                    "U"
                }
            }
            "156342" => {
                if seconds {
                    "H"
                } else {
                    "M"
                }
            }
            "154632" => {
                if seconds {
                    "S"
                } else {
                    "?"
                }
            }
            "152364" => {
                if seconds {
                    "?"
                } else {
                    "T"
                }
            }
            "164523" => {
                if seconds {
                    "J"
                } else {
                    "N"
                }
            }
            "165324" => {
                if seconds {
                    "R"
                } else {
                    "?"
                }
            }
            "165243" => {
                if seconds {
                    "?"
                } else {
                    "V"
                }
            }
            _ => "?",
        }
    }

    fn old_lhcode_5(&self) -> &'static str {
        let lh = self.lead_head().to_string();
        let places = self.lead_end_change().places();
        let (b1, b2, b3, b4) = (
            places == [0],
            places == [0, 1],
            places == [0, 1, 2],
            places == [0, 3],
        );
        if !b1 && !b2 && !b3 && !b4 {
            return "?";
        }
        match lh.as_str() {
            "12534" if b2 => "G",
            "12534" if b3 => "T",
            "12453" if b2 => "K",
            "12453" if b3 => "S",
            "13524" if b2 => "A",
            "13524" if b1 => "C",
            "13542" if b4 => "Z",
            "13425" if b2 => "H",
            "13425" if b4 => "X",
            "13452" if b1 => "F",
            "14253" if b2 => "B",
            "14253" if b1 => "D",
            "14235" if b2 => "J",
            "14235" if b4 => "W",
            "14352" if b3 => "U",
            "14532" if b3 => "R",
            "14532" if b4 => "N",
            "15234" if b1 => "E",
            "15243" if b4 => "Y",
            "15423" if b3 => "Q",
            "15423" if b4 => "M",
            "15324" if b3 => "V",
            _ => "?",
        }
    }

    /// The place notation of this method, in compact form.
    pub fn format_pn(&self) -> String {
        PnBlock::format(&self.changes)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format_pn())
    }
}

impl Debug for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Method({}, {})", self.stage, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_bob_minor() -> Method {
        Method::parse("&x16x16x16,12", Stage::MINOR).unwrap()
    }

    fn cambridge_minor() -> Method {
        Method::parse("&x3x4x2x3x4x5,2", Stage::MINOR).unwrap()
    }

    #[test]
    fn lead_heads() {
        let pb = plain_bob_minor();
        assert_eq!(pb.lead_len(), 12);
        assert_eq!(pb.lead_head().to_string(), "135264");
        assert_eq!(pb.leads(), 5);
        assert!(pb.is_regular());
        assert_eq!(pb.hunt_bells(), vec![Bell::TREBLE]);

        let cam = cambridge_minor();
        assert_eq!(cam.lead_len(), 24);
        assert_eq!(cam.lead_head().to_string(), "156342");
        assert!(cam.is_regular());
    }

    #[test]
    fn plain_course() {
        let pb = plain_bob_minor();
        let rows = pb.plain_course_rows();
        assert_eq!(rows.len(), 60);
        // A plain course is true
        let mut sorted = rows.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 60);
    }

    #[test]
    fn course_multiset_matches_lead_translates() {
        // The plain course is the union of the lead translated by lh^k
        let m = cambridge_minor();
        let lh = m.lead_head();
        let mut expected: Vec<RowBuf> = Vec::new();
        let mut head = RowBuf::rounds(m.stage());
        for _ in 0..m.leads() {
            expected.extend(m.lead_rows_from(&head));
            head = &head * &lh;
        }
        let mut actual = m.plain_course_rows();
        expected.sort();
        actual.sort();
        assert_eq!(expected, actual);
    }

    #[test]
    fn symmetry() {
        assert_eq!(plain_bob_minor().symmetry_string(), "P");
        assert_eq!(cambridge_minor().symmetry_string(), "P");
        // Original: every change the same, so fully symmetric
        let original = Method::parse("+x.16", Stage::MINOR).unwrap();
        assert!(original.has_palindromic_symmetry());
        assert!(original.has_rotational_symmetry());
    }

    #[test]
    fn classification() {
        assert_eq!(plain_bob_minor().class(), Class::Plain);
        assert_eq!(cambridge_minor().class(), Class::Surprise);
        // Kent Treble Bob Minor
        let kent = Method::parse("&34x34.16x12x16x12x16,16", Stage::MINOR).unwrap();
        assert_eq!(kent.class(), Class::TrebleBob);
        // Kent with one internal cross section becomes a delight block
        let delight = Method::parse("&34x34.16x12x36x12x16,16", Stage::MINOR).unwrap();
        assert_eq!(delight.class(), Class::Delight);
        // A principle has no fixed treble
        let original = Method::parse("+x.16", Stage::MINOR).unwrap();
        assert_eq!(original.class(), Class::Principle);
    }

    #[test]
    fn old_lhcodes() {
        assert_eq!(plain_bob_minor().old_lhcode(), "G");
        assert_eq!(cambridge_minor().old_lhcode(), "H");
    }

    #[test]
    fn coursing_orders() {
        let pb_major = Method::parse("&x18x18x18x18,12", Stage::MAJOR).unwrap();
        assert_eq!(pb_major.lead_head().to_string(), "13527486");
        assert_eq!(pb_major.coursing_order().unwrap(), "7532468");
    }
}
