//! Falseness tables: the transpositions under which two leads (or courses)
//! share a row.

use std::collections::HashMap;
use std::sync::OnceLock;

use itertools::Itertools;

use crate::{Bell, Method, Parity, Row, RowBuf, Stage};

/// Filters for a [`FalseLeadTable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeadFalseness {
    /// Keep only even-parity false lead heads
    pub in_course_only: bool,
    /// Compare every pair of rows, not just those with the treble in the
    /// same position (for principles)
    pub no_fixed_treble: bool,
    /// Only consider the first half of each lead
    pub half_lead_only: bool,
}

/// The set of false lead heads between two methods: every `f` such that the
/// leads of `m1` and `f * lead(m2)` share a row.  Sorted and deduplicated;
/// contains rounds whenever the methods share a row at the same treble
/// position (always, for a method against itself).
#[derive(Debug, Clone)]
pub struct FalseLeadTable {
    rows: Vec<RowBuf>,
}

impl FalseLeadTable {
    pub fn from_methods(m1: &Method, m2: &Method, flags: LeadFalseness) -> Self {
        assert_eq!(m1.stage(), m2.stage());
        let take = |m: &Method| {
            let mut rows = m.lead_rows();
            if flags.half_lead_only {
                rows.truncate(m.lead_len() / 2);
            }
            rows
        };
        Self::from_row_sets(&take(m1), &take(m2), flags.in_course_only, flags.no_fixed_treble)
    }

    /// The self-falseness of a single method.
    pub fn new(m: &Method, flags: LeadFalseness) -> Self {
        Self::from_methods(m, m, flags)
    }

    fn from_row_sets(
        rows1: &[RowBuf],
        rows2: &[RowBuf],
        in_course_only: bool,
        no_fixed_treble: bool,
    ) -> Self {
        let mut false_heads = Vec::new();
        for a in rows1 {
            for b in rows2 {
                if !no_fixed_treble
                    && a.place_of(Bell::TREBLE) != b.place_of(Bell::TREBLE)
                {
                    continue;
                }
                let f = a.as_row() * &b.inv();
                if in_course_only && f.parity() == Parity::Odd {
                    continue;
                }
                false_heads.push(f);
            }
        }
        false_heads.sort();
        false_heads.dedup();
        FalseLeadTable { rows: false_heads }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> + Clone {
        self.rows.iter().map(|r| r.as_row())
    }

    pub fn contains(&self, r: &Row) -> bool {
        self.rows.binary_search_by(|probe| probe.as_row().cmp(r)).is_ok()
    }
}

/// Filters for a [`FalseCourseTable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CourseFalseness {
    pub in_course_only: bool,
    /// Keep only course heads which fix the two heaviest bells
    pub tenors_together: bool,
}

/// The set of false course heads of a method: every course head `c` (treble
/// fixed at lead) such that the plain course and `c * course` share a row.
/// Contains rounds.
#[derive(Debug, Clone)]
pub struct FalseCourseTable {
    rows: Vec<RowBuf>,
}

impl FalseCourseTable {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn new(m: &Method, flags: CourseFalseness) -> Self {
        let n = m.stage().num_bells();
        let lead_heads = lead_head_group(m);

        // Any collision between two courses reduces to a collision between
        // two leads, composed with lead heads on both sides.  So the false
        // course heads are the double cosets <lh>.f.<lh> of the false lead
        // heads, each reported by its least tenors-home representative.
        let lead_falseness = FalseLeadTable::new(m, LeadFalseness::default());

        let mut heads = Vec::new();
        let mut seen: std::collections::HashSet<RowBuf> = std::collections::HashSet::new();
        for f in lead_falseness.iter() {
            if seen.contains(f) {
                continue;
            }
            let mut orbit: Vec<RowBuf> = lead_heads
                .iter()
                .cartesian_product(lead_heads.iter())
                .map(|(i, j)| &(i.as_row() * f) * j.as_row())
                .collect();
            orbit.sort();
            orbit.dedup();
            seen.extend(orbit.iter().cloned());

            let rep = orbit.iter().find(|r| {
                if flags.tenors_together {
                    r.fixes_tail(n - 2)
                } else {
                    r[n - 1].index() == n - 1
                }
            });
            let Some(rep) = rep else {
                continue; // no representative passes the filter
            };
            if flags.in_course_only && rep.parity() == Parity::Odd {
                continue;
            }
            heads.push(rep.clone());
        }
        heads.sort();
        heads.dedup();
        FalseCourseTable { rows: heads }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> + Clone {
        self.rows.iter().map(|r| r.as_row())
    }

    pub fn contains(&self, r: &Row) -> bool {
        self.rows.binary_search_by(|probe| probe.as_row().cmp(r)).is_ok()
    }

    /// The group-code letters of this table's non-trivial members, sorted
    /// and deduplicated.  Only meaningful on eight bells.
    pub fn symbols(&self) -> String {
        let Some(classification) = FchClassification::for_stage(self.rows[0].stage()) else {
            return String::new();
        };
        let mut symbols: Vec<char> = self
            .rows
            .iter()
            .filter(|r| !r.is_rounds())
            .filter_map(|r| classification.symbol_of_orbit(r))
            .collect();
        symbols.sort_unstable();
        symbols.dedup();
        symbols.into_iter().collect()
    }
}

/// The cyclic group generated by a method's lead head, rounds first.
fn lead_head_group(m: &Method) -> Vec<RowBuf> {
    let lh = m.lead_head();
    let mut lhs = vec![RowBuf::rounds(m.stage())];
    let mut r = lh.clone();
    while !r.is_rounds() {
        lhs.push(r.clone());
        r = &r * &lh;
    }
    lhs
}

///////////////////////////////
// FALSE COURSE HEAD CLASSES //
///////////////////////////////

/// The classification of tenors-together false course heads into named
/// groups.  Two course heads belong to the same group when they are related
/// by inversion or by pre-/post-composition with plain-bob lead heads; the
/// groups are lettered in lexicographic order of their least member, capital
/// letters for the in-course groups (`A` is always the trivial group of
/// rounds) and lower-case letters for the out-of-course groups.
pub struct FchClassification {
    stage: Stage,
    lead_heads: Vec<RowBuf>,
    symbols: HashMap<RowBuf, char>,
}

impl FchClassification {
    /// The classification for Major.  Other stages are not classified.
    pub fn for_stage(stage: Stage) -> Option<&'static FchClassification> {
        static MAJOR: OnceLock<FchClassification> = OnceLock::new();
        (stage == Stage::MAJOR).then(|| MAJOR.get_or_init(|| Self::build(Stage::MAJOR)))
    }

    fn build(stage: Stage) -> Self {
        let n = stage.num_bells();
        let pblh = RowBuf::pb_lead_head(stage, 1);
        let lead_heads: Vec<RowBuf> = {
            let mut lhs = vec![RowBuf::rounds(stage)];
            let mut r = pblh.clone();
            while !r.is_rounds() {
                lhs.push(r.clone());
                r = &r * &pblh;
            }
            lhs
        };

        // All tenors-together course heads: the treble and the two tenors
        // fixed, everything else free
        let tt_rows: Vec<RowBuf> = crate::ExtentIterator::new(n - 3, 1, stage)
            .filter(|r| r.fixes_tail(n - 2))
            .collect();

        // Flood-fill the equivalence classes
        let mut class_of: HashMap<RowBuf, usize> = HashMap::new();
        let mut classes: Vec<Vec<RowBuf>> = Vec::new();
        for seed in &tt_rows {
            if class_of.contains_key(seed) {
                continue;
            }
            let id = classes.len();
            let mut members = Vec::new();
            let mut stack = vec![seed.clone()];
            while let Some(f) = stack.pop() {
                if class_of.contains_key(&f) {
                    continue;
                }
                class_of.insert(f.clone(), id);
                stack.push(f.inv());
                for i in &lead_heads {
                    for j in &lead_heads {
                        let t = &(i * &f) * j;
                        if t.fixes_tail(n - 2) && !class_of.contains_key(&t) {
                            stack.push(t);
                        }
                    }
                }
                members.push(f);
            }
            members.sort();
            classes.push(members);
        }

        // Letter the classes: capitals for in-course, lower case for
        // out-of-course, each in order of least member
        classes.sort_by(|a, b| a[0].cmp(&b[0]));
        let mut symbols = HashMap::new();
        let mut next_even = b'A';
        let mut next_odd = b'a';
        for class in &classes {
            let letter = if class[0].parity() == Parity::Even {
                let l = next_even as char;
                next_even += 1;
                l
            } else {
                let l = next_odd as char;
                next_odd += 1;
                l
            };
            for member in class {
                symbols.insert(member.clone(), letter);
            }
        }

        FchClassification {
            stage,
            lead_heads,
            symbols,
        }
    }

    /// The group letter of a course head which fixes the tenors.
    pub fn symbol(&self, r: &Row) -> Option<char> {
        self.symbols.get(r).copied()
    }

    /// The group letter of any false head fixing the treble: the letter of
    /// the tenors-together members of its orbit, if any.
    pub fn symbol_of_orbit(&self, r: &Row) -> Option<char> {
        let n = self.stage.num_bells();
        if r[0] != Bell::TREBLE {
            return None;
        }
        for i in &self.lead_heads {
            for j in &self.lead_heads {
                let t = &(i * r) * j;
                if t.fixes_tail(n - 2) {
                    if let Some(sym) = self.symbol(&t) {
                        return Some(sym);
                    }
                }
            }
        }
        None
    }
}

/// Closes a set of rows under composition (and hence, the set being finite,
/// under inverses) into a [`crate::Group`].
pub fn generate_group(rows: impl IntoIterator<Item = RowBuf>) -> crate::Group {
    crate::Group::closure(rows).expect("falseness tables are single-stage")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stage;

    fn plain_bob_minor() -> Method {
        Method::parse("&x16x16x16,12", Stage::MINOR).unwrap()
    }

    fn cambridge_minor() -> Method {
        Method::parse("&x3x4x2x3x4x5,2", Stage::MINOR).unwrap()
    }

    #[test]
    fn self_falseness_contains_rounds_and_inverses() {
        let ft = FalseLeadTable::new(&cambridge_minor(), LeadFalseness::default());
        assert!(ft.contains(&RowBuf::rounds(Stage::MINOR)));
        for f in ft.iter() {
            assert!(ft.contains(&f.inv()), "{} missing inverse", f);
        }
    }

    #[test]
    fn plain_bob_lead_falseness() {
        // Plain hunting is so symmetric that every same-treble-position
        // pair of distinct rows gives the same false lead head
        let ft = FalseLeadTable::new(&plain_bob_minor(), LeadFalseness::default());
        assert_eq!(ft.len(), 2);
        assert!(ft.contains(&RowBuf::parse("132546").unwrap()));
    }

    #[test]
    fn in_course_filter() {
        let all = FalseLeadTable::new(&cambridge_minor(), LeadFalseness::default());
        let in_course = FalseLeadTable::new(
            &cambridge_minor(),
            LeadFalseness {
                in_course_only: true,
                ..Default::default()
            },
        );
        assert!(in_course.len() <= all.len());
        assert!(in_course.iter().all(|f| f.parity() == Parity::Even));
    }

    #[test]
    fn false_course_heads_are_canonical() {
        let fchs = FalseCourseTable::new(&cambridge_minor(), CourseFalseness::default());
        assert!(fchs.len() > 1);
        let n = Stage::MINOR.num_bells();
        for c in fchs.iter() {
            assert_eq!(c[0], Bell::TREBLE);
            assert_eq!(c[n - 1].index(), n - 1);
        }
    }

    #[test]
    fn plain_bob_course_classes() {
        // Plain Bob Minor has exactly one non-trivial falseness class
        let fchs = FalseCourseTable::new(&plain_bob_minor(), CourseFalseness::default());
        assert_eq!(fchs.len(), 2);
    }

    #[test]
    fn classification_is_consistent() {
        let cls = FchClassification::for_stage(Stage::MAJOR).unwrap();
        // Rounds is always in the trivial group 'A'
        assert_eq!(cls.symbol(&RowBuf::rounds(Stage::MAJOR)), Some('A'));
        // Group letters respect inverses and lead-head composition
        let f = RowBuf::parse("13254678").unwrap();
        let sym = cls.symbol(&f).unwrap();
        assert_eq!(cls.symbol(&f.inv()), Some(sym));
        assert!(sym.is_ascii_uppercase());
        // An out-of-course head gets a lower-case letter
        let g = RowBuf::parse("12354678").unwrap();
        assert!(cls.symbol(&g).unwrap().is_ascii_lowercase());
    }

    #[test]
    fn bristol_is_cps_style_clean() {
        // Bristol Surprise Major is famously clean: its tenors-together
        // in-course falseness is just the trivial group
        let bristol =
            Method::parse("&x58x14.58x58.36.14x14.58x14x18,18", Stage::MAJOR).unwrap();
        assert_eq!(bristol.lead_head().to_string(), "18674523");
        let fchs = FalseCourseTable::new(
            &bristol,
            CourseFalseness {
                in_course_only: true,
                tenors_together: true,
            },
        );
        assert_eq!(fchs.len(), 1);
        assert_eq!(fchs.symbols(), "");
    }
}
