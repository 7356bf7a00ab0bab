//! The search parameters: one plain context struct passed to every
//! subsystem.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use rowframe::{Change, Group, Pattern, RowBuf, Stage};

use crate::expression::Expression;

/// The method class a search requires at the treble's cross sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassReq {
    /// Every cross section external
    TrebleBob,
    /// Every cross section internal
    Surprise,
    /// Mixed cross sections
    Delight,
    /// Exactly one external cross section
    StrictDelight,
    /// At least two external cross sections
    Exercise,
    /// Exactly two external cross sections
    StrictExercise,
    /// Exactly three external cross sections
    PasAllaTria,
    /// Exactly four external cross sections
    PasAllaTessera,
    /// Third-section delight: the section below the half lead is internal
    Delight3,
    /// Fourth-section delight
    Delight4,
}

/// What kind of lead head a completed method must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeadHeadKind {
    /// A power of the plain-bob lead head for the search's hunt count
    PlainBob,
    /// A cyclic rotation of the working bells
    Cyclic,
    /// Cyclic at the snap start rather than the lead head
    OffsetCyclic,
    /// A power of the plain-bob lead head for *any* hunt count
    AnyRegular,
    #[default]
    Any,
}

/// How the searcher consumes its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// Generate methods from the mask
    #[default]
    Search,
    /// Read methods from input and emit those the constraints accept
    Filter,
    /// Read methods from input and emit those the constraints reject
    InvertFilter,
}

/// Everything a [`Searcher`](crate::Searcher) needs to know.  Defaults are
/// the loosest settings; a CLI layer fills this in from flags.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub stage: Stage,
    /// Lead length; derived from the treble path for hunt methods when zero
    pub lead_len: usize,
    /// Number of hunt bells (zero searches for principles)
    pub hunt_bells: usize,
    /// Dodges the treble makes in each position
    pub treble_dodges: usize,
    /// First place of the treble's path, 1-indexed
    pub treble_front: usize,
    /// Last place of the treble's path, 1-indexed; zero means the back
    pub treble_back: usize,

    /* Symmetry requirements */
    pub sym: bool,
    pub skewsym: bool,
    pub doubsym: bool,
    pub mirrorsym: bool,

    /* Structural constraints */
    pub class: Option<ClassReq>,
    pub right_place: bool,
    pub no_78_pns: bool,
    pub max_consec_blows: usize,
    pub max_places_per_change: usize,
    pub max_consec_places: usize,
    pub sym_sects: bool,
    pub same_place_parity: bool,
    pub require_limited_le: bool,
    pub prefer_limited_le: bool,

    /* The mask */
    pub mask: String,
    /// `--changes`: `(include, set)` keeps exactly (or everything but) `set`
    pub changes_filter: Option<(bool, HashSet<Change>)>,

    /* Lead head requirements */
    pub lead_head_kind: LeadHeadKind,
    /// Permit methods whose non-hunt cycles are shorter than a full orbit
    pub show_all_meths: bool,
    pub require_offset_cyclic: bool,

    /* Half-lead requirements */
    pub require_cyclic_hlh: bool,
    pub require_cyclic_hle: bool,
    pub require_rev_cyclic_hlh: bool,
    pub require_rev_cyclic_hle: bool,
    pub require_reg_hls: bool,

    /* Truth requirements */
    /// Reject a change repeated back-to-back (also rejects making all
    /// places); on by default
    pub true_trivial: bool,
    pub true_lead: bool,
    pub true_half_lead: bool,
    pub true_course: bool,
    pub true_extent: bool,
    pub true_positive_extent: bool,
    pub require_cps: bool,
    /// Accepted falseness-group letters, with `-` ranges already expanded
    pub allowed_falseness: Option<String>,

    /* Part ends and row constraints */
    pub part_ends: Group,
    pub start_row: RowBuf,
    pub avoid_rows: HashSet<RowBuf>,
    /// Per-position patterns the row at that point must match
    pub row_matches: Vec<Option<Pattern>>,

    /* Search order and limits */
    pub start_at: Vec<Change>,
    pub prefix: Vec<Change>,
    pub search_limit: Option<u64>,
    pub timeout: Option<Duration>,
    pub random_order: bool,
    pub seed: u64,

    /* Scoring and predicates */
    pub music_patterns: Vec<String>,
    pub require_exprs: Vec<Expression>,

    pub filter_mode: FilterMode,
}

impl SearchParams {
    pub fn new(stage: Stage) -> Self {
        SearchParams {
            stage,
            lead_len: 0,
            hunt_bells: 1,
            treble_dodges: 0,
            treble_front: 1,
            treble_back: 0,
            sym: false,
            skewsym: false,
            doubsym: false,
            mirrorsym: false,
            class: None,
            right_place: false,
            no_78_pns: false,
            max_consec_blows: 0,
            max_places_per_change: 0,
            max_consec_places: 0,
            sym_sects: false,
            same_place_parity: false,
            require_limited_le: false,
            prefer_limited_le: false,
            mask: "*".to_owned(),
            changes_filter: None,
            lead_head_kind: LeadHeadKind::Any,
            show_all_meths: false,
            require_offset_cyclic: false,
            require_cyclic_hlh: false,
            require_cyclic_hle: false,
            require_rev_cyclic_hlh: false,
            require_rev_cyclic_hle: false,
            require_reg_hls: false,
            true_trivial: true,
            true_lead: false,
            true_half_lead: false,
            true_course: false,
            true_extent: false,
            true_positive_extent: false,
            require_cps: false,
            allowed_falseness: None,
            part_ends: Group::trivial(stage),
            start_row: RowBuf::rounds(stage),
            avoid_rows: HashSet::new(),
            row_matches: Vec::new(),
            start_at: Vec::new(),
            prefix: Vec::new(),
            search_limit: None,
            timeout: None,
            random_order: false,
            seed: 0,
            music_patterns: Vec::new(),
            require_exprs: Vec::new(),
            filter_mode: FilterMode::Search,
        }
    }

    /// The part-end group.
    #[inline]
    pub fn pends(&self) -> &Group {
        &self.part_ends
    }

    /// The last place of the treble's path, 1-indexed.
    pub fn treble_back(&self) -> usize {
        if self.treble_back == 0 {
            self.stage.num_bells()
        } else {
            self.treble_back
        }
    }

    /// How long the treble stays in each dodging position.
    pub fn div_len(&self) -> usize {
        (1 + self.treble_dodges) * 2
    }

    /// Fills in the lead length and checks the parameters for consistency.
    pub fn validate(&mut self) -> Result<(), ParamError> {
        let n = self.stage.num_bells();
        if self.hunt_bells > n {
            return Err(ParamError::TooManyHunts);
        }
        if self.treble_front < 1 || self.treble_back() > n || self.treble_front >= self.treble_back()
        {
            if self.hunt_bells > 0 {
                return Err(ParamError::BadTreblePath);
            }
        }
        if self.hunt_bells > 0 {
            let derived =
                (1 + self.treble_dodges) * (self.treble_back() - self.treble_front + 1) * 2;
            if self.lead_len == 0 {
                self.lead_len = derived;
            } else if self.lead_len != derived && self.filter_mode == FilterMode::Search {
                return Err(ParamError::LeadLenMismatch {
                    given: self.lead_len,
                    derived,
                });
            }
        } else if self.lead_len == 0 && self.filter_mode == FilterMode::Search {
            return Err(ParamError::PrincipleNeedsLeadLen);
        }
        if self.true_course {
            self.true_lead = true;
        }
        if self.true_extent || self.true_positive_extent {
            self.true_lead = true;
        }
        // Any two of the three symmetries imply the third
        let sym_count = [self.sym, self.skewsym, self.doubsym]
            .iter()
            .filter(|b| **b)
            .count();
        if sym_count >= 2 {
            self.sym = true;
            self.skewsym = true;
            self.doubsym = true;
        }
        Ok(())
    }

    /// The offset of the palindromic symmetry point in the treble's path:
    /// zero for an odd hunt count, half a division otherwise.
    pub fn sym_offset(&self) -> usize {
        if self.hunt_bells != 0 && self.hunt_bells % 2 == 0 {
            1 + self.treble_dodges
        } else {
            0
        }
    }
}

/// The ways the parameters can be inconsistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    TooManyHunts,
    BadTreblePath,
    LeadLenMismatch { given: usize, derived: usize },
    PrincipleNeedsLeadLen,
}

impl Display for ParamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamError::TooManyHunts => write!(f, "more hunt bells than bells"),
            ParamError::BadTreblePath => write!(f, "invalid treble path range"),
            ParamError::LeadLenMismatch { given, derived } => write!(
                f,
                "lead length {} conflicts with the treble path (expected {})",
                given, derived
            ),
            ParamError::PrincipleNeedsLeadLen => {
                write!(f, "searching for principles requires a lead length")
            }
        }
    }
}

impl std::error::Error for ParamError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lead_len_derivation() {
        let mut p = SearchParams::new(Stage::MAJOR);
        p.treble_dodges = 1;
        p.validate().unwrap();
        assert_eq!(p.lead_len, 32); // treble-dodging major

        let mut p = SearchParams::new(Stage::MINOR);
        p.validate().unwrap();
        assert_eq!(p.lead_len, 12); // plain minor

        let mut p = SearchParams::new(Stage::MINOR);
        p.hunt_bells = 0;
        assert_eq!(p.validate(), Err(ParamError::PrincipleNeedsLeadLen));
    }

    #[test]
    fn sym_offset() {
        let mut p = SearchParams::new(Stage::MINOR);
        p.hunt_bells = 2;
        p.treble_dodges = 0;
        assert_eq!(p.sym_offset(), 1);
        p.hunt_bells = 1;
        assert_eq!(p.sym_offset(), 0);
    }
}
