//! The depth-first search over per-position change alternatives, with
//! symmetry folding, structural vetoes and falseness pruning.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use rowframe::falseness::FchClassification;
use rowframe::{
    Change, LiteLibrary, Method, Prover, Row, RowBuf, Stage,
};

use crate::divisions::{division_bad_parity_hack, is_division_false, is_too_many_places};
use crate::mask::{compile_mask, MaskError};
use crate::params::{ClassReq, FilterMode, LeadHeadKind, SearchParams};
use crate::properties::MethodProperties;

const NODES_BETWEEN_ABORT_CHECKS: u64 = 0x3ff;

/// Why a search stopped before exhausting the space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSignal {
    LimitReached,
    Timeout,
    Aborted,
}

/// The result of a completed (or interrupted) search.
#[derive(Debug, Clone, Copy)]
pub struct SearchOutcome {
    /// Methods found (or, when filtering, input methods passed through)
    pub search_count: u64,
    /// Search-tree nodes visited
    pub node_count: u64,
    /// `None` if the space was exhausted
    pub signal: Option<SearchSignal>,
}

/// Errors detected before the search starts.
#[derive(Debug)]
pub enum SearchError {
    Mask(MaskError),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchError::Mask(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SearchError {}

type Step = Result<(), SearchSignal>;

/// A sink receiving each accepted method as it is found.
pub type Emit<'e> = &'e mut dyn FnMut(&MethodProperties) -> Step;

pub struct Searcher<'a> {
    params: &'a SearchParams,
    stage: Stage,
    bells: usize,
    lead_len: usize,
    div_len: usize,
    sym_offset: usize,
    /// Principles check their symmetry after completion, not by folding
    floating_sym: bool,
    offset_cyclic: bool,
    /// When the lead length was unknown at compile time, `alt` holds one
    /// list per stroke instead of one per position
    two_row_alt: bool,
    alt: Vec<Vec<Change>>,

    /* Mutable search state */
    m: Vec<Change>,
    div_start: usize,
    cur_div_len: usize,
    maintain_r: bool,
    r: RowBuf,
    prover: Option<Prover>,
    start_at: Vec<Change>,
    filter_method: Option<Method>,
    filter_payload: String,

    rng: Option<ChaCha8Rng>,
    abort_flag: Option<Arc<AtomicBool>>,
    started: Instant,
    search_count: u64,
    node_count: u64,
}

impl<'a> Searcher<'a> {
    pub fn new(params: &'a SearchParams) -> Result<Self, SearchError> {
        let alt = compile_mask(params).map_err(SearchError::Mask)?;
        let floating_sym =
            params.hunt_bells == 0 && (params.sym || params.skewsym || params.doubsym);
        let mut searcher = Searcher {
            params,
            stage: params.stage,
            bells: params.stage.num_bells(),
            lead_len: params.lead_len,
            div_len: params.div_len(),
            sym_offset: params.sym_offset(),
            floating_sym,
            offset_cyclic: params.require_offset_cyclic
                || params.lead_head_kind == LeadHeadKind::OffsetCyclic,
            two_row_alt: params.lead_len == 0,
            alt,
            m: Vec::new(),
            div_start: 0,
            cur_div_len: params.div_len(),
            maintain_r: false,
            r: RowBuf::rounds(params.stage),
            prover: None,
            start_at: Vec::new(),
            filter_method: None,
            filter_payload: String::new(),
            rng: params
                .random_order
                .then(|| ChaCha8Rng::seed_from_u64(params.seed)),
            abort_flag: None,
            started: Instant::now(),
            search_count: 0,
            node_count: 0,
        };
        searcher.reset();
        Ok(searcher)
    }

    /// Installs a flag which, once set (e.g. from a signal handler), stops
    /// the search at the next node.
    pub fn set_abort_flag(&mut self, flag: Arc<AtomicBool>) {
        self.abort_flag = Some(flag);
    }

    fn reset(&mut self) {
        self.m.clear();
        self.div_start = 0;
        self.cur_div_len = self.div_len;
        self.r = self.params.pends().rcoset_label(&self.params.start_row);
        self.maintain_r =
            !self.params.avoid_rows.is_empty() || !self.params.row_matches.is_empty();

        let p = self.params;
        let wants_prover = (p.true_lead
            && (!p.sym || (p.treble_dodges > 0 && !p.same_place_parity)))
            || (p.true_half_lead
                && (p.pends().len() > 1 || p.hunt_bells == 0 || p.treble_dodges > 1));
        self.prover = None;
        if wants_prover {
            let mut prover = Prover::new(1);
            for row in &p.avoid_rows {
                prover.add_row(row);
            }
            prover.add_row(&self.r);
            debug_assert!(prover.is_true());
            self.prover = Some(prover);
            self.maintain_r = true;
        }

        self.start_at = p.start_at.iter().rev().cloned().collect();
        self.started = Instant::now();
    }

    /// Runs a generating search over the mask.
    pub fn run(&mut self, emit: Emit) -> SearchOutcome {
        let signal = self.general_recurse(emit).err();
        debug_assert!(self.m.is_empty() || signal.is_some());
        self.m.clear();
        SearchOutcome {
            search_count: self.search_count,
            node_count: self.node_count,
            signal,
        }
    }

    /// Runs in filter mode: every library entry that completes the search
    /// (or fails to, with [`FilterMode::InvertFilter`]) is emitted.
    pub fn filter(&mut self, lib: &LiteLibrary, emit: Emit) -> SearchOutcome {
        let mut signal = None;
        for entry in lib.entries() {
            let method = match entry.method(self.stage) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!(
                        "error reading method from input line {}: {} (place notation '{}')",
                        entry.line,
                        e,
                        entry.place_notation
                    );
                    continue;
                }
            };
            if self.params.lead_len == 0 {
                self.lead_len = method.lead_len();
            }
            self.filter_payload = entry.payload.clone();
            self.filter_method = Some(method);

            let old_search_count = self.search_count;
            let result = self.general_recurse(emit);
            debug_assert!(self.m.is_empty() || result.is_err());
            self.m.clear();
            self.div_start = 0;
            self.cur_div_len = self.div_len;

            if self.params.filter_mode == FilterMode::InvertFilter && result.is_ok() {
                debug_assert!(self.search_count <= old_search_count + 1);
                if self.search_count == old_search_count {
                    self.search_count += 1;
                    if let Err(sig) = self.output_method(emit) {
                        signal = Some(sig);
                        break;
                    }
                } else {
                    self.search_count -= 1;
                }
            }
            if let Err(sig) = result {
                signal = Some(sig);
                break;
            }
        }
        self.filter_method = None;
        SearchOutcome {
            search_count: self.search_count,
            node_count: self.node_count,
            signal,
        }
    }

    /* ===== bookkeeping ===== */

    fn do_status(&mut self) -> Step {
        self.node_count += 1;
        if self.node_count & NODES_BETWEEN_ABORT_CHECKS == 0 {
            if let Some(timeout) = self.params.timeout {
                if self.started.elapsed() > timeout {
                    return Err(SearchSignal::Timeout);
                }
            }
            if let Some(flag) = &self.abort_flag {
                if flag.load(Ordering::Relaxed) {
                    return Err(SearchSignal::Aborted);
                }
            }
        }
        Ok(())
    }

    fn alt_index(&self, depth: usize) -> usize {
        if self.two_row_alt {
            depth % 2
        } else {
            depth
        }
    }

    /* ===== pushing and popping changes ===== */

    fn push_change(&mut self, ch: Change) -> bool {
        self.m.push(ch);
        let depth = self.m.len();
        let mut ok = true;
        if self.maintain_r {
            let ch = self.m.last().unwrap();
            self.r = self.params.pends().rcoset_label(&(&self.r * ch));
            let skip_proof = depth == self.lead_len
                || (!self.params.true_lead
                    && self.params.true_half_lead
                    && depth >= self.lead_len / 2);
            if !skip_proof {
                if let Some(prover) = &mut self.prover {
                    if !prover.add_row(&self.r).is_true() {
                        ok = false;
                    }
                } else if self.params.avoid_rows.contains(&self.r) {
                    ok = false;
                }
            }

            if ok {
                if let Some(Some(pattern)) = self.params.row_matches.get(depth) {
                    let pends = self.params.pends();
                    let matched = if pends.len() > 1 {
                        pends.iter().any(|p| pattern.matches(&(p * self.r.as_row())))
                    } else {
                        pattern.matches(&self.r)
                    };
                    if !matched {
                        ok = false;
                    }
                }
            }
        }
        if self.m.len() == self.div_start + self.cur_div_len {
            self.div_start += self.cur_div_len;
            self.cur_div_len = self.div_len;
        }
        ok
    }

    fn pop_change(&mut self, r_old: Option<&RowBuf>) {
        self.m.pop();
        if self.div_start > self.m.len() {
            self.div_start -= self.cur_div_len;
            self.cur_div_len = self.div_len;
        }
        if self.maintain_r {
            let depth = self.m.len();
            let skip_proof = depth + 1 == self.lead_len
                || (!self.params.true_lead
                    && self.params.true_half_lead
                    && depth + 1 >= self.lead_len / 2);
            if !skip_proof {
                if let Some(prover) = &mut self.prover {
                    prover.remove_row(&self.r);
                }
            }
            match r_old {
                Some(old) => self.r = old.clone(),
                None => {
                    let lh = self.partial_product(self.m.len());
                    self.r = self.params.pends().rcoset_label(&lh);
                }
            }
        }
    }

    fn call_recurse(&mut self, ch: &Change, emit: Emit) -> Step {
        let old = self.maintain_r.then(|| self.r.clone());
        let result = if self.push_change(ch.clone()) {
            self.general_recurse(emit)
        } else {
            Ok(())
        };
        self.pop_change(old.as_ref());
        result
    }

    /// The product of the first `upto` changes of the partial method.
    fn partial_product(&self, upto: usize) -> RowBuf {
        let mut r = RowBuf::rounds(self.stage);
        for c in &self.m[..upto] {
            c.permute(&mut r);
        }
        r
    }

    /* ===== treble position ===== */

    /// The treble's dodging position at the current depth (0 = moving in
    /// 1-2), and whether it is moving *between* positions (a cross
    /// section).  The lead-end change reports position -1.
    fn get_posn(&self) -> (isize, bool) {
        debug_assert!(self.params.hunt_bells > 0);
        debug_assert_eq!(self.lead_len % 2, 0);
        let depth = self.m.len();
        let raw: isize = if depth >= self.lead_len / 2 {
            self.lead_len as isize - depth as isize - 2
        } else {
            depth as isize
        };
        if raw < 0 {
            return (-1, true); // the lead-end change
        }
        let div = self.div_len as isize;
        let tf = self.params.treble_front as isize;
        if raw % div == div - 1 {
            (tf - 1 + raw / div * 2 + 1, true)
        } else {
            (tf - 1 + raw / div * 2, false)
        }
    }

    /* ===== per-change vetoes ===== */

    fn is_limited_le(&self, ch: &Change) -> bool {
        let lead = Change::parse("1", self.stage);
        let seconds = limited_le_change(self.stage, self.params.hunt_bells);
        lead.map_or(false, |c| c == *ch) || seconds.map_or(false, |c| c == *ch)
    }

    fn try_midlead_change(&self, ch: &Change) -> bool {
        let p = self.params;
        let depth = self.m.len();

        if p.true_trivial && !self.m.is_empty() && self.m.last() == Some(ch) {
            return false;
        }

        let (posn, intersection) = if p.hunt_bells > 0 {
            self.get_posn()
        } else {
            (0, false)
        };

        if intersection && depth != self.lead_len - 1 && depth != self.lead_len / 2 - 1 {
            let hl_len = self.lead_len / 2;
            let internal = ch.has_internal_places();

            match p.class {
                Some(ClassReq::Surprise) if !internal => return false,
                Some(ClassReq::TrebleBob) if internal => return false,
                Some(ClassReq::Delight3)
                    if (posn == 3 && !internal) || (posn == 1 && internal) =>
                {
                    return false
                }
                Some(ClassReq::Delight4)
                    if (posn == 1 && !internal) || (posn == 3 && internal) =>
                {
                    return false
                }
                _ => {}
            }

            if matches!(
                p.class,
                Some(
                    ClassReq::Delight
                        | ClassReq::StrictDelight
                        | ClassReq::Exercise
                        | ClassReq::StrictExercise
                        | ClassReq::PasAllaTria
                        | ClassReq::PasAllaTessera
                )
            ) {
                let f = p.treble_front as isize;
                let b = p.treble_back() as isize;
                // Is this the last cross-section chosen independently (the
                // rest arrive by copying or reflection)?
                let last_independent = ((p.sym ^ p.doubsym) && posn == b - 3)
                    || (p.sym && p.doubsym && posn == (f + (b - f + 1) / 2 - 1) / 2 * 2 - 1)
                    || (p.skewsym
                        && posn == (f + (b - f + 1) / 2) / 2 * 2 - 1
                        && depth > hl_len)
                    || (!p.sym && !p.doubsym && !p.skewsym && posn == f && depth > hl_len);

                if last_independent {
                    let mut external_sections = 0isize;
                    let mut sections = 0isize;
                    let mut i = self.div_len - 1;
                    while i < depth {
                        if i != hl_len - 1 {
                            // With rotational symmetry most sections count twice
                            let value =
                                if p.skewsym && i % hl_len != hl_len / 2 - 1 { 2 } else { 1 };
                            if !self.m[i].has_internal_places() {
                                external_sections += value;
                            }
                            sections += value;
                        }
                        i += self.div_len;
                    }
                    {
                        let value = if p.skewsym && (b - f) % 4 == 1 { 2 } else { 1 };
                        if !internal {
                            external_sections += value;
                        }
                        sections += value;
                    }

                    if external_sections == 0 || external_sections == sections {
                        return false; // would be surprise / treble bob
                    }
                    match p.class {
                        Some(ClassReq::StrictDelight) if external_sections != 1 => return false,
                        Some(ClassReq::Exercise) if external_sections < 2 => return false,
                        Some(ClassReq::StrictExercise) if external_sections != 2 => {
                            return false
                        }
                        Some(ClassReq::PasAllaTria) if external_sections != 3 => return false,
                        Some(ClassReq::PasAllaTessera) if external_sections != 4 => {
                            return false
                        }
                        _ => {}
                    }
                }
            }
        }

        // Mirror the first half of the division into the second
        if p.sym_sects && !intersection && depth - self.div_start >= self.cur_div_len / 2 {
            let i = (self.div_start + self.cur_div_len) as isize
                - 2
                - (depth - self.div_start) as isize;
            debug_assert!(i >= 0 && (i as usize) < self.m.len());
            if *ch != self.m[i as usize] {
                return false;
            }
        }

        // The parity rule for single-dodge divisions
        if p.same_place_parity
            && self.cur_div_len == 4
            && depth - self.div_start != 0
            && depth - self.div_start != self.cur_div_len - 1
            && ch.parity() == self.m.last().unwrap().parity()
        {
            return false;
        }

        if p.max_consec_blows != 0
            && is_too_many_places(&self.m, ch, p.max_consec_blows, None)
        {
            return false;
        }

        // Long divisions can run false within themselves
        if p.true_half_lead
            && self.cur_div_len > 4
            && !intersection
            && is_division_false(&self.m, ch, self.div_start, self.cur_div_len)
        {
            return false;
        }

        if p.same_place_parity
            && self.cur_div_len > 4
            && depth - self.div_start == self.cur_div_len - 2
            && division_bad_parity_hack(&self.m, ch, self.div_start, self.cur_div_len)
        {
            return false;
        }

        if p.allowed_falseness.is_some()
            && depth - self.div_start >= 1
            && depth - self.div_start != self.cur_div_len - 1
            && !self.is_falseness_acceptable(ch)
        {
            return false;
        }

        true
    }

    /// Does adding `ch` keep the partial method's falseness within the
    /// allowed groups?
    fn is_falseness_acceptable(&self, ch: &Change) -> bool {
        let Some(allowed) = &self.params.allowed_falseness else {
            return true;
        };
        let Some(classification) = FchClassification::for_stage(self.stage) else {
            return true;
        };
        let r = self.partial_product(self.m.len() - 1);
        let mut c = self.m.last().unwrap().to_row();
        ch.permute(&mut c);
        let x = &(&r * &c) * &r.inv();
        debug_assert_eq!(x[0].index(), 0);
        match classification.symbol_of_orbit(&x) {
            None | Some('A') => true,
            Some(sym) => allowed.contains(sym),
        }
    }

    fn try_halflead_change(&self, ch: &Change) -> bool {
        let p = self.params;
        if p.skewsym && p.lead_head_kind == LeadHeadKind::Cyclic && p.hunt_bells == 1 {
            let hl = self.partial_product(self.m.len());
            if !is_cyclic_hl(&hl) {
                return false;
            }
        }

        if p.require_rev_cyclic_hlh
            || p.require_rev_cyclic_hle
            || p.require_cyclic_hlh
            || p.require_cyclic_hle
            || p.require_reg_hls
        {
            let hle = self.partial_product(self.m.len());
            let mut hlh = hle.clone();
            ch.permute(&mut hlh);

            let ok = (p.require_rev_cyclic_hlh && is_rev_cyclic_hl(&hlh))
                || (p.require_rev_cyclic_hle && is_rev_cyclic_hl(&hle))
                || (p.require_cyclic_hlh && is_cyclic_hl(&hlh))
                || (p.require_cyclic_hle && is_cyclic_hl(&hle))
                || (p.require_reg_hls && is_regular_hl(&hlh) && is_regular_hl(&hle));
            if !ok {
                return false;
            }
        }
        true
    }

    fn try_halflead_sym_change(&self, ch: &Change) -> bool {
        let p = self.params;
        if (p.skewsym || p.doubsym)
            && p.require_limited_le
            && !self.is_limited_le(&ch.reverse())
        {
            return false;
        }
        if (p.skewsym || p.doubsym) && p.no_78_pns && ch.finds_place(1) {
            return false;
        }
        if p.sym
            && p.max_consec_blows != 0
            && is_too_many_places(&self.m, ch, p.max_consec_blows / 2 + 1, None)
        {
            return false;
        }
        true
    }

    fn try_leadend_change(&self, ch: &Change) -> bool {
        let p = self.params;
        if p.max_consec_blows != 0 {
            for place in 0..self.bells {
                if !ch.finds_place(place) {
                    continue;
                }
                let mut count = 2usize;
                for offset in (0..self.m.len()).rev() {
                    if count > p.max_consec_blows || !self.m[offset].finds_place(place) {
                        break;
                    }
                    count += 1;
                }
                if count > p.max_consec_blows {
                    return false;
                }
                for offset in 0..self.m.len() {
                    if count > p.max_consec_blows || !self.m[offset].finds_place(place) {
                        break;
                    }
                    count += 1;
                }
                if count > p.max_consec_blows {
                    return false;
                }
            }
        }

        if p.hunt_bells == 0 && p.true_trivial && !self.m.is_empty() && *ch == self.m[0] {
            return false;
        }
        true
    }

    fn try_leadend_sym_change(&self, ch: &Change) -> bool {
        let p = self.params;
        if p.require_limited_le && !self.is_limited_le(ch) {
            return false;
        }
        if p.no_78_pns && ch.finds_place(self.bells - 2) {
            return false;
        }
        if p.sym
            && p.max_consec_blows != 0
            && is_too_many_places(&self.m, ch, p.max_consec_blows / 2 + 1, None)
        {
            return false;
        }
        true
    }

    fn try_quarterlead_change(&self, ch: &Change) -> bool {
        debug_assert_eq!(self.lead_len % 2, 0);
        if *ch != ch.reverse() {
            return false;
        }
        let p = self.params;
        if p.max_consec_blows != 0 {
            let hl_len = self.lead_len / 2;
            let run_start = (self.m.len() / hl_len) * hl_len;
            for place in 0..self.bells {
                if !ch.finds_place(place) {
                    continue;
                }
                let mut count = 2usize;
                for offset in (run_start..self.m.len()).rev() {
                    if count > p.max_consec_blows + 1 || !self.m[offset].finds_place(place) {
                        break;
                    }
                    count += 1;
                }
                for offset in (run_start..self.m.len()).rev() {
                    if count > p.max_consec_blows + 1
                        || !self.m[offset].reverse().finds_place(place)
                    {
                        break;
                    }
                    count += 1;
                }
                if count > p.max_consec_blows {
                    return false;
                }
            }
        }
        true
    }

    fn try_offset_start_change(&self, ch: &Change) -> bool {
        // Requiring cyclicity at the offset start determines the lead heads,
        // so an unacceptable lead head can be rejected very early
        let mut r = self.partial_product(self.m.len());
        ch.permute(&mut r);
        let lh = &(&r * &RowBuf::cyclic(self.stage, self.params.hunt_bells)) * &r.inv();
        self.is_acceptable_leadhead(&lh)
    }

    fn try_with_limited_le(&mut self, ch: &Change) -> bool {
        // Nothing here may consult the falseness state: this variant check
        // must not be affected by the -F options
        let orig = self.m.pop().expect("methods are never empty here");
        debug_assert_eq!(self.m.len(), self.lead_len - 1);

        if !self.try_midlead_change(ch)
            || !self.try_leadend_change(ch)
            || (self.params.hunt_bells % 2 == 1 && !self.try_leadend_sym_change(ch))
        {
            self.m.push(orig);
            return false;
        }

        self.m.push(ch.clone());
        let lh = self.partial_product(self.m.len());
        let ok = self.is_acceptable_leadhead(&lh);
        *self.m.last_mut().unwrap() = orig;
        ok
    }

    /* ===== lead head and method acceptance ===== */

    fn is_acceptable_leadhead(&self, lh: &Row) -> bool {
        let p = self.params;
        if !p.show_all_meths {
            // Every cycle must be either a hunt bell or a full working orbit
            for cycle in lh.cycles().split(',') {
                if cycle.chars().count() == 1 {
                    let h = rowframe::Bell::from_name(cycle.chars().next().unwrap())
                        .map(|b| b.index())
                        .unwrap_or(usize::MAX);
                    if h + 1 < p.treble_front || h + 1 >= p.treble_front + p.hunt_bells {
                        return false;
                    }
                } else if cycle.chars().count() != self.bells - p.hunt_bells {
                    return false;
                }
            }
        }

        match p.lead_head_kind {
            LeadHeadKind::PlainBob => lh.is_pb_lead_head(p.hunt_bells),
            LeadHeadKind::Cyclic => lh.is_cyclic_lead_end(p.hunt_bells),
            LeadHeadKind::AnyRegular => {
                let mut h = 0;
                for (i, b) in lh.bell_iter().enumerate() {
                    if b.index() == i {
                        h += 1;
                    } else {
                        break;
                    }
                }
                lh.is_pb_lead_head(h)
            }
            LeadHeadKind::OffsetCyclic | LeadHeadKind::Any => true,
        }
    }

    fn try_principle_symmetry(&self) -> bool {
        let p = self.params;
        if p.skewsym || p.doubsym || p.sym {
            let method = Method::new(self.stage, self.m.clone());
            let sym = method.symmetry_string();
            if p.skewsym && !sym.contains('R') {
                return false;
            }
            if p.sym && !sym.contains('P') {
                return false;
            }
            if p.doubsym && !sym.contains('G') {
                return false;
            }
        }
        true
    }

    fn is_acceptable_method(&mut self) -> Result<bool, SearchSignal> {
        let p = self.params;
        if !p.start_at.is_empty() && self.m < p.start_at {
            return Ok(false);
        }

        let lh = self.partial_product(self.m.len());
        if !self.is_acceptable_leadhead(&lh) {
            return Ok(false);
        }

        if self.floating_sym && !self.try_principle_symmetry() {
            return Ok(false);
        }

        if p.hunt_bells > 0 && self.offset_cyclic {
            // Offset cyclic methods are started from the last backstroke
            // snap and have cyclic rows at that point
            let r = self.partial_product(self.div_len - 2);
            let rlh = &(&r * &RowBuf::cyclic(self.stage, p.hunt_bells)) * &r.inv();
            let mut power = RowBuf::rounds(self.stage);
            let mut ok = false;
            loop {
                power = &power * &rlh;
                if power == lh {
                    ok = true;
                }
                if power.is_rounds() {
                    break;
                }
            }
            if !ok {
                return Ok(false);
            }
        }
        if p.hunt_bells == 0 && self.offset_cyclic {
            // Offset cyclic principles can start anywhere
            let n = self.m.len();
            let mut ok = false;
            for o in 0..n {
                let mut r = RowBuf::rounds(self.stage);
                for i in 0..n {
                    self.m[(i + o) % n].permute(&mut r);
                }
                if r.is_cyclic_lead_end(p.hunt_bells) {
                    ok = true;
                    break;
                }
            }
            if !ok {
                return Ok(false);
            }
        }

        if !self.passes_truth_requirements(&lh) {
            return Ok(false);
        }

        if p.require_cps {
            let method = Method::new(self.stage, self.m.clone());
            if !crate::falseness::is_cps(&method) {
                return Ok(false);
            }
        }
        if let Some(allowed) = &p.allowed_falseness {
            if self.stage == Stage::MAJOR {
                let method = Method::new(self.stage, self.m.clone());
                let codes = crate::falseness::falseness_group_codes(&method);
                if codes.chars().any(|c| c != 'A' && !allowed.contains(c)) {
                    return Ok(false);
                }
            }
        }
        if p.true_extent {
            let method = Method::new(self.stage, self.m.clone());
            if !crate::falseness::might_support_extent(&method) {
                return Ok(false);
            }
        }
        if p.true_positive_extent {
            let method = Method::new(self.stage, self.m.clone());
            if !crate::falseness::might_support_positive_extent(&method) {
                return Ok(false);
            }
        }

        if p.prefer_limited_le && !self.is_limited_le(self.m.last().unwrap()) {
            let lead = Change::parse("1", self.stage).ok();
            let seconds = Change::parse("12", self.stage).ok();
            let better_exists = lead.map_or(false, |c| self.try_with_limited_le(&c))
                || seconds.map_or(false, |c| self.try_with_limited_le(&c));
            if better_exists {
                return Ok(false);
            }
        }

        // Expressions last: they can be arbitrarily expensive
        if !p.require_exprs.is_empty() {
            let method = Method::new(self.stage, self.m.clone());
            let props =
                MethodProperties::new(&method, self.filter_payload.clone(), p)
                    .with_search_count(self.search_count);
            for expr in &p.require_exprs {
                match expr.b_evaluate(&props) {
                    Ok(true) => {}
                    Ok(false) => return Ok(false),
                    Err(_) => return Err(SearchSignal::Aborted),
                }
            }
        }

        Ok(true)
    }

    /// The `-Fl` / `-Fh` / `-Fc` proofs of a completed method.
    fn passes_truth_requirements(&self, lh: &Row) -> bool {
        let p = self.params;

        // Plain symmetric methods cannot be false in the plain course, so
        // the full proof is only needed with part ends or without symmetry
        if p.true_lead
            && (p.pends().len() > 1 || !(p.sym && p.hunt_bells > 0 && p.treble_dodges == 0))
        {
            let mut prover = LeadProver::new(p);
            loop {
                let true_so_far = prover.prove(&self.m, 0, self.m.len());
                if !true_so_far || !p.true_course || prover.is_course_head() {
                    break;
                }
            }
            if !prover.prove_lh_current() {
                return false;
            }
        } else if p.true_half_lead && (p.pends().len() > 1 || p.hunt_bells == 0) {
            let mut prover = LeadProver::new(p);
            if !prover.prove(&self.m, 0, self.m.len() / 2) {
                return false;
            }
            // The half-lead head itself: either it matches the half-lead
            // end modulo the part ends, or it must prove true
            if p.sym && !prover.prove_hl(&self.m[self.m.len() / 2 - 1]) {
                return false;
            }
            if !p.sym && !p.doubsym {
                let mut second = LeadProver::from_row(p, prover.current_row().clone());
                if !second.prove(&self.m, self.m.len() / 2, self.m.len()) {
                    return false;
                }
                if !second.prove_lh_current() {
                    return false;
                }
            } else if !prover.prove_lh(lh) {
                return false;
            }
        }
        true
    }

    fn output_method(&mut self, emit: Emit) -> Step {
        let method = Method::new(self.stage, self.m.clone());
        let props = MethodProperties::new(&method, self.filter_payload.clone(), self.params)
            .with_search_count(self.search_count);
        emit(&props)
    }

    /* ===== the recursion ===== */

    fn new_midlead_change(&mut self, emit: Emit) -> Step {
        let depth = self.m.len();
        let mut changes_to_try = self.alt[self.alt_index(depth)].clone();
        debug_assert!(!changes_to_try.is_empty());

        if let Some(rng) = &mut self.rng {
            changes_to_try.shuffle(rng);
        }

        // When resuming from --start-at, ignore possibilities before it
        let first = self.start_at.pop();

        let p = self.params;
        let hl = self.lead_len / 2;
        for ch in &changes_to_try {
            if let Some(first) = &first {
                if ch < first {
                    continue;
                }
            }
            if p.prefix.len() > depth && *ch != p.prefix[depth] {
                continue;
            }
            if let Some(fm) = &self.filter_method {
                if fm.lead_len() > depth && *ch != fm.changes()[depth] {
                    continue;
                }
            }

            if !self.try_midlead_change(ch) {
                continue;
            }

            // The rotational symmetry point
            if p.hunt_bells > 0
                && p.skewsym
                && self.lead_len % 4 == 0
                && depth % hl == self.lead_len / 4 - p.hunt_bells % 2
                && !self.try_quarterlead_change(ch)
            {
                continue;
            }

            if depth == hl - 1 && !self.try_halflead_change(ch) {
                continue;
            }

            // The palindromic symmetry point near the middle of the lead
            if ((p.hunt_bells % 2 == 1 && depth == hl - 1)
                || (p.hunt_bells > 0
                    && p.hunt_bells % 2 == 0
                    && depth == hl + self.cur_div_len / 2 - 1))
                && !self.try_halflead_sym_change(ch)
            {
                continue;
            }

            if depth == self.lead_len - 1 && !self.try_leadend_change(ch) {
                continue;
            }

            // The palindromic symmetry point near the lead end
            if ((self.sym_offset == 0 && depth == self.lead_len - 1)
                || (self.sym_offset > 0 && depth == self.sym_offset - 1))
                && !self.try_leadend_sym_change(ch)
            {
                continue;
            }

            if p.hunt_bells > 0
                && self.offset_cyclic
                && self.div_start == 0
                && self.cur_div_len > 3
                && depth == self.cur_div_len - 3
                && !self.try_offset_start_change(ch)
            {
                continue;
            }

            self.call_recurse(ch, emit)?;
        }
        Ok(())
    }

    fn double_existing(&mut self, emit: Emit) -> Step {
        let p = self.params;
        debug_assert_eq!(self.lead_len % 2, 0);
        let hl_len = self.lead_len / 2;
        debug_assert_eq!(self.m.len(), hl_len);

        if p.max_consec_blows != 0 {
            let back = self.m.last().unwrap();
            for place in 0..self.bells {
                if !back.finds_place(place) {
                    continue;
                }
                let mut count = 2usize;
                for offset in (0..self.m.len().saturating_sub(1)).rev() {
                    if count > p.max_consec_blows + 1 || !self.m[offset].finds_place(place) {
                        break;
                    }
                    count += 1;
                }
                for offset in 0..self.m.len() {
                    if count > p.max_consec_blows + 1
                        || !self.m[offset].reverse().finds_place(place)
                    {
                        break;
                    }
                    count += 1;
                }
                if count > p.max_consec_blows {
                    return Ok(());
                }
            }
        }

        // Mirror the first half into the second, without the lead end
        let mut ok = true;
        while ok && self.m.len() < self.lead_len - 1 {
            let ch = self.m[self.m.len() - hl_len].reverse();
            ok = self.push_change(ch);
        }

        let ch = self.m[hl_len - 1].reverse();
        if p.max_consec_blows != 0 && ok {
            for place in 0..self.bells {
                if !ch.finds_place(place) {
                    continue;
                }
                let mut count = 2usize;
                for offset in (0..self.m.len()).rev() {
                    if !self.m[offset].finds_place(place) {
                        break;
                    }
                    count += 1;
                }
                for offset in 0..self.m.len() {
                    if !self.m[offset].finds_place(place) {
                        break;
                    }
                    count += 1;
                }
                if count > p.max_consec_blows {
                    ok = false;
                    break;
                }
            }
        }

        let result = if ok && self.push_change(ch) {
            self.general_recurse(emit)
        } else {
            Ok(())
        };

        while self.m.len() > hl_len {
            self.pop_change(None);
        }
        result
    }

    fn general_recurse(&mut self, emit: Emit) -> Step {
        let depth = self.m.len();
        let p = self.params;

        if let Some(limit) = p.search_limit {
            if self.search_count == limit {
                return Err(SearchSignal::LimitReached);
            }
        }
        self.do_status()?;

        let has_qlead_change = self.lead_len % 4 == 0;
        let depth_i = depth as isize;
        let qlead_sym_pt = (self.lead_len / 4 + self.sym_offset) as isize - 1;
        let hlead_sym_pt = (self.lead_len / 2 + self.sym_offset) as isize - 1;
        let tqlead_sym_pt = (3 * self.lead_len / 4 + self.sym_offset) as isize - 1;

        if depth == self.lead_len {
            // Found something
            let matches_filter = match &self.filter_method {
                Some(fm) => fm.changes() == self.m.as_slice(),
                None => true,
            };
            if matches_filter && self.is_acceptable_method()? {
                self.search_count += 1;
                if p.filter_mode != FilterMode::InvertFilter {
                    self.output_method(emit)?;
                }
            }
            return Ok(());
        }

        if self.floating_sym {
            // Symmetry in principles is found after the fact, because the
            // symmetry points float
            return self.new_midlead_change(emit);
        }

        // Maximum symmetry: fold the quarter lead
        if p.skewsym && depth_i == qlead_sym_pt + 1 && self.lead_len > 4 {
            let mut end = qlead_sym_pt as usize + self.lead_len / 4;
            if p.doubsym && self.sym_offset > 0 {
                end = self.lead_len / 2;
            } else if self.sym_offset > 0 {
                end += self.sym_offset;
            }

            let mut ok = true;
            while ok && self.m.len() < end {
                let idx = 2 * qlead_sym_pt as usize + usize::from(!has_qlead_change)
                    - self.m.len();
                let ch = self.m[idx].reverse();
                ok = self.push_change(ch);
            }
            let result = if ok { self.general_recurse(emit) } else { Ok(()) };
            while self.m.len() > depth {
                self.pop_change(None);
            }
            return result;
        }

        // Glide symmetry: double the first half
        if p.doubsym && depth == self.lead_len / 2 {
            return self.double_existing(emit);
        }

        // Palindromic symmetry: reflect the first half
        if p.sym && depth_i == hlead_sym_pt + 1 && self.lead_len > 2 {
            debug_assert!(!p.skewsym && !p.doubsym);
            let stop = if self.sym_offset > 0 {
                2 * self.sym_offset - 1
            } else {
                0
            };
            let mut ok = true;
            let mut j = depth as isize - 2;
            while ok && j >= stop as isize {
                let ch = self.m[j as usize].clone();
                ok = self.push_change(ch);
                j -= 1;
            }
            let result = if ok { self.general_recurse(emit) } else { Ok(()) };
            while self.m.len() > depth {
                self.pop_change(None);
            }
            return result;
        }

        // Twin-hunt palindromic symmetry: fold the first division
        if p.sym && self.sym_offset > 1 && depth == self.sym_offset {
            let mut ok = true;
            let mut j = depth as isize - 2;
            while ok && j >= 0 {
                let ch = self.m[j as usize].clone();
                ok = self.push_change(ch);
                j -= 1;
            }
            let result = if ok { self.general_recurse(emit) } else { Ok(()) };
            while self.m.len() > depth {
                self.pop_change(None);
            }
            return result;
        }

        // Rotational symmetry alone: fold the three-quarter lead
        if p.skewsym && depth_i == tqlead_sym_pt + 1 && self.lead_len > 4 {
            debug_assert!(!p.doubsym && !p.sym);
            let mut ok = true;
            while ok && self.m.len() < self.lead_len {
                let idx = 2 * tqlead_sym_pt as usize + usize::from(!has_qlead_change)
                    - self.m.len();
                let ch = self.m[idx].reverse();
                ok = self.push_change(ch);
            }
            let result = if ok { self.general_recurse(emit) } else { Ok(()) };
            while self.m.len() > depth {
                self.pop_change(None);
            }
            return result;
        }

        self.new_midlead_change(emit)
    }
}

/// The change `1<h+1>` used by limited lead-end checks (`12` for single
/// hunt methods).
fn limited_le_change(stage: Stage, hunt_bells: usize) -> Option<Change> {
    let mut pn = String::from("1");
    pn.push(rowframe::Bell::from_index(hunt_bells)?.name());
    Change::parse(&pn, stage).ok()
}

/* ===== completed-method proving ===== */

/// A prover for completed methods: rows are reduced modulo the part-end
/// group as they are proved.
struct LeadProver<'a> {
    params: &'a SearchParams,
    prover: Prover,
    r: RowBuf,
}

impl<'a> LeadProver<'a> {
    fn new(params: &'a SearchParams) -> Self {
        Self::from_row(params, params.start_row.clone())
    }

    fn from_row(params: &'a SearchParams, r: RowBuf) -> Self {
        let mut prover = Prover::new(1);
        for row in &params.avoid_rows {
            prover.add_row(row);
        }
        debug_assert!(prover.is_true());
        LeadProver { params, prover, r }
    }

    fn prove(&mut self, changes: &[Change], from: usize, to: usize) -> bool {
        for c in &changes[from..to] {
            if !self.prover.is_true() {
                return false;
            }
            let label = self.params.pends().rcoset_label(&self.r);
            self.prover.add_row(&label);
            c.permute(&mut self.r);
        }
        self.prover.is_true()
    }

    fn prove_lh(&mut self, lh: &Row) -> bool {
        let label = self.params.pends().rcoset_label(lh);
        if label != self.params.start_row {
            self.prover.add_row(&label);
        }
        self.prover.is_true()
    }

    fn prove_lh_current(&mut self) -> bool {
        let r = self.r.clone();
        self.prove_lh(&r)
    }

    /// Proves the half-lead head: it must either coincide with the half-lead
    /// end modulo the part ends, or prove true against the first half-lead.
    fn prove_hl(&mut self, half_lead_change: &Change) -> bool {
        let r2 = self.params.pends().rcoset_label(&self.r);
        let r3 = self
            .params
            .pends()
            .rcoset_label(&(&self.r * half_lead_change));
        if r2 != r3 {
            self.prover.add_row(&r2);
        }
        self.prover.is_true()
    }

    fn is_course_head(&self) -> bool {
        self.r == self.params.start_row
    }

    fn current_row(&self) -> &RowBuf {
        &self.r
    }
}

fn is_cyclic_hl(hl: &Row) -> bool {
    let n = hl.stage().num_bells();
    debug_assert_eq!(hl[n - 1].index(), 0);
    (1..n - 1).all(|i| hl[i - 1].index() % (n - 1) + 1 == hl[i].index())
}

fn is_rev_cyclic_hl(hl: &Row) -> bool {
    let n = hl.stage().num_bells();
    debug_assert_eq!(hl[n - 1].index(), 0);
    (0..n - 2).all(|i| hl[i + 1].index() % (n - 1) + 1 == hl[i].index())
}

fn is_regular_hl(hl: &Row) -> bool {
    let stage = hl.stage();
    let n = stage.num_bells();
    let pblh = RowBuf::pb_lead_head(stage, 1);
    let mut rr = RowBuf::backrounds(stage);
    let mut rhl = rr.clone();
    loop {
        if *hl == *rhl {
            return true;
        }
        rhl = &pblh * &rhl;
        if rhl == rr {
            break;
        }
    }
    // Try again with the tenor's place made at the half lead
    let Ok(ch) = Change::parse(
        &rowframe::Bell::from_index(n - 1).unwrap().name().to_string(),
        stage,
    ) else {
        return false;
    };
    ch.permute(&mut rhl);
    ch.permute(&mut rr);
    loop {
        if *hl == *rhl {
            return true;
        }
        rhl = &pblh * &rhl;
        if rhl == rr {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SearchParams;

    fn run_search(mut params: SearchParams) -> Vec<String> {
        params.validate().unwrap();
        let mut found = Vec::new();
        let mut searcher = Searcher::new(&params).unwrap();
        let outcome = searcher.run(&mut |props: &MethodProperties| {
            found.push(props.method().format_pn());
            Ok(())
        });
        assert_eq!(outcome.signal, None);
        assert_eq!(outcome.search_count as usize, found.len());
        found
    }

    #[test]
    fn fully_masked_search_finds_the_method() {
        // A fully-specified mask can only find its own method
        let mut p = SearchParams::new(Stage::MINOR);
        p.treble_dodges = 1;
        p.sym = true;
        p.mask = "&x3x4x2x3x4x5,2".to_owned();
        let found = run_search(p);
        assert_eq!(found.len(), 1);
        let m = Method::parse(&found[0], Stage::MINOR).unwrap();
        assert_eq!(m.lead_head().to_string(), "156342");
    }

    #[test]
    fn filtering_accepts_cambridge_as_surprise() {
        let mut p = SearchParams::new(Stage::MINOR);
        p.treble_dodges = 1;
        p.sym = true;
        p.class = Some(ClassReq::Surprise);
        p.lead_head_kind = LeadHeadKind::PlainBob;
        p.true_lead = true;
        p.filter_mode = FilterMode::Filter;
        p.validate().unwrap();

        let lib = LiteLibrary::read(
            "&x3x4x2x3x4x5,2\tCambridge\n&34x34.16x12x16x12x16,16\tKent\n".as_bytes(),
        )
        .unwrap();
        let mut found = Vec::new();
        let mut searcher = Searcher::new(&p).unwrap();
        let outcome = searcher.filter(&lib, &mut |props: &MethodProperties| {
            found.push(props.payload().to_owned());
            Ok(())
        });
        assert_eq!(outcome.signal, None);
        // Kent is treble bob, not surprise, so only Cambridge passes
        assert_eq!(found, vec!["Cambridge".to_owned()]);
    }

    #[test]
    fn invert_filter_emits_the_complement() {
        let mut p = SearchParams::new(Stage::MINOR);
        p.treble_dodges = 1;
        p.sym = true;
        p.class = Some(ClassReq::Surprise);
        p.filter_mode = FilterMode::InvertFilter;
        p.validate().unwrap();

        let lib = LiteLibrary::read(
            "&x3x4x2x3x4x5,2\tCambridge\n&34x34.16x12x16x12x16,16\tKent\n".as_bytes(),
        )
        .unwrap();
        let mut found = Vec::new();
        let mut searcher = Searcher::new(&p).unwrap();
        searcher.filter(&lib, &mut |props: &MethodProperties| {
            found.push(props.payload().to_owned());
            Ok(())
        });
        assert_eq!(found, vec!["Kent".to_owned()]);
    }

    #[test]
    fn principle_search_with_full_mask() {
        let mut p = SearchParams::new(Stage::MINOR);
        p.hunt_bells = 0;
        p.lead_len = 2;
        p.mask = "x.16".to_owned();
        p.show_all_meths = true;
        let found = run_search(p);
        assert_eq!(found.len(), 1); // Original Minor
    }

    #[test]
    fn search_limit_stops_early() {
        let mut p = SearchParams::new(Stage::MINOR);
        p.treble_dodges = 1;
        p.sym = true;
        p.search_limit = Some(1);
        p.validate().unwrap();
        let mut count = 0u64;
        let mut searcher = Searcher::new(&p).unwrap();
        let outcome = searcher.run(&mut |_props: &MethodProperties| {
            count += 1;
            Ok(())
        });
        assert_eq!(count, 1);
        assert_eq!(outcome.signal, Some(SearchSignal::LimitReached));
    }

    #[test]
    fn seeded_random_runs_are_reproducible() {
        let mut runs = Vec::new();
        for _ in 0..2 {
            let mut p = SearchParams::new(Stage::MINOR);
            p.treble_dodges = 1;
            p.sym = true;
            p.random_order = true;
            p.seed = 42;
            p.search_limit = Some(5);
            p.validate().unwrap();
            let mut found = Vec::new();
            let mut searcher = Searcher::new(&p).unwrap();
            searcher.run(&mut |props: &MethodProperties| {
                found.push(props.method().format_pn());
                Ok(())
            });
            runs.push(found);
        }
        assert_eq!(runs[0], runs[1]);
        assert_eq!(runs[0].len(), 5);
    }

    #[test]
    fn true_lead_rejects_false_leads() {
        // x.16.x.16 gives four distinct rows, so the block is true
        let mut p = SearchParams::new(Stage::MINOR);
        p.hunt_bells = 0;
        p.lead_len = 4;
        p.mask = "x.16.x.16".to_owned();
        p.true_lead = true;
        p.show_all_meths = true;
        let found = run_search(p);
        assert_eq!(found.len(), 1);

        let mut p = SearchParams::new(Stage::MINOR);
        p.hunt_bells = 0;
        p.lead_len = 4;
        p.mask = "x.16.16.16".to_owned();
        p.true_lead = true;
        p.true_trivial = false;
        p.show_all_meths = true;
        // 16.16 repeats a row within the lead
        let found = run_search(p);
        assert_eq!(found.len(), 0);
    }
}
