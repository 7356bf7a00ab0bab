//! Simulated annealing over a set of lead heads (or course heads),
//! maintaining mutual truth against a falseness table and, optionally,
//! linkage of the chosen set through calls.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io::Write;

use rand::Rng;

use rowframe::falseness::{CourseFalseness, FalseCourseTable, FalseLeadTable, LeadFalseness};
use rowframe::multtab::TableError;
use rowframe::{
    Change, ExtentIterator, Group, InCourseExtentIterator, Method, MultTable, Parity, PostCol,
    Row, RowBuf, RowIdx,
};

/// The expensive consistency checks are run after every commit in debug
/// builds; release builds check once per annealing run.
const ENABLE_CHECKS: bool = cfg!(debug_assertions);

/// Per-row weighting profile (`-W opt=weight`).
#[derive(Debug, Clone, Copy)]
pub struct Weighting {
    pub base: f64,
    pub linked: f64,
    pub in_course: f64,
    pub out_of_course: f64,
    pub tenors_together: f64,
    pub tenors_over: f64,
}

impl Default for Weighting {
    fn default() -> Self {
        Weighting {
            base: 1.0,
            linked: 1.0,
            in_course: 0.0,
            out_of_course: 0.0,
            tenors_together: 0.0,
            tenors_over: 0.0,
        }
    }
}

/// What kind of search to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchFlags {
    /// Mutually true whole courses rather than leads
    pub whole_courses: bool,
    pub tenors_together: bool,
    pub in_course: bool,
    /// No fixed treble
    pub principle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeadState {
    /// Internally false, never usable
    Disallowed,
    Absent,
    Present,
    /// Fixed by the user, never removable
    Required,
}

impl LeadState {
    #[inline]
    fn is_present(self) -> bool {
        matches!(self, LeadState::Present | LeadState::Required)
    }
}

/// The ways that building a [`State`] can fail.
#[derive(Debug)]
pub enum StateError {
    Table(TableError),
    FalsenessConflictsPartEnds,
    RequiredConflictsPartEnds,
    RequiredConflictsFalseness,
    RequiredMutuallyFalse,
    CallsConflictFalseness,
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Table(e) => write!(f, "{}", e),
            StateError::FalsenessConflictsPartEnds => {
                write!(f, "the falseness conflicts with the part-end group")
            }
            StateError::RequiredConflictsPartEnds => {
                write!(f, "the required rows conflict with the part-end group")
            }
            StateError::RequiredConflictsFalseness => {
                write!(f, "the required rows conflict with the falseness")
            }
            StateError::RequiredMutuallyFalse => {
                write!(f, "the required rows are mutually false")
            }
            StateError::CallsConflictFalseness => {
                write!(f, "the given calls conflict with the falseness")
            }
        }
    }
}

impl std::error::Error for StateError {}

impl From<TableError> for StateError {
    fn from(e: TableError) -> Self {
        StateError::Table(e)
    }
}

/// Do the "tenors" (every bell above 6th's place) lie in their home places?
fn is_tt(r: &Row) -> bool {
    r.fixes_tail(6.min(r.stage().num_bells()))
}

/// Are the tenors crossed at the back (`...65`-style coursing)?
fn are_tenors_over(r: &Row) -> bool {
    let n = r.stage().num_bells();
    r[n - 1].index() == n - 1 && r[n - 3].index() == n - 2
}

/// One Q-set: the call-altered course heads reachable from any course, each
/// paired with the index of the Q-set holding its inverse.
struct QSet {
    members: Vec<(PostCol, usize)>,
    call: usize,
}

/// The annealing state: which cosets of the multiplication table are
/// present, what they score, and how they link together.
pub struct State {
    course_len: usize,
    part_size: usize,
    link_weight: f64,
    flags: SearchFlags,

    table: MultTable,
    weights: Vec<f64>,
    /// Falseness post-columns: `i` and `i * f` cannot both be present
    fchs: Vec<PostCol>,
    required: Vec<RowIdx>,
    qsets: Vec<QSet>,
    /// (forward, inverse) lead-head post-columns for per-lead linkage
    lhs: Vec<(PostCol, PostCol)>,

    beta: f64,
    score: f64,
    len: usize,
    links: usize,
    leads: Vec<LeadState>,
    /// Per-coset linkage tag: an index into `qsets` (or `lhs`)
    linkage: Vec<Option<usize>>,
}

impl State {
    pub fn new(
        method: &Method,
        flags: SearchFlags,
        part_ends: &Group,
        required_rows: &[RowBuf],
        calls: &[Change],
        weighting: &Weighting,
    ) -> Result<State, StateError> {
        let stage = method.stage();
        let bells = stage.num_bells();
        let nh = if flags.principle { 0 } else { 1 };
        let nw = if flags.whole_courses {
            if flags.tenors_together {
                5.min(bells - 1 - nh)
            } else {
                bells - 1 - nh
            }
        } else {
            bells - nh
        };

        // The multiplication table, collapsing whole courses by the
        // lead-head group
        log::debug!("generating multiplication table...");
        let post_group = if flags.whole_courses {
            Some(Group::closure([method.lead_head()]).expect("single-stage generators"))
        } else {
            None
        };
        let table = if flags.in_course {
            MultTable::new(
                InCourseExtentIterator::new(nw, nh, stage),
                part_ends,
                post_group.as_ref(),
            )?
        } else {
            MultTable::new(
                ExtentIterator::new(nw, nh, stage),
                part_ends,
                post_group.as_ref(),
            )?
        };

        let weights = table
            .iter()
            .map(|(_, r)| {
                let mut w = weighting.base;
                if r.parity() == Parity::Even {
                    w += weighting.in_course;
                } else {
                    w += weighting.out_of_course;
                }
                if is_tt(r) {
                    w += weighting.tenors_together;
                }
                if are_tenors_over(r) {
                    w += weighting.tenors_over;
                }
                w
            })
            .collect();

        let mut state = State {
            course_len: method.leads(),
            part_size: part_ends.len(),
            link_weight: weighting.linked,
            flags,
            table,
            weights,
            fchs: Vec::new(),
            required: Vec::new(),
            qsets: Vec::new(),
            lhs: Vec::new(),
            beta: 0.0,
            score: 0.0,
            len: 0,
            links: 0,
            leads: Vec::new(),
            linkage: Vec::new(),
        };

        if flags.whole_courses {
            state.init_false_courses(method)?;
        } else {
            state.init_false_leads(method)?;
        }
        if !required_rows.is_empty() {
            state.init_required(method, required_rows)?;
        }
        if !calls.is_empty() {
            if flags.whole_courses {
                state.init_qsets(method, calls)?;
            } else {
                state.init_lead_heads(method, calls)?;
            }
        }

        state.clear()?;
        Ok(state)
    }

    fn add_falseness_col(&mut self, f: &Row) -> Result<(), StateError> {
        let col = self.table.compute_post_col(f)?;
        let rounds = RowIdx::from_usize(0);
        if rounds * &col == rounds {
            return Err(StateError::FalsenessConflictsPartEnds);
        }
        self.fchs.push(col);
        Ok(())
    }

    fn init_false_courses(&mut self, method: &Method) -> Result<(), StateError> {
        log::debug!("calculating false course table...");
        let table = FalseCourseTable::new(
            method,
            CourseFalseness {
                in_course_only: self.flags.in_course,
                tenors_together: self.flags.tenors_together,
            },
        );
        for f in table.iter() {
            if !f.is_rounds() {
                self.add_falseness_col(f)?;
            }
        }
        Ok(())
    }

    fn init_false_leads(&mut self, method: &Method) -> Result<(), StateError> {
        log::debug!("calculating false lead table...");
        let table = FalseLeadTable::new(
            method,
            LeadFalseness {
                in_course_only: self.flags.in_course,
                no_fixed_treble: self.flags.principle,
                half_lead_only: false,
            },
        );
        for f in table.iter() {
            if !f.is_rounds() {
                self.add_falseness_col(f)?;
            }
        }
        Ok(())
    }

    fn init_required(
        &mut self,
        method: &Method,
        required_rows: &[RowBuf],
    ) -> Result<(), StateError> {
        let n = self.table.stage().num_bells();
        let lh = method.lead_head();
        for row in required_rows {
            // Normalise within the course until the tenor is home
            let mut r = row.clone();
            let mut guard = 0;
            while r[n - 1].index() != n - 1 {
                r = &lh * &r;
                guard += 1;
                if guard > self.course_len * n {
                    return Err(StateError::RequiredConflictsPartEnds);
                }
            }
            let idx = self
                .table
                .find(&r)
                .ok_or(StateError::RequiredConflictsPartEnds)?;
            if self.required.contains(&idx) {
                return Err(StateError::RequiredConflictsPartEnds);
            }
            for f in &self.fchs {
                if self.required.contains(&(idx * f)) {
                    return Err(StateError::RequiredConflictsFalseness);
                }
            }
            self.required.push(idx);
        }
        Ok(())
    }

    fn init_lead_heads(&mut self, method: &Method, calls: &[Change]) -> Result<(), StateError> {
        debug_assert!(!self.flags.whole_courses);
        let lh = method.lead_head();
        self.lhs.push((
            self.table.compute_post_col(&lh)?,
            self.table.compute_post_col(&lh.inv())?,
        ));
        // The lead-end row: undo the lead-end change from the lead head
        let le = &lh * method.lead_end_change();
        for call in calls {
            let called_lh = &le * call;
            self.lhs.push((
                self.table.compute_post_col(&called_lh)?,
                self.table.compute_post_col(&called_lh.inv())?,
            ));
        }
        Ok(())
    }

    fn init_qsets(&mut self, method: &Method, calls: &[Change]) -> Result<(), StateError> {
        debug_assert!(self.flags.whole_courses);
        let n = self.table.stage().num_bells();
        let lh_group =
            Group::closure([method.lead_head()]).expect("single-stage generators");
        let mut q_inverses: Vec<Vec<PostCol>> = Vec::new();

        for (ci, call) in calls.iter().enumerate() {
            log::debug!("calculating Q-sets for call {}...", call);
            let mut gen = method.lead_end_change().to_row();
            call.permute(&mut gen);
            let q_proto = Group::closure([gen]).expect("single-stage generators");

            for li in lh_group.iter() {
                let mut members: Vec<(PostCol, usize)> = Vec::new();
                let mut inverses: Vec<PostCol> = Vec::new();

                // The course heads of the Q-set.  Course heads of Q-sets
                // affecting the tenor are not conjugate to the Q-set (or
                // even a group), hence the search over lead heads.
                for qi in q_proto.iter() {
                    if qi.is_rounds() {
                        continue;
                    }
                    for lj in lh_group.iter() {
                        let q = &(li * qi) * lj;
                        if q[n - 1].index() != n - 1 {
                            continue;
                        }
                        if self.flags.tenors_together && !is_tt(&q) {
                            continue;
                        }
                        inverses.push(self.table.compute_post_col(&q.inv())?);
                        members.push((self.table.compute_post_col(&q)?, usize::MAX));
                        break;
                    }
                }

                let mut ok = members.len() == q_proto.len() - 1;
                // The Q-set must not intersect the falseness
                if ok {
                    ok = !members
                        .iter()
                        .any(|(col, _)| self.fchs.iter().any(|f| f == col));
                }
                if ok {
                    self.qsets.push(QSet { members, call: ci });
                    q_inverses.push(inverses);
                }
            }
        }

        // Pair each Q-set member with the Q-set holding its inverse
        for i in 0..self.qsets.len() {
            let call = self.qsets[i].call;
            let mut gen = method.lead_end_change().to_row();
            calls[call].permute(&mut gen);
            let q_proto = Group::closure([gen]).expect("single-stage generators");
            let proto: Vec<&Row> = q_proto.iter().collect();

            let members_len = self.qsets[i].members.len();
            debug_assert_eq!(members_len, proto.len() - 1);
            for j in 0..members_len {
                // Locate the inverse element within the prototype group
                let inv = proto[j + 1].inv();
                let j_inv = proto
                    .iter()
                    .position(|p| **p == *inv)
                    .expect("groups contain inverses")
                    - 1;

                let mut found = false;
                for k in 0..self.qsets.len() {
                    if self.qsets[k].call != call {
                        continue;
                    }
                    if self.qsets[i].members[j].0 == q_inverses[k][j_inv] {
                        self.qsets[i].members[j].1 = k;
                        found = true;
                        break;
                    }
                }
                debug_assert!(found);
            }
        }

        if self.qsets.is_empty() {
            return Err(StateError::CallsConflictFalseness);
        }
        Ok(())
    }

    /* ===== public accessors ===== */

    #[inline]
    pub fn set_beta(&mut self, beta: f64) {
        self.beta = beta;
    }

    /// The size of the found set, in leads.
    pub fn length(&self) -> usize {
        self.len
            * self.part_size
            * if self.flags.whole_courses {
                self.course_len
            } else {
                1
            }
    }

    pub fn table_size(&self) -> usize {
        self.table.len()
    }

    pub fn has_linkage(&self) -> bool {
        !self.qsets.is_empty() || !self.lhs.is_empty()
    }

    pub fn fully_linked(&self) -> bool {
        self.links == self.len
    }

    pub fn percent_linked(&self) -> f64 {
        100.0 * self.links as f64 / self.len as f64
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// The rows currently present, in table order.
    pub fn present_rows(&self) -> impl Iterator<Item = &Row> {
        self.table
            .iter()
            .filter(|(i, _)| self.leads[i.index()].is_present())
            .map(|(_, r)| r)
    }

    /// Prints the present rows, with signs and linkage annotations.
    pub fn dump(&self, out: &mut dyn Write) -> std::io::Result<()> {
        for (i, r) in self.table.iter() {
            let state = self.leads[i.index()];
            if !state.is_present() {
                continue;
            }
            let sign = if r.parity() == Parity::Even { '+' } else { '-' };
            write!(out, "{:>3}: {}{}", i.index(), r, sign)?;
            if let Some(Some(tag)) = self.linkage.get(i.index()) {
                if !self.qsets.is_empty() {
                    write!(out, " Q{}", tag)?;
                } else {
                    write!(out, " L{}", tag)?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /* ===== state management ===== */

    #[inline]
    fn is_present(&self, r: RowIdx) -> bool {
        self.leads[r.index()].is_present()
    }

    /// Resets to the initial state: everything absent except the required
    /// rows, with internally-false rows disallowed.
    pub fn clear(&mut self) -> Result<(), StateError> {
        self.score = 0.0;
        self.len = 0;
        self.links = 0;
        self.leads = vec![LeadState::Absent; self.table.len()];
        self.linkage = vec![None; self.table.len()];

        let mut init = Perturbation::default();
        // Rows false against themselves (possibly in other parts) can
        // never be rung
        for f_idx in 0..self.fchs.len() {
            for i in self.table.indices() {
                if i * &self.fchs[f_idx] == i {
                    let removed = init.remove_row(self, i, LeadState::Disallowed);
                    debug_assert!(removed);
                }
            }
        }
        for idx in self.required.clone() {
            if !init.add_row(self, idx) {
                return Err(StateError::RequiredMutuallyFalse);
            }
        }
        init.commit(self, LeadState::Required, LeadState::Disallowed);
        Ok(())
    }

    /// Makes one random move, returning `true` if it was kept.
    pub fn perturb(&mut self, rng: &mut impl Rng) -> bool {
        let ri = RowIdx::from_usize(rng.gen_range(0..self.leads.len()));
        let mut p = Perturbation::default();
        let valid = match self.leads[ri.index()] {
            LeadState::Present => p.remove_row(self, ri, LeadState::Absent),
            LeadState::Absent => p.add_row(self, ri),
            _ => return false,
        };
        if valid && self.should_keep(p.delta(self), rng) {
            p.commit(self, LeadState::Present, LeadState::Absent);
            true
        } else {
            false
        }
    }

    #[inline]
    fn should_keep(&self, delta: f64, rng: &mut impl Rng) -> bool {
        delta > 0.0 || rng.gen::<f64>() < (delta * self.beta).exp()
    }

    /// Repeatedly removes present-but-unlinked rows to a fixed point.
    pub fn prune_unlinked(&mut self) {
        loop {
            let mut p = Perturbation::default();
            let mut did_anything = false;
            for i in self.table.indices() {
                // No short circuit: prune every index each pass
                let pruned = p.prune_unlinked(self, i);
                did_anything = did_anything || pruned;
            }
            if did_anything {
                p.commit(self, LeadState::Present, LeadState::Absent);
            } else {
                debug_assert!(self.fully_linked());
                return;
            }
        }
    }

    fn check_linkage(&self, r: RowIdx) -> Option<usize> {
        if !self.qsets.is_empty() {
            self.check_qsets(r)
        } else if !self.lhs.is_empty() {
            self.check_lead_heads(r)
        } else {
            None
        }
    }

    fn check_lead_heads(&self, r: RowIdx) -> Option<usize> {
        for (i, (fwd, _)) in self.lhs.iter().enumerate() {
            let p = r * fwd;
            if p != r && self.is_present(p) {
                return Some(i);
            }
        }
        None
    }

    fn check_qsets(&self, r: RowIdx) -> Option<usize> {
        'qsets: for (qi, qset) in self.qsets.iter().enumerate() {
            for (i, (col, _)) in qset.members.iter().enumerate() {
                let q = r * col;
                // Q-sets affecting the tenors can be partially
                // self-referential: those members don't count
                let is_self =
                    q == r || qset.members[..i].iter().any(|(c2, _)| r * c2 == q);
                if !is_self && !self.is_present(q) {
                    continue 'qsets;
                }
            }
            return Some(qi);
        }
        None
    }

    /// Recomputes every aggregate from scratch and verifies the falseness
    /// invariant.  Logs and returns `false` on any mismatch.
    pub fn check(&self) -> bool {
        let mut real_score = 0.0;
        let mut real_links = 0usize;
        let mut real_len = 0usize;
        for i in self.table.indices() {
            if self.is_present(i) {
                real_len += 1;
                real_score += self.weights[i.index()];
                if self.check_linkage(i).is_some() {
                    real_score += self.link_weight;
                    real_links += 1;
                }
            }
        }
        if real_links != self.links {
            log::error!(
                "linkage mismatch: actual {}, expected {}",
                real_links,
                self.links
            );
            return false;
        }
        if (real_score - self.score).abs() > 1e-9 {
            log::error!("score mismatch: actual {}, expected {}", real_score, self.score);
            return false;
        }
        if real_len != self.len {
            log::error!("length mismatch: actual {}, expected {}", real_len, self.len);
            return false;
        }
        for f in &self.fchs {
            for i in self.table.indices() {
                let fi = i * f;
                if i == fi && self.is_present(fi) {
                    log::error!("internally false lead present: {}", i.index());
                    return false;
                }
                if self.is_present(i) && self.is_present(fi) && i != fi {
                    log::error!("falseness: {} against {}", i.index(), fi.index());
                    return false;
                }
            }
        }
        true
    }

    /// The annealing loop: `steps` perturbations with the inverse
    /// temperature rising geometrically.
    pub fn anneal(&mut self, steps: usize, rng: &mut impl Rng) {
        const BETA_INIT: f64 = 3.0;
        const BETA_FINAL: f64 = 25.0;
        let beta_mult = (BETA_FINAL / BETA_INIT).powf(1.0 / steps as f64);

        let mut beta = BETA_INIT;
        while beta < BETA_FINAL {
            self.set_beta(beta);
            self.perturb(rng);
            beta *= beta_mult;
        }
        if ENABLE_CHECKS {
            assert!(self.check());
        }
    }
}

/////////////////////
// PERTURBATIONS   //
/////////////////////

/// A pending move: the score deltas of rows added or removed, and the
/// linkage-tag changes, collected so the whole move can be accepted or
/// rejected atomically.
#[derive(Default)]
struct Perturbation {
    /// Row weight deltas: positive to add, negative to remove
    rdiff: HashMap<RowIdx, f64>,
    /// Link count deltas and the new tag
    ldiff: HashMap<RowIdx, (i32, Option<usize>)>,
    delta: f64,
}

impl Perturbation {
    fn is_added(&self, r: RowIdx) -> bool {
        self.rdiff.get(&r).map_or(false, |&w| w > 0.0)
    }

    fn is_removed(&self, r: RowIdx) -> bool {
        self.rdiff.get(&r).map_or(false, |&w| w < 0.0)
    }

    /// Present once this perturbation commits?
    fn effectively_present(&self, s: &State, r: RowIdx) -> bool {
        (s.is_present(r) && !self.is_removed(r)) || (!s.is_present(r) && self.is_added(r))
    }

    fn get_linkage(&self, s: &State, r: RowIdx) -> Option<usize> {
        match self.ldiff.get(&r) {
            Some(&(_, tag)) => tag,
            None => s.linkage[r.index()],
        }
    }

    fn do_add_row(&mut self, s: &State, r: RowIdx) {
        let w = s.weights[r.index()];
        self.delta += w;
        let entry = self.rdiff.entry(r).or_insert(0.0);
        *entry += w;
        if *entry == 0.0 {
            self.rdiff.remove(&r);
        }
    }

    fn do_rm_row(&mut self, s: &State, r: RowIdx) {
        let w = s.weights[r.index()];
        self.delta -= w;
        let entry = self.rdiff.entry(r).or_insert(0.0);
        *entry -= w;
        if *entry == 0.0 {
            self.rdiff.remove(&r);
        }
    }

    fn do_add_link(&mut self, s: &State, r: RowIdx, link: usize) {
        self.delta += s.link_weight;
        let entry = self.ldiff.entry(r).or_insert((0, None));
        entry.0 += 1;
        entry.1 = Some(link);
    }

    fn do_rm_link(&mut self, s: &State, r: RowIdx) {
        self.delta -= s.link_weight;
        let entry = self.ldiff.entry(r).or_insert((0, None));
        entry.0 -= 1;
        if entry.0 == 0 {
            self.ldiff.remove(&r);
        } else {
            entry.1 = None;
        }
    }

    fn add_row(&mut self, s: &State, r: RowIdx) -> bool {
        if s.leads[r.index()] == LeadState::Disallowed {
            return false;
        }
        if !self.effectively_present(s, r) {
            // Remove everything false against the new row
            for f_idx in 0..s.fchs.len() {
                let false_row = r * &s.fchs[f_idx];
                if !self.remove_row(s, false_row, LeadState::Absent) {
                    return false;
                }
            }
            self.do_add_row(s, r);
            if !s.qsets.is_empty() {
                self.try_add_qset(s, r);
            } else if !s.lhs.is_empty() {
                self.try_add_lead_head(s, r);
            }
        }
        true
    }

    fn remove_row(&mut self, s: &State, r: RowIdx, new_state: LeadState) -> bool {
        if self.effectively_present(s, r) || new_state == LeadState::Disallowed {
            if s.leads[r.index()] == LeadState::Required {
                return false;
            }
            // Disallowing an absent row still records a negative entry so
            // that commit flips its state; commit only adjusts the score
            // for rows which were actually present
            self.do_rm_row(s, r);
            if !s.qsets.is_empty() {
                self.remove_qset(s, r);
            } else if !s.lhs.is_empty() {
                self.remove_lead_head(s, r);
            }
        }
        true
    }

    /* ===== per-lead linkage ===== */

    fn try_add_lead_head(&mut self, s: &State, r: RowIdx) {
        if self.effectively_present(s, r) && self.get_linkage(s, r).is_none() {
            for (i, (fwd, _)) in s.lhs.iter().enumerate() {
                let p = r * fwd;
                if p != r && self.effectively_present(s, p) {
                    self.do_add_link(s, r, i);
                    break;
                }
            }
        }
        // The rows which precede `r` may now be linkable through it
        for (i, (_, back)) in s.lhs.iter().enumerate() {
            let p = r * back;
            if p != r
                && self.effectively_present(s, p)
                && self.get_linkage(s, p).is_none()
            {
                self.do_add_link(s, p, i);
            }
        }
    }

    fn remove_lead_head(&mut self, s: &State, r: RowIdx) {
        if self.get_linkage(s, r).is_some() {
            self.do_rm_link(s, r);
        }
        // Rows which were linked through `r` must re-link elsewhere
        for (i, (_, back)) in s.lhs.iter().enumerate() {
            let p = r * back;
            if self.get_linkage(s, p) == Some(i) {
                self.do_rm_link(s, p);
                self.try_add_lead_head(s, p);
            }
        }
    }

    /* ===== Q-set linkage ===== */

    fn try_add_qset(&mut self, s: &State, r: RowIdx) {
        if !self.effectively_present(s, r) || self.get_linkage(s, r).is_some() {
            return;
        }
        for (qi, qset) in s.qsets.iter().enumerate() {
            let mut complete = true;
            for (i, (col, _)) in qset.members.iter().enumerate() {
                let q = r * col;
                let is_self =
                    q == r || qset.members[..i].iter().any(|(c2, _)| r * c2 == q);
                if !is_self && !self.effectively_present(s, q) {
                    complete = false;
                    break;
                }
            }
            if complete {
                if self.get_linkage(s, r).is_none() {
                    self.do_add_link(s, r, qi);
                }
                for (col, inverse_qset) in &qset.members {
                    let q = r * col;
                    if self.get_linkage(s, q).is_none() {
                        self.do_add_link(s, q, *inverse_qset);
                    }
                }
            }
        }
    }

    fn remove_qset(&mut self, s: &State, r: RowIdx) {
        if self.get_linkage(s, r).is_none() {
            return;
        }
        self.do_rm_link(s, r);

        // Remove the links which pointed back through `r`
        for qset in &s.qsets {
            for (col, inverse_qset) in &qset.members {
                let q = r * col;
                if self.get_linkage(s, q) == Some(*inverse_qset) {
                    self.do_rm_link(s, q);
                }
            }
        }
        // Then re-link through whatever remains
        for qset in &s.qsets {
            for (col, _) in &qset.members {
                let q = r * col;
                self.try_add_qset(s, q);
            }
        }
    }

    /// Removes `r` if it is present but unlinked; returns whether anything
    /// was pruned.
    fn prune_unlinked(&mut self, s: &State, r: RowIdx) -> bool {
        if self.effectively_present(s, r) && self.get_linkage(s, r).is_none() {
            self.do_rm_row(s, r);
            if !s.qsets.is_empty() {
                self.remove_qset(s, r);
            } else if !s.lhs.is_empty() {
                self.remove_lead_head(s, r);
            }
            true
        } else {
            false
        }
    }

    fn delta(&self, s: &State) -> f64 {
        if ENABLE_CHECKS {
            let mut real = 0.0;
            for w in self.rdiff.values() {
                real += w;
            }
            for (count, _) in self.ldiff.values() {
                real += *count as f64 * s.link_weight;
            }
            debug_assert!((real - self.delta).abs() < 1e-9);
        }
        self.delta
    }

    /// Applies the collected changes.  `add`/`rm` select the states rows
    /// flip to, so the initial setup can commit permanently
    /// (required/disallowed) with the same machinery.
    fn commit(self, s: &mut State, add: LeadState, rm: LeadState) {
        for (r, w) in &self.rdiff {
            let was_present = s.is_present(*r);
            if (*w > 0.0 && !was_present) || (*w < 0.0 && was_present) {
                s.score += w;
                s.len = if *w > 0.0 { s.len + 1 } else { s.len - 1 };
            }
            s.leads[r.index()] = if *w > 0.0 { add } else { rm };
        }
        for (r, (count, tag)) in &self.ldiff {
            s.linkage[r.index()] = *tag;
            s.score += *count as f64 * s.link_weight;
            s.links = (s.links as i64 + *count as i64) as usize;
        }
        if ENABLE_CHECKS {
            debug_assert!(s.check());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rowframe::Stage;

    fn plain_bob_minor() -> Method {
        Method::parse("&x16x16x16,12", Stage::MINOR).unwrap()
    }

    fn minor_state(flags: SearchFlags) -> State {
        State::new(
            &plain_bob_minor(),
            flags,
            &Group::trivial(Stage::MINOR),
            &[],
            &[],
            &Weighting::default(),
        )
        .unwrap()
    }

    #[test]
    fn clear_resets_everything() {
        let mut state = minor_state(SearchFlags::default());
        assert_eq!(state.table_size(), 120); // 5! lead heads
        assert_eq!(state.length(), 0);
        assert!(state.check());

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        state.set_beta(3.0);
        for _ in 0..500 {
            state.perturb(&mut rng);
        }
        assert!(state.check());
        state.clear().unwrap();
        assert_eq!(state.length(), 0);
        assert!(state.check());
    }

    #[test]
    fn perturbation_respects_falseness() {
        let mut state = minor_state(SearchFlags::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        state.set_beta(10.0);
        for _ in 0..2000 {
            state.perturb(&mut rng);
        }
        // check() verifies no two present leads are mutually false
        assert!(state.check());
        assert!(state.length() > 0);
    }

    #[test]
    fn annealing_is_reproducible() {
        let mut lengths = Vec::new();
        for _ in 0..2 {
            let mut state = minor_state(SearchFlags::default());
            let mut rng = ChaCha8Rng::seed_from_u64(12345);
            state.anneal(5_000, &mut rng);
            lengths.push(state.length());
        }
        assert_eq!(lengths[0], lengths[1]);
        assert!(lengths[0] > 0);
    }

    #[test]
    fn required_rows_stay_present() {
        let required = vec![RowBuf::parse("134256").unwrap()];
        let mut state = State::new(
            &plain_bob_minor(),
            SearchFlags::default(),
            &Group::trivial(Stage::MINOR),
            &required,
            &[],
            &Weighting::default(),
        )
        .unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        state.anneal(2_000, &mut rng);
        assert!(state
            .present_rows()
            .any(|r| r == RowBuf::parse("134256").unwrap().as_row()));
    }

    #[test]
    fn linked_leads_prune_to_fully_linked() {
        // Per-lead linkage through the plain lead and a fourths-place bob
        let mut state = State::new(
            &plain_bob_minor(),
            SearchFlags {
                in_course: true,
                ..Default::default()
            },
            &Group::trivial(Stage::MINOR),
            &[],
            &[Change::parse("14", Stage::MINOR).unwrap()],
            &Weighting::default(),
        )
        .unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(99);
        state.anneal(20_000, &mut rng);
        state.prune_unlinked();
        assert!(state.fully_linked());
        assert!(state.check());
    }

    #[test]
    fn whole_course_qsets() {
        // Tenors-together whole courses of Plain Bob Major with a bob
        let pb_major = Method::parse("&x18x18x18x18,12", Stage::MAJOR).unwrap();
        let state = State::new(
            &pb_major,
            SearchFlags {
                whole_courses: true,
                tenors_together: true,
                in_course: true,
                ..Default::default()
            },
            &Group::trivial(Stage::MAJOR),
            &[],
            &[Change::parse("14", Stage::MAJOR).unwrap()],
            &Weighting::default(),
        )
        .unwrap();
        assert!(state.has_linkage());
        assert!(!state.qsets.is_empty());
        assert!(state.check());
    }

    #[test]
    fn in_course_per_lead_tables() {
        let state = minor_state(SearchFlags {
            in_course: true,
            ..Default::default()
        });
        assert_eq!(state.table_size(), 60);
    }
}
