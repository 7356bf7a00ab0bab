//! Join plans: assignments of methods to lead heads, and the search for
//! call sequences which ring exactly the planned leads and come round.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use bit_vec::BitVec;

use rowframe::multtab::TableError;
use rowframe::{
    Change, ExtentIterator, Group, InCourseExtentIterator, Method, MultTable, Parity,
    PostCol, RowBuf, RowIdx, Stage,
};

/// A plan: each lead head rings one method.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Lead head -> index into the method list
    pub assignments: BTreeMap<RowBuf, usize>,
}

impl Plan {
    /// Two plans are equal up to rotation when one is obtained from the
    /// other by right-composing every lead head with a fixed row.  The
    /// canonical form is the lexicographically least such rotation.
    pub fn canonical_form(&self) -> Vec<(RowBuf, usize)> {
        let mut best: Option<Vec<(RowBuf, usize)>> = None;
        for key in self.assignments.keys() {
            let x = key.inv();
            let mut rotated: Vec<(RowBuf, usize)> = self
                .assignments
                .iter()
                .map(|(k, &m)| (k.as_row() * &x, m))
                .collect();
            rotated.sort();
            if best.as_ref().map_or(true, |b| rotated < *b) {
                best = Some(rotated);
            }
        }
        best.unwrap_or_default()
    }
}

/// One lead of a discovered touch: which method was rung and which call
/// ended the lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchLead {
    pub method: usize,
    pub call: usize,
}

/// Searches for every sequence of calls which starts from rounds, visits
/// exactly the planned lead heads in their planned methods, and returns to
/// rounds.  The call list must include the plain lead-end change.
pub struct JoinPlanSearch {
    table: MultTable,
    /// Method index for each coset, `None` outside the plan
    plan: Vec<Option<usize>>,
    /// Post-column of each (deduplicated) method's lead-end row
    lead_ends: Vec<PostCol>,
    /// Rows per lead of each method
    lead_lens: Vec<usize>,
    call_cols: Vec<PostCol>,
    min_leads: usize,
    max_leads: usize,
}

/// The ways a [`JoinPlanSearch`] can fail to build.
#[derive(Debug)]
pub enum PlanError {
    Table(TableError),
    LeadHeadOutsideTable(RowBuf),
}

impl Display for PlanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanError::Table(e) => write!(f, "{}", e),
            PlanError::LeadHeadOutsideTable(r) => {
                write!(f, "plan lead head '{}' is outside the table", r)
            }
        }
    }
}

impl std::error::Error for PlanError {}

impl JoinPlanSearch {
    pub fn new(
        stage: Stage,
        plan: &BTreeMap<RowBuf, Method>,
        calls: &[Change],
        leads_range: (usize, usize),
    ) -> Result<Self, PlanError> {
        let n = stage.num_bells();
        let in_course = Self::is_in_course(plan, calls);
        let trivial = Group::trivial(stage);
        let table = if in_course {
            MultTable::new(InCourseExtentIterator::new(n - 1, 1, stage), &trivial, None)
        } else {
            MultTable::new(ExtentIterator::new(n - 1, 1, stage), &trivial, None)
        }
        .map_err(PlanError::Table)?;

        // Deduplicate the methods by their lead (without its final change):
        // the lead-end row determines where calls take effect
        let mut methods: Vec<Vec<Change>> = Vec::new();
        let mut lead_ends = Vec::new();
        let mut lead_lens = Vec::new();
        let mut plan_vec: Vec<Option<usize>> = vec![None; table.len()];
        for (lead_head, method) in plan {
            let body: Vec<Change> =
                method.changes()[..method.lead_len() - 1].to_vec();
            let meth_idx = match methods.iter().position(|m| *m == body) {
                Some(i) => i,
                None => {
                    let lead_end_row = Method::new(stage, body.clone()).lead_head();
                    lead_ends.push(
                        table
                            .compute_post_col(&lead_end_row)
                            .map_err(PlanError::Table)?,
                    );
                    lead_lens.push(body.len() + 1);
                    methods.push(body);
                    methods.len() - 1
                }
            };
            let idx = table
                .find(lead_head)
                .ok_or_else(|| PlanError::LeadHeadOutsideTable(lead_head.clone()))?;
            plan_vec[idx.index()] = Some(meth_idx);
        }

        let mut call_cols = Vec::with_capacity(calls.len());
        for call in calls {
            call_cols.push(
                table
                    .compute_post_col(&call.to_row())
                    .map_err(PlanError::Table)?,
            );
        }

        Ok(JoinPlanSearch {
            table,
            plan: plan_vec,
            lead_ends,
            lead_lens,
            call_cols,
            min_leads: leads_range.0,
            max_leads: leads_range.1,
        })
    }

    fn is_in_course(plan: &BTreeMap<RowBuf, Method>, calls: &[Change]) -> bool {
        let Some(first) = plan.values().next() else {
            return true;
        };
        let le_parity = first.lead_end_change().parity();
        for method in plan.values() {
            if method.lead_head().parity() == Parity::Odd {
                return false;
            }
            if method.lead_end_change().parity() != le_parity {
                return false;
            }
        }
        calls.iter().all(|c| c.parity() == le_parity)
    }

    /// Runs the backtracking search, calling `emit` once per touch.  `emit`
    /// returns `false` to halt the search.
    pub fn run(&self, emit: &mut dyn FnMut(&[TouchLead]) -> bool) {
        let rounds_idx = self
            .table
            .find(&RowBuf::rounds(self.table.stage()))
            .expect("rounds is always in the table");
        let mut visited = BitVec::from_elem(self.table.len(), false);
        let mut touch: Vec<TouchLead> = Vec::new();
        let mut halted = false;
        self.recurse(rounds_idx, 0, &mut visited, &mut touch, emit, &mut halted);
    }

    #[allow(clippy::too_many_arguments)]
    fn recurse(
        &self,
        lead_head: RowIdx,
        depth: usize,
        visited: &mut BitVec,
        touch: &mut Vec<TouchLead>,
        emit: &mut dyn FnMut(&[TouchLead]) -> bool,
        halted: &mut bool,
    ) {
        if *halted {
            return;
        }
        let Some(meth) = self.plan[lead_head.index()] else {
            return; // outside the plan
        };
        let lead_end = lead_head * &self.lead_ends[meth];

        if visited[lead_head.index()] || visited[lead_end.index()] {
            // The touch would repeat; accept it if it has come round
            if depth >= self.min_leads && self.table.row(lead_head).is_rounds() {
                if !emit(touch) {
                    *halted = true;
                }
            }
            return;
        }
        if depth >= self.max_leads {
            return;
        }

        visited.set(lead_head.index(), true);
        visited.set(lead_end.index(), true);
        for (call_idx, call_col) in self.call_cols.iter().enumerate() {
            touch.push(TouchLead {
                method: meth,
                call: call_idx,
            });
            self.recurse(
                lead_end * call_col,
                depth + self.lead_lens[meth],
                visited,
                touch,
                emit,
                halted,
            );
            touch.pop();
            if *halted {
                break;
            }
        }
        visited.set(lead_end.index(), false);
        visited.set(lead_head.index(), false);
    }

    /// Formats a touch as its call string, one symbol per lead (`.` for the
    /// first call, which should be the plain lead end).
    pub fn call_string(touch: &[TouchLead], call_symbols: &[&str]) -> String {
        touch
            .iter()
            .map(|l| call_symbols.get(l.call).copied().unwrap_or("?"))
            .collect()
    }
}

/// Builds a plan ringing a single method's plain course.
pub fn plain_course_plan(method: &Method) -> BTreeMap<RowBuf, Method> {
    let mut plan = BTreeMap::new();
    let lh = method.lead_head();
    let mut head = RowBuf::rounds(method.stage());
    loop {
        plan.insert(head.clone(), method.clone());
        head = &head * &lh;
        if head.is_rounds() {
            return plan;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_bob_minor() -> Method {
        Method::parse("&x16x16x16,12", Stage::MINOR).unwrap()
    }

    #[test]
    fn plain_course_comes_round() {
        let m = plain_bob_minor();
        let plan = plain_course_plan(&m);
        assert_eq!(plan.len(), 5);

        // Only the plain lead-end change: the only touch is the plain course
        let calls = vec![m.lead_end_change().clone()];
        let search = JoinPlanSearch::new(Stage::MINOR, &plan, &calls, (0, 100)).unwrap();
        let mut touches = Vec::new();
        search.run(&mut |touch| {
            touches.push(touch.to_vec());
            true
        });
        assert_eq!(touches.len(), 1);
        assert_eq!(touches[0].len(), 5);
    }

    #[test]
    fn bobbed_touches_of_plain_bob() {
        let m = plain_bob_minor();
        // Allow every in-course lead head, any of the 5 working-bell
        // rotations of the course, by planning the whole in-course extent
        let mut plan = BTreeMap::new();
        for lh in InCourseExtentIterator::new(5, 1, Stage::MINOR) {
            plan.insert(lh, m.clone());
        }
        let plain = m.lead_end_change().clone();
        let bob = Change::parse("14", Stage::MINOR).unwrap();
        // Cap the length at three leads: the only touch that short is the
        // classic bob course (bob at every lead end)
        let search = JoinPlanSearch::new(Stage::MINOR, &plan, &[plain, bob], (0, 36)).unwrap();

        let mut touches = Vec::new();
        search.run(&mut |touch| {
            touches.push(touch.to_vec());
            true
        });
        assert!(touches
            .iter()
            .any(|t| t.len() == 3 && t.iter().all(|l| l.call == 1)));
        assert!(touches.iter().all(|t| t.len() <= 3));
    }

    #[test]
    fn canonical_rotation() {
        let m = plain_bob_minor();
        let lh = m.lead_head();
        let rounds = RowBuf::rounds(Stage::MINOR);
        let plan1 = Plan {
            assignments: [(rounds, 0usize), (lh.clone(), 0)].into_iter().collect(),
        };
        // The same plan, rotated on by a lead
        let plan2 = Plan {
            assignments: plan1
                .assignments
                .keys()
                .map(|k| (k.as_row() * &lh, 0usize))
                .collect(),
        };
        assert_ne!(plan1.assignments, plan2.assignments);
        assert_eq!(plan1.canonical_form(), plan2.canonical_form());
    }
}
