//! Falseness-based acceptance tests: clean-proof-scale, falseness group
//! codes, and extent feasibility.

use std::collections::HashMap;

use rowframe::falseness::{CourseFalseness, FalseCourseTable, FalseLeadTable, LeadFalseness};
use rowframe::{Method, Parity, RowBuf, Stage};

/// The falseness group codes of a method (tenors-together below Major, the
/// whole table on Major, matching the traditional tables).
pub fn falseness_group_codes(m: &Method) -> String {
    let flags = if m.stage() == Stage::MAJOR {
        CourseFalseness::default()
    } else {
        CourseFalseness {
            tenors_together: true,
            ..Default::default()
        }
    };
    FalseCourseTable::new(m, flags).symbols()
}

/// Is the method clean-proof-scale: no tenors-together in-course falseness
/// beyond the trivial class?
pub fn is_cps(m: &Method) -> bool {
    if m.stage().num_bells() >= 8 {
        let fchs = FalseCourseTable::new(
            m,
            CourseFalseness {
                in_course_only: true,
                tenors_together: true,
            },
        );
        fchs.len() == 1
    } else {
        let fchs = FalseCourseTable::new(
            m,
            CourseFalseness {
                in_course_only: true,
                ..Default::default()
            },
        );
        // With an in-course lead end, plain-hunting falseness contributes
        // one extra class
        if m.lead_end_change().parity() == Parity::Even {
            fchs.len() == 2
        } else {
            fchs.len() == 1
        }
    }
}

/// Extent feasibility: for an extent to be reachable with single-change
/// lead-end calls, the graph of mutually false lead heads must be
/// 2-colourable.
pub fn might_support_extent(m: &Method) -> bool {
    two_colourable(m, false)
}

/// The in-course variant: can the positive half of the extent be covered?
pub fn might_support_positive_extent(m: &Method) -> bool {
    two_colourable(m, true)
}

fn two_colourable(m: &Method, in_course_only: bool) -> bool {
    let table = FalseLeadTable::new(
        m,
        LeadFalseness {
            in_course_only,
            ..Default::default()
        },
    );

    let mut signs: HashMap<RowBuf, i8> = HashMap::new();
    let mut stack = vec![(RowBuf::rounds(m.stage()), 1i8)];
    while let Some((r, sign)) = stack.pop() {
        if let Some(&existing) = signs.get(&r) {
            if existing != sign {
                return false;
            }
            continue;
        }
        for f in table.iter() {
            if !f.is_rounds() {
                stack.push((&r * f, -sign));
            }
        }
        signs.insert(r, sign);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bristol_is_cps() {
        let bristol =
            Method::parse("&x58x14.58x58.36.14x14.58x14x18,18", Stage::MAJOR).unwrap();
        assert!(is_cps(&bristol));
    }

    #[test]
    fn plain_bob_extent_feasibility() {
        // The extent of Plain Bob Minor is famously possible
        let pb = Method::parse("&x16x16x16,12", Stage::MINOR).unwrap();
        assert!(might_support_extent(&pb));
    }

    #[test]
    fn group_codes_empty_off_major() {
        let pb = Method::parse("&x16x16x16,12", Stage::MINOR).unwrap();
        assert_eq!(falseness_group_codes(&pb), "");
    }
}
