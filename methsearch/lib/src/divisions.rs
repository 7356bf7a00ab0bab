//! Checks on partial methods: runs of blows in one place, internal truth of
//! a division, and the division parity rule.

use rowframe::{Change, Parity, RowBuf};

/// Would appending `c` give some bell more than `max` consecutive blows in
/// one place?  Counts backwards from the end of the partial method;
/// `stop_off`, when given, truncates the lookback (used around a shifted
/// symmetry point).
pub(crate) fn is_too_many_places(
    changes: &[Change],
    c: &Change,
    max: usize,
    stop_off: Option<usize>,
) -> bool {
    let stage = c.stage();
    for place in 0..stage.num_bells() {
        if !c.finds_place(place) {
            continue;
        }
        let mut count = 2usize;
        while count <= changes.len() + 1 {
            let o = changes.len() + 1 - count;
            if stop_off == Some(o) || !changes[o].finds_place(place) {
                break;
            }
            count += 1;
        }
        if count > max {
            return true;
        }
    }
    false
}

/// Is the current division internally false once `c` is appended?  Only
/// meaningful when the division is longer than a single dodge.
pub(crate) fn is_division_false(
    changes: &[Change],
    c: &Change,
    div_start: usize,
    cur_div_len: usize,
) -> bool {
    let len = changes.len();
    if len - div_start < 3 || len - div_start == cur_div_len - 1 {
        return false;
    }

    let mut r = RowBuf::rounds(c.stage());
    let mut rows = Vec::with_capacity(cur_div_len);
    rows.push(r.clone());
    for change in &changes[div_start..] {
        change.permute(&mut r);
        rows.push(r.clone());
    }
    c.permute(&mut r);
    rows.contains(&r)
}

/// The parity rule for four-blow divisions: each stroke of the division
/// must contain equally many even and odd rows.
pub(crate) fn division_bad_parity_hack(
    changes: &[Change],
    c: &Change,
    div_start: usize,
    cur_div_len: usize,
) -> bool {
    let mut r = RowBuf::rounds(c.stage());
    let mut rows = Vec::with_capacity(cur_div_len);
    rows.push(r.clone());
    for change in &changes[div_start..] {
        change.permute(&mut r);
        rows.push(r.clone());
    }
    c.permute(&mut r);
    rows.push(r);
    debug_assert_eq!(rows.len(), cur_div_len);

    let mut even = [0usize; 2];
    let mut odd = [0usize; 2];
    for (i, row) in rows.iter().enumerate() {
        if row.parity() == Parity::Even {
            even[i % 2] += 1;
        } else {
            odd[i % 2] += 1;
        }
    }
    even[0] != odd[0] || even[1] != odd[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowframe::Stage;

    fn ch(s: &str) -> Change {
        Change::parse(s, Stage::MINOR).unwrap()
    }

    #[test]
    fn too_many_places() {
        // 36.36 gives three blows in 3rds and 6ths
        let m = vec![ch("36")];
        assert!(is_too_many_places(&m, &ch("36"), 2, None));
        assert!(!is_too_many_places(&m, &ch("36"), 3, None));
        assert!(!is_too_many_places(&m, &ch("14"), 2, None));
    }

    #[test]
    fn division_falseness() {
        // x.x repeats the first row of the division
        let m = vec![ch("-"), ch("16"), ch("-")];
        assert!(is_division_false(&m, &ch("-"), 0, 8));
        assert!(!is_division_false(&m, &ch("12"), 0, 8));
    }
}
