//! Splice analysis: the group structure linking the mutual lead heads of
//! two methods, and grouping of method collections by their splices.

use rowframe::falseness::{generate_group, FalseLeadTable, LeadFalseness};
use rowframe::{Bell, Group, Method};

/// Options for computing a splice.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpliceOptions {
    pub in_course_only: bool,
    pub half_lead: bool,
}

/// The splice between two methods: the closure of their mutual falseness
/// into a group of lead-head transpositions.
pub struct Splice {
    group: Group,
}

impl Splice {
    pub fn between(a: &Method, b: &Method, options: SpliceOptions) -> Splice {
        let flags = LeadFalseness {
            in_course_only: options.in_course_only,
            half_lead_only: options.half_lead,
            no_fixed_treble: false,
        };
        let table = FalseLeadTable::from_methods(a, b, flags);
        let group = if table.is_empty() {
            Group::trivial(a.stage())
        } else {
            generate_group(table.iter().map(|r| r.to_owned()))
        };
        Splice { group }
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.group.len()
    }

    #[inline]
    pub fn group(&self) -> &Group {
        &self.group
    }

    /// A splice of order 1 links no leads beyond the shared ones.
    pub fn is_trivial(&self) -> bool {
        self.group.len() <= 1
    }

    /// The bell fixed by every element of the splice group (other than the
    /// treble), if there is exactly one.
    pub fn pivot(&self) -> Option<Bell> {
        let stage = self.group.stage();
        let mut fixed: Vec<Bell> = stage
            .bells()
            .skip(1)
            .filter(|b| self.group.iter().all(|r| r[b.index()] == *b))
            .collect();
        if fixed.len() == 1 {
            fixed.pop()
        } else {
            None
        }
    }

    /// The pair of bells which every element either fixes or swaps, if
    /// there is exactly one such pair moving.
    pub fn swapping_pair(&self) -> Option<(Bell, Bell)> {
        let stage = self.group.stage();
        let mut pair = None;
        for a in stage.bells() {
            for b in stage.bells() {
                if b <= a {
                    continue;
                }
                let swaps_or_fixes = self.group.iter().all(|r| {
                    (r[a.index()] == a && r[b.index()] == b)
                        || (r[a.index()] == b && r[b.index()] == a)
                });
                let moves = self
                    .group
                    .iter()
                    .any(|r| r[a.index()] != a);
                if swaps_or_fixes && moves {
                    if pair.is_some() {
                        return None;
                    }
                    pair = Some((a, b));
                }
            }
        }
        pair
    }

    /// A human-readable description like `6-lead (pivot: 8)`.
    pub fn describe(&self) -> String {
        let order = self.order();
        if order <= 1 {
            return "no splice".to_owned();
        }
        let mut s = if order % 2 == 0 {
            format!("{}-lead", order / 2)
        } else {
            format!("order-{}", order)
        };
        if let Some(p) = self.pivot() {
            s.push_str(&format!(" (pivot: {})", p));
        } else if let Some((a, b)) = self.swapping_pair() {
            s.push_str(&format!(" (swap: {}{})", a, b));
        }
        s
    }
}

/// Partitions a collection of methods into classes linked by non-trivial
/// splices.  Returns the classes as index lists, each with the description
/// of one linking splice.
pub fn group_methods(methods: &[Method], options: SpliceOptions) -> Vec<(Vec<usize>, String)> {
    let n = methods.len();
    let mut class_of: Vec<usize> = (0..n).collect();

    fn find(class_of: &mut Vec<usize>, i: usize) -> usize {
        if class_of[i] != i {
            let root = find(class_of, class_of[i]);
            class_of[i] = root;
        }
        class_of[i]
    }

    let mut descriptions: Vec<Option<String>> = vec![None; n];
    for i in 0..n {
        for j in i + 1..n {
            if methods[i].stage() != methods[j].stage() {
                continue;
            }
            let splice = Splice::between(&methods[i], &methods[j], options);
            if !splice.is_trivial() {
                let (ri, rj) = (find(&mut class_of, i), find(&mut class_of, j));
                if ri != rj {
                    class_of[rj] = ri;
                }
                let root = find(&mut class_of, i);
                descriptions[root].get_or_insert_with(|| splice.describe());
            }
        }
    }

    let mut classes: Vec<(Vec<usize>, String)> = Vec::new();
    let mut roots: Vec<usize> = Vec::new();
    for i in 0..n {
        let root = find(&mut class_of, i);
        match roots.iter().position(|&r| r == root) {
            Some(k) => classes[k].0.push(i),
            None => {
                roots.push(root);
                classes.push((
                    vec![i],
                    descriptions[root].clone().unwrap_or_else(|| "no splice".to_owned()),
                ));
            }
        }
    }
    classes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowframe::Stage;

    fn cambridge() -> Method {
        Method::parse("&x3x4x2x3x4x5,2", Stage::MINOR).unwrap()
    }

    fn primrose() -> Method {
        // Cambridge above, with a 6ths-place lead end
        Method::parse("&x3x4x2x3x4x5,6", Stage::MINOR).unwrap()
    }

    #[test]
    fn identical_methods_have_a_full_splice() {
        let splice = Splice::between(&cambridge(), &cambridge(), SpliceOptions::default());
        assert!(!splice.is_trivial());
    }

    #[test]
    fn cambridge_primrose_lead_splice() {
        // Cambridge and Primrose differ only in the lead end, the classic
        // lead splice
        let splice = Splice::between(&cambridge(), &primrose(), SpliceOptions::default());
        assert!(!splice.is_trivial());
        assert_eq!(splice.order() % 2, 0);
    }

    #[test]
    fn grouping() {
        let methods = vec![cambridge(), primrose()];
        let classes = group_methods(&methods, SpliceOptions::default());
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].0, vec![0, 1]);
    }
}
