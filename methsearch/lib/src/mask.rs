//! Compiling a method mask into per-position lists of candidate changes.
//!
//! A mask is a sequence of blocks, each of which may be palindromic (`&`),
//! may contain `?` (any change here), one `*` (any number of changes),
//! `(pn|pn|...)` alternative lists, and may be split into above/below
//! sections with `/`.  Unconstrained positions are filled by enumerating
//! the changes possible above and below the treble and merging them.

use std::fmt::{Display, Formatter};

use rowframe::{Bell, Change, ChangesIterator, PlaceNotationError, Stage};

use crate::params::SearchParams;

/// A per-position list of allowed changes.  An empty list inside a block
/// means "unconstrained" until expansion; after [`compile_mask`] every
/// position is non-empty.
type Slots = Vec<Vec<Change>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskError {
    Pn(PlaceNotationError),
    MissingBlock,
    UnterminatedAlternatives,
    MalformedAlternatives,
    EmptyAlternatives,
    MultipleStars,
    MultipleSlashes,
    SectionsInPrinciple,
    MismatchedSections,
    WrongLength { found: usize, expected: usize },
    SymmetryPointStar,
    InconsistentWithSymmetry,
    NoPossibleChange { position: usize },
    ChangesIncompatibleWithSymmetry,
}

impl Display for MaskError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MaskError::Pn(e) => write!(f, "{}", e),
            MaskError::MissingBlock => write!(f, "missing block in mask"),
            MaskError::UnterminatedAlternatives => write!(f, "unterminated '(' in mask"),
            MaskError::MalformedAlternatives => {
                write!(f, "malformed list of alternatives in mask")
            }
            MaskError::EmptyAlternatives => write!(f, "mask contains an empty alternative list"),
            MaskError::MultipleStars => write!(f, "mask must contain at most one '*'"),
            MaskError::MultipleSlashes => write!(f, "block may contain at most one '/'"),
            MaskError::SectionsInPrinciple => write!(
                f,
                "masks for principles may not contain above and below sections"
            ),
            MaskError::MismatchedSections => {
                write!(f, "above and below blocks are of different sizes")
            }
            MaskError::WrongLength { found, expected } => write!(
                f,
                "the mask was of the wrong length: found {} changes; expected {}",
                found, expected
            ),
            MaskError::SymmetryPointStar => write!(
                f,
                "a '*' cannot fill this number of changes at the symmetry point"
            ),
            MaskError::InconsistentWithSymmetry => write!(
                f,
                "some of the required changes are inconsistent with the specified symmetries"
            ),
            MaskError::NoPossibleChange { position } => write!(
                f,
                "no such method can exist: there are no possible changes at position {}",
                position
            ),
            MaskError::ChangesIncompatibleWithSymmetry => write!(
                f,
                "the --changes argument is not compatible with the symmetries requested"
            ),
        }
    }
}

impl std::error::Error for MaskError {}

impl From<PlaceNotationError> for MaskError {
    fn from(e: PlaceNotationError) -> Self {
        MaskError::Pn(e)
    }
}

//////////////////////
// TREBLE POSITIONS //
//////////////////////

/// The positions of the (lowest, highest) hunt bells at change `depth`:
/// `0` means moving between places 1-2, `1` between 2-3, and so on.  `-1`
/// is the lead-end change.
pub(crate) fn hunt_range(params: &SearchParams, depth: usize) -> (isize, isize) {
    let div_len = params.div_len() as isize;
    let hl_len = (params.lead_len / 2) as isize;
    let depth = depth as isize;
    let n = params.stage.num_bells() as isize;
    let hunts = params.hunt_bells as isize;

    let first_hl = depth < hl_len;
    let mut posn = if first_hl { depth } else { 2 * hl_len - depth - 2 };

    if posn == -1 {
        // lead-end change
    } else if posn % div_len == div_len - 1 {
        posn = posn / div_len * 2 + 1;
    } else {
        posn = posn / div_len * 2;
    }

    if params.hunt_bells == 1 {
        return (posn, posn);
    }

    let mut a = posn + (hunts - if first_hl { 1 } else { 0 }) / 2 * 2;
    let mut b = posn - (hunts - if first_hl { 0 } else { 1 }) / 2 * 2;

    if a > n - 1 {
        a = n - 1;
    }
    if b < -1 {
        b = -2 - b;
    }
    if b > a {
        std::mem::swap(&mut a, &mut b);
    }
    if a < posn {
        a = posn;
    }
    if b > posn {
        b = posn;
    }
    (b, a)
}

///////////////////
// BLOCK PARSING //
///////////////////

struct Block {
    slots: Slots,
    is_sym: bool,
    star_idx: Option<usize>,
}

fn read_block(chars: &mut std::iter::Peekable<std::str::Chars>, stage: Stage) -> Result<Block, MaskError> {
    let skip_separators = |chars: &mut std::iter::Peekable<std::str::Chars>| {
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek() == Some(&'.') {
            chars.next();
        }
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }
    };

    while chars.peek().map_or(false, |c| c.is_whitespace()) {
        chars.next();
    }
    if chars.peek().is_none() {
        return Err(MaskError::MissingBlock);
    }

    let mut block = Block {
        slots: Vec::new(),
        is_sym: false,
        star_idx: None,
    };
    if let Some(&c) = chars.peek() {
        if c == '&' || c == '+' {
            block.is_sym = c == '&';
            chars.next();
            skip_separators(chars);
        }
    }

    while let Some(&c) = chars.peek() {
        match c {
            '(' => {
                chars.next();
                let mut alternatives = Vec::new();
                let mut token = String::new();
                loop {
                    match chars.next() {
                        Some(')') => {
                            if !token.is_empty() {
                                alternatives.push(Change::parse(&token, stage)?);
                            }
                            break;
                        }
                        Some('|') => {
                            if !token.is_empty() {
                                alternatives.push(Change::parse(&token, stage)?);
                                token.clear();
                            }
                        }
                        Some(c) if Bell::is_symbol(c) || matches!(c, 'x' | 'X' | '-') => {
                            token.push(c)
                        }
                        Some(_) => return Err(MaskError::MalformedAlternatives),
                        None => return Err(MaskError::UnterminatedAlternatives),
                    }
                }
                if alternatives.is_empty() {
                    return Err(MaskError::EmptyAlternatives);
                }
                block.slots.push(alternatives);
            }
            'X' | 'x' | '-' => {
                chars.next();
                block.slots.push(vec![Change::cross(stage)?]);
            }
            '*' => {
                chars.next();
                if block.star_idx.is_some() {
                    return Err(MaskError::MultipleStars);
                }
                block.star_idx = Some(block.slots.len());
                block.slots.push(Vec::new()); // expanded later
            }
            '?' => {
                chars.next();
                block.slots.push(Vec::new());
            }
            c if Bell::is_symbol(c) => {
                let mut token = String::new();
                while let Some(&c) = chars.peek() {
                    if Bell::is_symbol(c) && c != 'X' && c != 'x' {
                        token.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                block.slots.push(vec![Change::parse(&token, stage)?]);
            }
            _ => break,
        }
        skip_separators(chars);
    }

    if block.is_sym {
        // Mirror all but the last slot; the star index stays in the first half
        for i in (0..block.slots.len().saturating_sub(1)).rev() {
            block.slots.push(block.slots[i].clone());
        }
    }
    Ok(block)
}

/// Expands a `*` slot into the number of `?`s needed to reach the target
/// length.  `expand_by` is the signed shortfall before expansion.
fn expand_star(
    slots: &mut Slots,
    star_sym: bool,
    star_idx: usize,
    expand_by: isize,
) -> Result<(), MaskError> {
    if star_sym {
        debug_assert!(slots.len() % 2 == 1);
    }
    if star_sym && star_idx == (slots.len() + 1) / 2 - 1 {
        // The star sits at the symmetry point, e.g. `&-8-8-*`
        let expand_by = expand_by + 1;
        if expand_by < 0 {
            return Err(MaskError::WrongLength {
                found: slots.len(),
                expected: (slots.len() as isize + expand_by) as usize,
            });
        } else if expand_by % 2 == 0 {
            return Err(MaskError::SymmetryPointStar);
        } else if expand_by > 1 {
            for _ in 0..expand_by - 1 {
                slots.insert(star_idx, Vec::new());
            }
        }
    } else if star_sym {
        // The star appears twice by reflection, e.g. `&3.*.5.1.5`
        let expand_by = expand_by + 2;
        let mirror_idx = slots.len() - 1 - star_idx;
        if expand_by < 0 {
            return Err(MaskError::WrongLength {
                found: slots.len(),
                expected: (slots.len() as isize + expand_by) as usize,
            });
        } else if expand_by % 2 == 1 {
            return Err(MaskError::SymmetryPointStar);
        } else if expand_by == 0 {
            slots.remove(mirror_idx);
            slots.remove(star_idx);
        } else if expand_by > 3 {
            for _ in 0..expand_by / 2 - 1 {
                slots.insert(mirror_idx, Vec::new());
            }
            for _ in 0..expand_by / 2 - 1 {
                slots.insert(star_idx, Vec::new());
            }
        }
    } else {
        let expand_by = expand_by + 1;
        if expand_by < 0 {
            return Err(MaskError::WrongLength {
                found: slots.len(),
                expected: (slots.len() as isize + expand_by) as usize,
            });
        } else if expand_by == 0 {
            slots.remove(star_idx);
        } else if expand_by > 1 {
            for _ in 0..expand_by - 1 {
                slots.insert(star_idx, Vec::new());
            }
        }
    }
    Ok(())
}

/// Parses the mask into above/below slot lists of exactly `lead_len`
/// positions each.
fn read_and_expand_blocks(
    params: &SearchParams,
    lead_len: usize,
) -> Result<(Slots, Slots), MaskError> {
    // Blocks before / containing / after the `*`
    let mut block0a: Slots = Vec::new();
    let mut block0b: Slots = Vec::new();
    let mut block1a: Slots = Vec::new();
    let mut block1b: Slots = Vec::new();
    let mut block2a: Slots = Vec::new();
    let mut block2b: Slots = Vec::new();
    let mut star_a = None; // (index, is_sym)
    let mut star_b = None;

    for block_str in params.mask.split(',') {
        let mut chars = block_str.chars().peekable();
        let blka = read_block(&mut chars, params.stage)?;
        let mut got_star = false;

        let blkb = if chars.peek() == Some(&'/') {
            if params.hunt_bells == 0 {
                return Err(MaskError::SectionsInPrinciple);
            }
            chars.next();
            let blkb = read_block(&mut chars, params.stage)?;
            if chars.peek() == Some(&'/') {
                return Err(MaskError::MultipleSlashes);
            }
            match (blka.star_idx, blkb.star_idx) {
                (None, None) => {
                    if blka.slots.len() != blkb.slots.len() {
                        return Err(MaskError::MismatchedSections);
                    }
                }
                (Some(ia), Some(ib)) => {
                    if !block1a.is_empty() {
                        return Err(MaskError::MultipleStars);
                    }
                    star_a = Some((ia, blka.is_sym));
                    star_b = Some((ib, blkb.is_sym));
                    got_star = true;
                }
                (Some(ia), None) => {
                    let mut slots = blka.slots.clone();
                    expand_star(
                        &mut slots,
                        blka.is_sym,
                        ia,
                        blkb.slots.len() as isize - blka.slots.len() as isize,
                    )?;
                    let blkb_slots = blkb.slots;
                    append_sections(&mut block0a, &mut block1a, &mut block2a, slots, false);
                    append_sections(&mut block0b, &mut block1b, &mut block2b, blkb_slots, false);
                    continue;
                }
                (None, Some(ib)) => {
                    let mut slots = blkb.slots.clone();
                    expand_star(
                        &mut slots,
                        blkb.is_sym,
                        ib,
                        blka.slots.len() as isize - blkb.slots.len() as isize,
                    )?;
                    append_sections(&mut block0a, &mut block1a, &mut block2a, blka.slots, false);
                    append_sections(&mut block0b, &mut block1b, &mut block2b, slots, false);
                    continue;
                }
            }
            blkb
        } else {
            if let Some(ia) = blka.star_idx {
                if !block1a.is_empty() {
                    return Err(MaskError::MultipleStars);
                }
                star_a = Some((ia, blka.is_sym));
                star_b = Some((ia, blka.is_sym));
                got_star = true;
            }
            Block {
                slots: blka.slots.clone(),
                is_sym: blka.is_sym,
                star_idx: blka.star_idx,
            }
        };

        append_sections(&mut block0a, &mut block1a, &mut block2a, blka.slots, got_star);
        append_sections(&mut block0b, &mut block1b, &mut block2b, blkb.slots, got_star);
    }

    // Expand `*` to the right number of `?`s
    debug_assert_eq!(block0a.len(), block0b.len());
    debug_assert_eq!(block1a.is_empty(), block1b.is_empty());
    debug_assert_eq!(block2a.len(), block2b.len());

    if !block1a.is_empty() {
        let (ia, sym_a) = star_a.unwrap();
        let (ib, sym_b) = star_b.unwrap();
        let shortfall_a =
            lead_len as isize - (block0a.len() + block1a.len() + block2a.len()) as isize;
        let shortfall_b =
            lead_len as isize - (block0b.len() + block1b.len() + block2b.len()) as isize;
        expand_star(&mut block1a, sym_a, ia, shortfall_a)?;
        expand_star(&mut block1b, sym_b, ib, shortfall_b)?;
    } else if block0a.len() + block2a.len() != lead_len {
        return Err(MaskError::WrongLength {
            found: block0a.len() + block2a.len(),
            expected: lead_len,
        });
    }

    let mut above = block0a;
    above.extend(block1a);
    above.extend(block2a);
    let mut below = block0b;
    below.extend(block1b);
    below.extend(block2b);
    debug_assert_eq!(above.len(), lead_len);
    debug_assert_eq!(below.len(), lead_len);
    Ok((above, below))
}

fn append_sections(
    block0: &mut Slots,
    block1: &mut Slots,
    block2: &mut Slots,
    slots: Slots,
    got_star: bool,
) {
    let target = if got_star {
        block1
    } else if block1.is_empty() {
        block0
    } else {
        block2
    };
    target.extend(slots);
}

//////////////////////////
// CHANGE SET SELECTION //
//////////////////////////

fn change_from_swaps(swaps: &[usize], stage: Stage) -> Change {
    let mut places = Vec::new();
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
    Change::from_places(places, stage).expect("swap lists always pair up")
}

fn select_changes_above(params: &SearchParams, depth: usize) -> Vec<Change> {
    let n = params.stage.num_bells();
    let (_, hi) = hunt_range(params, depth);
    let active_above = if hi == (params.treble_back() - params.treble_front) as isize {
        n - params.treble_back()
    } else {
        (n as isize - 2 - (hi + params.treble_front as isize - 1)).max(0) as usize
    };

    let mut changes = Vec::new();
    for c in ChangesIterator::new(active_above, n - active_above, params.stage) {
        if params.right_place
            && depth % 2 == n % 2
            && n - c.count_places() != active_above
        {
            continue;
        }
        if params.no_78_pns && active_above > 1 && c.finds_place(n - 2) {
            continue;
        }
        changes.push(c);
    }
    changes
}

fn select_changes_below(params: &SearchParams, depth: usize) -> Vec<Change> {
    let (lo, _) = hunt_range(params, depth);
    let active_below = (params.treble_front as isize - 1 + lo.max(0)) as usize;

    let mut changes = Vec::new();
    for c in ChangesIterator::new(active_below, 0, params.stage) {
        if params.right_place && depth % 2 == 0 && params.stage.num_bells() - c.count_places() != active_below
        {
            continue;
        }
        if (params.skewsym || params.doubsym || params.mirrorsym)
            && params.no_78_pns
            && active_below > 1
            && c.finds_place(1)
        {
            continue;
        }
        changes.push(c);
    }
    changes
}

fn select_changes_principle(params: &SearchParams, depth: usize) -> Result<Vec<Change>, MaskError> {
    let n = params.stage.num_bells();
    if params.right_place && n % 2 == 0 && depth % 2 == 0 {
        return Ok(vec![Change::cross(params.stage)?]);
    }
    let mut changes = Vec::new();
    for c in ChangesIterator::all(params.stage) {
        if params.true_trivial && c.count_places() == n {
            continue;
        }
        if !passes_change_filters(params, &c) {
            continue;
        }
        if params.no_78_pns && c.finds_place(n - 2) {
            continue;
        }
        if (params.skewsym || params.doubsym) && params.no_78_pns && c.finds_place(1) {
            continue;
        }
        changes.push(c);
    }
    Ok(changes)
}

fn passes_change_filters(params: &SearchParams, c: &Change) -> bool {
    if let Some((include, set)) = &params.changes_filter {
        if *include != set.contains(c) {
            return false;
        }
    }
    if params.max_places_per_change != 0 && c.count_places() > params.max_places_per_change {
        return false;
    }
    if params.max_consec_places != 0 && c.longest_place_run() > params.max_consec_places {
        return false;
    }
    if params.mirrorsym && *c != c.reverse() {
        return false;
    }
    true
}

/// Combines a below-the-treble change and an above-the-treble change across
/// the hunt bells' positions.
fn merge_pair(below: &Change, above: &Change, lo: isize, hi: isize, stage: Stage) -> Change {
    let n = stage.num_bells();
    let mut swaps = Vec::new();
    let mut i = 0isize;
    while i < lo && i < n as isize - 1 {
        if below.finds_swap(i as usize) {
            swaps.push(i as usize);
            i += 1;
        }
        i += 1;
    }
    let mut i = lo.max(0);
    while i < hi && i < n as isize - 1 {
        swaps.push(i as usize);
        i += 2;
    }
    let mut i = hi.max(0);
    while i < n as isize - 1 {
        if above.finds_swap(i as usize) {
            swaps.push(i as usize);
            i += 1;
        }
        i += 1;
    }
    swaps.sort_unstable();
    swaps.dedup();
    change_from_swaps(&swaps, stage)
}

fn merge_changes(
    params: &SearchParams,
    above: &[Change],
    below: &[Change],
    depth: usize,
) -> Vec<Change> {
    let (mut lo, mut hi) = hunt_range(params, depth);
    if lo == -1 {
        lo = 0;
    }
    if hi == (params.treble_back() - params.treble_front) as isize {
        hi -= 1;
    }
    lo += params.treble_front as isize - 1;
    hi += params.treble_front as isize;

    // If the hunts are leading or lying, narrow the range accordingly
    let div_cycle = 2 * params.treble_dodges + 2;
    if lo == params.treble_front as isize - 1 && depth % div_cycle == div_cycle - 1 {
        lo += 1;
    }
    let span = params.treble_back() - params.treble_front;
    if hi == params.treble_back() as isize - 1
        && ((span % 2 == 1 && depth % div_cycle == div_cycle - 1)
            || (span % 2 == 0 && depth % 2 == 0))
    {
        hi -= 1;
    }

    let mut result = Vec::with_capacity(above.len() * below.len());
    for a in above {
        for b in below {
            let c = merge_pair(b, a, lo, hi, params.stage);
            if !passes_change_filters(params, &c) {
                continue;
            }
            result.push(c);
        }
    }
    result
}

//////////////////////////
// SYMMETRY CONSISTENCY //
//////////////////////////

fn reversed_sorted(changes: &[Change]) -> Vec<Change> {
    let mut rv: Vec<Change> = changes.iter().map(Change::reverse).collect();
    rv.sort();
    rv
}

fn unordered_equal(a: &[Change], b: &[Change]) -> bool {
    a.iter().all(|c| b.contains(c))
}

fn is_mask_consistent(params: &SearchParams, above: &Slots, below: &Slots) -> bool {
    let hl_len = (params.lead_len / 2) as isize;
    let len = 2 * hl_len;

    for depth in 0..len {
        if params.skewsym {
            let other = (if depth > hl_len { 3 } else { 1 }) * hl_len
                - (params.hunt_bells % 2) as isize * 2
                - depth;
            if (0..len).contains(&other) && other != depth {
                let (d, o) = (depth as usize, other as usize);
                if !above[d].is_empty()
                    && !below[o].is_empty()
                    && !unordered_equal(&above[d], &reversed_sorted(&below[o]))
                {
                    return false;
                }
                if !below[d].is_empty()
                    && !above[o].is_empty()
                    && !unordered_equal(&below[d], &reversed_sorted(&above[o]))
                {
                    return false;
                }
            }
        }
        if params.doubsym {
            let other = ((depth + hl_len) % len) as usize;
            let d = depth as usize;
            if !above[d].is_empty()
                && !below[other].is_empty()
                && !unordered_equal(&above[d], &reversed_sorted(&below[other]))
            {
                return false;
            }
            if !below[d].is_empty()
                && !above[other].is_empty()
                && !unordered_equal(&below[d], &reversed_sorted(&above[other]))
            {
                return false;
            }
        }
        if params.sym {
            let other = 2 * (hl_len - (params.hunt_bells % 2) as isize) - depth;
            if (0..len).contains(&other) {
                let (d, o) = (depth as usize, other as usize);
                if !above[d].is_empty()
                    && !above[o].is_empty()
                    && !unordered_equal(&above[d], &above[o])
                {
                    return false;
                }
                if !below[d].is_empty()
                    && !below[o].is_empty()
                    && !unordered_equal(&below[d], &below[o])
                {
                    return false;
                }
            }
        }
    }
    true
}

/////////////////
// ENTRY POINT //
/////////////////

/// Restricts an explicit `--changes` set to one compatible with the
/// requested symmetries.
pub fn restrict_changes(params: &mut SearchParams) -> Result<(), MaskError> {
    let Some((include, set)) = &mut params.changes_filter else {
        return Ok(());
    };
    if params.skewsym || params.doubsym {
        let asymmetries: Vec<Change> = set
            .iter()
            .filter(|c| !set.contains(&c.reverse()))
            .cloned()
            .collect();
        for c in asymmetries {
            if *include {
                set.remove(&c);
            } else {
                set.insert(c.reverse());
            }
        }
        if set.is_empty() {
            return Err(MaskError::ChangesIncompatibleWithSymmetry);
        }
    }
    Ok(())
}

/// Compiles the mask into the per-position alternative lists.  When the
/// lead length is not yet known (library filtering), two lists are produced,
/// one per stroke.
pub fn compile_mask(params: &SearchParams) -> Result<Vec<Vec<Change>>, MaskError> {
    let lead_len = if params.lead_len != 0 {
        params.lead_len
    } else {
        2
    };

    let (above, below) = read_and_expand_blocks(params, lead_len)?;

    if params.lead_len != 0 && !is_mask_consistent(params, &above, &below) {
        return Err(MaskError::InconsistentWithSymmetry);
    }

    let mut allowed = Vec::with_capacity(lead_len);
    for depth in 0..lead_len {
        // Without a known lead length the treble's path is unknown too, so
        // the per-stroke lists enumerate every change
        let mut changes = if params.hunt_bells != 0 && params.lead_len != 0 {
            let above_list = if above[depth].is_empty() {
                select_changes_above(params, depth)
            } else {
                above[depth].clone()
            };
            let below_list = if below[depth].is_empty() {
                select_changes_below(params, depth)
            } else {
                below[depth].clone()
            };
            merge_changes(params, &above_list, &below_list, depth)
        } else if above[depth].is_empty() {
            select_changes_principle(params, depth)?
        } else {
            above[depth].clone()
        };

        changes.sort();
        changes.dedup();
        if changes.is_empty() {
            return Err(MaskError::NoPossibleChange { position: depth });
        }
        allowed.push(changes);
    }
    Ok(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowframe::Stage;

    fn minor_params() -> SearchParams {
        let mut p = SearchParams::new(Stage::MINOR);
        p.treble_dodges = 1;
        p.validate().unwrap();
        p
    }

    #[test]
    fn fully_specified_mask() {
        let mut p = SearchParams::new(Stage::MINOR);
        p.treble_dodges = 1;
        p.mask = "&x3x4x2x3x4x5,2".to_owned();
        p.validate().unwrap();
        let allowed = compile_mask(&p).unwrap();
        assert_eq!(allowed.len(), 24);
        assert!(allowed.iter().all(|a| a.len() == 1));
        assert_eq!(allowed[0][0], Change::parse("-", Stage::MINOR).unwrap());
        assert_eq!(allowed[23][0], Change::parse("12", Stage::MINOR).unwrap());
    }

    #[test]
    fn star_mask_fills_the_lead() {
        let mut p = minor_params();
        p.mask = "*".to_owned();
        let allowed = compile_mask(&p).unwrap();
        assert_eq!(allowed.len(), 24);
        assert!(allowed.iter().all(|a| !a.is_empty()));
    }

    #[test]
    fn trailing_block_pins_the_lead_end() {
        let mut p = minor_params();
        p.mask = "*,12".to_owned();
        let allowed = compile_mask(&p).unwrap();
        assert_eq!(allowed.len(), 24);
        assert_eq!(allowed[23].len(), 1);
        assert_eq!(allowed[23][0], Change::parse("12", Stage::MINOR).unwrap());
    }

    #[test]
    fn wrong_length_is_reported() {
        let mut p = minor_params();
        p.mask = "x.x.x".to_owned();
        assert_eq!(
            compile_mask(&p),
            Err(MaskError::WrongLength {
                found: 3,
                expected: 24
            })
        );
    }

    #[test]
    fn alternative_lists() {
        let mut p = minor_params();
        p.mask = "*(12|16)".to_owned();
        let allowed = compile_mask(&p).unwrap();
        assert_eq!(allowed[23].len(), 2);
    }

    #[test]
    fn right_place_masks() {
        // A right-place TD minor method has a cross at every even position
        let mut p = minor_params();
        p.right_place = true;
        let allowed = compile_mask(&p).unwrap();
        for depth in (0..24).step_by(2) {
            assert!(
                allowed[depth].iter().all(|c| c.is_cross()),
                "position {} should be all crosses",
                depth
            );
        }
    }

    #[test]
    fn sym_mask_consistency() {
        let mut p = minor_params();
        p.sym = true;
        // The 12 at position 1 forces a 12 at its image; a 34 there clashes
        p.mask = "x.12.x?*?x.34.x".to_owned();
        assert_eq!(compile_mask(&p), Err(MaskError::InconsistentWithSymmetry));
    }

    #[test]
    fn principle_masks() {
        let mut p = SearchParams::new(Stage::MINOR);
        p.hunt_bells = 0;
        p.lead_len = 6;
        p.mask = "x36.12.36.14.56".to_owned();
        p.validate().unwrap();
        let allowed = compile_mask(&p).unwrap();
        assert_eq!(allowed.len(), 6);
        assert!(allowed.iter().all(|a| a.len() == 1));
    }
}
