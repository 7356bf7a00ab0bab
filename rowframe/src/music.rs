//! Musical patterns: wildcards over bell symbols, with the usual named
//! shorthands (queens, runs, CRUs, ...), and scored row counting.

use std::fmt::{Debug, Display, Formatter};

use crate::{Bell, Row, RowBuf, Stage};

/// One element of a [`Pattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elem {
    /// A specific bell
    Bell(Bell),
    /// `?`: any single bell
    Any,
    /// `[...]`: any single bell from a set
    Set(Vec<Bell>),
    /// `*`: any run of bells, including none
    Star,
}

impl Elem {
    fn matches(&self, b: Bell) -> bool {
        match self {
            Elem::Bell(e) => *e == b,
            Elem::Any => true,
            Elem::Set(set) => set.contains(&b),
            Elem::Star => unreachable!("stars are handled by the matcher"),
        }
    }
}

/// A wildcard over the rows of one [`Stage`], anchored at both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    stage: Stage,
    elems: Vec<Elem>,
}

impl Pattern {
    pub fn parse(s: &str, stage: Stage) -> Result<Self, PatternError> {
        let mut elems = Vec::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                '*' => elems.push(Elem::Star),
                '?' | 'x' | 'X' => elems.push(Elem::Any),
                '[' => {
                    let mut set = Vec::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(c) => set.push(
                                Bell::from_name(c).ok_or(PatternError::InvalidChar(c))?,
                            ),
                            None => return Err(PatternError::UnterminatedSet),
                        }
                    }
                    elems.push(Elem::Set(set));
                }
                c => elems.push(Elem::Bell(
                    Bell::from_name(c).ok_or(PatternError::InvalidChar(c))?,
                )),
            }
        }
        Self::from_elems(elems, stage)
    }

    pub fn from_elems(elems: Vec<Elem>, stage: Stage) -> Result<Self, PatternError> {
        let num_stars = elems.iter().filter(|e| **e == Elem::Star).count();
        let fixed = elems.len() - num_stars;
        if fixed > stage.num_bells() || (num_stars == 0 && fixed != stage.num_bells()) {
            return Err(PatternError::WrongLength {
                pattern_len: fixed,
                stage,
            });
        }
        Ok(Pattern { stage, elems })
    }

    /// A pattern matching exactly one row.
    pub fn from_row(row: &Row) -> Self {
        Pattern {
            stage: row.stage(),
            elems: row.bell_iter().map(Elem::Bell).collect(),
        }
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[inline]
    pub fn elems(&self) -> &[Elem] {
        &self.elems
    }

    /// Tests this pattern against a row (anchored at both ends; `*`s match
    /// greedily but correctly via backtracking).
    pub fn matches(&self, row: &Row) -> bool {
        if row.stage() != self.stage {
            return false;
        }
        Self::matches_rec(&self.elems, row.bells())
    }

    fn matches_rec(elems: &[Elem], bells: &[Bell]) -> bool {
        match elems.split_first() {
            None => bells.is_empty(),
            Some((Elem::Star, rest)) => {
                (0..=bells.len()).any(|k| Self::matches_rec(rest, &bells[k..]))
            }
            Some((elem, rest)) => bells
                .split_first()
                .map_or(false, |(b, brest)| {
                    elem.matches(*b) && Self::matches_rec(rest, brest)
                }),
        }
    }

    /// Expands a named pattern (`queens`, `kings`, `tittums`, `backrounds`,
    /// `rounds`, `CRUs`, `<k>-runs`) into its constituent patterns.
    pub fn named(name: &str, stage: Stage) -> Result<Vec<Pattern>, PatternError> {
        let n = stage.num_bells();
        let whole_row = |r: RowBuf| vec![Pattern::from_row(&r)];
        match name {
            "rounds" => Ok(whole_row(RowBuf::rounds(stage))),
            "backrounds" => Ok(whole_row(RowBuf::backrounds(stage))),
            "queens" => Ok(whole_row(RowBuf::queens(stage))),
            "kings" => {
                let bells: Vec<Bell> = stage
                    .bells()
                    .step_by(2)
                    .rev()
                    .chain(stage.bells().skip(1).step_by(2))
                    .collect();
                // SAFETY: odd bells reversed then even bells is a permutation
                Ok(whole_row(unsafe { RowBuf::from_vec_unchecked(bells) }))
            }
            "tittums" => {
                let half = (n + 1) / 2;
                let mut bells = Vec::with_capacity(n);
                for i in 0..half {
                    bells.push(Bell::from_index(i).unwrap());
                    if half + i < n {
                        bells.push(Bell::from_index(half + i).unwrap());
                    }
                }
                Ok(whole_row(unsafe { RowBuf::from_vec_unchecked(bells) }))
            }
            "CRUs" => {
                if n < 6 {
                    return Err(PatternError::UnknownName(name.to_owned()));
                }
                let mut patterns = Vec::new();
                let candidates = [3usize, 4, 5];
                for a in candidates {
                    for b in candidates {
                        if a == b {
                            continue;
                        }
                        let mut elems = vec![Elem::Star];
                        elems.push(Elem::Bell(Bell::from_index(a).unwrap()));
                        elems.push(Elem::Bell(Bell::from_index(b).unwrap()));
                        for t in 6..n {
                            elems.push(Elem::Bell(Bell::from_index(t).unwrap()));
                        }
                        patterns.push(Pattern::from_elems(elems, stage)?);
                    }
                }
                Ok(patterns)
            }
            _ => {
                // "<k>-runs": runs of k consecutive bells at the front or
                // back, ascending or descending
                if let Some(k_str) = name.strip_suffix("-runs") {
                    let k: usize = k_str
                        .parse()
                        .map_err(|_| PatternError::UnknownName(name.to_owned()))?;
                    if k < 2 || k > n {
                        return Err(PatternError::UnknownName(name.to_owned()));
                    }
                    let mut patterns = Vec::new();
                    for start in 0..=(n - k) {
                        let asc: Vec<Bell> =
                            (start..start + k).map(|i| Bell::from_index(i).unwrap()).collect();
                        let desc: Vec<Bell> = asc.iter().rev().copied().collect();
                        for run in [asc, desc] {
                            for front in [true, false] {
                                let mut elems: Vec<Elem> =
                                    run.iter().map(|&b| Elem::Bell(b)).collect();
                                if front {
                                    elems.push(Elem::Star);
                                } else {
                                    elems.insert(0, Elem::Star);
                                }
                                let p = Pattern::from_elems(elems, stage)?;
                                if !patterns.contains(&p) {
                                    patterns.push(p);
                                }
                            }
                        }
                    }
                    return Ok(patterns);
                }
                Err(PatternError::UnknownName(name.to_owned()))
            }
        }
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for e in &self.elems {
            match e {
                Elem::Bell(b) => write!(f, "{}", b)?,
                Elem::Any => write!(f, "?")?,
                Elem::Star => write!(f, "*")?,
                Elem::Set(set) => {
                    write!(f, "[")?;
                    for b in set {
                        write!(f, "{}", b)?;
                    }
                    write!(f, "]")?;
                }
            }
        }
        Ok(())
    }
}

/// A [`Pattern`] with the score its matches contribute (default 1, may be
/// negative).
#[derive(Debug, Clone)]
pub struct ScoredPattern {
    pub pattern: Pattern,
    pub score: i32,
}

impl ScoredPattern {
    /// Parses `PATTERN[:SCORE]`, expanding `<named>` pattern groups.
    pub fn parse(s: &str, stage: Stage) -> Result<Vec<ScoredPattern>, PatternError> {
        let (body, score) = match s.rsplit_once(':') {
            Some((body, score_str)) => (
                body,
                score_str
                    .parse::<i32>()
                    .map_err(|_| PatternError::InvalidScore(score_str.to_owned()))?,
            ),
            None => (s, 1),
        };
        let patterns = match body.strip_prefix('<').and_then(|b| b.strip_suffix('>')) {
            Some(name) => Pattern::named(name, stage)?,
            None => vec![Pattern::parse(body, stage)?],
        };
        Ok(patterns
            .into_iter()
            .map(|pattern| ScoredPattern { pattern, score })
            .collect())
    }
}

/// Accumulates match counts and scores over a stream of rows.
#[derive(Debug, Clone, Default)]
pub struct MusicCounter {
    patterns: Vec<ScoredPattern>,
    count: usize,
    score: i64,
}

impl MusicCounter {
    pub fn new(patterns: Vec<ScoredPattern>) -> Self {
        MusicCounter {
            patterns,
            count: 0,
            score: 0,
        }
    }

    /// Parses and adds a scored pattern string.
    pub fn add_pattern(&mut self, s: &str, stage: Stage) -> Result<(), PatternError> {
        self.patterns.extend(ScoredPattern::parse(s, stage)?);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Processes one row; returns `true` if any pattern matched.
    pub fn process_row(&mut self, row: &Row) -> bool {
        let mut matched = false;
        for sp in &self.patterns {
            if sp.pattern.matches(row) {
                matched = true;
                self.count += 1;
                self.score += sp.score as i64;
            }
        }
        matched
    }

    pub fn process_rows<'r>(&mut self, rows: impl IntoIterator<Item = &'r Row>) {
        for r in rows {
            self.process_row(r);
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn score(&self) -> i64 {
        self.score
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.score = 0;
    }
}

/// The ways a music pattern can fail to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    InvalidChar(char),
    UnterminatedSet,
    WrongLength { pattern_len: usize, stage: Stage },
    UnknownName(String),
    InvalidScore(String),
}

impl Display for PatternError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternError::InvalidChar(c) => write!(f, "'{}' is not valid in a pattern", c),
            PatternError::UnterminatedSet => write!(f, "unterminated '[' in pattern"),
            PatternError::WrongLength { pattern_len, stage } => write!(
                f,
                "pattern with {} fixed bells cannot match stage {}",
                pattern_len, stage
            ),
            PatternError::UnknownName(n) => write!(f, "unknown named pattern '<{}>'", n),
            PatternError::InvalidScore(s) => write!(f, "invalid pattern score '{}'", s),
        }
    }
}

impl std::error::Error for PatternError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    fn row(s: &str) -> RowBuf {
        RowBuf::parse(s).unwrap()
    }

    #[test]
    fn wildcards() {
        let p = Pattern::parse("*5678", Stage::MAJOR).unwrap();
        assert!(p.matches(&row("12345678")));
        assert!(p.matches(&row("43215678")));
        assert!(!p.matches(&row("12346578")));

        let p = Pattern::parse("1*8", Stage::MAJOR).unwrap();
        assert!(p.matches(&row("12345678")));
        assert!(!p.matches(&row("21345678")));

        let p = Pattern::parse("x1xx56", Stage::MINOR).unwrap();
        assert!(p.matches(&row("214356")));
        assert!(!p.matches(&row("123456")));

        let p = Pattern::parse("*[46]8", Stage::MAJOR).unwrap();
        assert!(p.matches(&row("12357468")));
        assert!(p.matches(&row("12357648")));
        assert!(!p.matches(&row("12346578")));
    }

    #[test]
    fn length_validation() {
        assert!(Pattern::parse("123", Stage::MAJOR).is_err());
        assert!(Pattern::parse("123456789", Stage::MAJOR).is_err());
        assert!(Pattern::parse("*123456789", Stage::MAJOR).is_err());
        assert!(Pattern::parse("12345678", Stage::MAJOR).is_ok());
    }

    #[test]
    fn named_rows() {
        let queens = Pattern::named("queens", Stage::MAJOR).unwrap();
        assert_eq!(queens.len(), 1);
        assert!(queens[0].matches(&row("13572468")));
        let kings = Pattern::named("kings", Stage::MAJOR).unwrap();
        assert!(kings[0].matches(&row("75312468")));
        let tittums = Pattern::named("tittums", Stage::MAJOR).unwrap();
        assert!(tittums[0].matches(&row("15263748")));
    }

    #[test]
    fn runs() {
        let runs = Pattern::named("4-runs", Stage::MAJOR).unwrap();
        let matches = |r: &str| runs.iter().filter(|p| p.matches(&row(r))).count();
        assert!(matches("12345678") >= 2); // 1234 at the front, 5678 at the back
        assert_eq!(matches("13246587"), 0);
        assert!(matches("87654312") >= 1); // 8765 descending at the front
    }

    #[test]
    fn scored_patterns() {
        let sps = ScoredPattern::parse("*5678:3", Stage::MAJOR).unwrap();
        assert_eq!(sps.len(), 1);
        assert_eq!(sps[0].score, 3);
        let sps = ScoredPattern::parse("*87:-2", Stage::MAJOR).unwrap();
        assert_eq!(sps[0].score, -2);

        let mut counter = MusicCounter::default();
        counter.add_pattern("*5678:3", Stage::MAJOR).unwrap();
        assert!(counter.process_row(&row("43215678")));
        assert!(!counter.process_row(&row("43216578")));
        assert_eq!(counter.count(), 1);
        assert_eq!(counter.score(), 3);
    }

    #[test]
    fn cru_count_of_plain_bob_major() {
        let pb = Method::parse("&x18x18x18x18,12", Stage::MAJOR).unwrap();
        let mut counter = MusicCounter::default();
        counter.add_pattern("<CRUs>", Stage::MAJOR).unwrap();
        for r in pb.plain_course_rows() {
            counter.process_row(&r);
        }
        assert_eq!(counter.count(), 24);
    }
}
