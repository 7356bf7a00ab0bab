//! Musical analysis of methods: scored patterns applied to row blocks (the
//! plain course by default, or leads and half-leads of chosen courses).

use std::fmt::{Display, Formatter};

use rowframe::music::PatternError;
use rowframe::{InvalidRowError, Method, MusicCounter, RowBuf, ScoredPattern, Stage};

use crate::params::SearchParams;

/// Which rows of a course a block of patterns applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// The whole plain course
    Course,
    /// One lead
    Lead,
    /// The first half-lead
    HalfLead,
    /// The second half-lead
    HalfLead2,
    /// The first half-lead, rung backwards
    HalfLeadR,
    /// The second half-lead, rung backwards
    HalfLead2R,
}

impl BlockKind {
    fn parse(s: &str) -> Option<BlockKind> {
        Some(match s {
            "course" => BlockKind::Course,
            "lead" => BlockKind::Lead,
            "halflead" => BlockKind::HalfLead,
            "2halflead" => BlockKind::HalfLead2,
            "rhalflead" => BlockKind::HalfLeadR,
            "2rhalflead" => BlockKind::HalfLead2R,
            _ => return None,
        })
    }
}

/// The ways a music specification can fail to parse.
#[derive(Debug, Clone)]
pub enum MusicError {
    Pattern(PatternError),
    CourseHead(InvalidRowError),
}

impl Display for MusicError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MusicError::Pattern(e) => write!(f, "error parsing music pattern: {}", e),
            MusicError::CourseHead(e) => {
                write!(f, "music course head produces an invalid row: {}", e)
            }
        }
    }
}

impl std::error::Error for MusicError {}

/// A compiled set of scored patterns and the blocks they score.
#[derive(Debug, Clone)]
pub struct MusicAnalysis {
    blocks: Vec<(RowBuf, BlockKind)>,
    patterns: Vec<ScoredPattern>,
}

impl MusicAnalysis {
    /// Builds the analysis from the `-M` pattern strings.  Block options
    /// (`course`, `lead`, `halflead=ROW`, ...) change which rows subsequent
    /// patterns score; with no patterns at all, CRUs in the plain course are
    /// counted.
    pub fn new(specs: &[String], stage: Stage) -> Result<Self, MusicError> {
        let mut blocks = vec![(RowBuf::rounds(stage), BlockKind::Course)];
        let mut patterns = Vec::new();
        // The default block above is replaced by the first block option
        // rather than augmented
        let mut had_patterns = true;

        for spec in specs {
            let (opt, arg) = match spec.split_once('=') {
                Some((opt, arg)) => (opt, Some(arg)),
                None => (spec.as_str(), None),
            };
            if let Some(kind) = BlockKind::parse(opt) {
                if had_patterns {
                    blocks.clear();
                    had_patterns = false;
                }
                match arg {
                    Some(rows) => {
                        for r in rows.split(';') {
                            let head = RowBuf::parse_with_stage(r, stage)
                                .map_err(MusicError::CourseHead)?;
                            blocks.push((head, kind));
                        }
                    }
                    None => blocks.push((RowBuf::rounds(stage), kind)),
                }
                continue;
            }
            had_patterns = true;
            patterns.extend(ScoredPattern::parse(spec, stage).map_err(MusicError::Pattern)?);
        }

        if patterns.is_empty() {
            patterns = ScoredPattern::parse("<CRUs>", stage).map_err(MusicError::Pattern)?;
        }
        Ok(MusicAnalysis { blocks, patterns })
    }

    pub fn from_params(params: &SearchParams) -> Result<Self, MusicError> {
        Self::new(&params.music_patterns, params.stage)
    }

    /// The total score of a method over all blocks.
    pub fn analyse(&self, m: &Method) -> i64 {
        let mut score = 0;
        for (head, kind) in &self.blocks {
            let rows = block_rows(m, head, *kind);
            let mut counter = MusicCounter::new(self.patterns.clone());
            counter.process_rows(rows.iter().map(|r| r.as_row()));
            score += counter.score();
        }
        score
    }

    /// The total match count of a method over all blocks.
    pub fn count(&self, m: &Method) -> usize {
        let mut count = 0;
        for (head, kind) in &self.blocks {
            let rows = block_rows(m, head, *kind);
            let mut counter = MusicCounter::new(self.patterns.clone());
            counter.process_rows(rows.iter().map(|r| r.as_row()));
            count += counter.count();
        }
        count
    }
}

/// The rows a block scores, starting from its head.  Each row is collected
/// *after* applying a change, so a block ends with its final transposition.
fn block_rows(m: &Method, head: &RowBuf, kind: BlockKind) -> Vec<RowBuf> {
    let l = m.lead_len();
    let changes = m.changes();
    let mut rows = Vec::new();
    let mut r = head.clone();
    match kind {
        BlockKind::Course => loop {
            for c in changes {
                c.permute(&mut r);
                rows.push(r.clone());
            }
            if r == *head {
                break;
            }
        },
        BlockKind::Lead => {
            for c in changes {
                c.permute(&mut r);
                rows.push(r.clone());
            }
        }
        BlockKind::HalfLead => {
            for c in &changes[..l / 2] {
                c.permute(&mut r);
                rows.push(r.clone());
            }
        }
        BlockKind::HalfLead2 => {
            for c in &changes[l / 2..] {
                c.permute(&mut r);
                rows.push(r.clone());
            }
        }
        BlockKind::HalfLeadR => {
            for c in changes[..l - l / 2 - 1].iter().rev() {
                c.permute(&mut r);
                rows.push(r.clone());
            }
            rows.push(r.clone());
        }
        BlockKind::HalfLead2R => {
            for c in changes[l - l / 2 - 1..l - 1].iter().rev() {
                c.permute(&mut r);
                rows.push(r.clone());
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pb_major() -> Method {
        Method::parse("&x18x18x18x18,12", Stage::MAJOR).unwrap()
    }

    #[test]
    fn default_analysis_counts_crus() {
        let analysis = MusicAnalysis::new(&[], Stage::MAJOR).unwrap();
        assert_eq!(analysis.count(&pb_major()), 24);
    }

    #[test]
    fn explicit_patterns() {
        let specs = vec!["*5678:2".to_owned()];
        let analysis = MusicAnalysis::new(&specs, Stage::MAJOR).unwrap();
        let score = analysis.analyse(&pb_major());
        assert!(score > 0);
        assert_eq!(score % 2, 0);
    }

    #[test]
    fn lead_blocks() {
        let specs = vec!["lead".to_owned(), "*5678".to_owned()];
        let analysis = MusicAnalysis::new(&specs, Stage::MAJOR).unwrap();
        // The first lead of Plain Bob Major ends 15263748 -> no 5678s after
        // the opening rounds region
        let count = analysis.count(&pb_major());
        let course_count = MusicAnalysis::new(&["*5678".to_owned()], Stage::MAJOR)
            .unwrap()
            .count(&pb_major());
        assert!(count <= course_count);
    }

    #[test]
    fn block_row_counts() {
        let m = pb_major();
        let head = RowBuf::rounds(Stage::MAJOR);
        assert_eq!(block_rows(&m, &head, BlockKind::Course).len(), 112);
        assert_eq!(block_rows(&m, &head, BlockKind::Lead).len(), 16);
        assert_eq!(block_rows(&m, &head, BlockKind::HalfLead).len(), 8);
        assert_eq!(block_rows(&m, &head, BlockKind::HalfLead2).len(), 8);
        assert_eq!(block_rows(&m, &head, BlockKind::HalfLeadR).len(), 8);
        assert_eq!(block_rows(&m, &head, BlockKind::HalfLead2R).len(), 8);
    }

    #[test]
    fn course_head_blocks() {
        let specs = vec!["course=13572468".to_owned(), "*5678".to_owned()];
        let analysis = MusicAnalysis::new(&specs, Stage::MAJOR).unwrap();
        // Scoring a different course still covers a full course of rows
        let _ = analysis.analyse(&pb_major());
    }
}
