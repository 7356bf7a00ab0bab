//! The method-search engine: masks, depth-first search with symmetry
//! folding and falseness pruning, method properties and user predicates,
//! musical analysis, splice analysis and join plans.

#![deny(clippy::all)]

pub mod expression;
pub mod falseness;
pub mod mask;
pub mod music;
pub mod output;
pub mod params;
pub mod plan;
pub mod properties;
pub mod search;
pub mod splice;

mod divisions;

pub use expression::Expression;
pub use mask::compile_mask;
pub use params::{ClassReq, FilterMode, LeadHeadKind, SearchParams};
pub use properties::MethodProperties;
pub use search::{SearchOutcome, SearchSignal, Searcher};
