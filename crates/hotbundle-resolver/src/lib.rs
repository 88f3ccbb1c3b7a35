mod plan;
mod select;
mod types;

pub use plan::{candidate_urls, plan_strategies};
pub use select::select_outcome;
pub use types::{SelectionContext, StrategyStep};
