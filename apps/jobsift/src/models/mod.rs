pub mod evaluation;
pub mod posting;

pub use evaluation::{Evaluation, EvaluationFilter, EvaluationRow, NewEvaluation, RejectionReason};
pub use posting::Posting;
