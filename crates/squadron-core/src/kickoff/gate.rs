//! Quality gate for the implementation loop.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QaVerdict {
    Pass,
    Fail,
}

/// Decides whether an implementation iteration passes QA.
///
/// `iteration` is zero-based; `qa_output` is the QA agent's text for that
/// iteration (possibly degraded fallback text).
pub trait QaGate: Send + Sync {
    fn decide(&self, iteration: usize, qa_output: &str) -> QaVerdict;
}

/// Content-independent gate: rejects the first iteration, approves the rest.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedGate;

impl QaGate for ScriptedGate {
    fn decide(&self, iteration: usize, _qa_output: &str) -> QaVerdict {
        if iteration == 0 {
            QaVerdict::Fail
        } else {
            QaVerdict::Pass
        }
    }
}

impl<F> QaGate for F
where
    F: Fn(usize, &str) -> QaVerdict + Send + Sync,
{
    fn decide(&self, iteration: usize, qa_output: &str) -> QaVerdict {
        self(iteration, qa_output)
    }
}
