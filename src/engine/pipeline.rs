//! Per-request pipeline state machine.
//!
//! `FETCHING → FUSING → EXTRACTING → PREDICTING → PRICING → CLASSIFYING → DONE`,
//! with `ERRORED` reachable from any stage and absorbing.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::types::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Fetching,
    Fusing,
    Extracting,
    Predicting,
    Pricing,
    Classifying,
    Done,
    Errored,
}

impl PipelineStage {
    /// The stage after this one on the success path.
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Fetching => Some(PipelineStage::Fusing),
            PipelineStage::Fusing => Some(PipelineStage::Extracting),
            PipelineStage::Extracting => Some(PipelineStage::Predicting),
            PipelineStage::Predicting => Some(PipelineStage::Pricing),
            PipelineStage::Pricing => Some(PipelineStage::Classifying),
            PipelineStage::Classifying => Some(PipelineStage::Done),
            PipelineStage::Done | PipelineStage::Errored => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Errored)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Fetching => "FETCHING",
            PipelineStage::Fusing => "FUSING",
            PipelineStage::Extracting => "EXTRACTING",
            PipelineStage::Predicting => "PREDICTING",
            PipelineStage::Pricing => "PRICING",
            PipelineStage::Classifying => "CLASSIFYING",
            PipelineStage::Done => "DONE",
            PipelineStage::Errored => "ERRORED",
        };
        write!(f, "{s}")
    }
}

/// Tracks one request through the stages.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    id: Uuid,
    stage: PipelineStage,
    trail: Vec<PipelineStage>,
    /// Stage that was active when the run failed.
    failed_at: Option<PipelineStage>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: PipelineStage::Fetching,
            trail: vec![PipelineStage::Fetching],
            failed_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn trail(&self) -> &[PipelineStage] {
        &self.trail
    }

    pub fn failed_at(&self) -> Option<PipelineStage> {
        self.failed_at
    }

    /// Fail if `cancel` has fired while in the current stage.
    pub fn check_cancel(&self, cancel: &CancelToken) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled { stage: self.stage.to_string() });
        }
        Ok(())
    }

    /// Move to the next stage. Cancellation is checked at the boundary.
    /// Terminal stages stay where they are.
    pub fn advance(&mut self, cancel: &CancelToken) -> Result<PipelineStage, EngineError> {
        let Some(next) = self.stage.next() else {
            return Ok(self.stage);
        };
        self.check_cancel(cancel)?;

        debug!(run_id = %self.id, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
        self.trail.push(next);
        Ok(next)
    }

    /// Enter the absorbing error state.
    pub fn fail(&mut self) {
        if self.stage == PipelineStage::Errored {
            return;
        }
        debug!(run_id = %self.id, from = %self.stage, "Stage transition to ERRORED");
        self.failed_at = Some(self.stage);
        self.stage = PipelineStage::Errored;
        self.trail.push(PipelineStage::Errored);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;

    #[test]
    fn test_full_success_path() {
        let mut run = PipelineRun::new();
        let never = CancelToken::never();
        while !run.stage().is_terminal() {
            run.advance(&never).unwrap();
        }
        assert_eq!(
            run.trail(),
            &[
                PipelineStage::Fetching,
                PipelineStage::Fusing,
                PipelineStage::Extracting,
                PipelineStage::Predicting,
                PipelineStage::Pricing,
                PipelineStage::Classifying,
                PipelineStage::Done,
            ]
        );
        assert_eq!(run.advance(&never).unwrap(), PipelineStage::Done);
    }

    #[test]
    fn test_errored_is_absorbing() {
        let mut run = PipelineRun::new();
        let never = CancelToken::never();
        run.advance(&never).unwrap();
        run.fail();
        assert_eq!(run.stage(), PipelineStage::Errored);
        assert_eq!(run.failed_at(), Some(PipelineStage::Fusing));

        assert_eq!(run.advance(&never).unwrap(), PipelineStage::Errored);
        run.fail();
        assert_eq!(run.failed_at(), Some(PipelineStage::Fusing));
        assert_eq!(run.trail().last(), Some(&PipelineStage::Errored));
        assert_eq!(run.trail().iter().filter(|s| **s == PipelineStage::Errored).count(), 1);
    }

    #[test]
    fn test_cancel_blocks_transition() {
        let (handle, token) = CancelHandle::new();
        let mut run = PipelineRun::new();
        run.advance(&token).unwrap();
        handle.cancel();

        let err = run.advance(&token).unwrap_err();
        assert_eq!(err, EngineError::Cancelled { stage: "FUSING".into() });
        assert_eq!(run.stage(), PipelineStage::Fusing);
    }

    #[test]
    fn test_stage_serde_matches_display() {
        for stage in [PipelineStage::Classifying, PipelineStage::Errored] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{stage}\""));
        }
    }
}
