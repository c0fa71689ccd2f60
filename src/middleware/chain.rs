//! The ordered protection chain.
//!
//! Rate limiting runs before any state lookup. Replay detection runs before a
//! session can be created or extended. Sessions resolve last, so the CSRF
//! check on application routes can read the session's seed.

use axum::{extract::Request, middleware::from_fn_with_state, Router};
use std::fmt;

use super::{anti_replay, rate_limit, session};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    RateLimit,
    AntiReplay,
    Session,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::RateLimit => "rate_limit",
            Stage::AntiReplay => "anti_replay",
            Stage::Session => "session",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("stage {0} listed more than once")]
    Duplicate(Stage),
    #[error("stage {later} must run before {earlier}")]
    OutOfOrder { earlier: Stage, later: Stage },
}

/// Stages a request passed through, in invocation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageTrail(pub Vec<Stage>);

impl StageTrail {
    pub fn record(req: &mut Request, stage: Stage) {
        match req.extensions_mut().get_mut::<StageTrail>() {
            Some(trail) => trail.0.push(stage),
            None => {
                req.extensions_mut().insert(StageTrail(vec![stage]));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiddlewareChain {
    stages: Vec<Stage>,
}

impl MiddlewareChain {
    pub const ORDER: [Stage; 3] = [Stage::RateLimit, Stage::AntiReplay, Stage::Session];

    /// All three stages in their required order.
    pub fn standard() -> Self {
        Self { stages: Self::ORDER.to_vec() }
    }

    /// Builds a chain from an explicit list. Stages may be left out but never
    /// repeated or reordered.
    pub fn from_stages(stages: Vec<Stage>) -> Result<Self, ChainError> {
        let rank = |s: &Stage| Self::ORDER.iter().position(|o| o == s).unwrap_or(usize::MAX);
        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].contains(stage) {
                return Err(ChainError::Duplicate(*stage));
            }
            if let Some(prev) = i.checked_sub(1).map(|p| stages[p]) {
                if rank(&prev) > rank(stage) {
                    return Err(ChainError::OutOfOrder { earlier: prev, later: *stage });
                }
            }
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Wraps `router` so the first listed stage is the outermost layer.
    pub fn apply(&self, router: Router, state: &AppState) -> Router {
        self.stages.iter().rev().fold(router, |router, stage| match stage {
            Stage::RateLimit => router.layer(from_fn_with_state(state.clone(), rate_limit::rate_limit_middleware)),
            Stage::AntiReplay => {
                router.layer(from_fn_with_state(state.clone(), anti_replay::anti_replay_middleware))
            }
            Stage::Session => router.layer(from_fn_with_state(state.clone(), session::session_middleware)),
        })
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::standard()
    }
}
