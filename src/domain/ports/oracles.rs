//! Oracle ports for the two external perception subsystems.
//!
//! The visibility and cover engines are black boxes to this crate. Each is
//! modeled as a capability trait resolved at construction time: when a
//! subsystem is absent or disabled, the corresponding null object is wired
//! in instead, and callers never probe for availability per call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CoverLevel, EntityRef, VisibilityLevel};

/// Cover level plus the numeric bonus the rules tables assign it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverAssessment {
    pub level: CoverLevel,
    pub bonus: u32,
}

impl CoverAssessment {
    pub fn new(level: CoverLevel) -> Self {
        Self {
            level,
            bonus: level.stealth_bonus(),
        }
    }
}

/// Port for the external visibility engine.
#[async_trait]
pub trait VisibilityOracle: Send + Sync {
    /// Visibility of `subject` from `observer`'s perspective. May fail.
    async fn visibility_between(
        &self,
        observer: &EntityRef,
        subject: &EntityRef,
    ) -> DomainResult<VisibilityLevel>;
}

/// Port for the external cover engine.
#[async_trait]
pub trait CoverOracle: Send + Sync {
    /// Cover `subject` has against `observer`. May fail.
    async fn cover_between(
        &self,
        observer: &EntityRef,
        subject: &EntityRef,
    ) -> DomainResult<CoverAssessment>;
}

/// Null object wired in when the visibility subsystem is disabled.
///
/// Always reports unavailable, which routes the integrator onto its local
/// geometric fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullVisibilityOracle;

#[async_trait]
impl VisibilityOracle for NullVisibilityOracle {
    async fn visibility_between(
        &self,
        _observer: &EntityRef,
        _subject: &EntityRef,
    ) -> DomainResult<VisibilityLevel> {
        Err(DomainError::VisibilityOracleUnavailable)
    }
}

/// Null object wired in when the cover subsystem is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCoverOracle;

#[async_trait]
impl CoverOracle for NullCoverOracle {
    async fn cover_between(
        &self,
        _observer: &EntityRef,
        _subject: &EntityRef,
    ) -> DomainResult<CoverAssessment> {
        Err(DomainError::CoverOracleUnavailable)
    }
}
