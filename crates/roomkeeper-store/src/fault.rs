//! Fault injection for the in-memory stores.
//!
//! Lets tests make a specific operation fail, either once or until
//! cleared, so partial-failure paths (a directive that cannot be armed, a
//! re-check read that times out) can be exercised deterministically.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::{StoreError, StoreOp};

/// The kind of failure to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Produces [`StoreError::Transient`].
    Transient,
    /// Produces [`StoreError::PermissionDenied`].
    PermissionDenied,
}

#[derive(Debug)]
struct FaultRule {
    kind: FaultKind,
    /// `None` = fail until cleared.
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    rules: Mutex<HashMap<StoreOp, FaultRule>>,
}

impl FaultPlan {
    pub(crate) fn fail_next(&self, op: StoreOp, kind: FaultKind) {
        self.arm(op, kind, Some(1));
    }

    pub(crate) fn fail_always(&self, op: StoreOp, kind: FaultKind) {
        self.arm(op, kind, None);
    }

    pub(crate) fn clear(&self) {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn arm(&self, op: StoreOp, kind: FaultKind, remaining: Option<u32>) {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op, FaultRule { kind, remaining });
    }

    /// Consumes one armed fault for `op`, if any.
    pub(crate) fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rule) = rules.get_mut(&op) else {
            return Ok(());
        };
        let kind = rule.kind;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                rules.remove(&op);
            }
        }
        tracing::debug!(%op, ?kind, "injected store fault");
        Err(match kind {
            FaultKind::Transient => StoreError::Transient {
                op,
                message: "injected network failure".into(),
            },
            FaultKind::PermissionDenied => StoreError::PermissionDenied {
                op,
                message: "injected permission failure".into(),
            },
        })
    }
}
