//! # Pass Context
//!
//! Request-scoped carrier threaded through the pipeline handlers of one pass.
//!
//! Earlier handlers record signals here (a classified failure reason, the
//! history guard's failure flag) that later handlers act on without querying
//! the release manager again. A fresh context is built for every pass and
//! dropped when the pass ends.

/// Release sub-status recorded during a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseSubStatus {
    pub status: String,
    /// The latest revisions all failed and none could be pruned yet
    pub failed_max_attempts: bool,
}

/// Status override recorded during a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextStatus {
    pub reason: String,
    pub release: ReleaseSubStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassContext {
    pub status: Option<ContextStatus>,
}

impl PassContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reason and release status, keeping the failure flag
    pub fn set_status(&mut self, reason: impl Into<String>, status: impl Into<String>) {
        let entry = self.status.get_or_insert_with(ContextStatus::default);
        entry.reason = reason.into();
        entry.release.status = status.into();
    }

    pub fn mark_failed_max_attempts(&mut self) {
        self.status
            .get_or_insert_with(ContextStatus::default)
            .release
            .failed_max_attempts = true;
    }

    pub fn clear_failed_max_attempts(&mut self) {
        if let Some(status) = self.status.as_mut() {
            status.release.failed_max_attempts = false;
        }
    }

    pub fn failed_max_attempts(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.release.failed_max_attempts)
    }

    /// Reason recorded by an earlier handler, if any
    pub fn reason(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.reason.as_str())
            .filter(|r| !r.is_empty())
    }

    /// Release status recorded by an earlier handler, if any
    pub fn release_status(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.release.status.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_empty() {
        let ctx = PassContext::new();
        assert!(ctx.status.is_none());
        assert!(!ctx.failed_max_attempts());
        assert_eq!(ctx.reason(), None);
    }

    #[test]
    fn test_set_status_keeps_failure_flag() {
        let mut ctx = PassContext::new();
        ctx.mark_failed_max_attempts();
        ctx.set_status("chart-pull-failed", "failed");
        assert!(ctx.failed_max_attempts());
        assert_eq!(ctx.reason(), Some("chart-pull-failed"));
        assert_eq!(ctx.release_status(), Some("failed"));
    }

    #[test]
    fn test_clear_failure_flag() {
        let mut ctx = PassContext::new();
        ctx.mark_failed_max_attempts();
        ctx.clear_failed_max_attempts();
        assert!(!ctx.failed_max_attempts());
        // Flag alone carries no status override
        assert_eq!(ctx.reason(), None);
        assert_eq!(ctx.release_status(), None);
    }
}
