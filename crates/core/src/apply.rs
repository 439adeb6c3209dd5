//! Request-scoped apply context (field manager, dry-run, force).
//!
//! Threaded through the mutating verbs so a future field-ownership conflict
//! resolver has what it needs; nothing consumes `force` yet.

/// Carried per request, never persisted and never shared across requests.
#[derive(Debug, Clone, Default)]
pub struct ApplyContext {
    /// Original request payload, untouched.
    pub raw: Vec<u8>,
    /// Actor credited with ownership of the fields this write touches.
    pub field_manager: String,
    /// Non-empty means validate the whole pipeline but persist nothing.
    pub dry_run: Vec<String>,
    /// Request to take ownership of conflicting fields (carried, unread).
    pub force: bool,
}

impl ApplyContext {
    pub fn new(field_manager: impl Into<String>) -> Self {
        Self { field_manager: field_manager.into(), ..Default::default() }
    }

    pub fn dry_run_all(mut self) -> Self {
        self.dry_run = vec!["All".to_string()];
        self
    }

    pub fn dry_run_requested(&self) -> bool {
        !self.dry_run.is_empty()
    }

    pub fn manager_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.field_manager.is_empty() {
            default
        } else {
            &self.field_manager
        }
    }
}
