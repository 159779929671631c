//! # User Notices
//!
//! The cash service reports the outcome of every mutating operation to the
//! person at the register. How a notice is shown (toast, status bar, log) is
//! up to the host; the service only talks to the [`Notifier`] trait.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CashDrawerService::open_drawer(..)                                    │
//! │       │                                                                 │
//! │       ├── Ok  ──► Notice::info("Drawer opened", "...")                 │
//! │       └── Err ──► Notice::error("Could not open drawer", err)          │
//! │                        │                                                │
//! │                        ▼                                                │
//! │                 Arc<dyn Notifier>::notify(&notice)                      │
//! │                        │                                                │
//! │         ┌──────────────┼──────────────┐                                 │
//! │         ▼              ▼              ▼                                 │
//! │   TracingNotifier  NoOpNotifier   host adapter                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// How loudly a notice should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Notice {
            severity: Severity::Info,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Notice {
            severity: Severity::Warning,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Notice {
            severity: Severity::Error,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Receives notices from the services.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Drops every notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNotifier;

impl Notifier for NoOpNotifier {
    fn notify(&self, _notice: &Notice) {}
}

/// Writes notices to the log at the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &Notice) {
        match notice.severity {
            Severity::Info => info!(title = %notice.title, "{}", notice.message),
            Severity::Warning => warn!(title = %notice.title, "{}", notice.message),
            Severity::Error => error!(title = %notice.title, "{}", notice.message),
        }
    }
}
