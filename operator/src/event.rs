use kube::runtime::events::EventType;
use kube_runtime::events::Reporter;

use crate::naming::FIELD_MANAGER;

pub const REASON_RECONCILED: &str = "Reconciled";
pub const REASON_RENDER_FAILED: &str = "RenderFailed";
pub const REASON_APPLY_FAILED: &str = "ApplyFailed";
pub const REASON_PREREQUISITE_FAILED: &str = "PrerequisiteFailed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        }
    }
}

/// Reporting component shown on every Event the operator publishes.
///
/// The instance is the pod name when running in-cluster.
pub fn make_reporter() -> Reporter {
    Reporter {
        controller: FIELD_MANAGER.into(),
        instance: std::env::var("POD_NAME").ok(),
    }
}
