//! §7 error-to-HTTP-status mapping.

use modkit::error::CoreError;

/// Maps a terminal context error to the status code the listener writes
/// back when no action ever called `HttpResponse::send`/`html`/`json`/
/// `text`/`redirect` itself.
pub fn status_for_error(err: &CoreError) -> u16 {
    match err {
        CoreError::NoHandlers { .. } => 404,
        CoreError::Timeout { .. } => 408,
        CoreError::InvalidRegistration { .. }
        | CoreError::NotRegistered { .. }
        | CoreError::CircularDependency { .. }
        | CoreError::InvalidTopic { .. }
        | CoreError::UnresolvedDependency { .. }
        | CoreError::PhaseParadox { .. }
        | CoreError::ActionFailed { .. }
        | CoreError::DuplicateAction { .. } => 500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_handlers_maps_to_404() {
        let err = CoreError::NoHandlers {
            topic: "/x".to_string(),
        };
        assert_eq!(status_for_error(&err), 404);
    }

    #[test]
    fn timeout_maps_to_408() {
        let err = CoreError::Timeout {
            context_id: "c1".to_string(),
            elapsed_ms: 5000,
        };
        assert_eq!(status_for_error(&err), 408);
    }

    #[test]
    fn unresolved_dependency_maps_to_500() {
        let err = CoreError::UnresolvedDependency {
            action: "Report/gen".to_string(),
            dependency: "Cache/warm".to_string(),
        };
        assert_eq!(status_for_error(&err), 500);
    }
}
