//! System permission checks consulted before recording.

/// Accessibility permission probe.
///
/// Consulted on every recording attempt, so a permission granted while the
/// app is running takes effect without a restart.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionChecker: Send + Sync {
    /// Whether the process may intercept input and post keyboard events
    fn is_accessibility_granted(&self) -> bool;
}

/// Live permission probe against the host OS.
pub struct SystemPermissionChecker;

impl PermissionChecker for SystemPermissionChecker {
    fn is_accessibility_granted(&self) -> bool {
        #[cfg(target_os = "macos")]
        {
            // Creating an event source for the combined session state fails
            // until Accessibility is granted in System Settings
            let source = core_graphics::event_source::CGEventSource::new(
                core_graphics::event_source::CGEventSourceStateID::CombinedSessionState,
            );
            if source.is_err() {
                tracing::warn!(
                    "accessibility permission denied - enable in System Settings > Privacy & Security > Accessibility"
                );
                return false;
            }
            true
        }

        #[cfg(not(target_os = "macos"))]
        true
    }
}
