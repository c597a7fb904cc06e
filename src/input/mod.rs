//! Global key interception: classification and the system event tap.

/// Pure hotkey/cancel classification
pub mod evaluator;

/// System-wide key event tap (macOS only)
#[cfg(target_os = "macos")]
pub mod tap;

pub use evaluator::{KeyEventSnapshot, LogicalAction, ModifierFlags};
