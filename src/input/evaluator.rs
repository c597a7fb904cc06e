//! Pure classification of raw key events against the configured hotkey.
//!
//! Runs inside the system event tap callback, so everything here is total,
//! allocation-free, and I/O-free.

use crate::config::{HotkeyBinding, ESCAPE_KEY_CODE};

/// Modifier keys held at the time of a key event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierFlags {
    /// Option/Alt held
    pub option: bool,
    /// Command held
    pub command: bool,
    /// Control held
    pub control: bool,
    /// Shift held
    pub shift: bool,
}

impl ModifierFlags {
    const NONE: Self = Self {
        option: false,
        command: false,
        control: false,
        shift: false,
    };
}

/// One hardware key event, snapshotted for evaluation
#[derive(Debug, Clone, Copy)]
pub struct KeyEventSnapshot {
    /// Virtual key code
    pub key_code: i64,
    /// Modifiers held during the event
    pub modifiers: ModifierFlags,
    /// Key autorepeat event
    pub is_repeat: bool,
    /// Key-up (release) rather than key-down
    pub is_key_up: bool,
}

/// Classified outcome of a key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalAction {
    /// The bound chord was pressed
    HotkeyDown,
    /// The bound chord was released
    HotkeyUp,
    /// Escape pressed while a recording is cancellable
    CancelRecording,
    /// Not ours; deliver the event normally
    PassThrough,
}

/// Classify an event against the hotkey binding.
///
/// Modifiers must match exactly: extra held modifiers disqualify the chord,
/// so e.g. ⌘⇧\ does not trigger a plain ⌘\ binding. Autorepeat never
/// triggers.
#[must_use]
pub fn evaluate_hotkey(event: &KeyEventSnapshot, binding: &HotkeyBinding) -> LogicalAction {
    let is_target_key = event.key_code == binding.key_code;
    let modifiers_match = event.modifiers.option == binding.needs_option
        && event.modifiers.command == binding.needs_command
        && event.modifiers.control == binding.needs_control
        && event.modifiers.shift == binding.needs_shift;

    if !is_target_key || !modifiers_match || event.is_repeat {
        return LogicalAction::PassThrough;
    }

    if event.is_key_up {
        LogicalAction::HotkeyUp
    } else {
        LogicalAction::HotkeyDown
    }
}

/// Classify an event as a recording cancel.
///
/// Only bare Escape key-down qualifies; any modifier or a key-up passes
/// through.
#[must_use]
pub fn evaluate_cancel(event: &KeyEventSnapshot) -> LogicalAction {
    if event.key_code == ESCAPE_KEY_CODE
        && event.modifiers == ModifierFlags::NONE
        && !event.is_key_up
    {
        LogicalAction::CancelRecording
    } else {
        LogicalAction::PassThrough
    }
}
