//! System-wide key event interception via a CGEvent tap.
//!
//! The tap callback runs inside the OS input-delivery pipeline: it
//! classifies the event, fires the injected reaction, and decides whether to
//! swallow, nothing heavier. All real work happens on the controller task
//! the reactions dispatch to.

use core_foundation::base::TCFType;
use core_foundation::mach_port::CFMachPort;
use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventType, EventField,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use super::evaluator::{self, KeyEventSnapshot, LogicalAction, ModifierFlags};
use crate::config::ConfigStore;

/// Reactions fired from the tap, dispatched by the owner to the logical
/// thread.
pub struct InterceptorCallbacks {
    /// Fired once per qualifying chord key-down (toggle semantics: never on
    /// key-up)
    pub on_hotkey_pressed: Box<dyn Fn() + Send + Sync>,
    /// Fired on qualifying Escape while `should_intercept_cancel` holds
    pub on_cancel_pressed: Box<dyn Fn() + Send + Sync>,
    /// Evaluated per Escape press; when false, Escape passes through
    /// untouched
    pub should_intercept_cancel: Box<dyn Fn() -> bool + Send + Sync>,
}

/// Process-wide key-event filter that can observe and swallow events before
/// any application sees them.
///
/// Requires the Accessibility privilege; [`KeyEventInterceptor::start`]
/// reports whether the host granted it. The binding is re-read from the
/// [`ConfigStore`] on every event, so binding changes apply immediately.
pub struct KeyEventInterceptor {
    config: Arc<dyn ConfigStore>,
    callbacks: Arc<InterceptorCallbacks>,
    running: Arc<AtomicBool>,
    run_loop: Mutex<Option<CFRunLoop>>,
    thread: Option<JoinHandle<()>>,
}

impl KeyEventInterceptor {
    /// New interceptor; nothing is installed until `start`.
    #[must_use]
    pub fn new(config: Arc<dyn ConfigStore>, callbacks: InterceptorCallbacks) -> Self {
        Self {
            config,
            callbacks: Arc::new(callbacks),
            running: Arc::new(AtomicBool::new(false)),
            run_loop: Mutex::new(None),
            thread: None,
        }
    }

    /// Install the tap on a dedicated thread. Returns whether installation
    /// succeeded; calling while already running returns `true` without
    /// reinstalling.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return true;
        }

        let (ready_tx, ready_rx) = mpsc::channel();
        let config = Arc::clone(&self.config);
        let callbacks = Arc::clone(&self.callbacks);
        let running = Arc::clone(&self.running);

        let thread = std::thread::Builder::new()
            .name("voicekey-event-tap".to_owned())
            .spawn(move || tap_thread_main(&config, &callbacks, &running, &ready_tx));

        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                error!(error = %e, "failed to spawn event tap thread");
                return false;
            }
        };

        match ready_rx.recv() {
            Ok(Some(run_loop)) => {
                if let Ok(mut guard) = self.run_loop.lock() {
                    *guard = Some(run_loop);
                }
                self.thread = Some(thread);
                info!("event tap installed");
                true
            }
            _ => {
                let _ = thread.join();
                error!(
                    "event tap installation failed - grant Accessibility permission in System Settings"
                );
                false
            }
        }
    }

    /// Remove the tap. Safe to call when not running and from `Drop`.
    pub fn stop(&mut self) {
        let run_loop = self.run_loop.lock().ok().and_then(|mut guard| guard.take());
        if let Some(run_loop) = run_loop {
            run_loop.stop();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// The tap is currently installed
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for KeyEventInterceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tap_thread_main(
    config: &Arc<dyn ConfigStore>,
    callbacks: &Arc<InterceptorCallbacks>,
    running: &Arc<AtomicBool>,
    ready_tx: &mpsc::Sender<Option<CFRunLoop>>,
) {
    // The callback needs the mach port to re-enable the tap after a timeout
    // disable, but the port only exists once the tap is created; hand it in
    // through a cell filled right after creation.
    let port_cell: Rc<RefCell<Option<CFMachPort>>> = Rc::new(RefCell::new(None));

    let cb_config = Arc::clone(config);
    let cb_callbacks = Arc::clone(callbacks);
    let cb_port = Rc::clone(&port_cell);

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::Default,
        vec![CGEventType::KeyDown, CGEventType::KeyUp],
        move |_proxy, event_type, event| {
            handle_tap_event(&cb_config, &cb_callbacks, &cb_port, event_type, event)
        },
    );

    let Ok(tap) = tap else {
        error!("CGEventTap creation failed");
        let _ = ready_tx.send(None);
        return;
    };

    *port_cell.borrow_mut() = Some(tap.mach_port.clone());

    let Ok(source) = tap.mach_port.create_runloop_source(0) else {
        error!("failed to create run loop source for event tap");
        let _ = ready_tx.send(None);
        return;
    };

    let run_loop = CFRunLoop::get_current();
    #[allow(unsafe_code)]
    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }
    tap.enable();

    running.store(true, Ordering::SeqCst);
    let _ = ready_tx.send(Some(run_loop.clone()));

    debug!("event tap run loop entered");
    CFRunLoop::run_current();
    debug!("event tap run loop exited");

    running.store(false, Ordering::SeqCst);
}

fn handle_tap_event(
    config: &Arc<dyn ConfigStore>,
    callbacks: &Arc<InterceptorCallbacks>,
    port: &Rc<RefCell<Option<CFMachPort>>>,
    event_type: CGEventType,
    event: &CGEvent,
) -> Option<CGEvent> {
    // The host disables taps whose callbacks stall; recover in place rather
    // than losing the hotkey until restart
    if matches!(event_type, CGEventType::TapDisabledByTimeout) {
        warn!("event tap disabled by timeout, re-enabling");
        if let Some(port) = port.borrow().as_ref() {
            reenable_tap(port);
        }
        return None;
    }

    if !matches!(event_type, CGEventType::KeyDown | CGEventType::KeyUp) {
        return None;
    }

    let snapshot = snapshot_event(event, event_type);
    let binding = config.load();

    match evaluator::evaluate_hotkey(&snapshot, &binding) {
        LogicalAction::HotkeyDown => {
            debug!("hotkey chord down");
            (callbacks.on_hotkey_pressed)();
            Some(swallow(event))
        }
        // Toggle semantics: the release is consumed but triggers nothing
        LogicalAction::HotkeyUp => Some(swallow(event)),
        LogicalAction::CancelRecording | LogicalAction::PassThrough => {
            if evaluator::evaluate_cancel(&snapshot) == LogicalAction::CancelRecording
                && (callbacks.should_intercept_cancel)()
            {
                debug!("escape intercepted");
                (callbacks.on_cancel_pressed)();
                Some(swallow(event))
            } else {
                None
            }
        }
    }
}

fn snapshot_event(event: &CGEvent, event_type: CGEventType) -> KeyEventSnapshot {
    let flags = event.get_flags();
    KeyEventSnapshot {
        key_code: event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE),
        modifiers: ModifierFlags {
            option: flags.contains(CGEventFlags::CGEventFlagAlternate),
            command: flags.contains(CGEventFlags::CGEventFlagCommand),
            control: flags.contains(CGEventFlags::CGEventFlagControl),
            shift: flags.contains(CGEventFlags::CGEventFlagShift),
        },
        is_repeat: event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT) != 0,
        is_key_up: matches!(event_type, CGEventType::KeyUp),
    }
}

/// Consume an event by handing back a copy re-typed to `Null`.
fn swallow(event: &CGEvent) -> CGEvent {
    let consumed = event.clone();
    consumed.set_type(CGEventType::Null);
    consumed
}

fn reenable_tap(port: &CFMachPort) {
    #[allow(unsafe_code)]
    {
        extern "C" {
            fn CGEventTapEnable(tap: core_foundation::base::CFTypeRef, enable: bool);
        }
        // SAFETY: the port is the live mach port of this tap, owned by the
        // same thread the callback runs on.
        unsafe {
            CGEventTapEnable(
                port.as_concrete_TypeRef() as core_foundation::base::CFTypeRef,
                true,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HotkeyBinding;

    struct FixedBinding(HotkeyBinding);

    impl ConfigStore for FixedBinding {
        fn load(&self) -> HotkeyBinding {
            self.0
        }
        fn save(&self, _binding: HotkeyBinding) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn noop_callbacks() -> InterceptorCallbacks {
        InterceptorCallbacks {
            on_hotkey_pressed: Box::new(|| {}),
            on_cancel_pressed: Box::new(|| {}),
            should_intercept_cancel: Box::new(|| false),
        }
    }

    #[test]
    fn test_stop_without_start_is_safe() {
        let mut interceptor = KeyEventInterceptor::new(
            Arc::new(FixedBinding(HotkeyBinding::default())),
            noop_callbacks(),
        );
        interceptor.stop();
        interceptor.stop();
        assert!(!interceptor.is_running());
    }

    #[test]
    #[ignore = "requires Accessibility permission on macOS"]
    fn test_start_is_idempotent() {
        let mut interceptor = KeyEventInterceptor::new(
            Arc::new(FixedBinding(HotkeyBinding::default())),
            noop_callbacks(),
        );

        assert!(interceptor.start());
        assert!(interceptor.is_running());
        assert!(interceptor.start());

        interceptor.stop();
        assert!(!interceptor.is_running());
    }
}
