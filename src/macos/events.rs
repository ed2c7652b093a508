//! Kill switch: a global, listen-only event tap watching for Cmd+Opt+Esc.
//! Runs on its own thread with its own run loop, outside the IPC loop, and
//! terminates the process directly. It must never depend on the health of
//! the dispatcher, the policy engine or the channel.

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop};
use core_graphics::event::{
    CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
};
use std::thread;
use tracing::{error, info};

// kCGKeyboardEventKeycode field index.
const KEYCODE_FIELD: u32 = 9;
const ESCAPE_KEYCODE: i64 = 53;
// CGEventFlags: maskCommand | maskAlternate.
const FLAG_COMMAND: u64 = 0x0010_0000;
const FLAG_OPTION: u64 = 0x0008_0000;

pub fn start_kill_switch() {
    thread::spawn(|| {
        let tap_result = CGEventTap::new(
            CGEventTapLocation::HID,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            vec![CGEventType::KeyDown],
            |_proxy, _type, event| {
                let keycode = event.get_integer_value_field(KEYCODE_FIELD);
                let flags = event.get_flags().bits();
                if keycode == ESCAPE_KEYCODE
                    && flags & FLAG_COMMAND != 0
                    && flags & FLAG_OPTION != 0
                {
                    // Hard exit, bypassing any in-flight request.
                    TracingAuditSink.emit(AuditEvent::kill_switch());
                    eprintln!("[kill-switch] Cmd+Opt+Esc: terminating adapter");
                    std::process::exit(130);
                }
                Some(event.to_owned())
            },
        );

        match tap_result {
            Ok(tap) => match tap.mach_port.create_runloop_source(0) {
                Ok(source) => {
                    let run_loop = CFRunLoop::get_current();
                    run_loop.add_source(&source, unsafe { kCFRunLoopCommonModes });
                    info!("kill switch armed (Cmd+Opt+Esc)");
                    CFRunLoop::run_current();
                }
                Err(_) => error!("kill switch: run loop source creation failed"),
            },
            Err(_) => {
                error!("kill switch: event tap creation failed; accessibility access may be missing")
            }
        }
    });
}
