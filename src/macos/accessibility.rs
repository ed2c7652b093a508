//! macOS accessibility backend. AXUIElement references stay inside this
//! module; the rest of the crate only ever sees opaque tokens.

use crate::backend::{NativeBackend, NodeHandle, NodeInfo, Scope};
use crate::error::AgentError;
use accessibility_sys::{
    AXIsProcessTrusted, AXUIElementCopyAttributeValue, AXUIElementCreateSystemWide,
    AXUIElementPerformAction, AXUIElementRef,
};
use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::{CFRelease, CFTypeRef, TCFType};
use core_foundation::string::{CFString, CFStringRef};
use core_graphics::event::{CGEvent, CGEventTapLocation, CGEventType, CGMouseButton};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use core_graphics::geometry::CGPoint;
use std::collections::HashMap;
use std::ptr;

/// Owned AX element; releases its retain on drop.
struct AxElement(AXUIElementRef);

impl Drop for AxElement {
    fn drop(&mut self) {
        unsafe { CFRelease(self.0 as CFTypeRef) };
    }
}

pub struct AxBackend {
    elements: HashMap<NodeHandle, AxElement>,
    next_token: NodeHandle,
}

impl AxBackend {
    pub fn new() -> Self {
        Self {
            elements: HashMap::new(),
            next_token: 0,
        }
    }

    fn store(&mut self, element: AXUIElementRef) -> NodeHandle {
        let token = self.next_token;
        self.next_token += 1;
        self.elements.insert(token, AxElement(element));
        token
    }

    fn element(&self, handle: NodeHandle) -> Result<AXUIElementRef, AgentError> {
        self.elements
            .get(&handle)
            .map(|e| e.0)
            .ok_or_else(|| AgentError::StaleReference(handle.to_string()))
    }
}

impl Default for AxBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn get_attribute(element: AXUIElementRef, attribute: &str) -> Option<CFTypeRef> {
    unsafe {
        let name = CFString::new(attribute);
        let mut value: CFTypeRef = ptr::null_mut();
        let err = AXUIElementCopyAttributeValue(element, name.as_concrete_TypeRef(), &mut value);
        if err == 0 {
            Some(value)
        } else {
            None
        }
    }
}

fn get_string_attribute(element: AXUIElementRef, attribute: &str) -> Option<String> {
    let value = get_attribute(element, attribute)?;
    let s = unsafe { CFString::wrap_under_create_rule(value as CFStringRef) };
    Some(s.to_string())
}

impl NativeBackend for AxBackend {
    fn root(&mut self, scope: Scope) -> Result<NodeHandle, AgentError> {
        if !unsafe { AXIsProcessTrusted() } {
            return Err(AgentError::PermissionDenied);
        }

        let system_wide = unsafe { AXUIElementCreateSystemWide() };
        if scope == Scope::Screen {
            return Ok(self.store(system_wide));
        }
        let _system = AxElement(system_wide);

        let app = get_attribute(system_wide, "AXFocusedApplication")
            .map(|r| r as AXUIElementRef)
            .ok_or_else(|| AgentError::ExecutionFailed("no focused application".to_string()))?;

        // Focused window when there is one, otherwise the app root.
        match get_attribute(app, "AXFocusedWindow") {
            Some(window) => {
                drop(AxElement(app));
                Ok(self.store(window as AXUIElementRef))
            }
            None => Ok(self.store(app)),
        }
    }

    fn node_info(&mut self, handle: NodeHandle) -> Result<NodeInfo, AgentError> {
        let element = self.element(handle)?;
        Ok(NodeInfo {
            role: get_string_attribute(element, "AXRole").unwrap_or_default(),
            title: get_string_attribute(element, "AXTitle"),
            value: get_string_attribute(element, "AXValue"),
        })
    }

    fn children(&mut self, handle: NodeHandle) -> Result<Vec<NodeHandle>, AgentError> {
        let element = self.element(handle)?;
        let Some(children_ref) = get_attribute(element, "AXChildren") else {
            return Ok(Vec::new());
        };

        let mut tokens = Vec::new();
        unsafe {
            let array = CFArray::<CFTypeRef>::wrap_under_get_rule(children_ref as CFArrayRef);
            for i in 0..array.len() {
                let Some(child) = array.get(i) else { continue };
                let child_ref = *child as AXUIElementRef;
                core_foundation::base::CFRetain(child_ref as CFTypeRef);
                tokens.push(self.store(child_ref));
            }
            CFRelease(children_ref);
        }
        Ok(tokens)
    }

    fn is_live(&self, handle: NodeHandle) -> bool {
        // A dead element stops answering attribute reads.
        match self.element(handle) {
            Ok(element) => get_string_attribute(element, "AXRole").is_some(),
            Err(_) => false,
        }
    }

    // Dropping the entries releases the CF retains; tokens stay monotonic so
    // a superseded handle can never resolve to a recycled slot.
    fn reset(&mut self) {
        self.elements.clear();
    }

    fn press(&mut self, handle: NodeHandle) -> Result<(), AgentError> {
        let element = self.element(handle)?;
        let action = CFString::new("AXPress");
        let err = unsafe { AXUIElementPerformAction(element, action.as_concrete_TypeRef()) };
        if err != 0 {
            return Err(AgentError::ExecutionFailed(format!(
                "AXPress rejected (AXError {err})"
            )));
        }
        Ok(())
    }

    fn move_mouse(&mut self, x: f64, y: f64) -> Result<(), AgentError> {
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| AgentError::ExecutionFailed("event source unavailable".to_string()))?;
        let event = CGEvent::new_mouse_event(
            source,
            CGEventType::MouseMoved,
            CGPoint::new(x, y),
            CGMouseButton::Left,
        )
        .map_err(|_| AgentError::ExecutionFailed("mouse event creation failed".to_string()))?;
        event.post(CGEventTapLocation::HID);
        Ok(())
    }

    fn type_text(&mut self, text: &str) -> Result<(), AgentError> {
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| AgentError::ExecutionFailed("event source unavailable".to_string()))?;
        let down = CGEvent::new_keyboard_event(source.clone(), 0, true)
            .map_err(|_| AgentError::ExecutionFailed("key event creation failed".to_string()))?;
        down.set_string(text);
        down.post(CGEventTapLocation::HID);
        let up = CGEvent::new_keyboard_event(source, 0, false)
            .map_err(|_| AgentError::ExecutionFailed("key event creation failed".to_string()))?;
        up.post(CGEventTapLocation::HID);
        Ok(())
    }
}
