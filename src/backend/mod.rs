// Backend module - capability negotiation over Vulkan
//
// Design: static catalog -> instance negotiation -> per-renderer device
// selection -> logical device construction. Planning steps are pure over
// enumerated data; only the create calls touch the driver.

// Core diagnostic: `log` at the matching level, then the attached debugger
macro_rules! core_diag {
    ($debugger:expr, $severity:ident, $($arg:tt)+) => {{
        let severity = $crate::backend::debug::DebugSeverity::$severity;
        let message = format!($($arg)+);
        log::log!($crate::backend::debug::log_level(severity), "{}", message);
        $crate::backend::debug::report_core($debugger, severity, &message);
    }};
}

pub mod catalog;
pub mod context;
pub mod debug;
pub mod device;
pub mod instance;
pub mod physical;

pub use catalog::{aggregate, FeatureRequest, Features, QueueRoles, Version};
pub use context::{Context, ContextDescriptor, Renderer, RendererDescriptor};
pub use debug::{DebugSeverity, DebugSink, DebugSource, Debugger, LogSink};
pub use device::{build_device, DeviceDispatch, LogicalDevice, QueueCounts};
pub use instance::{negotiate_instance, ApplicationInfo, NegotiatedInstance, NegotiationOptions};
pub use physical::{
    select_device, PhysicalDeviceCandidate, QueueFamilyAssignment, ScoreWeights,
    SelectedDevice, SelectionMode,
};

use std::ffi::CStr;
use std::os::raw::c_char;

/// Owned copy of a fixed-size, NUL-terminated name field
pub(crate) fn vk_name(raw: &[c_char]) -> String {
    // Vulkan guarantees these arrays are NUL-terminated
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}
