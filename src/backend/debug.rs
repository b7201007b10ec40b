// Debug bridge - backend validation messages into the application's sink
//
// Severity/source filters are expressed as our own bit flags and translated
// to debug-utils messenger bits by a fixed shift table. The messenger
// callback re-enters `Debugger::report` through the user-data pointer.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use bitflags::bitflags;
use std::borrow::Cow;
use std::ffi::{c_void, CStr};

use super::catalog::names;
use crate::error::{Error, Result};

bitflags! {
    /// Message severities a debugger listens to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DebugSeverity: u32 {
        /// Log messages
        const VERBOSE = 0x10;
        /// Notification messages
        const NOTIF = 0x08;
        /// Warning messages
        const WARNING = 0x04;
        /// Error messages
        const ERROR = 0x02;
        /// Fatal error messages
        const FATAL = 0x01;

        const ALL = Self::VERBOSE.bits()
            | Self::NOTIF.bits()
            | Self::WARNING.bits()
            | Self::ERROR.bits()
            | Self::FATAL.bits();
    }
}

bitflags! {
    /// Where a message came from
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DebugSource: u32 {
        /// Reported by this crate
        const CORE = 0x20;
        /// Reported by the Vulkan implementation or its layers
        const VULKAN = 0x10;

        const ALL = Self::CORE.bits() | Self::VULKAN.bits();
    }
}

impl DebugSeverity {
    pub fn parse(name: &str) -> Option<Self> {
        Self::from_name(&name.trim().to_ascii_uppercase())
    }
}

impl DebugSource {
    pub fn parse(name: &str) -> Option<Self> {
        Self::from_name(&name.trim().to_ascii_uppercase())
    }
}

/// Receiver of filtered debug messages
pub trait DebugSink: Send + Sync {
    fn report(&self, severity: DebugSeverity, source: DebugSource, message: &str);
}

impl<F> DebugSink for F
where
    F: Fn(DebugSeverity, DebugSource, &str) + Send + Sync,
{
    fn report(&self, severity: DebugSeverity, source: DebugSource, message: &str) {
        self(severity, source, message)
    }
}

/// Default sink: forwards into the `log` facade
pub struct LogSink;

impl DebugSink for LogSink {
    fn report(&self, severity: DebugSeverity, source: DebugSource, message: &str) {
        let target = if source.contains(DebugSource::VULKAN) {
            "vulkan"
        } else {
            "core"
        };

        log::log!(target: target, log_level(severity), "{}", message);
    }
}

pub(crate) fn log_level(severity: DebugSeverity) -> log::Level {
    if severity.intersects(DebugSeverity::ERROR | DebugSeverity::FATAL) {
        log::Level::Error
    } else if severity.contains(DebugSeverity::WARNING) {
        log::Level::Warn
    } else if severity.contains(DebugSeverity::NOTIF) {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}

/// Application debug sink plus the filters it listens with
pub struct Debugger {
    severities: DebugSeverity,
    sources: DebugSource,
    sink: Box<dyn DebugSink>,
}

impl Debugger {
    pub fn new(severities: DebugSeverity, sources: DebugSource, sink: Box<dyn DebugSink>) -> Self {
        Self { severities, sources, sink }
    }

    /// Debugger that writes through `log`
    pub fn with_log(severities: DebugSeverity, sources: DebugSource) -> Self {
        Self::new(severities, sources, Box::new(LogSink))
    }

    pub fn severities(&self) -> DebugSeverity {
        self.severities
    }

    pub fn sources(&self) -> DebugSource {
        self.sources
    }

    /// Forward `message` if both filters accept it
    pub fn report(&self, severity: DebugSeverity, source: DebugSource, message: &str) {
        if !self.severities.intersects(severity) || !self.sources.intersects(source) {
            return;
        }
        self.sink.report(severity, source, message);
    }
}

impl std::fmt::Debug for Debugger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debugger")
            .field("severities", &self.severities)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

/// Hand a diagnostic raised by this crate to the attached debugger
pub(crate) fn report_core(debugger: Option<&Debugger>, severity: DebugSeverity, message: &str) {
    if let Some(debugger) = debugger {
        debugger.report(severity, DebugSource::CORE, message);
    }
}

/// Called on unrecoverable host allocation failure
pub type FatalHook = fn(&str) -> !;

/// Default fatal hook: log and abort the process
pub fn abort_process(message: &str) -> ! {
    log::error!("FATAL: {}", message);
    std::process::abort()
}

// NOTIF has no counterpart: VERBOSE already enables both VERBOSE and INFO.
pub fn severity_to_vk(severities: DebugSeverity) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    let bits = severities.bits();
    let verbose = DebugSeverity::VERBOSE.bits();

    let raw = (bits & verbose) >> 4                         // VERBOSE -> VERBOSE
        | (bits & verbose)                                  //         -> INFO
        | (bits & DebugSeverity::WARNING.bits()) << 6       // WARNING -> WARNING
        | (bits & DebugSeverity::ERROR.bits()) << 11        // ERROR   -> ERROR
        | (bits & DebugSeverity::FATAL.bits()) << 12;       // FATAL   -> ERROR

    vk::DebugUtilsMessageSeverityFlagsEXT::from_raw(raw)
}

pub fn source_to_vk(sources: DebugSource) -> vk::DebugUtilsMessageTypeFlagsEXT {
    if sources.contains(DebugSource::VULKAN) {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
    } else {
        vk::DebugUtilsMessageTypeFlagsEXT::empty()
    }
}

pub fn classify_severity(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> DebugSeverity {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        DebugSeverity::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        DebugSeverity::WARNING
    } else {
        DebugSeverity::VERBOSE
    }
}

fn message_type_label(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "VALIDATION"
    } else if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "PERFORMANCE"
    } else {
        "GENERAL"
    }
}

// `p_user_data` is always the `Debugger` the messenger was created for.
unsafe extern "system" fn bridge_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_user_data.is_null() || p_callback_data.is_null() {
        return vk::FALSE;
    }

    let debugger = &*(p_user_data as *const Debugger);
    let data = &*p_callback_data;

    let message = if data.p_message.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(data.p_message).to_string_lossy()
    };

    debugger.report(
        classify_severity(message_severity),
        DebugSource::VULKAN,
        &format!("[Vulkan] {}: {}", message_type_label(message_type), message),
    );

    vk::FALSE
}

/// Messenger description for `debugger`, or `None` if its filters select
/// nothing the backend can send.
///
/// The returned struct points at `debugger`; it must stay at a fixed
/// address for as long as any messenger built from it is alive.
pub fn messenger_info(debugger: &Debugger) -> Option<vk::DebugUtilsMessengerCreateInfoEXT> {
    let severity = severity_to_vk(debugger.severities());
    let types = source_to_vk(debugger.sources());

    if severity.is_empty() || types.is_empty() {
        return None;
    }

    Some(
        vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(severity)
            .message_type(types)
            .pfn_user_callback(Some(bridge_callback))
            .user_data(debugger as *const Debugger as *mut c_void)
            .build(),
    )
}

/// Live debug-utils messenger; must be dropped before its instance
pub struct DebugBridge {
    loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugBridge {
    /// Attach a messenger if the debug-utils extension was enabled.
    ///
    /// `enabled_extensions` is the negotiated list; the backend is never
    /// re-queried.
    pub fn attach(
        entry: &Entry,
        instance: &ash::Instance,
        enabled_extensions: &[String],
        debugger: &Debugger,
    ) -> Result<Option<Self>> {
        if !enabled_extensions.iter().any(|e| e == names::DEBUG_UTILS) {
            log::debug!("{} not enabled, no debug bridge", names::DEBUG_UTILS);
            return Ok(None);
        }

        let Some(create_info) = messenger_info(debugger) else {
            log::info!("Debugger filters select no Vulkan messages, no debug bridge");
            return Ok(None);
        };

        let loader = DebugUtils::new(entry, instance);
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(Error::backend("vkCreateDebugUtilsMessengerEXT"))?;

        log::info!(
            "Debug bridge attached (severities {:?}, sources {:?})",
            debugger.severities(),
            debugger.sources()
        );

        Ok(Some(Self { loader, messenger }))
    }
}

impl Drop for DebugBridge {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::recording;
    use super::*;
    use std::ffi::CString;

    #[test]
    fn severity_translation_follows_shift_table() {
        type S = vk::DebugUtilsMessageSeverityFlagsEXT;

        assert_eq!(severity_to_vk(DebugSeverity::VERBOSE), S::VERBOSE | S::INFO);
        assert_eq!(severity_to_vk(DebugSeverity::NOTIF), S::empty());
        assert_eq!(severity_to_vk(DebugSeverity::WARNING), S::WARNING);
        assert_eq!(severity_to_vk(DebugSeverity::ERROR), S::ERROR);
        assert_eq!(severity_to_vk(DebugSeverity::FATAL), S::ERROR);
        assert_eq!(
            severity_to_vk(DebugSeverity::ALL),
            S::VERBOSE | S::INFO | S::WARNING | S::ERROR
        );
    }

    #[test]
    fn all_values_cover_their_category() {
        assert_eq!(DebugSeverity::ALL, DebugSeverity::all());
        assert_eq!(DebugSource::ALL, DebugSource::all());
        assert_eq!(DebugSeverity::parse("warning"), Some(DebugSeverity::WARNING));
        assert_eq!(DebugSource::parse("all"), Some(DebugSource::ALL));
    }

    #[test]
    fn no_messenger_without_vulkan_source() {
        let (debugger, _) = recording(DebugSeverity::ALL, DebugSource::CORE);
        assert!(messenger_info(&debugger).is_none());

        let (debugger, _) = recording(DebugSeverity::NOTIF, DebugSource::ALL);
        assert!(messenger_info(&debugger).is_none());

        let (debugger, _) = recording(DebugSeverity::WARNING, DebugSource::VULKAN);
        let info = messenger_info(&debugger).expect("messenger info");
        assert_eq!(info.message_severity, vk::DebugUtilsMessageSeverityFlagsEXT::WARNING);
        assert_eq!(info.p_user_data as *const Debugger, &debugger as *const Debugger);
    }

    #[test]
    fn callback_redispatches_with_prefix_and_severity() {
        let (debugger, log) = recording(DebugSeverity::ALL, DebugSource::ALL);
        let message = CString::new("vkCreateBuffer: size is zero").unwrap();
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: message.as_ptr(),
            ..Default::default()
        };

        let ret = unsafe {
            bridge_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                &debugger as *const Debugger as *mut c_void,
            )
        };

        assert_eq!(ret, vk::FALSE);
        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, DebugSeverity::ERROR);
        assert_eq!(log[0].1, DebugSource::VULKAN);
        assert_eq!(log[0].2, "[Vulkan] VALIDATION: vkCreateBuffer: size is zero");
    }

    #[test]
    fn callback_respects_debugger_filters() {
        let (debugger, log) = recording(DebugSeverity::ERROR, DebugSource::VULKAN);
        let message = CString::new("loader info").unwrap();
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: message.as_ptr(),
            ..Default::default()
        };

        unsafe {
            bridge_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                &data,
                &debugger as *const Debugger as *mut c_void,
            );
        }

        assert!(log.lock().is_empty());
    }

    #[test]
    fn core_reports_are_tagged_and_filtered() {
        let (debugger, log) = recording(DebugSeverity::WARNING | DebugSeverity::FATAL, DebugSource::CORE);

        report_core(Some(&debugger), DebugSeverity::WARNING, "layer missing");
        report_core(Some(&debugger), DebugSeverity::NOTIF, "selected gpu");
        report_core(Some(&debugger), DebugSeverity::FATAL, "out of memory");
        report_core(None, DebugSeverity::WARNING, "nobody listening");

        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], (DebugSeverity::WARNING, DebugSource::CORE, "layer missing".to_owned()));
        assert_eq!(log[1].0, DebugSeverity::FATAL);
        assert_eq!(log_level(DebugSeverity::FATAL), log::Level::Error);
        assert_eq!(log_level(DebugSeverity::NOTIF), log::Level::Info);
    }
}
