// Context - one instance per process, renderers borrowed from it
//
// Ownership is strictly hierarchical:
//   Context (entry, instance, debug bridge)
//     └── Renderer<'ctx> (logical device, queues, dispatch table)
// Dropping a renderer destroys its device; dropping the context destroys the
// bridge, then the instance, then releases the process-wide claim.

use ash::Entry;
use parking_lot::{const_mutex, Mutex};

use super::catalog::{aggregate, FeatureRequest, QueueRoles};
use super::debug::{self, DebugBridge, Debugger, FatalHook};
use super::device::{build_device, LogicalDevice, QueueCounts};
use super::instance::{negotiate_instance, ApplicationInfo, NegotiationOptions};
use super::physical::{
    select_device, DeviceScore, PhysicalDeviceCandidate, ScoreWeights, SelectionMode,
};
use crate::error::{Error, Result};

static CONTEXT_CLAIMED: Mutex<bool> = const_mutex(false);

/// Held by the live context; releasing it allows the next one
struct ContextClaim(());

impl ContextClaim {
    fn acquire() -> Result<Self> {
        let mut claimed = CONTEXT_CLAIMED.lock();
        if *claimed {
            log::error!("Refusing to create a second context");
            return Err(Error::ContextExists);
        }
        *claimed = true;
        Ok(Self(()))
    }
}

impl Drop for ContextClaim {
    fn drop(&mut self) {
        *CONTEXT_CLAIMED.lock() = false;
    }
}

/// One renderer's request and selection policy
#[derive(Debug, Clone, Default)]
pub struct RendererDescriptor {
    pub request: FeatureRequest,
    pub selection_mode: SelectionMode,
    pub queue_counts: QueueCounts,
    pub weights: ScoreWeights,
}

impl RendererDescriptor {
    pub fn new(request: FeatureRequest) -> Self {
        Self {
            request,
            ..Self::default()
        }
    }
}

/// Everything needed to create a context and its renderers
pub struct ContextDescriptor {
    pub application: ApplicationInfo,
    pub renderers: Vec<RendererDescriptor>,
    /// `None` disables validation layers and the debug bridge
    pub debugger: Option<Debugger>,
    pub options: NegotiationOptions,
    pub fatal: FatalHook,
}

impl Default for ContextDescriptor {
    fn default() -> Self {
        Self {
            application: ApplicationInfo::default(),
            renderers: Vec::new(),
            debugger: None,
            options: NegotiationOptions::default(),
            fatal: debug::abort_process,
        }
    }
}

pub struct Context {
    debug_bridge: Option<DebugBridge>,
    instance: ash::Instance,
    layers: Vec<String>,
    extensions: Vec<String>,
    features: FeatureRequest,
    renderers: Vec<RendererDescriptor>,
    fatal: FatalHook,
    // boxed: the messenger holds a pointer to it
    debugger: Option<Box<Debugger>>,
    entry: Entry,
    _claim: ContextClaim,
}

impl Context {
    /// Claim the process slot, load Vulkan and negotiate the instance for
    /// every renderer in `descriptor`.
    pub fn new(descriptor: ContextDescriptor) -> Result<Self> {
        let claim = ContextClaim::acquire()?;

        let entry = unsafe { Entry::load() }.map_err(|e| {
            log::error!("Failed to load Vulkan library. Is Vulkan installed?");
            Error::from(e)
        })?;

        let combined = aggregate(descriptor.renderers.iter().map(|r| &r.request));
        log::info!(
            "Creating context for {} renderer(s), features {:?}",
            descriptor.renderers.len(),
            combined.features
        );

        let debugger = descriptor.debugger.map(Box::new);
        let negotiated = negotiate_instance(
            &entry,
            &descriptor.application,
            &combined,
            &descriptor.options,
            debugger.as_deref(),
        )?;

        let debug_bridge = match debugger.as_deref() {
            Some(debugger) => {
                match DebugBridge::attach(&entry, &negotiated.instance, &negotiated.extensions, debugger) {
                    Ok(bridge) => bridge,
                    Err(e) => {
                        core_diag!(Some(debugger), ERROR, "Failed to attach debug bridge: {}", e);
                        unsafe { negotiated.instance.destroy_instance(None) };
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            debug_bridge,
            instance: negotiated.instance,
            layers: negotiated.layers,
            extensions: negotiated.extensions,
            features: negotiated.features,
            renderers: descriptor.renderers,
            fatal: descriptor.fatal,
            debugger,
            entry,
            _claim: claim,
        })
    }

    /// Select and build a logical device for every renderer descriptor.
    ///
    /// Each renderer only sees the features the instance kept.
    pub fn create_renderers(&self) -> Result<Vec<Renderer<'_>>> {
        let candidates = PhysicalDeviceCandidate::enumerate(&self.instance)?;
        log::info!("Found {} physical device(s)", candidates.len());

        let mut renderers = Vec::with_capacity(self.renderers.len());
        for descriptor in &self.renderers {
            let request = FeatureRequest {
                features: descriptor.request.features & self.features.features,
                ..descriptor.request
            };

            let selected = select_device(
                &candidates,
                &request,
                descriptor.selection_mode,
                &descriptor.weights,
                self.debugger(),
            )?;
            let device = build_device(
                &self.instance,
                &selected,
                &descriptor.queue_counts,
                self.fatal,
                self.debugger(),
            )?;

            renderers.push(Renderer {
                context: self,
                name: selected.candidate.name,
                requested: descriptor.request,
                score: selected.score,
                device,
            });
        }

        Ok(renderers)
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Aggregated request after instance-level narrowing
    pub fn features(&self) -> FeatureRequest {
        self.features
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn has_debug_bridge(&self) -> bool {
        self.debug_bridge.is_some()
    }

    pub fn debugger(&self) -> Option<&Debugger> {
        self.debugger.as_deref()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        log::info!("Destroying context...");

        // messenger first, it belongs to the instance
        drop(self.debug_bridge.take());

        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

/// A logical device built for one renderer descriptor
pub struct Renderer<'ctx> {
    context: &'ctx Context,
    name: String,
    requested: FeatureRequest,
    score: DeviceScore,
    device: LogicalDevice,
}

impl<'ctx> Renderer<'ctx> {
    pub fn context(&self) -> &'ctx Context {
        self.context
    }

    pub fn device_name(&self) -> &str {
        &self.name
    }

    /// What the descriptor asked for
    pub fn requested(&self) -> FeatureRequest {
        self.requested
    }

    /// What the renderer may actually use
    pub fn features(&self) -> FeatureRequest {
        self.device.supported
    }

    pub fn score(&self) -> DeviceScore {
        self.score
    }

    pub fn device(&self) -> &LogicalDevice {
        &self.device
    }

    pub fn queues(&self, role: QueueRoles) -> &[ash::vk::Queue] {
        self.device.queues(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_claim_at_a_time() {
        let first = ContextClaim::acquire().unwrap();
        assert!(matches!(ContextClaim::acquire(), Err(Error::ContextExists)));
        assert!(matches!(ContextClaim::acquire(), Err(Error::ContextExists)));

        drop(first);
        let second = ContextClaim::acquire().unwrap();
        drop(second);
    }

    #[test]
    fn descriptor_defaults_to_no_debugger() {
        let descriptor = ContextDescriptor::default();
        assert!(descriptor.debugger.is_none());
        assert!(descriptor.renderers.is_empty());

        let renderer = RendererDescriptor::new(FeatureRequest::default());
        assert_eq!(renderer.selection_mode, SelectionMode::Optimal);
        assert_eq!(renderer.weights, ScoreWeights::default());
    }
}
