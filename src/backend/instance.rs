// Instance negotiation - layers and extensions against what is installed
//
// Responsibilities:
// - Enumerate available instance layers/extensions
// - Derive what the requested features (and the debug sink) need
// - Drop anything missing, narrowing features that lost a requirement
// - Create the instance with exactly the confirmed names

use ash::{vk, Entry};
use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::c_char;

use super::catalog::{self, names, FeatureRequest, Version};
use super::debug::{self, Debugger};
use super::vk_name;
use crate::error::{Error, Result};

/// Source of instance-level layer/extension availability
pub trait InstanceInventory {
    fn layers(&self) -> Result<Vec<String>>;

    /// Extensions provided by the implementation (`None`) or by one layer
    fn extensions(&self, layer: Option<&str>) -> Result<Vec<String>>;
}

impl InstanceInventory for Entry {
    fn layers(&self) -> Result<Vec<String>> {
        let props = self
            .enumerate_instance_layer_properties()
            .map_err(Error::backend("vkEnumerateInstanceLayerProperties"))?;
        Ok(props.iter().map(|p| vk_name(&p.layer_name)).collect())
    }

    fn extensions(&self, layer: Option<&str>) -> Result<Vec<String>> {
        let layer = layer.map(to_cstring).transpose()?;
        let props = self
            .enumerate_instance_extension_properties(layer.as_deref())
            .map_err(Error::backend("vkEnumerateInstanceExtensionProperties"))?;
        Ok(props.iter().map(|p| vk_name(&p.extension_name)).collect())
    }
}

/// Application identity reported to the driver
#[derive(Debug, Clone)]
pub struct ApplicationInfo {
    pub name: String,
    pub version: Version,
    pub engine_name: String,
    pub engine_version: Version,
}

impl Default for ApplicationInfo {
    fn default() -> Self {
        Self {
            name: "Vulkan Application".to_string(),
            version: Version::new(1, 0, 0),
            engine_name: "render-caps".to_string(),
            engine_version: Version::new(0, 1, 0),
        }
    }
}

/// Knobs beyond the feature request
#[derive(Debug, Clone, Default)]
pub struct NegotiationOptions {
    /// A debug sink is attached: request validation + debug utils
    pub debug: bool,
    /// Also request `VK_EXT_validation_features` (best-practices checks)
    pub validation_features: bool,
    /// User-requested layers, validated like required ones
    pub extra_layers: Vec<String>,
    /// User-requested extensions, validated like required ones
    pub extra_extensions: Vec<String>,
}

/// Confirmed layer/extension lists and the narrowed request
#[derive(Debug, Clone, PartialEq)]
pub struct InstancePlan {
    pub layers: Vec<String>,
    pub extensions: Vec<String>,
    pub features: FeatureRequest,
    pub flags: vk::InstanceCreateFlags,
}

impl InstancePlan {
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_owned());
    }
}

fn debug_extensions(options: &NegotiationOptions) -> Vec<&'static str> {
    match (options.debug, options.validation_features) {
        (false, _) => Vec::new(),
        (true, false) => vec![names::DEBUG_UTILS],
        (true, true) => vec![names::DEBUG_UTILS, names::VALIDATION_FEATURES],
    }
}

/// Decide which layers and extensions to enable.
///
/// Missing layers and extensions never fail the call: they are dropped
/// with a warning and any logical feature that needed them is cleared.
pub fn plan_instance(
    inventory: &dyn InstanceInventory,
    combined: &FeatureRequest,
    options: &NegotiationOptions,
    debugger: Option<&Debugger>,
) -> Result<InstancePlan> {
    let available_layers = inventory.layers()?;
    let available_extensions = inventory.extensions(None)?;

    // required layers...

    let mut wanted_layers = Vec::new();
    if options.debug {
        push_unique(&mut wanted_layers, names::VALIDATION_LAYER);
    }
    for name in catalog::instance_layers(combined.features) {
        push_unique(&mut wanted_layers, name);
    }
    for name in &options.extra_layers {
        push_unique(&mut wanted_layers, name);
    }

    let mut layers = Vec::with_capacity(wanted_layers.len());
    for name in wanted_layers {
        if available_layers.contains(&name) {
            layers.push(name);
        } else {
            core_diag!(debugger, WARNING, "Could not find instance layer \"{}\"", name);
        }
    }

    // required extensions, falling back to the accepted layers...

    let mut wanted_extensions = Vec::new();
    for name in catalog::instance_extensions(combined.features) {
        push_unique(&mut wanted_extensions, name);
    }
    for name in debug_extensions(options) {
        push_unique(&mut wanted_extensions, name);
    }
    for name in &options.extra_extensions {
        push_unique(&mut wanted_extensions, name);
    }

    // platform alternatives: missing ones are expected
    let alternatives: Vec<&str> = catalog::entries_for(combined.features)
        .flat_map(|e| e.instance_extensions_any.iter().copied())
        .collect();

    let mut confirmed = Vec::with_capacity(wanted_extensions.len());
    {
        let mut layer_extensions: HashMap<&str, Vec<String>> = HashMap::new();

        for name in wanted_extensions {
            if available_extensions.contains(&name) {
                confirmed.push(name);
                continue;
            }

            let mut provider = None;
            for layer in &layers {
                if !layer_extensions.contains_key(layer.as_str()) {
                    let provided = inventory.extensions(Some(layer.as_str()))?;
                    layer_extensions.insert(layer.as_str(), provided);
                }
                if layer_extensions[layer.as_str()].contains(&name) {
                    provider = Some(layer.as_str());
                    break;
                }
            }

            match provider {
                Some(layer) => {
                    log::debug!("Instance extension \"{}\" provided by layer \"{}\"", name, layer);
                    confirmed.push(name);
                }
                None if alternatives.contains(&name.as_str()) => {
                    log::debug!("Platform instance extension \"{}\" not available", name)
                }
                None => core_diag!(
                    debugger,
                    WARNING,
                    "Could not find instance extension \"{}\"",
                    name
                ),
            }
        }
    }

    // narrowing: drop every feature whose requirement set is incomplete...

    let mut features = *combined;
    for entry in catalog::entries_for(combined.features) {
        let missing_layer = entry
            .instance_layers
            .iter()
            .find(|l| !layers.iter().any(|a| a == *l));
        let missing_extension = entry
            .instance_extensions
            .iter()
            .find(|e| !confirmed.iter().any(|a| a == *e));

        let any_found = entry.instance_extensions_any.is_empty()
            || entry
                .instance_extensions_any
                .iter()
                .any(|e| confirmed.iter().any(|a| a == *e));

        if let Some(missing) = missing_layer.or(missing_extension) {
            features.features.remove(entry.feature);
            core_diag!(
                debugger,
                WARNING,
                "Renderer feature {:?} unavailable (missing \"{}\"), it was disabled",
                entry.feature,
                missing
            );
        } else if !any_found {
            features.features.remove(entry.feature);
            core_diag!(
                debugger,
                WARNING,
                "Renderer feature {:?} unavailable (none of {:?} found), it was disabled",
                entry.feature,
                entry.instance_extensions_any
            );
        }
    }

    // only keep names still wanted after narrowing
    let still_wanted_layers = catalog::instance_layers(features.features);
    layers.retain(|l| {
        (options.debug && l == names::VALIDATION_LAYER)
            || still_wanted_layers.contains(&l.as_str())
            || options.extra_layers.contains(l)
    });

    let still_wanted = catalog::instance_extensions(features.features);
    let debug_wanted = debug_extensions(options);
    confirmed.retain(|e| {
        still_wanted.contains(&e.as_str())
            || debug_wanted.contains(&e.as_str())
            || options.extra_extensions.contains(e)
    });

    let mut flags = vk::InstanceCreateFlags::empty();
    if confirmed.iter().any(|e| e == names::PORTABILITY_ENUMERATION) {
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    Ok(InstancePlan {
        layers,
        extensions: confirmed,
        features,
        flags,
    })
}

/// A typed structure appended to `VkInstanceCreateInfo`
pub enum InstanceChainNode {
    DebugMessenger(vk::DebugUtilsMessengerCreateInfoEXT),
    ValidationFeatures(vk::ValidationFeaturesEXT),
}

static BEST_PRACTICES: [vk::ValidationFeatureEnableEXT; 1] =
    [vk::ValidationFeatureEnableEXT::BEST_PRACTICES];

/// Extension structures to chain onto instance creation, in push order
#[derive(Default)]
pub struct InstanceChain {
    nodes: Vec<InstanceChainNode>,
}

impl InstanceChain {
    /// Chain for `plan`: an early messenger when debug utils is enabled and
    /// best-practices validation when validation features is enabled.
    pub fn for_plan(plan: &InstancePlan, debugger: Option<&Debugger>) -> Self {
        let mut chain = Self::default();

        if let Some(debugger) = debugger {
            if plan.has_extension(names::DEBUG_UTILS) {
                if let Some(info) = debug::messenger_info(debugger) {
                    chain.push(InstanceChainNode::DebugMessenger(info));
                }
            }
            if plan.has_extension(names::VALIDATION_FEATURES) {
                let info = vk::ValidationFeaturesEXT::builder()
                    .enabled_validation_features(&BEST_PRACTICES)
                    .build();
                chain.push(InstanceChainNode::ValidationFeatures(info));
            }
        }

        chain
    }

    pub fn push(&mut self, node: InstanceChainNode) {
        self.nodes.push(node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn apply<'a>(
        &'a mut self,
        mut create_info: vk::InstanceCreateInfoBuilder<'a>,
    ) -> vk::InstanceCreateInfoBuilder<'a> {
        for node in self.nodes.iter_mut() {
            create_info = match node {
                InstanceChainNode::DebugMessenger(info) => create_info.push_next(info),
                InstanceChainNode::ValidationFeatures(info) => create_info.push_next(info),
            };
        }
        create_info
    }
}

pub(crate) fn to_cstring(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| Error::InvalidName(name.to_owned()))
}

pub(crate) fn to_cstrings(names: &[String]) -> Result<Vec<CString>> {
    names.iter().map(|n| to_cstring(n)).collect()
}

/// Create the instance with exactly the plan's layers and extensions
pub fn create_instance(
    entry: &Entry,
    app: &ApplicationInfo,
    plan: &InstancePlan,
    chain: &mut InstanceChain,
) -> Result<ash::Instance> {
    let app_name = to_cstring(&app.name)?;
    let engine_name = to_cstring(&app.engine_name)?;
    let api_version = plan.features.api_version.unwrap_or(Version::new(1, 0, 0));

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name)
        .application_version(app.version.to_vk())
        .engine_name(&engine_name)
        .engine_version(app.engine_version.to_vk())
        .api_version(api_version.to_vk());

    let layers = to_cstrings(&plan.layers)?;
    let extensions = to_cstrings(&plan.extensions)?;
    let layer_ptrs: Vec<*const c_char> = layers.iter().map(|n| n.as_ptr()).collect();
    let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|n| n.as_ptr()).collect();

    let create_info = chain.apply(
        vk::InstanceCreateInfo::builder()
            .flags(plan.flags)
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs),
    );

    unsafe { entry.create_instance(&create_info, None) }
        .map_err(Error::backend("vkCreateInstance"))
}

/// Instance plus the names it was created with
pub struct NegotiatedInstance {
    pub instance: ash::Instance,
    pub layers: Vec<String>,
    pub extensions: Vec<String>,
    pub features: FeatureRequest,
}

/// Enumerate, validate, narrow and create in one call
pub fn negotiate_instance(
    entry: &Entry,
    app: &ApplicationInfo,
    combined: &FeatureRequest,
    options: &NegotiationOptions,
    debugger: Option<&Debugger>,
) -> Result<NegotiatedInstance> {
    let options = NegotiationOptions {
        debug: debugger.is_some(),
        ..options.clone()
    };

    let plan = plan_instance(entry, combined, &options, debugger)?;
    let mut chain = InstanceChain::for_plan(&plan, debugger);

    let instance = create_instance(entry, app, &plan, &mut chain).map_err(|e| {
        core_diag!(debugger, ERROR, "Failed to create Vulkan instance: {}", e);
        e
    })?;

    log::info!("Created Vulkan instance");
    log::info!("  {} layers", plan.layers.len());
    for (i, name) in plan.layers.iter().enumerate() {
        log::info!("    - layer #{}: {}", i, name);
    }
    log::info!("  {} extensions", plan.extensions.len());
    for (i, name) in plan.extensions.iter().enumerate() {
        log::info!("    - extension #{}: {}", i, name);
    }

    Ok(NegotiatedInstance {
        instance,
        layers: plan.layers,
        extensions: plan.extensions,
        features: plan.features,
    })
}
