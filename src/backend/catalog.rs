// Capability catalog - logical features and what they cost on the backend
//
// Static data only. Each logical feature maps to the layers, extensions,
// device features and queue roles it needs. Validation elsewhere walks these
// tables instead of checking fields one by one.

use ash::vk;
use bitflags::bitflags;
use serde::Deserialize;

/// Backend item names referenced by the catalog
pub mod names {
    pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

    pub const DEBUG_UTILS: &str = "VK_EXT_debug_utils";
    pub const VALIDATION_FEATURES: &str = "VK_EXT_validation_features";
    pub const PORTABILITY_ENUMERATION: &str = "VK_KHR_portability_enumeration";

    pub const SURFACE: &str = "VK_KHR_surface";
    pub const WIN32_SURFACE: &str = "VK_KHR_win32_surface";
    pub const METAL_SURFACE: &str = "VK_EXT_metal_surface";
    pub const ANDROID_SURFACE: &str = "VK_KHR_android_surface";
    pub const XLIB_SURFACE: &str = "VK_KHR_xlib_surface";
    pub const XCB_SURFACE: &str = "VK_KHR_xcb_surface";
    pub const WAYLAND_SURFACE: &str = "VK_KHR_wayland_surface";

    pub const SWAPCHAIN: &str = "VK_KHR_swapchain";
    pub const DYNAMIC_RENDERING: &str = "VK_KHR_dynamic_rendering";
    pub const DEPTH_STENCIL_RESOLVE: &str = "VK_KHR_depth_stencil_resolve";
    pub const CREATE_RENDERPASS_2: &str = "VK_KHR_create_renderpass2";
    pub const PORTABILITY_SUBSET: &str = "VK_KHR_portability_subset";
}

bitflags! {
    /// Application-facing capability flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u32 {
        /// Can present images to a window surface
        const PRESENTATION = 1 << 0;
        /// Render without render pass objects
        const DYNAMIC_RENDERING = 1 << 1;
        /// Non-solid fill modes and wide lines
        const WIREFRAME = 1 << 2;
        /// Anisotropic texture filtering
        const ANISOTROPY = 1 << 3;
        /// Needs a compute-capable queue family
        const COMPUTE = 1 << 4;
        /// Needs a transfer-capable queue family
        const TRANSFER = 1 << 5;
    }
}

impl Features {
    /// Parse a lowercase feature name such as `"presentation"`
    pub fn parse(name: &str) -> Option<Self> {
        Self::from_name(&name.trim().to_ascii_uppercase())
    }
}

bitflags! {
    /// Logical queue roles a renderer may need
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueueRoles: u8 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
        const PRESENT = 1 << 3;
    }
}

/// Backend API version (major.minor.patch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "[u32; 3]")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn to_vk(self) -> u32 {
        vk::make_api_version(0, self.major, self.minor, self.patch)
    }

    pub fn from_vk(version: u32) -> Self {
        Self::new(
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Component-wise maximum
    pub fn max_each(self, other: Self) -> Self {
        Self::new(
            self.major.max(other.major),
            self.minor.max(other.minor),
            self.patch.max(other.patch),
        )
    }
}

impl From<[u32; 3]> for Version {
    fn from([major, minor, patch]: [u32; 3]) -> Self {
        Self::new(major, minor, patch)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// What a renderer asks for: logical features plus a minimum API version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureRequest {
    pub features: Features,
    pub api_version: Option<Version>,
}

impl FeatureRequest {
    pub fn new(features: Features) -> Self {
        Self { features, api_version: None }
    }

    pub fn with_api_version(mut self, version: Version) -> Self {
        self.api_version = Some(version);
        self
    }

    pub fn contains(&self, features: Features) -> bool {
        self.features.contains(features)
    }

    /// Flag union and component-wise maximum of the API versions
    pub fn union(&self, other: &Self) -> Self {
        let api_version = match (self.api_version, other.api_version) {
            (Some(a), Some(b)) => Some(a.max_each(b)),
            (a, None) => a,
            (None, b) => b,
        };

        Self {
            features: self.features | other.features,
            api_version,
        }
    }

    /// Queue roles that must be assigned for a device to be usable
    pub fn required_queue_roles(&self) -> QueueRoles {
        entries_for(self.features).fold(QueueRoles::GRAPHICS, |roles, e| roles | e.queues)
    }
}

/// Combine every renderer's request into one
pub fn aggregate<'a, I>(requests: I) -> FeatureRequest
where
    I: IntoIterator<Item = &'a FeatureRequest>,
{
    requests
        .into_iter()
        .fold(FeatureRequest::default(), |acc, request| acc.union(request))
}

/// One field of `vk::PhysicalDeviceFeatures`, addressable by value
#[derive(Clone, Copy)]
pub struct DeviceFeature {
    pub name: &'static str,
    get: fn(&vk::PhysicalDeviceFeatures) -> vk::Bool32,
    set: fn(&mut vk::PhysicalDeviceFeatures, vk::Bool32),
}

impl DeviceFeature {
    pub fn is_enabled(&self, features: &vk::PhysicalDeviceFeatures) -> bool {
        (self.get)(features) == vk::TRUE
    }

    pub fn enable(&self, features: &mut vk::PhysicalDeviceFeatures) {
        (self.set)(features, vk::TRUE)
    }

    pub fn disable(&self, features: &mut vk::PhysicalDeviceFeatures) {
        (self.set)(features, vk::FALSE)
    }

    /// Every feature switched on in `features`
    pub fn enabled_in(
        features: &vk::PhysicalDeviceFeatures,
    ) -> impl Iterator<Item = &'static DeviceFeature> + '_ {
        Self::ALL.iter().filter(move |f| f.is_enabled(features))
    }
}

impl PartialEq for DeviceFeature {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for DeviceFeature {}

impl std::fmt::Debug for DeviceFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

macro_rules! device_features {
    ($($konst:ident => $field:ident),* $(,)?) => {
        impl DeviceFeature {
            $(
                pub const $konst: DeviceFeature = DeviceFeature {
                    name: stringify!($field),
                    get: |f| f.$field,
                    set: |f, v| f.$field = v,
                };
            )*

            pub const ALL: &'static [DeviceFeature] = &[$(Self::$konst),*];
        }
    };
}

device_features! {
    ROBUST_BUFFER_ACCESS => robust_buffer_access,
    FULL_DRAW_INDEX_UINT32 => full_draw_index_uint32,
    IMAGE_CUBE_ARRAY => image_cube_array,
    INDEPENDENT_BLEND => independent_blend,
    GEOMETRY_SHADER => geometry_shader,
    TESSELLATION_SHADER => tessellation_shader,
    SAMPLE_RATE_SHADING => sample_rate_shading,
    DUAL_SRC_BLEND => dual_src_blend,
    LOGIC_OP => logic_op,
    MULTI_DRAW_INDIRECT => multi_draw_indirect,
    DRAW_INDIRECT_FIRST_INSTANCE => draw_indirect_first_instance,
    DEPTH_CLAMP => depth_clamp,
    DEPTH_BIAS_CLAMP => depth_bias_clamp,
    FILL_MODE_NON_SOLID => fill_mode_non_solid,
    DEPTH_BOUNDS => depth_bounds,
    WIDE_LINES => wide_lines,
    LARGE_POINTS => large_points,
    ALPHA_TO_ONE => alpha_to_one,
    MULTI_VIEWPORT => multi_viewport,
    SAMPLER_ANISOTROPY => sampler_anisotropy,
    TEXTURE_COMPRESSION_ETC2 => texture_compression_etc2,
    TEXTURE_COMPRESSION_ASTC_LDR => texture_compression_astc_ldr,
    TEXTURE_COMPRESSION_BC => texture_compression_bc,
    OCCLUSION_QUERY_PRECISE => occlusion_query_precise,
    PIPELINE_STATISTICS_QUERY => pipeline_statistics_query,
    VERTEX_PIPELINE_STORES_AND_ATOMICS => vertex_pipeline_stores_and_atomics,
    FRAGMENT_STORES_AND_ATOMICS => fragment_stores_and_atomics,
    SHADER_TESSELLATION_AND_GEOMETRY_POINT_SIZE => shader_tessellation_and_geometry_point_size,
    SHADER_IMAGE_GATHER_EXTENDED => shader_image_gather_extended,
    SHADER_STORAGE_IMAGE_EXTENDED_FORMATS => shader_storage_image_extended_formats,
    SHADER_STORAGE_IMAGE_MULTISAMPLE => shader_storage_image_multisample,
    SHADER_STORAGE_IMAGE_READ_WITHOUT_FORMAT => shader_storage_image_read_without_format,
    SHADER_STORAGE_IMAGE_WRITE_WITHOUT_FORMAT => shader_storage_image_write_without_format,
    SHADER_UNIFORM_BUFFER_ARRAY_DYNAMIC_INDEXING => shader_uniform_buffer_array_dynamic_indexing,
    SHADER_SAMPLED_IMAGE_ARRAY_DYNAMIC_INDEXING => shader_sampled_image_array_dynamic_indexing,
    SHADER_STORAGE_BUFFER_ARRAY_DYNAMIC_INDEXING => shader_storage_buffer_array_dynamic_indexing,
    SHADER_STORAGE_IMAGE_ARRAY_DYNAMIC_INDEXING => shader_storage_image_array_dynamic_indexing,
    SHADER_CLIP_DISTANCE => shader_clip_distance,
    SHADER_CULL_DISTANCE => shader_cull_distance,
    SHADER_FLOAT64 => shader_float64,
    SHADER_INT64 => shader_int64,
    SHADER_INT16 => shader_int16,
    SHADER_RESOURCE_RESIDENCY => shader_resource_residency,
    SHADER_RESOURCE_MIN_LOD => shader_resource_min_lod,
    SPARSE_BINDING => sparse_binding,
    SPARSE_RESIDENCY_BUFFER => sparse_residency_buffer,
    SPARSE_RESIDENCY_IMAGE_2D => sparse_residency_image2_d,
    SPARSE_RESIDENCY_IMAGE_3D => sparse_residency_image3_d,
    SPARSE_RESIDENCY_2_SAMPLES => sparse_residency2_samples,
    SPARSE_RESIDENCY_4_SAMPLES => sparse_residency4_samples,
    SPARSE_RESIDENCY_8_SAMPLES => sparse_residency8_samples,
    SPARSE_RESIDENCY_16_SAMPLES => sparse_residency16_samples,
    SPARSE_RESIDENCY_ALIASED => sparse_residency_aliased,
    VARIABLE_MULTISAMPLE_RATE => variable_multisample_rate,
    INHERITED_QUERIES => inherited_queries,
}

/// Backend requirements of one logical feature
#[derive(Debug)]
pub struct CatalogEntry {
    pub feature: Features,
    pub instance_layers: &'static [&'static str],
    /// All of these are required
    pub instance_extensions: &'static [&'static str],
    /// At least one of these is required (if any are listed); every one
    /// found is enabled
    pub instance_extensions_any: &'static [&'static str],
    pub device_extensions: &'static [&'static str],
    pub device_features: &'static [DeviceFeature],
    pub queues: QueueRoles,
}

#[cfg(target_os = "windows")]
const PLATFORM_SURFACE_EXTENSIONS: &[&str] = &[names::WIN32_SURFACE];

#[cfg(any(target_os = "macos", target_os = "ios"))]
const PLATFORM_SURFACE_EXTENSIONS: &[&str] = &[names::METAL_SURFACE];

#[cfg(target_os = "android")]
const PLATFORM_SURFACE_EXTENSIONS: &[&str] = &[names::ANDROID_SURFACE];

#[cfg(all(
    unix,
    not(any(target_os = "macos", target_os = "ios", target_os = "android"))
))]
const PLATFORM_SURFACE_EXTENSIONS: &[&str] = &[
    names::XLIB_SURFACE,
    names::XCB_SURFACE,
    names::WAYLAND_SURFACE,
];

#[cfg(not(any(windows, unix)))]
const PLATFORM_SURFACE_EXTENSIONS: &[&str] = &[];

/// Instance extensions needed regardless of requested features
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub const BASE_INSTANCE_EXTENSIONS: &[&str] = &[names::PORTABILITY_ENUMERATION];

/// Instance extensions needed regardless of requested features
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub const BASE_INSTANCE_EXTENSIONS: &[&str] = &[];

pub static CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        feature: Features::PRESENTATION,
        instance_layers: &[],
        instance_extensions: &[names::SURFACE],
        instance_extensions_any: PLATFORM_SURFACE_EXTENSIONS,
        device_extensions: &[names::SWAPCHAIN],
        device_features: &[],
        queues: QueueRoles::PRESENT,
    },
    CatalogEntry {
        feature: Features::DYNAMIC_RENDERING,
        instance_layers: &[],
        instance_extensions: &[],
        instance_extensions_any: &[],
        device_extensions: &[
            names::DYNAMIC_RENDERING,
            names::DEPTH_STENCIL_RESOLVE,
            names::CREATE_RENDERPASS_2,
        ],
        device_features: &[],
        queues: QueueRoles::empty(),
    },
    CatalogEntry {
        feature: Features::WIREFRAME,
        instance_layers: &[],
        instance_extensions: &[],
        instance_extensions_any: &[],
        device_extensions: &[],
        device_features: &[DeviceFeature::FILL_MODE_NON_SOLID, DeviceFeature::WIDE_LINES],
        queues: QueueRoles::empty(),
    },
    CatalogEntry {
        feature: Features::ANISOTROPY,
        instance_layers: &[],
        instance_extensions: &[],
        instance_extensions_any: &[],
        device_extensions: &[],
        device_features: &[DeviceFeature::SAMPLER_ANISOTROPY],
        queues: QueueRoles::empty(),
    },
    CatalogEntry {
        feature: Features::COMPUTE,
        instance_layers: &[],
        instance_extensions: &[],
        instance_extensions_any: &[],
        device_extensions: &[],
        device_features: &[],
        queues: QueueRoles::COMPUTE,
    },
    CatalogEntry {
        feature: Features::TRANSFER,
        instance_layers: &[],
        instance_extensions: &[],
        instance_extensions_any: &[],
        device_extensions: &[],
        device_features: &[],
        queues: QueueRoles::TRANSFER,
    },
];

/// Catalog entries for every feature set in `features`
pub fn entries_for(features: Features) -> impl Iterator<Item = &'static CatalogEntry> {
    CATALOG
        .iter()
        .filter(move |entry| features.contains(entry.feature))
}

fn push_unique(out: &mut Vec<&'static str>, names: &[&'static str]) {
    for name in names {
        if !out.contains(name) {
            out.push(name);
        }
    }
}

/// Instance layers wanted by `features`, deduplicated, in catalog order
pub fn instance_layers(features: Features) -> Vec<&'static str> {
    let mut out = Vec::new();
    entries_for(features).for_each(|e| push_unique(&mut out, e.instance_layers));
    out
}

/// Instance extensions wanted by `features`, base set first.
///
/// Includes every any-of alternative; negotiation keeps those it finds.
pub fn instance_extensions(features: Features) -> Vec<&'static str> {
    let mut out = Vec::new();
    push_unique(&mut out, BASE_INSTANCE_EXTENSIONS);
    entries_for(features).for_each(|e| {
        push_unique(&mut out, e.instance_extensions);
        push_unique(&mut out, e.instance_extensions_any);
    });
    out
}

/// Device extensions wanted by `features`
pub fn device_extensions(features: Features) -> Vec<&'static str> {
    let mut out = Vec::new();
    entries_for(features).for_each(|e| push_unique(&mut out, e.device_extensions));
    out
}

/// Device features wanted by `features`, as a create-ready struct
pub fn device_features(features: Features) -> vk::PhysicalDeviceFeatures {
    let mut out = vk::PhysicalDeviceFeatures::default();
    entries_for(features)
        .flat_map(|e| e.device_features.iter())
        .for_each(|f| f.enable(&mut out));
    out
}
