// Physical device selection - queue families, validation and scoring
//
// Candidates are plain data snapshots of what the driver reports, so the
// whole selection runs without touching Vulkan after enumeration.
//
// Score = queue families + extension coverage + feature coverage
//       + device type + device-local memory
// Zero means the device is missing a required queue family.

use ash::vk;
use serde::Deserialize;

use super::catalog::{self, names, DeviceFeature, FeatureRequest, QueueRoles, Version};
use super::debug::Debugger;
use super::vk_name;
use crate::error::{Error, Result};

/// Snapshot of one physical device
#[derive(Debug, Clone)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub extensions: Vec<String>,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub memory_heaps: Vec<vk::MemoryHeap>,
}

impl PhysicalDeviceCandidate {
    pub fn query(instance: &ash::Instance, handle: vk::PhysicalDevice) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let features = unsafe { instance.get_physical_device_features(handle) };
        let memory = unsafe { instance.get_physical_device_memory_properties(handle) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
            .map_err(Error::backend("vkEnumerateDeviceExtensionProperties"))?;

        Ok(Self {
            handle,
            name: vk_name(&properties.device_name),
            vendor_id: properties.vendor_id,
            device_id: properties.device_id,
            device_type: properties.device_type,
            api_version: properties.api_version,
            extensions: extensions.iter().map(|e| vk_name(&e.extension_name)).collect(),
            features,
            queue_families,
            memory_heaps: memory.memory_heaps[..memory.memory_heap_count as usize].to_vec(),
        })
    }

    /// Every physical device the instance exposes
    pub fn enumerate(instance: &ash::Instance) -> Result<Vec<Self>> {
        let handles = unsafe { instance.enumerate_physical_devices() }
            .map_err(Error::backend("vkEnumeratePhysicalDevices"))?;

        handles
            .into_iter()
            .map(|handle| Self::query(instance, handle))
            .collect()
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    /// Total size of device-local heaps (VRAM), in bytes
    pub fn device_local_bytes(&self) -> u64 {
        self.memory_heaps
            .iter()
            .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|h| h.size)
            .sum()
    }
}

/// Known PCI vendor ids
pub fn vendor_name(vendor_id: u32) -> &'static str {
    match vendor_id {
        0x1002 => "AMD",
        0x1010 => "ImgTec",
        0x10de => "NVIDIA",
        0x13b5 => "ARM",
        0x5143 => "Qualcomm",
        0x8086 => "Intel",
        _ => "unknown",
    }
}

/// Queue family index per role (`None` = unassigned)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueFamilyAssignment {
    pub graphics: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
    pub present: Option<u32>,
}

/// Result of one pass over a queue family table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyScan {
    pub assignment: QueueFamilyAssignment,
    /// Sum of queue counts plus the dedicated-transfer bonus
    pub score: u64,
}

// capabilities other than transfer that count against a transfer family
const SHARED_CAPS: [vk::QueueFlags; 2] = [vk::QueueFlags::GRAPHICS, vk::QueueFlags::COMPUTE];

impl QueueFamilyAssignment {
    pub const ROLES: [QueueRoles; 4] = [
        QueueRoles::GRAPHICS,
        QueueRoles::COMPUTE,
        QueueRoles::TRANSFER,
        QueueRoles::PRESENT,
    ];

    /// Assign families in a single pass.
    ///
    /// Graphics and compute take the first capable family. Transfer takes the
    /// family sharing the fewest other capabilities, later families winning
    /// ties. Present takes the last family; actual surface support is checked
    /// by whoever owns the surface.
    pub fn scan(families: &[vk::QueueFamilyProperties]) -> QueueFamilyScan {
        let mut assignment = Self::default();
        let mut queue_total = 0u64;
        let mut min_shared: Option<u32> = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            let flags = family.queue_flags;

            if flags.contains(vk::QueueFlags::GRAPHICS) && assignment.graphics.is_none() {
                assignment.graphics = Some(index);
            }
            if flags.contains(vk::QueueFlags::COMPUTE) && assignment.compute.is_none() {
                assignment.compute = Some(index);
            }

            if flags.contains(vk::QueueFlags::TRANSFER) {
                let shared = SHARED_CAPS.iter().filter(|c| flags.contains(**c)).count() as u32;
                if min_shared.map_or(true, |min| shared <= min) {
                    assignment.transfer = Some(index);
                    min_shared = Some(shared);
                }
            }

            assignment.present = Some(index);
            queue_total += u64::from(family.queue_count);
        }

        let transfer_bonus = min_shared.map_or(0, |shared| SHARED_CAPS.len() as u64 - u64::from(shared));

        QueueFamilyScan {
            assignment,
            score: queue_total + transfer_bonus,
        }
    }

    pub fn get(&self, role: QueueRoles) -> Option<u32> {
        match role {
            QueueRoles::GRAPHICS => self.graphics,
            QueueRoles::COMPUTE => self.compute,
            QueueRoles::TRANSFER => self.transfer,
            QueueRoles::PRESENT => self.present,
            _ => None,
        }
    }

    pub fn assigned(&self) -> QueueRoles {
        Self::ROLES
            .into_iter()
            .filter(|r| self.get(*r).is_some())
            .fold(QueueRoles::empty(), |acc, r| acc | r)
    }

    /// Keep only the given roles; everything else becomes unassigned
    pub fn restricted_to(&self, roles: QueueRoles) -> Self {
        let keep = |role: QueueRoles, index: Option<u32>| index.filter(|_| roles.contains(role));
        Self {
            graphics: keep(QueueRoles::GRAPHICS, self.graphics),
            compute: keep(QueueRoles::COMPUTE, self.compute),
            transfer: keep(QueueRoles::TRANSFER, self.transfer),
            present: keep(QueueRoles::PRESENT, self.present),
        }
    }
}

/// Named scoring weights; the defaults carry no particular policy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Scaled by the fraction of required extensions present
    pub extension_coverage: u64,
    pub full_extension_bonus: u64,
    pub full_feature_bonus: u64,
    pub discrete_gpu: u64,
    pub integrated_gpu: u64,
    pub other_device: u64,
    /// Device-local bytes worth one point
    pub vram_bytes_per_point: u64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            extension_coverage: 80,
            full_extension_bonus: 250,
            full_feature_bonus: 250,
            discrete_gpu: 1000,
            integrated_gpu: 200,
            other_device: 0,
            vram_bytes_per_point: 1024 * 1024 * 1024,
        }
    }
}

/// Per-term score breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceScore {
    pub queues: u64,
    pub extensions: u64,
    pub features: u64,
    pub device_type: u64,
    pub vram: u64,
}

impl DeviceScore {
    pub fn total(&self) -> u64 {
        [self.extensions, self.features, self.device_type, self.vram]
            .into_iter()
            .fold(self.queues, u64::saturating_add)
    }
}

/// What a candidate can offer for a request
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Zero when a required queue family is missing
    pub score: u64,
    pub breakdown: DeviceScore,
    /// Roles the request requires that the device cannot serve
    pub missing_roles: QueueRoles,
    /// Discovered families, restricted to the required roles
    pub assignment: QueueFamilyAssignment,
    /// Extensions safe to enable
    pub extensions: Vec<String>,
    /// Features safe to enable
    pub features: vk::PhysicalDeviceFeatures,
    /// Request narrowed to what the device supports
    pub supported: FeatureRequest,
    /// Some required extension or feature was missing
    pub incomplete: bool,
}

/// Validate and score one candidate. Deterministic for identical input.
pub fn evaluate(
    candidate: &PhysicalDeviceCandidate,
    combined: &FeatureRequest,
    weights: &ScoreWeights,
    debugger: Option<&Debugger>,
) -> Evaluation {
    let scan = QueueFamilyAssignment::scan(&candidate.queue_families);
    let required_roles = combined.required_queue_roles();
    let missing_roles = required_roles - scan.assignment.assigned();

    if !missing_roles.is_empty() {
        return Evaluation {
            score: 0,
            breakdown: DeviceScore::default(),
            missing_roles,
            assignment: scan.assignment.restricted_to(required_roles),
            extensions: Vec::new(),
            features: vk::PhysicalDeviceFeatures::default(),
            supported: FeatureRequest {
                features: catalog::Features::empty(),
                ..*combined
            },
            incomplete: true,
        };
    }

    let mut incomplete = false;

    // extensions...

    let required_extensions = catalog::device_extensions(combined.features);
    let mut extensions = Vec::with_capacity(required_extensions.len() + 1);
    for name in &required_extensions {
        if candidate.has_extension(name) {
            extensions.push(name.to_string());
        } else {
            core_diag!(
                debugger,
                WARNING,
                "Validating physical device \"{}\": could not find extension \"{}\"",
                candidate.name,
                name
            );
            incomplete = true;
        }
    }
    let found_extensions = extensions.len() as u64;

    // must be enabled whenever the implementation advertises it
    if candidate.has_extension(names::PORTABILITY_SUBSET)
        && !extensions.iter().any(|e| e == names::PORTABILITY_SUBSET)
    {
        extensions.push(names::PORTABILITY_SUBSET.to_string());
    }

    // features...

    let required_features = catalog::device_features(combined.features);
    let mut features = required_features;
    let mut features_missing = false;
    for feature in DeviceFeature::enabled_in(&required_features) {
        if !feature.is_enabled(&candidate.features) {
            core_diag!(
                debugger,
                WARNING,
                "Graphics device \"{}\" missing feature: \"{}\"",
                candidate.name,
                feature.name
            );
            feature.disable(&mut features);
            features_missing = true;
        }
    }
    incomplete |= features_missing;

    // narrowed request...

    let mut supported = *combined;
    for entry in catalog::entries_for(combined.features) {
        let has_extensions = entry
            .device_extensions
            .iter()
            .all(|e| extensions.iter().any(|x| x == e));
        let has_features = entry
            .device_features
            .iter()
            .all(|f| f.is_enabled(&features));

        if !has_extensions || !has_features {
            supported.features.remove(entry.feature);
        }
    }

    // scoring...

    let required_count = required_extensions.len() as u64;
    let mut extension_score = 0;
    if required_count > 0 {
        extension_score = weights.extension_coverage.saturating_mul(found_extensions) / required_count;
    }
    if found_extensions == required_count {
        extension_score = extension_score.saturating_add(weights.full_extension_bonus);
    }

    let breakdown = DeviceScore {
        queues: scan.score,
        extensions: extension_score,
        features: if features_missing { 0 } else { weights.full_feature_bonus },
        device_type: match candidate.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => weights.discrete_gpu,
            vk::PhysicalDeviceType::INTEGRATED_GPU => weights.integrated_gpu,
            _ => weights.other_device,
        },
        vram: candidate.device_local_bytes() / weights.vram_bytes_per_point.max(1),
    };

    Evaluation {
        score: breakdown.total().max(1),
        breakdown,
        missing_roles,
        assignment: scan.assignment.restricted_to(required_roles),
        extensions,
        features,
        supported,
        incomplete,
    }
}

/// How to choose among suitable devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Highest score wins
    #[default]
    Optimal,
    /// First suitable device, still validated
    First,
}

/// The chosen device and everything needed to build a logical device on it
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub candidate: PhysicalDeviceCandidate,
    pub assignment: QueueFamilyAssignment,
    pub extensions: Vec<String>,
    pub features: vk::PhysicalDeviceFeatures,
    pub supported: FeatureRequest,
    pub score: DeviceScore,
}

/// Pick a device for `combined`.
///
/// Candidates missing a required queue family are dropped first; if none
/// remain the result is `NoSuitableDevice`.
pub fn select_device(
    candidates: &[PhysicalDeviceCandidate],
    combined: &FeatureRequest,
    mode: SelectionMode,
    weights: &ScoreWeights,
    debugger: Option<&Debugger>,
) -> Result<SelectedDevice> {
    if candidates.is_empty() {
        core_diag!(debugger, ERROR, "No Vulkan-capable GPUs found!");
        return Err(Error::NoSuitableDevice);
    }

    let required_roles = combined.required_queue_roles();
    let suitable: Vec<&PhysicalDeviceCandidate> = candidates
        .iter()
        .filter(|c| {
            let scan = QueueFamilyAssignment::scan(&c.queue_families);
            let missing = required_roles - scan.assignment.assigned();
            if !missing.is_empty() {
                core_diag!(
                    debugger,
                    ERROR,
                    "Device candidacy rejected: \"{}\" is missing required {:?} queue family",
                    c.name,
                    missing
                );
            }
            missing.is_empty()
        })
        .collect();

    if suitable.is_empty() {
        core_diag!(debugger, ERROR, "No physical devices were determined suitable");
        return Err(Error::NoSuitableDevice);
    }

    let (winner, evaluation) = if suitable.len() == 1 || mode == SelectionMode::First {
        let first = suitable[0];
        (first, evaluate(first, combined, weights, debugger))
    } else {
        let mut best: Option<(&PhysicalDeviceCandidate, Evaluation)> = None;

        for candidate in suitable {
            let evaluation = evaluate(candidate, combined, weights, debugger);
            core_diag!(debugger, NOTIF, "{} scored [{}]", candidate.name, evaluation.score);
            log::debug!("  {:?}", evaluation.breakdown);

            if best.as_ref().map_or(true, |(_, b)| evaluation.score > b.score) {
                best = Some((candidate, evaluation));
            }
        }

        best.ok_or(Error::NoSuitableDevice)?
    };

    for entry in catalog::entries_for(combined.features - evaluation.supported.features) {
        core_diag!(
            debugger,
            ERROR,
            "Device \"{}\": renderer feature {:?} unavailable (missing device extensions or features), it was disabled",
            winner.name,
            entry.feature
        );
    }

    core_diag!(debugger, NOTIF, "Selected GPU: {}", winner.name);
    log::info!("  Supports Vulkan API version {}", Version::from_vk(winner.api_version));
    log::info!("  Device ID: 0x{:04x}", winner.device_id);
    log::info!(
        "  Device vendor: {} (0x{:04x})",
        vendor_name(winner.vendor_id),
        winner.vendor_id
    );

    Ok(SelectedDevice {
        candidate: winner.clone(),
        assignment: evaluation.assignment,
        extensions: evaluation.extensions,
        features: evaluation.features,
        supported: evaluation.supported,
        score: evaluation.breakdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::catalog::Features;
    use crate::backend::debug::testing::recording;
    use crate::backend::debug::{DebugSeverity, DebugSource};
    use ash::vk::Handle;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn family(flags: vk::QueueFlags, queue_count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            ..Default::default()
        }
    }

    fn universal() -> vk::QueueFamilyProperties {
        family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            1,
        )
    }

    fn candidate(
        raw: u64,
        device_type: vk::PhysicalDeviceType,
        extensions: &[&str],
        vram: u64,
    ) -> PhysicalDeviceCandidate {
        PhysicalDeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu-{}", raw),
            vendor_id: 0x10de,
            device_id: raw as u32,
            device_type,
            api_version: vk::API_VERSION_1_3,
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            features: vk::PhysicalDeviceFeatures::default(),
            queue_families: vec![universal()],
            memory_heaps: vec![vk::MemoryHeap {
                size: vram,
                flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
            }],
        }
    }

    fn all_device_extensions() -> Vec<&'static str> {
        catalog::device_extensions(Features::all())
    }

    #[test]
    fn scan_assigns_first_graphics_and_most_dedicated_transfer() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 16),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];

        let scan = QueueFamilyAssignment::scan(&families);

        assert_eq!(scan.assignment.graphics, Some(0));
        assert_eq!(scan.assignment.compute, Some(0));
        assert_eq!(scan.assignment.transfer, Some(2));
        assert_eq!(scan.assignment.present, Some(3));
        // 20 queues + dedicated transfer bonus of 2
        assert_eq!(scan.score, 22);
    }

    #[test]
    fn later_transfer_family_wins_ties() {
        let families = [
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 1),
        ];

        let scan = QueueFamilyAssignment::scan(&families);
        assert_eq!(scan.assignment.transfer, Some(2));
        assert_eq!(scan.assignment.compute, Some(0));
    }

    #[test]
    fn missing_graphics_always_scores_zero() {
        let mut no_graphics = candidate(1, vk::PhysicalDeviceType::DISCRETE_GPU, &all_device_extensions(), 64 * GIB);
        no_graphics.queue_families = vec![family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 8)];
        no_graphics.features.fill_mode_non_solid = vk::TRUE;

        let request = FeatureRequest::new(Features::all());
        let weights = ScoreWeights::default();
        let evaluation = evaluate(&no_graphics, &request, &weights, None);
        assert_eq!(evaluation.score, 0);
        assert!(evaluation.missing_roles.contains(QueueRoles::GRAPHICS));

        let modest = candidate(2, vk::PhysicalDeviceType::CPU, &[], 0);
        let selected = select_device(&[no_graphics.clone(), modest], &request, SelectionMode::Optimal, &weights, None).unwrap();
        assert_eq!(selected.candidate.handle.as_raw(), 2);

        let alone = select_device(&[no_graphics], &request, SelectionMode::First, &weights, None);
        assert!(matches!(alone, Err(Error::NoSuitableDevice)));
    }

    #[test]
    fn empty_candidate_list_is_no_suitable_device() {
        let result = select_device(&[], &FeatureRequest::default(), SelectionMode::Optimal, &ScoreWeights::default(), None);
        assert!(matches!(result, Err(Error::NoSuitableDevice)));
    }

    #[test]
    fn scoring_is_deterministic() {
        let gpu = candidate(7, vk::PhysicalDeviceType::INTEGRATED_GPU, &[names::SWAPCHAIN], 2 * GIB);
        let request = FeatureRequest::new(Features::PRESENTATION | Features::DYNAMIC_RENDERING);
        let weights = ScoreWeights::default();

        let first = evaluate(&gpu, &request, &weights, None);
        let second = evaluate(&gpu, &request, &weights, None);
        assert_eq!(first.score, second.score);
        assert_eq!(first.breakdown, second.breakdown);
        assert_eq!(first.extensions, second.extensions);
    }

    #[test]
    fn first_mode_still_validates_and_narrows() {
        let mut gpu = candidate(3, vk::PhysicalDeviceType::INTEGRATED_GPU, &[names::SWAPCHAIN], GIB);
        gpu.features.fill_mode_non_solid = vk::TRUE;
        let better = candidate(4, vk::PhysicalDeviceType::DISCRETE_GPU, &all_device_extensions(), 16 * GIB);
        let request = FeatureRequest::new(Features::PRESENTATION | Features::WIREFRAME);

        let selected =
            select_device(&[gpu, better], &request, SelectionMode::First, &ScoreWeights::default(), None).unwrap();

        assert_eq!(selected.candidate.handle.as_raw(), 3);
        assert_eq!(selected.extensions, [names::SWAPCHAIN]);
        // wide_lines unsupported: cleared, and wireframe narrowed away
        assert_eq!(selected.features.fill_mode_non_solid, vk::TRUE);
        assert_eq!(selected.features.wide_lines, vk::FALSE);
        assert_eq!(selected.supported.features, Features::PRESENTATION);
        assert_eq!(selected.assignment.present, Some(0));
    }

    #[test]
    fn single_candidate_is_selected_and_validated() {
        let gpu = candidate(5, vk::PhysicalDeviceType::OTHER, &[], 0);
        let request = FeatureRequest::new(Features::PRESENTATION);

        let selected =
            select_device(&[gpu], &request, SelectionMode::Optimal, &ScoreWeights::default(), None).unwrap();

        assert!(selected.extensions.is_empty());
        assert!(!selected.supported.contains(Features::PRESENTATION));
    }

    #[test]
    fn discrete_type_bonus_outweighs_full_extension_coverage() {
        let request = FeatureRequest::new(Features::PRESENTATION | Features::DYNAMIC_RENDERING);
        let weights = ScoreWeights::default();
        let integrated = candidate(10, vk::PhysicalDeviceType::INTEGRATED_GPU, &all_device_extensions(), 8 * GIB);
        let discrete = candidate(11, vk::PhysicalDeviceType::DISCRETE_GPU, &[], 8 * GIB);

        let i = evaluate(&integrated, &request, &weights, None);
        let d = evaluate(&discrete, &request, &weights, None);
        assert_eq!(i.breakdown.extensions, 80 + 250);
        assert_eq!(d.breakdown.extensions, 0);
        assert_eq!(d.score - i.score, 470);

        let selected = select_device(&[integrated, discrete], &request, SelectionMode::Optimal, &weights, None).unwrap();
        assert_eq!(selected.candidate.handle.as_raw(), 11);
        assert!(!selected.supported.contains(Features::PRESENTATION));
    }

    #[test]
    fn vram_delta_beyond_470_flips_the_choice() {
        let request = FeatureRequest::new(Features::PRESENTATION | Features::DYNAMIC_RENDERING);
        let weights = ScoreWeights::default();
        let integrated = candidate(20, vk::PhysicalDeviceType::INTEGRATED_GPU, &all_device_extensions(), 471 * GIB);
        let discrete = candidate(21, vk::PhysicalDeviceType::DISCRETE_GPU, &[], 0);

        let selected = select_device(&[discrete, integrated], &request, SelectionMode::Optimal, &weights, None).unwrap();
        assert_eq!(selected.candidate.handle.as_raw(), 20);
        assert!(selected.supported.contains(Features::PRESENTATION | Features::DYNAMIC_RENDERING));
    }

    #[test]
    fn weights_are_overridable() {
        let request = FeatureRequest::new(Features::PRESENTATION);
        let weights = ScoreWeights {
            discrete_gpu: 100,
            ..ScoreWeights::default()
        };
        let integrated = candidate(30, vk::PhysicalDeviceType::INTEGRATED_GPU, &[names::SWAPCHAIN], 0);
        let discrete = candidate(31, vk::PhysicalDeviceType::DISCRETE_GPU, &[], 0);

        let selected = select_device(&[discrete, integrated], &request, SelectionMode::Optimal, &weights, None).unwrap();
        assert_eq!(selected.candidate.handle.as_raw(), 30);
    }

    #[test]
    fn ties_keep_the_earliest_candidate() {
        let a = candidate(40, vk::PhysicalDeviceType::DISCRETE_GPU, &[], 4 * GIB);
        let b = candidate(41, vk::PhysicalDeviceType::DISCRETE_GPU, &[], 4 * GIB);

        let selected = select_device(&[a, b], &FeatureRequest::default(), SelectionMode::Optimal, &ScoreWeights::default(), None).unwrap();
        assert_eq!(selected.candidate.handle.as_raw(), 40);
    }

    #[test]
    fn portability_subset_passes_through_uncounted() {
        let gpu = candidate(50, vk::PhysicalDeviceType::INTEGRATED_GPU, &[names::SWAPCHAIN, names::PORTABILITY_SUBSET], 0);
        let request = FeatureRequest::new(Features::PRESENTATION);

        let evaluation = evaluate(&gpu, &request, &ScoreWeights::default(), None);
        assert_eq!(evaluation.extensions, [names::SWAPCHAIN, names::PORTABILITY_SUBSET]);
        assert_eq!(evaluation.breakdown.extensions, 80 + 250);
        assert!(!evaluation.incomplete);
    }

    #[test]
    fn unrequired_roles_are_unassigned() {
        let gpu = candidate(60, vk::PhysicalDeviceType::DISCRETE_GPU, &[], 0);

        let evaluation = evaluate(&gpu, &FeatureRequest::new(Features::COMPUTE), &ScoreWeights::default(), None);
        assert_eq!(evaluation.assignment.graphics, Some(0));
        assert_eq!(evaluation.assignment.compute, Some(0));
        assert_eq!(evaluation.assignment.transfer, None);
        assert_eq!(evaluation.assignment.present, None);
    }

    #[test]
    fn vendor_names_from_pci_ids() {
        assert_eq!(vendor_name(0x10de), "NVIDIA");
        assert_eq!(vendor_name(0x8086), "Intel");
        assert_eq!(vendor_name(0xdead), "unknown");
    }

    #[test]
    fn huge_weights_saturate_instead_of_overflowing() {
        let weights = ScoreWeights {
            extension_coverage: u64::MAX,
            full_extension_bonus: u64::MAX,
            discrete_gpu: u64::MAX,
            ..ScoreWeights::default()
        };
        let gpu = candidate(70, vk::PhysicalDeviceType::DISCRETE_GPU, &[names::SWAPCHAIN], 8 * GIB);

        let evaluation = evaluate(&gpu, &FeatureRequest::new(Features::PRESENTATION), &weights, None);
        assert_eq!(evaluation.breakdown.extensions, u64::MAX);
        assert_eq!(evaluation.score, u64::MAX);
    }

    #[test]
    fn rejection_and_narrowing_reach_the_debugger() {
        let (debugger, log) = recording(DebugSeverity::ALL, DebugSource::ALL);
        let mut compute_only = candidate(80, vk::PhysicalDeviceType::DISCRETE_GPU, &[], 0);
        compute_only.queue_families = vec![family(vk::QueueFlags::COMPUTE, 1)];
        let plain = candidate(81, vk::PhysicalDeviceType::INTEGRATED_GPU, &[], 0);

        let request = FeatureRequest::new(Features::ANISOTROPY);
        let selected = select_device(
            &[compute_only, plain],
            &request,
            SelectionMode::Optimal,
            &ScoreWeights::default(),
            Some(&debugger),
        )
        .unwrap();
        assert!(!selected.supported.contains(Features::ANISOTROPY));

        let log = log.lock();
        assert!(log.iter().all(|(_, source, _)| *source == DebugSource::CORE));
        let has = |severity: DebugSeverity, text: &str| {
            log.iter().any(|(s, _, m)| *s == severity && m.contains(text))
        };
        assert!(has(DebugSeverity::ERROR, "candidacy rejected: \"gpu-80\""));
        assert!(has(DebugSeverity::WARNING, "missing feature: \"sampler_anisotropy\""));
        assert!(has(DebugSeverity::ERROR, "renderer feature"));
        assert!(has(DebugSeverity::NOTIF, "Selected GPU: gpu-81"));
    }
}
