// Logical device - queues and dispatch tables for one selected GPU
//
// Responsibilities:
// - Lay out queue slots per family (shared families get disjoint slots)
// - Create the device with exactly the validated extensions/features
// - Load the per-device dispatch table right after creation
// - Fetch queue handles per role

use ash::extensions::khr;
use ash::vk;
use serde::Deserialize;

use super::catalog::{names, FeatureRequest, Features, QueueRoles};
use super::debug::{self, DebugSeverity, Debugger, FatalHook};
use super::instance::to_cstrings;
use super::physical::{QueueFamilyAssignment, SelectedDevice};
use crate::error::{Error, Result};

/// Queues requested per role (only used for roles the request requires)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueCounts {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
    pub present: u32,
}

impl Default for QueueCounts {
    fn default() -> Self {
        Self {
            graphics: 1,
            compute: 1,
            transfer: 1,
            present: 1,
        }
    }
}

impl QueueCounts {
    pub fn get(&self, role: QueueRoles) -> u32 {
        match role {
            QueueRoles::GRAPHICS => self.graphics,
            QueueRoles::COMPUTE => self.compute,
            QueueRoles::TRANSFER => self.transfer,
            QueueRoles::PRESENT => self.present,
            _ => 0,
        }
    }
}

/// Queues created from one physical family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyAllocation {
    pub family: u32,
    pub count: u32,
}

/// Where one role's queues live
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoleSlots {
    pub family: u32,
    /// Queue indices inside `family`
    pub slots: Vec<u32>,
}

/// Queue layout for device creation, independent of the driver
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueLayout {
    /// Unique families, in order of first use
    pub families: Vec<FamilyAllocation>,
    pub graphics: Option<RoleSlots>,
    pub compute: Option<RoleSlots>,
    pub transfer: Option<RoleSlots>,
    pub present: Option<RoleSlots>,
}

impl QueueLayout {
    /// Lay out queues for `assignment`.
    ///
    /// A present role sharing the graphics family reuses the graphics slots
    /// and adds nothing. Totals above the family's `queue_count` are clamped
    /// and slots wrap inside the clamp.
    pub fn plan(
        assignment: &QueueFamilyAssignment,
        counts: &QueueCounts,
        families: &[vk::QueueFamilyProperties],
    ) -> Self {
        let mut layout = Self::default();

        for role in QueueFamilyAssignment::ROLES {
            let Some(family) = assignment.get(role) else {
                continue;
            };

            let slots = if role == QueueRoles::PRESENT && assignment.graphics == Some(family) {
                layout.graphics.clone().unwrap_or_default()
            } else {
                let position = match layout.families.iter().position(|a| a.family == family) {
                    Some(position) => position,
                    None => {
                        layout.families.push(FamilyAllocation { family, count: 0 });
                        layout.families.len() - 1
                    }
                };

                let allocation = &mut layout.families[position];
                let requested = counts.get(role);
                let start = allocation.count;
                allocation.count += requested;

                RoleSlots {
                    family,
                    slots: (start..start + requested).collect(),
                }
            };

            *layout.role_mut(role) = Some(slots);
        }

        layout.clamp(families);
        layout
    }

    fn clamp(&mut self, families: &[vk::QueueFamilyProperties]) {
        for i in 0..self.families.len() {
            let family = self.families[i].family;
            let available = families
                .get(family as usize)
                .map_or(1, |f| f.queue_count.max(1));

            if self.families[i].count <= available {
                continue;
            }

            log::warn!(
                "Queue family {} offers {} queues, {} requested; clamping",
                family,
                available,
                self.families[i].count
            );
            self.families[i].count = available;

            for role in QueueFamilyAssignment::ROLES {
                if let Some(slots) = self.role_mut(role).as_mut().filter(|s| s.family == family) {
                    slots.slots.iter_mut().for_each(|s| *s %= available);
                }
            }
        }
    }

    fn role_mut(&mut self, role: QueueRoles) -> &mut Option<RoleSlots> {
        match role {
            QueueRoles::COMPUTE => &mut self.compute,
            QueueRoles::TRANSFER => &mut self.transfer,
            QueueRoles::PRESENT => &mut self.present,
            _ => &mut self.graphics,
        }
    }

    pub fn role(&self, role: QueueRoles) -> Option<&RoleSlots> {
        match role {
            QueueRoles::GRAPHICS => self.graphics.as_ref(),
            QueueRoles::COMPUTE => self.compute.as_ref(),
            QueueRoles::TRANSFER => self.transfer.as_ref(),
            QueueRoles::PRESENT => self.present.as_ref(),
            _ => None,
        }
    }

    pub fn total_queues(&self) -> u32 {
        self.families.iter().map(|a| a.count).sum()
    }
}

/// A typed structure appended to `VkDeviceCreateInfo`
pub enum DeviceChainNode {
    DynamicRendering(vk::PhysicalDeviceDynamicRenderingFeatures),
}

#[derive(Default)]
pub struct DeviceChain {
    nodes: Vec<DeviceChainNode>,
}

impl DeviceChain {
    pub fn for_selection(selected: &SelectedDevice) -> Self {
        let mut chain = Self::default();

        if selected.supported.contains(Features::DYNAMIC_RENDERING)
            && selected.extensions.iter().any(|e| e == names::DYNAMIC_RENDERING)
        {
            chain.push(DeviceChainNode::DynamicRendering(
                vk::PhysicalDeviceDynamicRenderingFeatures::builder()
                    .dynamic_rendering(true)
                    .build(),
            ));
        }

        chain
    }

    pub fn push(&mut self, node: DeviceChainNode) {
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
        mut create_info: vk::DeviceCreateInfoBuilder<'a>,
    ) -> vk::DeviceCreateInfoBuilder<'a> {
        for node in self.nodes.iter_mut() {
            create_info = match node {
                DeviceChainNode::DynamicRendering(info) => create_info.push_next(info),
            };
        }
        create_info
    }
}

/// Per-device function tables, resolved by name after creation
pub struct DeviceDispatch {
    pub device: ash::Device,
    /// Present iff `VK_KHR_swapchain` was enabled
    pub swapchain: Option<khr::Swapchain>,
}

/// Queue handles per role; empty for roles nobody asked for
#[derive(Debug, Clone, Default)]
pub struct RoleQueues {
    pub graphics: Vec<vk::Queue>,
    pub compute: Vec<vk::Queue>,
    pub transfer: Vec<vk::Queue>,
    pub present: Vec<vk::Queue>,
}

impl RoleQueues {
    pub fn get(&self, role: QueueRoles) -> &[vk::Queue] {
        match role {
            QueueRoles::GRAPHICS => &self.graphics,
            QueueRoles::COMPUTE => &self.compute,
            QueueRoles::TRANSFER => &self.transfer,
            QueueRoles::PRESENT => &self.present,
            _ => &[],
        }
    }

    fn get_mut(&mut self, role: QueueRoles) -> &mut Vec<vk::Queue> {
        match role {
            QueueRoles::COMPUTE => &mut self.compute,
            QueueRoles::TRANSFER => &mut self.transfer,
            QueueRoles::PRESENT => &mut self.present,
            _ => &mut self.graphics,
        }
    }
}

/// Logical device with automatic cleanup
pub struct LogicalDevice {
    pub dispatch: DeviceDispatch,
    pub physical_device: vk::PhysicalDevice,
    pub queues: RoleQueues,
    pub layout: QueueLayout,
    pub extensions: Vec<String>,
    /// Features actually usable on this device
    pub supported: FeatureRequest,
}

impl LogicalDevice {
    pub fn device(&self) -> &ash::Device {
        &self.dispatch.device
    }

    pub fn queues(&self, role: QueueRoles) -> &[vk::Queue] {
        self.queues.get(role)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.dispatch.device.device_wait_idle() }
            .map_err(Error::backend("vkDeviceWaitIdle"))
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::warn!("{}", e);
        }

        unsafe {
            self.dispatch.device.destroy_device(None);
        }
    }
}

/// Create the logical device, its dispatch table and its queues.
///
/// On failure nothing is returned, so no queue array can be read.
pub fn build_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
    counts: &QueueCounts,
    fatal: FatalHook,
    debugger: Option<&Debugger>,
) -> Result<LogicalDevice> {
    let physical_device = selected.candidate.handle;
    let layout = QueueLayout::plan(
        &selected.assignment,
        counts,
        &selected.candidate.queue_families,
    );

    let priorities: Vec<Vec<f32>> = layout
        .families
        .iter()
        .map(|a| vec![1.0; a.count as usize])
        .collect();
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = layout
        .families
        .iter()
        .zip(&priorities)
        .filter(|(a, _)| a.count > 0)
        .map(|(a, p)| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(a.family)
                .queue_priorities(p)
                .build()
        })
        .collect();

    let extensions = to_cstrings(&selected.extensions)?;
    let extension_ptrs: Vec<_> = extensions.iter().map(|n| n.as_ptr()).collect();

    let mut chain = DeviceChain::for_selection(selected);
    let create_info = chain.apply(
        vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&selected.features),
    );

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .map_err(|result| {
            core_diag!(
                debugger,
                ERROR,
                "Failed to create logical device on \"{}\": {}",
                selected.candidate.name,
                result
            );
            Error::Backend {
                call: "vkCreateDevice",
                result,
            }
        })?;

    let swapchain = selected
        .extensions
        .iter()
        .any(|e| e == names::SWAPCHAIN)
        .then(|| khr::Swapchain::new(instance, &device));

    let mut queues = RoleQueues::default();
    for role in QueueFamilyAssignment::ROLES {
        let Some(slots) = layout.role(role) else {
            continue;
        };

        let storage = queues.get_mut(role);
        if storage.try_reserve_exact(slots.slots.len()).is_err() {
            let message = "out of host memory reserving queue handle storage";
            debug::report_core(debugger, DebugSeverity::FATAL, message);
            fatal(message);
        }
        for &index in &slots.slots {
            storage.push(unsafe { device.get_device_queue(slots.family, index) });
        }
    }

    log::info!("Created logical device on \"{}\"", selected.candidate.name);
    for allocation in &layout.families {
        log::info!("  family {}: {} queues", allocation.family, allocation.count);
    }
    log::debug!("  {} extensions, {} chain nodes", extension_ptrs.len(), chain.len());

    Ok(LogicalDevice {
        dispatch: DeviceDispatch { device, swapchain },
        physical_device,
        queues,
        layout,
        extensions: selected.extensions.clone(),
        supported: selected.supported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::physical::{DeviceScore, PhysicalDeviceCandidate};
    use ash::vk::Handle;

    fn families(counts: &[u32]) -> Vec<vk::QueueFamilyProperties> {
        counts
            .iter()
            .map(|&queue_count| vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                queue_count,
                ..Default::default()
            })
            .collect()
    }

    fn assignment(g: u32, c: Option<u32>, t: Option<u32>, p: Option<u32>) -> QueueFamilyAssignment {
        QueueFamilyAssignment {
            graphics: Some(g),
            compute: c,
            transfer: t,
            present: p,
        }
    }

    #[test]
    fn present_sharing_graphics_adds_no_queues() {
        let counts = QueueCounts {
            graphics: 2,
            present: 3,
            ..QueueCounts::default()
        };
        let layout = QueueLayout::plan(&assignment(0, Some(1), Some(2), Some(0)), &counts, &families(&[16, 8, 8]));

        assert_eq!(layout.families[0], FamilyAllocation { family: 0, count: 2 });
        assert_eq!(layout.present, layout.graphics);
        assert_eq!(layout.total_queues(), 4);
    }

    #[test]
    fn shared_family_roles_get_disjoint_slots() {
        let layout = QueueLayout::plan(
            &assignment(0, Some(0), Some(1), Some(1)),
            &QueueCounts::default(),
            &families(&[4, 4]),
        );

        assert_eq!(layout.families.len(), 2);
        assert_eq!(layout.graphics.as_ref().unwrap().slots, [0]);
        assert_eq!(layout.compute.as_ref().unwrap().slots, [1]);
        assert_eq!(layout.transfer.as_ref().unwrap().slots, [0]);
        assert_eq!(layout.present.as_ref().unwrap().slots, [1]);
        assert_eq!(layout.total_queues(), 4);
    }

    #[test]
    fn oversubscribed_family_is_clamped() {
        let counts = QueueCounts {
            graphics: 2,
            compute: 2,
            ..QueueCounts::default()
        };
        let layout = QueueLayout::plan(&assignment(0, Some(0), None, None), &counts, &families(&[3]));

        assert_eq!(layout.families[0].count, 3);
        assert_eq!(layout.graphics.as_ref().unwrap().slots, [0, 1]);
        assert_eq!(layout.compute.as_ref().unwrap().slots, [2, 0]);
    }

    #[test]
    fn unassigned_roles_have_no_slots() {
        let layout = QueueLayout::plan(&assignment(0, None, None, None), &QueueCounts::default(), &families(&[1]));

        assert!(layout.compute.is_none());
        assert!(layout.role(QueueRoles::PRESENT).is_none());
        assert_eq!(layout.total_queues(), 1);
    }

    fn selected(features: Features, extensions: &[&str]) -> SelectedDevice {
        SelectedDevice {
            candidate: PhysicalDeviceCandidate {
                handle: vk::PhysicalDevice::from_raw(1),
                name: "fixture".to_string(),
                vendor_id: 0,
                device_id: 0,
                device_type: vk::PhysicalDeviceType::OTHER,
                api_version: 0,
                extensions: Vec::new(),
                features: vk::PhysicalDeviceFeatures::default(),
                queue_families: families(&[1]),
                memory_heaps: Vec::new(),
            },
            assignment: assignment(0, None, None, None),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            features: vk::PhysicalDeviceFeatures::default(),
            supported: FeatureRequest::new(features),
            score: DeviceScore::default(),
        }
    }

    #[test]
    fn dynamic_rendering_node_only_when_supported() {
        let with = selected(Features::DYNAMIC_RENDERING, &[names::DYNAMIC_RENDERING]);
        assert_eq!(DeviceChain::for_selection(&with).len(), 1);

        let narrowed = selected(Features::empty(), &[names::DYNAMIC_RENDERING]);
        assert!(DeviceChain::for_selection(&narrowed).is_empty());
    }

    #[test]
    fn default_counts_are_one_per_role() {
        let counts = QueueCounts::default();
        for role in QueueFamilyAssignment::ROLES {
            assert_eq!(counts.get(role), 1);
        }
    }
}
