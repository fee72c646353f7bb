use std::{ffi::CStr, mem::ManuallyDrop, sync::Arc};

use ash::{
    extensions::khr::{AccelerationStructure, DeferredHostOperations},
    vk::{self, ApplicationInfo, DeviceCreateInfo, DeviceQueueCreateInfo, InstanceCreateInfo},
};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use log::info;
use parking_lot::Mutex;

use crate::error::BackendError;

/// Headless device with everything needed to build acceleration structures.
pub struct Context {
    _entry: ash::Entry,
    pub instance: ash::Instance,

    pub acceleration_structure: AccelerationStructure,
    pub physical_device_acceleration_structure_properties_khr:
        vk::PhysicalDeviceAccelerationStructurePropertiesKHR,

    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,

    pub device: ash::Device,
    pub queue: vk::Queue,

    /// Dropped before the device, see [`Drop`].
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
}

impl Context {
    pub fn new() -> Result<Self, BackendError> {
        let entry =
            unsafe { ash::Entry::load() }.map_err(|err| BackendError::Loading(err.to_string()))?;

        let instance = {
            let app_name = CStr::from_bytes_with_nul(b"raytrace-scene\0").unwrap_or_default();
            let app_info = ApplicationInfo::builder()
                .application_name(app_name)
                .api_version(vk::API_VERSION_1_3);
            let create_info = InstanceCreateInfo::builder().application_info(&app_info);
            unsafe { entry.create_instance(&create_info, None) }?
        };

        let (physical_device, queue_family_index) = match find_physical_device(&instance) {
            Ok(Some(found)) => found,
            Ok(None) => {
                unsafe { instance.destroy_instance(None) };
                return Err(BackendError::NoSuitableDevice);
            }
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        };

        let device = match create_logical_device(&instance, physical_device, queue_family_index) {
            Ok(device) => device,
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let acceleration_structure = AccelerationStructure::new(&instance, &device);
        let physical_device_acceleration_structure_properties_khr =
            unsafe { AccelerationStructure::get_properties(&instance, physical_device) };

        let device_name = {
            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned()
        };
        info!("Using {device_name} (queue family {queue_family_index})");

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(err) => {
                unsafe {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                }
                return Err(err.into());
            }
        };

        Ok(Self {
            _entry: entry,
            instance,

            acceleration_structure,
            physical_device_acceleration_structure_properties_khr,

            physical_device,
            queue_family_index,

            device,
            queue,

            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
        })
    }

    pub fn allocator(&self) -> &Arc<Mutex<Allocator>> {
        &self.allocator
    }

    pub fn scratch_alignment(&self) -> u64 {
        u64::from(
            self.physical_device_acceleration_structure_properties_khr
                .min_acceleration_structure_scratch_offset_alignment,
        )
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Every allocation has been freed by now, the allocator must go before the device
        unsafe { ManuallyDrop::drop(&mut self.allocator) };

        unsafe { self.device.destroy_device(None) };

        unsafe { self.instance.destroy_instance(None) };
    }
}

fn find_physical_device(
    instance: &ash::Instance,
) -> Result<Option<(vk::PhysicalDevice, u32)>, BackendError> {
    let required_extensions = [
        AccelerationStructure::name(),
        DeferredHostOperations::name(),
    ];

    let physical_devices = unsafe { instance.enumerate_physical_devices() }?;

    let mut candidates = vec![];
    for pd in physical_devices {
        let extension_properties = unsafe { instance.enumerate_device_extension_properties(pd) }?;
        let supported = |name: &CStr| {
            extension_properties
                .iter()
                .any(|property| unsafe { CStr::from_ptr(property.extension_name.as_ptr()) } == name)
        };
        if !required_extensions.iter().all(|name| supported(name)) {
            continue;
        }

        let queue_family_index = unsafe { instance.get_physical_device_queue_family_properties(pd) }
            .iter()
            .position(|info| {
                info.queue_flags
                    .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            });
        if let Some(index) = queue_family_index {
            candidates.push((pd, index as u32));
        }
    }

    Ok(candidates.into_iter().min_by_key(|(pd, _)| {
        let device_type = unsafe { instance.get_physical_device_properties(*pd) }.device_type;

        match device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 0,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
            vk::PhysicalDeviceType::CPU => 3,
            vk::PhysicalDeviceType::OTHER => 4,
            _ => 5,
        }
    }))
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
) -> Result<ash::Device, BackendError> {
    let device_extensions = [
        AccelerationStructure::name().as_ptr(),
        DeferredHostOperations::name().as_ptr(),
    ];

    let queue_priorities = [1.0];
    let queue_create_info = DeviceQueueCreateInfo::builder()
        .queue_family_index(queue_family_index)
        .queue_priorities(&queue_priorities);

    let mut physical_device_vulkan12_features = vk::PhysicalDeviceVulkan12Features {
        buffer_device_address: vk::TRUE,
        ..vk::PhysicalDeviceVulkan12Features::default()
    };

    let mut physical_device_vulkan13_features = vk::PhysicalDeviceVulkan13Features {
        synchronization2: vk::TRUE,
        ..vk::PhysicalDeviceVulkan13Features::default()
    };

    let mut enabled_acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR {
            acceleration_structure: vk::TRUE,
            ..vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
        };

    let create_info = DeviceCreateInfo::builder()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&device_extensions)
        .push_next(&mut physical_device_vulkan12_features)
        .push_next(&mut physical_device_vulkan13_features)
        .push_next(&mut enabled_acceleration_structure_features);

    Ok(unsafe { instance.create_device(physical_device, &create_info, None) }?)
}
