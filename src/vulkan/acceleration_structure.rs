use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use log::debug;

use super::{buffer::Buffer, command_pool::CommandPool, context::Context};
use crate::{error::BackendError, utility::aligned_size};

pub struct AccelerationStructure {
    pub inner: vk::AccelerationStructureKHR,
    pub buffer: Buffer,
    pub device_address: vk::DeviceAddress,
    context: Arc<Context>,
}

impl AccelerationStructure {
    // See https://github.com/SaschaWillems/Vulkan/blob/a467d941599a2cef5bd0eff696999bca8d75ee23/base/VulkanRaytracingSample.cpp#L149
    pub fn new(
        context: Arc<Context>,
        structure_type: vk::AccelerationStructureTypeKHR,
        build_size_info: &vk::AccelerationStructureBuildSizesInfoKHR,
    ) -> Result<Self, BackendError> {
        let buffer = Buffer::new(
            context.clone(),
            "acceleration structure",
            build_size_info.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
            MemoryLocation::GpuOnly,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.inner)
            .size(build_size_info.acceleration_structure_size)
            .ty(structure_type);

        let inner = unsafe {
            context
                .acceleration_structure
                .create_acceleration_structure(&create_info, None)
        }?;

        let device_address = {
            let acceleration_structure_device_address_info =
                vk::AccelerationStructureDeviceAddressInfoKHR::builder()
                    .acceleration_structure(inner);

            unsafe {
                context
                    .acceleration_structure
                    .get_acceleration_structure_device_address(
                        &acceleration_structure_device_address_info,
                    )
            }
        };

        Ok(Self {
            inner,
            buffer,
            device_address,
            context,
        })
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.context
                .acceleration_structure
                .destroy_acceleration_structure(self.inner, None);
        }
    }
}

/// Bottom-level structure over one triangle mesh.
pub struct BottomLevel {
    pub structure: AccelerationStructure,
    pub triangle_count: u32,
}

/// Top-level structure built with `ALLOW_UPDATE`. Keeps its instance buffer
/// around so refits only rewrite the instance records.
pub struct TopLevel {
    pub structure: AccelerationStructure,
    instance_buffer: Buffer,
    instance_count: u32,
    update_scratch_size: vk::DeviceSize,
}

impl TopLevel {
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }
}

const TOP_LEVEL_FLAGS: vk::BuildAccelerationStructureFlagsKHR =
    vk::BuildAccelerationStructureFlagsKHR::from_raw(
        vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE.as_raw()
            | vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE.as_raw(),
    );

pub struct TriangleInput<'a> {
    pub vertex_buffer: &'a Buffer,
    pub vertex_count: u32,
    pub vertex_stride: vk::DeviceSize,
    pub index_buffer: &'a Buffer,
    pub index_count: u32,
}

pub fn build_bottom_level(
    command_pool: &CommandPool,
    input: TriangleInput<'_>,
) -> Result<BottomLevel, BackendError> {
    if input.vertex_count == 0 || input.index_count == 0 || input.index_count % 3 != 0 {
        return Err(BackendError::InvalidInput(format!(
            "cannot build a bottom-level structure from {} vertices and {} indices",
            input.vertex_count, input.index_count
        )));
    }

    let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
        .vertex_format(vk::Format::R32G32B32_SFLOAT)
        .vertex_data(vk::DeviceOrHostAddressConstKHR {
            device_address: input.vertex_buffer.device_address,
        })
        .vertex_stride(input.vertex_stride)
        .max_vertex(input.vertex_count - 1)
        .index_type(vk::IndexType::UINT32)
        .index_data(vk::DeviceOrHostAddressConstKHR {
            device_address: input.index_buffer.device_address,
        })
        .build();
    let geometry = vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
        .flags(vk::GeometryFlagsKHR::OPAQUE)
        .build();

    let triangle_count = input.index_count / 3;
    let structure = build(
        command_pool,
        vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
        &geometry,
        triangle_count,
    )?
    .0;

    debug!(
        "Built bottom-level structure with {triangle_count} triangles at {:#x}",
        structure.device_address
    );
    Ok(BottomLevel {
        structure,
        triangle_count,
    })
}

pub fn build_top_level(
    command_pool: &CommandPool,
    instances: &[vk::AccelerationStructureInstanceKHR],
) -> Result<TopLevel, BackendError> {
    let instance_buffer = Buffer::with_data(
        command_pool.context().clone(),
        "instances",
        instance_bytes(instances),
        vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
    )?;
    let geometry = instances_geometry(&instance_buffer);

    let instance_count = instances.len() as u32;
    let (structure, update_scratch_size) = build(
        command_pool,
        vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        TOP_LEVEL_FLAGS,
        &geometry,
        instance_count,
    )?;

    Ok(TopLevel {
        structure,
        instance_buffer,
        instance_count,
        update_scratch_size,
    })
}

/// Refits `top_level` in place from the new instance records.
pub fn update_top_level(
    command_pool: &CommandPool,
    top_level: &mut TopLevel,
    instances: &[vk::AccelerationStructureInstanceKHR],
) -> Result<(), BackendError> {
    if instances.len() as u32 != top_level.instance_count {
        return Err(BackendError::InvalidInput(format!(
            "top-level structure holds {} instances, refit got {}",
            top_level.instance_count,
            instances.len()
        )));
    }
    let context = command_pool.context();
    top_level.instance_buffer.copy_data(instance_bytes(instances))?;

    let geometry = instances_geometry(&top_level.instance_buffer);
    let scratch = scratch_buffer(context, top_level.update_scratch_size)?;
    let build_geometry_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
        .geometries(std::slice::from_ref(&geometry))
        .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
        .flags(TOP_LEVEL_FLAGS)
        .mode(vk::BuildAccelerationStructureModeKHR::UPDATE)
        .src_acceleration_structure(top_level.structure.inner)
        .dst_acceleration_structure(top_level.structure.inner)
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: aligned_size(scratch.device_address, context.scratch_alignment()),
        })
        .build();

    record_build(command_pool, &build_geometry_info, top_level.instance_count)
}

fn instances_geometry(instance_buffer: &Buffer) -> vk::AccelerationStructureGeometryKHR {
    vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            instances: vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: instance_buffer.device_address,
                })
                .build(),
        })
        .flags(vk::GeometryFlagsKHR::OPAQUE)
        .build()
}

fn instance_bytes(instances: &[vk::AccelerationStructureInstanceKHR]) -> &[u8] {
    // The instance record is plain old data laid out exactly as the device reads it
    unsafe {
        std::slice::from_raw_parts(
            instances.as_ptr().cast::<u8>(),
            std::mem::size_of_val(instances),
        )
    }
}

/// Creates the structure and runs the initial build. Also returns the scratch
/// size a later refit needs.
fn build(
    command_pool: &CommandPool,
    ty: vk::AccelerationStructureTypeKHR,
    flags: vk::BuildAccelerationStructureFlagsKHR,
    geometry: &vk::AccelerationStructureGeometryKHR,
    primitive_count: u32,
) -> Result<(AccelerationStructure, vk::DeviceSize), BackendError> {
    let context = command_pool.context();

    let size_query = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
        .geometries(std::slice::from_ref(geometry))
        .ty(ty)
        .flags(flags)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD);
    let build_size_info = unsafe {
        context
            .acceleration_structure
            .get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &size_query,
                &[primitive_count],
            )
    };

    let structure = AccelerationStructure::new(context.clone(), ty, &build_size_info)?;
    let scratch = scratch_buffer(context, build_size_info.build_scratch_size)?;

    let build_geometry_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
        .geometries(std::slice::from_ref(geometry))
        .ty(ty)
        .flags(flags)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .src_acceleration_structure(vk::AccelerationStructureKHR::null())
        .dst_acceleration_structure(structure.inner)
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: aligned_size(scratch.device_address, context.scratch_alignment()),
        })
        .build();

    record_build(command_pool, &build_geometry_info, primitive_count)?;

    Ok((structure, build_size_info.update_scratch_size))
}

/// Over-allocated so the start address can be aligned.
fn scratch_buffer(context: &Arc<Context>, size: vk::DeviceSize) -> Result<Buffer, BackendError> {
    Buffer::new(
        context.clone(),
        "acceleration structure scratch",
        size + context.scratch_alignment(),
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryLocation::GpuOnly,
    )
}

fn record_build(
    command_pool: &CommandPool,
    build_geometry_info: &vk::AccelerationStructureBuildGeometryInfoKHR,
    primitive_count: u32,
) -> Result<(), BackendError> {
    let context = command_pool.context();
    let build_range_info = vk::AccelerationStructureBuildRangeInfoKHR::builder()
        .primitive_count(primitive_count)
        .primitive_offset(0)
        .first_vertex(0)
        .transform_offset(0)
        .build();

    command_pool.one_time_submit(|device, command_buffer| {
        unsafe {
            context.acceleration_structure.cmd_build_acceleration_structures(
                command_buffer,
                std::slice::from_ref(build_geometry_info),
                &[std::slice::from_ref(&build_range_info)],
            )
        };

        let barrier = vk::MemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
            .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
            .dst_stage_mask(
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                    | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            )
            .dst_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR)
            .build();
        let dependency_info =
            vk::DependencyInfo::builder().memory_barriers(std::slice::from_ref(&barrier));
        unsafe { device.cmd_pipeline_barrier2(command_buffer, &dependency_info) };
    })
}
