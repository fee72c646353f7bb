//! CPU side of scene aggregation: flattens the per-entity attributes into the
//! global, padding-free arrays and the per-instance metadata table that
//! addresses them. Pure, so every rebuild starts from scratch.

use log::warn;

use super::Material;
use crate::shader_types::{GpuMaterial, InstanceMetadata};

/// Read-only view of one entity as the layout needs it.
#[derive(Clone, Copy, Debug)]
pub struct LayoutInput<'a> {
    pub indices: &'a [u32],
    pub uvs: Option<&'a [[f32; 2]]>,
    /// Local material index per triangle.
    pub material_ids: Option<&'a [i32]>,
    /// The entity's own materials, or its single default material. Never empty.
    pub materials: &'a [Material],
}

impl LayoutInput<'_> {
    fn vertex_count(&self) -> usize {
        self.uvs.map_or(0, <[_]>::len)
    }

    fn triangle_count(&self) -> usize {
        self.material_ids.map_or(0, <[_]>::len)
    }
}

/// Global material offset of every entity: the number of material slots used
/// by all entities before it.
pub fn material_offsets(inputs: &[LayoutInput<'_>]) -> Vec<u32> {
    let mut next_offset = 0u32;
    inputs
        .iter()
        .map(|input| {
            let offset = next_offset;
            next_offset += input.materials.len().max(1) as u32;
            offset
        })
        .collect()
}

/// Appends `local` shifted into the global material index space. Ids that do
/// not name one of the entity's `slots` materials use its first material.
/// Returns how many ids had to be replaced.
pub(crate) fn extend_global_material_ids(
    out: &mut Vec<i32>,
    local: &[i32],
    slots: usize,
    material_offset: u32,
) -> usize {
    let slots = slots.max(1) as i32;
    let mut out_of_range = 0;
    out.extend(local.iter().map(|&id| {
        let id = if (0..slots).contains(&id) {
            id
        } else {
            out_of_range += 1;
            0
        };
        id + material_offset as i32
    }));
    out_of_range
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneLayout {
    pub material_offsets: Vec<u32>,
    /// UVs of the entities that have them, nothing for the others.
    pub uvs: Vec<[f32; 2]>,
    /// Global material index per triangle, only for entities with per-triangle ids.
    pub material_ids: Vec<i32>,
    /// Every entity's local indices, unmodified.
    pub indices: Vec<u32>,
    pub instance_metadata: Vec<InstanceMetadata>,
    /// Row `i` is global material `i`.
    pub materials: Vec<GpuMaterial>,
}

impl SceneLayout {
    pub fn build(inputs: &[LayoutInput<'_>]) -> Self {
        let material_offsets = material_offsets(inputs);

        let mut layout = SceneLayout {
            uvs: Vec::with_capacity(inputs.iter().map(LayoutInput::vertex_count).sum()),
            material_ids: Vec::with_capacity(inputs.iter().map(LayoutInput::triangle_count).sum()),
            indices: Vec::with_capacity(inputs.iter().map(|input| input.indices.len()).sum()),
            instance_metadata: Vec::with_capacity(inputs.len()),
            materials: Vec::with_capacity(inputs.iter().map(|input| input.materials.len()).sum()),
            material_offsets: vec![],
        };

        for (entity_index, (input, &material_offset)) in
            inputs.iter().zip(&material_offsets).enumerate()
        {
            let mut metadata = InstanceMetadata {
                index_offset: layout.indices.len() as i32,
                ..Default::default()
            };

            match input.uvs {
                Some(uvs) => {
                    metadata.uv_offset = layout.uvs.len() as i32;
                    metadata.has_uv = 1;
                    metadata.vertex_count = uvs.len() as i32;
                    layout.uvs.extend_from_slice(uvs);
                }
                None => {
                    metadata.uv_offset = -1;
                    metadata.has_uv = 0;
                    metadata.vertex_count = 0;
                }
            }

            match input.material_ids {
                Some(material_ids) => {
                    metadata.material_id_offset = layout.material_ids.len() as i32;
                    metadata.has_material_ids = 1;
                    metadata.triangle_count = material_ids.len() as i32;
                    let out_of_range = extend_global_material_ids(
                        &mut layout.material_ids,
                        material_ids,
                        input.materials.len(),
                        material_offset,
                    );
                    if out_of_range > 0 {
                        warn!(
                            "Entity {entity_index}: {out_of_range} triangles reference a missing material, using its first material"
                        );
                    }
                }
                None => {
                    // The whole entity uses a single material, addressed directly
                    metadata.material_id_offset = material_offset as i32;
                    metadata.has_material_ids = 0;
                    metadata.triangle_count = 0;
                }
            }

            layout.indices.extend_from_slice(input.indices);
            layout
                .materials
                .extend(input.materials.iter().map(Material::to_gpu));
            layout.instance_metadata.push(metadata);
        }

        layout.material_offsets = material_offsets;
        layout
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }
}
