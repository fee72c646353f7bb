mod entity;
mod layout;
mod material;
mod texture_cache;

pub use entity::*;
pub use layout::*;
pub use material::*;
pub use texture_cache::*;

use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::RwLockReadGuard;

use crate::{
    backend::{BufferUsage, InstanceFlags, RayTracingBackend, RayTracingInstance},
    error::SceneError,
    loader::ImageDecoder,
    transform::affine_rows,
};

/// Everything produced by an aggregation pass. Replaced as a whole on rebuild.
pub struct SceneResources<B: RayTracingBackend> {
    pub top_level: B::TopLevel,
    pub materials_buffer: B::Buffer,
    /// `None` when no entity has UVs.
    pub uv_buffer: Option<B::Buffer>,
    /// `None` when no entity has per-triangle material ids.
    pub material_id_buffer: Option<B::Buffer>,
    pub index_buffer: B::Buffer,
    pub instance_metadata_buffer: B::Buffer,
    /// CPU copy of what went into the buffers above.
    pub layout: SceneLayout,
    entity_count: usize,
}

/// Assembles entities into the flat, shader addressable ray tracing scene.
///
/// Entities are appended with [`Scene::add_entity`] and never reordered, so an
/// entity's position is its instance custom index and its metadata row.
/// [`Scene::build_acceleration_structures`] derives everything else from
/// scratch, [`Scene::update_instances`] refits transforms only.
pub struct Scene<B: RayTracingBackend> {
    backend: Arc<B>,
    entities: Vec<SharedEntity<B>>,
    point_lights: Vec<PointLight>,
    textures: TextureCache<B>,
    resources: Option<SceneResources<B>>,
}

impl<B: RayTracingBackend> Scene<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_texture_cache(backend, TextureCache::new())
    }

    pub fn with_decoder(backend: Arc<B>, decoder: impl ImageDecoder + 'static) -> Self {
        Self::with_texture_cache(backend, TextureCache::with_decoder(decoder))
    }

    fn with_texture_cache(backend: Arc<B>, textures: TextureCache<B>) -> Self {
        Self {
            backend,
            entities: vec![],
            point_lights: vec![],
            textures,
            resources: None,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Builds the entity's bottom-level structure and appends it. Invalid
    /// entities are rejected and leave the scene untouched.
    pub fn add_entity(&mut self, entity: &SharedEntity<B>) -> Result<(), SceneError> {
        if self.entities.iter().any(|e| Arc::ptr_eq(e, entity)) {
            let path = entity.read().path().to_path_buf();
            error!("Entity {} was already added", path.display());
            return Err(SceneError::DuplicateEntity(path));
        }

        // Append-only, so this offset is already the final one
        let material_offset = self.next_material_offset();
        {
            let mut guard = entity.write();
            if !guard.is_valid() {
                error!("Cannot add invalid entity {}", guard.path().display());
                return Err(SceneError::InvalidEntity);
            }
            if guard.bottom_level().is_some() {
                guard.sync_material_offset(&self.backend, material_offset)?;
            } else {
                guard.build_bottom_level(&self.backend, material_offset)?;
            }
            debug!(
                "Added entity {} as instance {} with material offset {}",
                guard.path().display(),
                self.entities.len(),
                material_offset
            );
        }

        self.entities.push(Arc::clone(entity));
        Ok(())
    }

    fn next_material_offset(&self) -> u32 {
        self.entities
            .iter()
            .map(|entity| entity.read_recursive().material_slot_count() as u32)
            .sum()
    }

    pub fn add_point_light(&mut self, light: PointLight) {
        self.point_lights.push(light);
    }

    pub fn point_lights(&self) -> &[PointLight] {
        &self.point_lights
    }

    /// Forgets every entity, light, texture and derived buffer.
    pub fn clear(&mut self) {
        self.resources = None;
        self.entities.clear();
        self.point_lights.clear();
        self.textures.clear();
    }

    /// Rebuilds the top-level structure and every global buffer from the
    /// current entities. Running it twice over the same entities gives the same
    /// result.
    ///
    /// On failure the previously built [`SceneResources`] stay in place. Entity
    /// material offsets and textures resolved before the failing upload are
    /// kept, a retry finds them already done.
    pub fn build_acceleration_structures(&mut self) -> Result<(), SceneError> {
        if self.entities.is_empty() {
            warn!("No entities in the scene, skipping acceleration structure build");
            return Ok(());
        }

        let top_level = {
            let guards = self.read_entities();
            let instances = instances(&guards);
            self.backend.create_top_level(&instances)?
        };
        self.assign_material_offsets()?;
        self.assign_texture_indices();

        let guards = self.read_entities();
        let inputs: Vec<_> = guards
            .iter()
            .filter_map(|entity| entity.layout_input())
            .collect();
        let layout = SceneLayout::build(&inputs);
        debug_assert!(guards
            .iter()
            .zip(&layout.material_offsets)
            .all(|(entity, &offset)| entity.material_offset() == offset));

        let backend = &self.backend;
        let uv_buffer = (!layout.uvs.is_empty())
            .then(|| backend.create_buffer(bytemuck::cast_slice(&layout.uvs), BufferUsage::Storage))
            .transpose()?;
        let material_id_buffer = (!layout.material_ids.is_empty())
            .then(|| {
                backend.create_buffer(
                    bytemuck::cast_slice(&layout.material_ids),
                    BufferUsage::Storage,
                )
            })
            .transpose()?;
        let index_buffer =
            backend.create_buffer(bytemuck::cast_slice(&layout.indices), BufferUsage::Index)?;
        let instance_metadata_buffer = backend.create_buffer(
            bytemuck::cast_slice(&layout.instance_metadata),
            BufferUsage::Storage,
        )?;
        let materials_buffer =
            backend.create_buffer(bytemuck::cast_slice(&layout.materials), BufferUsage::Storage)?;
        let entity_count = guards.len();
        drop(guards);

        info!(
            "Built scene: {} instances, {} materials, {} textures, {} normal maps, \
             {} indices, {} uvs, {} material ids",
            entity_count,
            layout.material_count(),
            self.textures.texture_count(),
            self.textures.normal_count(),
            layout.indices.len(),
            layout.uvs.len(),
            layout.material_ids.len()
        );

        self.resources = Some(SceneResources {
            top_level,
            materials_buffer,
            uv_buffer,
            material_id_buffer,
            index_buffer,
            instance_metadata_buffer,
            layout,
            entity_count,
        });
        Ok(())
    }

    fn assign_material_offsets(&mut self) -> Result<(), SceneError> {
        let mut material_offset = 0;
        for entity in &self.entities {
            let mut entity = entity.write();
            entity.sync_material_offset(&self.backend, material_offset)?;
            material_offset += entity.material_slot_count() as u32;
        }
        Ok(())
    }

    fn assign_texture_indices(&mut self) {
        for entity in &self.entities {
            let mut entity = entity.write();
            for material in entity.material_slots_mut() {
                material.texture_index = match &material.texture_path {
                    Some(path) => self.textures.load_texture(&self.backend, path),
                    None => NO_TEXTURE,
                };
                material.normal_index = match &material.normal_path {
                    Some(path) => self.textures.load_normal(&self.backend, path),
                    None => NO_TEXTURE,
                };
            }
        }
    }

    /// Refits the top-level structure to the entities' current transforms.
    /// Geometry and material changes need a full rebuild instead.
    pub fn update_instances(&mut self) -> Result<(), SceneError> {
        if self.entities.is_empty() {
            warn!("No entities in the scene, nothing to update");
            return Ok(());
        }
        let Some(resources) = &mut self.resources else {
            debug!("No top-level structure yet, nothing to update");
            return Ok(());
        };
        if resources.entity_count != self.entities.len() {
            return Err(SceneError::StaleAggregation);
        }

        let guards: Vec<_> = self
            .entities
            .iter()
            .map(|entity| entity.read_recursive())
            .collect();
        let instances = instances(&guards);
        self.backend
            .update_top_level(&mut resources.top_level, &instances)?;
        Ok(())
    }

    fn read_entities(&self) -> Vec<RwLockReadGuard<'_, Entity<B>>> {
        self.entities
            .iter()
            .map(|entity| entity.read_recursive())
            .collect()
    }

    pub fn entities(&self) -> &[SharedEntity<B>] {
        &self.entities
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn resources(&self) -> Option<&SceneResources<B>> {
        self.resources.as_ref()
    }

    pub fn top_level(&self) -> Option<&B::TopLevel> {
        self.resources.as_ref().map(|r| &r.top_level)
    }

    pub fn materials_buffer(&self) -> Option<&B::Buffer> {
        self.resources.as_ref().map(|r| &r.materials_buffer)
    }

    pub fn global_uv_buffer(&self) -> Option<&B::Buffer> {
        self.resources.as_ref()?.uv_buffer.as_ref()
    }

    pub fn global_material_id_buffer(&self) -> Option<&B::Buffer> {
        self.resources.as_ref()?.material_id_buffer.as_ref()
    }

    pub fn global_index_buffer(&self) -> Option<&B::Buffer> {
        self.resources.as_ref().map(|r| &r.index_buffer)
    }

    pub fn instance_metadata_buffer(&self) -> Option<&B::Buffer> {
        self.resources.as_ref().map(|r| &r.instance_metadata_buffer)
    }

    pub fn layout(&self) -> Option<&SceneLayout> {
        self.resources.as_ref().map(|r| &r.layout)
    }

    pub fn textures(&self) -> &TextureCache<B> {
        &self.textures
    }

    pub fn texture(&self, index: i32) -> Option<&CachedTexture<B>> {
        self.textures.texture(index)
    }

    pub fn normal(&self, index: i32) -> Option<&CachedTexture<B>> {
        self.textures.normal(index)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.texture_count()
    }

    pub fn normal_count(&self) -> usize {
        self.textures.normal_count()
    }
}

/// One instance per entity. The custom index is the entity's position, which
/// is also its row in the instance metadata.
fn instances<'a, B: RayTracingBackend>(
    entities: &'a [RwLockReadGuard<'_, Entity<B>>],
) -> Vec<RayTracingInstance<'a, B>> {
    entities
        .iter()
        .enumerate()
        .filter_map(|(index, entity)| {
            Some(RayTracingInstance {
                bottom_level: entity.bottom_level()?,
                transform: affine_rows(&entity.transform()),
                custom_index: index as u32,
                mask: 0xFF,
                shader_binding_table_offset: 0,
                flags: InstanceFlags::NONE,
            })
        })
        .collect()
}
