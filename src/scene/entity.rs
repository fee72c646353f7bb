use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, error, warn};
use parking_lot::RwLock;
use ultraviolet::Mat4;

use super::{layout, LayoutInput, Material};
use crate::{
    backend::{BufferUsage, RayTracingBackend, TriangleGeometry},
    error::{BackendError, LoadError, SceneError},
    loader::{LoadedMesh, MeshLoader, ObjLoader},
};

/// Entities can be shared between scenes and kept around by the caller.
pub type SharedEntity<B> = Arc<RwLock<Entity<B>>>;

struct MeshData {
    positions: Vec<[f32; 3]>,
    indices: Vec<u32>,
    uvs: Option<Vec<[f32; 2]>>,
    /// Local material index per triangle.
    material_ids: Option<Vec<i32>>,
}

/// GPU side of an entity. Released when the entity is dropped.
pub struct EntityResources<B: RayTracingBackend> {
    pub vertex_buffer: B::Buffer,
    pub index_buffer: B::Buffer,
    pub uv_buffer: Option<B::Buffer>,
    /// Holds global material indices for the offset the entity was last synced to.
    pub material_id_buffer: Option<B::Buffer>,
    pub bottom_level: B::BottomLevel,
}

pub struct Entity<B: RayTracingBackend> {
    path: PathBuf,
    /// `None` once loading failed. Such an entity never becomes valid.
    mesh: Option<MeshData>,
    materials: Vec<Material>,
    /// Parallel to `materials`.
    material_names: Vec<String>,
    /// Stands in when the mesh brought no materials.
    default_material: Material,
    transform: Mat4,
    material_offset: u32,
    resources: Option<EntityResources<B>>,
}

impl<B: RayTracingBackend> Entity<B> {
    /// Loads an OBJ file. A failure is logged and leaves the entity invalid.
    pub fn load(path: impl AsRef<Path>) -> Self {
        Self::load_with(&ObjLoader, path)
    }

    pub fn load_with(loader: &impl MeshLoader, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self::try_load_with(loader, path).unwrap_or_else(|err| {
            error!("Failed to load entity: {err}");
            Self::invalid(path)
        })
    }

    pub fn try_load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::try_load_with(&ObjLoader, path)
    }

    pub fn try_load_with(
        loader: &impl MeshLoader,
        path: impl AsRef<Path>,
    ) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let mesh = loader.load(path)?;
        Self::try_from_loaded_mesh(path, mesh)
    }

    /// Like [`Entity::try_from_loaded_mesh`], but a malformed mesh is logged
    /// and gives an invalid entity.
    pub fn from_loaded_mesh(path: impl Into<PathBuf>, mesh: LoadedMesh) -> Self {
        let path = path.into();
        match Self::try_from_loaded_mesh(path.clone(), mesh) {
            Ok(entity) => entity,
            Err(err) => {
                error!("Failed to load entity: {err}");
                Self::invalid(&path)
            }
        }
    }

    /// Checks the mesh before taking it over, whichever loader produced it.
    pub fn try_from_loaded_mesh(
        path: impl Into<PathBuf>,
        mesh: LoadedMesh,
    ) -> Result<Self, LoadError> {
        let path = path.into();
        mesh.validate(&path)?;
        // A sentinel in the first slot means there is no usable assignment
        let material_ids = mesh
            .material_ids
            .filter(|ids| ids.first().is_some_and(|&id| id != -1));
        let materials: Vec<_> = mesh.materials.iter().map(Material::from_phong).collect();
        let material_names = mesh.materials.into_iter().map(|m| m.name).collect();

        debug!(
            "Loaded {}: {} vertices, {} triangles, {} materials, uvs: {}, material ids: {}",
            path.display(),
            mesh.positions.len(),
            mesh.indices.len() / 3,
            materials.len(),
            mesh.uvs.is_some(),
            material_ids.is_some()
        );

        Ok(Self {
            path,
            mesh: Some(MeshData {
                positions: mesh.positions,
                indices: mesh.indices,
                uvs: mesh.uvs,
                material_ids,
            }),
            materials,
            material_names,
            default_material: Material::default(),
            transform: Mat4::identity(),
            material_offset: 0,
            resources: None,
        })
    }

    fn invalid(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            mesh: None,
            materials: vec![],
            material_names: vec![],
            default_material: Material::default(),
            transform: Mat4::identity(),
            material_offset: 0,
            resources: None,
        }
    }

    pub fn into_shared(self) -> SharedEntity<B> {
        Arc::new(RwLock::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_valid(&self) -> bool {
        self.mesh.is_some()
    }

    pub fn has_uv_coordinates(&self) -> bool {
        self.mesh.as_ref().is_some_and(|mesh| mesh.uvs.is_some())
    }

    pub fn has_material_ids(&self) -> bool {
        self.mesh
            .as_ref()
            .is_some_and(|mesh| mesh.material_ids.is_some())
    }

    pub fn has_own_materials(&self) -> bool {
        !self.materials.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.mesh.as_ref().map_or(0, |mesh| mesh.positions.len())
    }

    pub fn index_count(&self) -> usize {
        self.mesh.as_ref().map_or(0, |mesh| mesh.indices.len())
    }

    pub fn triangle_count(&self) -> usize {
        self.index_count() / 3
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        self.mesh
            .as_ref()
            .map(|mesh| mesh.positions.as_slice())
            .unwrap_or_default()
    }

    pub fn indices(&self) -> &[u32] {
        self.mesh
            .as_ref()
            .map(|mesh| mesh.indices.as_slice())
            .unwrap_or_default()
    }

    pub fn uvs(&self) -> Option<&[[f32; 2]]> {
        self.mesh.as_ref()?.uvs.as_deref()
    }

    pub fn material_ids(&self) -> Option<&[i32]> {
        self.mesh.as_ref()?.material_ids.as_deref()
    }

    /// The materials the mesh brought, possibly none.
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// The materials occupying this entity's slots in the global material array.
    pub fn material_slots(&self) -> &[Material] {
        if self.materials.is_empty() {
            std::slice::from_ref(&self.default_material)
        } else {
            &self.materials
        }
    }

    pub fn material_slots_mut(&mut self) -> &mut [Material] {
        if self.materials.is_empty() {
            std::slice::from_mut(&mut self.default_material)
        } else {
            &mut self.materials
        }
    }

    pub fn material_slot_count(&self) -> usize {
        self.materials.len().max(1)
    }

    pub fn material_by_name(&self, name: &str) -> Option<&Material> {
        let index = self.material_names.iter().position(|n| n == name)?;
        self.materials.get(index)
    }

    pub fn material_by_name_mut(&mut self, name: &str) -> Option<&mut Material> {
        let index = self.material_names.iter().position(|n| n == name)?;
        self.materials.get_mut(index)
    }

    pub fn material_by_index(&self, index: usize) -> Option<&Material> {
        self.materials.get(index)
    }

    pub fn material_by_index_mut(&mut self, index: usize) -> Option<&mut Material> {
        self.materials.get_mut(index)
    }

    pub fn material_name(&self, index: usize) -> Option<&str> {
        self.material_names.get(index).map(String::as_str)
    }

    pub fn default_material(&self) -> &Material {
        &self.default_material
    }

    pub fn set_default_material(&mut self, material: Material) {
        self.default_material = material;
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Only affine transforms survive the trip into the top-level structure.
    pub fn set_transform(&mut self, transform: impl Into<Mat4>) {
        self.transform = transform.into();
    }

    pub fn material_offset(&self) -> u32 {
        self.material_offset
    }

    pub fn resources(&self) -> Option<&EntityResources<B>> {
        self.resources.as_ref()
    }

    pub fn bottom_level(&self) -> Option<&B::BottomLevel> {
        self.resources.as_ref().map(|resources| &resources.bottom_level)
    }

    /// Uploads the geometry and builds the bottom-level structure. The
    /// per-triangle material ids are uploaded already shifted by
    /// `material_offset`, which therefore has to be the entity's final offset.
    pub fn build_bottom_level(
        &mut self,
        backend: &B,
        material_offset: u32,
    ) -> Result<(), SceneError> {
        let Some(mesh) = &self.mesh else {
            return Err(SceneError::InvalidEntity);
        };

        let vertex_buffer =
            backend.create_buffer(bytemuck::cast_slice(&mesh.positions), BufferUsage::Vertex)?;
        let index_buffer =
            backend.create_buffer(bytemuck::cast_slice(&mesh.indices), BufferUsage::Index)?;
        let uv_buffer = mesh
            .uvs
            .as_ref()
            .map(|uvs| backend.create_buffer(bytemuck::cast_slice(uvs), BufferUsage::Storage))
            .transpose()?;
        let material_id_buffer = self.upload_material_ids(backend, material_offset)?;

        let bottom_level = backend.create_bottom_level(TriangleGeometry {
            vertex_buffer: &vertex_buffer,
            vertex_count: mesh.positions.len() as u32,
            vertex_stride: std::mem::size_of::<[f32; 3]>() as u64,
            index_buffer: &index_buffer,
            index_count: mesh.indices.len() as u32,
        })?;

        self.material_offset = material_offset;
        self.resources = Some(EntityResources {
            vertex_buffer,
            index_buffer,
            uv_buffer,
            material_id_buffer,
            bottom_level,
        });
        Ok(())
    }

    /// Moves the entity to a new place in the global material array. The
    /// material id buffer is re-uploaded when the offset actually changes.
    pub fn sync_material_offset(
        &mut self,
        backend: &B,
        material_offset: u32,
    ) -> Result<(), BackendError> {
        if material_offset == self.material_offset {
            return Ok(());
        }
        if self.resources.is_some() {
            let material_id_buffer = self.upload_material_ids(backend, material_offset)?;
            if let Some(resources) = &mut self.resources {
                resources.material_id_buffer = material_id_buffer;
            }
        }
        debug!(
            "Material offset of {} moved from {} to {}",
            self.path.display(),
            self.material_offset,
            material_offset
        );
        self.material_offset = material_offset;
        Ok(())
    }

    fn upload_material_ids(
        &self,
        backend: &B,
        material_offset: u32,
    ) -> Result<Option<B::Buffer>, BackendError> {
        let Some(local_ids) = self.material_ids() else {
            return Ok(None);
        };
        let mut global_ids = Vec::with_capacity(local_ids.len());
        let out_of_range = layout::extend_global_material_ids(
            &mut global_ids,
            local_ids,
            self.material_slot_count(),
            material_offset,
        );
        if out_of_range > 0 {
            warn!(
                "{}: {out_of_range} triangles reference a missing material",
                self.path.display()
            );
        }
        backend
            .create_buffer(bytemuck::cast_slice(&global_ids), BufferUsage::Storage)
            .map(Some)
    }

    /// What the scene layout reads from this entity. `None` for an invalid entity.
    pub fn layout_input(&self) -> Option<LayoutInput<'_>> {
        let mesh = self.mesh.as_ref()?;
        Some(LayoutInput {
            indices: &mesh.indices,
            uvs: mesh.uvs.as_deref(),
            material_ids: mesh.material_ids.as_deref(),
            materials: self.material_slots(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::{backend::RayTracingInstance, loader::LoadedMaterial};

    /// Keeps every upload as plain bytes.
    #[derive(Default)]
    struct HostBackend {
        buffers: RefCell<Vec<(BufferUsage, Vec<u8>)>>,
    }

    impl RayTracingBackend for HostBackend {
        type Buffer = Vec<u8>;
        type Image = ();
        type BottomLevel = (u32, u64, u32);
        type TopLevel = usize;

        fn create_buffer(&self, data: &[u8], usage: BufferUsage) -> Result<Vec<u8>, BackendError> {
            self.buffers.borrow_mut().push((usage, data.to_vec()));
            Ok(data.to_vec())
        }

        fn create_image_rgba8(&self, _: u32, _: u32, _: &[u8]) -> Result<(), BackendError> {
            Ok(())
        }

        fn create_bottom_level(
            &self,
            geometry: TriangleGeometry<'_, Self>,
        ) -> Result<Self::BottomLevel, BackendError> {
            Ok((geometry.vertex_count, geometry.vertex_stride, geometry.index_count))
        }

        fn create_top_level(
            &self,
            instances: &[RayTracingInstance<'_, Self>],
        ) -> Result<usize, BackendError> {
            Ok(instances.len())
        }

        fn update_top_level(
            &self,
            _: &mut usize,
            _: &[RayTracingInstance<'_, Self>],
        ) -> Result<(), BackendError> {
            Ok(())
        }
    }

    struct FailingLoader;

    impl MeshLoader for FailingLoader {
        fn load(&self, path: &Path) -> Result<LoadedMesh, LoadError> {
            Err(LoadError::NotFound(path.to_path_buf()))
        }
    }

    fn quad(material_ids: Option<Vec<i32>>, materials: Vec<LoadedMaterial>) -> LoadedMesh {
        LoadedMesh {
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            indices: vec![0, 1, 2, 2, 3, 0],
            uvs: Some(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
            material_ids,
            materials,
        }
    }

    fn as_i32(bytes: &[u8]) -> Vec<i32> {
        bytes
            .chunks_exact(4)
            .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn two_materials() -> Vec<LoadedMaterial> {
        vec![
            LoadedMaterial::missing_material("red"),
            LoadedMaterial::missing_material("blue"),
        ]
    }

    #[test]
    fn failed_load_is_invalid() {
        let entity = Entity::<HostBackend>::load_with(&FailingLoader, "missing.obj");
        assert!(!entity.is_valid());
        assert_eq!(entity.vertex_count(), 0);
        assert!(entity.layout_input().is_none());
        assert!(!entity.has_uv_coordinates());
        assert!(Entity::<HostBackend>::try_load_with(&FailingLoader, "missing.obj").is_err());
    }

    #[test]
    fn invalid_entity_has_no_bottom_level() {
        let backend = HostBackend::default();
        let mut entity = Entity::<HostBackend>::load_with(&FailingLoader, "missing.obj");
        assert!(matches!(
            entity.build_bottom_level(&backend, 0),
            Err(SceneError::InvalidEntity)
        ));
        assert!(entity.bottom_level().is_none());
        assert!(backend.buffers.borrow().is_empty());
    }

    #[test]
    fn sentinel_material_ids_are_dropped() {
        let entity =
            Entity::<HostBackend>::from_loaded_mesh("quad.obj", quad(Some(vec![-1, 0]), vec![]));
        assert!(!entity.has_material_ids());

        let entity = Entity::<HostBackend>::from_loaded_mesh(
            "quad.obj",
            quad(Some(vec![1, 0]), two_materials()),
        );
        assert!(entity.has_material_ids());
        assert_eq!(entity.material_ids(), Some(&[1, 0][..]));
    }

    #[test]
    fn malformed_mesh_is_invalid() {
        let mut short_uvs = quad(None, vec![]);
        short_uvs.uvs = Some(vec![[0.0, 0.0]]);
        let entity = Entity::<HostBackend>::from_loaded_mesh("quad.obj", short_uvs.clone());
        assert!(!entity.is_valid());
        assert!(entity.layout_input().is_none());
        assert!(matches!(
            Entity::<HostBackend>::try_from_loaded_mesh("quad.obj", short_uvs),
            Err(LoadError::Malformed { .. })
        ));

        let mut stray_index = quad(None, vec![]);
        stray_index.indices[5] = 99;
        assert!(!Entity::<HostBackend>::from_loaded_mesh("quad.obj", stray_index).is_valid());

        let mut wrong_ids = quad(Some(vec![0]), two_materials());
        wrong_ids.material_ids = Some(vec![0, 1, 0]);
        assert!(!Entity::<HostBackend>::from_loaded_mesh("quad.obj", wrong_ids).is_valid());
    }

    #[test]
    fn default_material_fills_empty_slots() {
        let mut entity = Entity::<HostBackend>::from_loaded_mesh("quad.obj", quad(None, vec![]));
        assert!(!entity.has_own_materials());
        assert_eq!(entity.material_slot_count(), 1);
        assert_eq!(entity.material_slots(), std::slice::from_ref(entity.default_material()));

        entity.set_default_material(Material::default().with_texture("wood.png"));
        assert!(entity.material_slots()[0].has_texture());
        assert!(entity.material_by_index(0).is_none());
    }

    #[test]
    fn material_lookup() {
        let entity =
            Entity::<HostBackend>::from_loaded_mesh("quad.obj", quad(None, two_materials()));
        assert!(entity.material_by_name("blue").is_some());
        assert!(entity.material_by_name("green").is_none());
        assert!(entity.material_by_index(1).is_some());
        assert!(entity.material_by_index(2).is_none());
        assert_eq!(entity.material_slot_count(), 2);
    }

    #[test]
    fn bottom_level_uses_position_stride() {
        let backend = HostBackend::default();
        let mut entity = Entity::<HostBackend>::from_loaded_mesh(
            "quad.obj",
            quad(Some(vec![1, 0]), two_materials()),
        );
        entity.build_bottom_level(&backend, 5).unwrap();

        assert_eq!(entity.bottom_level(), Some(&(4, 12, 6)));
        assert_eq!(entity.material_offset(), 5);

        let buffers = backend.buffers.borrow();
        let usages: Vec<_> = buffers.iter().map(|(usage, _)| *usage).collect();
        assert_eq!(
            usages,
            vec![
                BufferUsage::Vertex,
                BufferUsage::Index,
                BufferUsage::Storage,
                BufferUsage::Storage
            ]
        );
        assert_eq!(as_i32(&buffers[3].1), vec![6, 5]);
    }

    #[test]
    fn offset_sync_reuploads_material_ids() {
        let backend = HostBackend::default();
        let mut entity = Entity::<HostBackend>::from_loaded_mesh(
            "quad.obj",
            quad(Some(vec![1, 0]), two_materials()),
        );
        entity.build_bottom_level(&backend, 0).unwrap();
        let uploads = backend.buffers.borrow().len();

        entity.sync_material_offset(&backend, 0).unwrap();
        assert_eq!(backend.buffers.borrow().len(), uploads);

        entity.sync_material_offset(&backend, 3).unwrap();
        assert_eq!(backend.buffers.borrow().len(), uploads + 1);
        let resources = entity.resources().unwrap();
        assert_eq!(
            as_i32(resources.material_id_buffer.as_ref().unwrap()),
            vec![4, 3]
        );
    }
}
