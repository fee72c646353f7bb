//! In-memory backend and collaborators for driving a [`Scene`] without a GPU.

#![allow(dead_code)]

use std::{
    cell::Cell,
    collections::HashMap,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
};

use raytrace_scene::{
    backend::{BufferUsage, RayTracingBackend, RayTracingInstance, TriangleGeometry},
    error::{BackendError, LoadError, TextureError},
    loader::{DecodedImage, ImageDecoder, LoadedMaterial, LoadedMesh, MeshLoader},
    scene::{Entity, Scene, SharedEntity},
};

#[derive(Debug, Clone)]
pub struct RecordedBuffer {
    pub usage: BufferUsage,
    pub bytes: Vec<u8>,
}

impl RecordedBuffer {
    pub fn decode<T: bytemuck::Pod>(&self) -> Vec<T> {
        decode(&self.bytes)
    }
}

pub fn decode<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

#[derive(Debug, Clone)]
pub struct RecordedImage {
    pub width: u32,
    pub height: u32,
    pub byte_len: usize,
}

#[derive(Debug, Clone)]
pub struct RecordedBottomLevel {
    pub id: usize,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub index_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedInstance {
    pub bottom_level: usize,
    pub transform: [[f32; 4]; 3],
    pub custom_index: u32,
    pub mask: u8,
    pub shader_binding_table_offset: u32,
    pub flags: u8,
}

#[derive(Debug, Clone)]
pub struct RecordedTopLevel {
    pub instances: Vec<RecordedInstance>,
    pub refits: usize,
}

/// Counts every call and keeps what was uploaded.
#[derive(Default)]
pub struct RecordingBackend {
    pub buffers: Cell<usize>,
    pub images: Cell<usize>,
    pub bottom_levels: Cell<usize>,
    pub top_levels: Cell<usize>,
    pub refits: Cell<usize>,
    pub fail_images: Cell<bool>,
    pub fail_buffers: Cell<bool>,
}

fn bump(counter: &Cell<usize>) -> usize {
    let value = counter.get();
    counter.set(value + 1);
    value
}

fn record(instances: &[RayTracingInstance<'_, RecordingBackend>]) -> Vec<RecordedInstance> {
    instances
        .iter()
        .map(|instance| RecordedInstance {
            bottom_level: instance.bottom_level.id,
            transform: instance.transform,
            custom_index: instance.custom_index,
            mask: instance.mask,
            shader_binding_table_offset: instance.shader_binding_table_offset,
            flags: instance.flags.bits(),
        })
        .collect()
}

impl RayTracingBackend for RecordingBackend {
    type Buffer = RecordedBuffer;
    type Image = RecordedImage;
    type BottomLevel = RecordedBottomLevel;
    type TopLevel = RecordedTopLevel;

    fn create_buffer(
        &self,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<RecordedBuffer, BackendError> {
        if self.fail_buffers.get() {
            return Err(BackendError::InvalidInput("buffer uploads disabled".into()));
        }
        bump(&self.buffers);
        Ok(RecordedBuffer {
            usage,
            bytes: data.to_vec(),
        })
    }

    fn create_image_rgba8(
        &self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<RecordedImage, BackendError> {
        if self.fail_images.get() {
            return Err(BackendError::InvalidInput("image uploads disabled".into()));
        }
        bump(&self.images);
        Ok(RecordedImage {
            width,
            height,
            byte_len: pixels.len(),
        })
    }

    fn create_bottom_level(
        &self,
        geometry: TriangleGeometry<'_, Self>,
    ) -> Result<RecordedBottomLevel, BackendError> {
        Ok(RecordedBottomLevel {
            id: bump(&self.bottom_levels),
            vertex_count: geometry.vertex_count,
            vertex_stride: geometry.vertex_stride,
            index_count: geometry.index_count,
        })
    }

    fn create_top_level(
        &self,
        instances: &[RayTracingInstance<'_, Self>],
    ) -> Result<RecordedTopLevel, BackendError> {
        bump(&self.top_levels);
        Ok(RecordedTopLevel {
            instances: record(instances),
            refits: 0,
        })
    }

    fn update_top_level(
        &self,
        top_level: &mut RecordedTopLevel,
        instances: &[RayTracingInstance<'_, Self>],
    ) -> Result<(), BackendError> {
        assert_eq!(top_level.instances.len(), instances.len());
        bump(&self.refits);
        top_level.instances = record(instances);
        top_level.refits += 1;
        Ok(())
    }
}

/// Decodes every path listed in `images` to a solid image, fails for the rest.
#[derive(Clone, Default)]
pub struct FakeDecoder {
    pub images: HashMap<PathBuf, (u32, u32, u8)>,
    pub calls: Rc<Cell<usize>>,
}

impl FakeDecoder {
    pub fn with_image(
        mut self,
        path: impl Into<PathBuf>,
        width: u32,
        height: u32,
        channels: u8,
    ) -> Self {
        self.images.insert(path.into(), (width, height, channels));
        self
    }
}

impl ImageDecoder for FakeDecoder {
    fn decode_rgba8(&self, path: &Path) -> Result<DecodedImage, TextureError> {
        bump(&self.calls);
        let &(width, height, source_channels) = self.images.get(path).ok_or_else(|| {
            TextureError::Decode {
                path: path.to_path_buf(),
                source: image::ImageError::IoError(std::io::ErrorKind::NotFound.into()),
            }
        })?;
        Ok(DecodedImage {
            width,
            height,
            source_channels,
            rgba8: vec![255; (width * height * 4) as usize],
        })
    }
}

/// Serves meshes from memory, anything else is not found.
#[derive(Default)]
pub struct MemoryLoader {
    pub meshes: HashMap<PathBuf, LoadedMesh>,
}

impl MeshLoader for MemoryLoader {
    fn load(&self, path: &Path) -> Result<LoadedMesh, LoadError> {
        self.meshes
            .get(path)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(path.to_path_buf()))
    }
}

/// A mesh of `triangles` separate triangles, 3 vertices each.
pub fn triangle_soup(triangles: usize) -> LoadedMesh {
    let positions = (0..triangles * 3)
        .map(|i| [i as f32, (i % 3) as f32, 0.0])
        .collect();
    LoadedMesh {
        positions,
        indices: (0..(triangles * 3) as u32).collect(),
        ..Default::default()
    }
}

pub fn with_uvs(mut mesh: LoadedMesh) -> LoadedMesh {
    mesh.uvs = Some(
        (0..mesh.positions.len())
            .map(|i| [i as f32 * 0.1, 0.5])
            .collect(),
    );
    mesh
}

pub fn with_materials(mut mesh: LoadedMesh, names: &[&str]) -> LoadedMesh {
    mesh.materials = names
        .iter()
        .enumerate()
        .map(|(i, name)| LoadedMaterial {
            diffuse: [i as f32 / 10.0, 0.0, 0.0],
            ..LoadedMaterial::missing_material(*name)
        })
        .collect();
    mesh
}

pub fn with_material_ids(mut mesh: LoadedMesh, ids: Vec<i32>) -> LoadedMesh {
    mesh.material_ids = Some(ids);
    mesh
}

pub fn shared(name: &str, mesh: LoadedMesh) -> SharedEntity<RecordingBackend> {
    Entity::from_loaded_mesh(name, mesh).into_shared()
}

pub fn new_scene() -> (Arc<RecordingBackend>, Scene<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::default());
    let scene = Scene::with_decoder(backend.clone(), FakeDecoder::default());
    (backend, scene)
}

pub fn new_scene_with_decoder(
    decoder: FakeDecoder,
) -> (Arc<RecordingBackend>, Scene<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::default());
    let scene = Scene::with_decoder(backend.clone(), decoder);
    (backend, scene)
}
