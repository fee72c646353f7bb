use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use log::{debug, error, info};

use super::NO_TEXTURE;
use crate::{
    backend::RayTracingBackend,
    loader::{ImageCrateDecoder, ImageDecoder},
};

pub struct CachedTexture<B: RayTracingBackend> {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub image: B::Image,
}

/// Images in order of first load, the position is the shader-visible index.
struct TextureTable<B: RayTracingBackend> {
    kind: &'static str,
    entries: Vec<CachedTexture<B>>,
    by_path: HashMap<PathBuf, usize>,
}

impl<B: RayTracingBackend> TextureTable<B> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: vec![],
            by_path: HashMap::new(),
        }
    }

    fn load(&mut self, backend: &B, decoder: &dyn ImageDecoder, path: &Path) -> i32 {
        if let Some(&index) = self.by_path.get(path) {
            return index as i32;
        }

        let decoded = match decoder.decode_rgba8(path) {
            Ok(decoded) => decoded,
            Err(err) => {
                error!("Failed to load {}: {err}", self.kind);
                return NO_TEXTURE;
            }
        };
        if decoded.source_channels != 4 {
            debug!(
                "Expanding {} from {} to 4 channels",
                path.display(),
                decoded.source_channels
            );
        }

        let uploaded = backend.create_image_rgba8(decoded.width, decoded.height, &decoded.rgba8);
        let image = match uploaded {
            Ok(image) => image,
            Err(err) => {
                error!("Failed to upload {} {}: {err}", self.kind, path.display());
                return NO_TEXTURE;
            }
        };

        let index = self.entries.len();
        self.entries.push(CachedTexture {
            path: path.to_path_buf(),
            width: decoded.width,
            height: decoded.height,
            image,
        });
        self.by_path.insert(path.to_path_buf(), index);
        info!(
            "Loaded {} {} ({}x{}) as index {index}",
            self.kind,
            path.display(),
            decoded.width,
            decoded.height
        );
        index as i32
    }

    fn get(&self, index: i32) -> Option<&CachedTexture<B>> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.entries.get(index))
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.by_path.clear();
    }
}

/// Deduplicates image loads by path. Colour textures and normal maps live in
/// separate index spaces.
pub struct TextureCache<B: RayTracingBackend> {
    decoder: Box<dyn ImageDecoder>,
    textures: TextureTable<B>,
    normals: TextureTable<B>,
}

impl<B: RayTracingBackend> Default for TextureCache<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RayTracingBackend> TextureCache<B> {
    pub fn new() -> Self {
        Self::with_decoder(ImageCrateDecoder)
    }

    pub fn with_decoder(decoder: impl ImageDecoder + 'static) -> Self {
        Self {
            decoder: Box::new(decoder),
            textures: TextureTable::new("texture"),
            normals: TextureTable::new("normal map"),
        }
    }

    /// Index of the colour texture at `path`, or [`NO_TEXTURE`] if it can't be
    /// decoded or uploaded. Failures are not cached.
    pub fn load_texture(&mut self, backend: &B, path: impl AsRef<Path>) -> i32 {
        self.textures.load(backend, self.decoder.as_ref(), path.as_ref())
    }

    pub fn load_normal(&mut self, backend: &B, path: impl AsRef<Path>) -> i32 {
        self.normals.load(backend, self.decoder.as_ref(), path.as_ref())
    }

    pub fn texture(&self, index: i32) -> Option<&CachedTexture<B>> {
        self.textures.get(index)
    }

    pub fn normal(&self, index: i32) -> Option<&CachedTexture<B>> {
        self.normals.get(index)
    }

    pub fn textures(&self) -> &[CachedTexture<B>] {
        &self.textures.entries
    }

    pub fn normals(&self) -> &[CachedTexture<B>] {
        &self.normals.entries
    }

    pub fn texture_count(&self) -> usize {
        self.textures.entries.len()
    }

    pub fn normal_count(&self) -> usize {
        self.normals.entries.len()
    }

    pub fn clear(&mut self) {
        self.textures.clear();
        self.normals.clear();
    }
}
