use std::path::{Path, PathBuf};

/// A material as the geometry file describes it, still in Phong terms.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedMaterial {
    pub name: String,
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub shininess: f32,
    pub emission: [f32; 3],
    /// Already resolved against the directory of the geometry file.
    pub diffuse_texture: Option<PathBuf>,
    pub normal_texture: Option<PathBuf>,
}

impl LoadedMaterial {
    pub fn missing_material(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            diffuse: [0.8, 0.8, 0.8],
            specular: [0.0, 0.0, 0.0],
            shininess: 1.0,
            emission: [0.0, 0.0, 0.0],
            diffuse_texture: None,
            normal_texture: None,
        }
    }

    pub(crate) fn from_mtl(material: &tobj::Material, base_dir: &Path) -> Self {
        let fallback = Self::missing_material(material.name.clone());
        let texture_path = |texture: &Option<String>| {
            texture
                .as_deref()
                .map(str::trim)
                .filter(|texture| !texture.is_empty())
                .map(|texture| base_dir.join(texture))
        };

        Self {
            diffuse: material.diffuse.unwrap_or(fallback.diffuse),
            specular: material.specular.unwrap_or(fallback.specular),
            shininess: material.shininess.unwrap_or(fallback.shininess),
            emission: material.emissive.unwrap_or(fallback.emission),
            diffuse_texture: texture_path(&material.diffuse_texture),
            normal_texture: texture_path(&material.normal_texture).or_else(|| {
                material
                    .unknown_param
                    .get("norm")
                    .and_then(|value| texture_path(&Some(value.clone())))
            }),
            name: fallback.name,
        }
    }
}
