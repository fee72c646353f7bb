use std::path::{Path, PathBuf};

use ultraviolet::Vec3;

use crate::{loader::LoadedMaterial, shader_types::GpuMaterial};

/// Index value meaning "no texture bound", shaders use the tint colour only.
pub const NO_TEXTURE: i32 = -1;

/// `base_color` tints the texture when one is bound and is the surface colour
/// otherwise.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub base_color: Vec3,
    pub roughness: f32,
    pub metallic: f32,
    pub emission: Vec3,
    /// Resolved from `texture_path` during aggregation.
    pub texture_index: i32,
    /// Resolved from `normal_path` during aggregation.
    pub normal_index: i32,
    pub texture_path: Option<PathBuf>,
    pub normal_path: Option<PathBuf>,
}

impl Default for Material {
    fn default() -> Self {
        Self::new(Vec3::new(0.8, 0.8, 0.8), 0.5, 0.0, Vec3::zero())
    }
}

impl Material {
    pub fn new(base_color: Vec3, roughness: f32, metallic: f32, emission: Vec3) -> Self {
        Self {
            base_color,
            roughness,
            metallic,
            emission,
            texture_index: NO_TEXTURE,
            normal_index: NO_TEXTURE,
            texture_path: None,
            normal_path: None,
        }
    }

    /// Approximates a physically based material from Phong parameters: high
    /// shininess gives low roughness, bright specular gives high metallic.
    pub fn from_phong(loaded: &LoadedMaterial) -> Self {
        let roughness = 1.0 - (loaded.shininess / 1000.0).clamp(0.0, 1.0);
        let [sr, sg, sb] = loaded.specular;
        let metallic = ((sr + sg + sb) / 3.0).clamp(0.0, 1.0);

        Self {
            texture_path: loaded.diffuse_texture.clone(),
            normal_path: loaded.normal_texture.clone(),
            ..Self::new(
                Vec3::from(loaded.diffuse),
                roughness,
                metallic,
                Vec3::from(loaded.emission),
            )
        }
    }

    pub fn with_texture(mut self, path: impl AsRef<Path>) -> Self {
        self.texture_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_normal_map(mut self, path: impl AsRef<Path>) -> Self {
        self.normal_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn has_texture(&self) -> bool {
        self.texture_path.is_some()
    }

    pub fn has_normal_map(&self) -> bool {
        self.normal_path.is_some()
    }

    pub fn clear_textures(&mut self) {
        self.texture_path = None;
        self.normal_path = None;
        self.texture_index = NO_TEXTURE;
        self.normal_index = NO_TEXTURE;
    }

    pub fn to_gpu(&self) -> GpuMaterial {
        GpuMaterial {
            base_color: self.base_color.into(),
            roughness: self.roughness,
            metallic: self.metallic,
            texture_index: self.texture_index,
            normal_index: self.normal_index,
            emission: self.emission.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }
}

impl Default for PointLight {
    fn default() -> Self {
        Self::new(Vec3::zero(), Vec3::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phong(shininess: f32, specular: [f32; 3]) -> LoadedMaterial {
        LoadedMaterial {
            shininess,
            specular,
            ..LoadedMaterial::missing_material("test")
        }
    }

    #[test]
    fn default_is_untextured_grey() {
        let material = Material::default();
        assert_eq!(material.base_color, Vec3::new(0.8, 0.8, 0.8));
        assert_eq!(material.roughness, 0.5);
        assert_eq!(material.metallic, 0.0);
        assert_eq!(material.texture_index, NO_TEXTURE);
        assert_eq!(material.normal_index, NO_TEXTURE);
        assert!(!material.has_texture());
    }

    #[test]
    fn phong_conversion() {
        let material = Material::from_phong(&phong(250.0, [0.3, 0.6, 0.9]));
        assert!((material.roughness - 0.75).abs() < 1e-6);
        assert!((material.metallic - 0.6).abs() < 1e-6);
    }

    #[test]
    fn phong_conversion_clamps() {
        let shiny = Material::from_phong(&phong(5000.0, [2.0, 2.0, 2.0]));
        assert_eq!(shiny.roughness, 0.0);
        assert_eq!(shiny.metallic, 1.0);

        let dull = Material::from_phong(&phong(-10.0, [0.0, 0.0, 0.0]));
        assert_eq!(dull.roughness, 1.0);
        assert_eq!(dull.metallic, 0.0);
    }

    #[test]
    fn phong_keeps_texture_paths() {
        let loaded = LoadedMaterial {
            diffuse_texture: Some("a/diffuse.png".into()),
            normal_texture: Some("a/normal.png".into()),
            ..LoadedMaterial::missing_material("textured")
        };
        let material = Material::from_phong(&loaded);
        assert_eq!(material.texture_path, Some(PathBuf::from("a/diffuse.png")));
        assert_eq!(material.normal_path, Some(PathBuf::from("a/normal.png")));
        assert_eq!(material.texture_index, NO_TEXTURE);
    }

    #[test]
    fn clear_textures_resets_indices() {
        let mut material = Material::default().with_texture("t.png").with_normal_map("n.png");
        material.texture_index = 3;
        material.normal_index = 4;
        material.clear_textures();
        assert!(!material.has_texture());
        assert!(!material.has_normal_map());
        assert_eq!(material.texture_index, NO_TEXTURE);
        assert_eq!(material.normal_index, NO_TEXTURE);
    }

    #[test]
    fn gpu_record_carries_indices() {
        let mut material = Material::new(
            Vec3::new(1.0, 0.5, 0.25),
            0.2,
            0.7,
            Vec3::new(3.0, 3.0, 3.0),
        );
        material.texture_index = 2;
        let gpu = material.to_gpu();
        assert_eq!(gpu.base_color, [1.0, 0.5, 0.25]);
        assert_eq!(gpu.texture_index, 2);
        assert_eq!(gpu.normal_index, NO_TEXTURE);
        assert_eq!(gpu.emission, [3.0, 3.0, 3.0]);
    }
}
