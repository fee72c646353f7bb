use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::info;
use serde::{Deserialize, Serialize};
use ultraviolet::Vec3;

use crate::{
    error::ConfigError,
    scene::{Material, PointLight},
    transform::Transform,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Entity paths are relative to this directory.
    pub asset_root: PathBuf,
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub point_lights: Vec<PointLightConfig>,
    /// How many frames of instance refits to run after the scene is built.
    #[serde(default)]
    pub animation_frames: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            asset_root: "assets".into(),
            entities: vec![EntityConfig::new("models/cube.obj")],
            point_lights: vec![PointLightConfig {
                position: [0.0, 5.0, 0.0],
                color: [1.0, 1.0, 1.0],
            }],
            animation_frames: 0,
        }
    }
}

impl FromStr for Config {
    type Err = serde_json::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(value)
    }
}

impl Config {
    pub fn entity_path(&self, entity: &EntityConfig) -> PathBuf {
        self.asset_root.join(&entity.path)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EntityConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub position: [f32; 3],
    /// Quaternion in `[x, y, z, w]` order.
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
    #[serde(default = "unit_scale")]
    pub scale: [f32; 3],
    /// Replaces the default material of meshes without their own materials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<MaterialConfig>,
}

impl EntityConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            position: [0.0; 3],
            rotation: identity_rotation(),
            scale: unit_scale(),
            material: None,
        }
    }

    pub fn transform(&self) -> Transform {
        Transform::from_arrays(self.position, self.rotation, self.scale)
    }
}

fn identity_rotation() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

fn unit_scale() -> [f32; 3] {
    [1.0; 3]
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MaterialConfig {
    pub base_color: [f32; 3],
    #[serde(default = "default_roughness")]
    pub roughness: f32,
    #[serde(default)]
    pub metallic: f32,
    #[serde(default)]
    pub emission: [f32; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_map: Option<PathBuf>,
}

fn default_roughness() -> f32 {
    0.5
}

impl MaterialConfig {
    /// Texture paths are resolved against `asset_root`.
    pub fn to_material(&self, asset_root: &Path) -> Material {
        let mut material = Material::new(
            Vec3::from(self.base_color),
            self.roughness.clamp(0.0, 1.0),
            self.metallic.clamp(0.0, 1.0),
            Vec3::from(self.emission),
        );
        if let Some(texture) = &self.texture {
            material = material.with_texture(asset_root.join(texture));
        }
        if let Some(normal_map) = &self.normal_map {
            material = material.with_normal_map(asset_root.join(normal_map));
        }
        material
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PointLightConfig {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl From<&PointLightConfig> for PointLight {
    fn from(light: &PointLightConfig) -> Self {
        PointLight::new(Vec3::from(light.position), Vec3::from(light.color))
    }
}

pub struct ConfigFileLoader {
    pub path: PathBuf,
    config: Option<Config>,
}

impl ConfigFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    /// Reads the config file. A missing file is replaced by the default config.
    pub fn load_config(&mut self) -> Result<&mut Config, ConfigError> {
        let config = match std::fs::read_to_string(&self.path) {
            Ok(content) => content.parse::<Config>().map_err(|source| ConfigError::Json {
                path: self.path.clone(),
                source,
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("No config at {}, writing the default one", self.path.display());
                self.config = Some(Config::default());
                self.save_config()?;
                Config::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(self.config.insert(config))
    }

    pub fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(config) = &self.config {
            let content = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Json {
                path: self.path.clone(),
                source,
            })?;
            std::fs::write(&self.path, content).map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
