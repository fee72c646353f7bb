use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// A mesh file could not be turned into geometry. The entity stays invalid.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("mesh file not found: {0}")]
    NotFound(PathBuf),

    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("{0} contains no triangles")]
    Empty(PathBuf),

    #[error("malformed mesh {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// An image could not be decoded. Callers fall back to the tint colour.
#[derive(Error, Debug)]
pub enum TextureError {
    #[error("could not decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("gpu allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("could not load the vulkan library: {0}")]
    Loading(String),

    #[error("no physical device supports hardware ray tracing")]
    NoSuitableDevice,

    #[error("{0}")]
    InvalidInput(String),
}

#[derive(Error, Debug)]
pub enum SceneError {
    #[error("cannot add an entity whose mesh failed to load")]
    InvalidEntity,

    #[error("entity {0} is already part of this scene")]
    DuplicateEntity(PathBuf),

    #[error("entities changed since the last aggregation, rebuild the acceleration structures first")]
    StaleAggregation,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
