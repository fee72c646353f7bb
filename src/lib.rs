pub mod backend;
pub mod config_loader;
pub mod error;
pub mod loader;
pub mod scene;
pub mod shader_types;
pub mod transform;
pub mod utility;
pub mod vulkan;

pub use backend::RayTracingBackend;
pub use error::{BackendError, ConfigError, LoadError, SceneError, TextureError};
pub use scene::{Entity, Material, PointLight, Scene, SharedEntity};
