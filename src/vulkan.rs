pub mod acceleration_structure;
pub mod backend;
pub mod buffer;
pub mod command_pool;
pub mod context;
pub mod image;

pub use backend::VulkanBackend;
