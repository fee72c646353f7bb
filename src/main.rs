use std::sync::Arc;

use env_logger::Env;
use raytrace_scene::{
    config_loader::{Config, ConfigFileLoader},
    scene::{Entity, PointLight, Scene},
    vulkan::VulkanBackend,
};
use ultraviolet::{Mat4, Rotor3};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "scene.json".to_string());
    let mut config_loader = ConfigFileLoader::new(config_path);
    let config = config_loader.load_config()?.clone();

    let backend = Arc::new(VulkanBackend::new()?);
    let mut scene = Scene::new(backend);
    add_entities(&mut scene, &config);
    for light in &config.point_lights {
        scene.add_point_light(PointLight::from(light));
    }

    scene.build_acceleration_structures()?;
    animate(&mut scene, config.animation_frames)?;

    log::info!(
        "Scene ready: {} of {} entities, {} materials, {} textures, {} normal maps, {} lights",
        scene.entity_count(),
        config.entities.len(),
        scene.layout().map_or(0, |layout| layout.material_count()),
        scene.texture_count(),
        scene.normal_count(),
        scene.point_lights().len()
    );
    if let Some(layout) = scene.layout() {
        for (index, metadata) in layout.instance_metadata.iter().enumerate() {
            log::debug!("Instance {index}: {metadata:?}");
        }
    }

    Ok(())
}

fn add_entities(scene: &mut Scene<VulkanBackend>, config: &Config) {
    for entity_config in &config.entities {
        let mut entity = Entity::load(config.entity_path(entity_config));
        entity.set_transform(entity_config.transform());
        if let Some(material) = &entity_config.material {
            entity.set_default_material(material.to_material(&config.asset_root));
        }

        if let Err(err) = scene.add_entity(&entity.into_shared()) {
            log::warn!("Skipping {}: {err}", entity_config.path.display());
        }
    }
}

/// Spins every entity around the y axis, one refit per frame.
fn animate(scene: &mut Scene<VulkanBackend>, frames: u32) -> anyhow::Result<()> {
    if frames == 0 {
        return Ok(());
    }

    let base_transforms: Vec<Mat4> = scene
        .entities()
        .iter()
        .map(|entity| entity.read().transform())
        .collect();

    for frame in 1..=frames {
        let angle = std::f32::consts::TAU * frame as f32 / frames as f32;
        let spin = Rotor3::from_rotation_xz(angle).into_matrix().into_homogeneous();
        for (entity, base) in scene.entities().iter().zip(&base_transforms) {
            entity.write().set_transform(*base * spin);
        }
        scene.update_instances()?;
    }
    log::info!("Refitted the top-level structure for {frames} frames");

    Ok(())
}
