use std::path::{Path, PathBuf};

use log::{info, warn};

use super::LoadedMaterial;
use crate::error::LoadError;

/// Geometry of one entity, straight out of the loader. Indices are local to
/// `positions`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadedMesh {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    /// One UV per position.
    pub uvs: Option<Vec<[f32; 2]>>,
    /// One entry per triangle, indexing `materials`. A `-1` in the first slot
    /// means the file carried no usable per-triangle assignment.
    pub material_ids: Option<Vec<i32>>,
    pub materials: Vec<LoadedMaterial>,
}

impl LoadedMesh {
    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }

    /// Checks the cross-array invariants every consumer relies on.
    pub fn validate(&self, path: &Path) -> Result<(), LoadError> {
        let malformed = |reason: String| LoadError::Malformed {
            path: path.to_path_buf(),
            reason,
        };

        if self.indices.is_empty() {
            return Err(LoadError::Empty(path.to_path_buf()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(malformed(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        let vertex_count = self.positions.len();
        if let Some(index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(malformed(format!(
                "index {index} out of range for {vertex_count} vertices"
            )));
        }
        if let Some(uvs) = &self.uvs {
            if uvs.len() != vertex_count {
                return Err(malformed(format!(
                    "{} uvs for {vertex_count} vertices",
                    uvs.len()
                )));
            }
        }
        if let Some(material_ids) = &self.material_ids {
            if material_ids.len() != self.num_triangles() {
                return Err(malformed(format!(
                    "{} material ids for {} triangles",
                    material_ids.len(),
                    self.num_triangles()
                )));
            }
        }
        Ok(())
    }
}

pub trait MeshLoader {
    fn load(&self, path: &Path) -> Result<LoadedMesh, LoadError>;
}

/// Wavefront OBJ loader with optional MTL companion.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjLoader;

impl MeshLoader for ObjLoader {
    fn load(&self, path: &Path) -> Result<LoadedMesh, LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        let load_options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        };
        let (models, materials) =
            tobj::load_obj(path, &load_options).map_err(|source| LoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let base_dir: PathBuf = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let materials = match materials {
            Ok(materials) if materials.is_empty() => {
                info!("No MTL materials for {}", path.display());
                vec![]
            }
            Ok(materials) => materials
                .iter()
                .map(|material| LoadedMaterial::from_mtl(material, &base_dir))
                .collect(),
            Err(err) => {
                warn!("Ignoring MTL file of {}: {}", path.display(), err);
                vec![]
            }
        };

        // Merging is only meaningful if every model brings a full UV set
        let has_uvs = !models.is_empty()
            && models.iter().all(|model| {
                let mesh = &model.mesh;
                !mesh.texcoords.is_empty() && mesh.texcoords.len() / 2 == mesh.positions.len() / 3
            });

        let mut mesh = LoadedMesh {
            materials,
            ..Default::default()
        };
        let mut uvs = vec![];
        let mut material_ids = vec![];
        for model in &models {
            let model_mesh = &model.mesh;
            let first_vertex = mesh.positions.len() as u32;

            mesh.positions.extend(
                model_mesh
                    .positions
                    .chunks_exact(3)
                    .map(|p| [p[0], p[1], p[2]]),
            );
            if has_uvs {
                uvs.extend(model_mesh.texcoords.chunks_exact(2).map(|t| [t[0], t[1]]));
            }
            mesh.indices
                .extend(model_mesh.indices.iter().map(|index| index + first_vertex));

            let material_id = model_mesh.material_id.map_or(-1, |id| id as i32);
            material_ids.extend(std::iter::repeat(material_id).take(model_mesh.indices.len() / 3));
        }

        if has_uvs {
            mesh.uvs = Some(uvs);
        }
        if !mesh.materials.is_empty() {
            mesh.material_ids = Some(material_ids);
        }

        mesh.validate(path)?;
        Ok(mesh)
    }
}
