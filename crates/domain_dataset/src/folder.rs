//! Class-per-subdirectory image folders.

use crate::aug::TransformPipeline;
use crate::types::{DatasetError, DatasetResult, DomainDataset, LabeledImage};
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// `root/<class>/<image>` layout; class indices follow sorted directory names.
/// Images placed directly under `root` are accepted as class 0 when no class
/// directories exist.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    classes: Vec<String>,
    entries: Vec<(PathBuf, usize)>,
    pipeline: TransformPipeline,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn sorted_children(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let read = fs::read_dir(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut children = Vec::new();
    for entry in read {
        let entry = entry.map_err(|source| DatasetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        children.push(entry.path());
    }
    children.sort();
    Ok(children)
}

impl ImageFolder {
    pub fn open(root: impl AsRef<Path>, pipeline: TransformPipeline) -> DatasetResult<Self> {
        let root = root.as_ref().to_path_buf();
        let children = sorted_children(&root)?;
        let class_dirs: Vec<&PathBuf> = children.iter().filter(|p| p.is_dir()).collect();

        let mut classes = Vec::new();
        let mut entries = Vec::new();
        if class_dirs.is_empty() {
            classes.push(String::from("default"));
            entries.extend(
                children
                    .iter()
                    .filter(|p| p.is_file() && is_image(p))
                    .map(|p| (p.clone(), 0)),
            );
        } else {
            for dir in class_dirs {
                let label = classes.len();
                classes.push(
                    dir.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                );
                entries.extend(
                    sorted_children(dir)?
                        .into_iter()
                        .filter(|p| p.is_file() && is_image(p))
                        .map(|p| (p, label)),
                );
            }
        }
        if entries.is_empty() {
            return Err(DatasetError::Empty { path: root });
        }
        tracing::debug!(
            root = %root.display(),
            classes = classes.len(),
            images = entries.len(),
            "indexed image folder"
        );
        Ok(Self {
            root,
            classes,
            entries,
            pipeline,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

}

impl DomainDataset for ImageFolder {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, index: usize, rng: &mut dyn rand::RngCore) -> DatasetResult<LabeledImage> {
        let (path, label) = self.entries.get(index).ok_or(DatasetError::OutOfRange {
            index,
            len: self.entries.len(),
        })?;
        let img = image::open(path).map_err(|source| DatasetError::Image {
            path: path.clone(),
            source,
        })?;
        self.pipeline.apply(img, *label, rng)
    }
}
