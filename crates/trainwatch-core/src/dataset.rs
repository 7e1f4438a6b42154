//! YAML data config and split resolution.
//!
//! Split entries resolve against the config's `path` field; a relative `path`
//! resolves against the directory holding the config file.

use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }
}

/// A split given either as one entry or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SplitSpec {
    One(String),
    Many(Vec<String>),
}

impl SplitSpec {
    fn entries(&self) -> Vec<&str> {
        match self {
            Self::One(s) => vec![s.as_str()],
            Self::Many(list) => list.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub train: Option<SplitSpec>,
    #[serde(default)]
    pub val: Option<SplitSpec>,
    #[serde(default)]
    pub test: Option<SplitSpec>,
    #[serde(default)]
    pub names: Option<serde_yaml::Value>,
    #[serde(default)]
    pub kpt_shape: Option<Vec<u32>>,
    #[serde(skip)]
    source: PathBuf,
}

impl DataConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yaml::from_str(&content)?;
        config.source = path.to_path_buf();
        Ok(config)
    }

    /// Directory split entries resolve against, if `path` is set.
    #[must_use]
    pub fn base_dir(&self) -> Option<PathBuf> {
        let path = self.path.as_deref().map(str::trim).filter(|p| !p.is_empty())?;
        let path = Path::new(path);
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        let parent = self.source.parent().unwrap_or_else(|| Path::new("."));
        Some(parent.join(path))
    }

    #[must_use]
    pub fn split(&self, split: Split) -> Option<&SplitSpec> {
        match split {
            Split::Train => self.train.as_ref(),
            Split::Val => self.val.as_ref(),
            Split::Test => self.test.as_ref(),
        }
    }

    /// Resolved paths of a split; empty when the split or base is not configured.
    #[must_use]
    pub fn split_paths(&self, split: Split) -> Vec<PathBuf> {
        let (Some(base), Some(spec)) = (self.base_dir(), self.split(split)) else {
            return Vec::new();
        };
        spec.entries()
            .into_iter()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| base.join(e))
            .collect()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Images under a split path, sorted.
///
/// A directory is walked recursively; a `.txt` file is read as a list of
/// image paths, relative entries resolving against the file's directory.
#[must_use]
pub fn list_images(path: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = if path.is_dir() {
        WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file() && is_image(entry.path()))
            .map(walkdir::DirEntry::into_path)
            .collect()
    } else if path.extension().is_some_and(|e| e == "txt") {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::read_to_string(path)
            .map(|content| {
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(|line| parent.join(line))
                    .filter(|p| is_image(p))
                    .collect()
            })
            .unwrap_or_default()
    } else if path.is_file() && is_image(path) {
        vec![path.to_path_buf()]
    } else {
        Vec::new()
    };
    images.sort();
    images
}
