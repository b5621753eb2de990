use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::errors::LectureMaterialsError;

/// Opaque identity of a lecture material.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(String);

impl MaterialId {
    pub fn new(id: impl Into<String>) -> Self {
        MaterialId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name used for this id on disk. Hex keeps arbitrary ids path-safe.
    pub fn file_name(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    pub fn from_file_name(name: &str) -> Result<Self, LectureMaterialsError> {
        let bytes = hex::decode(name)
            .map_err(|_| LectureMaterialsError::InvalidMaterialId(name.to_string()))?;
        String::from_utf8(bytes)
            .map(MaterialId)
            .map_err(|_| LectureMaterialsError::InvalidMaterialId(name.to_string()))
    }
}

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MaterialId({})", self.0)
    }
}

impl From<&str> for MaterialId {
    fn from(id: &str) -> Self {
        MaterialId::new(id)
    }
}

/// A downloadable resource attached to a talk (slides, handouts).
#[derive(Clone)]
pub struct LectureMaterial {
    pub id: MaterialId,
    pub name: String,
    /// Where the downloader fetches the bytes from.
    pub link: String,
}

impl LectureMaterial {
    pub fn new(id: impl Into<MaterialId>, name: impl Into<String>, link: impl Into<String>) -> Self {
        LectureMaterial {
            id: id.into(),
            name: name.into(),
            link: link.into(),
        }
    }
}

impl PartialEq for LectureMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for LectureMaterial {}

impl Hash for LectureMaterial {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for LectureMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LectureMaterial")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Downloaded content of a material as it sits in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedContent {
    pub id: MaterialId,
    pub path: PathBuf,
    pub size: u64,
}

impl CachedContent {
    pub async fn read(&self) -> Result<Vec<u8>, LectureMaterialsError> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

/// Bytes received so far for one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub received: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some(self.received as f64 / total as f64),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_survives_path_separators() {
        let id = MaterialId::new("talks/2015/keynote.pdf");
        let name = id.file_name();
        assert!(!name.contains('/'));
        assert_eq!(MaterialId::from_file_name(&name).unwrap(), id);
    }

    #[test]
    fn rejects_foreign_file_names() {
        assert!(matches!(
            MaterialId::from_file_name("notes.txt"),
            Err(LectureMaterialsError::InvalidMaterialId(_))
        ));
    }

    #[test]
    fn materials_compare_by_id() {
        let a = LectureMaterial::new("42", "Slides", "https://example.org/a.pdf");
        let b = LectureMaterial::new("42", "Slides (v2)", "https://example.org/b.pdf");
        assert_eq!(a, b);
    }

    #[test]
    fn progress_fraction() {
        let p = DownloadProgress { received: 25, total: Some(100) };
        assert_eq!(p.fraction(), Some(0.25));
        assert_eq!(DownloadProgress { received: 3, total: None }.fraction(), None);
    }
}
