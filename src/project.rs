//! Project documents and the stores that keep them.
//!
//! A [`ProjectDocument`] is the serializable form of an arrangement: row
//! and clip parameters, buffer references and the master equalizer. Audio
//! samples are not part of the document; clips refer to buffers by id.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferId, BufferInfo, BufferStore};
use crate::dsp::effects::EffectState;
use crate::dsp::equalizer::MasterEqualizer;
use crate::error::{InvalidOperation, StoreError};
use crate::timeline::{Clip, ClipId, ClipSource, Row, RowId, Timeline};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipDocument {
    pub id: ClipId,
    pub buffer: BufferId,
    pub start: f64,
    pub gain: f32,
    pub effects: EffectState,
    pub source: ClipSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDocument {
    pub id: RowId,
    pub gain: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub soloed: bool,
    pub clips: Vec<ClipDocument>,
}

/// Serializable snapshot of a whole project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDocument {
    pub label: String,
    /// Owner or lab space the project belongs to.
    pub namespace: String,
    pub sample_rate: u32,
    pub channels: usize,
    pub rows: Vec<RowDocument>,
    #[serde(default)]
    pub equalizer: MasterEqualizer,
    #[serde(default)]
    pub buffers: Vec<BufferInfo>,
}

impl ProjectDocument {
    /// Capture the arrangement as it is now.
    pub fn capture(
        label: impl Into<String>,
        namespace: impl Into<String>,
        timeline: &Timeline,
        equalizer: &MasterEqualizer,
        store: &BufferStore,
        sample_rate: u32,
        channels: usize,
    ) -> Self {
        let rows: Vec<RowDocument> = timeline
            .rows()
            .iter()
            .map(|row| RowDocument {
                id: row.id,
                gain: row.gain,
                muted: row.muted,
                soloed: row.soloed,
                clips: row
                    .clips()
                    .iter()
                    .map(|c| ClipDocument {
                        id: c.id,
                        buffer: c.buffer.id(),
                        start: c.start,
                        gain: c.gain,
                        effects: c.effects,
                        source: c.source.clone(),
                    })
                    .collect(),
            })
            .collect();

        let mut document = ProjectDocument {
            label: label.into(),
            namespace: namespace.into(),
            sample_rate,
            channels,
            rows,
            equalizer: equalizer.clone(),
            buffers: Vec::new(),
        };
        document.buffers = document
            .buffer_ids()
            .into_iter()
            .filter_map(|id| store.info(id))
            .collect();
        document
    }

    /// Every buffer a clip refers to.
    pub fn buffer_ids(&self) -> BTreeSet<BufferId> {
        self.rows
            .iter()
            .flat_map(|r| r.clips.iter())
            .map(|c| c.buffer)
            .collect()
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let mut document: ProjectDocument = serde_json::from_str(json)?;
        document.equalizer.sanitize();
        Ok(document)
    }

    /// Rebuild timeline rows, resolving buffers in `store`.
    pub fn to_rows(&self, store: &BufferStore) -> Result<Vec<Row>, InvalidOperation> {
        self.rows
            .iter()
            .map(|row| {
                let clips = row
                    .clips
                    .iter()
                    .map(|c| {
                        let buffer = store.get(c.buffer).ok_or(InvalidOperation::BufferNotFound(c.buffer))?;
                        Ok(Clip {
                            id: c.id,
                            buffer,
                            start: c.start.max(0.0),
                            gain: c.gain,
                            effects: c.effects,
                            selected: false,
                            source: c.source.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, InvalidOperation>>()?;
                Ok(Row::from_parts(row.id, row.gain, row.muted, row.soloed, clips))
            })
            .collect()
    }
}

/// Durable home for project documents.
pub trait ProjectStore {
    fn save(&mut self, document: &ProjectDocument) -> Result<(), StoreError>;
    fn load(&self, namespace: &str, label: &str) -> Result<ProjectDocument, StoreError>;
    /// Labels in `namespace`, sorted.
    fn list(&self, namespace: &str) -> Result<Vec<String>, StoreError>;
    fn delete(&mut self, namespace: &str, label: &str) -> Result<(), StoreError>;
}

/// Store that keeps serialized documents in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: BTreeMap<(String, String), String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectStore for MemoryStore {
    fn save(&mut self, document: &ProjectDocument) -> Result<(), StoreError> {
        let json = document.to_json()?;
        self.documents
            .insert((document.namespace.clone(), document.label.clone()), json);
        Ok(())
    }

    fn load(&self, namespace: &str, label: &str) -> Result<ProjectDocument, StoreError> {
        let json = self
            .documents
            .get(&(namespace.to_string(), label.to_string()))
            .ok_or_else(|| StoreError::NotFound(label.to_string()))?;
        ProjectDocument::from_json(json)
    }

    fn list(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .documents
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, label)| label.clone())
            .collect())
    }

    fn delete(&mut self, namespace: &str, label: &str) -> Result<(), StoreError> {
        self.documents
            .remove(&(namespace.to_string(), label.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(label.to_string()))
    }
}

#[cfg(feature = "library")]
pub use local::LocalProjectStore;

#[cfg(feature = "library")]
mod local {
    use std::fs;
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};

    use directories::ProjectDirs;
    use sha2::{Digest, Sha256};

    use super::{ProjectDocument, ProjectStore};
    use crate::error::StoreError;

    /// One JSON file per project under a root directory. File names are
    /// hashes of `namespace/label`, so any label is safe on disk.
    #[derive(Debug, Clone)]
    pub struct LocalProjectStore {
        root: PathBuf,
    }

    impl LocalProjectStore {
        /// Store in the platform data directory.
        pub fn open_default() -> Result<Self, StoreError> {
            let dirs = ProjectDirs::from("org", "codie", "codie-lab").ok_or(StoreError::NoDataDir)?;
            Self::with_root(dirs.data_dir().join("projects"))
        }

        pub fn with_root(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
            let root = root.into();
            fs::create_dir_all(&root)?;
            Ok(LocalProjectStore { root })
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        fn path_for(&self, namespace: &str, label: &str) -> PathBuf {
            let mut hasher = Sha256::new();
            hasher.update(namespace.as_bytes());
            hasher.update(b"/");
            hasher.update(label.as_bytes());
            let digest = hasher.finalize();
            self.root.join(format!("{}.json", hex::encode(&digest[..16])))
        }
    }

    fn not_found(label: &str, e: std::io::Error) -> StoreError {
        if e.kind() == ErrorKind::NotFound {
            StoreError::NotFound(label.to_string())
        } else {
            StoreError::Io(e)
        }
    }

    impl ProjectStore for LocalProjectStore {
        fn save(&mut self, document: &ProjectDocument) -> Result<(), StoreError> {
            let path = self.path_for(&document.namespace, &document.label);
            fs::write(&path, document.to_json()?)?;
            log::info!("saved project '{}' to {:?}", document.label, path);
            Ok(())
        }

        fn load(&self, namespace: &str, label: &str) -> Result<ProjectDocument, StoreError> {
            let json = fs::read_to_string(self.path_for(namespace, label)).map_err(|e| not_found(label, e))?;
            ProjectDocument::from_json(&json)
        }

        fn list(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
            let mut labels = Vec::new();
            for entry in fs::read_dir(&self.root)? {
                let path = entry?.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let document = match fs::read_to_string(&path)
                    .map_err(StoreError::from)
                    .and_then(|json| ProjectDocument::from_json(&json))
                {
                    Ok(document) => document,
                    Err(e) => {
                        log::warn!("skipping unreadable project file {:?}: {e}", path);
                        continue;
                    }
                };
                if document.namespace == namespace {
                    labels.push(document.label);
                }
            }
            labels.sort();
            Ok(labels)
        }

        fn delete(&mut self, namespace: &str, label: &str) -> Result<(), StoreError> {
            fs::remove_file(self.path_for(namespace, label)).map_err(|e| not_found(label, e))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn document(namespace: &str, label: &str) -> ProjectDocument {
            ProjectDocument {
                label: label.into(),
                namespace: namespace.into(),
                sample_rate: 44100,
                channels: 2,
                rows: Vec::new(),
                equalizer: Default::default(),
                buffers: Vec::new(),
            }
        }

        #[test]
        fn files_round_trip_through_disk() {
            let dir = tempfile::tempdir().unwrap();
            let mut store = LocalProjectStore::with_root(dir.path()).unwrap();
            store.save(&document("lab", "intro / take 1")).unwrap();
            store.save(&document("lab", "outro")).unwrap();
            store.save(&document("other", "intro / take 1")).unwrap();

            assert_eq!(store.list("lab").unwrap(), vec!["intro / take 1", "outro"]);
            assert_eq!(store.load("other", "intro / take 1").unwrap().namespace, "other");

            store.delete("lab", "outro").unwrap();
            assert!(matches!(store.load("lab", "outro"), Err(StoreError::NotFound(_))));
            assert!(matches!(store.delete("lab", "outro"), Err(StoreError::NotFound(_))));
        }

        #[test]
        fn unreadable_files_are_skipped() {
            let dir = tempfile::tempdir().unwrap();
            let mut store = LocalProjectStore::with_root(dir.path()).unwrap();
            fs::write(dir.path().join("junk.json"), "{ not json").unwrap();
            store.save(&document("lab", "kept")).unwrap();
            assert_eq!(store.list("lab").unwrap(), vec!["kept"]);
        }
    }
}
