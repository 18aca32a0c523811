//! Versioned on-disk storage of trained bundles
//!
//! Layout, one directory per version:
//! - `v{version}/scaler.json`, `text_vectorizer.json`, `label_encoder.json`
//! - `v{version}/{random_forest,gradient_boosting,svm,neural_network}.json`
//! - `v{version}/metadata.json` with SHA-256 checksums of the other six
//!
//! A bundle is written into a staging directory and renamed into place, so a
//! version directory is either complete or absent. Old versions are kept.

use crate::bundle::{Bundle, ModelArtifact, TrainingMetadata};
use crate::ensemble::ModelKind;
use crate::error::{EngineError, EngineResult};
use crate::models::{BundleVersion, FEATURE_COUNT};
use anyhow::Context;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const METADATA_FILE: &str = "metadata.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const VECTORIZER_FILE: &str = "text_vectorizer.json";
pub const ENCODER_FILE: &str = "label_encoder.json";

const STAGING_PREFIX: &str = ".staging-";

/// File name of a model artifact
pub fn model_file(kind: ModelKind) -> String {
    format!("{}.json", kind.as_str())
}

/// Every file a complete bundle directory holds
pub fn bundle_files() -> Vec<String> {
    let mut files = vec![
        SCALER_FILE.to_string(),
        VECTORIZER_FILE.to_string(),
        ENCODER_FILE.to_string(),
    ];
    files.extend(ModelKind::ALL.iter().map(|k| model_file(*k)));
    files.push(METADATA_FILE.to_string());
    files
}

/// Compute SHA256 checksum of data
fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Write and fsync a file
fn write_synced(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let mut file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    file.write_all(data)
        .with_context(|| format!("Failed to write {:?}", path))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {:?}", path))?;
    Ok(())
}

/// Versioned bundle store rooted at one directory
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    /// Open (creating if needed) a registry and discard abandoned staging
    /// directories from interrupted writes
    pub fn open(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| format!("Failed to create model directory {:?}", root))?;

        let registry = Self { root };
        registry.remove_staging()?;
        Ok(registry)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_dir(&self, version: BundleVersion) -> PathBuf {
        self.root.join(format!("v{}", version))
    }

    fn remove_staging(&self) -> EngineResult<()> {
        for entry in fs::read_dir(&self.root).with_context(|| format!("Failed to list {:?}", self.root))? {
            let entry = entry.context("Failed to read model directory entry")?;
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                warn!(path = %entry.path().display(), "Removing abandoned staging directory");
                fs::remove_dir_all(entry.path())
                    .with_context(|| format!("Failed to remove {:?}", entry.path()))?;
            }
        }
        Ok(())
    }

    /// Every version directory present, complete or not, in ascending order
    pub fn versions(&self) -> EngineResult<Vec<BundleVersion>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.root).with_context(|| format!("Failed to list {:?}", self.root))? {
            let entry = entry.context("Failed to read model directory entry")?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(v) = name.strip_prefix('v').and_then(|s| s.parse::<BundleVersion>().ok()) {
                versions.push(v);
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Version the next successful training run will publish
    pub fn next_version(&self) -> EngineResult<BundleVersion> {
        Ok(self
            .versions()?
            .last()
            .map(BundleVersion::next_minor)
            .unwrap_or(BundleVersion::INITIAL))
    }

    /// Persist a bundle under its version. Checksums are recorded into the
    /// bundle's metadata. Fails if the version already exists.
    pub fn save(&self, bundle: &mut Bundle) -> EngineResult<PathBuf> {
        let version = bundle.version();
        let target = self.version_dir(version);
        if target.exists() {
            return Err(anyhow::anyhow!("Bundle version {} already exists at {:?}", version, target).into());
        }

        let staging = self
            .root
            .join(format!("{}v{}-{}", STAGING_PREFIX, version, uuid::Uuid::new_v4()));
        fs::create_dir_all(&staging).with_context(|| format!("Failed to create staging directory {:?}", staging))?;

        match self.write_staged(&staging, bundle) {
            Ok(()) => {
                fs::rename(&staging, &target)
                    .with_context(|| format!("Failed to rename {:?} to {:?}", staging, target))?;
                info!(
                    version = %version,
                    path = %target.display(),
                    "Bundle written"
                );
                Ok(target)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging directory");
                }
                Err(e)
            }
        }
    }

    fn write_staged(&self, dir: &Path, bundle: &mut Bundle) -> EngineResult<()> {
        let mut artifacts: Vec<(String, Vec<u8>)> = vec![
            (SCALER_FILE.to_string(), serde_json::to_vec(&bundle.scaler)?),
            (VECTORIZER_FILE.to_string(), serde_json::to_vec(&bundle.vectorizer)?),
            (ENCODER_FILE.to_string(), serde_json::to_vec(&bundle.encoder)?),
        ];
        for model in &bundle.models {
            artifacts.push((model_file(model.model_kind), serde_json::to_vec(model)?));
        }

        let mut checksums = BTreeMap::new();
        for (name, data) in &artifacts {
            write_synced(&dir.join(name), data)?;
            checksums.insert(name.clone(), compute_checksum(data));
        }

        bundle.metadata.checksums = checksums;
        let metadata = serde_json::to_vec_pretty(&bundle.metadata)?;
        write_synced(&dir.join(METADATA_FILE), &metadata)?;
        Ok(())
    }

    /// Load one version, verifying it is complete and uncorrupted
    pub fn load(&self, version: BundleVersion) -> EngineResult<Bundle> {
        let dir = self.version_dir(version);
        let missing = |artifact: &str| EngineError::ArtifactMissing {
            version,
            artifact: artifact.to_string(),
        };

        for file in bundle_files() {
            if !dir.join(&file).is_file() {
                return Err(missing(&file));
            }
        }

        let metadata: TrainingMetadata = read_json(&dir.join(METADATA_FILE))?;
        if metadata.version != version || metadata.feature_count != FEATURE_COUNT {
            return Err(missing(METADATA_FILE));
        }

        let read_verified = |name: &str| -> EngineResult<Vec<u8>> {
            let path = dir.join(name);
            let data = fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
            match metadata.checksums.get(name) {
                Some(expected) if *expected == compute_checksum(&data) => Ok(data),
                _ => Err(missing(name)),
            }
        };

        let scaler = serde_json::from_slice(&read_verified(SCALER_FILE)?)?;
        let vectorizer = serde_json::from_slice(&read_verified(VECTORIZER_FILE)?)?;
        let encoder = serde_json::from_slice(&read_verified(ENCODER_FILE)?)?;

        let mut models = Vec::with_capacity(ModelKind::ALL.len());
        for kind in ModelKind::ALL {
            let name = model_file(kind);
            let model: ModelArtifact = serde_json::from_slice(&read_verified(&name)?)?;
            if model.version != version || model.model_kind != kind {
                return Err(missing(&name));
            }
            models.push(model);
        }

        debug!(version = %version, "Bundle loaded");
        Ok(Bundle {
            metadata,
            scaler,
            vectorizer,
            encoder,
            models,
        })
    }

    /// Highest version that loads cleanly; broken versions are skipped
    pub fn load_latest(&self) -> EngineResult<Option<Bundle>> {
        for version in self.versions()?.into_iter().rev() {
            match self.load(version) {
                Ok(bundle) => {
                    info!(version = %version, "Loaded latest bundle");
                    return Ok(Some(bundle));
                }
                Err(e) => {
                    warn!(version = %version, error = %e, "Skipping unusable bundle");
                }
            }
        }
        Ok(None)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> EngineResult<T> {
    let data = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::{Classifier, EnsembleParams};
    use crate::models::InteractionRecord;
    use crate::training::{Trainer, TrainerConfig};
    use tempfile::TempDir;

    fn bundle(version: BundleVersion) -> Bundle {
        let mut records = Vec::new();
        for i in 0..8 {
            records.push(
                InteractionRecord::new(format!("scan 10.0.0.{}", i), "22/tcp open ssh", true).with_tools(["nmap"]),
            );
        }
        for i in 0..4 {
            records.push(InteractionRecord::new(format!("draft memo {}", i), "nothing", false));
        }
        Trainer::new(TrainerConfig::default(), EnsembleParams::compact())
            .train(&records, version)
            .unwrap()
    }

    #[test]
    fn test_compute_checksum() {
        let checksum = compute_checksum(b"bundle bytes");
        assert_eq!(checksum.len(), 64);
        assert_eq!(checksum, compute_checksum(b"bundle bytes"));
    }

    #[test]
    fn test_empty_registry_starts_at_initial_version() {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        assert!(registry.versions().unwrap().is_empty());
        assert_eq!(registry.next_version().unwrap(), BundleVersion::INITIAL);
        assert!(registry.load_latest().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_is_identical() {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let mut original = bundle(BundleVersion::INITIAL);
        let path = registry.save(&mut original).unwrap();

        for file in bundle_files() {
            assert!(path.join(&file).is_file(), "{}", file);
        }
        assert_eq!(original.metadata.checksums.len(), 6);

        let loaded = registry.load(BundleVersion::INITIAL).unwrap();
        assert_eq!(loaded, original);

        let row = vec![0.25; FEATURE_COUNT];
        for (a, b) in original.models.iter().zip(&loaded.models) {
            assert_eq!(a.parameters.predict_proba(&row), b.parameters.predict_proba(&row));
        }
        assert_eq!(registry.next_version().unwrap().to_string(), "1.1.0");
    }

    #[test]
    fn test_existing_version_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        registry.save(&mut bundle(BundleVersion::INITIAL)).unwrap();
        assert!(registry.save(&mut bundle(BundleVersion::INITIAL)).is_err());
    }

    #[test]
    fn test_partial_bundle_is_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let path = registry.save(&mut bundle(BundleVersion::INITIAL)).unwrap();
        fs::remove_file(path.join(model_file(ModelKind::Svm))).unwrap();

        let err = registry.load(BundleVersion::INITIAL).unwrap_err();
        assert!(matches!(err, EngineError::ArtifactMissing { ref artifact, .. } if artifact == "svm.json"));
        assert!(registry.load_latest().unwrap().is_none());
        // the broken directory still reserves its version number
        assert_eq!(registry.next_version().unwrap().to_string(), "1.1.0");
    }

    #[test]
    fn test_corrupt_artifact_is_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let path = registry.save(&mut bundle(BundleVersion::INITIAL)).unwrap();
        fs::write(path.join(SCALER_FILE), b"{\"mean\":[],\"scale\":[]}").unwrap();
        assert!(matches!(
            registry.load(BundleVersion::INITIAL),
            Err(EngineError::ArtifactMissing { .. })
        ));
    }

    #[test]
    fn test_latest_complete_version_wins() {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let v1 = BundleVersion::INITIAL;
        let v2 = v1.next_minor();
        registry.save(&mut bundle(v1)).unwrap();
        let path = registry.save(&mut bundle(v2)).unwrap();

        assert_eq!(registry.load_latest().unwrap().unwrap().version(), v2);
        fs::remove_file(path.join(METADATA_FILE)).unwrap();
        assert_eq!(registry.load_latest().unwrap().unwrap().version(), v1);
        assert!(registry.version_dir(v1).exists());
    }

    #[test]
    fn test_open_removes_abandoned_staging() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join(".staging-v1.0.0-abc");
        fs::create_dir_all(&stale).unwrap();
        ModelRegistry::open(dir.path()).unwrap();
        assert!(!stale.exists());
    }
}
