use super::{ModelCatalog, ModelDescriptor, ModelInstallState};
use crate::error::DownloadError;
use crate::locale::Locale;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// On-disk registry of embedded voice models, one directory per descriptor
/// under a shared root.
///
/// Only transient states (`Downloading`, `Failed`) are kept in memory.
/// `Installed` is always derived from the files on disk, so a model deleted
/// behind our back stops reporting as installed on the next read.
pub struct ModelStore {
    root: PathBuf,
    catalog: ModelCatalog,
    recorded: Mutex<HashMap<String, ModelInstallState>>,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>, catalog: ModelCatalog) -> Self {
        Self {
            root: root.into(),
            catalog,
            recorded: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// The descriptor serving `locale`. Unmapped locales get the catalog
    /// default so there is always some embedded voice to try.
    pub fn descriptor_for(&self, locale: &Locale) -> ModelDescriptor {
        match self.catalog.lookup(locale) {
            Ok(descriptor) => descriptor.clone(),
            Err(e) => {
                debug!(error = %e, "Using default voice model");
                self.catalog.default_descriptor().clone()
            }
        }
    }

    pub fn model_dir(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.root.join(&descriptor.storage_folder)
    }

    pub fn is_installed(&self, locale: &Locale) -> bool {
        self.verify(&self.descriptor_for(locale))
    }

    pub fn state_of(&self, locale: &Locale) -> ModelInstallState {
        self.state_of_descriptor(&self.descriptor_for(locale))
    }

    /// Every catalog entry with its current state.
    pub fn list(&self) -> Vec<(ModelDescriptor, ModelInstallState)> {
        self.catalog
            .entries()
            .iter()
            .map(|d| (d.clone(), self.state_of_descriptor(d)))
            .collect()
    }

    fn state_of_descriptor(&self, descriptor: &ModelDescriptor) -> ModelInstallState {
        let recorded = self.recorded().get(&descriptor.storage_folder).cloned();
        match recorded {
            Some(downloading @ ModelInstallState::Downloading { .. }) => downloading,
            _ if self.verify(descriptor) => ModelInstallState::Installed,
            Some(failed @ ModelInstallState::Failed { .. }) => failed,
            _ => ModelInstallState::NotInstalled,
        }
    }

    /// All required files present, regular and non-empty.
    fn verify(&self, descriptor: &ModelDescriptor) -> bool {
        let dir = self.model_dir(descriptor);
        descriptor.required_files.iter().all(|name| {
            fs::metadata(dir.join(name))
                .map(|m| m.is_file() && m.len() > 0)
                .unwrap_or(false)
        })
    }

    fn recorded(&self) -> MutexGuard<'_, HashMap<String, ModelInstallState>> {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Transitions below are driven by the downloader only.

    /// Mark `folder` as downloading and return whatever was recorded before.
    pub(crate) fn begin_download(&self, folder: &str) -> Option<ModelInstallState> {
        self.recorded()
            .insert(folder.to_string(), ModelInstallState::Downloading { progress: 0.0 })
    }

    pub(crate) fn set_progress(&self, folder: &str, progress: f32) {
        if let Some(state) = self.recorded().get_mut(folder) {
            *state = ModelInstallState::Downloading {
                progress: progress.clamp(0.0, 1.0),
            };
        }
    }

    pub(crate) fn mark_failed(&self, folder: &str, reason: String) {
        self.recorded()
            .insert(folder.to_string(), ModelInstallState::Failed { reason });
    }

    pub(crate) fn mark_installed(&self, folder: &str) {
        self.recorded().remove(folder);
    }

    /// Put back the record captured by [`Self::begin_download`].
    pub(crate) fn restore(&self, folder: &str, prior: Option<ModelInstallState>) {
        let mut recorded = self.recorded();
        match prior {
            Some(state) => recorded.insert(folder.to_string(), state),
            None => recorded.remove(folder),
        };
    }

    /// Fresh staging directory inside the models root, so the final rename
    /// stays on one filesystem.
    pub(crate) fn create_staging(&self, descriptor: &ModelDescriptor) -> io::Result<TempDir> {
        fs::create_dir_all(&self.root)?;
        tempfile::Builder::new()
            .prefix(&format!(".{}-", descriptor.storage_folder))
            .tempdir_in(&self.root)
    }

    /// Swap a fully downloaded staging directory into place. An existing
    /// model is moved aside first and restored if the swap fails.
    pub(crate) fn install_staged(
        &self,
        descriptor: &ModelDescriptor,
        staging: &Path,
    ) -> Result<(), DownloadError> {
        let target = self.model_dir(descriptor);
        let backup = self
            .root
            .join(format!(".{}.previous", descriptor.storage_folder));
        let install_err = |e: io::Error| DownloadError::InstallFailed(e.to_string());

        if backup.exists() {
            fs::remove_dir_all(&backup).map_err(install_err)?;
        }
        let had_previous = target.exists();
        if had_previous {
            fs::rename(&target, &backup).map_err(install_err)?;
        }

        if let Err(e) = fs::rename(staging, &target) {
            if had_previous {
                if let Err(restore_err) = fs::rename(&backup, &target) {
                    warn!(error = %restore_err, path = %backup.display(), "Could not restore previous model");
                }
            }
            return Err(install_err(e));
        }

        if had_previous {
            if let Err(e) = fs::remove_dir_all(&backup) {
                warn!(error = %e, path = %backup.display(), "Could not remove replaced model");
            }
        }
        info!(folder = %descriptor.storage_folder, "Model installed");
        Ok(())
    }
}
