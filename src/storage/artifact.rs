//! Именованные слоты для обученных моделей

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{ForecastError, Result};
use crate::models::forecasting::FittedModel;

pub trait ModelStore: Send + Sync {
    fn save(&self, name: &str, model: &FittedModel) -> Result<()>;

    /// `Ok(None)`, если под `name` ничего не сохраняли
    fn load(&self, name: &str) -> Result<Option<FittedModel>>;
}

fn decode(name: &str, raw: &str) -> Result<FittedModel> {
    let model: FittedModel = serde_json::from_str(raw).map_err(|e| ForecastError::ModelLoad {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    model.validate().map_err(|reason| ForecastError::ModelLoad {
        name: name.to_string(),
        reason,
    })?;
    Ok(model)
}

fn encode(name: &str, model: &FittedModel) -> Result<String> {
    serde_json::to_string(model).map_err(|e| ForecastError::ModelSave {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Один JSON файл на слот: `<dir>/<name>.json`
#[derive(Debug, Clone)]
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

impl ModelStore for FileModelStore {
    /// Пишется во временный файл в том же каталоге и переименовывается
    /// поверх слота, читатели не видят недописанный артефакт
    fn save(&self, name: &str, model: &FittedModel) -> Result<()> {
        let save_err = |e: std::io::Error| ForecastError::ModelSave {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let payload = encode(name, model)?;
        std::fs::create_dir_all(&self.dir).map_err(save_err)?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(save_err)?;
        tmp.write_all(payload.as_bytes()).map_err(save_err)?;
        tmp.as_file().sync_all().map_err(save_err)?;

        let path = self.path_for(name);
        tmp.persist(&path).map_err(|e| save_err(e.error))?;

        info!("Saved model '{}' to {}", name, path.display());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<FittedModel>> {
        let path = self.path_for(name);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No model artifact at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(ForecastError::ModelLoad {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
        };
        decode(name, &raw).map(Some)
    }
}

/// Слоты в памяти процесса с сериализованными моделями
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Положить сырые данные в слот без проверки
    pub fn put_raw(&self, name: &str, raw: impl Into<String>) {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), raw.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }
}

impl ModelStore for MemoryModelStore {
    fn save(&self, name: &str, model: &FittedModel) -> Result<()> {
        let payload = encode(name, model)?;
        self.put_raw(name, payload);
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<FittedModel>> {
        let raw = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned();
        raw.map(|raw| decode(name, &raw)).transpose()
    }
}
