//! Модуль для работы с временными файлами
//!
//! Один менеджер живёт ровно один вызов синтеза: всё, что он выдал,
//! удаляется вместе с каталогом при выходе из области видимости, в том
//! числе на путях с ошибкой.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::Result;

/// Менеджер временных файлов
pub struct TempFileManager {
    /// Временная директория
    temp_dir: TempDir,
    /// Список выданных путей
    files: Vec<PathBuf>,
}

impl TempFileManager {
    /// Создать временную директорию внутри `parent`
    pub fn new_in(parent: &Path) -> Result<Self> {
        fs::create_dir_all(parent)?;
        let temp_dir = tempfile::Builder::new().prefix("narration_").tempdir_in(parent)?;

        Ok(Self {
            temp_dir,
            files: Vec::new(),
        })
    }

    /// Выдать уникальный путь внутри временной директории (файл не создаётся)
    pub fn unique_path(&mut self, prefix: &str, extension: &str) -> PathBuf {
        let file_name = format!("{}_{}.{}", prefix, uuid::Uuid::new_v4().simple(), extension);
        self.named_path(&file_name)
    }

    /// Выдать путь с заданным именем внутри временной директории
    pub fn named_path(&mut self, file_name: &str) -> PathBuf {
        let file_path = self.temp_dir.path().join(file_name);
        self.files.push(file_path.clone());
        file_path
    }

    /// Получить путь к временной директории
    pub fn temp_dir_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Удалить выданные файлы. Ошибки только логируются.
    pub fn cleanup(&mut self) {
        for file in self.files.drain(..) {
            remove_file_quietly(&file);
        }
    }
}

impl Drop for TempFileManager {
    fn drop(&mut self) {
        self.cleanup();
        // Каталог удаляет сам TempDir
    }
}

/// Удалить файл, если он есть; неудачу только записать в лог
pub fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }
}
