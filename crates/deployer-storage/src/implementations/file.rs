//! File-backed storage, one JSON file per key.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Maps a storage key onto a filesystem-safe path under the base directory.
	fn get_file_path(&self, key: &str) -> PathBuf {
		let safe_key: String = key
			.chars()
			.map(|c| match c {
				'/' | '\\' | ':' | '.' => '_',
				c => c,
			})
			.collect();
		self.base_path.join(format!("{}.json", safe_key))
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);

		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	/// TTL is not supported by this backend; values persist until deleted.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		_ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		// Write atomically by writing to temp file then renaming
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_file_storage_persists_across_instances() {
		let dir = tempfile::tempdir().unwrap();
		let key = "verification:0xabc";

		FileStorage::new(dir.path().to_path_buf())
			.set_bytes(key, b"{\"a\":1}".to_vec(), None)
			.await
			.unwrap();

		let reopened = FileStorage::new(dir.path().to_path_buf());
		assert!(reopened.exists(key).await.unwrap());
		assert_eq!(reopened.get_bytes(key).await.unwrap(), b"{\"a\":1}".to_vec());
		assert!(!dir.path().join("verification_0xabc.tmp").exists());
	}

	#[tokio::test]
	async fn test_keys_cannot_escape_base_dir() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().join("store"));

		storage
			.set_bytes("params:../../etc", b"1".to_vec(), None)
			.await
			.unwrap();
		assert!(dir.path().join("store").join("params_______etc.json").exists());
	}

	#[tokio::test]
	async fn test_missing_and_delete() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		assert!(matches!(
			storage.get_bytes("reports:none").await,
			Err(StorageError::NotFound)
		));
		storage.delete("reports:none").await.unwrap();
		assert!(!storage.exists("reports:none").await.unwrap());
	}
}
