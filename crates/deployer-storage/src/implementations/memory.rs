//! In-memory storage with TTL support.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Entry {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_expired(&self) -> bool {
		self.expires_at.is_some_and(|at| Instant::now() >= at)
	}
}

#[derive(Default)]
pub struct MemoryStorage {
	entries: DashMap<String, Entry>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let expired = match self.entries.get(key) {
			Some(entry) if !entry.is_expired() => return Ok(entry.value.clone()),
			Some(_) => true,
			None => false,
		};
		if expired {
			self.entries.remove(key);
		}
		Err(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let expires_at = ttl.map(|ttl| Instant::now() + ttl);
		self.entries
			.insert(key.to_string(), Entry { value, expires_at });
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.entries.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self
			.entries
			.get(key)
			.is_some_and(|entry| !entry.is_expired()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_ttl_expiry() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("a", vec![1], Some(Duration::from_millis(20)))
			.await
			.unwrap();
		storage.set_bytes("b", vec![2], None).await.unwrap();

		assert!(storage.exists("a").await.unwrap());
		tokio::time::sleep(Duration::from_millis(40)).await;

		assert!(!storage.exists("a").await.unwrap());
		assert!(matches!(storage.get_bytes("a").await, Err(StorageError::NotFound)));
		assert_eq!(storage.get_bytes("b").await.unwrap(), vec![2]);
	}
}
