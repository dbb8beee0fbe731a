//! Binary snapshot persistence for the vector store.
//!
//! File format: store.bin
//!
//! Header (39 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of the embedding model name)
//! - collection_count: u16 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Collections (repeated):
//! - name: u16 length + UTF-8 bytes
//! - entry_count: u64
//! Entries (repeated per collection, in storage order):
//! - id: u16 length + UTF-8 bytes
//! - vector: u8 presence flag, then u32 length + [f32] when present
//! - summary_vector: same encoding
//! - metadata: u32 length + JSON bytes
//!
//! The whole store is rewritten on save (atomic tmp write + rename);
//! write-whole-snapshot is fine at this scale and keeps recovery trivial.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::store::{VectorEntry, VectorStore, CATEGORIES, CONCEPTS, ITEMS};

/// Current file format version.
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + collection_count(2) + checksum(4).
const HEADER_SIZE: usize = 39;

/// Errors from snapshot load/save.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: snapshot was built with a different model")]
    ModelMismatch,

    #[error("Checksum mismatch: snapshot may be corrupted")]
    ChecksumMismatch,

    #[error("Metadata encoding error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Snapshot manager for one store file.
pub struct SnapshotStorage {
    path: PathBuf,
}

impl SnapshotStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load a store from the snapshot.
    ///
    /// `ModelMismatch` and `VersionMismatch` mean the caller should start
    /// with a fresh store rather than treat the file as fatal.
    pub fn load(&self, expected_model_id: &[u8; 32]) -> Result<VectorStore, SnapshotError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let (_version, model_id, collection_count) = read_header(&mut reader)?;

        if model_id != *expected_model_id {
            return Err(SnapshotError::ModelMismatch);
        }

        let mut store = VectorStore::new();
        for _ in 0..collection_count {
            let name = read_string(&mut reader, u16::MAX as usize)?;
            let entry_count = read_u64(&mut reader)?;
            for _ in 0..entry_count {
                let entry = read_entry(&mut reader)?;
                store
                    .upsert(&name, entry)
                    .map_err(|e| SnapshotError::InvalidFormat(e.to_string()))?;
            }
        }

        Ok(store)
    }

    /// Save the store atomically: temp file -> fsync -> rename.
    pub fn save(&self, store: &VectorStore, model_id: &[u8; 32]) -> Result<(), SnapshotError> {
        let temp_path = self.path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, store, model_id);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Delete the snapshot file if it exists.
    pub fn delete(&self) -> Result<(), SnapshotError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn write_to_file(
        &self,
        path: &Path,
        store: &VectorStore,
        model_id: &[u8; 32],
    ) -> Result<(), SnapshotError> {
        let collections = [ITEMS, CATEGORIES, CONCEPTS];

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write_header(&mut writer, model_id, collections.len() as u16)?;

        for name in collections {
            write_string(&mut writer, name)?;
            let count = store
                .len(name)
                .map_err(|e| SnapshotError::InvalidFormat(e.to_string()))?;
            writer.write_all(&(count as u64).to_le_bytes())?;

            let entries = store
                .iter(name)
                .map_err(|e| SnapshotError::InvalidFormat(e.to_string()))?;
            for entry in entries {
                write_entry(&mut writer, entry)?;
            }
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        file.sync_all()?;

        Ok(())
    }
}

fn write_header<W: Write>(
    writer: &mut W,
    model_id: &[u8; 32],
    collection_count: u16,
) -> Result<(), SnapshotError> {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = FORMAT_VERSION;
    header[1..33].copy_from_slice(model_id);
    header[33..35].copy_from_slice(&collection_count.to_le_bytes());

    let checksum = crc32fast::hash(&header[0..35]);
    header[35..39].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header)?;
    Ok(())
}

fn read_header<R: Read>(reader: &mut R) -> Result<(u8, [u8; 32], u16), SnapshotError> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    // Version first: a future format may not even share this header layout.
    let version = header[0];
    if version > FORMAT_VERSION {
        return Err(SnapshotError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([header[35], header[36], header[37], header[38]]);
    if stored_checksum != crc32fast::hash(&header[0..35]) {
        return Err(SnapshotError::ChecksumMismatch);
    }
    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header[1..33]);
    let collection_count = u16::from_le_bytes([header[33], header[34]]);

    Ok((version, model_id, collection_count))
}

fn write_entry<W: Write>(writer: &mut W, entry: &VectorEntry) -> Result<(), SnapshotError> {
    write_string(writer, &entry.id)?;
    write_vector(writer, entry.vector.as_deref())?;
    write_vector(writer, entry.summary_vector.as_deref())?;

    let metadata = serde_json::to_vec(&entry.metadata)?;
    writer.write_all(&(metadata.len() as u32).to_le_bytes())?;
    writer.write_all(&metadata)?;
    Ok(())
}

fn read_entry<R: Read>(reader: &mut R) -> Result<VectorEntry, SnapshotError> {
    let id = read_string(reader, u16::MAX as usize)?;
    let vector = read_vector(reader)?;
    let summary_vector = read_vector(reader)?;

    let metadata_len = read_u32(reader)? as usize;
    let mut metadata_bytes = vec![0u8; metadata_len];
    reader.read_exact(&mut metadata_bytes)?;
    let metadata = serde_json::from_slice(&metadata_bytes)?;

    Ok(VectorEntry {
        id,
        vector,
        summary_vector,
        metadata,
    })
}

fn write_vector<W: Write>(writer: &mut W, vector: Option<&[f32]>) -> Result<(), SnapshotError> {
    match vector {
        None => writer.write_all(&[0u8])?,
        Some(values) => {
            writer.write_all(&[1u8])?;
            writer.write_all(&(values.len() as u32).to_le_bytes())?;
            for value in values {
                writer.write_all(&value.to_le_bytes())?;
            }
        }
    }
    Ok(())
}

fn read_vector<R: Read>(reader: &mut R) -> Result<Option<Vec<f32>>, SnapshotError> {
    let mut flag = [0u8; 1];
    reader.read_exact(&mut flag)?;
    if flag[0] == 0 {
        return Ok(None);
    }

    let len = read_u32(reader)? as usize;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        let mut bytes = [0u8; 4];
        reader.read_exact(&mut bytes)?;
        values.push(f32::from_le_bytes(bytes));
    }
    Ok(Some(values))
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<(), SnapshotError> {
    let bytes = value.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(SnapshotError::InvalidFormat(format!(
            "string of {} bytes exceeds the format limit",
            bytes.len()
        )));
    }
    writer.write_all(&(bytes.len() as u16).to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R, max_len: usize) -> Result<String, SnapshotError> {
    let mut len_bytes = [0u8; 2];
    reader.read_exact(&mut len_bytes)?;
    let len = u16::from_le_bytes(len_bytes) as usize;
    if len > max_len {
        return Err(SnapshotError::InvalidFormat(format!(
            "string length {len} exceeds limit {max_len}"
        )));
    }

    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| SnapshotError::InvalidFormat(e.to_string()))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, SnapshotError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, SnapshotError> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path() -> PathBuf {
        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "sn-store-test-{}-{}.bin",
            std::process::id(),
            counter
        ))
    }

    fn test_model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    #[test]
    fn test_save_and_load_empty() {
        let path = temp_path();
        let storage = SnapshotStorage::new(path.clone());
        let model_id = test_model_id();

        storage.save(&VectorStore::new(), &model_id).unwrap();
        assert!(storage.exists());

        let loaded = storage.load(&model_id).unwrap();
        assert_eq!(loaded.len(ITEMS).unwrap(), 0);
        assert_eq!(loaded.len(CATEGORIES).unwrap(), 0);
        assert_eq!(loaded.len(CONCEPTS).unwrap(), 0);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_roundtrip_preserves_entries_and_order() {
        let path = temp_path();
        let storage = SnapshotStorage::new(path.clone());
        let model_id = test_model_id();

        let mut store = VectorStore::new();
        store
            .upsert(
                ITEMS,
                VectorEntry::new("n1", vec![1.0, 0.0]).with_meta("content", "first note"),
            )
            .unwrap();
        store
            .upsert(ITEMS, VectorEntry::pending("n2").with_meta("content", "awaiting"))
            .unwrap();
        store
            .upsert(
                CATEGORIES,
                VectorEntry::new("c1", vec![0.0, 1.0]).with_summary_vector(vec![0.5, 0.5]),
            )
            .unwrap();
        store
            .upsert(CONCEPTS, VectorEntry::new("topics-rust", vec![0.7, 0.3]))
            .unwrap();

        storage.save(&store, &model_id).unwrap();
        let loaded = storage.load(&model_id).unwrap();

        let ids: Vec<&str> = loaded.iter(ITEMS).unwrap().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2"]);

        let n1 = loaded.get(ITEMS, "n1").unwrap().unwrap();
        assert_eq!(n1.vector, Some(vec![1.0, 0.0]));
        assert_eq!(n1.meta_str("content"), Some("first note"));

        let n2 = loaded.get(ITEMS, "n2").unwrap().unwrap();
        assert!(n2.vector.is_none());

        let c1 = loaded.get(CATEGORIES, "c1").unwrap().unwrap();
        assert_eq!(c1.summary_vector, Some(vec![0.5, 0.5]));

        assert_eq!(loaded.len(CONCEPTS).unwrap(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_model_mismatch() {
        let path = temp_path();
        let storage = SnapshotStorage::new(path.clone());

        storage.save(&VectorStore::new(), &test_model_id()).unwrap();

        let mut other_model = [0u8; 32];
        other_model[0] = 0xFF;
        let result = storage.load(&other_model);
        assert!(matches!(result, Err(SnapshotError::ModelMismatch)));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let path = temp_path();
        let storage = SnapshotStorage::new(path.clone());
        let model_id = test_model_id();

        let mut store = VectorStore::new();
        store
            .upsert(ITEMS, VectorEntry::new("n1", vec![1.0, 0.0]))
            .unwrap();
        storage.save(&store, &model_id).unwrap();

        use std::io::Seek;
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(std::io::SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let result = storage.load(&model_id);
        assert!(matches!(result, Err(SnapshotError::ChecksumMismatch)));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_atomic_write_cleans_up_on_error() {
        let path = PathBuf::from("/nonexistent/directory/store.bin");
        let storage = SnapshotStorage::new(path.clone());

        let result = storage.save(&VectorStore::new(), &test_model_id());
        assert!(result.is_err());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_delete() {
        let path = temp_path();
        let storage = SnapshotStorage::new(path.clone());

        storage.save(&VectorStore::new(), &test_model_id()).unwrap();
        assert!(storage.exists());

        storage.delete().unwrap();
        assert!(!storage.exists());
    }
}
