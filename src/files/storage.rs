//! Storage backends for snapshot documents and tabular files.
//!
//! [`FileStore`] is the capability every backend offers. [`LocalStorage`] serves
//! [`FileLocator::Local`] paths, [`BucketStorage`] serves [`FileLocator::Remote`] keys,
//! and [`Storage`] routes each locator to the backend matching its form. Everything
//! above this module (version resolution, change detection, pipeline stages) is written
//! once against `&dyn FileStore`.

use crate::files::error::StorageError;
use crate::files::locator::{FileLocator, LocatorForm, GS_URI_PREFIX};
use log::debug;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use polars::prelude::*;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::io::Cursor;
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex, RwLock};
use tokio::runtime::Runtime;

const JSON_INDENT: &[u8] = b"    ";

pub trait FileStore: Send + Sync {
    /// Direct file children of `directory`, sorted by name, optionally restricted to
    /// names starting with `prefix`. Fails when the directory does not exist.
    fn list_files(
        &self,
        directory: &FileLocator,
        prefix: Option<&str>,
    ) -> Result<Vec<FileLocator>, StorageError>;

    /// Like [`FileStore::list_files`] without a prefix, used for sibling lookups.
    /// Object namespaces need no pre-created directories, so an unseen bucket prefix
    /// yields no siblings rather than an error.
    fn siblings(&self, directory: &FileLocator) -> Result<Vec<FileLocator>, StorageError>;

    fn exists(&self, locator: &FileLocator) -> Result<bool, StorageError>;

    fn read_bytes(&self, locator: &FileLocator) -> Result<Vec<u8>, StorageError>;

    fn write_bytes(&self, locator: &FileLocator, bytes: &[u8]) -> Result<(), StorageError>;

    fn create_dir_all(&self, directory: &FileLocator) -> Result<(), StorageError>;

    /// Reads a JSON document holding a list of records.
    fn read_json(&self, locator: &FileLocator) -> Result<Vec<Value>, StorageError> {
        let bytes = self.read_bytes(locator)?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::JsonDecode(locator.clone(), e))
    }

    /// Writes records as indented JSON so stored snapshots stay diffable.
    fn write_json(&self, locator: &FileLocator, records: &[Value]) -> Result<(), StorageError> {
        let mut buffer = Vec::new();
        let formatter = PrettyFormatter::with_indent(JSON_INDENT);
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        serde::Serialize::serialize(records, &mut serializer)
            .map_err(|e| StorageError::JsonEncode(locator.clone(), e))?;
        self.write_bytes(locator, &buffer)
    }

    fn read_parquet(&self, locator: &FileLocator) -> Result<DataFrame, StorageError> {
        let bytes = self.read_bytes(locator)?;
        ParquetReader::new(Cursor::new(bytes))
            .finish()
            .map_err(|e| StorageError::ParquetRead(locator.clone(), e))
    }

    fn write_parquet(&self, locator: &FileLocator, df: &mut DataFrame) -> Result<(), StorageError> {
        let mut buffer = Vec::new();
        ParquetWriter::new(&mut buffer)
            .with_compression(ParquetCompression::Snappy)
            .finish(df)
            .map_err(|e| StorageError::ParquetWrite(locator.clone(), e))?;
        self.write_bytes(locator, &buffer)
    }
}

/// Files present in `source_dir` whose name is absent from `target_dir`.
///
/// Used between pipeline stages to find inputs that have not been processed yet.
/// Both directories must use the same addressing scheme.
pub fn directory_diff(
    store: &dyn FileStore,
    source_dir: &FileLocator,
    target_dir: &FileLocator,
    prefix: Option<&str>,
) -> Result<BTreeSet<FileLocator>, StorageError> {
    if source_dir.form() != target_dir.form() {
        return Err(StorageError::MixedForms {
            source_dir: source_dir.clone(),
            target_dir: target_dir.clone(),
        });
    }
    let processed: HashSet<String> = store
        .list_files(target_dir, prefix)?
        .iter()
        .map(FileLocator::file_name)
        .collect();

    Ok(store
        .list_files(source_dir, prefix)?
        .into_iter()
        .filter(|file| !processed.contains(&file.file_name()))
        .collect())
}

fn matches_prefix(name: &str, prefix: Option<&str>) -> bool {
    prefix.map_or(true, |prefix| name.starts_with(prefix))
}

/// Plain filesystem access.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorage;

impl LocalStorage {
    fn path<'a>(&self, locator: &'a FileLocator) -> Result<&'a Path, StorageError> {
        match locator {
            FileLocator::Local(path) => Ok(path),
            FileLocator::Remote(_) => Err(StorageError::WrongForm {
                expected: LocatorForm::Local,
                locator: locator.clone(),
            }),
        }
    }
}

impl FileStore for LocalStorage {
    fn list_files(
        &self,
        directory: &FileLocator,
        prefix: Option<&str>,
    ) -> Result<Vec<FileLocator>, StorageError> {
        let dir = self.path(directory)?;
        if !dir.is_dir() {
            return Err(StorageError::NotADirectory(dir.to_path_buf()));
        }
        let entries =
            std::fs::read_dir(dir).map_err(|e| StorageError::ListDir(dir.to_path_buf(), e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::ListDir(dir.to_path_buf(), e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if matches_prefix(&name, prefix) {
                files.push(FileLocator::Local(path));
            }
        }
        files.sort();
        Ok(files)
    }

    fn siblings(&self, directory: &FileLocator) -> Result<Vec<FileLocator>, StorageError> {
        self.list_files(directory, None)
    }

    fn exists(&self, locator: &FileLocator) -> Result<bool, StorageError> {
        Ok(self.path(locator)?.is_file())
    }

    fn read_bytes(&self, locator: &FileLocator) -> Result<Vec<u8>, StorageError> {
        let path = self.path(locator)?;
        std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(locator.clone()),
            _ => StorageError::Read(locator.clone(), e),
        })
    }

    fn write_bytes(&self, locator: &FileLocator, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path(locator)?;
        std::fs::write(path, bytes).map_err(|e| StorageError::Write(locator.clone(), e))
    }

    fn create_dir_all(&self, directory: &FileLocator) -> Result<(), StorageError> {
        let path = self.path(directory)?;
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDir(directory.clone(), e))
    }
}

/// Which object store a bucket name connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BucketBackend {
    /// Google Cloud Storage, credentials from the `GOOGLE_*` environment.
    Gcs,
    /// Process-local namespace, one [`InMemory`] store per bucket.
    Memory,
}

/// Owns the runtime object store requests are driven on. Requests run there even when
/// the caller is itself inside an async context.
#[derive(Debug)]
struct RequestRuntime(Option<Runtime>);

impl Drop for RequestRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// `gs://<bucket>/<key>` objects served through [`ObjectStore`].
///
/// A directory is a key prefix ending in `/`. It exists as soon as one object lives
/// under it; listings only return its direct children.
#[derive(Debug, Clone)]
pub struct BucketStorage {
    backend: BucketBackend,
    stores: Arc<RwLock<HashMap<String, Arc<dyn ObjectStore>>>>,
    runtime: Arc<Mutex<RequestRuntime>>,
}

impl Default for BucketStorage {
    fn default() -> Self {
        Self::gcs()
    }
}

impl BucketStorage {
    fn with_backend(backend: BucketBackend) -> Self {
        Self {
            backend,
            stores: Arc::default(),
            runtime: Arc::new(Mutex::new(RequestRuntime(None))),
        }
    }

    /// Google Cloud Storage buckets, connected on first use.
    pub fn gcs() -> Self {
        Self::with_backend(BucketBackend::Gcs)
    }

    /// Buckets held in memory. Clones share the same objects.
    pub fn in_memory() -> Self {
        Self::with_backend(BucketBackend::Memory)
    }

    fn key<'a>(&self, locator: &'a FileLocator) -> Result<&'a str, StorageError> {
        match locator {
            FileLocator::Remote(key) => Ok(key),
            FileLocator::Local(_) => Err(StorageError::WrongForm {
                expected: LocatorForm::Remote,
                locator: locator.clone(),
            }),
        }
    }

    /// Splits `gs://bucket/a/b.json` into `bucket` and `a/b.json`.
    fn split<'a>(&self, locator: &'a FileLocator) -> Result<(&'a str, &'a str), StorageError> {
        let key = self.key(locator)?;
        key.strip_prefix(GS_URI_PREFIX)
            .and_then(|rest| rest.split_once('/'))
            .filter(|(bucket, _)| !bucket.is_empty())
            .ok_or_else(|| StorageError::InvalidBucketDirectory(key.to_string()))
    }

    fn directory_parts<'a>(
        &self,
        directory: &'a FileLocator,
    ) -> Result<(&'a str, &'a str), StorageError> {
        let key = self.key(directory)?;
        if !key.ends_with('/') {
            return Err(StorageError::InvalidBucketDirectory(key.to_string()));
        }
        self.split(directory)
    }

    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        if let Some(store) = self
            .stores
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(bucket)
        {
            return Ok(store.clone());
        }
        let store: Arc<dyn ObjectStore> = match self.backend {
            BucketBackend::Gcs => Arc::new(
                GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| StorageError::BucketConnect(bucket.to_string(), e))?,
            ),
            BucketBackend::Memory => Arc::new(InMemory::new()),
        };
        debug!("Connected to bucket {} ({:?})", bucket, self.backend);
        let mut stores = self.stores.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(stores.entry(bucket.to_string()).or_insert(store).clone())
    }

    /// Runs `request` on the request runtime and waits for its result.
    fn block_on<T, F>(&self, key: &str, request: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let handle = {
            let mut runtime = self.runtime.lock().map_err(|_| StorageError::LockPoisoned)?;
            match &runtime.0 {
                Some(rt) => rt.handle().clone(),
                None => {
                    let rt = tokio::runtime::Builder::new_multi_thread()
                        .worker_threads(1)
                        .thread_name("metstat-objects")
                        .enable_all()
                        .build()
                        .map_err(StorageError::Runtime)?;
                    let handle = rt.handle().clone();
                    runtime.0 = Some(rt);
                    handle
                }
            }
        };
        let (sender, receiver) = mpsc::sync_channel(1);
        handle.spawn(async move {
            let _ = sender.send(request.await);
        });
        receiver
            .recv()
            .map_err(|_| StorageError::RequestAborted(key.to_string()))
    }

    /// Direct children of `directory` plus whether anything lives under it at all.
    fn children(&self, directory: &FileLocator) -> Result<(bool, Vec<FileLocator>), StorageError> {
        let (bucket, prefix) = self.directory_parts(directory)?;
        let store = self.store(bucket)?;
        let prefix = prefix.trim_end_matches('/');
        let prefix = (!prefix.is_empty()).then(|| ObjectPath::from(prefix));
        let key = self.key(directory)?.to_string();
        let listing = self
            .block_on(&key, async move { store.list_with_delimiter(prefix.as_ref()).await })?
            .map_err(|e| StorageError::ObjectStore(key.clone(), e))?;

        let any = !listing.objects.is_empty() || !listing.common_prefixes.is_empty();
        let mut files: Vec<FileLocator> = listing
            .objects
            .iter()
            .map(|meta| FileLocator::Remote(format!("{GS_URI_PREFIX}{bucket}/{}", meta.location)))
            .collect();
        files.sort();
        Ok((any, files))
    }
}

impl FileStore for BucketStorage {
    fn list_files(
        &self,
        directory: &FileLocator,
        prefix: Option<&str>,
    ) -> Result<Vec<FileLocator>, StorageError> {
        let (exists, files) = self.children(directory)?;
        if !exists {
            return Err(StorageError::DirectoryNotFound(directory.to_string()));
        }
        Ok(files
            .into_iter()
            .filter(|file| matches_prefix(&file.file_name(), prefix))
            .collect())
    }

    fn siblings(&self, directory: &FileLocator) -> Result<Vec<FileLocator>, StorageError> {
        Ok(self.children(directory)?.1)
    }

    fn exists(&self, locator: &FileLocator) -> Result<bool, StorageError> {
        let (bucket, path) = self.split(locator)?;
        let store = self.store(bucket)?;
        let path = ObjectPath::from(path);
        match self.block_on(&locator.to_string(), async move { store.head(&path).await })? {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::ObjectStore(locator.to_string(), e)),
        }
    }

    fn read_bytes(&self, locator: &FileLocator) -> Result<Vec<u8>, StorageError> {
        let (bucket, path) = self.split(locator)?;
        let store = self.store(bucket)?;
        let path = ObjectPath::from(path);
        let result = self.block_on(&locator.to_string(), async move {
            match store.get(&path).await {
                Ok(object) => object.bytes().await,
                Err(e) => Err(e),
            }
        })?;
        match result {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(object_store::Error::NotFound { .. }) => {
                Err(StorageError::NotFound(locator.clone()))
            }
            Err(e) => Err(StorageError::ObjectStore(locator.to_string(), e)),
        }
    }

    fn write_bytes(&self, locator: &FileLocator, bytes: &[u8]) -> Result<(), StorageError> {
        let (bucket, path) = self.split(locator)?;
        let store = self.store(bucket)?;
        let path = ObjectPath::from(path);
        let payload = PutPayload::from(bytes.to_vec());
        self.block_on(&locator.to_string(), async move { store.put(&path, payload).await })?
            .map_err(|e| StorageError::ObjectStore(locator.to_string(), e))?;
        debug!("Put object {} ({} bytes)", locator, bytes.len());
        Ok(())
    }

    fn create_dir_all(&self, directory: &FileLocator) -> Result<(), StorageError> {
        self.key(directory).map(|_| ())
    }
}

/// Routes each locator to the backend for its addressing scheme.
#[derive(Debug, Default, Clone)]
pub struct Storage {
    local: LocalStorage,
    bucket: BucketStorage,
}

impl Storage {
    pub fn new(bucket: BucketStorage) -> Self {
        Self {
            local: LocalStorage,
            bucket,
        }
    }

    fn backend(&self, locator: &FileLocator) -> &dyn FileStore {
        match locator {
            FileLocator::Local(_) => &self.local,
            FileLocator::Remote(_) => &self.bucket,
        }
    }
}

impl FileStore for Storage {
    fn list_files(
        &self,
        directory: &FileLocator,
        prefix: Option<&str>,
    ) -> Result<Vec<FileLocator>, StorageError> {
        self.backend(directory).list_files(directory, prefix)
    }

    fn siblings(&self, directory: &FileLocator) -> Result<Vec<FileLocator>, StorageError> {
        self.backend(directory).siblings(directory)
    }

    fn exists(&self, locator: &FileLocator) -> Result<bool, StorageError> {
        self.backend(locator).exists(locator)
    }

    fn read_bytes(&self, locator: &FileLocator) -> Result<Vec<u8>, StorageError> {
        self.backend(locator).read_bytes(locator)
    }

    fn write_bytes(&self, locator: &FileLocator, bytes: &[u8]) -> Result<(), StorageError> {
        self.backend(locator).write_bytes(locator, bytes)
    }

    fn create_dir_all(&self, directory: &FileLocator) -> Result<(), StorageError> {
        self.backend(directory).create_dir_all(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").expect("Failed to create test file");
    }

    #[test]
    fn test_list_files_skips_directories_and_filters_prefix() -> Result<(), StorageError> {
        let temp = TempDir::new().expect("Failed to create temp dir");
        touch(temp.path(), "weather_stations_v1.json");
        touch(temp.path(), "observations_p2024-01-01_p2024-01-31.json");
        std::fs::create_dir(temp.path().join("weather_stations_archive")).unwrap();

        let dir = FileLocator::local(temp.path());
        let all = LocalStorage.list_files(&dir, None)?;
        assert_eq!(all.len(), 2);

        let stations = LocalStorage.list_files(&dir, Some("weather_stations"))?;
        assert_eq!(stations, vec![dir.join("weather_stations_v1.json")]);
        Ok(())
    }

    #[test]
    fn test_list_files_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let missing = FileLocator::local(temp.path().join("nope"));
        let result = LocalStorage.list_files(&missing, None);
        assert!(matches!(result, Err(StorageError::NotADirectory(_))));
    }

    #[test]
    fn test_bucket_listing_only_returns_direct_children() -> Result<(), StorageError> {
        let bucket = BucketStorage::in_memory();
        bucket.write_bytes(&FileLocator::remote("gs://b/dir/file1.txt"), b"1")?;
        bucket.write_bytes(&FileLocator::remote("gs://b/dir/file2.txt"), b"2")?;
        bucket.write_bytes(&FileLocator::remote("gs://b/dir/sub/file3.txt"), b"3")?;
        bucket.write_bytes(&FileLocator::remote("gs://b/dirx/file4.txt"), b"4")?;

        let files = bucket.list_files(&FileLocator::remote("gs://b/dir/"), None)?;
        assert_eq!(
            files,
            vec![
                FileLocator::remote("gs://b/dir/file1.txt"),
                FileLocator::remote("gs://b/dir/file2.txt"),
            ]
        );

        let filtered = bucket.list_files(&FileLocator::remote("gs://b/dir/"), Some("file2"))?;
        assert_eq!(filtered, vec![FileLocator::remote("gs://b/dir/file2.txt")]);
        Ok(())
    }

    #[test]
    fn test_bucket_listing_validates_directory() {
        let bucket = BucketStorage::in_memory();
        let no_slash = bucket.list_files(&FileLocator::remote("gs://b/dir"), None);
        assert!(matches!(no_slash, Err(StorageError::InvalidBucketDirectory(_))));

        let no_scheme = bucket.list_files(&FileLocator::remote("b/dir/"), None);
        assert!(matches!(no_scheme, Err(StorageError::InvalidBucketDirectory(_))));

        let absent = bucket.list_files(&FileLocator::remote("gs://b/dir/"), None);
        assert!(matches!(absent, Err(StorageError::DirectoryNotFound(_))));

        let siblings = bucket.siblings(&FileLocator::remote("gs://b/dir/")).unwrap();
        assert!(siblings.is_empty());
    }

    #[test]
    fn test_bucket_shares_objects_between_storage_handles() -> Result<(), StorageError> {
        let bucket = BucketStorage::in_memory();
        let first_run = Storage::new(bucket.clone());
        let snapshot = FileLocator::remote("gs://kilde/frost/weather_stations_v1.json");
        first_run.write_json(&snapshot, &[])?;

        let second_run = Storage::new(bucket);
        let files = second_run.list_files(&FileLocator::remote("gs://kilde/frost/"), None)?;
        assert_eq!(files, vec![FileLocator::remote("gs://kilde/frost/weather_stations_v1.json")]);

        let root = second_run.list_files(&FileLocator::remote("gs://kilde/"), None)?;
        assert!(root.is_empty(), "only nested objects live under the bucket root");
        Ok(())
    }

    #[test]
    fn test_bucket_read_missing_object() -> Result<(), StorageError> {
        let bucket = BucketStorage::in_memory();
        let locator = FileLocator::remote("gs://b/dir/missing.json");
        assert!(!bucket.exists(&locator)?);
        assert!(matches!(bucket.read_bytes(&locator), Err(StorageError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_bucket_requests_inside_async_context() -> Result<(), StorageError> {
        let bucket = BucketStorage::in_memory();
        let locator = FileLocator::remote("gs://b/dir/data.bin");
        bucket.write_bytes(&locator, b"payload")?;
        assert_eq!(bucket.read_bytes(&locator)?, b"payload".to_vec());
        assert!(bucket.exists(&locator)?);
        Ok(())
    }

    #[test]
    fn test_default_bucket_backend_is_gcs() {
        assert_eq!(BucketStorage::default().backend, BucketBackend::Gcs);
        assert_eq!(BucketStorage::in_memory().backend, BucketBackend::Memory);
    }

    #[test]
    fn test_directory_diff_by_file_name() -> Result<(), StorageError> {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        touch(source.path(), "a.txt");
        touch(source.path(), "b.txt");
        touch(target.path(), "b.txt");

        let diff = directory_diff(
            &LocalStorage,
            &FileLocator::local(source.path()),
            &FileLocator::local(target.path()),
            None,
        )?;
        let names: Vec<String> = diff.iter().map(FileLocator::file_name).collect();
        assert_eq!(names, vec!["a.txt".to_string()]);
        Ok(())
    }

    #[test]
    fn test_directory_diff_rejects_mixed_forms() {
        let temp = TempDir::new().unwrap();
        let result = directory_diff(
            &Storage::default(),
            &FileLocator::local(temp.path()),
            &FileLocator::remote("gs://b/dir/"),
            None,
        );
        assert!(matches!(result, Err(StorageError::MixedForms { .. })));
    }

    #[test]
    fn test_json_round_trip_is_indented() -> Result<(), StorageError> {
        let bucket = BucketStorage::in_memory();
        let locator = FileLocator::remote("gs://b/kildedata/weather_stations_v1.json");
        let records = vec![json!({"id": "SN18700", "name": "OSLO - BLINDERN"})];
        bucket.write_json(&locator, &records)?;

        let raw = String::from_utf8(bucket.read_bytes(&locator)?).unwrap();
        assert!(raw.contains("\n        \"id\": \"SN18700\""));
        assert_eq!(bucket.read_json(&locator)?, records);
        Ok(())
    }

    #[test]
    fn test_parquet_round_trip_keeps_utc_timestamps() -> Result<(), Box<dyn std::error::Error>> {
        let temp = TempDir::new()?;
        let locator = FileLocator::local(temp.path().join("obs.parquet"));
        let utc = DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into()));
        let ts = Series::new("referenceTime".into(), [1_704_067_200_000i64]).cast(&utc)?;
        let mut df = df!("sourceId" => ["SN18700"])?;
        df.with_column(ts)?;

        LocalStorage.write_parquet(&locator, &mut df)?;
        let back = LocalStorage.read_parquet(&locator)?;
        assert_eq!(back.column("referenceTime")?.dtype(), &utc);
        assert!(back.equals(&df));
        Ok(())
    }

    #[test]
    fn test_wrong_form_is_rejected_by_backend() {
        let result = LocalStorage.read_bytes(&FileLocator::remote("gs://b/x.json"));
        assert!(matches!(result, Err(StorageError::WrongForm { .. })));
        let result = BucketStorage::in_memory().exists(&FileLocator::local("/tmp/x.json"));
        assert!(matches!(result, Err(StorageError::WrongForm { .. })));
    }
}
