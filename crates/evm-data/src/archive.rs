//! Archival of written files to durable storage.
//!
//! Objects are keyed `year=<YYYY>/<MM>/<DD>/<filename>`. A destination is
//! either a local directory or a Google Cloud Storage bucket
//! (`gs://bucket/prefix`); both are served through [`ObjectStore`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use eyre::{bail, eyre, Context, Result};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, RetryConfig, WriteMultipart};
use reqwest::Url;
use tokio::io::AsyncReadExt;

/// Part size of multipart uploads.
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Parts buffered or in flight at once.
const MAX_IN_FLIGHT_PARTS: usize = 4;

/// Date-partitioned object key for `filename`.
pub fn partition_key(filename: &str, date: NaiveDate) -> String {
    format!(
        "year={}/{:02}/{:02}/{}",
        date.year(),
        date.month(),
        date.day(),
        filename
    )
}

/// Where collected files are archived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    Local(PathBuf),
    Gcs { bucket: String, prefix: String },
}

impl Destination {
    /// Parses `gs://bucket[/prefix]`, `file:///dir` or a bare filesystem path.
    ///
    /// Only strings containing `://` are treated as URLs, so drive-letter
    /// paths such as `C:\archive` stay local.
    ///
    /// # Errors
    /// Returns error for URL schemes other than `gs` and `file`.
    pub fn parse(destination: &str) -> Result<Self> {
        if !destination.contains("://") {
            return Ok(Destination::Local(PathBuf::from(destination)));
        }

        let url = Url::parse(destination)
            .wrap_err_with(|| format!("invalid archive destination - {destination}"))?;
        match url.scheme() {
            "gs" => {
                let bucket = url
                    .host_str()
                    .ok_or_else(|| eyre!("bucket is missing in {destination}"))?
                    .to_string();
                let prefix = url.path().trim_matches('/').to_string();
                Ok(Destination::Gcs { bucket, prefix })
            }
            "file" => {
                let root = url
                    .to_file_path()
                    .map_err(|_| eyre!("invalid file URL {destination}"))?;
                Ok(Destination::Local(root))
            }
            scheme => bail!("unsupported archive scheme - {scheme}"),
        }
    }
}

/// Opens the archive named by `destination`.
///
/// GCS credentials come from the environment: `GOOGLE_SERVICE_ACCOUNT` /
/// `GOOGLE_APPLICATION_CREDENTIALS`, then application default credentials,
/// then the instance metadata server.
pub async fn create_archive(destination: &str) -> Result<Archive> {
    Archive::open(Destination::parse(destination)?).await
}

/// An [`ObjectStore`] plus the destination it was opened for.
#[derive(Debug)]
pub struct Archive {
    store: Arc<dyn ObjectStore>,
    destination: Destination,
}

impl Archive {
    pub fn new(store: Arc<dyn ObjectStore>, destination: Destination) -> Self {
        Self { store, destination }
    }

    /// Builds the store for `destination`, creating a local root if needed.
    pub async fn open(destination: Destination) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match &destination {
            Destination::Local(root) => {
                tokio::fs::create_dir_all(root)
                    .await
                    .wrap_err_with(|| format!("failed to create archive directory: {}", root.display()))?;
                Arc::new(
                    LocalFileSystem::new_with_prefix(root)
                        .wrap_err_with(|| format!("failed to open archive directory: {}", root.display()))?,
                )
            }
            Destination::Gcs { bucket, .. } => Arc::new(
                GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .with_retry(RetryConfig::default())
                    .build()
                    .wrap_err_with(|| format!("failed to configure GCS client for bucket {bucket}"))?,
            ),
        };
        Ok(Self::new(store, destination))
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Object path for `key`, including the destination prefix.
    pub fn object_path(&self, key: &str) -> ObjectPath {
        match &self.destination {
            Destination::Gcs { prefix, .. } if !prefix.is_empty() => {
                ObjectPath::from(format!("{prefix}/{key}"))
            }
            _ => ObjectPath::from(key),
        }
    }

    fn location(&self, object: &ObjectPath) -> String {
        match &self.destination {
            Destination::Local(root) => root.join(object.as_ref()).display().to_string(),
            Destination::Gcs { bucket, .. } => format!("gs://{bucket}/{object}"),
        }
    }

    /// Streams `local` to the archive under `key` as a multipart upload and
    /// returns the object location. A failed upload is aborted.
    #[tracing::instrument(skip(self), fields(local = %local.display()))]
    pub async fn upload(&self, local: &Path, key: &str) -> Result<String> {
        let object = self.object_path(key);
        let mut file = tokio::fs::File::open(local)
            .await
            .wrap_err_with(|| format!("failed to open {}", local.display()))?;

        let upload = self
            .store
            .put_multipart(&object)
            .await
            .wrap_err_with(|| format!("failed to start upload of {object}"))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, UPLOAD_CHUNK_SIZE);

        let bytes = match copy_into(&mut file, &mut writer).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    tracing::warn!(object = %object, error = %abort, "failed to abort upload");
                }
                return Err(e.wrap_err(format!("failed to upload {}", local.display())));
            }
        };
        writer
            .finish()
            .await
            .wrap_err_with(|| format!("failed to complete upload of {object}"))?;

        let location = self.location(&object);
        tracing::info!(location = %location, bytes, "file archived");
        Ok(location)
    }
}

async fn copy_into(file: &mut tokio::fs::File, writer: &mut WriteMultipart) -> Result<u64> {
    let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        writer.wait_for_capacity(MAX_IN_FLIGHT_PARTS).await?;
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write(&buf[..n]);
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[test]
    fn partition_key_pads_month_and_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(
            partition_key("ethereum_transactions_20240307120000.parquet", date),
            "year=2024/03/07/ethereum_transactions_20240307120000.parquet"
        );
    }

    #[test]
    fn gs_destination_parses_bucket_and_prefix() {
        assert_eq!(
            Destination::parse("gs://evm_data/raw/tx/").unwrap(),
            Destination::Gcs {
                bucket: "evm_data".into(),
                prefix: "raw/tx".into()
            }
        );
        assert_eq!(
            Destination::parse("gs://evm_data").unwrap(),
            Destination::Gcs {
                bucket: "evm_data".into(),
                prefix: String::new()
            }
        );
    }

    #[test]
    fn paths_and_file_urls_are_local() {
        assert_eq!(
            Destination::parse("/var/lib/archive").unwrap(),
            Destination::Local(PathBuf::from("/var/lib/archive"))
        );
        assert_eq!(
            Destination::parse("archive/out").unwrap(),
            Destination::Local(PathBuf::from("archive/out"))
        );
        assert!(matches!(
            Destination::parse("file:///var/lib/archive").unwrap(),
            Destination::Local(_)
        ));
    }

    #[test]
    fn drive_letter_path_is_local() {
        assert_eq!(
            Destination::parse(r"C:\archive").unwrap(),
            Destination::Local(PathBuf::from(r"C:\archive"))
        );
        assert_eq!(
            Destination::parse("D:/data/archive").unwrap(),
            Destination::Local(PathBuf::from("D:/data/archive"))
        );
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        assert!(Destination::parse("s3://bucket/path").is_err());
    }

    #[tokio::test]
    async fn upload_writes_prefixed_object() {
        let source_dir = tempfile::tempdir().expect("create temp dir");
        let source = source_dir.path().join("tx.parquet");
        tokio::fs::write(&source, b"parquet bytes").await.expect("write source");

        let store = Arc::new(InMemory::new());
        let archive = Archive::new(
            store.clone(),
            Destination::Gcs {
                bucket: "evm_data".into(),
                prefix: "raw/tx".into(),
            },
        );
        let key = partition_key("tx.parquet", NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());

        let location = archive.upload(&source, &key).await.expect("upload");

        assert_eq!(location, "gs://evm_data/raw/tx/year=2024/03/07/tx.parquet");
        let stored = store
            .get(&ObjectPath::from("raw/tx/year=2024/03/07/tx.parquet"))
            .await
            .expect("object exists")
            .bytes()
            .await
            .expect("read object");
        assert_eq!(stored.as_ref(), b"parquet bytes");
    }

    #[tokio::test]
    async fn local_archive_copies_into_partition() {
        let source_dir = tempfile::tempdir().expect("create temp dir");
        let archive_dir = tempfile::tempdir().expect("create temp dir");
        let source = source_dir.path().join("tx.parquet");
        tokio::fs::write(&source, b"parquet bytes").await.expect("write source");

        let root = archive_dir.path().join("nested");
        let archive = create_archive(root.to_str().unwrap())
            .await
            .expect("open local archive");
        let key = partition_key("tx.parquet", NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        let location = archive.upload(&source, &key).await.expect("upload");

        let archived = root.join("year=2024/12/31/tx.parquet");
        assert_eq!(location, archived.display().to_string());
        assert_eq!(tokio::fs::read(&archived).await.expect("read"), b"parquet bytes");
    }

    #[tokio::test]
    async fn upload_of_missing_file_fails() {
        let store = Arc::new(InMemory::new());
        let archive = Archive::new(store.clone(), Destination::Local(PathBuf::from("unused")));

        let result = archive.upload(Path::new("/nonexistent/file.parquet"), "k").await;

        assert!(result.is_err());
        assert!(store.get(&ObjectPath::from("k")).await.is_err());
    }
}
