//! Artifact store client: download, extract and locate schema documents.
//!
//! An archive is fetched from Google Cloud Storage (`gs://`) or over
//! HTTP(S), streamed to `<work>/schemas/<version>.tar.gz`, then unpacked
//! into a fresh directory. Extraction refuses any entry that would land
//! outside that directory.

use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::{Stream, StreamExt};
use object_store::ObjectStore;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use tar::{Archive, EntryType};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{BackendError, TapError, TapResult};
use crate::source::ArtifactSource;

/// Write buffer size for downloads.
pub const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Overall timeout for one HTTP download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Extension of schema document files.
pub const DOCUMENT_EXTENSION: &str = "yaml";

/// Location of the documents below the archive's top-level directory.
pub const SCHEMA_SUBDIR: &str = "python/lsst/sdm/schemas";

/// Provides the directory of schema documents for a version.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Resolve `template` for `version`, fetch and unpack the archive below
    /// `work_dir` and return the document directory.
    async fn fetch(&self, version: &str, template: &str, work_dir: &Path) -> TapResult<PathBuf>;
}

/// Downloads schema archives over HTTP(S) or from GCS.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    http: reqwest::Client,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl ArtifactStore {
    pub fn new() -> TapResult<Self> {
        Self::with_timeout(DOWNLOAD_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> TapResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TapError::HttpClient)?;
        Ok(Self {
            http,
            object_store: None,
        })
    }

    /// Serve `gs://` URLs from `store` instead of building a GCS client
    /// from the environment.
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    async fn download(&self, source: &ArtifactSource, version: &str, dest: &Path) -> TapResult<()> {
        let url = source.url();
        let failed = |e: BackendError| TapError::Download {
            url: url.clone(),
            version: version.to_string(),
            source: e,
        };

        match source {
            ArtifactSource::Http { url: http_url } => {
                let response = self
                    .http
                    .get(http_url.clone())
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| failed(e.into()))?;
                write_stream(response.bytes_stream(), dest, failed).await
            }
            ArtifactSource::Gcs { bucket, object } => {
                let store = match &self.object_store {
                    Some(store) => Arc::clone(store),
                    None => Arc::new(
                        GoogleCloudStorageBuilder::from_env()
                            .with_bucket_name(bucket)
                            .build()
                            .map_err(|e| failed(e.into()))?,
                    ),
                };
                let result = store
                    .get(&ObjectPath::from(object.as_str()))
                    .await
                    .map_err(|e| failed(e.into()))?;
                write_stream(result.into_stream(), dest, failed).await
            }
        }
    }
}

async fn write_stream<S, E, F>(stream: S, dest: &Path, failed: F) -> TapResult<()>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BackendError>,
    F: Fn(BackendError) -> TapError,
{
    let file = tokio::fs::File::create(dest).await.map_err(TapError::io(dest))?;
    let mut writer = BufWriter::with_capacity(DOWNLOAD_CHUNK_SIZE, file);
    let mut stream = std::pin::pin!(stream);
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| failed(e.into()))?;
        writer.write_all(&chunk).await.map_err(TapError::io(dest))?;
        written += chunk.len() as u64;
    }
    writer.flush().await.map_err(TapError::io(dest))?;
    debug!(path = %dest.display(), bytes = written, "archive written");
    Ok(())
}

#[async_trait]
impl SchemaSource for ArtifactStore {
    async fn fetch(&self, version: &str, template: &str, work_dir: &Path) -> TapResult<PathBuf> {
        // Rejects unsupported schemes before any network activity.
        let source = ArtifactSource::resolve(template, version)?;

        let archive_dir = work_dir.join("schemas");
        tokio::fs::create_dir_all(&archive_dir)
            .await
            .map_err(TapError::io(&archive_dir))?;
        let stem = file_stem(version);
        let archive = archive_dir.join(format!("{stem}.tar.gz"));

        info!(version, url = %source.url(), "downloading schema archive");
        self.download(&source, version, &archive).await?;

        let target = work_dir.join("extracted").join(&stem);
        if tokio::fs::try_exists(&target).await.map_err(TapError::io(&target))? {
            tokio::fs::remove_dir_all(&target).await.map_err(TapError::io(&target))?;
        }
        tokio::fs::create_dir_all(&target).await.map_err(TapError::io(&target))?;

        let (src, dst) = (archive.clone(), target.clone());
        tokio::task::spawn_blocking(move || extract_archive(&src, &dst))
            .await
            .map_err(|e| TapError::Extraction {
                archive: archive.clone(),
                reason: e.to_string(),
            })??;

        let dir = locate_schema_directory(&target)?;
        info!(version, path = %dir.display(), "schema documents ready");
        Ok(dir)
    }
}

/// Version tag made safe for use as a file name.
fn file_stem(version: &str) -> String {
    version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

/// Unpack a gzip-compressed tar archive into `dest`.
///
/// Every entry must stay inside `dest`. Entry paths and link targets are
/// resolved against what is already on disk, following links extracted
/// earlier, so a chain of links cannot climb out either. Once unpacked,
/// every symlink in the tree is checked again.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> TapResult<()> {
    let file = File::open(archive_path).map_err(TapError::io(archive_path))?;
    let fail = |reason: String| TapError::Extraction {
        archive: archive_path.to_path_buf(),
        reason,
    };
    let root = dest.canonicalize().map_err(TapError::io(dest))?;

    let mut archive = Archive::new(GzDecoder::new(file));
    let entries = archive.entries().map_err(|e| fail(e.to_string()))?;
    let mut count = 0usize;
    for entry in entries {
        let mut entry = entry.map_err(|e| fail(e.to_string()))?;
        let path = entry.path().map_err(|e| fail(e.to_string()))?.into_owned();
        if resolve_inside(&root, &path).is_none() {
            return Err(fail(format!("entry escapes extraction directory: {}", path.display())));
        }

        let kind = entry.header().entry_type();
        if matches!(kind, EntryType::Symlink | EntryType::Link) {
            let target = entry
                .link_name()
                .map_err(|e| fail(e.to_string()))?
                .ok_or_else(|| fail(format!("link without target: {}", path.display())))?
                .into_owned();
            // Symlink targets resolve from the link's directory, hard links
            // from the archive root.
            let resolved = match kind {
                EntryType::Symlink => {
                    resolve_inside(&root, &path.parent().unwrap_or(Path::new("")).join(&target))
                }
                _ => resolve_inside(&root, &target),
            };
            if resolved.is_none() {
                return Err(fail(format!(
                    "link {} points outside extraction directory: {}",
                    path.display(),
                    target.display()
                )));
            }
        }

        let unpacked = entry.unpack_in(dest).map_err(|e| fail(e.to_string()))?;
        if !unpacked {
            return Err(fail(format!("entry escapes extraction directory: {}", path.display())));
        }
        count += 1;
    }

    for entry in WalkDir::new(&root) {
        let entry = entry.map_err(|e| fail(e.to_string()))?;
        if !entry.path_is_symlink() {
            continue;
        }
        // Dangling links cannot expose anything and are left alone.
        if let Ok(target) = entry.path().canonicalize() {
            if !target.starts_with(&root) {
                return Err(fail(format!(
                    "link {} resolves outside extraction directory",
                    entry.path().display()
                )));
            }
        }
    }
    debug!(archive = %archive_path.display(), entries = count, "archive extracted");
    Ok(())
}

/// Resolve `relative` against the canonical directory `root`, following
/// symlinks that already exist on disk.
///
/// Returns `None` as soon as a step leaves `root`, or for absolute paths.
/// Components that do not exist yet are appended as they are.
fn resolve_inside(root: &Path, relative: &Path) -> Option<PathBuf> {
    let mut current = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
            }
            Component::Normal(name) => {
                current.push(name);
                if current.symlink_metadata().is_ok() {
                    current = current.canonicalize().ok()?;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
        if !current.starts_with(root) {
            return None;
        }
    }
    Some(current)
}

/// Find the document directory inside an extracted archive.
///
/// The archive's first top-level directory (by name) must contain
/// `python/lsst/sdm/schemas` with at least one document, and the directory
/// must really live below `root`.
pub fn locate_schema_directory(root: &Path) -> TapResult<PathBuf> {
    let mut top_level = Vec::new();
    for entry in std::fs::read_dir(root).map_err(TapError::io(root))? {
        let entry = entry.map_err(TapError::io(root))?;
        if entry.file_type().map_err(TapError::io(entry.path()))?.is_dir() {
            top_level.push(entry.path());
        }
    }
    top_level.sort();

    let Some(first) = top_level.into_iter().next() else {
        return Err(TapError::Directory {
            path: root.to_path_buf(),
            reason: "archive has no top-level directory".to_string(),
        });
    };

    let dir = first.join(SCHEMA_SUBDIR);
    if !dir.is_dir() {
        return Err(TapError::Directory {
            path: dir,
            reason: "schema directory not found".to_string(),
        });
    }
    let canonical_root = root.canonicalize().map_err(TapError::io(root))?;
    if !dir.canonicalize().map_err(TapError::io(&dir))?.starts_with(&canonical_root) {
        return Err(TapError::Directory {
            path: dir,
            reason: "schema directory resolves outside the archive".to_string(),
        });
    }
    if list_documents(&dir)?.is_empty() {
        return Err(TapError::Directory {
            path: dir,
            reason: format!("no .{DOCUMENT_EXTENSION} schema documents"),
        });
    }
    Ok(dir)
}

/// Names of the documents in `dir`, without extension, sorted.
pub fn list_documents(dir: &Path) -> TapResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(TapError::io(dir))? {
        let path = entry.map_err(TapError::io(dir))?.path();
        if !path.is_file() || !path.extension().is_some_and(|ext| ext == DOCUMENT_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem() {
            names.push(stem.to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
