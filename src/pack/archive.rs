//! CBZ container writer.
//!
//! All three entry points are synchronous; async callers should run them on
//! a blocking thread.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use zip::ZipWriter;
use zip::write::FileOptions;

use super::error::PackError;
use super::filename::{CBZ_EXTENSION, cbz_filename};
use crate::chapter::DownloadedFile;

/// One entry written, as seen by the packing progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackProgress {
    /// Page number of the entry just written.
    pub page: u32,
    /// Entries written so far in this operation, including this one.
    pub written: usize,
    /// Entries this operation will write in total.
    pub total: usize,
}

/// Files of one chapter plus the metadata used to name its container.
#[derive(Debug, Clone)]
pub struct ChapterGroup {
    /// Series title.
    pub title: String,
    /// Chapter number.
    pub number: f64,
    /// Downloaded pages, in any order.
    pub files: Vec<DownloadedFile>,
}

/// Entry name for a page: three-digit zero-padded page number plus `.jpg`.
#[must_use]
pub fn entry_name(page: u32) -> String {
    format!("{page:03}.jpg")
}

/// Appends `.cbz` unless the path already ends with it (any case).
#[must_use]
pub fn with_cbz_extension(path: &Path) -> PathBuf {
    let has_extension = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(CBZ_EXTENSION));
    if has_extension {
        return path.to_path_buf();
    }

    let mut raw = OsString::from(path.as_os_str());
    raw.push(".");
    raw.push(CBZ_EXTENSION);
    PathBuf::from(raw)
}

/// Writes `files` into a new CBZ container at `path`.
///
/// Entries are named from each file's page number and written in ascending
/// page order, whatever the order of `files`. `progress` is called once per
/// entry written.
///
/// Returns the final path (with the `.cbz` extension applied).
///
/// # Errors
///
/// - [`PackError::NothingToPack`] if `files` is empty
/// - [`PackError::AlreadyExists`] if the destination exists; it is not modified
/// - [`PackError::CreateDir`] / [`PackError::CreateFile`] on filesystem failures
/// - [`PackError::CreateEntry`] / [`PackError::Write`] / [`PackError::Finish`]
///   while writing; the partially written container is removed
#[instrument(skip(files, progress), fields(path = %path.as_ref().display(), files = files.len()))]
pub fn archive_cbz<P, F>(path: P, files: &[DownloadedFile], mut progress: F) -> Result<PathBuf, PackError>
where
    P: AsRef<Path>,
    F: FnMut(PackProgress),
{
    if files.is_empty() {
        return Err(PackError::NothingToPack);
    }

    let path = with_cbz_extension(path.as_ref());

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| PackError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|source| {
            if source.kind() == ErrorKind::AlreadyExists {
                PackError::AlreadyExists { path: path.clone() }
            } else {
                PackError::CreateFile {
                    path: path.clone(),
                    source,
                }
            }
        })?;

    // The file is ours from here on; do not leave a truncated container behind.
    if let Err(error) = write_entries(file, &path, files, &mut progress) {
        if let Err(remove_error) = fs::remove_file(&path) {
            warn!(error = %remove_error, "failed to remove partial archive");
        }
        return Err(error);
    }

    info!(entries = files.len(), "archive written");
    Ok(path)
}

fn write_entries<F>(
    file: File,
    path: &Path,
    files: &[DownloadedFile],
    progress: &mut F,
) -> Result<(), PackError>
where
    F: FnMut(PackProgress),
{
    let mut ordered: Vec<&DownloadedFile> = files.iter().collect();
    ordered.sort_by_key(|file| file.page);

    let total = ordered.len();
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default();

    for (written, file) in (1..).zip(ordered) {
        let entry = entry_name(file.page);

        zip.start_file(entry.as_str(), options)
            .map_err(|source| PackError::CreateEntry {
                path: path.to_path_buf(),
                entry: entry.clone(),
                source,
            })?;
        zip.write_all(&file.data).map_err(|source| PackError::Write {
            path: path.to_path_buf(),
            entry: entry.clone(),
            source,
        })?;

        debug!(entry = %entry, bytes = file.data.len(), "entry written");
        progress(PackProgress {
            page: file.page,
            written,
            total,
        });
    }

    zip.finish().map_err(|source| PackError::Finish {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Writes every chapter's files into one container.
///
/// Entries are not namespaced by chapter: callers must renumber pages so
/// they are unique across chapters before calling.
///
/// # Errors
///
/// [`PackError::NoChapters`] if `chapters` is empty,
/// [`PackError::NothingToPack`] if every chapter is empty, otherwise as
/// [`archive_cbz`].
#[instrument(skip(chapters, progress), fields(path = %path.as_ref().display(), chapters = chapters.len()))]
pub fn bundle_chapters<P, F>(
    path: P,
    chapters: &BTreeMap<String, Vec<DownloadedFile>>,
    progress: F,
) -> Result<PathBuf, PackError>
where
    P: AsRef<Path>,
    F: FnMut(PackProgress),
{
    if chapters.is_empty() {
        return Err(PackError::NoChapters);
    }

    let all_files: Vec<DownloadedFile> = chapters.values().flatten().cloned().collect();
    if all_files.is_empty() {
        return Err(PackError::NothingToPack);
    }

    archive_cbz(path, &all_files, progress)
}

/// Writes one container per chapter group into `base_dir`, named with
/// [`cbz_filename`] (without a chapter title).
///
/// Groups with no files are skipped. A failing group does not stop the
/// others; once every group was attempted the first failure is returned.
/// `progress` reports a running entry count across all groups.
///
/// Returns the containers written, in key order.
///
/// # Errors
///
/// [`PackError::NoChapters`] if `chapters` is empty, [`PackError::CreateDir`]
/// if `base_dir` cannot be created, otherwise the first [`PackError::Group`].
#[instrument(skip(chapters, progress), fields(base_dir = %base_dir.as_ref().display(), chapters = chapters.len()))]
pub fn archive_multiple_chapters<P, F>(
    base_dir: P,
    chapters: &BTreeMap<String, ChapterGroup>,
    mut progress: F,
) -> Result<Vec<PathBuf>, PackError>
where
    P: AsRef<Path>,
    F: FnMut(PackProgress),
{
    if chapters.is_empty() {
        return Err(PackError::NoChapters);
    }

    let base_dir = base_dir.as_ref();
    fs::create_dir_all(base_dir).map_err(|source| PackError::CreateDir {
        path: base_dir.to_path_buf(),
        source,
    })?;

    let total: usize = chapters.values().map(|group| group.files.len()).sum();
    let mut processed = 0usize;
    let mut written_paths = Vec::with_capacity(chapters.len());
    let mut first_error: Option<PackError> = None;

    for (key, group) in chapters {
        if group.files.is_empty() {
            debug!(chapter = %key, "skipping empty chapter");
            continue;
        }

        let path = base_dir.join(cbz_filename(&group.title, group.number, ""));
        let offset = processed;
        let result = archive_cbz(&path, &group.files, |event| {
            progress(PackProgress {
                page: event.page,
                written: offset + event.written,
                total,
            });
        });
        processed += group.files.len();

        match result {
            Ok(path) => written_paths.push(path),
            Err(error) => {
                warn!(chapter = %key, error = %error, "failed to archive chapter");
                if first_error.is_none() {
                    first_error = Some(PackError::Group {
                        key: key.clone(),
                        source: Box::new(error),
                    });
                }
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(written_paths),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Read;

    use tempfile::TempDir;

    use super::*;

    fn page(page: u32, data: &str) -> DownloadedFile {
        DownloadedFile::new(page, data.as_bytes().to_vec())
    }

    fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (entry.name().to_string(), data)
            })
            .collect()
    }

    #[test]
    fn test_entry_name_is_zero_padded() {
        assert_eq!(entry_name(1), "001.jpg");
        assert_eq!(entry_name(42), "042.jpg");
        assert_eq!(entry_name(1234), "1234.jpg");
    }

    #[test]
    fn test_with_cbz_extension() {
        assert_eq!(with_cbz_extension(Path::new("a/b")), PathBuf::from("a/b.cbz"));
        assert_eq!(with_cbz_extension(Path::new("a/b.CBZ")), PathBuf::from("a/b.CBZ"));
        assert_eq!(with_cbz_extension(Path::new("v1.5")), PathBuf::from("v1.5.cbz"));
    }

    #[test]
    fn test_archive_orders_entries_by_page() {
        let dir = TempDir::new().unwrap();
        let files = vec![page(1, "A"), page(3, "B"), page(2, "C")];

        let mut events = Vec::new();
        let path = archive_cbz(dir.path().join("chapter"), &files, |p| events.push(p)).unwrap();

        assert_eq!(path, dir.path().join("chapter.cbz"));
        let entries = read_entries(&path);
        assert_eq!(
            entries,
            vec![
                ("001.jpg".to_string(), b"A".to_vec()),
                ("002.jpg".to_string(), b"C".to_vec()),
                ("003.jpg".to_string(), b"B".to_vec()),
            ]
        );
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].written, 3);
        assert_eq!(events[2].total, 3);
    }

    #[test]
    fn test_archive_empty_is_nothing_to_pack() {
        let dir = TempDir::new().unwrap();
        let result = archive_cbz(dir.path().join("x.cbz"), &[], |_| {});
        assert!(matches!(result, Err(PackError::NothingToPack)));
        assert!(!dir.path().join("x.cbz").exists());
    }

    #[test]
    fn test_archive_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("taken.cbz");
        fs::write(&target, b"original").unwrap();

        let result = archive_cbz(&target, &[page(1, "new")], |_| {});

        assert!(matches!(result, Err(PackError::AlreadyExists { .. })));
        assert_eq!(fs::read(&target).unwrap(), b"original");
    }

    #[test]
    fn test_archive_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/deeper/out.cbz");

        archive_cbz(&target, &[page(1, "x")], |_| {}).unwrap();

        assert!(target.exists());
    }

    #[test]
    fn test_archive_reports_dir_creation_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a dir").unwrap();

        let result = archive_cbz(blocker.join("out.cbz"), &[page(1, "x")], |_| {});

        assert!(matches!(result, Err(PackError::CreateDir { .. })));
    }

    #[test]
    fn test_bundle_flattens_groups() {
        let dir = TempDir::new().unwrap();
        let mut chapters = BTreeMap::new();
        chapters.insert("1".to_string(), vec![page(1, "a"), page(2, "b")]);
        chapters.insert("2".to_string(), vec![page(4, "d"), page(3, "c")]);

        let path = bundle_chapters(dir.path().join("bundle"), &chapters, |_| {}).unwrap();

        let names: Vec<String> = read_entries(&path).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["001.jpg", "002.jpg", "003.jpg", "004.jpg"]);
    }

    #[test]
    fn test_bundle_rejects_empty_input() {
        let dir = TempDir::new().unwrap();

        let none = BTreeMap::new();
        assert!(matches!(
            bundle_chapters(dir.path().join("b"), &none, |_| {}),
            Err(PackError::NoChapters)
        ));

        let mut empty_groups = BTreeMap::new();
        empty_groups.insert("1".to_string(), Vec::new());
        assert!(matches!(
            bundle_chapters(dir.path().join("b"), &empty_groups, |_| {}),
            Err(PackError::NothingToPack)
        ));
    }

    #[test]
    fn test_multiple_chapters_writes_one_container_each() {
        let dir = TempDir::new().unwrap();
        let mut chapters = BTreeMap::new();
        chapters.insert(
            "1".to_string(),
            ChapterGroup {
                title: "Series".to_string(),
                number: 1.0,
                files: vec![page(1, "a")],
            },
        );
        chapters.insert(
            "1.5".to_string(),
            ChapterGroup {
                title: "Series".to_string(),
                number: 1.5,
                files: vec![page(1, "b"), page(2, "c")],
            },
        );
        chapters.insert(
            "2".to_string(),
            ChapterGroup {
                title: "Series".to_string(),
                number: 2.0,
                files: Vec::new(),
            },
        );

        let mut last = None;
        let paths = archive_multiple_chapters(dir.path(), &chapters, |p| last = Some(p)).unwrap();

        assert_eq!(
            paths,
            vec![
                dir.path().join("Series - Chapter 1.cbz"),
                dir.path().join("Series - Chapter 1.5.cbz"),
            ]
        );
        assert!(!dir.path().join("Series - Chapter 2.cbz").exists());
        let last = last.unwrap();
        assert_eq!(last.written, 3);
        assert_eq!(last.total, 3);
    }

    #[test]
    fn test_multiple_chapters_continues_after_failure_and_returns_first_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Series - Chapter 1.cbz"), b"existing").unwrap();

        let mut chapters = BTreeMap::new();
        for number in [1.0, 2.0] {
            chapters.insert(
                format!("{number}"),
                ChapterGroup {
                    title: "Series".to_string(),
                    number,
                    files: vec![page(1, "x")],
                },
            );
        }

        let error = archive_multiple_chapters(dir.path(), &chapters, |_| {}).unwrap_err();

        assert!(error.is_already_exists());
        assert!(matches!(error, PackError::Group { ref key, .. } if key == "1"));
        assert!(dir.path().join("Series - Chapter 2.cbz").exists());
    }

    #[test]
    fn test_multiple_chapters_rejects_empty_map() {
        let dir = TempDir::new().unwrap();
        let result = archive_multiple_chapters(dir.path(), &BTreeMap::new(), |_| {});
        assert!(matches!(result, Err(PackError::NoChapters)));
    }
}
