//! Packing downloaded pages into CBZ containers.
//!
//! A CBZ is a plain zip archive with one entry per page, named `NNN.jpg`
//! from the page number. The writer never overwrites an existing file.
//!
//! # Example
//!
//! ```no_run
//! use mango_core::chapter::DownloadedFile;
//! use mango_core::pack::{archive_cbz, cbz_filename};
//!
//! # fn example() -> Result<(), mango_core::pack::PackError> {
//! let files = vec![DownloadedFile::new(2, b"two".to_vec()), DownloadedFile::new(1, b"one".to_vec())];
//! let name = cbz_filename("One Piece", 1.0, "Romance Dawn");
//! let path = archive_cbz(std::path::Path::new("out").join(name), &files, |_| {})?;
//! println!("wrote {}", path.display());
//! # Ok(())
//! # }
//! ```

mod archive;
mod error;
mod filename;

pub use archive::{
    ChapterGroup, PackProgress, archive_cbz, archive_multiple_chapters, bundle_chapters,
    entry_name, with_cbz_extension,
};
pub use error::PackError;
pub use filename::{CBZ_EXTENSION, cbz_filename, format_chapter_number, sanitize_filename};
