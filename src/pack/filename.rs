//! Container naming.
//!
//! Pure functions: no filesystem access happens here.

/// Characters replaced by `_` when building file names.
const INVALID_FILENAME_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Maximum length of a sanitized name component, in characters.
const MAX_COMPONENT_CHARS: usize = 200;

/// Canonical container extension, without the dot.
pub const CBZ_EXTENSION: &str = "cbz";

/// Builds the container file name for one chapter.
///
/// Integral chapter numbers render without a decimal point, others with one
/// decimal digit. The chapter title is appended only when non-empty.
///
/// ```
/// use mango_core::pack::cbz_filename;
///
/// assert_eq!(
///     cbz_filename("One Piece", 1.0, "Romance Dawn"),
///     "One Piece - Chapter 1 - Romance Dawn.cbz"
/// );
/// assert_eq!(cbz_filename("X", 1.5, ""), "X - Chapter 1.5.cbz");
/// ```
#[must_use]
pub fn cbz_filename(title: &str, chapter_number: f64, chapter_title: &str) -> String {
    let mut name = format!(
        "{} - Chapter {}",
        sanitize_filename(title),
        format_chapter_number(chapter_number)
    );

    if !chapter_title.is_empty() {
        name.push_str(" - ");
        name.push_str(&sanitize_filename(chapter_title));
    }

    name.push('.');
    name.push_str(CBZ_EXTENSION);
    name
}

/// Replaces characters that are invalid in file names, trims trailing
/// spaces and periods, and truncates to 200 characters.
///
/// ```
/// use mango_core::pack::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Manga: Test/Title"), "Manga_ Test_Title");
/// ```
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect();

    replaced
        .trim_end_matches([' ', '.'])
        .chars()
        .take(MAX_COMPONENT_CHARS)
        .collect()
}

/// Formats a chapter number: `1` for integral values, `1.5` otherwise.
#[must_use]
pub fn format_chapter_number(number: f64) -> String {
    if number.fract() == 0.0 {
        format!("{number:.0}")
    } else {
        format!("{number:.1}")
    }
}
