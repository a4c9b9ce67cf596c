//! Per-library admission filters for discovered paths.

use std::fmt;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use regex::Regex;
use sluice_model::{DetectionRanges, Library};

use crate::error::{Result, SluiceError};

/// Compiled include/exclude rules for one library.
#[derive(Clone)]
pub struct PathFilter {
    root: std::path::PathBuf,
    include: Option<Regex>,
    exclude: Option<Regex>,
    extensions: Vec<String>,
    exclude_hidden: bool,
    detection: DetectionRanges,
}

impl fmt::Debug for PathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathFilter")
            .field("root", &self.root)
            .field("include", &self.include.as_ref().map(Regex::as_str))
            .field("exclude", &self.exclude.as_ref().map(Regex::as_str))
            .field("extensions", &self.extensions)
            .field("exclude_hidden", &self.exclude_hidden)
            .finish()
    }
}

fn compile(pattern: Option<&str>, label: &str, library: &Library) -> Result<Option<Regex>> {
    match pattern.map(str::trim).filter(|p| !p.is_empty()) {
        None => Ok(None),
        Some(pattern) => Regex::new(pattern).map(Some).map_err(|err| {
            SluiceError::InvalidConfig(format!(
                "library `{}` has an invalid {label} pattern: {err}",
                library.name
            ))
        }),
    }
}

/// Lower-case, dot-less form of a configured extension.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

impl PathFilter {
    pub fn new(library: &Library) -> Result<Self> {
        Ok(Self {
            root: library.path.clone(),
            include: compile(library.filter.as_deref(), "filter", library)?,
            exclude: compile(library.exclusion_filter.as_deref(), "exclusion filter", library)?,
            extensions: library
                .extensions
                .iter()
                .map(|ext| normalize_extension(ext))
                .filter(|ext| !ext.is_empty())
                .collect(),
            exclude_hidden: library.exclude_hidden,
            detection: library.detection,
        })
    }

    /// Any component below the library root starting with `.`.
    pub fn is_hidden(&self, path: &Path) -> bool {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components().any(|component| match component {
            Component::Normal(seg) => seg.to_string_lossy().starts_with('.'),
            _ => false,
        })
    }

    /// Name-based checks: hidden paths, regexes (against the full path) and
    /// extensions. Extensions only apply to files.
    pub fn admits_path(&self, path: &Path, is_dir: bool) -> bool {
        if self.exclude_hidden && self.is_hidden(path) {
            return false;
        }
        let full = path.to_string_lossy();
        if let Some(include) = &self.include
            && !include.is_match(&full)
        {
            return false;
        }
        if let Some(exclude) = &self.exclude
            && exclude.is_match(&full)
        {
            return false;
        }
        if !is_dir && !self.extensions.is_empty() {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if !self.extensions.contains(&ext) {
                return false;
            }
        }
        true
    }

    /// Creation-age, write-age and size checks.
    pub fn admits_detection(
        &self,
        created: DateTime<Utc>,
        written: DateTime<Utc>,
        size: u64,
        now: DateTime<Utc>,
    ) -> bool {
        let created_age = (now - created).num_minutes();
        let write_age = (now - written).num_minutes();
        let size = i64::try_from(size).unwrap_or(i64::MAX);
        self.detection.created_age_minutes.matches(created_age)
            && self.detection.write_age_minutes.matches(write_age)
            && self.detection.size_bytes.matches(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sluice_model::{DetectionRange, MatchRange};

    fn library() -> Library {
        Library::new("Movies", "/media/movies")
    }

    #[test]
    fn hidden_components_below_root_are_excluded() {
        let mut lib = library();
        lib.path = "/media/.movies".into();
        let filter = PathFilter::new(&lib).unwrap();
        assert!(!filter.is_hidden(Path::new("/media/.movies/a.mkv")));
        assert!(filter.is_hidden(Path::new("/media/.movies/.cache/a.mkv")));
        assert!(!filter.admits_path(Path::new("/media/.movies/x/.a.mkv"), false));
    }

    #[test]
    fn extensions_ignore_case_and_leading_dot() {
        let mut lib = library();
        lib.extensions = vec![".MKV".into(), "mp4".into()];
        let filter = PathFilter::new(&lib).unwrap();
        assert!(filter.admits_path(Path::new("/media/movies/a.mkv"), false));
        assert!(filter.admits_path(Path::new("/media/movies/a.MP4"), false));
        assert!(!filter.admits_path(Path::new("/media/movies/a.avi"), false));
        assert!(filter.admits_path(Path::new("/media/movies/folder"), true));
    }

    #[test]
    fn include_and_exclude_patterns_match_full_path() {
        let mut lib = library();
        lib.filter = Some(r"/movies/keep/".into());
        lib.exclusion_filter = Some(r"sample".into());
        let filter = PathFilter::new(&lib).unwrap();
        assert!(filter.admits_path(Path::new("/media/movies/keep/a.mkv"), false));
        assert!(!filter.admits_path(Path::new("/media/movies/drop/a.mkv"), false));
        assert!(!filter.admits_path(Path::new("/media/movies/keep/sample.mkv"), false));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let mut lib = library();
        lib.filter = Some("(".into());
        assert!(matches!(
            PathFilter::new(&lib),
            Err(SluiceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn detection_ranges_use_ages_in_minutes() {
        let mut lib = library();
        lib.detection.write_age_minutes = DetectionRange::new(MatchRange::GreaterThan, 10, 0);
        lib.detection.size_bytes = DetectionRange::new(MatchRange::Between, 100, 200);
        let filter = PathFilter::new(&lib).unwrap();
        let now = Utc::now();
        let old = now - Duration::minutes(30);
        assert!(filter.admits_detection(old, old, 150, now));
        assert!(!filter.admits_detection(old, now, 150, now));
        assert!(!filter.admits_detection(old, old, 250, now));
    }
}
