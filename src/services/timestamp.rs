use crate::models::CaptureTimestamp;
use camino::Utf8Path;
use chrono::NaiveDate;
use regex::{Captures, Regex};

/// Source of capture times embedded in the picture itself (EXIF and the like).
///
/// Implementations may be slow and are allowed to fail; failure simply means
/// "unknown".
pub trait CaptureTimeSource: Send + Sync {
    fn read_capture_time(&self, path: &Utf8Path) -> Option<CaptureTimestamp>;
}

/// Works out when a picture was taken.
///
/// Tries the embedded metadata source first, then two file name patterns
/// produced by common cameras and phones:
///
/// - `YYYYMMDD_HHMMSS`, e.g. `IMG_20240101_120000.jpg` or
///   `PXL_20240101_120000123.jpg`
/// - `YYYY-MM-DD HH.MM.SS`, e.g. `2024-01-01 12.00.00.jpg`
///
/// Anything else, including impossible dates, resolves to `None`.
pub struct TimestampResolver {
    metadata: Option<Box<dyn CaptureTimeSource>>,
    compact_pattern: Regex,
    dotted_pattern: Regex,
}

impl TimestampResolver {
    /// Resolver using file names only
    pub fn new() -> Self {
        Self {
            metadata: None,
            compact_pattern: Regex::new(r"(?:^|\D)(\d{4})(\d{2})(\d{2})_(\d{2})(\d{2})(\d{2})")
                .expect("Invalid compact date regex"),
            dotted_pattern: Regex::new(r"(\d{4})-(\d{2})-(\d{2}) (\d{2})\.(\d{2})\.(\d{2})")
                .expect("Invalid dotted date regex"),
        }
    }

    /// Resolver consulting `source` before falling back to file names
    pub fn with_metadata(source: Box<dyn CaptureTimeSource>) -> Self {
        Self {
            metadata: Some(source),
            ..Self::new()
        }
    }

    pub fn resolve(&self, path: &Utf8Path) -> Option<CaptureTimestamp> {
        if let Some(source) = &self.metadata {
            if let Some(timestamp) = source.read_capture_time(path) {
                return Some(timestamp);
            }
        }

        let resolved = path
            .file_name()
            .and_then(|name| self.resolve_from_file_name(name));
        if resolved.is_none() {
            tracing::debug!("No capture time found for {}", path);
        }
        resolved
    }

    pub fn resolve_from_file_name(&self, file_name: &str) -> Option<CaptureTimestamp> {
        self.compact_pattern
            .captures(file_name)
            .and_then(|caps| timestamp_from_captures(&caps))
            .or_else(|| {
                self.dotted_pattern
                    .captures(file_name)
                    .and_then(|caps| timestamp_from_captures(&caps))
            })
    }
}

impl Default for TimestampResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn timestamp_from_captures(caps: &Captures<'_>) -> Option<CaptureTimestamp> {
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let year = i32::try_from(field(1)?).ok()?;
    NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?
        .and_hms_opt(field(4)?, field(5)?, field(6)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> CaptureTimestamp {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_compact_pattern() {
        let resolver = TimestampResolver::new();
        assert_eq!(
            resolver.resolve_from_file_name("IMG_20240101_120000.jpg"),
            Some(at(2024, 1, 1, 12, 0, 0))
        );
        assert_eq!(
            resolver.resolve_from_file_name("PXL_20230715_093012345.jpg"),
            Some(at(2023, 7, 15, 9, 30, 12))
        );
        assert_eq!(
            resolver.resolve_from_file_name("20221231_235959.png"),
            Some(at(2022, 12, 31, 23, 59, 59))
        );
    }

    #[test]
    fn test_dotted_pattern() {
        let resolver = TimestampResolver::new();
        assert_eq!(
            resolver.resolve_from_file_name("2024-03-05 18.45.10.jpg"),
            Some(at(2024, 3, 5, 18, 45, 10))
        );
    }

    #[test]
    fn test_unknown_and_invalid_names() {
        let resolver = TimestampResolver::new();
        assert_eq!(resolver.resolve_from_file_name("DSC0001.jpg"), None);
        assert_eq!(resolver.resolve_from_file_name("IMG_20241345_120000.jpg"), None);
        assert_eq!(resolver.resolve_from_file_name("2024-02-30 10.00.00.jpg"), None);
    }

    #[test]
    fn test_metadata_source_wins() {
        struct Fixed;
        impl CaptureTimeSource for Fixed {
            fn read_capture_time(&self, _path: &Utf8Path) -> Option<CaptureTimestamp> {
                Some(NaiveDate::from_ymd_opt(2000, 1, 1)?.and_hms_opt(0, 0, 0)?)
            }
        }

        let resolver = TimestampResolver::with_metadata(Box::new(Fixed));
        assert_eq!(
            resolver.resolve(Utf8Path::new("/photos/IMG_20240101_120000.jpg")),
            Some(at(2000, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_falls_back_to_file_name() {
        struct Empty;
        impl CaptureTimeSource for Empty {
            fn read_capture_time(&self, _path: &Utf8Path) -> Option<CaptureTimestamp> {
                None
            }
        }

        let resolver = TimestampResolver::with_metadata(Box::new(Empty));
        assert_eq!(
            resolver.resolve(Utf8Path::new("/photos/IMG_20240101_120000.jpg")),
            Some(at(2024, 1, 1, 12, 0, 0))
        );
    }
}
