use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Moment a picture was taken, as read from metadata or guessed from its name.
pub type CaptureTimestamp = NaiveDateTime;

/// All records of one session, keyed by file name.
///
/// Iteration order is the display order: once a folder has been resolved the
/// map is sorted so that position `i` holds the record whose `index` is `i`.
pub type RecordMap = IndexMap<String, ImageRecord>;

/// A decoded picture, ready to be displayed.
///
/// Pixels are tightly packed RGBA8 rows. Dropping the value releases the
/// buffer immediately.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Size of the pixel buffer in bytes
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Everything the session knows about one picture file.
///
/// The decoded image slot is owned by the record but only ever filled or
/// emptied by [`SessionCache`](crate::services::SessionCache). A record holds
/// a decoded image if and only if the cache lists it as resident.
#[derive(Debug)]
pub struct ImageRecord {
    /// Base name, unique within the session
    pub file_name: String,

    /// Session folder joined with `file_name`; derived, never persisted
    pub full_path: Utf8PathBuf,

    /// Position in the sorted session, `None` until sorting has run
    pub index: Option<u32>,

    pub is_selected: bool,

    /// `None` while unresolved
    pub capture_timestamp: Option<CaptureTimestamp>,

    decoded_image: Option<DecodedImage>,
}

impl ImageRecord {
    /// Create the record for a freshly discovered file. New files start selected.
    pub fn new(folder: &Utf8Path, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        Self {
            full_path: folder.join(&file_name),
            file_name,
            index: None,
            is_selected: true,
            capture_timestamp: None,
            decoded_image: None,
        }
    }

    pub fn toggle_selection(&mut self) -> bool {
        self.is_selected = !self.is_selected;
        self.is_selected
    }

    pub fn is_cached(&self) -> bool {
        self.decoded_image.is_some()
    }

    pub fn decoded_image(&self) -> Option<&DecodedImage> {
        self.decoded_image.as_ref()
    }

    pub(crate) fn store_decoded(&mut self, image: DecodedImage) {
        self.decoded_image = Some(image);
    }

    pub(crate) fn take_decoded(&mut self) -> Option<DecodedImage> {
        self.decoded_image.take()
    }

    /// Point the record at a new name inside the same folder.
    ///
    /// Must only be called on records that are not cached.
    pub(crate) fn rename(&mut self, new_name: impl Into<String>) {
        let new_name = new_name.into();
        self.full_path = match self.full_path.parent() {
            Some(folder) => folder.join(&new_name),
            None => Utf8PathBuf::from(&new_name),
        };
        self.file_name = new_name;
    }

    /// Durable projection of the record
    pub fn persisted(&self) -> PersistedRecord {
        PersistedRecord {
            is_selected: self.is_selected,
            capture_timestamp: self.capture_timestamp,
        }
    }
}

/// The part of an [`ImageRecord`] written to the progress sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub is_selected: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_timestamp: Option<CaptureTimestamp>,
}

impl Default for PersistedRecord {
    fn default() -> Self {
        Self {
            is_selected: true,
            capture_timestamp: None,
        }
    }
}
