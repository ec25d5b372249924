//! Append-only on-disk container of fixed-shape frame payloads plus
//! index-aligned metadata sequences.
//!
//! A store is a directory:
//!   - `header.json`  - format version and frame shape, written once
//!   - `frames.bin`   - raw payload appends, each exactly one frame long
//!   - `meta.json`    - the three metadata sequences, rewritten atomically
//!                      (temp file + rename) on finalize and periodically
//!
//! Metadata is buffered in memory between flushes. An unclean termination
//! loses rows appended after the last flush while their payloads remain on
//! disk; reopening reconciles by truncating payloads back to the flushed
//! metadata length. Shorten `meta_flush_every` to narrow that window.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::frame::{ColorFilter, FrameShape};
use crate::error::{StoreOpenError, StoreWriteError};

const FORMAT_VERSION: u32 = 1;
const HEADER_FILE: &str = "header.json";
const FRAMES_FILE: &str = "frames.bin";
const META_FILE: &str = "meta.json";
const META_TMP_FILE: &str = "meta.json.tmp";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    format_version: u32,
    width: u32,
    height: u32,
    bytes_per_sample: u32,
}

impl Header {
    fn shape(&self) -> FrameShape {
        FrameShape {
            width: self.width,
            height: self.height,
            bytes_per_sample: self.bytes_per_sample,
        }
    }
}

/// Per-frame metadata stored alongside each payload.
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta {
    pub exposure_us: u32,
    pub hardware_frame_id: u64,
    pub color_filter: ColorFilter,
}

/// The three metadata sequences, index-aligned with the payload array.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetaColumns {
    exposure_us: Vec<u32>,
    hardware_frame_id: Vec<u64>,
    color_filter_array: Vec<String>,
}

impl MetaColumns {
    fn len(&self) -> usize {
        self.exposure_us.len()
    }

    fn is_aligned(&self) -> bool {
        self.exposure_us.len() == self.hardware_frame_id.len()
            && self.exposure_us.len() == self.color_filter_array.len()
    }

    fn push(&mut self, meta: FrameMeta) {
        self.exposure_us.push(meta.exposure_us);
        self.hardware_frame_id.push(meta.hardware_frame_id);
        self.color_filter_array
            .push(meta.color_filter.as_str().to_owned());
    }

    fn truncate(&mut self, len: usize) {
        self.exposure_us.truncate(len);
        self.hardware_frame_id.truncate(len);
        self.color_filter_array.truncate(len);
    }
}

/// Summary returned by a successful finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSummary {
    pub payloads: u64,
}

/// Open frame store. Single writer: all appends for one store go through
/// one `&mut` handle, which is what keeps the length invariant simple.
pub struct FrameStore {
    dir: PathBuf,
    shape: FrameShape,
    frames: File,
    payload_count: u64,
    meta: MetaColumns,
    meta_flush_every: u32,
    appends_since_flush: u32,
}

impl FrameStore {
    /// Creates a store at `path`, or reopens an existing one for appending.
    ///
    /// Fails without touching anything on disk if `path` holds something
    /// that is not a store, or a store of a different shape.
    pub fn create_or_append(
        path: &Path,
        shape: FrameShape,
        meta_flush_every: u32,
    ) -> Result<Self, StoreOpenError> {
        if shape.is_zero_area() {
            return Err(StoreOpenError::ZeroArea(shape));
        }
        if path.exists() {
            Self::open_append(path, shape, meta_flush_every)
        } else {
            Self::create(path, shape, meta_flush_every)
        }
    }

    fn create(path: &Path, shape: FrameShape, meta_flush_every: u32) -> Result<Self, StoreOpenError> {
        fs::create_dir_all(path)?;
        let header = Header {
            format_version: FORMAT_VERSION,
            width: shape.width,
            height: shape.height,
            bytes_per_sample: shape.bytes_per_sample,
        };
        let mut header_file = File::create(path.join(HEADER_FILE))?;
        serde_json::to_writer_pretty(&mut header_file, &header).map_err(into_io)?;
        header_file.sync_all()?;
        let frames = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path.join(FRAMES_FILE))?;
        info!(path = %path.display(), %shape, "created frame store");
        Ok(Self {
            dir: path.to_owned(),
            shape,
            frames,
            payload_count: 0,
            meta: MetaColumns::default(),
            meta_flush_every,
            appends_since_flush: 0,
        })
    }

    fn open_append(
        path: &Path,
        shape: FrameShape,
        meta_flush_every: u32,
    ) -> Result<Self, StoreOpenError> {
        let header_path = path.join(HEADER_FILE);
        if !path.is_dir() || !header_path.is_file() {
            return Err(StoreOpenError::NotAStore(path.to_owned()));
        }
        let header: Header = serde_json::from_reader(File::open(&header_path)?)
            .map_err(|_| StoreOpenError::NotAStore(path.to_owned()))?;
        if header.format_version != FORMAT_VERSION {
            return Err(StoreOpenError::UnsupportedVersion(header.format_version));
        }
        let stored = header.shape();
        if stored != shape {
            // nothing has been modified up to this point
            return Err(StoreOpenError::ShapeMismatch { stored, new: shape });
        }
        let mut meta: MetaColumns = match File::open(path.join(META_FILE)) {
            Ok(file) => serde_json::from_reader(file)
                .map_err(|_| StoreOpenError::NotAStore(path.to_owned()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => MetaColumns::default(),
            Err(err) => return Err(err.into()),
        };
        if !meta.is_aligned() {
            return Err(StoreOpenError::NotAStore(path.to_owned()));
        }

        let frames = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path.join(FRAMES_FILE))?;
        let frame_bytes = shape.frame_bytes() as u64;
        let len = frames.metadata()?.len();
        let mut payload_count = len / frame_bytes;
        if len % frame_bytes != 0 {
            warn!(len, "truncating partial trailing payload from an unclean shutdown");
            frames.set_len(payload_count * frame_bytes)?;
        }
        let meta_len = meta.len() as u64;
        if payload_count > meta_len {
            // payloads past the last metadata flush cannot be attributed
            warn!(
                payloads = payload_count,
                metadata = meta_len,
                "reconciling store: dropping payloads past the last metadata flush"
            );
            frames.set_len(meta_len * frame_bytes)?;
            payload_count = meta_len;
        } else if meta_len > payload_count {
            warn!(
                payloads = payload_count,
                metadata = meta_len,
                "reconciling store: dropping metadata rows without payloads"
            );
            meta.truncate(payload_count as usize);
        }
        info!(path = %path.display(), payload_count, "opened frame store for appending");
        Ok(Self {
            dir: path.to_owned(),
            shape,
            frames,
            payload_count,
            meta,
            meta_flush_every,
            appends_since_flush: 0,
        })
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn payload_count(&self) -> u64 {
        self.payload_count
    }

    pub fn exposure_us(&self) -> &[u32] {
        &self.meta.exposure_us
    }

    pub fn hardware_frame_ids(&self) -> &[u64] {
        &self.meta.hardware_frame_id
    }

    pub fn color_filter_array(&self) -> &[String] {
        &self.meta.color_filter_array
    }

    /// Appends one payload and its metadata row as a single logical step.
    ///
    /// On a payload write failure the file is truncated back to the previous
    /// frame boundary, so an external reader never observes payload and
    /// metadata sequences of different lengths.
    pub fn append(&mut self, payload: &[u8], meta: FrameMeta) -> Result<(), StoreWriteError> {
        let want = self.shape.frame_bytes();
        if payload.len() != want {
            return Err(StoreWriteError::PayloadShape {
                got: payload.len(),
                want,
            });
        }
        if let Err(err) = self.frames.write_all(payload) {
            let aligned = self.payload_count * want as u64;
            if let Err(trunc_err) = self.frames.set_len(aligned) {
                // a partial tail is left behind; reopen will truncate it
                warn!(%trunc_err, "rollback truncate failed after a short append");
            }
            return Err(err.into());
        }
        self.payload_count += 1;
        self.meta.push(meta);
        if self.meta.len() as u64 != self.payload_count {
            return Err(StoreWriteError::Misaligned {
                payloads: self.payload_count,
                metadata: self.meta.len() as u64,
            });
        }
        self.appends_since_flush += 1;
        if self.meta_flush_every > 0 && self.appends_since_flush >= self.meta_flush_every {
            self.flush_meta()?;
        }
        Ok(())
    }

    /// Rewrites the metadata sidecar through a temp file + rename, so a
    /// crash mid-flush never clobbers the previous flush.
    fn flush_meta(&mut self) -> Result<(), StoreWriteError> {
        let tmp = self.dir.join(META_TMP_FILE);
        let mut file = File::create(&tmp)?;
        serde_json::to_writer(&mut file, &self.meta).map_err(into_io)?;
        file.sync_all()?;
        fs::rename(&tmp, self.dir.join(META_FILE))?;
        self.appends_since_flush = 0;
        debug!(rows = self.meta.len(), "flushed metadata sidecar");
        Ok(())
    }

    /// Flushes metadata and syncs the payload file. The store is cleanly
    /// closed after this returns.
    pub fn finalize(mut self) -> Result<StoreSummary, StoreWriteError> {
        self.flush_meta()?;
        self.frames.sync_all()?;
        info!(path = %self.dir.display(), payloads = self.payload_count, "finalized frame store");
        Ok(StoreSummary {
            payloads: self.payload_count,
        })
    }
}

fn into_io(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}
