use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

pub const CAPS_RAW_YUV: &str = "video/x-raw-yuv";
pub const CAPS_RAW_RGB: &str = "video/x-raw-rgb";
pub const CAPS_RAW: &str = "video/x-raw";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Display for BufferId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Channel layout of a packed RGB stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbLayout {
    pub bpp: u32,
    pub depth: u32,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
    pub alpha_mask: u32,
}

/// Structure description the engine attaches to every buffer it delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caps {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fourcc: Option<[u8; 4]>,
    // GStreamer 1.x format name or FFmpeg pixel format name
    pub format: Option<String>,
    pub rgb: Option<RgbLayout>,
}

impl Caps {
    pub fn yuv(fourcc: [u8; 4], width: u32, height: u32) -> Self {
        Self {
            name: CAPS_RAW_YUV.to_string(),
            width,
            height,
            fourcc: Some(fourcc),
            format: None,
            rgb: None,
        }
    }

    pub fn rgb(layout: RgbLayout, width: u32, height: u32) -> Self {
        Self {
            name: CAPS_RAW_RGB.to_string(),
            width,
            height,
            fourcc: None,
            format: None,
            rgb: Some(layout),
        }
    }

    pub fn raw(format: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: CAPS_RAW.to_string(),
            width,
            height,
            fourcc: None,
            format: Some(format.into()),
            rgb: None,
        }
    }

    pub fn other(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            fourcc: None,
            format: None,
            rgb: None,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn fourcc_str(&self) -> Option<String> {
        self.fourcc
            .map(|cc| cc.iter().map(|&b| b as char).collect::<String>())
    }
}

impl Display for Caps {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, width={}, height={}", self.name, self.width, self.height)?;
        if let Some(cc) = self.fourcc_str() {
            write!(f, ", fourcc={}", cc)?;
        }
        if let Some(format) = &self.format {
            write!(f, ", format={}", format)?;
        }
        if let Some(rgb) = &self.rgb {
            write!(
                f,
                ", bpp={}, depth={}, red_mask={:#x}, green_mask={:#x}, blue_mask={:#x}",
                rgb.bpp, rgb.depth, rgb.red_mask, rgb.green_mask, rgb.blue_mask
            )?;
        }
        Ok(())
    }
}

type ReleaseHook = Box<dyn Fn(BufferId, Bytes) + Send + Sync>;

/// Engine-side bookkeeping for every buffer handed out across the thread boundary.
///
/// A ledger is the only way to create a [`FrameBuffer`]; each buffer returns
/// to the ledger that issued it when it is released.
pub struct BufferLedger {
    name: String,
    next_id: AtomicU64,
    issued: AtomicU64,
    released: AtomicU64,
    unknown_releases: AtomicU64,
    outstanding: Mutex<HashSet<BufferId>>,
    on_release: Option<ReleaseHook>,
}

impl BufferLedger {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, None))
    }

    /// Like [`BufferLedger::new`] but hands each released payload to `hook`,
    /// e.g. to recycle it into a pool.
    pub fn with_release_hook<F>(name: &str, hook: F) -> Arc<Self>
    where
        F: Fn(BufferId, Bytes) + Send + Sync + 'static,
    {
        Arc::new(Self::build(name, Some(Box::new(hook))))
    }

    fn build(name: &str, on_release: Option<ReleaseHook>) -> Self {
        Self {
            name: name.to_string(),
            next_id: AtomicU64::new(1),
            issued: AtomicU64::new(0),
            released: AtomicU64::new(0),
            unknown_releases: AtomicU64::new(0),
            outstanding: Mutex::new(HashSet::new()),
            on_release,
        }
    }

    pub fn issue(self: &Arc<Self>, caps: Arc<Caps>, data: Bytes) -> FrameBuffer {
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.outstanding.lock().insert(id);
        self.issued.fetch_add(1, Ordering::Relaxed);
        FrameBuffer {
            id,
            caps,
            data,
            ledger: Arc::clone(self),
        }
    }

    fn release_buffer(&self, id: BufferId, data: Bytes) {
        if !self.outstanding.lock().remove(&id) {
            self.unknown_releases.fetch_add(1, Ordering::Relaxed);
            log::error!("{}: release of buffer {} that is not outstanding", self.name, id);
            return;
        }
        self.released.fetch_add(1, Ordering::Relaxed);
        log::trace!("{}: released buffer {}", self.name, id);
        if let Some(hook) = &self.on_release {
            hook(id, data);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    pub fn is_outstanding(&self, id: BufferId) -> bool {
        self.outstanding.lock().contains(&id)
    }

    /// Releases of ids that were never issued or were already released.
    pub fn unknown_releases(&self) -> u64 {
        self.unknown_releases.load(Ordering::Relaxed)
    }
}

/// One decoded frame, borrowed from the engine that produced it.
///
/// Move-only: there is exactly one handle per issued buffer, and the buffer
/// goes back to its ledger exactly once, either through [`FrameBuffer::release`]
/// or when the handle is dropped.
pub struct FrameBuffer {
    id: BufferId,
    caps: Arc<Caps>,
    data: Bytes,
    ledger: Arc<BufferLedger>,
}

impl FrameBuffer {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    pub fn width(&self) -> u32 {
        self.caps.width
    }

    pub fn height(&self) -> u32 {
        self.caps.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the buffer to the engine.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.ledger.release_buffer(self.id, data);
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("ledger", &self.ledger.name)
            .field("width", &self.caps.width)
            .field("height", &self.caps.height)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod frame_test;
