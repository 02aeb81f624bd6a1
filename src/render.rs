use std::collections::HashSet;

use frame_bus::{
    BufferId, FrameConsumer, InstanceId, NewFrame, PipelineSupervisor, SlotIndex, TexelFormat,
};

/// Geometry of the texture bound to one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    pub instance: InstanceId,
    pub texel: TexelFormat,
    pub width: u32,
    pub height: u32,
    pub uploads: u64,
    pub last_buffer: BufferId,
}

/// Headless stand-in for the GL texture upload: keeps one texture per slot
/// and reallocates it whenever the stream geometry changes.
pub struct TextureUploader {
    textures: Vec<Option<Texture>>,
    uploaded: u64,
    skipped: u64,
    warned: HashSet<(SlotIndex, InstanceId)>,
}

impl TextureUploader {
    pub fn new(slots: usize) -> Self {
        Self {
            textures: vec![None; slots],
            uploaded: 0,
            skipped: 0,
            warned: HashSet::new(),
        }
    }

    pub fn texture(&self, slot: SlotIndex) -> Option<&Texture> {
        self.textures.get(slot.index()).and_then(|t| t.as_ref())
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn report(&self, supervisor: &PipelineSupervisor) {
        for idx in 0..supervisor.slot_count() {
            let slot = SlotIndex::new(idx);
            let state = supervisor
                .slot_state(slot)
                .map_or("empty", |s| s.description());
            let stats = supervisor
                .slot_stats(slot)
                .map(|s| s.to_string())
                .unwrap_or_default();
            match self.texture(slot) {
                Some(t) => log::info!(
                    "slot {}: {} {}, texture {:?} {}x{} ({} uploads), restarts={}",
                    slot,
                    state,
                    stats,
                    t.texel,
                    t.width,
                    t.height,
                    t.uploads,
                    supervisor.slot_restarts(slot)
                ),
                None => log::info!(
                    "slot {}: {} {}, no texture, restarts={}",
                    slot,
                    state,
                    stats,
                    supervisor.slot_restarts(slot)
                ),
            }
        }
    }
}

impl FrameConsumer for TextureUploader {
    fn upload(&mut self, frame: &NewFrame<'_>) {
        let Some(layout) = frame.layout() else {
            self.skip(frame);
            return;
        };
        let Some(entry) = self.textures.get_mut(frame.slot.index()) else {
            return;
        };
        let (width, height) = layout.texture_size(frame.format.width, frame.format.height);

        match entry {
            Some(t) if t.instance == frame.instance && (t.width, t.height) == (width, height) => {
                t.uploads += 1;
                t.last_buffer = frame.buffer.id();
            }
            _ => {
                log::info!(
                    "slot {}: allocating {:?} texture {}x{} for {}",
                    frame.slot,
                    layout.texel,
                    width,
                    height,
                    frame.format
                );
                *entry = Some(Texture {
                    instance: frame.instance,
                    texel: layout.texel,
                    width,
                    height,
                    uploads: 1,
                    last_buffer: frame.buffer.id(),
                });
            }
        }
        log::trace!("slot {}: uploaded buffer {}", frame.slot, frame.buffer.id());
        self.uploaded += 1;
    }

    fn skip(&mut self, frame: &NewFrame<'_>) {
        self.skipped += 1;
        if self.warned.insert((frame.slot, frame.instance)) {
            log::warn!(
                "slot {}: cannot upload {} frames of {} bytes, showing nothing",
                frame.slot,
                frame.format,
                frame.buffer.len()
            );
        }
    }
}

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;
