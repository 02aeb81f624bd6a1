use std::sync::Arc;

use bytes::Bytes;
use frame_bus::{
    BufferLedger, Caps, FrameConsumer, InstanceId, NewFrame, SlotIndex, StreamFormat, TexelFormat,
};

use super::TextureUploader;

fn offer(
    uploader: &mut TextureUploader,
    ledger: &Arc<BufferLedger>,
    caps: Caps,
    len: usize,
    instance: u64,
) {
    let (format, _) = StreamFormat::discover(&caps);
    let buffer = ledger.issue(Arc::new(caps), Bytes::from(vec![0u8; len]));
    let frame = NewFrame {
        slot: SlotIndex::new(0),
        instance: InstanceId(instance),
        buffer: &buffer,
        format,
    };
    if frame.is_uploadable() {
        uploader.upload(&frame);
    } else {
        uploader.skip(&frame);
    }
}

#[test]
fn test_i420_texture_geometry() {
    let ledger = BufferLedger::new("render");
    let mut uploader = TextureUploader::new(1);
    offer(&mut uploader, &ledger, Caps::yuv(*b"I420", 320, 240), 320 * 240 * 3 / 2, 1);

    let texture = uploader.texture(SlotIndex::new(0)).unwrap();
    assert_eq!(texture.texel, TexelFormat::Luminance8);
    assert_eq!((texture.width, texture.height), (320, 360));
    assert_eq!(texture.uploads, 1);
}

#[test]
fn test_packed_422_texture_geometry() {
    let ledger = BufferLedger::new("render");
    let mut uploader = TextureUploader::new(1);
    offer(&mut uploader, &ledger, Caps::raw("uyvy422", 64, 48), 64 * 48 * 2, 1);

    let texture = uploader.texture(SlotIndex::new(0)).unwrap();
    assert_eq!((texture.width, texture.height), (128, 48));
}

#[test]
fn test_reuses_texture_until_instance_changes() {
    let ledger = BufferLedger::new("render");
    let mut uploader = TextureUploader::new(1);
    offer(&mut uploader, &ledger, Caps::raw("rgb24", 8, 8), 192, 1);
    offer(&mut uploader, &ledger, Caps::raw("rgb24", 8, 8), 192, 1);
    assert_eq!(uploader.texture(SlotIndex::new(0)).unwrap().uploads, 2);

    offer(&mut uploader, &ledger, Caps::raw("bgra", 8, 8), 256, 2);
    let texture = uploader.texture(SlotIndex::new(0)).unwrap();
    assert_eq!(texture.instance, InstanceId(2));
    assert_eq!(texture.texel, TexelFormat::Bgra8);
    assert_eq!(texture.uploads, 1);
    assert_eq!(uploader.uploaded(), 3);
    assert_eq!(ledger.outstanding(), 0);
}

#[test]
fn test_refuses_unknown_and_short_frames() {
    let ledger = BufferLedger::new("render");
    let mut uploader = TextureUploader::new(1);
    offer(&mut uploader, &ledger, Caps::other("video/x-bayer", 8, 8), 64, 1);
    offer(&mut uploader, &ledger, Caps::yuv(*b"I420", 8, 8), 10, 1);

    assert!(uploader.texture(SlotIndex::new(0)).is_none());
    assert_eq!(uploader.skipped(), 2);
    assert_eq!(uploader.uploaded(), 0);
}
