use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{BufferLedger, Caps, RgbLayout};

fn i420_caps() -> Arc<Caps> {
    Arc::new(Caps::yuv(*b"I420", 4, 2))
}

#[test]
fn test_issue_and_release_once() {
    let ledger = BufferLedger::new("test");
    let a = ledger.issue(i420_caps(), Bytes::from(vec![0u8; 12]));
    let b = ledger.issue(i420_caps(), Bytes::from(vec![1u8; 12]));
    assert_ne!(a.id(), b.id());
    assert_eq!(ledger.issued(), 2);
    assert_eq!(ledger.outstanding(), 2);

    let a_id = a.id();
    a.release();
    assert!(!ledger.is_outstanding(a_id));
    assert_eq!(ledger.released(), 1);

    drop(b);
    assert_eq!(ledger.released(), 2);
    assert_eq!(ledger.outstanding(), 0);
    assert_eq!(ledger.unknown_releases(), 0);
}

#[test]
fn test_release_hook_receives_payload() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let ledger = {
        let seen = Arc::clone(&seen);
        BufferLedger::with_release_hook("hooked", move |id, data| {
            seen.lock().push((id, data.len()));
        })
    };

    let frame = ledger.issue(i420_caps(), Bytes::from(vec![7u8; 12]));
    let id = frame.id();
    assert_eq!(frame.data()[0], 7);
    frame.release();

    assert_eq!(*seen.lock(), vec![(id, 12)]);
}

#[test]
fn test_buffer_moves_across_threads() {
    let ledger = BufferLedger::new("threads");
    let frame = ledger.issue(i420_caps(), Bytes::from_static(&[0; 12]));
    std::thread::spawn(move || {
        assert_eq!(frame.len(), 12);
        frame.release();
    })
    .join()
    .unwrap();
    assert_eq!(ledger.outstanding(), 0);
}

#[test]
fn test_caps_display() {
    let caps = Caps::yuv(*b"UYVY", 640, 480);
    assert_eq!(caps.fourcc_str().as_deref(), Some("UYVY"));
    assert_eq!(
        caps.to_string(),
        "video/x-raw-yuv, width=640, height=480, fourcc=UYVY"
    );

    let rgb = Caps::rgb(
        RgbLayout {
            bpp: 24,
            depth: 24,
            red_mask: 0xff0000,
            green_mask: 0xff00,
            blue_mask: 0xff,
            alpha_mask: 0,
        },
        2,
        2,
    );
    assert!(rgb.to_string().starts_with("video/x-raw-rgb, width=2, height=2, bpp=24"));
    assert_eq!(Caps::raw("yuv420p", 8, 8).dimensions(), (8, 8));
}
