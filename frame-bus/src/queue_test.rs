use std::sync::Arc;
use std::thread;

use super::BoundedHandoffQueue;

#[test]
fn test_get_on_empty_queue() {
    let queue: BoundedHandoffQueue<u32> = BoundedHandoffQueue::new(4);
    assert!(queue.get().is_none());
    assert!(queue.is_empty());
}

#[test]
fn test_fifo_order_below_capacity() {
    let queue = BoundedHandoffQueue::new(4);
    for i in 0..3 {
        assert!(queue.put(i).is_none());
    }
    assert_eq!(queue.get(), Some(0));
    assert_eq!(queue.get(), Some(1));
    assert_eq!(queue.get(), Some(2));
    assert_eq!(queue.get(), None);
}

#[test]
fn test_overflow_keeps_most_recent_window() {
    let queue = BoundedHandoffQueue::new(4);
    let mut evicted = Vec::new();
    for i in 0..6 {
        if let Some(old) = queue.put(i) {
            evicted.push(old);
        }
    }

    assert_eq!(evicted, vec![0, 1]);
    assert_eq!(queue.len(), 4);
    assert_eq!(queue.drain(), vec![2, 3, 4, 5]);
    assert!(queue.is_empty());
}

#[test]
fn test_zero_capacity_is_clamped() {
    let queue = BoundedHandoffQueue::new(0);
    assert_eq!(queue.capacity(), 1);
    assert!(queue.put("a").is_none());
    assert_eq!(queue.put("b"), Some("a"));
    assert_eq!(queue.get(), Some("b"));
}

#[test]
fn test_huge_capacity_does_not_preallocate() {
    let queue = BoundedHandoffQueue::new(usize::MAX);
    assert_eq!(queue.capacity(), usize::MAX);
    for i in 0..100 {
        assert!(queue.put(i).is_none());
    }
    assert_eq!(queue.len(), 100);
}

#[test]
fn test_cross_thread_producer_consumer() {
    let queue = Arc::new(BoundedHandoffQueue::new(4));
    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut evicted = 0usize;
            for i in 0..1000u32 {
                if queue.put(i).is_some() {
                    evicted += 1;
                }
            }
            evicted
        })
    };

    let mut taken = Vec::new();
    while taken.len() < 50 {
        if let Some(v) = queue.get() {
            taken.push(v);
        } else if producer.is_finished() {
            break;
        }
    }
    let evicted = producer.join().unwrap();
    let remaining = queue.drain();

    // every item is accounted for exactly once
    assert_eq!(taken.len() + evicted + remaining.len(), 1000);
    // what the consumer sees is strictly increasing, possibly with gaps
    assert!(taken.windows(2).all(|w| w[0] < w[1]));
}
