#![no_main]
use libfuzzer_sys::fuzz_target;
use meetplan::time::{Available, FirstFit, TimeMerge, TimeRange};

fuzz_target!(|data: (Vec<TimeRange<u8>>, u8, Vec<TimeRange<u8>>)| {
    let (windows, duration, blocks) = data;

    let merged = blocks.iter().time_merge();
    assert!(
        merged.iter().all(|block| !block.is_empty()),
        "Merged blocks should never be empty"
    );
    assert!(
        merged.iter().zip(merged.iter().skip(1)).all(|(l, r)| l.end() < r.start()),
        "Merged blocks should be sorted, disjoint and not touching"
    );
    assert_eq!(merged.iter().time_merge(), merged, "Merging should be idempotent");

    let free = blocks.iter().get_availability(&windows);
    let windows = windows.iter().time_merge();
    for gap in free.iter() {
        assert!(!gap.is_empty(), "Empty gap {:?}", gap);
        assert!(
            windows
                .iter()
                .any(|w| w.start() <= gap.start() && gap.end() <= w.end()),
            "Gap {:?} outside of {:?}",
            gap,
            windows
        );
        assert!(
            merged.iter().all(|block| !block.overlaps(gap)),
            "Gap {:?} overlaps a block",
            gap
        );
    }

    if duration > 0 {
        if let Some(slot) = free.iter().first_fit(duration) {
            assert_eq!(slot.len(), duration);
            assert!(merged.iter().all(|block| !block.overlaps(&slot)));
        } else {
            assert!(free.iter().all(|gap| gap.len() < duration));
        }
    }
});
