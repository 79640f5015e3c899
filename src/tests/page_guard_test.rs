use std::{
    sync::{Arc, Barrier},
    thread,
};

use crate::common::{AccessType::Unknown, ReplacerPolicy};
use crate::tests::make_pool;

#[test]
fn basic_guard_unpins_on_drop() {
    let (bpm, _) = make_pool(3, ReplacerPolicy::LruK);

    let guard = bpm.new_page_guarded().unwrap().unwrap();
    let pid = guard.page_id();
    assert_eq!(bpm.get_pin_count(pid), Some(1));

    drop(guard);
    assert_eq!(bpm.get_pin_count(pid), Some(0));
}

#[test]
fn basic_guard_flushes_dirty_page_on_drop() {
    let (bpm, disk) = make_pool(3, ReplacerPolicy::LruK);

    let mut guard = bpm.new_page_guarded().unwrap().unwrap();
    let pid = guard.page_id();
    guard.with_data_mut(|data| data[0] = 9);
    assert_eq!(disk.lock().writes_for(pid), 0);

    drop(guard);
    assert_eq!(disk.lock().writes_for(pid), 1);
    assert_eq!(bpm.get_pin_count(pid), Some(0));

    // The page reads back with its payload intact.
    let guard = bpm.fetch_page_basic(pid).unwrap().unwrap();
    assert_eq!(guard.with_data(|data| data[0]), 9);
}

#[test]
fn explicit_release_is_idempotent_with_drop() {
    let (bpm, _) = make_pool(3, ReplacerPolicy::LruK);

    let mut guard = bpm.new_page_guarded().unwrap().unwrap();
    let pid = guard.page_id();

    guard.release();
    assert_eq!(bpm.get_pin_count(pid), Some(0));
    guard.release();
    drop(guard);
    // A single pin came off in total.
    assert_eq!(bpm.get_pin_count(pid), Some(0));
}

#[test]
fn upgrade_keeps_the_pin() {
    let (bpm, _) = make_pool(3, ReplacerPolicy::LruK);

    let guard = bpm.new_page_guarded().unwrap().unwrap();
    let pid = guard.page_id();

    let mut write_guard = guard.upgrade_write();
    assert_eq!(bpm.get_pin_count(pid), Some(1));
    write_guard.data_mut()[0] = 3;
    drop(write_guard);
    assert_eq!(bpm.get_pin_count(pid), Some(0));

    let basic = bpm.fetch_page_basic(pid).unwrap().unwrap();
    let read_guard = basic.upgrade_read();
    assert_eq!(bpm.get_pin_count(pid), Some(1));
    assert_eq!(read_guard.data()[0], 3);
    drop(read_guard);
    assert_eq!(bpm.get_pin_count(pid), Some(0));
}

#[test]
fn write_guard_marks_the_page_dirty() {
    let (bpm, disk) = make_pool(3, ReplacerPolicy::LruK);

    let (pid, _) = bpm.new_page().unwrap().unwrap();
    assert!(bpm.unpin_page(pid, false, Unknown));

    let mut guard = bpm.fetch_page_write(pid).unwrap().unwrap();
    guard.data_mut()[0] = 5;
    drop(guard);

    assert!(bpm.flush_page(pid).unwrap());
    assert_eq!(disk.lock().writes_for(pid), 1);
}

#[test]
fn read_guards_share_the_latch() {
    let (bpm, _) = make_pool(3, ReplacerPolicy::LruK);

    let (pid, _) = bpm.new_page().unwrap().unwrap();
    assert!(bpm.unpin_page(pid, false, Unknown));

    let first = bpm.fetch_page_read(pid).unwrap().unwrap();
    let second = bpm.fetch_page_read(pid).unwrap().unwrap();
    assert_eq!(bpm.get_pin_count(pid), Some(2));
    assert_eq!(first.data()[0], second.data()[0]);
}

#[test]
fn reader_blocks_until_writer_drops() {
    let (bpm, _) = make_pool(4, ReplacerPolicy::LruK);

    let (pid, _) = bpm.new_page().unwrap().unwrap();
    assert!(bpm.unpin_page(pid, false, Unknown));

    let mut write_guard = bpm.fetch_page_write(pid).unwrap().unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let reader = {
        let bpm = Arc::clone(&bpm);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            // Blocks on the frame latch until the writer lets go.
            let read_guard = bpm.fetch_page_read(pid).unwrap().unwrap();
            read_guard.data()[0]
        })
    };

    barrier.wait();
    write_guard.data_mut()[0] = 0xB1;
    drop(write_guard);

    assert_eq!(reader.join().unwrap(), 0xB1);
    assert_eq!(bpm.get_pin_count(pid), Some(0));
}
