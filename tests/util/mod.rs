#![allow(dead_code)]

use std::thread;
use std::time::Duration;

pub fn spawn<F: FnOnce() + Send + 'static>(f: F) {
    thread::spawn(f);
}

pub fn sleep_ms(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}
