//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Mutex;

use takeout_core::notify::{Notification, NotificationSink};
use zip::CompressionMethod;
use zip::write::FileOptions;

/// Builds a stored (uncompressed) archive with one member of `payload_len`
/// repeated `seed` bytes, so distinct seeds produce distinct bodies.
pub fn build_archive(seed: u8, payload_len: usize) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    writer.start_file("data.bin", options).unwrap();
    writer.write_all(&vec![seed; payload_len]).unwrap();
    writer.finish().unwrap().into_inner()
}

/// A valid archive whose on-the-wire size clears the plausibility threshold
/// the engine uses for expired-session detection.
pub fn large_archive(seed: u8) -> Vec<u8> {
    build_archive(seed, 1_200_000)
}

/// A body that carries the archive signature but is not a valid archive.
/// Deterministic, so split ranges of it are reproducible across requests.
pub fn pseudo_body(len: usize) -> Vec<u8> {
    let mut body = Vec::with_capacity(len);
    body.extend_from_slice(b"PK\x03\x04");
    while body.len() < len {
        body.push((body.len() % 251) as u8);
    }
    body
}

/// Notification sink that records event names for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl NotificationSink for RecordingSink {
    fn send(&self, notification: &Notification) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(notification.event.name().to_string());
    }
}
