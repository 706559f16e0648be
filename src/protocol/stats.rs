//! Packet traffic accounting.
//!
//! The transport records every frame it sends or receives; a summary drains
//! the recorded entries and aggregates them.

use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use tracing::debug;

/// One sent or received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLog {
    pub id: u16,
    pub encrypted: bool,
    pub outgoing: bool,
    pub bytes: usize,
}

/// Aggregate over all frames logged since the previous summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacketSummary {
    pub total: u64,
    pub total_in: u64,
    pub total_out: u64,
    pub total_encrypted: u64,
    pub total_cleartext: u64,
    pub total_bytes: u64,
    pub total_bytes_in: u64,
    pub total_bytes_out: u64,
    pub bytes_per_packet: f32,
    pub encrypted_ratio: f32,
    pub packet_counts: AHashMap<u16, u64>,
}

impl PacketSummary {
    /// Packet ids with their counts, most frequent first
    pub fn sorted_counts(&self) -> Vec<(u16, u64)> {
        let mut counts: Vec<(u16, u64)> = self.packet_counts.iter().map(|(&id, &n)| (id, n)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts
    }

    pub fn log(&self) {
        debug!("====== Packet summary ======");
        if self.total == 0 {
            debug!("No packets have been sent during this period.");
        } else {
            debug!(
                "Total packets: {} ({} sent, {} received)",
                self.total, self.total_out, self.total_in
            );
            debug!(
                "Encrypted packets: {} ({} cleartext, ratio: {:.1}%)",
                self.total_encrypted,
                self.total_cleartext,
                self.encrypted_ratio * 100.0
            );
            debug!(
                "Total bytes transferred: {} ({} sent, {} received)",
                format_bytes(self.total_bytes),
                format_bytes(self.total_bytes_out),
                format_bytes(self.total_bytes_in)
            );
            debug!("Average bytes per packet: {}", format_bytes(self.bytes_per_packet as u64));
            for (id, count) in self.sorted_counts() {
                debug!("Packet {} - {} occurrences", id, count);
            }
        }
        debug!("==== Packet summary end ====");
    }
}

/// Shared traffic log. Cloning shares the underlying buffer.
#[derive(Debug, Clone, Default)]
pub struct PacketLogger {
    entries: Arc<Mutex<Vec<PacketLog>>>,
}

impl PacketLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, log: PacketLog) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).push(log);
    }

    pub fn record_frame(&self, frame: &[u8], outgoing: bool) {
        if frame.len() < 3 {
            return;
        }
        self.record(PacketLog {
            id: u16::from_be_bytes([frame[0], frame[1]]),
            encrypted: frame[2] != 0,
            outgoing,
            bytes: frame.len(),
        });
    }

    /// Drain all entries into a summary
    pub fn summary(&self) -> PacketSummary {
        let entries = std::mem::take(&mut *self.entries.lock().unwrap_or_else(|e| e.into_inner()));

        let mut summary = PacketSummary::default();
        for log in entries {
            summary.total += 1;
            summary.total_bytes += log.bytes as u64;
            if log.outgoing {
                summary.total_out += 1;
                summary.total_bytes_out += log.bytes as u64;
            } else {
                summary.total_in += 1;
                summary.total_bytes_in += log.bytes as u64;
            }

            if log.encrypted {
                summary.total_encrypted += 1;
            } else {
                summary.total_cleartext += 1;
            }

            *summary.packet_counts.entry(log.id).or_insert(0) += 1;
        }

        if summary.total > 0 {
            summary.bytes_per_packet = summary.total_bytes as f32 / summary.total as f32;
            summary.encrypted_ratio = summary.total_encrypted as f32 / summary.total as f32;
        }
        summary
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.2}{}", UNITS[unit])
    }
}
