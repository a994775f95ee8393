//! Circular log decoding.
//!
//! Both log characteristics carry the same framing: a one-byte header holding
//! the 1-based position of the next slot the sensor will write (counting the
//! header itself as position 0), followed by a fixed ring of one-byte samples.
//! Unwritten slots hold [`LOG_SENTINEL`].

use crate::error::{Error, Result};

/// Raw value of an unwritten log slot.
pub const LOG_SENTINEL: u8 = 0xFF;

/// Which log characteristic a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum LogKind {
    /// Temperature history, half-degree resolution.
    Temperature,
    /// Relative humidity history, whole percent.
    Humidity,
}

impl LogKind {
    /// Decode one raw slot, returning `None` for the sentinel.
    pub fn decode_sample(&self, raw: u8) -> Option<f32> {
        match self {
            Self::Temperature => decode_temperature_sample(raw),
            Self::Humidity => decode_humidity_sample(raw),
        }
    }
}

/// Decode one temperature log slot.
///
/// - Bits 0-5: magnitude in whole degrees
/// - Bit 6: add half a degree
/// - Bit 7: negative
///
/// The sign is applied before the half degree is added, so `0b1100_0101`
/// decodes to -4.5.
pub fn decode_temperature_sample(raw: u8) -> Option<f32> {
    if raw == LOG_SENTINEL {
        return None;
    }

    let mut value = f32::from(raw & 0b0011_1111);
    if raw & 0b1000_0000 != 0 {
        value = -value;
    }
    if raw & 0b0100_0000 != 0 {
        value += 0.5;
    }

    Some(value)
}

/// Decode one humidity log slot.
pub fn decode_humidity_sample(raw: u8) -> Option<f32> {
    (raw != LOG_SENTINEL).then(|| f32::from(raw))
}

/// A parsed log characteristic value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    /// Index of the most recently written slot in `slots`.
    ///
    /// `-1` on a sensor that has never logged; the walk wraps it to the last
    /// slot like any other step below zero.
    pub head: i32,
    /// The ring, header removed.
    pub slots: Vec<u8>,
}

impl LogFrame {
    /// Parse a raw log characteristic value.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (&header, slots) = data
            .split_first()
            .ok_or_else(|| Error::invalid_data("Log data is empty"))?;

        if header == 0 {
            return Err(Error::invalid_data("Log head pointer is zero"));
        }

        let head = i32::from(header) - 2;
        if head >= 0 && !slots.is_empty() && head as usize >= slots.len() {
            return Err(Error::invalid_data(format!(
                "Log head {} outside ring of {} slots",
                head,
                slots.len()
            )));
        }

        Ok(Self {
            head,
            slots: slots.to_vec(),
        })
    }

    /// Number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Raw slots in walk order: the head first, then backwards with
    /// wrap-around, visiting every slot exactly once.
    pub fn walk(&self) -> impl Iterator<Item = u8> + '_ {
        let len = self.slots.len() as i32;
        let start = if self.head < 0 { len - 1 } else { self.head };

        (0..len).map(move |step| self.slots[(start - step).rem_euclid(len) as usize])
    }

    /// Decode all written slots in walk order, skipping sentinels.
    pub fn samples(&self, kind: LogKind) -> Vec<f32> {
        self.walk().filter_map(|raw| kind.decode_sample(raw)).collect()
    }
}

/// Remembers the last head index seen on a log stream so unchanged logs
/// are not re-reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCursor {
    previous_index: Option<i32>,
}

impl LogCursor {
    /// Create an empty cursor.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last head index recorded.
    pub fn previous_index(&self) -> Option<i32> {
        self.previous_index
    }

    /// Record `head` and report whether it differs from the previous one.
    pub fn advance(&mut self, head: i32) -> bool {
        let changed = self.previous_index != Some(head);
        self.previous_index = Some(head);
        changed
    }

    /// Forget the recorded head.
    pub fn reset(&mut self) {
        self.previous_index = None;
    }
}
