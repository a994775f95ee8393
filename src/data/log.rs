//! Decoded log history.
//!
//! Contains the snapshot type delivered to listeners when a sensor's
//! on-board history changes.

use chrono::{DateTime, Utc};

use crate::protocol::{LogFrame, LogKind};

/// A decoded copy of one of the sensor's circular logs.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct LogSnapshot {
    /// Which log this is.
    pub kind: LogKind,

    /// Ring index of the most recent sample at the time of the read.
    pub head: i32,

    /// Written samples, most recent first.
    ///
    /// Temperatures are in degrees Celsius, humidity in percent.
    pub samples: Vec<f32>,

    /// When the value was received.
    pub received_at: DateTime<Utc>,
}

impl LogSnapshot {
    /// Decode a parsed frame.
    pub fn from_frame(kind: LogKind, frame: &LogFrame) -> Self {
        Self {
            kind,
            head: frame.head,
            samples: frame.samples(kind),
            received_at: Utc::now(),
        }
    }

    /// Get the number of written samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the log holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The most recent sample.
    pub fn latest(&self) -> Option<f32> {
        self.samples.first().copied()
    }

    /// Samples oldest first, the order a chart plots them in.
    pub fn chronological(&self) -> Vec<f32> {
        self.samples.iter().rev().copied().collect()
    }

    /// Lowest and highest sample.
    pub fn range(&self) -> Option<(f32, f32)> {
        let mut iter = self.samples.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }

    /// Export the log to CSV format, oldest sample first.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        let unit = match self.kind {
            LogKind::Temperature => "Celsius",
            LogKind::Humidity => "Percent",
        };
        csv.push_str(&format!("Index,{unit}\n"));

        for (i, value) in self.chronological().iter().enumerate() {
            csv.push_str(&format!("{},{:.1}\n", i, value));
        }

        csv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(kind: LogKind, data: &[u8]) -> LogSnapshot {
        LogSnapshot::from_frame(kind, &LogFrame::parse(data).unwrap())
    }

    #[test]
    fn test_from_frame() {
        let snap = snapshot(LogKind::Humidity, &[3, 40, 41, 0xFF]);
        assert_eq!(snap.head, 1);
        assert_eq!(snap.samples, vec![41.0, 40.0]);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.latest(), Some(41.0));
        assert_eq!(snap.chronological(), vec![40.0, 41.0]);
    }

    #[test]
    fn test_range() {
        let snap = snapshot(LogKind::Temperature, &[4, 0b0001_0100, 0b1000_0011, 0b0101_1001]);
        assert_eq!(snap.range(), Some((-3.0, 25.5)));

        let empty = snapshot(LogKind::Temperature, &[1, 0xFF, 0xFF]);
        assert!(empty.is_empty());
        assert_eq!(empty.range(), None);
    }

    #[test]
    fn test_to_csv() {
        let snap = snapshot(LogKind::Humidity, &[3, 40, 41]);
        let csv = snap.to_csv();
        assert_eq!(csv, "Index,Percent\n0,40.0\n1,41.0\n");
    }
}
