//! Topic utilities for MQTT.
//!
//! Validation of topic names and filters, and expansion of a room/device
//! table into concrete `room/device` topics.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Topic level separator.
pub const SEPARATOR: char = '/';

/// Rooms mapped to their ordered device names.
///
/// Deserializes from a plain mapping:
///
/// ```yaml
/// room1: [device1, device2]
/// room2: [device1]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomDeviceTable(BTreeMap<String, Vec<String>>);

impl RoomDeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append devices under a room, creating the room if needed.
    pub fn with_room<I, S>(mut self, room: impl Into<String>, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(room.into())
            .or_default()
            .extend(devices.into_iter().map(Into::into));
        self
    }

    pub fn rooms(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(room, devices)| (room.as_str(), devices.as_slice()))
    }

    /// Total number of devices over all rooms.
    pub fn device_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<R, D> FromIterator<(R, Vec<D>)> for RoomDeviceTable
where
    R: Into<String>,
    D: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (R, Vec<D>)>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::new(), |table, (room, devices)| table.with_room(room, devices))
    }
}

/// Expand a room/device table into `room/device` topics.
///
/// Rooms come out in name order, devices in table order. Every name is
/// validated before anything is emitted, so an error never comes with
/// partial output.
pub fn build_topics(table: &RoomDeviceTable) -> Result<Vec<String>> {
    for (room, devices) in table.rooms() {
        check_segment(room).map_err(|reason| Error::InvalidTableEntry {
            room: room.to_string(),
            device: None,
            reason,
        })?;

        let mut seen = HashSet::with_capacity(devices.len());
        for device in devices {
            let invalid = |reason: &'static str| Error::InvalidTableEntry {
                room: room.to_string(),
                device: Some(device.clone()),
                reason,
            };
            check_segment(device).map_err(invalid)?;
            if !seen.insert(device.as_str()) {
                return Err(invalid("device listed twice"));
            }
        }
    }

    let topics = table
        .rooms()
        .flat_map(|(room, devices)| {
            devices
                .iter()
                .map(move |device| format!("{room}{SEPARATOR}{device}"))
        })
        .collect();

    Ok(topics)
}

fn check_segment(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty name");
    }
    if name.contains(SEPARATOR) {
        return Err("contains '/'");
    }
    if name.contains(['+', '#']) {
        return Err("contains a wildcard character");
    }
    if name.contains('\0') {
        return Err("contains NUL");
    }
    Ok(())
}

/// Check a topic name for PUBLISH: non-empty, no wildcards, no NUL.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.contains(['+', '#', '\0']) {
        return Err(Error::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// Check a topic filter for SUBSCRIBE.
///
/// `+` must occupy a whole level; `#` must occupy the whole last level.
pub fn validate_filter(filter: &str) -> Result<()> {
    let invalid = || Error::InvalidTopicFilter(filter.to_string());

    if filter.is_empty() || filter.contains('\0') {
        return Err(invalid());
    }

    let mut levels = filter.split(SEPARATOR).peekable();
    while let Some(level) = levels.next() {
        let is_last = levels.peek().is_none();
        match level {
            "#" if !is_last => return Err(invalid()),
            "#" | "+" => {}
            _ if level.contains(['+', '#']) => return Err(invalid()),
            _ => {}
        }
    }
    Ok(())
}
