//! Logical channel ids and the ordered channel map of a session.

use serde::{Deserialize, Serialize};

/// A logical channel id in the device's channel address space.
pub type ChannelId = u16;

/// Starting addresses of the channel groups in the device's address space.
///
/// Channels inside a group are addressed by offset, e.g. the z axis of the
/// accelerometer is `ACCELEROMETER + 2`.
pub mod ids {
    use super::ChannelId;

    /// Sample number, counting from 0 at stream start.
    pub const SAMPLE_NUMBER: ChannelId = 0;
    /// Electrode measurement value (uV).
    pub const ELECTRODE_MEASUREMENT: ChannelId = 1;
    /// Contact state of the positive side of an electrode.
    pub const ELECTRODE_CONTACT_P: ChannelId = 513;
    /// Contact state of an electrode.
    pub const ELECTRODE_CONTACT: ChannelId = 1025;
    /// Contact state of the negative side of an electrode.
    pub const ELECTRODE_CONTACT_N: ChannelId = 1537;
    /// Digital IO pin.
    pub const DIGITAL_INPUT: ChannelId = 2049;
    /// Gyroscope axes.
    pub const GYROSCOPE: ChannelId = 2497;
    /// Accelerometer axes.
    pub const ACCELEROMETER: ChannelId = 2561;
    /// Streaming flag.
    pub const STREAMING: ChannelId = 2625;
}

/// Semantic kind of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Eeg,
    Accelerometer,
    Digital,
    SampleCounter,
    Misc,
}

impl ChannelKind {
    /// Channel type name used by the downstream time-series container.
    pub fn container_type(&self) -> &'static str {
        match self {
            ChannelKind::Eeg => "eeg",
            ChannelKind::Accelerometer => "misc",
            ChannelKind::Digital => "stim",
            ChannelKind::SampleCounter => "syst",
            ChannelKind::Misc => "misc",
        }
    }

    /// Best-effort kind of a raw channel id, based on the group it falls in.
    pub fn for_channel(id: ChannelId) -> Self {
        match id {
            ids::SAMPLE_NUMBER => ChannelKind::SampleCounter,
            id if id < ids::ELECTRODE_CONTACT_P => ChannelKind::Eeg,
            id if (ids::DIGITAL_INPUT..ids::GYROSCOPE).contains(&id) => ChannelKind::Digital,
            id if (ids::ACCELEROMETER..ids::STREAMING).contains(&id) => ChannelKind::Accelerometer,
            _ => ChannelKind::Misc,
        }
    }
}

/// Display name and kind of one logical channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub kind: ChannelKind,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelMapError {
    #[error("channel {0} is already mapped")]
    DuplicateChannel(ChannelId),
}

/// Ordered mapping from logical channel id to its spec.
///
/// Insertion order is the buffer row order of the session; ids are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMap {
    entries: Vec<(ChannelId, ChannelSpec)>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a channel at the end of the map.
    pub fn insert(&mut self, id: ChannelId, spec: ChannelSpec) -> Result<(), ChannelMapError> {
        if self.contains(id) {
            return Err(ChannelMapError::DuplicateChannel(id));
        }
        self.entries.push((id, spec));
        Ok(())
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.entries.iter().any(|(existing, _)| *existing == id)
    }

    pub fn get(&self, id: ChannelId) -> Option<&ChannelSpec> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, spec)| spec)
    }

    /// Position of a channel in insertion order.
    pub fn position(&self, id: ChannelId) -> Option<usize> {
        self.entries.iter().position(|(existing, _)| *existing == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn specs(&self) -> impl Iterator<Item = &ChannelSpec> + '_ {
        self.entries.iter().map(|(_, spec)| spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &ChannelSpec)> + '_ {
        self.entries.iter().map(|(id, spec)| (*id, spec))
    }

    /// Ids of all channels of the given kind, in map order.
    pub fn ids_of_kind(&self, kind: ChannelKind) -> Vec<ChannelId> {
        self.entries
            .iter()
            .filter(|(_, spec)| spec.kind == kind)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl TryFrom<Vec<(ChannelId, ChannelSpec)>> for ChannelMap {
    type Error = ChannelMapError;

    fn try_from(entries: Vec<(ChannelId, ChannelSpec)>) -> Result<Self, Self::Error> {
        let mut map = ChannelMap::new();
        for (id, spec) in entries {
            map.insert(id, spec)?;
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_row_order() {
        let mut map = ChannelMap::new();
        map.insert(ids::ELECTRODE_MEASUREMENT + 1, ChannelSpec::new("F4", ChannelKind::Eeg))
            .unwrap();
        map.insert(ids::ELECTRODE_MEASUREMENT, ChannelSpec::new("F3", ChannelKind::Eeg))
            .unwrap();
        map.insert(ids::SAMPLE_NUMBER, ChannelSpec::new("Sample", ChannelKind::SampleCounter))
            .unwrap();

        let ids: Vec<_> = map.ids().collect();
        assert_eq!(ids, vec![2, 1, 0]);
        assert_eq!(map.position(ids::SAMPLE_NUMBER), Some(2));
        assert_eq!(map.get(1).map(|s| s.name.as_str()), Some("F3"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = ChannelMap::try_from(vec![
            (1, ChannelSpec::new("F3", ChannelKind::Eeg)),
            (1, ChannelSpec::new("F3 again", ChannelKind::Eeg)),
        ]);
        assert_eq!(result, Err(ChannelMapError::DuplicateChannel(1)));
    }

    #[test]
    fn kinds_follow_the_address_space() {
        assert_eq!(ChannelKind::for_channel(ids::SAMPLE_NUMBER), ChannelKind::SampleCounter);
        assert_eq!(ChannelKind::for_channel(ids::ELECTRODE_MEASUREMENT + 7), ChannelKind::Eeg);
        assert_eq!(ChannelKind::for_channel(ids::DIGITAL_INPUT), ChannelKind::Digital);
        assert_eq!(ChannelKind::for_channel(ids::ACCELEROMETER + 2), ChannelKind::Accelerometer);
        assert_eq!(ChannelKind::for_channel(ids::STREAMING), ChannelKind::Misc);
        assert_eq!(ChannelKind::Digital.container_type(), "stim");
    }
}
