use serde::{Deserialize, Serialize};

/// Canonical DRAM hierarchy levels, outermost first.
///
/// Not every topology has every level: pseudochannel and bankgroup are
/// optional and simply absent from flat organizations.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Channel,
    Pseudochannel,
    Bankgroup,
    Bank,
    Row,
    Column,
}

/// Read-only view of a DRAM device's organization.
///
/// This is the contract the mapping stage consumes: an ordered level list
/// with per-level entry counts, the internal prefetch size, and the channel
/// width. Entry counts stay empty until the device model has finished its
/// own initialization, which is how mappers detect a bad init order.
pub trait DramModel: Send + Sync + 'static {
    /// Hierarchy levels in address order, channel outermost.
    fn levels(&self) -> &[Level];

    /// Entry counts, one per level.
    fn level_counts(&self) -> &[usize];

    /// Burst length absorbed into one column access, in words.
    fn internal_prefetch_size(&self) -> usize;

    /// Width of one channel's data bus, in bits.
    fn channel_width_bits(&self) -> usize;

    /// Position of `level` in the hierarchy, `None` when the topology
    /// omits it.
    fn level_index(&self, level: Level) -> Option<usize> {
        self.levels().iter().position(|&l| l == level)
    }
}

/// A concrete device organization, e.g. the device section of a YAML
/// simulator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub levels: Vec<Level>,
    pub count: Vec<usize>,
    pub internal_prefetch_size: usize,
    pub channel_width: usize,
}

impl Organization {
    /// HBM2-style six-level topology with pseudochannels and bankgroups.
    #[must_use]
    pub fn hbm2() -> Self {
        Self {
            levels: vec![
                Level::Channel,
                Level::Pseudochannel,
                Level::Bankgroup,
                Level::Bank,
                Level::Row,
                Level::Column,
            ],
            count: vec![8, 2, 4, 4, 32768, 64],
            internal_prefetch_size: 4,
            channel_width: 128,
        }
    }

    /// Flat 32-channel topology in the HBM4 direction: no pseudochannels,
    /// banks folded into a single level.
    #[must_use]
    pub fn hbm4() -> Self {
        Self {
            levels: vec![Level::Channel, Level::Bank, Level::Row, Level::Column],
            count: vec![32, 16, 32768, 1024],
            internal_prefetch_size: 8,
            channel_width: 64,
        }
    }
}

impl DramModel for Organization {
    fn levels(&self) -> &[Level] {
        &self.levels
    }

    fn level_counts(&self) -> &[usize] {
        &self.count
    }

    fn internal_prefetch_size(&self) -> usize {
        self.internal_prefetch_size
    }

    fn channel_width_bits(&self) -> usize {
        self.channel_width
    }
}
