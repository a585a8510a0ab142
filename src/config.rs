use serde::{Deserialize, Serialize};

/// Which address-mapping strategy to instantiate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapperKind {
    /// Plain RoBaRaCoCh bit slicing.
    #[default]
    Linear,
    /// Channel-group aware (chip-select gated) channel computation.
    Grouped,
}

/// Active-channel counts the grouped strategy accepts.
pub const VALID_ACTIVE_CHANNELS: [usize; 5] = [2, 4, 8, 16, 32];

/// Address-mapping section of the simulator configuration.
///
/// All fields are optional in the serialized form and fall back to the
/// defaults below; only the grouped strategy reads the channel policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MappingConfig {
    pub kind: MapperKind,
    /// Channels kept active per chip-select group, one of
    /// [`VALID_ACTIVE_CHANNELS`]. Clamped to the device's channel count.
    pub active_channels: usize,
    /// Position of the group-select bit, in raw byte-address terms
    /// (before transfer-unit normalization).
    pub group_select_bit: u32,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            kind: MapperKind::Linear,
            active_channels: 16,
            group_select_bit: 10,
        }
    }
}
