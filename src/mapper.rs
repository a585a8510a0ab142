use super::{
    address,
    config::{MapperKind, MappingConfig, VALID_ACTIVE_CHANNELS},
    dram::{DramModel, Level},
    request::Request,
};
use color_eyre::eyre::{self, WrapErr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Base 2 logarithm of n, rounded up.
///
/// Effectively the number of address bits required to index n entries.
#[must_use]
pub fn log2_ceil(n: usize) -> u32 {
    n.max(1).next_power_of_two().trailing_zeros()
}

/// Remove and return the low `bits` bits of `addr`.
pub fn slice_lower_bits(addr: &mut address, bits: u32) -> u64 {
    let sliced = *addr & ((1u64 << bits) - 1);
    *addr >>= bits;
    sliced
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("device organization not ready (empty entry-count list); bad init order?")]
    DeviceNotReady,

    #[error("entry-count list has {found} entries but the topology has {expected} levels")]
    LevelCountMismatch { found: usize, expected: usize },

    #[error("mandatory level \"{0}\" missing from the device topology")]
    MissingLevel(Level),

    #[error("active channel count {0} is not one of {{2, 4, 8, 16, 32}}")]
    InvalidActiveChannels(usize),
}

/// Bit-slice geometry of one device topology.
///
/// Built once per mapper from the device model's organization and immutable
/// afterwards; every request is sliced against this structure, so nothing
/// here is recomputed on the hot path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    num_levels: usize,
    bits_per_level: Vec<u32>,
    /// Low-order bits that address within a single transfer unit; they are
    /// discarded before any level slicing.
    tx_shift: u32,
    idx_channel: usize,
    idx_pseudochannel: Option<usize>,
    idx_bankgroup: Option<usize>,
    idx_bank: usize,
    idx_row: usize,
    idx_column: usize,
}

impl Geometry {
    /// Derive the geometry from `dram`'s organization.
    ///
    /// Fails fast on the fatal misconfigurations: the device not being
    /// initialized yet, an entry-count list whose length disagrees with the
    /// level list, or a mandatory level missing from the topology.
    pub fn build(dram: &dyn DramModel) -> Result<Self, Error> {
        let count = dram.level_counts();
        if count.is_empty() {
            return Err(Error::DeviceNotReady);
        }
        let expected = dram.levels().len();
        if count.len() != expected {
            return Err(Error::LevelCountMismatch {
                found: count.len(),
                expected,
            });
        }

        let mut bits_per_level: Vec<u32> = count.iter().map(|&n| log2_ceil(n)).collect();

        let require =
            |level: Level| dram.level_index(level).ok_or(Error::MissingLevel(level));
        let idx_channel = require(Level::Channel)?;
        let idx_bank = require(Level::Bank)?;
        let idx_row = require(Level::Row)?;
        let idx_column = require(Level::Column)?;
        let idx_pseudochannel = dram.level_index(Level::Pseudochannel);
        let idx_bankgroup = dram.level_index(Level::Bankgroup);

        // the internal prefetch burst is addressed within one column access,
        // so those bits never reach the column index
        let prefetch_bits = log2_ceil(dram.internal_prefetch_size());
        bits_per_level[idx_column] = bits_per_level[idx_column].saturating_sub(prefetch_bits);

        let tx_bytes = dram.internal_prefetch_size() * dram.channel_width_bits() / 8;
        let tx_shift = log2_ceil(tx_bytes);

        log::debug!(
            "built mapping geometry: bits={:?} tx_shift={}",
            bits_per_level,
            tx_shift
        );

        Ok(Self {
            num_levels: count.len(),
            bits_per_level,
            tx_shift,
            idx_channel,
            idx_pseudochannel,
            idx_bankgroup,
            idx_bank,
            idx_row,
            idx_column,
        })
    }

    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    #[must_use]
    pub fn bits_per_level(&self) -> &[u32] {
        &self.bits_per_level
    }

    #[must_use]
    pub fn tx_shift(&self) -> u32 {
        self.tx_shift
    }

    /// Position of `level` in the address vector, `None` for optional
    /// levels the topology omits.
    #[must_use]
    pub fn index_of(&self, level: Level) -> Option<usize> {
        match level {
            Level::Channel => Some(self.idx_channel),
            Level::Pseudochannel => self.idx_pseudochannel,
            Level::Bankgroup => self.idx_bankgroup,
            Level::Bank => Some(self.idx_bank),
            Level::Row => Some(self.idx_row),
            Level::Column => Some(self.idx_column),
        }
    }

    /// Discard the bits addressing within a single transfer unit.
    #[must_use]
    pub fn normalize(&self, addr: address) -> address {
        addr >> self.tx_shift
    }

    /// Slice every level after the channel, in RoBaRaCoCh order: row, bank,
    /// bankgroup and pseudochannel when present, column last. Zero-width
    /// levels consume nothing and their slot stays unset.
    fn slice_after_channel(&self, addr: &mut address, addr_vec: &mut [Option<u64>]) {
        addr_vec[self.idx_row] = Some(slice_lower_bits(addr, self.bits_per_level[self.idx_row]));
        addr_vec[self.idx_bank] = Some(slice_lower_bits(addr, self.bits_per_level[self.idx_bank]));
        for idx in [self.idx_bankgroup, self.idx_pseudochannel]
            .into_iter()
            .flatten()
        {
            if self.bits_per_level[idx] > 0 {
                addr_vec[idx] = Some(slice_lower_bits(addr, self.bits_per_level[idx]));
            }
        }
        addr_vec[self.idx_column] =
            Some(slice_lower_bits(addr, self.bits_per_level[self.idx_column]));
    }
}

/// An address-mapping strategy.
///
/// `apply` runs once per request on the simulator hot path. It is a pure
/// bounded computation: deterministic, infallible once the mapper is
/// constructed, and safe to call from concurrent readers since all mapper
/// state is immutable after construction.
pub trait AddressMapper: Send + Sync + 'static {
    /// Fill `req.addr_vec` with the hierarchy coordinates of `req.addr`.
    ///
    /// Resizes the vector to the level count and overwrites every slot;
    /// `req.addr` itself is left untouched.
    fn apply(&self, req: &mut Request);

    /// The geometry this mapper slices against.
    fn geometry(&self) -> &Geometry;
}

impl AddressMapper for Arc<dyn AddressMapper> {
    fn apply(&self, req: &mut Request) {
        (**self).apply(req);
    }

    fn geometry(&self) -> &Geometry {
        (**self).geometry()
    }
}

/// RoBaRaCoCh bit slicing with optional pseudochannel/bankgroup levels.
///
/// Channel bits come first, the column takes whatever remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearRoBaRaCoCh {
    geometry: Geometry,
}

impl LinearRoBaRaCoCh {
    /// Bind to `dram` and build the geometry eagerly; mapping construction
    /// aborts here on any fatal misconfiguration, before any request can
    /// reach `apply`.
    pub fn new(dram: &dyn DramModel) -> Result<Self, Error> {
        Ok(Self {
            geometry: Geometry::build(dram)?,
        })
    }
}

impl AddressMapper for LinearRoBaRaCoCh {
    fn apply(&self, req: &mut Request) {
        let geom = &self.geometry;
        req.addr_vec.clear();
        req.addr_vec.resize(geom.num_levels, None);

        let mut addr = geom.normalize(req.addr);
        req.addr_vec[geom.idx_channel] = Some(slice_lower_bits(
            &mut addr,
            geom.bits_per_level[geom.idx_channel],
        ));
        geom.slice_after_channel(&mut addr, &mut req.addr_vec);
    }

    fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

/// Observability seam for channel selection: the mapper reports every
/// resolved channel, the sink aggregates. Keeps counters out of the
/// mapping core itself.
pub trait ChannelObserver: Send + Sync + 'static {
    fn channel_selected(&self, channel: u64);
}

/// Per-channel selection counts over relaxed atomic counters.
///
/// A channel outside the configured range lands in a single overflow cell
/// instead of faulting.
#[derive(Debug, Default)]
pub struct ChannelHistogram {
    counts: Vec<AtomicU64>,
    overflow: AtomicU64,
}

impl ChannelHistogram {
    #[must_use]
    pub fn new(num_channels: usize) -> Self {
        Self {
            counts: (0..num_channels).map(|_| AtomicU64::new(0)).collect(),
            overflow: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn counts(&self) -> Vec<u64> {
        self.counts
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect()
    }

    #[must_use]
    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

impl ChannelObserver for ChannelHistogram {
    fn channel_selected(&self, channel: u64) {
        match self.counts.get(channel as usize) {
            Some(count) => {
                count.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Channel-group aware mapping (chip-select gating).
///
/// The channel index is computed in two stages: a coarse group picked by a
/// configured address bit and a fine intra-group channel from the low-order
/// bits, recombined as `group * active_channels + intra`. All remaining
/// levels slice exactly like [`LinearRoBaRaCoCh`].
pub struct GroupedChannel {
    geometry: Geometry,
    total_channels: usize,
    active_channels: usize,
    group_bits: u32,
    intra_bits: u32,
    /// Group-select bit position rebased into transfer-unit terms.
    group_select_bit_trx: u32,
    observer: Option<Arc<dyn ChannelObserver>>,
}

impl GroupedChannel {
    pub fn new(dram: &dyn DramModel, config: &MappingConfig) -> Result<Self, Error> {
        if !VALID_ACTIVE_CHANNELS.contains(&config.active_channels) {
            return Err(Error::InvalidActiveChannels(config.active_channels));
        }
        let geometry = Geometry::build(dram)?;

        let total_channels = dram.level_counts()[geometry.idx_channel];
        let active_channels = config.active_channels.min(total_channels).max(1);
        // truncating division: an uneven split loses the remainder channels
        let group_count = total_channels / active_channels;
        let group_bits = if group_count > 1 { group_count.ilog2() } else { 0 };
        let intra_bits = if active_channels > 1 {
            active_channels.ilog2()
        } else {
            0
        };
        // the configured position is given in raw byte-address terms and
        // must not underflow past the transfer-unit shift
        let group_select_bit_trx = config.group_select_bit.saturating_sub(geometry.tx_shift);

        log::debug!(
            "grouped channel policy: total={} active={} group_bits={} intra_bits={} sel_bit_trx={}",
            total_channels,
            active_channels,
            group_bits,
            intra_bits,
            group_select_bit_trx
        );

        Ok(Self {
            geometry,
            total_channels,
            active_channels,
            group_bits,
            intra_bits,
            group_select_bit_trx,
            observer: None,
        })
    }

    /// Attach a channel-selection sink, e.g. a [`ChannelHistogram`].
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ChannelObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn resolve_channel(&self, normalized: address) -> u64 {
        let group_id = if self.group_bits > 0 {
            (normalized >> self.group_select_bit_trx) & ((1u64 << self.group_bits) - 1)
        } else {
            0
        };
        let intra_id = if self.intra_bits > 0 {
            normalized & ((1u64 << self.intra_bits) - 1)
        } else {
            0
        };
        group_id * self.active_channels as u64 + intra_id
    }
}

impl std::fmt::Debug for GroupedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("GroupedChannel")
            .field("total_channels", &self.total_channels)
            .field("active_channels", &self.active_channels)
            .field("group_bits", &self.group_bits)
            .field("intra_bits", &self.intra_bits)
            .field("group_select_bit_trx", &self.group_select_bit_trx)
            .finish()
    }
}

impl AddressMapper for GroupedChannel {
    fn apply(&self, req: &mut Request) {
        let geom = &self.geometry;
        req.addr_vec.clear();
        req.addr_vec.resize(geom.num_levels, None);

        let normalized = geom.normalize(req.addr);
        // written through without a range check: when the active count does
        // not divide the channel count evenly the remainder channels are
        // simply never selected
        let channel = self.resolve_channel(normalized);
        req.addr_vec[geom.idx_channel] = Some(channel);

        if let Some(observer) = &self.observer {
            observer.channel_selected(channel);
        }
        log::trace!(
            "addr={:#x} normalized={:#x} sel_bit_trx={} channel={}",
            req.addr,
            normalized,
            self.group_select_bit_trx,
            channel
        );

        // consume a fixed channel-width field from the working copy no
        // matter how those bits were recombined into the channel index
        let mut addr = normalized;
        let _ = slice_lower_bits(&mut addr, geom.bits_per_level[geom.idx_channel]);
        geom.slice_after_channel(&mut addr, &mut req.addr_vec);
    }

    fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

/// Build the mapper selected by `config`, bound to `dram`'s organization.
pub fn build(
    config: &MappingConfig,
    dram: &dyn DramModel,
) -> eyre::Result<Box<dyn AddressMapper>> {
    let mapper: Box<dyn AddressMapper> = match config.kind {
        MapperKind::Linear => Box::new(
            LinearRoBaRaCoCh::new(dram).wrap_err("building linear RoBaRaCoCh mapper")?,
        ),
        MapperKind::Grouped => Box::new(
            GroupedChannel::new(dram, config).wrap_err("building grouped channel mapper")?,
        ),
    };
    Ok(mapper)
}
