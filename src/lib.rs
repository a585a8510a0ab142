#![allow(
    non_camel_case_types,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation
)]

pub mod config;
pub mod dram;
pub mod mapper;
pub mod request;

pub use config::{MapperKind, MappingConfig};
pub use dram::{DramModel, Level, Organization};
pub use mapper::{AddressMapper, ChannelHistogram, ChannelObserver, Geometry};
pub use request::Request;

pub type address = u64;
