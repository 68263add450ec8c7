// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The L2 (Ethernet) control plane of a multi-engine, SR-IOV capable NIC.
//!
//! Vports, RX/TX queues, filters, RSS and statistics are configured by
//! posting ramrods to firmware on the slow-path queue, or, for a VF, by
//! asking the PF to do so. Ring memory, interrupts, register mappings and
//! the VF-to-PF transport belong to the caller and are reached through
//! [`SlowPathChannel`], [`RegisterIo`] and [`VfChannel`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod device;
mod error;
pub mod execution;
pub mod filter;
pub mod hwfn;
pub mod io;
pub mod queue;
pub mod resources;
pub mod rss;
pub mod spq;
pub mod stats;
#[cfg(test)]
mod tests;
pub mod vport;

pub use device::L2Device;
pub use error::L2Error;
pub use error::QueueStopError;
pub use error::RamrodKind;
pub use error::ResourceKind;
pub use execution::VfChannel;
pub use io::RegisterIo;
pub use spq::SlowPathChannel;

#[cfg(test)]
fn init_test_tracing() {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::filter::Targets;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    // Tests share one subscriber. Later calls find it installed.
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(LevelFilter::TRACE)
        .finish()
        .with(Targets::new().with_target("l2_driver", LevelFilter::DEBUG))
        .try_init();
}
