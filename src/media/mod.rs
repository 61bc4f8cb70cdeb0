//! Media handling for the relay
//!
//! This module provides:
//! - MPEG-TS packet, PAT/PMT and PES header parsing
//! - Annex-B NAL unit scanning (H.264, H.265, MPEG-2 video)
//! - Sync point detection for late joiners

pub mod nal;
pub mod sync;
pub mod ts;

pub use nal::{AnnexBIterator, AvcNaluType, HevcNaluType};
pub use sync::SyncFinder;
pub use ts::{StreamType, TsError, TsHeader, TS_PACKET_SIZE};
