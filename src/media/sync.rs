//! Late-joiner synchronization
//!
//! A viewer joining a live transport stream mid-flight lands somewhere
//! inside a compressed picture. Before forwarding anything, it needs:
//! 1. The latest program association table (PAT)
//! 2. The program map table (PMT) it points to
//! 3. Everything from the start of the next keyframe onwards
//!
//! `SyncFinder` watches the viewer's packets until all three are available
//! and hands back that lead-in exactly once. Afterwards the caller forwards
//! packets directly. Tables may span several packets; every packet of the
//! latest complete table is kept for the lead-in.

use bytes::Bytes;

use super::nal::is_keyframe_start;
use super::ts::{self, PmtStream, TsError, TsHeader, PAT_PID, TS_PACKET_SIZE};

/// Per-viewer synchronization state
#[derive(Debug, Default)]
pub struct SyncFinder {
    /// Packets of the latest PAT
    pat: Vec<Bytes>,
    /// PMT PID announced by the PAT (first program)
    pmt_pid: Option<u16>,
    /// Packets of the latest PMT for `pmt_pid`
    pmt: Vec<Bytes>,
    pat_section: SectionCollector,
    pmt_section: SectionCollector,
    /// Elementary stream whose access units mark sync points
    sync_stream: Option<PmtStream>,
    /// Packets that could not be parsed
    malformed: u64,
    /// Set once the lead-in was produced
    synchronized: bool,
}

/// A table section completed by [`SectionCollector::push`]
struct Section {
    /// Payload bytes from the pointer field on
    payload: Vec<u8>,
    packets: Vec<Bytes>,
}

/// Gathers one PSI section from the packets of a single PID
#[derive(Debug, Default)]
struct SectionCollector {
    payload: Vec<u8>,
    packets: Vec<Bytes>,
}

impl SectionCollector {
    /// Add a packet, returning the section once its last byte arrived
    fn push(&mut self, packet: &Bytes, header: &TsHeader) -> Result<Option<Section>, TsError> {
        if header.pusi {
            self.reset();
        } else if self.packets.is_empty() {
            // Tail of a section whose start was never seen
            return Ok(None);
        }

        self.payload.extend_from_slice(header.payload(packet));
        self.packets.push(packet.clone());

        match ts::section_span(&self.payload) {
            Ok(Some(span)) if self.payload.len() >= span => Ok(Some(Section {
                payload: std::mem::take(&mut self.payload),
                packets: std::mem::take(&mut self.packets),
            })),
            Ok(_) => Ok(None),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn reset(&mut self) {
        self.payload.clear();
        self.packets.clear();
    }
}

impl SyncFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one relay buffer (a run of 188-byte packets)
    ///
    /// Returns `None` while still waiting for a sync point. On the call that
    /// finds it, returns the lead-in: the PAT packets, the PMT packets, then
    /// the rest of `buf` starting at the packet that opens the keyframe.
    pub fn consider(&mut self, buf: &Bytes) -> Option<Vec<Bytes>> {
        if self.synchronized {
            return Some(vec![buf.clone()]);
        }

        let mut offset = 0;
        while offset < buf.len() {
            let end = (offset + TS_PACKET_SIZE).min(buf.len());
            let packet = buf.slice(offset..end);

            match self.inspect(&packet) {
                Ok(true) => return Some(self.lead_in(buf.slice(offset..))),
                Ok(false) => {}
                Err(e) => {
                    self.malformed += 1;
                    tracing::trace!(error = %e, offset, "Skipping malformed packet while syncing");
                }
            }

            offset = end;
        }

        None
    }

    /// Whether the lead-in was already produced
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Number of packets skipped because they could not be parsed
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    /// Returns true when `packet` opens a sync point
    fn inspect(&mut self, packet: &Bytes) -> Result<bool, TsError> {
        let header = TsHeader::parse(packet)?;

        if header.pid == PAT_PID {
            if let Some(section) = self.pat_section.push(packet, &header)? {
                self.on_pat(section)?;
            }
            return Ok(false);
        }

        if Some(header.pid) == self.pmt_pid {
            if let Some(section) = self.pmt_section.push(packet, &header)? {
                self.on_pmt(section)?;
            }
            return Ok(false);
        }

        let Some(stream) = self.sync_stream else {
            return Ok(false);
        };
        if header.pid != stream.pid || self.pat.is_empty() || self.pmt.is_empty() {
            return Ok(false);
        }

        if !stream.stream_type.is_video() {
            return Ok(header.pusi);
        }
        if header.random_access && header.pusi {
            return Ok(true);
        }
        if !header.pusi {
            return Ok(false);
        }

        let es = ts::pes_payload(header.payload(packet))?;
        Ok(is_keyframe_start(stream.stream_type, es))
    }

    fn on_pat(&mut self, section: Section) -> Result<(), TsError> {
        let programs = ts::parse_pat(&section.payload)?;
        let Some(&(_, pmt_pid)) = programs.first() else {
            return Ok(());
        };

        if self.pmt_pid != Some(pmt_pid) {
            self.pmt.clear();
            self.pmt_section.reset();
            self.sync_stream = None;
        }
        self.pmt_pid = Some(pmt_pid);
        self.pat = section.packets;
        Ok(())
    }

    fn on_pmt(&mut self, section: Section) -> Result<(), TsError> {
        let streams = ts::parse_pmt(&section.payload)?;
        let chosen = streams
            .iter()
            .find(|s| s.stream_type.is_video())
            .or_else(|| streams.first())
            .copied();

        if chosen.is_some() {
            self.sync_stream = chosen;
            self.pmt = section.packets;
        }
        Ok(())
    }

    fn lead_in(&mut self, from_keyframe: Bytes) -> Vec<Bytes> {
        self.synchronized = true;

        let mut lead_in = Vec::with_capacity(self.pat.len() + self.pmt.len() + 1);
        lead_in.append(&mut self.pat);
        lead_in.append(&mut self.pmt);
        lead_in.push(from_keyframe);

        tracing::debug!(
            packets = lead_in.len(),
            skipped_malformed = self.malformed,
            "Synchronized on keyframe"
        );
        lead_in
    }
}
