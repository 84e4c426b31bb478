// src/extcap/pcap.rs
//
// Classic libpcap stream writer. Every record is flushed immediately so the
// reader on the other end of the FIFO sees packets live.

use std::io::{self, Write};

/// Link-layer type USER1, dissected by the Silicon Labs Wireshark plugin
pub const LINKTYPE_USER1: u32 = 147;

pub const PCAP_MAGIC: u32 = 0xa1b2_c3d4;

/// Global header length in bytes
pub const GLOBAL_HEADER_LEN: usize = 24;

/// Per-record header length in bytes
pub const RECORD_HEADER_LEN: usize = 16;

pub struct PcapWriter<W: Write> {
    inner: W,
    snaplen: u32,
}

impl<W: Write> PcapWriter<W> {
    /// Write the global header and return the writer.
    pub fn new(mut inner: W, snaplen: u32) -> io::Result<Self> {
        let mut header = Vec::with_capacity(GLOBAL_HEADER_LEN);
        header.extend_from_slice(&PCAP_MAGIC.to_le_bytes());
        header.extend_from_slice(&2u16.to_le_bytes()); // version major
        header.extend_from_slice(&4u16.to_le_bytes()); // version minor
        header.extend_from_slice(&0i32.to_le_bytes()); // thiszone
        header.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
        header.extend_from_slice(&snaplen.to_le_bytes());
        header.extend_from_slice(&LINKTYPE_USER1.to_le_bytes());
        inner.write_all(&header)?;
        inner.flush()?;
        Ok(PcapWriter { inner, snaplen })
    }

    /// Append one packet stamped with `timestamp_us` (microseconds since the
    /// UNIX epoch). Data beyond the snaplen is cut off.
    pub fn write_record(&mut self, timestamp_us: u64, data: &[u8]) -> io::Result<()> {
        let orig_len = data.len() as u32;
        let incl_len = orig_len.min(self.snaplen);

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + incl_len as usize);
        record.extend_from_slice(&((timestamp_us / 1_000_000) as u32).to_le_bytes());
        record.extend_from_slice(&((timestamp_us % 1_000_000) as u32).to_le_bytes());
        record.extend_from_slice(&incl_len.to_le_bytes());
        record.extend_from_slice(&orig_len.to_le_bytes());
        record.extend_from_slice(&data[..incl_len as usize]);
        self.inner.write_all(&record)?;
        self.inner.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.inner
    }
}
