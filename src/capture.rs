//! Packet capture in the classic pcap format.
//!
//! Every buffer a link sends or receives can be mirrored to a capture file
//! for offline inspection in Wireshark. The capture is passive: a failing
//! capture file is logged and switched off, the link keeps running.
//!
//! File layout (all fields little-endian):
//!
//! ```text
//! global header, 24 bytes
//!   magic 0xA1B2C3D4 | version 2.4 | thiszone 0 | sigfigs 0 | snaplen | linktype
//! per record, 16 bytes + data
//!   ts_sec | ts_usec | incl_len | orig_len | data
//! ```
//!
//! Z21 datagrams are written with [`LINKTYPE_Z21`], CBUS GridConnect
//! records with [`LINKTYPE_CBUS`]. Both are user link types, so a custom
//! dissector is needed to decode them.

/// pcap magic number for microsecond timestamps.
pub const PCAP_MAGIC: u32 = 0xA1B2_C3D4;

/// Format version written to the global header.
pub const PCAP_VERSION: (u16, u16) = (2, 4);

/// Largest record stored in full.
pub const SNAPLEN: u32 = 65_535;

/// `LINKTYPE_USER0`, used for Z21 UDP payloads.
pub const LINKTYPE_Z21: u32 = 147;

/// `LINKTYPE_USER1`, used for CBUS GridConnect records.
pub const LINKTYPE_CBUS: u32 = 148;

/// Size of the file header.
pub const GLOBAL_HEADER_LEN: usize = 24;

/// Size of a record header.
pub const RECORD_HEADER_LEN: usize = 16;

/// Build the file header.
pub fn global_header(snaplen: u32, linktype: u32) -> [u8; GLOBAL_HEADER_LEN] {
    let mut out = [0u8; GLOBAL_HEADER_LEN];
    out[0..4].copy_from_slice(&PCAP_MAGIC.to_le_bytes());
    out[4..6].copy_from_slice(&PCAP_VERSION.0.to_le_bytes());
    out[6..8].copy_from_slice(&PCAP_VERSION.1.to_le_bytes());
    // thiszone and sigfigs stay zero
    out[16..20].copy_from_slice(&snaplen.to_le_bytes());
    out[20..24].copy_from_slice(&linktype.to_le_bytes());
    out
}

/// Build a record header for `len` bytes captured at `timestamp_us`.
///
/// `incl_len` is clamped to `snaplen`, `orig_len` keeps the real length.
pub fn record_header(timestamp_us: u64, len: usize, snaplen: u32) -> [u8; RECORD_HEADER_LEN] {
    let secs = (timestamp_us / 1_000_000) as u32;
    let micros = (timestamp_us % 1_000_000) as u32;
    let orig = u32::try_from(len).unwrap_or(u32::MAX);
    let incl = orig.min(snaplen);

    let mut out = [0u8; RECORD_HEADER_LEN];
    out[0..4].copy_from_slice(&secs.to_le_bytes());
    out[4..8].copy_from_slice(&micros.to_le_bytes());
    out[8..12].copy_from_slice(&incl.to_le_bytes());
    out[12..16].copy_from_slice(&orig.to_le_bytes());
    out
}

#[cfg(feature = "std")]
pub use writer::*;

#[cfg(feature = "std")]
mod writer {
    use std::fs::{File, OpenOptions};
    use std::io::{self, BufWriter, Read, Write};
    use std::path::{Path, PathBuf};
    use std::time::{Instant, SystemTime, UNIX_EPOCH};

    use log::{debug, info, warn};

    use super::*;

    /// Writes pcap records to any [`Write`] sink.
    ///
    /// The global header is written by [`new`](Self::new).
    ///
    /// # Example
    ///
    /// ```rust
    /// use rs_commandstation::capture::{PcapWriter, LINKTYPE_Z21};
    ///
    /// let mut pcap = PcapWriter::new(Vec::new(), LINKTYPE_Z21).unwrap();
    /// pcap.write_record(1_500_000, &[0x04, 0x00, 0x10, 0x00]).unwrap();
    ///
    /// let bytes = pcap.into_inner();
    /// assert_eq!(&bytes[0..4], &[0xD4, 0xC3, 0xB2, 0xA1]);
    /// assert_eq!(bytes.len(), 24 + 16 + 4);
    /// ```
    #[derive(Debug)]
    pub struct PcapWriter<W: Write> {
        inner: W,
        snaplen: u32,
        records: u64,
    }

    impl<W: Write> PcapWriter<W> {
        /// Write the global header and return the writer.
        pub fn new(inner: W, linktype: u32) -> io::Result<Self> {
            Self::with_snaplen(inner, linktype, SNAPLEN)
        }

        /// Same as [`new`](Self::new) with a custom snap length.
        pub fn with_snaplen(mut inner: W, linktype: u32, snaplen: u32) -> io::Result<Self> {
            inner.write_all(&global_header(snaplen, linktype))?;
            Ok(Self {
                inner,
                snaplen,
                records: 0,
            })
        }

        /// Continue a capture whose global header is already in `inner`.
        pub fn resume(inner: W, snaplen: u32) -> Self {
            Self {
                inner,
                snaplen,
                records: 0,
            }
        }

        /// Append one record.
        pub fn write_record(&mut self, timestamp_us: u64, data: &[u8]) -> io::Result<()> {
            self.inner
                .write_all(&record_header(timestamp_us, data.len(), self.snaplen))?;
            let incl = data.len().min(self.snaplen as usize);
            self.inner.write_all(&data[..incl])?;
            self.records += 1;
            Ok(())
        }

        /// Records written so far.
        pub fn records(&self) -> u64 {
            self.records
        }

        /// Flush the underlying sink.
        pub fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }

        /// Return the underlying sink.
        pub fn into_inner(self) -> W {
            self.inner
        }
    }

    /// Which way a captured buffer travelled.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum CaptureDirection {
        /// Received from the command station.
        Rx,
        /// Sent to the command station.
        Tx,
    }

    /// Capture file for one link.
    ///
    /// Timestamps are wall-clock microseconds taken at creation plus a
    /// monotonic offset, so records stay ordered if the system clock jumps.
    /// The first write error disables the sink.
    pub struct CaptureSink {
        writer: Option<PcapWriter<BufWriter<File>>>,
        path: PathBuf,
        epoch_us: u64,
        start: Instant,
        capture_rx: bool,
        capture_tx: bool,
    }

    impl CaptureSink {
        /// Open `<directory>/<link>.pcap` for appending.
        ///
        /// A reconnecting link keeps adding to the same capture. The global
        /// header is written only to an empty file; a file whose header does
        /// not match `linktype` is started over.
        pub fn create(directory: &Path, link: &str, linktype: u32) -> io::Result<Self> {
            std::fs::create_dir_all(directory)?;
            let path = directory.join(format!("{link}.pcap"));
            let mut file = OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(&path)?;
            let header = global_header(SNAPLEN, linktype);
            let writer = if file.metadata()?.len() == 0 {
                PcapWriter::new(BufWriter::new(file), linktype)?
            } else if has_header(&mut file, &header)? {
                debug!("[{}] appending to {}", link, path.display());
                PcapWriter::resume(BufWriter::new(file), SNAPLEN)
            } else {
                warn!(
                    "[{}] {} is not a matching capture, starting over",
                    link,
                    path.display()
                );
                file.set_len(0)?;
                PcapWriter::new(BufWriter::new(file), linktype)?
            };
            info!("[{}] capturing to {}", link, path.display());

            let epoch_us = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_micros() as u64)
                .unwrap_or(0);
            Ok(Self {
                writer: Some(writer),
                path,
                epoch_us,
                start: Instant::now(),
                capture_rx: true,
                capture_tx: true,
            })
        }

        /// Only capture one direction.
        pub fn with_directions(mut self, rx: bool, tx: bool) -> Self {
            self.capture_rx = rx;
            self.capture_tx = tx;
            self
        }

        /// Capture file path.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// `false` once a write failed.
        pub fn is_active(&self) -> bool {
            self.writer.is_some()
        }

        /// Mirror one buffer.
        pub fn record(&mut self, direction: CaptureDirection, data: &[u8]) {
            let wanted = match direction {
                CaptureDirection::Rx => self.capture_rx,
                CaptureDirection::Tx => self.capture_tx,
            };
            if !wanted {
                return;
            }
            let Some(writer) = self.writer.as_mut() else {
                return;
            };
            let ts = self.epoch_us + self.start.elapsed().as_micros() as u64;
            if let Err(e) = writer.write_record(ts, data) {
                warn!("capture to {} failed, disabling: {}", self.path.display(), e);
                self.writer = None;
            }
        }

        /// Flush buffered records to disk.
        pub fn flush(&mut self) {
            if let Some(writer) = self.writer.as_mut() {
                if let Err(e) = writer.flush() {
                    warn!("capture flush to {} failed: {}", self.path.display(), e);
                    self.writer = None;
                }
            }
        }
    }

    fn has_header(file: &mut File, header: &[u8; GLOBAL_HEADER_LEN]) -> io::Result<bool> {
        let mut existing = [0u8; GLOBAL_HEADER_LEN];
        match file.read_exact(&mut existing) {
            Ok(()) => Ok(&existing == header),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        }
    }

    impl Drop for CaptureSink {
        fn drop(&mut self) {
            self.flush();
        }
    }

    impl core::fmt::Debug for CaptureSink {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.debug_struct("CaptureSink")
                .field("path", &self.path)
                .field("active", &self.is_active())
                .finish()
        }
    }
}
