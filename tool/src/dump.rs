use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use pretty_hex::{HexConfig, PrettyHex};
use util::{Halftrack, NOMINAL_CAPACITY};

use crate::transport::{Command, Transport, TransportResult};

enum DumpEntry {
    Track {
        halftrack: Halftrack,
        density: u8,
        header: Vec<u8>,
        data: Vec<u8>,
    },
    Fill {
        halftrack: Halftrack,
        byte: u8,
    },
    AlignDisk,
}

/// Transport without hardware. Everything which would be written to the disk
/// is collected and can be dumped as text.
///
/// Capacity measurements are answered as if the drive runs at 300 RPM.
pub struct DumpTransport {
    halftrack: Halftrack,
    density: u8,
    pending: Option<Command>,
    header: Vec<u8>,
    responses: VecDeque<u8>,
    entries: Vec<DumpEntry>,
}

impl DumpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            halftrack: Halftrack(2),
            density: 0,
            pending: None,
            header: Vec::new(),
            responses: VecDeque::new(),
            entries: Vec::new(),
        }
    }

    /// Number of tracks which were written or filled
    #[must_use]
    pub fn tracks(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !matches!(entry, DumpEntry::AlignDisk))
            .count()
    }

    /// Writes a hex dump of all collected tracks. Returns the MD5 sum over all of them.
    pub fn write_text_file(&self, path: &Path) -> anyhow::Result<String> {
        let f = File::create(path)?;
        let mut f = BufWriter::new(f);

        let cfg = HexConfig {
            title: true,
            ascii: false,
            width: 16,
            group: 0,
            chunk: 1,
            ..HexConfig::default()
        };

        let mut context = md5::Context::new();

        for entry in &self.entries {
            match entry {
                DumpEntry::Track {
                    halftrack,
                    density,
                    header,
                    data,
                } => {
                    context.consume([halftrack.0, *density]);
                    context.consume(header);
                    context.consume(data);

                    writeln!(
                        f,
                        "Halftrack {halftrack} Density {density} Header {header:02x?} Length {}",
                        data.len()
                    )?;
                    writeln!(f, "{:?}", data.hex_conf(cfg))?;
                }
                DumpEntry::Fill { halftrack, byte } => {
                    context.consume([halftrack.0, *byte]);
                    writeln!(f, "Halftrack {halftrack} filled with ${byte:02x}")?;
                }
                DumpEntry::AlignDisk => writeln!(f, "Align disk")?,
            }
        }

        f.flush()?;

        let md5_hash = context.compute();
        let md5_hashstr = format!("{md5_hash:x}");
        log::info!("Dump written to {} (MD5 {md5_hashstr})", path.display());
        Ok(md5_hashstr)
    }
}

impl Default for DumpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DumpTransport {
    fn seek_halftrack(&mut self, halftrack: Halftrack) -> TransportResult<()> {
        self.halftrack = halftrack;
        Ok(())
    }

    fn set_density(&mut self, density: u8) -> TransportResult<()> {
        self.density = density & 3;
        Ok(())
    }

    fn set_bitrate(&mut self, bitrate: u8) -> TransportResult<()> {
        self.density = bitrate & 3;
        Ok(())
    }

    fn send_command(&mut self, command: Command, _args: &[u8]) -> TransportResult<()> {
        self.header.clear();
        self.pending = Some(command);

        if command == Command::Capacity {
            let capacity = NOMINAL_CAPACITY[usize::from(self.density)] as u16;
            self.responses.extend(capacity.to_le_bytes());
        }
        Ok(())
    }

    fn burst_write_byte(&mut self, byte: u8) -> TransportResult<()> {
        match self.pending {
            Some(Command::FillTrack) => {
                self.entries.push(DumpEntry::Fill {
                    halftrack: self.halftrack,
                    byte,
                });
                self.pending = None;
            }
            Some(Command::AlignDisk) => {
                self.entries.push(DumpEntry::AlignDisk);
                self.pending = None;
            }
            _ => self.header.push(byte),
        }
        Ok(())
    }

    fn burst_write_track(&mut self, data: &[u8]) -> TransportResult<bool> {
        self.entries.push(DumpEntry::Track {
            halftrack: self.halftrack,
            density: self.density,
            header: std::mem::take(&mut self.header),
            data: data.to_vec(),
        });
        self.pending = None;
        Ok(true)
    }

    fn burst_read_response(&mut self) -> TransportResult<u8> {
        Ok(self.responses.pop_front().unwrap_or(0))
    }

    fn probe_liveness(&mut self) -> TransportResult<bool> {
        Ok(true)
    }

    fn motor_on(&mut self) -> TransportResult<()> {
        Ok(())
    }

    fn sleep_ms(&mut self, _ms: u64) {}
}
