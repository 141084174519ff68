use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// File identification. Refusing a foreign file loudly beats replaying
/// someone else's bytes as bookings.
const MAGIC: [u8; 8] = *b"KERBJRNL";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: u64 = 10;

fn write_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    Ok(())
}

/// Encode one record as `[u32: len][bincode: Event][u32: crc32]`.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// One record back, or `None` at a clean end of file. A torn tail (partial
/// record from a crash mid-write) and a CRC mismatch both read as `None`:
/// everything before the damage is intact, everything after it was never
/// acknowledged.
fn read_record(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut crc_buf = [0u8; 4];
    match reader.read_exact(&mut crc_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }

    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some(event)),
        Err(_) => Ok(None),
    }
}

/// Append-only booking journal.
///
/// Layout: a 10-byte header (`KERBJRNL` + u16 version), then records in
/// `[u32: len][bincode: Event][u32: crc32]` framing. Appends go through a
/// BufWriter; durability happens at `flush_sync`, which the engine calls
/// once per commit batch.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    records_since_snapshot: u64,
}

impl Journal {
    /// Open the journal at `path`, stamping the header on a fresh file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let fresh = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);
        if fresh {
            write_header(&mut writer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            records_since_snapshot: 0,
        })
    }

    /// Buffer one record without flushing. Call `flush_sync` after the
    /// batch to durably commit everything buffered so far.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_record(&mut self.writer, event)?;
        self.records_since_snapshot += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Append one record and fsync. Tests only; the engine batches.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_since_snapshot(&self) -> u64 {
        self.records_since_snapshot
    }

    /// Write a snapshot (minimal events recreating current state) to a
    /// temp file and fsync it. Slow phase; runs outside the journal lock.
    pub fn write_snapshot(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("journal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer)?;
        for event in events {
            encode_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the snapshot over the live journal and reopen. Fast phase;
    /// runs while holding the journal lock so no append slips between.
    pub fn install_snapshot(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("journal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.records_since_snapshot = 0;
        Ok(())
    }

    /// Both snapshot phases back to back. Tests only.
    #[cfg(test)]
    pub fn snapshot(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_snapshot(&self.path, events)?;
        self.install_snapshot()
    }

    /// Read every intact record from disk. A missing file is an empty
    /// journal; a file that does not start with our header is refused.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        if file.metadata()?.len() == 0 {
            return Ok(Vec::new());
        }
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 8];
        let mut version = [0u8; 2];
        let header_ok = reader.read_exact(&mut magic).is_ok()
            && reader.read_exact(&mut version).is_ok()
            && magic == MAGIC
            && u16::from_le_bytes(version) == FORMAT_VERSION;
        if !header_ok {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a kerb journal", path.display()),
            ));
        }

        let mut events = Vec::new();
        while let Some(event) = read_record(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}
