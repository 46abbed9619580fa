use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Written once at the start of every log file.
const MAGIC: &[u8; 8] = b"HBWAL\0\0\x01";

/// Larger length prefixes can only come from a torn or foreign tail.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// One framed record: `[u32 len][bincode Event][u32 crc32]`, little endian.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record and its framed length, or `None` at end of log. A
/// torn or corrupt tail (crash mid-append) ends the log there.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let frame_len = 8 + payload.len() as u64;
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, frame_len)))
}

/// Open for appends, first cutting the file back to `intact_len`, the end of
/// its last intact record. A file without a complete header starts over.
fn open_for_append(path: &Path, intact_len: u64) -> io::Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let header_len = MAGIC.len() as u64;
    if intact_len < header_len {
        file.set_len(0)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        return Ok((writer, header_len));
    }
    if file.metadata()?.len() != intact_len {
        file.set_len(intact_len)?;
        file.sync_all()?;
    }
    Ok((BufWriter::new(file), intact_len))
}

/// Intact events of the log at `path` and the byte length they span,
/// header included. Zero length means there is no usable header.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    if !read_full(&mut reader, &mut magic)? {
        // empty or header torn on first write
        return Ok((Vec::new(), 0));
    }
    if &magic != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not a hotelbook WAL", path.display()),
        ));
    }

    let mut events = Vec::new();
    let mut intact_len = MAGIC.len() as u64;
    while let Some((event, frame_len)) = read_frame(&mut reader)? {
        events.push(event);
        intact_len += frame_len;
    }
    Ok((events, intact_len))
}

/// Append-only write-ahead log of catalog and booking events.
///
/// The engine applies an event to memory only after it is durable here, so
/// replaying the log reproduces exactly the state callers were told about.
/// `durable_len` is the file length at the last successful sync; anything
/// past it is discarded when a flush fails.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    durable_len: u64,
    pending_appends: u64,
    appends_since_compact: u64,
    #[cfg(test)]
    inject_sync_failure: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::recover(path)?.0)
    }

    /// Read back the intact events, cut off any torn tail and open for
    /// appends right after the last intact record.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, intact_len) = scan(path)?;
        let (writer, durable_len) = open_for_append(path, intact_len)?;
        let wal = Self {
            writer,
            path: path.to_path_buf(),
            durable_len,
            pending_appends: 0,
            appends_since_compact: 0,
            #[cfg(test)]
            inject_sync_failure: false,
        };
        Ok((wal, events))
    }

    /// Append and fsync one event. Production code batches through
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event without syncing. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.pending_appends += 1;
        Ok(())
    }

    /// Write out and fsync everything buffered. On error the pending records
    /// may be partly on disk; call `discard_pending` before appending again.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        #[cfg(test)]
        {
            if std::mem::take(&mut self.inject_sync_failure) {
                return Err(io::Error::other("injected sync failure"));
            }
        }
        self.writer.get_ref().sync_all()?;
        self.durable_len = self.writer.get_ref().metadata()?.len();
        self.appends_since_compact += std::mem::take(&mut self.pending_appends);
        Ok(())
    }

    /// Drop buffered records and cut the file back to its last synced length.
    pub fn discard_pending(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(self.durable_len)?;
        file.sync_all()?;
        let failed = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the unwritten buffer instead of flushing it
        let _ = failed.into_parts();
        self.pending_appends = 0;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fail_next_sync(&mut self) {
        self.inject_sync_failure = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: written to a sibling temp file, synced,
    /// then renamed over the live log and reopened for appends.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let len = {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(MAGIC)?;
            for event in events {
                write_frame(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
            writer.get_ref().metadata()?.len()
        };
        fs::rename(&tmp_path, &self.path)?;
        let (writer, durable_len) = open_for_append(&self.path, len)?;
        self.writer = writer;
        self.durable_len = durable_len;
        self.pending_appends = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read back every intact event without touching the file. A missing
    /// file is an empty log; a file that is not a log at all is an error
    /// rather than silently empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.0)
    }
}
