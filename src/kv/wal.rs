//! Write-ahead log of committed batches.
//!
//! ```text
//!  header:  [magic u32][format u16]
//!  record:  [payload len u32][len crc64 u64][payload crc64 u64][payload (bincode Batch)]
//! ```
//!
//! All integers are big-endian. The length carries its own checksum, so a
//! damaged length is reported as corruption instead of being mistaken for
//! the end of the log. A record is only acknowledged once it is fully
//! written, so a record cut short by the end of the file is a torn write
//! from a crash and is dropped on open. Anything else that does not check
//! out is corruption.

use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::encoding::bincode;
use crate::error::{Error, Result};
use crate::hasher;

pub const HEADER_SIZE: usize = 6;

/// Largest payload a record may carry.
pub const MAX_RECORD_SIZE: usize = 64 << 20;

const MAGIC: u32 = 0x53_52_53_57; // ASCII "SRSW"
const FORMAT: u16 = 1;

/// Record framing before the payload: length and the two checksums.
const FRAME_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub magic_number: u32,
    pub format: u16,
}

impl Header {
    pub fn new() -> Self {
        Self {
            magic_number: MAGIC,
            format: FORMAT,
        }
    }

    fn encode<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.magic_number)?;
        writer.write_u16::<BigEndian>(self.format)?;
        Ok(())
    }

    fn decode<R: Read>(mut reader: R) -> Result<Self> {
        let magic_number = reader
            .read_u32::<BigEndian>()
            .map_err(|_| Error::InvalidHeader)?;
        let format = reader
            .read_u16::<BigEndian>()
            .map_err(|_| Error::InvalidHeader)?;

        if magic_number != MAGIC || format != FORMAT {
            return Err(Error::InvalidHeader);
        }
        Ok(Self {
            magic_number,
            format,
        })
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

/// The writes of one committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub version: u64,
    pub writes: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
    /// End of the last record written.
    len: u64,
    /// End of the last record known to be durable.
    synced: u64,
    /// Set when a failed write could not be undone.
    failed: bool,
    #[cfg(test)]
    fault: Option<Fault>,
}

impl Wal {
    /// Opens the log at `path`, creating it with a fresh header if it is
    /// empty or missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = File::options()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut len = file.metadata()?.len();
        if len == 0 {
            let mut header = Vec::with_capacity(HEADER_SIZE);
            Header::new().encode(&mut header)?;
            file.write_all(&header)?;
            file.sync_all()?;
            len = HEADER_SIZE as u64;
        } else {
            let mut reader = BufReader::new(file.try_clone()?);
            reader.seek(SeekFrom::Start(0))?;
            Header::decode(&mut reader)?;
        }

        Ok(Self {
            file,
            path,
            len,
            synced: len,
            failed: false,
            #[cfg(test)]
            fault: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a batch in a single write. Call [`Wal::sync`] to make it
    /// durable. On failure nothing of the batch is left in the log.
    pub fn append(&mut self, batch: &Batch) -> Result<()> {
        self.check_usable()?;

        let payload = bincode::serialize(batch)?;
        if payload.len() > MAX_RECORD_SIZE {
            return Err(Error::Encode(format!(
                "WAL batch of {} bytes, limit {}",
                payload.len(),
                MAX_RECORD_SIZE
            )));
        }
        let record = encode_record(&payload)?;

        if let Err(e) = self.write_record(&record) {
            self.roll_back(self.len);
            return Err(Error::Io(e));
        }
        self.len += record.len() as u64;

        debug!(version = batch.version, count = batch.writes.len(), "appended WAL batch");
        Ok(())
    }

    /// Makes every appended record durable. On failure the records appended
    /// since the last successful sync are removed again.
    pub fn sync(&mut self) -> Result<()> {
        self.check_usable()?;

        if let Err(e) = self.sync_file() {
            self.roll_back(self.synced);
            return Err(Error::Io(e));
        }
        self.synced = self.len;
        Ok(())
    }

    /// Replays every complete batch from the start of the log.
    pub fn replay(&self) -> Result<ReplayIterator> {
        let file_len = self.file.metadata()?.len();
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        Ok(ReplayIterator {
            reader,
            offset: HEADER_SIZE as u64,
            file_len,
            done: false,
        })
    }

    /// Cuts the log back to `len` bytes, dropping a torn tail.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        let current = self.file.metadata()?.len();
        if current > len {
            warn!(
                path = %self.path.display(),
                dropped = current - len,
                "truncating torn WAL tail"
            );
            self.file.set_len(len)?;
            self.file.sync_all()?;
        }
        self.len = len.min(current);
        self.synced = self.len;
        Ok(())
    }

    fn check_usable(&self) -> Result<()> {
        if self.failed {
            return Err(Error::WalFailed(self.path.display().to_string()));
        }
        Ok(())
    }

    /// Restores the log to `len` bytes after a failed write, or marks it
    /// unusable if that fails too.
    fn roll_back(&mut self, len: u64) {
        match self.file.set_len(len).and_then(|()| self.file.sync_all()) {
            Ok(()) => {
                warn!(path = %self.path.display(), len, "rolled back failed WAL write");
                self.len = len;
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "WAL rollback failed");
                self.failed = true;
            }
        }
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(Fault::Write(written)) = self.fault {
            self.fault = None;
            self.file.write_all(&record[..written.min(record.len())])?;
            return Err(io::Error::new(ErrorKind::Other, "injected write failure"));
        }
        self.file.write_all(record)
    }

    fn sync_file(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if let Some(Fault::Sync) = self.fault {
            self.fault = None;
            return Err(io::Error::new(ErrorKind::Other, "injected sync failure"));
        }
        self.file.sync_data()
    }

    /// Makes the next write or sync fail.
    #[cfg(test)]
    pub(crate) fn inject(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }
}

/// A single failure for the next I/O call of a [`Wal`].
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    /// The next record write stops after this many bytes.
    Write(usize),
    /// The next sync fails.
    Sync,
}

fn encode_record(payload: &[u8]) -> Result<Vec<u8>> {
    let len = payload.len() as u32;
    let mut record = Vec::with_capacity(FRAME_SIZE + payload.len());
    record.write_u32::<BigEndian>(len)?;
    record.write_u64::<BigEndian>(hasher::checksum(&len.to_be_bytes()))?;
    record.write_u64::<BigEndian>(hasher::checksum(payload))?;
    record.extend_from_slice(payload);
    Ok(record)
}

pub struct ReplayIterator {
    reader: BufReader<File>,
    offset: u64,
    file_len: u64,
    done: bool,
}

impl ReplayIterator {
    /// End of the last complete record read so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn corrupted(&self, what: impl std::fmt::Display) -> Error {
        Error::CorruptedWal(format!("record at offset {}: {}", self.offset, what))
    }

    fn read(&mut self) -> Result<Option<Batch>> {
        let mut frame = [0u8; FRAME_SIZE];
        if !read_full(&mut self.reader, &mut frame)? {
            return Ok(None);
        }

        let mut cursor = &frame[..];
        let len = cursor.read_u32::<BigEndian>()?;
        let len_checksum = cursor.read_u64::<BigEndian>()?;
        let checksum = cursor.read_u64::<BigEndian>()?;

        if hasher::checksum(&len.to_be_bytes()) != len_checksum {
            return Err(self.corrupted("length checksum mismatch"));
        }
        let len = len as usize;
        if len > MAX_RECORD_SIZE {
            return Err(self.corrupted(format!("length {} exceeds {}", len, MAX_RECORD_SIZE)));
        }

        // With a verified length, running past the end of the file can only
        // be the last record, cut short.
        let end = self.offset + (FRAME_SIZE + len) as u64;
        if end > self.file_len {
            return Ok(None);
        }

        let mut payload = vec![0u8; len];
        if !read_full(&mut self.reader, &mut payload)? {
            return Err(self.corrupted("log shrank during replay"));
        }

        if hasher::checksum(&payload) != checksum {
            return Err(self.corrupted("checksum mismatch"));
        }

        let batch: Batch = bincode::deserialize(&payload).map_err(|e| self.corrupted(e))?;

        self.offset = end;
        Ok(Some(batch))
    }
}

impl Iterator for ReplayIterator {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fills `buf`, returning false if the input ends first.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn batch(version: u64, key: &[u8], value: &[u8]) -> Batch {
        Batch {
            version,
            writes: vec![(key.to_vec(), value.to_vec())],
        }
    }

    fn replay_all(wal: &Wal) -> Result<Vec<Batch>> {
        wal.replay()?.collect()
    }

    #[test]
    fn test_header_encoding_decoding() {
        let mut buf = Vec::new();
        Header::new().encode(&mut buf).expect("Failed to encode Header");
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(Header::decode(&buf[..]).unwrap(), Header::new());
    }

    #[test]
    fn test_header_decoding_invalid() {
        assert!(matches!(
            Header::decode(&[0u8; HEADER_SIZE - 2][..]),
            Err(Error::InvalidHeader)
        ));
        assert!(matches!(
            Header::decode(&[0u8; HEADER_SIZE][..]),
            Err(Error::InvalidHeader)
        ));
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&batch(1, b"key1", b"value1")).unwrap();
            wal.append(&batch(2, b"key2", b"value2")).unwrap();
            wal.sync().unwrap();
        }

        let wal = Wal::open(&path).unwrap();
        let batches = replay_all(&wal).unwrap();
        assert_eq!(
            batches,
            vec![batch(1, b"key1", b"value1"), batch(2, b"key2", b"value2")]
        );
    }

    #[test]
    fn test_empty_replay() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path().join("test.wal")).unwrap();
        assert!(replay_all(&wal).unwrap().is_empty());
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        let good_len = {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&batch(1, b"key1", b"value1")).unwrap();
            wal.sync().unwrap();
            std::fs::metadata(&path).unwrap().len()
        };

        // Half of a second record.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0, 0, 0, 40, 1, 2, 3]).unwrap();
        drop(file);

        let mut wal = Wal::open(&path).unwrap();
        let mut replay = wal.replay().unwrap();
        let batches: Vec<_> = replay.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(batches, vec![batch(1, b"key1", b"value1")]);
        assert_eq!(replay.offset(), good_len);

        wal.truncate(replay.offset()).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        wal.append(&batch(2, b"key2", b"value2")).unwrap();
        assert_eq!(replay_all(&wal).unwrap().len(), 2);
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&batch(1, b"key1", b"value1")).unwrap();
            wal.sync().unwrap();
        }

        // Flip the last payload byte.
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let wal = Wal::open(&path).unwrap();
        assert!(matches!(replay_all(&wal), Err(Error::CorruptedWal(_))));
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    fn file_len(path: &Path) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }

    #[test]
    fn test_torn_payload_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        let good_len = {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&batch(1, b"key1", b"value1")).unwrap();
            wal.sync().unwrap();
            file_len(&path)
        };

        // A complete frame whose payload was cut off.
        let record = encode_record(&[7u8; 40]).unwrap();
        append_raw(&path, &record[..FRAME_SIZE + 3]);

        let mut wal = Wal::open(&path).unwrap();
        let mut replay = wal.replay().unwrap();
        assert_eq!(replay.by_ref().count(), 1);
        assert_eq!(replay.offset(), good_len);

        wal.truncate(replay.offset()).unwrap();
        assert_eq!(file_len(&path), good_len);
    }

    #[test]
    fn test_damaged_length_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        {
            let mut wal = Wal::open(&path).unwrap();
            for version in 1..=3 {
                wal.append(&batch(version, b"key", b"value")).unwrap();
                wal.sync().unwrap();
            }
        }
        let len = file_len(&path);

        // High byte of the first record's length.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE] = 0x10;
        std::fs::write(&path, &bytes).unwrap();

        let wal = Wal::open(&path).unwrap();
        assert!(matches!(replay_all(&wal), Err(Error::CorruptedWal(_))));
        assert_eq!(file_len(&path), len);
    }

    #[test]
    fn test_oversized_length_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        drop(Wal::open(&path).unwrap());

        let len = (MAX_RECORD_SIZE + 1) as u32;
        let mut frame = Vec::new();
        frame.write_u32::<BigEndian>(len).unwrap();
        frame.write_u64::<BigEndian>(hasher::checksum(&len.to_be_bytes())).unwrap();
        frame.write_u64::<BigEndian>(0).unwrap();
        append_raw(&path, &frame);

        let wal = Wal::open(&path).unwrap();
        assert!(matches!(replay_all(&wal), Err(Error::CorruptedWal(_))));
    }

    #[test]
    fn test_failed_write_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&batch(1, b"key1", b"value1")).unwrap();
        let len = file_len(&path);

        wal.inject(Fault::Write(FRAME_SIZE + 2));
        assert!(matches!(
            wal.append(&batch(2, b"key2", b"lost")),
            Err(Error::Io(_))
        ));
        assert_eq!(file_len(&path), len);

        wal.append(&batch(2, b"key2", b"value2")).unwrap();
        wal.sync().unwrap();
        assert_eq!(
            replay_all(&wal).unwrap(),
            vec![batch(1, b"key1", b"value1"), batch(2, b"key2", b"value2")]
        );
    }

    #[test]
    fn test_failed_sync_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&batch(1, b"key1", b"value1")).unwrap();
        wal.sync().unwrap();

        wal.append(&batch(2, b"key2", b"lost")).unwrap();
        wal.inject(Fault::Sync);
        assert!(matches!(wal.sync(), Err(Error::Io(_))));

        drop(wal);
        let wal = Wal::open(&path).unwrap();
        assert_eq!(replay_all(&wal).unwrap(), vec![batch(1, b"key1", b"value1")]);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        std::fs::write(&path, b"not a wal file").unwrap();

        assert!(matches!(Wal::open(&path), Err(Error::InvalidHeader)));
    }
}
