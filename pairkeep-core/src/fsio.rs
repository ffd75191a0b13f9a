//! File system abstraction consumed by the test/repair primitives.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use fs2::FileExt;

/// Existence-independent facts about a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub modified: DateTime<Utc>,
}

/// How a stream is opened for reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    Buffered,
    Unbuffered,
}

impl ReadStrategy {
    /// Try order when a buffered read fails: once buffered, once unbuffered.
    pub const FALLBACK_ORDER: [ReadStrategy; 2] = [ReadStrategy::Buffered, ReadStrategy::Unbuffered];
}

pub trait ReadStream: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadStream for T {}

pub trait WriteStream: Write + Seek + Send {
    /// Flush buffered data and push it to the device.
    fn sync(&mut self) -> io::Result<()>;
}

pub trait FileSystem: Send + Sync {
    /// `Ok(None)` for a missing file.
    fn stat(&self, path: &Path) -> io::Result<Option<FileStat>>;
    fn open_read(&self, path: &Path, strategy: ReadStrategy) -> io::Result<Box<dyn ReadStream>>;
    /// Create or truncate.
    fn create(&self, path: &Path) -> io::Result<Box<dyn WriteStream>>;
    /// Open an existing file for in-place writes without truncation.
    fn open_update(&self, path: &Path) -> io::Result<Box<dyn WriteStream>>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    /// Rename, replacing `to` if it exists.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn set_modified(&self, path: &Path, t: DateTime<Utc>) -> io::Result<()>;
    fn set_hidden_system(&self, path: &Path) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool {
        matches!(self.stat(path), Ok(Some(_)))
    }
}

/// `std::fs` backed implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFs;

struct DiskWriter {
    inner: BufWriter<File>,
}

impl Write for DiskWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for DiskWriter {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl WriteStream for DiskWriter {
    fn sync(&mut self) -> io::Result<()> {
        self.inner.flush()?;
        self.inner.get_ref().sync_all()
    }
}

impl FileSystem for DiskFs {
    fn stat(&self, path: &Path) -> io::Result<Option<FileStat>> {
        match fs::metadata(path) {
            Ok(md) if md.is_file() => {
                Ok(Some(FileStat { len: md.len(), modified: DateTime::<Utc>::from(md.modified()?) }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn open_read(&self, path: &Path, strategy: ReadStrategy) -> io::Result<Box<dyn ReadStream>> {
        let f = File::open(path)?;
        Ok(match strategy {
            ReadStrategy::Buffered => Box::new(BufReader::with_capacity(64 * 1024, f)),
            ReadStrategy::Unbuffered => Box::new(f),
        })
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn WriteStream>> {
        let f = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        Ok(Box::new(DiskWriter { inner: BufWriter::new(f) }))
    }

    fn open_update(&self, path: &Path) -> io::Result<Box<dyn WriteStream>> {
        let f = OpenOptions::new().read(true).write(true).open(path)?;
        // Released when the handle closes.
        f.lock_exclusive()?;
        Ok(Box::new(DiskWriter { inner: BufWriter::new(f) }))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                // Read-only attribute blocks deletion on some platforms.
                let mut perms = fs::metadata(path)?.permissions();
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                fs::set_permissions(path, perms)?;
                fs::remove_file(path)
            }
            other => other,
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::copy(from, to).map(|_| ())
    }

    fn set_modified(&self, path: &Path, t: DateTime<Utc>) -> io::Result<()> {
        let f = OpenOptions::new().write(true).open(path)?;
        f.set_modified(t.into())
    }

    #[cfg(windows)]
    fn set_hidden_system(&self, path: &Path) -> io::Result<()> {
        let status = std::process::Command::new("attrib").arg("+H").arg("+S").arg(path).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::Other, format!("attrib failed: {status}")))
        }
    }

    // No hidden/system attributes outside Windows.
    #[cfg(not(windows))]
    fn set_hidden_system(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stat_missing_is_none() {
        let td = tempfile::tempdir().unwrap();
        assert_eq!(DiskFs.stat(&td.path().join("nope")).unwrap(), None);
        assert_eq!(DiskFs.stat(td.path()).unwrap(), None);
    }

    #[test]
    fn set_modified_round_trips() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("a.bin");
        fs::write(&p, b"hello").unwrap();
        let t = Utc.with_ymd_and_hms(2001, 2, 3, 4, 5, 6).unwrap();
        DiskFs.set_modified(&p, t).unwrap();
        let st = DiskFs.stat(&p).unwrap().unwrap();
        assert_eq!(st.len, 5);
        assert_eq!(st.modified, t);
    }
}
