//! The append-only binary file spectra are paged out to.
//!
//! The file opens with [`PAGE_FILE_HEADER`] followed by 64 zero bytes, then holds a
//! sequence of little-endian records:
//!
//! ```text
//! [i32 scan number][i32 ion count][ion count × f64 m/z][ion count × f64 intensity][i32 padding]
//! ```
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use identity_hash::BuildIdentityHasher;
use tracing::{debug, warn};

use crate::spectrum::Spectrum;

pub const PAGE_FILE_HEADER: &[u8] = b"mzsic spectrum cache page file, format version 1";
pub const HEADER_PADDING: usize = 64;
pub const CACHE_FILE_PREFIX: &str = "SpectrumCache_";
pub const CACHE_FILE_EXTENSION: &str = "bin";

fn record_length(ion_count: usize) -> u64 {
    4 + 4 + ion_count as u64 * 8 * 2 + 4
}

/// A page file owned by exactly one cache. Spectra are appended and located through
/// the byte offset of their most recent record.
#[derive(Debug)]
pub struct PageFile {
    path: PathBuf,
    handle: File,
    offsets: HashMap<i32, u64, BuildIdentityHasher<i32>>,
    end_offset: u64,
}

impl PageFile {
    /// Create a new page file at `path`, failing if it already exists
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut handle = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        {
            let mut writer = BufWriter::new(&mut handle);
            writer.write_all(PAGE_FILE_HEADER)?;
            writer.write_all(&[0u8; HEADER_PADDING])?;
            writer.flush()?;
        }
        debug!("Created spectrum cache page file {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            handle,
            offsets: HashMap::default(),
            end_offset: (PAGE_FILE_HEADER.len() + HEADER_PADDING) as u64,
        })
    }

    /// Wrap an already open handle as an empty page file
    #[cfg(test)]
    pub(crate) fn from_handle(path: &Path, handle: File) -> Self {
        Self {
            path: path.to_path_buf(),
            handle,
            offsets: HashMap::default(),
            end_offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, scan_number: i32) -> bool {
        self.offsets.contains_key(&scan_number)
    }

    pub fn offset_of(&self, scan_number: i32) -> Option<u64> {
        self.offsets.get(&scan_number).copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Append `spectrum` under `scan_number`, returning the record's offset. A later write
    /// of the same scan number supersedes this one.
    pub fn write_spectrum(&mut self, scan_number: i32, spectrum: &Spectrum) -> io::Result<u64> {
        let offset = self.end_offset;
        let ion_count = spectrum.ion_count();
        let count = i32::try_from(ion_count)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.handle.seek(SeekFrom::Start(offset))?;
        {
            let mut writer = BufWriter::new(&mut self.handle);
            writer.write_i32::<LittleEndian>(scan_number)?;
            writer.write_i32::<LittleEndian>(count)?;
            for mz in spectrum.mzs.iter() {
                writer.write_f64::<LittleEndian>(*mz)?;
            }
            for inten in spectrum.intensities.iter() {
                writer.write_f64::<LittleEndian>(*inten)?;
            }
            writer.write_i32::<LittleEndian>(0)?;
            writer.flush()?;
        }
        self.end_offset += record_length(ion_count);
        self.offsets.insert(scan_number, offset);
        Ok(offset)
    }

    /// Read the latest record for `scan_number` into `into`, reusing its buffers.
    ///
    /// Returns `Ok(false)` if the scan was never written.
    pub fn read_spectrum(&mut self, scan_number: i32, into: &mut Spectrum) -> io::Result<bool> {
        let offset = match self.offsets.get(&scan_number) {
            Some(offset) => *offset,
            None => return Ok(false),
        };
        self.handle.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut self.handle);
        let stored_scan = reader.read_i32::<LittleEndian>()?;
        if stored_scan != scan_number {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Expected scan {scan_number} at offset {offset}, found scan {stored_scan}"
                ),
            ));
        }
        let count = reader.read_i32::<LittleEndian>()?;
        let count = usize::try_from(count).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let file_length = reader.get_ref().metadata()?.len();
        if offset + record_length(count) > file_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Scan {scan_number} claims {count} ions, which runs past the end of the page file"
                ),
            ));
        }
        into.clear();
        into.scan_number = scan_number;
        into.mzs.resize(count, 0.0);
        into.intensities.resize(count, 0.0);
        reader.read_f64_into::<LittleEndian>(&mut into.mzs)?;
        reader.read_f64_into::<LittleEndian>(&mut into.intensities)?;
        Ok(true)
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.handle.flush()?;
        self.handle.sync_data()
    }
}

/// The file name prefix shared by every page file of one run
pub fn run_file_prefix(run_id: &str) -> String {
    format!("{CACHE_FILE_PREFIX}{run_id}_")
}

pub fn page_file_name(run_id: &str, attempt: usize) -> String {
    format!("{}{attempt}.{CACHE_FILE_EXTENSION}", run_file_prefix(run_id))
}

fn is_cache_file(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(CACHE_FILE_PREFIX));
    let ext_matches = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == CACHE_FILE_EXTENSION);
    name_matches && ext_matches
}

/// Delete this run's page files and any cache file older than `stale_age`, returning
/// how many files were removed. Failures to remove a file are logged and skipped.
pub fn remove_cache_files(folder: &Path, run_id: &str, stale_age: Duration) -> usize {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not list cache folder {}: {e}", folder.display());
            return 0;
        }
    };
    let prefix = run_file_prefix(run_id);
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !is_cache_file(&path) {
            continue;
        }
        let ours = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&prefix));
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| now.duration_since(t).ok())
            .is_some_and(|age| age > stale_age);
        if !(ours || stale) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed cache file {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove cache file {}: {e}", path.display()),
        }
    }
    removed
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_write_read() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(page_file_name("test", 0));
        let mut pf = PageFile::create(&path)?;
        let a = Spectrum::from_pairs(3, &[(100.125, 1.5), (200.0, f64::MIN_POSITIVE)]);
        let b = Spectrum::from_pairs(4, &[(300.0, 9.0)]);

        let off_a = pf.write_spectrum(3, &a)?;
        let off_b = pf.write_spectrum(4, &b)?;
        assert_eq!(off_a, (PAGE_FILE_HEADER.len() + HEADER_PADDING) as u64);
        assert_eq!(off_b, off_a + record_length(2));
        assert_eq!(fs::metadata(&path)?.len(), off_b + record_length(1));

        let mut buf = Spectrum::default();
        assert!(pf.read_spectrum(3, &mut buf)?);
        assert_eq!(buf, a);
        assert!(pf.read_spectrum(4, &mut buf)?);
        assert_eq!(buf, b);
        assert!(!pf.read_spectrum(5, &mut buf)?);

        // Re-writing a scan supersedes the old record
        let a2 = Spectrum::from_pairs(3, &[(101.0, 2.0)]);
        pf.write_spectrum(3, &a2)?;
        pf.read_spectrum(3, &mut buf)?;
        assert_eq!(buf, a2);
        Ok(())
    }

    #[test]
    fn test_corrupt_ion_count_is_rejected() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(page_file_name("test", 0));
        let mut pf = PageFile::create(&path)?;
        let offset = pf.write_spectrum(3, &Spectrum::from_pairs(3, &[(100.0, 1.0)]))?;

        let mut handle = File::options().write(true).open(&path)?;
        handle.seek(SeekFrom::Start(offset + 4))?;
        handle.write_i32::<LittleEndian>(i32::MAX)?;
        handle.flush()?;

        let mut buf = Spectrum::from_pairs(9, &[(1.0, 1.0)]);
        let err = pf.read_spectrum(3, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(buf.mzs.capacity() < 1024);
        Ok(())
    }

    #[test]
    fn test_create_refuses_existing() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(page_file_name("test", 0));
        let _pf = PageFile::create(&path)?;
        assert_eq!(
            PageFile::create(&path).unwrap_err().kind(),
            io::ErrorKind::AlreadyExists
        );
        Ok(())
    }

    #[test]
    fn test_remove_cache_files() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let ours = dir.path().join(page_file_name("run1", 0));
        let other = dir.path().join(page_file_name("run2", 0));
        let unrelated = dir.path().join("notes.txt");
        for p in [&ours, &other, &unrelated] {
            File::create(p)?;
        }
        let removed = remove_cache_files(dir.path(), "run1", Duration::from_secs(3600));
        assert_eq!(removed, 1);
        assert!(!ours.exists());
        assert!(other.exists());
        assert!(unrelated.exists());

        File::options()
            .write(true)
            .open(&other)?
            .set_modified(SystemTime::now() - Duration::from_secs(7200))?;
        let removed = remove_cache_files(dir.path(), "run3", Duration::from_secs(3600));
        assert_eq!(removed, 1);
        assert!(!other.exists());
        assert!(unrelated.exists());
        Ok(())
    }
}
