//! A bounded spectrum store: an in-memory pool backed by an append-only page file.
//!
//! When a run is small enough that the pool alone could hold it, [`SpectrumCache::plan_for`]
//! switches the cache to [`CacheMode::WriteThrough`] and every spectrum goes straight to
//! the page file. Otherwise spectra are held in the pool until it is full, and a spectrum
//! about to be evicted that was never written to disk is appended to the page file first,
//! so anything put into the cache can be retrieved later. When disk caching is disabled,
//! or the page file could not be created, the pool grows instead of evicting.
use std::fmt::Debug;
use std::io;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::{debug, info, warn};

pub mod page_file;
pub mod pool;

pub use page_file::PageFile;
pub use pool::{ArrayPool, LruPool, PoolEntry, SpectrumPool};

use crate::error::SpectrumCacheError;
use crate::options::{EvictionPolicy, SpectrumCacheOptions, POOL_GROWTH_INCREMENT};
use crate::spectrum::Spectrum;

/// Back-off between attempts to write one spectrum to the page file
pub const WRITE_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

/// How many spectra beyond the pool capacity a run may hold and still be written through
pub const WRITE_THROUGH_SLACK: usize = 5;

/// How many differently named page files are tried before caching is given up
pub const PAGE_FILE_CREATION_ATTEMPTS: usize = 5;

/// The way SIC building and similarity grouping read spectra by scan number.
pub trait SpectrumSource {
    /// Fetch the spectrum for `scan_number`, or `None` if it was never stored.
    ///
    /// When `can_skip_pool` is true, a spectrum that has to be read back from disk is
    /// returned without being admitted to the in-memory pool.
    fn get_spectrum(
        &mut self,
        scan_number: i32,
        can_skip_pool: bool,
    ) -> Result<Option<&Spectrum>, SpectrumCacheError>;
}

impl SpectrumSource for std::collections::HashMap<i32, Spectrum> {
    fn get_spectrum(
        &mut self,
        scan_number: i32,
        _can_skip_pool: bool,
    ) -> Result<Option<&Spectrum>, SpectrumCacheError> {
        Ok(self.get(&scan_number))
    }
}

/// Counters describing how the cache was used
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub puts: usize,
    pub hits: usize,
    pub misses: usize,
    pub page_reads: usize,
    pub page_writes: usize,
    pub evictions: usize,
    pub pool_growths: usize,
}

/// Where [`SpectrumCache::put`] sends spectra
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Hold spectra in the pool, writing each to the page file when it is evicted
    #[default]
    PoolFirst,
    /// Append every spectrum to the page file as it is put
    WriteThrough,
}

#[derive(Debug)]
enum PageFileState {
    Unopened,
    Open(PageFile),
    /// Creation failed or disk caching is disabled; nothing is ever paged out
    Unavailable,
    Closed,
}

fn make_pool(options: &SpectrumCacheOptions) -> Box<dyn SpectrumPool + Send + Sync> {
    let capacity = options.effective_capacity();
    match options.eviction_policy {
        EvictionPolicy::Array => Box::new(ArrayPool::new(capacity)),
        EvictionPolicy::LeastRecentlyUsed => Box::new(LruPool::new(capacity)),
    }
}

static CACHE_INSTANCES: AtomicUsize = AtomicUsize::new(0);

fn make_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let instance = CACHE_INSTANCES.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{}", process::id(), millis, instance)
}

/// Errors that will recur no matter how often the write is repeated
fn is_transient(kind: io::ErrorKind) -> bool {
    !matches!(
        kind,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::Unsupported
    )
}

fn write_with_retry(
    page_file: &mut PageFile,
    scan_number: i32,
    spectrum: &Spectrum,
    retry_delays: &[Duration],
) -> Result<(), SpectrumCacheError> {
    let mut attempt = 0;
    loop {
        match page_file.write_spectrum(scan_number, spectrum) {
            Ok(_) => return Ok(()),
            Err(e) => {
                let delay = retry_delays
                    .get(attempt)
                    .filter(|_| is_transient(e.kind()));
                if let Some(delay) = delay {
                    warn!(
                        "Failed to write spectrum {scan_number} to {}: {e}, retrying in {delay:?}",
                        page_file.path().display()
                    );
                    thread::sleep(*delay);
                    attempt += 1;
                } else {
                    return Err(SpectrumCacheError::WriteFailed {
                        scan_number,
                        attempts: attempt + 1,
                        source: e,
                    });
                }
            }
        }
    }
}

/// The spectrum cache of one run. It exclusively owns its pool and page file.
pub struct SpectrumCache {
    options: SpectrumCacheOptions,
    pool: Box<dyn SpectrumPool + Send + Sync>,
    page_file: PageFileState,
    mode: CacheMode,
    write_retry_delays: Vec<Duration>,
    run_id: String,
    scratch: Spectrum,
    stats: CacheStats,
}

impl Debug for SpectrumCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumCache")
            .field("options", &self.options)
            .field("pool_len", &self.pool.len())
            .field("pool_capacity", &self.pool.capacity())
            .field("page_file", &self.page_file)
            .field("mode", &self.mode)
            .field("run_id", &self.run_id)
            .field("stats", &self.stats)
            .finish()
    }
}

impl SpectrumCache {
    pub fn new(options: SpectrumCacheOptions) -> Self {
        let pool = make_pool(&options);
        let page_file = if options.disk_caching_always_disabled {
            PageFileState::Unavailable
        } else {
            PageFileState::Unopened
        };
        Self {
            options,
            pool,
            page_file,
            mode: CacheMode::default(),
            write_retry_delays: WRITE_RETRY_DELAYS.to_vec(),
            run_id: make_run_id(),
            scratch: Spectrum::default(),
            stats: CacheStats::default(),
        }
    }

    /// Replace the back-off between attempts to write one spectrum. An empty list makes
    /// the first failure final.
    pub fn with_write_retry_delays(mut self, delays: &[Duration]) -> Self {
        self.write_retry_delays = delays.to_vec();
        self
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn options(&self) -> &SpectrumCacheOptions {
        &self.options
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The number of spectra resident in memory
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn is_resident(&self, scan_number: i32) -> bool {
        self.pool.contains(scan_number)
    }

    pub fn is_paged(&self, scan_number: i32) -> bool {
        match &self.page_file {
            PageFileState::Open(pf) => pf.contains(scan_number),
            _ => false,
        }
    }

    pub fn contains(&self, scan_number: i32) -> bool {
        self.is_resident(scan_number) || self.is_paged(scan_number)
    }

    /// Whether spectra can still be paged out to disk
    pub fn disk_caching_available(&self) -> bool {
        matches!(
            self.page_file,
            PageFileState::Unopened | PageFileState::Open(_)
        )
    }

    pub fn page_file_path(&self) -> Option<&std::path::Path> {
        match &self.page_file {
            PageFileState::Open(pf) => Some(pf.path()),
            _ => None,
        }
    }

    /// Choose how spectra are stored for a run of `expected_count` spectra.
    ///
    /// A run the pool could hold, give or take [`WRITE_THROUGH_SLACK`], is written through
    /// to the page file while disk caching is available. Anything larger uses the pool.
    pub fn plan_for(&mut self, expected_count: usize) -> CacheMode {
        let capacity = self.pool.capacity();
        self.mode = if expected_count <= capacity + WRITE_THROUGH_SLACK
            && self.disk_caching_available()
        {
            debug!(
                "{expected_count} spectra fit within a pool of {capacity}, writing them through to {}",
                self.options.cache_folder().display()
            );
            CacheMode::WriteThrough
        } else if self.disk_caching_available() {
            info!(
                "{expected_count} spectra exceed the pool of {capacity}, spectra will be paged to {}",
                self.options.cache_folder().display()
            );
            CacheMode::PoolFirst
        } else {
            info!(
                "Disk caching is unavailable, the pool of {capacity} will grow to hold {expected_count} spectra"
            );
            CacheMode::PoolFirst
        };
        self.mode
    }

    /// Open the page file on first use, trying a few names with a randomized back-off.
    ///
    /// Returns whether a page file is available. Failure disables disk caching for the
    /// rest of the run.
    fn ensure_page_file(&mut self) -> bool {
        match self.page_file {
            PageFileState::Open(_) => return true,
            PageFileState::Unavailable | PageFileState::Closed => return false,
            PageFileState::Unopened => {}
        }
        let folder = self.options.cache_folder();
        let mut rng = rand::thread_rng();
        for attempt in 0..PAGE_FILE_CREATION_ATTEMPTS {
            let path = folder.join(page_file::page_file_name(&self.run_id, attempt));
            match PageFile::create(&path) {
                Ok(pf) => {
                    self.page_file = PageFileState::Open(pf);
                    return true;
                }
                Err(e) => {
                    let delay = Duration::from_millis(rng.gen_range(100..=500));
                    debug!(
                        "Attempt {} to create {} failed: {e}, waiting {delay:?}",
                        attempt + 1,
                        path.display()
                    );
                    thread::sleep(delay);
                }
            }
        }
        let err = SpectrumCacheError::PageFileCreationFailed {
            folder,
            attempts: PAGE_FILE_CREATION_ATTEMPTS,
        };
        warn!("{err}, disk caching is disabled for the rest of this run");
        self.page_file = PageFileState::Unavailable;
        false
    }

    /// Make room in the pool for a new scan number, writing the victim to disk first
    /// if it was never persisted, or growing the pool when disk caching is unavailable.
    fn make_room(&mut self) -> Result<(), SpectrumCacheError> {
        if !self.pool.is_full() {
            return Ok(());
        }
        if !self.ensure_page_file() {
            self.pool.grow(POOL_GROWTH_INCREMENT);
            self.stats.pool_growths += 1;
            debug!(
                "Grew the spectrum pool to {} slots",
                self.pool.capacity()
            );
            return Ok(());
        }
        if let (Some(victim), PageFileState::Open(pf)) =
            (self.pool.next_victim(), &mut self.page_file)
        {
            if !victim.persisted {
                write_with_retry(
                    pf,
                    victim.spectrum.scan_number,
                    &victim.spectrum,
                    &self.write_retry_delays,
                )?;
                self.stats.page_writes += 1;
            }
        }
        self.stats.evictions += 1;
        Ok(())
    }

    /// Store a copy of `spectrum` under `scan_number`, replacing any earlier copy
    pub fn put(&mut self, spectrum: &Spectrum, scan_number: i32) -> Result<(), SpectrumCacheError> {
        if matches!(self.page_file, PageFileState::Closed) {
            return Err(SpectrumCacheError::Closed);
        }
        self.stats.puts += 1;
        if self.mode == CacheMode::WriteThrough {
            if self.ensure_page_file() {
                if let PageFileState::Open(pf) = &mut self.page_file {
                    write_with_retry(pf, scan_number, spectrum, &self.write_retry_delays)?;
                    self.stats.page_writes += 1;
                }
                // Keep a resident copy current
                if self.pool.contains(scan_number) {
                    self.pool.insert(scan_number, spectrum, true);
                }
                return Ok(());
            }
            warn!("No page file is available, holding spectra in memory instead");
            self.mode = CacheMode::PoolFirst;
        }
        if !self.pool.contains(scan_number) {
            self.make_room()?;
        }
        self.pool.insert(scan_number, spectrum, false);
        Ok(())
    }

    /// Retrieve the spectrum for `scan_number`. See [`SpectrumSource::get_spectrum`].
    pub fn get(
        &mut self,
        scan_number: i32,
        can_skip_pool: bool,
    ) -> Result<Option<&Spectrum>, SpectrumCacheError> {
        if matches!(self.page_file, PageFileState::Closed) {
            return Err(SpectrumCacheError::Closed);
        }
        if self.pool.contains(scan_number) {
            self.stats.hits += 1;
            return Ok(self.pool.get(scan_number).map(|e| &e.spectrum));
        }
        self.stats.misses += 1;

        let pf = match &mut self.page_file {
            PageFileState::Open(pf) if pf.contains(scan_number) => pf,
            _ => return Ok(None),
        };
        self.stats.page_reads += 1;
        match pf.read_spectrum(scan_number, &mut self.scratch) {
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
                ) =>
            {
                warn!("Spectrum {scan_number} could not be read back from the page file: {e}");
                self.scratch.clear();
                self.scratch.scan_number = scan_number;
                return Ok(Some(&self.scratch));
            }
            Err(e) => {
                return Err(SpectrumCacheError::ReadFailed {
                    scan_number,
                    source: e,
                })
            }
        }
        if can_skip_pool {
            return Ok(Some(&self.scratch));
        }
        self.make_room()?;
        self.pool.insert(scan_number, &self.scratch, true);
        Ok(self.pool.get(scan_number).map(|e| &e.spectrum))
    }

    /// Write every resident spectrum that is not yet on disk to the page file
    pub fn cache_all_spectra(&mut self) -> Result<usize, SpectrumCacheError> {
        if !self.ensure_page_file() {
            return Ok(0);
        }
        let pending = self.pool.unpersisted();
        let mut written = 0;
        for scan_number in pending {
            if let (Some(entry), PageFileState::Open(pf)) =
                (self.pool.peek(scan_number), &mut self.page_file)
            {
                write_with_retry(pf, scan_number, &entry.spectrum, &self.write_retry_delays)?;
                written += 1;
            }
            self.pool.mark_persisted(scan_number);
        }
        self.stats.page_writes += written;
        Ok(written)
    }

    /// Release the pool, close the page file and delete this run's cache files along
    /// with any stale cache files in the same folder. Calling this more than once is a no-op.
    pub fn close(&mut self) {
        if matches!(self.page_file, PageFileState::Closed) {
            return;
        }
        self.pool.clear();
        self.page_file = PageFileState::Closed;
        let stale_age = Duration::from_secs_f64(self.options.stale_file_age_hours.max(0.0) * 3600.0);
        let removed =
            page_file::remove_cache_files(&self.options.cache_folder(), &self.run_id, stale_age);
        debug!(
            "Closed spectrum cache, removed {removed} cache files. Usage: {:?}",
            self.stats
        );
    }
}

impl SpectrumSource for SpectrumCache {
    fn get_spectrum(
        &mut self,
        scan_number: i32,
        can_skip_pool: bool,
    ) -> Result<Option<&Spectrum>, SpectrumCacheError> {
        self.get(scan_number, can_skip_pool)
    }
}

impl Drop for SpectrumCache {
    fn drop(&mut self) {
        self.close()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_spectrum(scan: i32) -> Spectrum {
        let pairs: Vec<(f64, f64)> = (0..(scan % 7 + 1))
            .map(|i| (100.0 + scan as f64 + i as f64 * 0.1 + 1e-9, 1.0 / (i as f64 + 3.0)))
            .collect();
        Spectrum::from_pairs(scan, &pairs)
    }

    fn options(dir: &std::path::Path, policy: EvictionPolicy) -> SpectrumCacheOptions {
        SpectrumCacheOptions {
            folder_path: Some(dir.to_path_buf()),
            spectra_to_retain_in_memory: 0,
            eviction_policy: policy,
            ..Default::default()
        }
    }

    #[test_log::test]
    fn test_round_trip_through_page_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        for policy in [EvictionPolicy::Array, EvictionPolicy::LeastRecentlyUsed] {
            let mut cache = SpectrumCache::new(options(dir.path(), policy));
            assert_eq!(cache.pool_capacity(), 100);
            for scan in 1..=250 {
                cache.put(&make_spectrum(scan), scan)?;
            }
            assert_eq!(cache.pool_len(), 100);
            assert!(cache.page_file_path().is_some());
            assert!(cache.stats().page_writes >= 150);

            for scan in [1, 77, 150, 250] {
                let expected = make_spectrum(scan);
                let found = cache.get(scan, false)?.unwrap();
                assert_eq!(found.scan_number, scan);
                assert_eq!(found.mzs, expected.mzs);
                assert_eq!(found.intensities, expected.intensities);
                assert!(cache.is_resident(scan));
            }
            assert!(cache.get(9999, false)?.is_none());
            assert_eq!(cache.pool_len(), 100);

            let path = cache.page_file_path().unwrap().to_path_buf();
            cache.close();
            assert!(!path.exists());
            assert!(matches!(
                cache.get(1, false),
                Err(SpectrumCacheError::Closed)
            ));
        }
        Ok(())
    }

    #[test]
    fn test_skip_pool() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut cache = SpectrumCache::new(options(dir.path(), EvictionPolicy::Array));
        for scan in 1..=101 {
            cache.put(&make_spectrum(scan), scan)?;
        }
        assert!(!cache.is_resident(1));
        assert!(cache.is_paged(1));
        let found = cache.get(1, true)?.unwrap().clone();
        assert_eq!(found, make_spectrum(1));
        assert!(!cache.is_resident(1));
        assert!(cache.get(1, false)?.is_some());
        assert!(cache.is_resident(1));
        Ok(())
    }

    #[test]
    fn test_disk_caching_disabled_grows() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut opts = options(dir.path(), EvictionPolicy::LeastRecentlyUsed);
        opts.disk_caching_always_disabled = true;
        let mut cache = SpectrumCache::new(opts);
        for scan in 1..=150 {
            cache.put(&make_spectrum(scan), scan)?;
        }
        assert_eq!(cache.pool_len(), 150);
        assert_eq!(cache.pool_capacity(), 100 + POOL_GROWTH_INCREMENT);
        assert_eq!(cache.stats().pool_growths, 1);
        assert!(cache.page_file_path().is_none());
        assert_eq!(cache.get(1, false)?.unwrap(), &make_spectrum(1));
        Ok(())
    }

    #[test]
    fn test_recache_supersedes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut cache = SpectrumCache::new(options(dir.path(), EvictionPolicy::Array));
        for scan in 1..=101 {
            cache.put(&make_spectrum(scan), scan)?;
        }
        // Scan 1 is on disk only; a new version must win once it is paged out too
        let replacement = Spectrum::from_pairs(1, &[(42.0, 42.0)]);
        cache.put(&replacement, 1)?;
        for scan in 200..=300 {
            cache.put(&make_spectrum(scan), scan)?;
        }
        assert!(!cache.is_resident(1));
        assert_eq!(cache.get(1, true)?.unwrap(), &replacement);
        Ok(())
    }

    #[test]
    fn test_cache_all_spectra() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut cache = SpectrumCache::new(options(dir.path(), EvictionPolicy::Array));
        for scan in 1..=10 {
            cache.put(&make_spectrum(scan), scan)?;
        }
        assert_eq!(cache.cache_all_spectra()?, 10);
        assert_eq!(cache.cache_all_spectra()?, 0);
        assert!((1..=10).all(|s| cache.is_paged(s)));
        Ok(())
    }

    #[test]
    fn test_small_run_writes_through() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut cache = SpectrumCache::new(options(dir.path(), EvictionPolicy::LeastRecentlyUsed));
        assert_eq!(cache.plan_for(100 + WRITE_THROUGH_SLACK), CacheMode::WriteThrough);
        for scan in 1..=10 {
            cache.put(&make_spectrum(scan), scan)?;
        }
        assert_eq!(cache.pool_len(), 0);
        assert_eq!(cache.stats().page_writes, 10);
        assert!((1..=10).all(|s| cache.is_paged(s)));

        assert_eq!(cache.get(3, false)?.unwrap(), &make_spectrum(3));
        assert!(cache.is_resident(3));
        let replacement = Spectrum::from_pairs(3, &[(42.0, 42.0)]);
        cache.put(&replacement, 3)?;
        assert_eq!(cache.get(3, false)?.unwrap(), &replacement);
        assert_eq!(cache.get(3, true)?.unwrap(), &replacement);
        Ok(())
    }

    #[test]
    fn test_large_run_uses_pool() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut cache = SpectrumCache::new(options(dir.path(), EvictionPolicy::Array));
        assert_eq!(cache.plan_for(100 + WRITE_THROUGH_SLACK + 1), CacheMode::PoolFirst);
        for scan in 1..=10 {
            cache.put(&make_spectrum(scan), scan)?;
        }
        assert_eq!(cache.pool_len(), 10);
        assert_eq!(cache.stats().page_writes, 0);
        assert!(cache.page_file_path().is_none());

        let mut opts = options(dir.path(), EvictionPolicy::Array);
        opts.disk_caching_always_disabled = true;
        let mut cache = SpectrumCache::new(opts);
        assert_eq!(cache.plan_for(10), CacheMode::PoolFirst);
        Ok(())
    }

    #[test_log::test]
    fn test_page_file_creation_failure() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("does").join("not").join("exist");
        let mut cache = SpectrumCache::new(options(&missing, EvictionPolicy::Array));
        assert_eq!(cache.plan_for(10), CacheMode::WriteThrough);
        for scan in 1..=150 {
            cache.put(&make_spectrum(scan), scan)?;
        }
        assert_eq!(cache.mode(), CacheMode::PoolFirst);
        assert!(!cache.disk_caching_available());
        assert_eq!(cache.pool_len(), 150);
        assert_eq!(cache.pool_capacity(), 100 + POOL_GROWTH_INCREMENT);
        assert_eq!(cache.stats().pool_growths, 1);
        assert_eq!(cache.get(1, false)?.unwrap(), &make_spectrum(1));
        Ok(())
    }

    #[test_log::test]
    fn test_truncated_record_reads_back_cleared() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut cache = SpectrumCache::new(options(dir.path(), EvictionPolicy::Array));
        for scan in 1..=101 {
            cache.put(&make_spectrum(scan), scan)?;
        }
        assert!(cache.is_paged(1));
        let path = cache.page_file_path().unwrap().to_path_buf();
        let handle = std::fs::File::options().write(true).open(&path)?;
        let length = handle.metadata()?.len();
        handle.set_len(length - 20)?;

        let found = cache.get(1, true)?.unwrap();
        assert_eq!(found.scan_number, 1);
        assert!(found.is_empty());
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_retries_then_fails() -> Result<(), Box<dyn std::error::Error>> {
        let path = std::path::Path::new("/dev/full");
        let handle = std::fs::File::options().read(true).write(true).open(path)?;
        let mut pf = PageFile::from_handle(path, handle);
        let delays = [Duration::from_millis(1); 3];
        match write_with_retry(&mut pf, 1, &make_spectrum(1), &delays) {
            Err(SpectrumCacheError::WriteFailed { scan_number, attempts, .. }) => {
                assert_eq!(scan_number, 1);
                assert_eq!(attempts, delays.len() + 1);
            }
            other => panic!("Expected a write failure, got {other:?}"),
        }
        assert!(pf.is_empty());
        Ok(())
    }

    #[test]
    fn test_deterministic_errors_are_not_retried() {
        assert!(!is_transient(io::ErrorKind::InvalidInput));
        assert!(!is_transient(io::ErrorKind::InvalidData));
        assert!(is_transient(io::ErrorKind::Interrupted));
        assert!(is_transient(io::ErrorKind::PermissionDenied));
    }
}
