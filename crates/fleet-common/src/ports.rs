//! Port allocation ledger
//!
//! A flat text file with one `<owner>: <port>` line per allocation. The ledger
//! is the single source of truth for which application owns which port; no
//! port ever has more than one owner.
//!
//! Every read-modify-write sequence holds an exclusive advisory lock on a
//! sidecar `<ledger>.lock` file, so concurrent render tasks and concurrent
//! `fleet` invocations on the same host serialise their updates. Reads take a
//! shared lock.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::error::IoResultExt;
use crate::{fs, Error, Result};

/// Default ledger file name, relative to the repository root
pub const DEFAULT_LEDGER_FILE: &str = "ports.txt";

/// First port handed out by [`PortRegistry::allocate`]
pub const DEFAULT_MIN_PORT: u16 = 8000;

/// Last port handed out by [`PortRegistry::allocate`] (inclusive)
pub const DEFAULT_MAX_PORT: u16 = 9000;

/// One `(owner, port)` allocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortEntry {
    /// Application that owns the port
    pub owner: String,
    /// The allocated port
    pub port: u16,
}

impl PortEntry {
    /// Create a new entry
    pub fn new(owner: impl Into<String>, port: u16) -> Self {
        Self {
            owner: owner.into(),
            port,
        }
    }

    /// Parse a ledger line. Accepts `owner: port` and `owner:port`.
    pub fn parse(line: &str) -> Option<Self> {
        let (owner, port) = line.split_once(':')?;
        let owner = owner.trim();
        if owner.is_empty() {
            return None;
        }
        let port = port.trim().parse().ok()?;
        Some(Self::new(owner, port))
    }
}

impl fmt::Display for PortEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.owner, self.port)
    }
}

/// A raw ledger line and its parsed form, if it parsed
#[derive(Debug)]
struct LedgerLine {
    raw: String,
    entry: Option<PortEntry>,
}

/// In-memory snapshot of the ledger file
#[derive(Debug, Default)]
struct Ledger {
    lines: Vec<LedgerLine>,
    /// File is non-empty and lacks a trailing newline
    unterminated: bool,
}

impl Ledger {
    fn parse(path: &Path, content: &str) -> Self {
        let lines = content
            .lines()
            .enumerate()
            .map(|(idx, raw)| {
                let entry = PortEntry::parse(raw);
                if entry.is_none() && !raw.trim().is_empty() {
                    warn!(
                        ledger = %path.display(),
                        line = idx + 1,
                        content = raw,
                        "Skipping malformed ledger line"
                    );
                }
                LedgerLine {
                    raw: raw.to_string(),
                    entry,
                }
            })
            .collect();

        Self {
            lines,
            unterminated: !content.is_empty() && !content.ends_with('\n'),
        }
    }

    fn entries(&self) -> impl Iterator<Item = &PortEntry> {
        self.lines.iter().filter_map(|l| l.entry.as_ref())
    }

    fn owner_of(&self, port: u16) -> Option<&str> {
        self.entries()
            .find(|e| e.port == port)
            .map(|e| e.owner.as_str())
    }

    fn port_of(&self, owner: &str) -> Option<u16> {
        self.entries().find(|e| e.owner == owner).map(|e| e.port)
    }
}

/// Held for the duration of a ledger operation; releases the lock on drop
struct LedgerLock {
    file: File,
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// File-backed port registry
#[derive(Clone, Debug)]
pub struct PortRegistry {
    path: PathBuf,
    range: RangeInclusive<u16>,
}

impl PortRegistry {
    /// Open a registry over `path` using the default 8000-9000 range.
    ///
    /// The file is created lazily on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_range(path, DEFAULT_MIN_PORT..=DEFAULT_MAX_PORT)
    }

    /// Open a registry with a custom allocation range
    pub fn with_range(path: impl Into<PathBuf>, range: RangeInclusive<u16>) -> Self {
        Self {
            path: path.into(),
            range,
        }
    }

    /// Path of the ledger file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocation range
    pub fn range(&self) -> &RangeInclusive<u16> {
        &self.range
    }

    /// Whether any owner holds `port`. A missing ledger means nothing is
    /// allocated.
    pub fn is_allocated(&self, port: u16) -> Result<bool> {
        Ok(self.owner_of(port)?.is_some())
    }

    /// Owner of `port`, if any
    pub fn owner_of(&self, port: u16) -> Result<Option<String>> {
        let Some(_lock) = self.lock_shared()? else {
            return Ok(None);
        };
        Ok(self.load()?.owner_of(port).map(str::to_string))
    }

    /// All well-formed ledger entries in file order
    pub fn entries(&self) -> Result<Vec<PortEntry>> {
        let Some(_lock) = self.lock_shared()? else {
            return Ok(Vec::new());
        };
        Ok(self.load()?.entries().cloned().collect())
    }

    /// Allocate the lowest free port in the range for `owner` and record it.
    ///
    /// An owner that already holds a port gets that port back.
    pub fn allocate(&self, owner: &str) -> Result<u16> {
        let _lock = self.lock_exclusive()?;
        let ledger = self.load()?;

        if let Some(port) = ledger.port_of(owner) {
            debug!(owner, port, "Owner already holds a port");
            return Ok(port);
        }

        let port = self
            .range
            .clone()
            .find(|p| ledger.owner_of(*p).is_none())
            .ok_or(Error::NoCapacity {
                start: *self.range.start(),
                end: *self.range.end(),
            })?;

        self.append(&ledger, &PortEntry::new(owner, port))?;
        info!(owner, port, "Allocated port");
        Ok(port)
    }

    /// Record that `owner` holds `port`.
    ///
    /// A port that is already recorded, by any owner, is left as is and
    /// `Ok(false)` is returned.
    pub fn record(&self, owner: &str, port: u16) -> Result<bool> {
        let _lock = self.lock_exclusive()?;
        let ledger = self.load()?;

        if let Some(current) = ledger.owner_of(port) {
            debug!(owner, port, current, "Port already recorded");
            return Ok(false);
        }

        self.append(&ledger, &PortEntry::new(owner, port))?;
        info!(owner, port, "Recorded port");
        Ok(true)
    }

    /// Claim `port` for `owner` ahead of writing anything that uses it.
    ///
    /// Check and record happen under one exclusive lock. Returns `Ok(true)`
    /// when the claim is new and `Ok(false)` when `owner` already holds the
    /// port; a port held by anyone else is a [`Error::PortConflict`].
    pub fn claim(&self, owner: &str, port: u16) -> Result<bool> {
        let _lock = self.lock_exclusive()?;
        let ledger = self.load()?;

        match ledger.owner_of(port) {
            Some(current) if current == owner => Ok(false),
            Some(current) => Err(Error::PortConflict {
                port,
                owner: current.to_string(),
                requested_by: owner.to_string(),
            }),
            None => {
                self.append(&ledger, &PortEntry::new(owner, port))?;
                info!(owner, port, "Claimed port");
                Ok(true)
            }
        }
    }

    /// Remove every ledger line for `owner` holding `port`.
    ///
    /// Other lines, malformed ones included, are kept verbatim. Returns
    /// whether anything was removed.
    pub fn release(&self, owner: &str, port: u16) -> Result<bool> {
        if !fs::exists(&self.path)? {
            return Ok(false);
        }
        let _lock = self.lock_exclusive()?;
        let ledger = self.load()?;
        let target = PortEntry::new(owner, port);

        let before = ledger.lines.len();
        let kept: Vec<&str> = ledger
            .lines
            .iter()
            .filter(|l| l.entry.as_ref() != Some(&target))
            .map(|l| l.raw.as_str())
            .collect();

        if kept.len() == before {
            debug!(owner, port, "Nothing to release");
            return Ok(false);
        }

        let mut content = kept.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        fs::write_atomic(&self.path, content.as_bytes())?;
        info!(owner, port, "Released port");
        Ok(true)
    }

    fn load(&self) -> Result<Ledger> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Ledger::parse(&self.path, &content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Ledger::default()),
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }

    fn append(&self, ledger: &Ledger, entry: &PortEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .at(&self.path)?;
        let prefix = if ledger.unterminated { "\n" } else { "" };
        writeln!(file, "{prefix}{entry}").at(&self.path)?;
        file.sync_all().at(&self.path)
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn open_lock_file(&self) -> Result<(PathBuf, File)> {
        fs::ensure_dir(fs::parent_dir(&self.path))?;
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .at(&lock_path)?;
        Ok((lock_path, file))
    }

    fn lock_exclusive(&self) -> Result<LedgerLock> {
        let (lock_path, file) = self.open_lock_file()?;
        file.lock_exclusive().at(&lock_path)?;
        Ok(LedgerLock { file })
    }

    /// Shared lock for readers; `None` when there is no ledger to read
    fn lock_shared(&self) -> Result<Option<LedgerLock>> {
        if !fs::exists(&self.path)? {
            return Ok(None);
        }
        let (lock_path, file) = self.open_lock_file()?;
        file.lock_shared().at(&lock_path)?;
        Ok(Some(LedgerLock { file }))
    }
}
