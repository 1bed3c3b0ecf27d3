//! Disk-backed IP whitelist store.
//!
//! The authoritative map lives in memory; every addition is also appended
//! to an on-disk log of fixed-size records (see [`ipgate_core::record`]),
//! which is replayed on startup. One lock covers the map, the
//! forced-expiration override, and the log append, so `check` can never
//! observe a half-applied `add` and no two appends interleave.
//!
//! Entries are never removed: an expired entry stays in the map and
//! simply evaluates as unauthorized.

use ipgate_core::record::{LogRecord, RECORD_LEN};
use ipgate_core::{GateError, GateResult};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Current Unix time in whole seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Thread-safe whitelist of IPv4 addresses with optional expiration.
pub struct IpStore {
    inner: Mutex<StoreInner>,
    path: PathBuf,
}

struct StoreInner {
    ips: HashMap<Ipv4Addr, Option<i64>>,
    log: File,
    /// Forced-expiration override in seconds; 0 = disabled.
    forced: u64,
}

impl IpStore {
    /// Open the whitelist log at `path` (creating it if absent) and replay
    /// it into memory. Records whose expiration has already passed are
    /// dropped during replay; a truncated trailing record (a partial write
    /// from a prior crash) is treated as end of valid data, not an error.
    pub fn open(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut log = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut raw = Vec::new();
        log.read_to_end(&mut raw)?;

        let now = unix_now();
        let mut ips = HashMap::new();
        let mut expired = 0usize;
        for chunk in raw.chunks_exact(RECORD_LEN) {
            let rec = LogRecord::decode(chunk)?;
            match rec.expires_at {
                Some(t) if t <= now => expired += 1,
                exp => {
                    ips.insert(rec.ip, exp);
                }
            }
        }
        if raw.len() % RECORD_LEN != 0 {
            warn!(path = %path.display(), "ignoring truncated trailing record");
        }
        info!(
            path = %path.display(),
            entries = ips.len(),
            expired,
            "whitelist database loaded"
        );

        Ok(Self {
            inner: Mutex::new(StoreInner {
                ips,
                log,
                forced: 0,
            }),
            path,
        })
    }

    /// Set the global forced-expiration override.
    ///
    /// A nonzero value makes every subsequent [`IpStore::add`] expire
    /// `seconds` after the add, regardless of the expiration the caller
    /// asked for — including an explicit permanent request. Zero disables
    /// the override and callers' expirations are honored again.
    pub fn set_forced_expiration(&self, seconds: u64) {
        self.lock().forced = seconds;
    }

    /// Whitelist `ip` until `expires_at` (`None` = permanent), replacing
    /// any existing entry for the same address.
    ///
    /// The in-memory update always takes effect and the log append
    /// completes before this returns. A failed append is reported as
    /// [`GateError::Persistence`]; the entry stays authoritative in memory
    /// for the life of the process, so the caller decides how loudly to
    /// complain.
    pub fn add(&self, ip: Ipv4Addr, expires_at: Option<i64>) -> GateResult<()> {
        self.add_at(ip, expires_at, unix_now())
    }

    /// `true` iff `ip` is present and either permanent or not yet expired.
    pub fn check(&self, ip: Ipv4Addr) -> bool {
        self.check_at(ip, unix_now())
    }

    fn add_at(&self, ip: Ipv4Addr, expires_at: Option<i64>, now: i64) -> GateResult<()> {
        let mut inner = self.lock();
        let effective = if inner.forced != 0 {
            Some(now + inner.forced as i64)
        } else {
            expires_at
        };
        inner.ips.insert(ip, effective);

        let rec = LogRecord { ip, expires_at: effective };
        inner.log.write_all(&rec.encode()).map_err(|e| {
            GateError::Persistence(format!("append to {} failed: {e}", self.path.display()))
        })
    }

    fn check_at(&self, ip: Ipv4Addr, now: i64) -> bool {
        match self.lock().ips.get(&ip) {
            None => false,
            Some(None) => true,
            Some(Some(t)) => *t > now,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // A panic while holding the lock leaves the map intact, so poison
        // recovery is safe.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
