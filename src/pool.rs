//! Idle upstream connection pool.
//!
//! Plain synchronous locking: entries are only moved in and out, never held
//! across an await. A connection is admitted only when its last exchange
//! ended cleanly, and stale entries are dropped on the way out rather than
//! probed, since an idle origin may close at any time.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::trace;

use crate::config::Config;
use crate::upstream::UpstreamConn;

#[derive(Debug)]
pub struct UpstreamPool {
    idle: Mutex<HashMap<String, VecDeque<PooledConn>>>,
    max_idle: Duration,
    max_per_authority: usize,
}

#[derive(Debug)]
struct PooledConn {
    conn: UpstreamConn,
    since: Instant,
}

impl UpstreamPool {
    pub fn new(config: &Config) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            max_idle: config.pool_max_idle(),
            max_per_authority: config.pool_max_idle_per_authority,
        }
    }

    /// Freshest pooled connection for `authority`, if any survives the
    /// idle-age cut.
    pub fn checkout(&self, authority: &str) -> Option<UpstreamConn> {
        let mut idle = self.lock();
        let queue = idle.get_mut(authority)?;
        while let Some(pooled) = queue.pop_back() {
            if pooled.since.elapsed() <= self.max_idle {
                trace!(%authority, "reusing pooled upstream connection");
                return Some(pooled.conn);
            }
            // stale; drop it and keep looking
        }
        idle.remove(authority);
        None
    }

    /// Admits `conn` back into the pool; connections that cannot be trusted
    /// for another exchange are dropped instead.
    pub fn checkin(&self, conn: UpstreamConn) {
        if !conn.is_reusable() {
            return;
        }
        let authority = conn.authority().to_string();
        let mut idle = self.lock();
        let queue = idle.entry(authority).or_default();
        // oldest entries age out first
        while let Some(front) = queue.front() {
            if front.since.elapsed() <= self.max_idle && queue.len() < self.max_per_authority {
                break;
            }
            queue.pop_front();
        }
        queue.push_back(PooledConn {
            conn,
            since: Instant::now(),
        });
    }

    pub fn idle_count(&self, authority: &str) -> usize {
        self.lock().get(authority).map_or(0, VecDeque::len)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<PooledConn>>> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
