//! Administrative release of borrowed hosts.
//!
//! Used to clean up after runs started with `--keep` or interrupted before
//! they could release their host. Neither operation touches a host over
//! SSH; they only talk to the pool.

use tracing::info;

use crate::pool::{Pool, SessionToken};

/// Summary of janitor work.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SweepSummary {
    /// Number of hosts released during the sweep.
    pub released: usize,
}

/// Releases hosts directly through the pool.
#[derive(Clone, Debug)]
pub struct Janitor<P> {
    pool: P,
}

impl<P: Pool> Janitor<P> {
    /// Creates a janitor for `pool`.
    #[must_use]
    pub const fn new(pool: P) -> Self {
        Self { pool }
    }

    /// Releases the host held under `token`.
    ///
    /// # Errors
    ///
    /// Returns the pool error when the release call fails.
    pub async fn release_one(&self, token: &SessionToken) -> Result<(), P::Error> {
        self.pool.release(token).await?;
        info!(%token, "released host");
        Ok(())
    }

    /// Releases every host listed in the pool inventory.
    ///
    /// Entries are released in inventory order; the first failure stops the
    /// sweep.
    ///
    /// # Errors
    ///
    /// Returns the pool error when listing or any release call fails.
    pub async fn sweep(&self) -> Result<SweepSummary, P::Error> {
        let entries = self.pool.list_active().await?;
        let mut released = 0;
        for entry in &entries {
            self.pool.release(&entry.token).await?;
            info!(hostname = %entry.hostname, token = %entry.token, "released host");
            released += 1;
        }
        Ok(SweepSummary { released })
    }
}
