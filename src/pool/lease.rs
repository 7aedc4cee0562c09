//! Scoped ownership of one sandbox

use std::sync::Arc;
use tracing::warn;

use super::SandboxPool;

/// A sandbox lent out by [`SandboxPool::acquire`]
///
/// Hand it back with [`Lease::release`] or [`Lease::destroy`]. A lease dropped
/// without either is destroyed in the background, since nothing is known about
/// the state its holder left the workspace in.
#[must_use = "a dropped lease destroys its sandbox"]
pub struct Lease {
    pool: Arc<SandboxPool>,
    name: String,
    settled: bool,
}

impl Lease {
    pub(crate) fn new(pool: Arc<SandboxPool>, name: String) -> Self {
        Lease {
            pool,
            name,
            settled: false,
        }
    }

    /// Name of the leased sandbox
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the sandbox to the pool
    pub async fn release(mut self) {
        self.settled = true;
        self.pool.release_name(&self.name).await;
    }

    /// Destroy the sandbox instead of reusing it
    pub async fn destroy(mut self) {
        self.settled = true;
        self.pool.destroy(&self.name).await;
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("name", &self.name).finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let pool = self.pool.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(sandbox = %name, "Lease dropped without release, destroying");
                handle.spawn(async move {
                    pool.destroy(&name).await;
                });
            }
            Err(_) => {
                warn!(sandbox = %name, "Lease dropped outside a runtime; left for shutdown");
            }
        }
    }
}
