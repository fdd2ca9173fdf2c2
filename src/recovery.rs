//! Embodiment recovery.
//!
//! The server flips an avatar's embodiment state before it announces the
//! ghost object, so a CORPORATE issued immediately after a disembodiment
//! notice would address a reference that does not exist yet. Recovery
//! polls for the ghost announcement on a bounded budget before giving up.

use crate::client::HabiBot;
use crate::dispatch::SendError;
use crate::message::{Message, OP_CORPORATE};
use crate::session::GHOST;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Interval between ghost-reference checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Checks made before giving up.
pub const MAX_ATTEMPTS: u32 = 5;
/// Grace period after CORPORATE; legacy clients need it to load imagery.
pub const SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Where the avatar currently stands in the embodiment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbodimentState {
    /// Full in-world presence.
    Embodied,
    /// Disembodied, ghost object not announced yet.
    AwaitingGhost,
    /// Disembodied with a known ghost reference.
    Ready,
    /// A CORPORATE command is in flight.
    Recovering,
}

/// Errors from [`HabiBot::ensure_corporated`].
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The polling budget ran out with no ghost reference observed.
    #[error("no ghost reference observed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("failed to issue CORPORATE: {0}")]
    Send(#[from] SendError),
}

impl HabiBot {
    /// The avatar's current place in the embodiment lifecycle.
    #[must_use]
    pub fn embodiment_state(&self) -> EmbodimentState {
        if self.inner().recovering.load(Ordering::SeqCst) {
            EmbodimentState::Recovering
        } else if !self.is_ghosted() {
            EmbodimentState::Embodied
        } else if self.known_ref(GHOST).is_some() {
            EmbodimentState::Ready
        } else {
            EmbodimentState::AwaitingGhost
        }
    }

    /// Make sure the avatar has full in-world presence.
    ///
    /// Resolves immediately when already embodied. When disembodied, polls
    /// for the ghost announcement up to [`MAX_ATTEMPTS`] times at
    /// [`POLL_INTERVAL`]; on sighting it issues one CORPORATE addressed to
    /// the ghost and waits [`SETTLE_DELAY`] before resolving. Exhausting
    /// the budget fails with [`RecoveryError::RetriesExhausted`].
    pub async fn ensure_corporated(&self) -> Result<(), RecoveryError> {
        if !self.is_ghosted() {
            return Ok(());
        }
        for attempt in 1..=MAX_ATTEMPTS {
            if let Some(ghost) = self.known_ref(GHOST) {
                debug!("ghost {ghost} sighted on attempt {attempt}");
                return self.corporate_via_ghost().await;
            }
            debug!("no ghost reference yet (attempt {attempt}/{MAX_ATTEMPTS})");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(RecoveryError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }

    async fn corporate_via_ghost(&self) -> Result<(), RecoveryError> {
        self.inner().recovering.store(true, Ordering::SeqCst);
        let result = self.send(Message::command(OP_CORPORATE, GHOST)).await;
        if let Err(e) = result {
            self.inner().recovering.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        // Give the legacy client side time to load imagery before anyone
        // piles more commands on.
        tokio::time::sleep(SETTLE_DELAY).await;
        self.inner().recovering.store(false, Ordering::SeqCst);
        info!("avatar re-embodied");
        Ok(())
    }
}
