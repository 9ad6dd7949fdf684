//! Error types for synchronous failures.
//!
//! Asynchronous input failures never show up here: they surface as
//! [`PlayerState::Error`](crate::player::PlayerState::Error) through listener
//! events. Everything in this module is returned to the immediate caller.

use thiserror::Error;

use crate::input::{Capabilities, TrackCategory};

/// Failure reported by an [`Input`](crate::input::Input) implementation or
/// its factory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// The input could not allocate what it needs for this media.
    #[error("cannot create input for {uri}: {reason}")]
    Create { uri: String, reason: String },

    /// The input thread could not be started.
    #[error("cannot start input: {0}")]
    Start(String),
}

/// Errors returned by the player, the playlist and the worker pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Input lifecycle
    // ========================================================================
    /// A new input could not be constructed for the current media.
    #[error("input creation failed: {0}")]
    InputCreation(InputError),

    /// The input refused to start.
    #[error("input start failed: {0}")]
    InputStart(InputError),

    // ========================================================================
    // Player preconditions
    // ========================================================================
    /// `start()` called without a current media.
    #[error("no current media")]
    NoMedia,

    /// `start()` called while an input is already started.
    #[error("player already started")]
    AlreadyStarted,

    /// A control was requested while no input is started.
    #[error("player not started")]
    NotStarted,

    /// The current input does not advertise the required capability.
    #[error("operation not supported by the current input (needs {0})")]
    Unsupported(Capabilities),

    /// Only audio and subtitle media can be associated with an input.
    #[error("cannot associate a {0:?} media")]
    UnsupportedCategory(TrackCategory),

    // ========================================================================
    // Playlist preconditions
    // ========================================================================
    /// `next()` called when there is no next item.
    #[error("no next item")]
    NoNext,

    /// `prev()` called when there is no previous item.
    #[error("no previous item")]
    NoPrev,

    /// An index or range does not fit the playlist.
    #[error("index {index} out of range (count {count})")]
    OutOfRange { index: usize, count: usize },

    /// A request named an item that is no longer in the playlist.
    #[error("item not in playlist")]
    ItemNotFound,

    // ========================================================================
    // Threads
    // ========================================================================
    /// The OS refused to spawn a thread.
    #[error("thread spawn failed: {0}")]
    Spawn(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Log a failed result with some context, without panicking.
pub(crate) fn log_err<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            log::warn!("segue: {} failed: {}", context, e);
            false
        }
    }
}
