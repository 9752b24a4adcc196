//! Error kinds (§7). Only operations spec.md marks as fallible return
//! `Result<_, Error>`; the hot path (`get`/`put`/`remove`) returns plain
//! values, since "null key" is unrepresentable once keys are owned, non
//! `Option` values (see SPEC_FULL.md §A.4 and §A.7.3).

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// A variable-expiration-only operation (`put_with_expiration`,
    /// `set_expiration`, `set_expiration_policy`) was called on a map built
    /// without `.variable_expiration()`.
    #[error("this operation requires a map built with variable_expiration()")]
    UnsupportedOnUniformMap,

    /// `get_expiration`/`get_expected_expiration`/`set_expiration(key, ..)`
    /// referenced a key that is not (or no longer) present.
    #[error("no entry found for the given key")]
    NotFound,

    /// The builder was given both `.entry_loader(..)` and
    /// `.expiring_entry_loader(..)`.
    #[error("entry_loader and expiring_entry_loader are mutually exclusive")]
    BothLoaderKinds,

    /// An iterator observed the map's size change since it was created,
    /// other than by its own `remove`.
    #[error("the map was modified during iteration")]
    ConcurrentModification,

    /// `init_thread_factory` was called more than once, or after the
    /// process-wide scheduler/listener pool was already initialized.
    #[error("the thread factory can only be set once, before the first map is built")]
    ThreadFactoryAlreadySet,
}
