use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the event-driven simulation core.
///
/// Recoverable conditions (no real root, a stale prediction) never surface
/// here; they are handled internally by the driver. The variants below are
/// either rejected input or unrecoverable engine corruption.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid user or API parameter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Numerical or geometric issue (e.g., degenerate contact normal).
    #[error("numerical error: {0}")]
    MathError(String),

    /// Two particles in the initial snapshot penetrate each other.
    #[error("initial overlap between particles {a} and {b}: separation {separation} < contact distance {contact}")]
    Overlap {
        a: u32,
        b: u32,
        separation: f64,
        contact: f64,
    },

    /// Internal invariant violation: the queue or the streaming state is
    /// corrupt. Carries the offending particles and the last clock value at
    /// which the engine was known to be consistent. The simulation must not
    /// be continued after this.
    #[error("engine corrupt at t={clock} (particles {particles:?}): {detail}")]
    Corrupt {
        clock: f64,
        particles: Vec<u32>,
        detail: String,
    },
}
