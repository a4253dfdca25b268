use std::any::Any;
use std::error;
use std::fmt;

/// A captured task panic, stored by the operation state and re-raised on
/// `get`. The payload keeps its dynamic type across the state boundary.
pub type Panic = Box<dyn Any + Send + 'static>;

/// Contract violations surfaced by the operation-state API.
///
/// These are distinct from task failures: a task that panics completes its
/// state with a captured payload, while the kinds below report misuse of the
/// producer/consumer protocol itself at the call site.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `set_value` or `set_failure` was called on a state that is already
    /// ready.
    PromiseAlreadySatisfied,
    /// A result accessor was called before the state became ready.
    PromiseUninitialized,
    /// The producer dropped its handle without completing the state.
    BrokenPromise,
    /// The future handle no longer refers to an operation state.
    NoState,
}

impl Error {
    fn as_str(&self) -> &'static str {
        match *self {
            Error::PromiseAlreadySatisfied => "promise already satisfied",
            Error::PromiseUninitialized => "promise uninitialized",
            Error::BrokenPromise => "broken promise",
            Error::NoState => "no associated operation state",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::PromiseAlreadySatisfied => write!(fmt, "PromiseAlreadySatisfied"),
            Error::PromiseUninitialized => write!(fmt, "PromiseUninitialized"),
            Error::BrokenPromise => write!(fmt, "BrokenPromise"),
            Error::NoState => write!(fmt, "NoState"),
        }
    }
}

impl error::Error for Error {}

/// What a state holds when it completed without a value.
///
/// A panic payload is taken by the first consumer that re-raises it; later
/// observers of the same shared state still see that the task panicked.
pub(crate) enum Failure {
    Panicked(Option<Panic>),
    BrokenPromise,
}

impl fmt::Debug for Failure {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Failure::Panicked(Some(_)) => write!(fmt, "Panicked(..)"),
            Failure::Panicked(None) => write!(fmt, "Panicked(<taken>)"),
            Failure::BrokenPromise => write!(fmt, "BrokenPromise"),
        }
    }
}
