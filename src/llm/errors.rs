//! Error taxonomy for the inference engine (§4.H, §7).
//!
//! Two layers: [`StatusCode`], the stable small i32 surface handed back
//! across the external interface (§6), and [`LlmError`], the richer
//! internal enum every core routine actually returns. `LlmError::code()`
//! maps down to a `StatusCode` at the crate boundary.

use alloc::string::String;
use core::fmt;

/// Stable status codes exposed to collaborators (§6). Never renumber these;
/// external callers match on the integer value.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 0,
    Null = -1,
    Bounds = -2,
    Overflow = -3,
    NotInit = -4,
    AlreadyInit = -5,
    Alloc = -6,
    Invalid = -7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Resource,
    Input,
    Structural,
    Internal,
}

/// Internal error taxonomy. Every core routine returns `Result<T, LlmError>`
/// and propagates with `?`; only the crate boundary narrows this down to a
/// [`StatusCode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// `n_embd % n_head != 0`, `n_head % n_kv_head != 0`, zero dimensions.
    InvalidConfig(String),
    /// Sequence position at or beyond `max_seq_len`.
    ContextLengthExceeded { position: usize, max: usize },
    /// Token id outside `[0, n_vocab)`.
    InvalidTokenId(u32),
    /// A required pointer/slice/weight bundle was absent.
    NullArgument(&'static str),
    /// Index or range outside the addressed buffer.
    OutOfBounds { index: usize, len: usize },
    /// Quantized block length not a multiple of the block's byte size.
    MalformedBlockLength { got: usize, block_size: usize },
    /// Tensor element type the codec does not recognize.
    UnsupportedQuantType(u32),
    /// Physical/arena allocation failed.
    OutOfMemory { requested: usize },
    /// Engine state accessed before `inference_init`.
    NotInitialized,
    /// `inference_init` called twice without `inference_cleanup`.
    AlreadyInitialized,
    /// Catch-all for invariant violations that should not be reachable.
    Internal(String),
}

impl LlmError {
    pub fn code(&self) -> StatusCode {
        match self {
            LlmError::NullArgument(_) => StatusCode::Null,
            LlmError::OutOfBounds { .. } | LlmError::ContextLengthExceeded { .. } => {
                StatusCode::Bounds
            }
            LlmError::InvalidTokenId(_) => StatusCode::Bounds,
            LlmError::NotInitialized => StatusCode::NotInit,
            LlmError::AlreadyInitialized => StatusCode::AlreadyInit,
            LlmError::OutOfMemory { .. } => StatusCode::Alloc,
            LlmError::InvalidConfig(_)
            | LlmError::MalformedBlockLength { .. }
            | LlmError::UnsupportedQuantType(_) => StatusCode::Invalid,
            LlmError::Internal(_) => StatusCode::Overflow,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            LlmError::InvalidConfig(_) => ErrorCategory::Configuration,
            LlmError::OutOfMemory { .. } => ErrorCategory::Resource,
            LlmError::ContextLengthExceeded { .. }
            | LlmError::InvalidTokenId(_)
            | LlmError::NullArgument(_) => ErrorCategory::Input,
            LlmError::MalformedBlockLength { .. } | LlmError::UnsupportedQuantType(_) => {
                ErrorCategory::Structural
            }
            LlmError::OutOfBounds { .. } => ErrorCategory::Input,
            LlmError::NotInitialized | LlmError::AlreadyInitialized | LlmError::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Resource | ErrorCategory::Input
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "fix model configuration and reload",
            ErrorCategory::Resource => "free memory or reduce concurrent inferences, then retry",
            ErrorCategory::Input => "validate caller-supplied ids/positions before retrying",
            ErrorCategory::Structural => "the weight file is malformed; it cannot be used",
            ErrorCategory::Internal => "unexpected internal state; abort the current generation",
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            LlmError::ContextLengthExceeded { position, max } => {
                write!(f, "position {} >= max_seq_len {}", position, max)
            }
            LlmError::InvalidTokenId(id) => write!(f, "invalid token id {}", id),
            LlmError::NullArgument(what) => write!(f, "null argument: {}", what),
            LlmError::OutOfBounds { index, len } => {
                write!(f, "index {} out of bounds for length {}", index, len)
            }
            LlmError::MalformedBlockLength { got, block_size } => write!(
                f,
                "tensor byte length {} is not a multiple of block size {}",
                got, block_size
            ),
            LlmError::UnsupportedQuantType(t) => write!(f, "unsupported quant type code {}", t),
            LlmError::OutOfMemory { requested } => {
                write!(f, "allocation of {} bytes failed", requested)
            }
            LlmError::NotInitialized => write!(f, "engine not initialized"),
            LlmError::AlreadyInitialized => write!(f, "engine already initialized"),
            LlmError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

/// Wraps an error with a location string and emits it through the logging
/// facility at Error severity. Debug-only path per §7 ("logged only in
/// debug" for transient numeric edges); structural/config errors always log.
pub struct ErrorContext;

impl ErrorContext {
    pub fn log(err: &LlmError, location: &str) {
        crate::error!("{} at {}: {}", err, location, err.recovery_suggestion());
    }
}
