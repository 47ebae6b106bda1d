use crate::error::{CodecError, Result};

/// One-way freeze flag shared by every node and serializer.
///
/// Mutators call [`InitGuard::ensure_mutable`]; accessors that require a
/// finished object call [`InitGuard::ensure_initialized`].
#[derive(Debug, Clone, Copy)]
pub struct InitGuard {
    what: &'static str,
    initialized: bool,
}

impl InitGuard {
    pub const fn new(what: &'static str) -> Self {
        Self {
            what,
            initialized: false,
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Fails with `AlreadyInitialized` once frozen.
    #[inline]
    pub fn ensure_mutable(&self) -> Result<()> {
        if self.initialized {
            return Err(CodecError::AlreadyInitialized(self.what));
        }
        Ok(())
    }

    /// Fails with `NotInitialized` until frozen.
    #[inline]
    pub fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(CodecError::NotInitialized(self.what));
        }
        Ok(())
    }
}
