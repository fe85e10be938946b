//! Process-wide runtime state (§4.9): the `init()`/`shutdown()` flag and
//! the installed error callback. Kept in one `parking_lot`-guarded
//! struct rather than scattered atomics, since both fields change
//! together and neither is on a hot path.

use parking_lot::RwLock;

use crate::error::{CoreError, ErrorCode};

/// A thread-safe error sink installed via [`RuntimeConfig::set_error_callback`].
pub type ErrorCallback = Box<dyn Fn(ErrorCode, &str) + Send + Sync>;

#[derive(Default)]
struct Inner {
    initialized: bool,
    error_callback: Option<ErrorCallback>,
}

/// Guards the crate's process-wide lifecycle state. One instance is
/// shared by every `Animation` created in the process (§6.4).
pub struct RuntimeConfig {
    inner: RwLock<Inner>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent-in-intent, but a second call without an intervening
    /// `shutdown()` is reported as `AlreadyInitialized` (§6.4).
    pub fn init(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.write();
        if inner.initialized {
            return Err(CoreError::AlreadyInitialized);
        }
        inner.initialized = true;
        log::info!("runtime initialized");
        Ok(())
    }

    pub fn shutdown(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.write();
        if !inner.initialized {
            return Err(CoreError::NotInitialized);
        }
        inner.initialized = false;
        inner.error_callback = None;
        log::info!("runtime shut down");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.read().initialized
    }

    pub fn require_initialized(&self) -> Result<(), CoreError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CoreError::NotInitialized)
        }
    }

    pub fn set_error_callback(&self, callback: ErrorCallback) {
        self.inner.write().error_callback = Some(callback);
    }

    pub fn clear_error_callback(&self) {
        self.inner.write().error_callback = None;
    }

    /// Routes `err` through the installed callback, if any, tagged with
    /// its host-facing error code.
    pub fn report_error(&self, err: &CoreError) {
        let inner = self.inner.read();
        if let Some(cb) = inner.error_callback.as_ref() {
            cb(ErrorCode::from(err), &err.to_string());
        }
        log::error!("{err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_init_again_is_rejected() {
        let cfg = RuntimeConfig::new();
        cfg.init().unwrap();
        assert!(matches!(cfg.init(), Err(CoreError::AlreadyInitialized)));
    }

    #[test]
    fn shutdown_without_init_is_rejected() {
        let cfg = RuntimeConfig::new();
        assert!(matches!(cfg.shutdown(), Err(CoreError::NotInitialized)));
    }

    #[test]
    fn shutdown_clears_error_callback() {
        let cfg = RuntimeConfig::new();
        cfg.init().unwrap();
        cfg.set_error_callback(Box::new(|_, _| {}));
        cfg.shutdown().unwrap();
        assert!(cfg.inner.read().error_callback.is_none());
    }

    #[test]
    fn reinit_after_shutdown_succeeds() {
        let cfg = RuntimeConfig::new();
        cfg.init().unwrap();
        cfg.shutdown().unwrap();
        cfg.init().unwrap();
    }
}
