//! Release-on-drop guard for pressed input.
//!
//! Backend calls are bounded by a timeout in the dispatcher, which drops the
//! call future when it expires. A held key must still be released, so every
//! press that spans an await is covered by a [`ReleaseGuard`].

/// Runs `release` when dropped unless [`ReleaseGuard::disarm`] was called.
pub struct ReleaseGuard<F: FnOnce()> {
    /// Pending release; `None` once disarmed or fired.
    release: Option<F>,
}

impl<F: FnOnce()> ReleaseGuard<F> {
    /// Arm a guard.
    pub fn new(release: F) -> Self {
        Self {
            release: Some(release),
        }
    }

    /// Drop without releasing; the caller releases on the normal path.
    pub fn disarm(mut self) {
        self.release = None;
    }
}

impl<F: FnOnce()> Drop for ReleaseGuard<F> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
