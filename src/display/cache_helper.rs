//! Change detection for display objects.

/// Remembers the last state a primitive was built from.
///
/// [`update_state`](Self::update_state) reports whether the state differs
/// from the remembered one, so that buffers are only refilled when their
/// inputs changed.
#[derive(Clone, Debug, Default)]
pub struct CacheHelper<S> {
    state: Option<S>,
}

impl<S: PartialEq + Clone> CacheHelper<S> {
    pub fn new() -> Self {
        CacheHelper { state: None }
    }

    /// Stores `state` and returns `true` if it differs from the stored one.
    /// The first call always returns `true`.
    pub fn update_state(&mut self, state: S) -> bool {
        if self.state.as_ref() == Some(&state) {
            return false;
        }
        self.state = Some(state);
        true
    }

    /// Forgets the stored state; the next update reports a change.
    pub fn invalidate(&mut self) {
        self.state = None;
    }

    #[inline]
    pub fn state(&self) -> Option<&S> {
        self.state.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_only_changes() {
        let mut cache = CacheHelper::new();
        assert!(cache.update_state((1u64, 0.5f32)));
        assert!(!cache.update_state((1, 0.5)));
        assert!(cache.update_state((2, 0.5)));
        assert!(!cache.update_state((2, 0.5)));
        cache.invalidate();
        assert!(cache.update_state((2, 0.5)));
    }
}
