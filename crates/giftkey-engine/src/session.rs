use std::sync::Arc;

use config::{Mapping, Settings};
use giftkey_protocol::{InjectionMode, MappingSpec};
use parking_lot::Mutex;

/// Mutable per-session state shared by the engine and the dispatcher.
#[derive(Debug, Clone)]
pub struct Session {
    /// Mapping as last received, echoed back to observers.
    pub spec: MappingSpec,
    /// Resolved mapping used for dispatch.
    pub mapping: Arc<Mapping>,
    /// Global pause flag.
    pub paused: bool,
    /// Active backend and press strategy.
    pub injection_mode: InjectionMode,
    /// Global stacking switch.
    pub stacking_enabled: bool,
    /// Focus-guard keyword; empty disables the guard.
    pub target_window_keyword: String,
}

impl Session {
    /// Initial state from runtime settings, with an empty mapping.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            spec: MappingSpec::new(),
            mapping: Arc::new(Mapping::default()),
            paused: false,
            injection_mode: settings.injection_mode,
            stacking_enabled: settings.stacking_enabled,
            target_window_keyword: settings.target_window_keyword.clone(),
        }
    }

    /// Replace the mapping wholesale. Invalid entries are skipped.
    pub fn replace_mapping(&mut self, spec: MappingSpec) {
        self.mapping = Arc::new(Mapping::from_spec(&spec));
        self.spec = spec;
    }
}

/// Shared handle to the session.
pub type SharedSession = Arc<Mutex<Session>>;
