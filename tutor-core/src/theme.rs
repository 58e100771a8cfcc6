//! Theme resolution against the system color-scheme preference
//!
//! `dark` and `light` apply directly. `auto` resolves from the current system
//! preference and keeps a live subscription so later system changes re-apply; the
//! subscription is released as soon as the theme leaves `auto` or the controller
//! is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::types::Theme;

/// Concrete presentation applied to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Appearance {
    Dark,
    Light,
}

impl Appearance {
    fn from_prefers_dark(prefers_dark: bool) -> Self {
        if prefers_dark { Self::Dark } else { Self::Light }
    }
}

/// The presentation surface that a resolved appearance is pushed to
pub trait AppearanceSink: Send + Sync {
    fn apply(&self, appearance: Appearance);
}

/// Callback invoked with the new "prefers dark" value
pub type PreferenceListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Source of the operating system's color-scheme preference
pub trait SystemPreference: Send + Sync {
    fn prefers_dark(&self) -> bool;

    /// Register for changes; dropping the returned subscription unregisters
    fn subscribe(&self, listener: PreferenceListener) -> Subscription;
}

/// Live registration with a `SystemPreference`, released on drop
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Resolve a theme preference to the appearance to show right now
pub fn resolve(theme: Theme, system: &dyn SystemPreference) -> Appearance {
    match theme {
        Theme::Dark => Appearance::Dark,
        Theme::Light => Appearance::Light,
        Theme::Auto => Appearance::from_prefers_dark(system.prefers_dark()),
    }
}

/// Applies theme preferences and owns the `auto` subscription
pub struct ThemeController {
    sink: Arc<dyn AppearanceSink>,
    system: Arc<dyn SystemPreference>,
    subscription: Mutex<Option<Subscription>>,
}

impl ThemeController {
    pub fn new(sink: Arc<dyn AppearanceSink>, system: Arc<dyn SystemPreference>) -> Self {
        Self {
            sink,
            system,
            subscription: Mutex::new(None),
        }
    }

    pub fn apply(&self, theme: Theme) {
        let mut subscription = self.subscription.lock();
        // release before resubscribing so at most one listener is ever live
        subscription.take();

        self.sink.apply(resolve(theme, self.system.as_ref()));
        debug!("Applied theme {:?}", theme);

        if theme == Theme::Auto {
            let sink = Arc::clone(&self.sink);
            *subscription = Some(self.system.subscribe(Arc::new(move |prefers_dark| {
                sink.apply(Appearance::from_prefers_dark(prefers_dark));
            })));
        }
    }

    pub fn is_following_system(&self) -> bool {
        self.subscription.lock().is_some()
    }
}

/// System preference whose value is pushed in by the host
#[derive(Clone, Default)]
pub struct ManualSystemPreference {
    state: Arc<PreferenceState>,
}

#[derive(Default)]
struct PreferenceState {
    prefers_dark: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, PreferenceListener)>>,
}

impl ManualSystemPreference {
    pub fn new(prefers_dark: bool) -> Self {
        let preference = Self::default();
        preference
            .state
            .prefers_dark
            .store(prefers_dark, Ordering::SeqCst);
        preference
    }

    /// Change the preference and notify every live listener
    pub fn set(&self, prefers_dark: bool) {
        self.state.prefers_dark.store(prefers_dark, Ordering::SeqCst);
        let listeners: Vec<PreferenceListener> = self
            .state
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(prefers_dark);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.lock().len()
    }
}

impl SystemPreference for ManualSystemPreference {
    fn prefers_dark(&self) -> bool {
        self.state.prefers_dark.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: PreferenceListener) -> Subscription {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.listeners.lock().push((id, listener));

        let state = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                state.listeners.lock().retain(|(other, _)| *other != id);
            }
        })
    }
}
