//! Speech playback over a single exclusive synthesis engine
//!
//! The controller is a small state machine over `Idle`, `Speaking` and `Paused`.
//! At most one utterance is ever active: `speak` always cancels whatever is playing,
//! waits a short debounce so the engine can release its previous session, then
//! starts the new utterance. A `speak` superseded during its debounce (by another
//! `speak` or a `stop`) never starts. Once closed, the controller refuses new work.
//!
//! Engines report completion asynchronously through a channel; events for an
//! utterance that is no longer current are ignored.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::settings::SettingsStore;
use crate::voices::{SPANISH, Voice, select_voice};

pub type UtteranceId = u64;

/// Pitch every utterance is spoken at
pub const DEFAULT_PITCH: f32 = 0.9;

pub const DEFAULT_RATE: f32 = 1.0;
pub const MIN_RATE: f32 = 0.1;
pub const MAX_RATE: f32 = 10.0;

/// Delay between cancelling the previous utterance and starting the next
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Speaking,
    Paused,
}

/// A request handed to the engine
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    /// `None` lets the engine pick its default voice for `lang`
    pub voice: Option<Voice>,
    pub lang: String,
    pub rate: f32,
    pub pitch: f32,
}

/// Reported by the engine when an utterance ends on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Finished(UtteranceId),
    Failed(UtteranceId, String),
}

impl SpeechEvent {
    fn id(&self) -> UtteranceId {
        match self {
            Self::Finished(id) | Self::Failed(id, _) => *id,
        }
    }
}

/// The platform speech synthesizer
///
/// Calls must return promptly; playback itself runs in the engine and its outcome
/// is reported through `events`. A cancelled utterance need not report anything.
pub trait SpeechEngine: Send + Sync {
    fn voices(&self) -> Vec<Voice>;

    fn speak(&self, utterance: Utterance, events: mpsc::UnboundedSender<SpeechEvent>)
    -> Result<()>;

    fn pause(&self);

    fn resume(&self);

    /// Stop and discard any queued or playing utterance
    fn cancel(&self);
}

struct Playback {
    state: PlaybackState,
    rate: f32,
    /// Bumped on every cancel; a pending `speak` only starts if it still matches
    generation: UtteranceId,
    current: Option<(UtteranceId, String)>,
    closed: bool,
}

impl Playback {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Speech("playback controller is closed".to_string()));
        }
        Ok(())
    }
}

struct Shared {
    engine: Arc<dyn SpeechEngine>,
    settings: Arc<SettingsStore>,
    debounce: Duration,
    events: mpsc::UnboundedSender<SpeechEvent>,
    playback: Mutex<Playback>,
}

impl Shared {
    /// Cancel whatever is playing or pending and return the new generation
    fn interrupt(&self) -> UtteranceId {
        let mut playback = self.playback.lock();
        self.engine.cancel();
        playback.generation += 1;
        playback.state = PlaybackState::Idle;
        playback.current = None;
        playback.generation
    }

    fn on_event(&self, event: SpeechEvent) {
        let mut playback = self.playback.lock();
        if playback.current.as_ref().map(|(id, _)| *id) != Some(event.id()) {
            debug!("Ignoring event for stale utterance {}", event.id());
            return;
        }

        match &event {
            SpeechEvent::Finished(id) => debug!("Utterance {} finished", id),
            SpeechEvent::Failed(id, message) => warn!("Utterance {} failed: {}", id, message),
        }
        playback.state = PlaybackState::Idle;
        playback.current = None;
    }
}

/// Owns the speech engine session for the app
///
/// Must be created inside a tokio runtime; engine events are processed on a
/// background task until `close` or drop.
pub struct PlaybackController {
    shared: Arc<Shared>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackController {
    pub fn new(engine: Arc<dyn SpeechEngine>, settings: Arc<SettingsStore>) -> Self {
        Self::with_debounce(engine, settings, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(
        engine: Arc<dyn SpeechEngine>,
        settings: Arc<SettingsStore>,
        debounce: Duration,
    ) -> Self {
        let (events, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            engine,
            settings,
            debounce,
            events,
            playback: Mutex::new(Playback {
                state: PlaybackState::Idle,
                rate: DEFAULT_RATE,
                generation: 0,
                current: None,
                closed: false,
            }),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let event_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match weak.upgrade() {
                    Some(shared) => shared.on_event(event),
                    None => break,
                }
            }
        });

        Self {
            shared,
            event_task: Mutex::new(Some(event_task)),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.playback.lock().state
    }

    pub fn rate(&self) -> f32 {
        self.shared.playback.lock().rate
    }

    /// Text of the utterance currently speaking or paused
    pub fn current_text(&self) -> Option<String> {
        self.shared
            .playback
            .lock()
            .current
            .as_ref()
            .map(|(_, text)| text.clone())
    }

    /// Speak `text`, preempting anything already playing
    ///
    /// Does nothing when voice output is disabled in settings. Fails once the
    /// controller is closed.
    pub async fn speak(&self, text: impl Into<String>) -> Result<()> {
        self.shared.playback.lock().ensure_open()?;
        let text = text.into();
        let settings = self.shared.settings.current();
        if !settings.voice_enabled {
            debug!("Voice disabled, not speaking");
            return Ok(());
        }

        let generation = self.shared.interrupt();
        tokio::time::sleep(self.shared.debounce).await;

        let voices = self.shared.engine.voices();
        let voice = select_voice(&voices, settings.dialect).cloned();

        let mut playback = self.shared.playback.lock();
        playback.ensure_open()?;
        if playback.generation != generation {
            debug!("Utterance {} superseded before it started", generation);
            return Ok(());
        }

        let utterance = Utterance {
            id: generation,
            text: text.clone(),
            voice,
            lang: SPANISH.to_string(),
            rate: playback.rate,
            pitch: DEFAULT_PITCH,
        };

        debug!(
            "Speaking utterance {} at rate {} with voice {:?}",
            generation,
            utterance.rate,
            utterance.voice.as_ref().map(|v| &v.name)
        );

        match self
            .shared
            .engine
            .speak(utterance, self.shared.events.clone())
        {
            Ok(()) => {
                playback.state = PlaybackState::Speaking;
                playback.current = Some((generation, text));
                Ok(())
            }
            Err(e) => {
                warn!("Speech engine rejected utterance {}: {}", generation, e);
                playback.state = PlaybackState::Idle;
                playback.current = None;
                Err(e)
            }
        }
    }

    /// Speaking -> Paused; no-op from any other state
    pub fn pause(&self) {
        let mut playback = self.shared.playback.lock();
        if playback.state == PlaybackState::Speaking {
            self.shared.engine.pause();
            playback.state = PlaybackState::Paused;
            debug!("Playback paused");
        }
    }

    /// Paused -> Speaking; no-op from any other state
    pub fn resume(&self) {
        let mut playback = self.shared.playback.lock();
        if playback.state == PlaybackState::Paused {
            self.shared.engine.resume();
            playback.state = PlaybackState::Speaking;
            debug!("Playback resumed");
        }
    }

    /// Stop playback from any state; always safe to call
    pub fn stop(&self) {
        self.shared.interrupt();
        debug!("Playback stopped");
    }

    /// Set the speaking rate, restarting the current utterance if one is speaking
    ///
    /// The engine cannot change rate mid-utterance, so a speaking utterance starts
    /// over from the beginning at the new rate.
    pub async fn change_speed(&self, rate: f32) -> Result<()> {
        if !rate.is_finite() {
            return Err(Error::Validation(format!("invalid speech rate {rate}")));
        }
        let rate = rate.clamp(MIN_RATE, MAX_RATE);

        let restart = {
            let mut playback = self.shared.playback.lock();
            playback.ensure_open()?;
            playback.rate = rate;
            match (&playback.state, &playback.current) {
                (PlaybackState::Speaking, Some((_, text))) => Some(text.clone()),
                _ => None,
            }
        };

        info!("Speech rate set to {}", rate);

        if let Some(text) = restart {
            self.stop();
            self.speak(text).await?;
        }
        Ok(())
    }

    /// Cancel playback and stop processing engine events
    ///
    /// Later `speak` and `change_speed` calls fail; `pause`, `resume` and `stop`
    /// become no-ops.
    pub fn close(&self) {
        self.shared.playback.lock().closed = true;
        self.shared.interrupt();
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
        info!("Playback controller closed");
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::settings::SettingsPatch;

    #[derive(Default)]
    struct EngineState {
        active: Option<Utterance>,
        spoken: Vec<Utterance>,
        overlapped: bool,
        paused: bool,
        events: Option<mpsc::UnboundedSender<SpeechEvent>>,
        fail_next: bool,
    }

    /// Records what the controller asks of the engine
    #[derive(Default)]
    pub(crate) struct FakeEngine {
        state: Mutex<EngineState>,
    }

    impl FakeEngine {
        pub fn spoken(&self) -> Vec<Utterance> {
            self.state.lock().spoken.clone()
        }

        pub fn active(&self) -> Option<Utterance> {
            self.state.lock().active.clone()
        }

        pub fn overlapped(&self) -> bool {
            self.state.lock().overlapped
        }

        fn fail_next(&self) {
            self.state.lock().fail_next = true;
        }

        /// Play the active utterance to the end
        pub fn finish(&self) {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if let (Some(utterance), Some(events)) = (state.active.take(), &state.events) {
                let _ = events.send(SpeechEvent::Finished(utterance.id));
            }
        }
    }

    impl SpeechEngine for FakeEngine {
        fn voices(&self) -> Vec<Voice> {
            vec![
                Voice::new("Monica", "es-ES"),
                Voice::new("Jorge", "es-ES"),
                Voice::new("Paulina", "es-MX"),
            ]
        }

        fn speak(
            &self,
            utterance: Utterance,
            events: mpsc::UnboundedSender<SpeechEvent>,
        ) -> Result<()> {
            let mut state = self.state.lock();
            if std::mem::take(&mut state.fail_next) {
                return Err(Error::Speech("synthesis unavailable".to_string()));
            }
            if state.active.is_some() {
                state.overlapped = true;
            }
            state.spoken.push(utterance.clone());
            state.active = Some(utterance);
            state.events = Some(events);
            Ok(())
        }

        fn pause(&self) {
            self.state.lock().paused = true;
        }

        fn resume(&self) {
            self.state.lock().paused = false;
        }

        fn cancel(&self) {
            let mut state = self.state.lock();
            state.active = None;
            state.paused = false;
        }
    }

    pub(crate) fn settings() -> Arc<SettingsStore> {
        Arc::new(SettingsStore::load(Arc::new(MemoryStore::new())).unwrap())
    }

    fn controller(engine: &Arc<FakeEngine>, settings: Arc<SettingsStore>) -> PlaybackController {
        PlaybackController::with_debounce(engine.clone(), settings, Duration::from_millis(5))
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_speak_uses_dialect_voice_and_defaults() {
        let engine = Arc::new(FakeEngine::default());
        let playback = controller(&engine, settings());

        playback.speak("Hola").await.unwrap();

        assert_eq!(playback.state(), PlaybackState::Speaking);
        let utterance = engine.active().unwrap();
        assert_eq!(utterance.text, "Hola");
        assert_eq!(utterance.lang, "es");
        assert_eq!(utterance.pitch, DEFAULT_PITCH);
        assert_eq!(utterance.rate, DEFAULT_RATE);
        assert_eq!(utterance.voice.unwrap().name, "Jorge");
    }

    #[tokio::test]
    async fn test_finish_returns_to_idle() {
        let engine = Arc::new(FakeEngine::default());
        let playback = controller(&engine, settings());

        playback.speak("Buenos días").await.unwrap();
        engine.finish();

        wait_for(|| playback.state() == PlaybackState::Idle).await;
        assert!(playback.current_text().is_none());
    }

    #[tokio::test]
    async fn test_pause_resume_are_guarded() {
        let engine = Arc::new(FakeEngine::default());
        let playback = controller(&engine, settings());

        playback.pause();
        assert_eq!(playback.state(), PlaybackState::Idle);
        playback.resume();
        assert_eq!(playback.state(), PlaybackState::Idle);

        playback.speak("Hola").await.unwrap();
        playback.resume();
        assert_eq!(playback.state(), PlaybackState::Speaking);
        playback.pause();
        assert_eq!(playback.state(), PlaybackState::Paused);
        assert!(engine.state.lock().paused);
        playback.pause();
        assert_eq!(playback.state(), PlaybackState::Paused);
        playback.resume();
        assert_eq!(playback.state(), PlaybackState::Speaking);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let engine = Arc::new(FakeEngine::default());
        let playback = controller(&engine, settings());

        playback.stop();
        playback.speak("Hola").await.unwrap();
        playback.pause();
        playback.stop();
        playback.stop();

        assert_eq!(playback.state(), PlaybackState::Idle);
        assert!(engine.active().is_none());
    }

    #[tokio::test]
    async fn test_change_speed_restarts_without_overlap() {
        let engine = Arc::new(FakeEngine::default());
        let playback = controller(&engine, settings());

        playback.speak("Hola").await.unwrap();
        playback.change_speed(2.0).await.unwrap();

        assert_eq!(playback.state(), PlaybackState::Speaking);
        assert_eq!(playback.rate(), 2.0);
        assert!(!engine.overlapped());

        let spoken = engine.spoken();
        assert_eq!(spoken.len(), 2);
        assert_eq!(spoken[1].text, "Hola");
        assert_eq!(spoken[1].rate, 2.0);
        assert_eq!(engine.active().unwrap().id, spoken[1].id);
    }

    #[tokio::test]
    async fn test_change_speed_while_idle_only_stores_rate() {
        let engine = Arc::new(FakeEngine::default());
        let playback = controller(&engine, settings());

        playback.change_speed(50.0).await.unwrap();
        assert_eq!(playback.rate(), MAX_RATE);
        assert_eq!(playback.state(), PlaybackState::Idle);
        assert!(engine.spoken().is_empty());
        assert!(playback.change_speed(f32::NAN).await.is_err());

        playback.speak("Adiós").await.unwrap();
        assert_eq!(engine.active().unwrap().rate, MAX_RATE);
    }

    #[tokio::test]
    async fn test_newer_speak_supersedes_pending_one() {
        let engine = Arc::new(FakeEngine::default());
        let playback = controller(&engine, settings());

        let (first, second) = tokio::join!(playback.speak("uno"), playback.speak("dos"));
        first.unwrap();
        second.unwrap();

        let spoken = engine.spoken();
        assert_eq!(spoken.len(), 1);
        assert_eq!(spoken[0].text, "dos");
        assert_eq!(playback.current_text().as_deref(), Some("dos"));
    }

    #[tokio::test]
    async fn test_stale_finish_is_ignored() {
        let engine = Arc::new(FakeEngine::default());
        let playback = controller(&engine, settings());

        playback.speak("uno").await.unwrap();
        let stale = engine.active().unwrap().id;
        playback.speak("dos").await.unwrap();

        playback.shared.events.send(SpeechEvent::Finished(stale)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(playback.state(), PlaybackState::Speaking);
        assert_eq!(playback.current_text().as_deref(), Some("dos"));
    }

    #[tokio::test]
    async fn test_disabled_voice_is_noop() {
        let engine = Arc::new(FakeEngine::default());
        let settings = settings();
        settings.update(SettingsPatch::voice_enabled(false)).unwrap();
        let playback = controller(&engine, settings);

        playback.speak("Hola").await.unwrap();
        assert_eq!(playback.state(), PlaybackState::Idle);
        assert!(engine.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_engine_error_leaves_idle() {
        let engine = Arc::new(FakeEngine::default());
        let playback = controller(&engine, settings());

        engine.fail_next();
        let err = playback.speak("Hola").await.unwrap_err();
        assert!(matches!(err, Error::Speech(_)));
        assert_eq!(playback.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_close_cancels_playback() {
        let engine = Arc::new(FakeEngine::default());
        let playback = controller(&engine, settings());

        playback.speak("Hola").await.unwrap();
        playback.close();
        assert_eq!(playback.state(), PlaybackState::Idle);
        assert!(engine.active().is_none());
    }

    #[tokio::test]
    async fn test_closed_controller_refuses_new_work() {
        let engine = Arc::new(FakeEngine::default());
        let playback = controller(&engine, settings());

        playback.close();
        assert!(matches!(playback.speak("Hola").await, Err(Error::Speech(_))));
        assert!(matches!(playback.change_speed(1.5).await, Err(Error::Speech(_))));
        playback.pause();
        playback.resume();

        assert_eq!(playback.state(), PlaybackState::Idle);
        assert_eq!(playback.rate(), DEFAULT_RATE);
        assert!(engine.spoken().is_empty());
        assert!(engine.active().is_none());
    }

    #[tokio::test]
    async fn test_close_during_debounce_prevents_start() {
        let engine = Arc::new(FakeEngine::default());
        let playback = Arc::new(PlaybackController::with_debounce(
            engine.clone(),
            settings(),
            Duration::from_millis(50),
        ));

        let pending = {
            let playback = Arc::clone(&playback);
            tokio::spawn(async move { playback.speak("Hola").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        playback.close();

        assert!(pending.await.unwrap().is_err());
        assert_eq!(playback.state(), PlaybackState::Idle);
        assert!(engine.spoken().is_empty());
    }
}
