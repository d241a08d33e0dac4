//! Cue controller - ties buttons, LEDs, displays, persistence, and the
//! network fan-out together around the registry
//!
//! All mutation flows through this type: the periodic control-loop tick
//! (debounce sampling, auto-clear, housekeeping) and the request dispatcher
//! both call into it while holding the same lock, so every
//! mutate-and-broadcast sequence completes before the next one starts.
//!
//! Timestamps are injected by the caller, never read here, which keeps the
//! whole state machine deterministic under test.

use tracing::{debug, info, warn};

use crate::debounce::{Debouncer, Edge, Level};
use crate::hw::{ButtonBank, DisplayBank, LedBank};
use crate::wrap::wrap_text;

use super::events::CueBroadcaster;
use super::persistence::{cue_key, KvStore};
use super::registry::{CueRegistry, CueState};
use std::sync::Arc;

/// How long a triggered cue stays lit.
pub const DEFAULT_ACTIVE_DURATION_MS: u64 = 5_000;
/// Contact-bounce window for the cue buttons.
pub const DEFAULT_DEBOUNCE_MS: u64 = 40;
/// Minimum spacing between two broadcast housekeeping passes.
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 10_000;

/// Timing and geometry knobs for the control loop.
#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub active_duration_ms: u64,
    pub debounce_ms: u64,
    pub cleanup_interval_ms: u64,
    /// Pin level that counts as "button pressed".
    pub active_level: Level,
    pub screen_width_px: u32,
    pub screen_height_px: u32,
    pub line_height_px: u32,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            active_duration_ms: DEFAULT_ACTIVE_DURATION_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            active_level: Level::Low,
            screen_width_px: 128,
            screen_height_px: 64,
            line_height_px: 8,
        }
    }
}

/// Owns the registry and drives every collaborator.
pub struct CueController {
    registry: CueRegistry,
    debouncers: Vec<Option<Debouncer>>,
    leds: Box<dyn LedBank>,
    buttons: Box<dyn ButtonBank>,
    displays: Box<dyn DisplayBank>,
    store: Option<Arc<dyn KvStore>>,
    broadcaster: CueBroadcaster,
    settings: ControlSettings,
    last_cleanup_ms: u64,
}

impl CueController {
    pub fn new(
        registry: CueRegistry,
        settings: ControlSettings,
        leds: Box<dyn LedBank>,
        buttons: Box<dyn ButtonBank>,
        displays: Box<dyn DisplayBank>,
        store: Option<Arc<dyn KvStore>>,
        broadcaster: CueBroadcaster,
    ) -> Self {
        let debouncers = (0..registry.len()).map(|_| None).collect();
        Self {
            registry,
            debouncers,
            leds,
            buttons,
            displays,
            store,
            broadcaster,
            settings,
            last_cleanup_ms: 0,
        }
    }

    /// Bring every channel to its startup state: LED off, text loaded from
    /// the store (compiled default when absent), debouncer seeded from the
    /// pin's current level, initial render pushed.
    pub fn initialize(&mut self) {
        for index in 0..self.registry.len() {
            self.leds.set(index, false);

            let default_text = self
                .registry
                .default_text(index)
                .unwrap_or_default()
                .to_string();
            let raw = match &self.store {
                Some(store) => store.load(&cue_key(index)).unwrap_or(default_text),
                None => default_text,
            };
            let sanitized = self.registry.sanitize(index, &raw);
            self.registry.set_text(index, sanitized);

            // Seeding from the current level means the boot reading can
            // never count as a press.
            self.debouncers[index] = self.buttons.read(index).map(|level| {
                Debouncer::new(level, self.settings.active_level, self.settings.debounce_ms)
            });

            self.render(index);
        }
        info!("🎭 {} cue channels initialized", self.registry.len());
    }

    /// Activate a cue for the configured duration. Out of range is a no-op.
    pub fn trigger(&mut self, index: usize, now_ms: u64) {
        if index >= self.registry.len() {
            return;
        }

        // Re-apply the current text (refreshes the display, no persistence).
        let current = self.registry.text(index).unwrap_or_default().to_string();
        self.set_text(index, &current, false);

        self.registry.activate(index, now_ms);
        self.leds.set(index, true);
        self.render(index);
        self.broadcast_state(index);
        info!("🔴 Cue {} triggered", index);
    }

    /// Update a cue's label. Sanitizes, optionally persists, and broadcasts
    /// only when the text actually changed. Never touches the active window.
    pub fn set_text(&mut self, index: usize, raw: &str, persist: bool) {
        if index >= self.registry.len() {
            return;
        }

        let sanitized = self.registry.sanitize(index, raw);
        if self.registry.text(index) == Some(sanitized.as_str()) {
            if persist {
                self.persist_text(index);
            }
            return;
        }

        self.registry.set_text(index, sanitized);
        if persist {
            self.persist_text(index);
        }
        self.render(index);
        self.broadcast_state(index);
    }

    /// One control-loop iteration: expire active windows, sample buttons,
    /// run periodic housekeeping.
    pub fn tick(&mut self, now_ms: u64) {
        for index in 0..self.registry.len() {
            if self
                .registry
                .expired(index, now_ms, self.settings.active_duration_ms)
            {
                self.registry.clear(index);
                self.leds.set(index, false);
                self.broadcast_state(index);
                debug!(cue = index, "active window elapsed");
            }
        }

        let mut pressed = Vec::new();
        for (index, slot) in self.debouncers.iter_mut().enumerate() {
            let Some(debouncer) = slot.as_mut() else {
                continue;
            };
            let Some(raw) = self.buttons.read(index) else {
                continue;
            };
            if debouncer.sample(now_ms, raw) == Some(Edge::Pressed) {
                pressed.push(index);
            }
        }
        for index in pressed {
            info!("🔘 Button {} pressed", index);
            self.trigger(index, now_ms);
        }

        if now_ms.saturating_sub(self.last_cleanup_ms) >= self.settings.cleanup_interval_ms {
            self.broadcaster.cleanup(now_ms);
            self.last_cleanup_ms = now_ms;
        }
    }

    /// Point-in-time state of every channel.
    pub fn snapshot(&self) -> Vec<CueState> {
        (0..self.registry.len())
            .filter_map(|index| self.cue_state(index))
            .collect()
    }

    /// State of one channel, as sent over the wire.
    pub fn cue_state(&self, index: usize) -> Option<CueState> {
        let text = self.registry.text(index)?;
        Some(CueState {
            index,
            text: text.to_string(),
            active: self.registry.is_active(index),
            display_ready: self.displays.is_ready(index),
        })
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.registry.is_active(index)
    }

    pub fn cue_count(&self) -> usize {
        self.registry.len()
    }

    fn render(&mut self, index: usize) {
        if !self.displays.is_ready(index) {
            warn!("⚠️  Display {} unavailable, skipping render", index);
            return;
        }

        let text = self.registry.text(index).unwrap_or_default();
        let displays = &self.displays;
        let lines = wrap_text(
            text,
            self.settings.screen_width_px,
            self.settings.line_height_px,
            self.settings.screen_height_px,
            |s| displays.measure(index, s),
        );
        if let Err(e) = self.displays.draw(index, &lines) {
            warn!("⚠️  Display {} render failed: {}", index, e);
        }
    }

    fn broadcast_state(&self, index: usize) {
        if let Some(state) = self.cue_state(index) {
            self.broadcaster.publish(state);
        }
    }

    fn persist_text(&self, index: usize) {
        let Some(store) = &self.store else {
            debug!(cue = index, "no store configured, text not persisted");
            return;
        };
        let Some(text) = self.registry.text(index) else {
            return;
        };
        if !store.save(&cue_key(index), text) {
            warn!("⚠️  Failed to persist text for cue {}", index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    const DEFAULTS: [&str; 3] = ["Cue 1", "Cue 2", "Cue 3"];

    #[derive(Clone, Default)]
    struct RecordingLeds {
        events: Arc<Mutex<Vec<(usize, bool)>>>,
    }

    impl LedBank for RecordingLeds {
        fn set(&mut self, index: usize, on: bool) {
            self.events.lock().push((index, on));
        }
    }

    #[derive(Clone)]
    struct ScriptedButtons {
        levels: Arc<Mutex<Vec<Option<Level>>>>,
    }

    impl ScriptedButtons {
        fn unwired() -> Self {
            Self {
                levels: Arc::new(Mutex::new(vec![None; DEFAULTS.len()])),
            }
        }

        fn all_idle() -> Self {
            Self {
                levels: Arc::new(Mutex::new(vec![Some(Level::High); DEFAULTS.len()])),
            }
        }

        fn set(&self, index: usize, level: Level) {
            self.levels.lock()[index] = Some(level);
        }
    }

    impl ButtonBank for ScriptedButtons {
        fn read(&mut self, index: usize) -> Option<Level> {
            self.levels.lock().get(index).copied().flatten()
        }
    }

    #[derive(Clone)]
    struct RecordingDisplays {
        ready: Vec<bool>,
        draws: Arc<Mutex<Vec<(usize, Vec<String>)>>>,
    }

    impl RecordingDisplays {
        fn new(ready: Vec<bool>) -> Self {
            Self {
                ready,
                draws: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl DisplayBank for RecordingDisplays {
        fn is_ready(&self, index: usize) -> bool {
            self.ready.get(index).copied().unwrap_or(false)
        }

        fn measure(&self, _index: usize, text: &str) -> u32 {
            text.chars().count() as u32 * 6
        }

        fn draw(&mut self, index: usize, lines: &[String]) -> anyhow::Result<()> {
            self.draws.lock().push((index, lines.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        map: Mutex<HashMap<String, String>>,
        fail_writes: bool,
    }

    impl MemoryStore {
        fn with_entries(entries: &[(&str, &str)]) -> Self {
            let map = entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Self {
                map: Mutex::new(map),
                fail_writes: false,
            }
        }

        fn failing() -> Self {
            Self {
                map: Mutex::new(HashMap::new()),
                fail_writes: true,
            }
        }

        fn get(&self, key: &str) -> Option<String> {
            self.map.lock().get(key).cloned()
        }
    }

    impl KvStore for MemoryStore {
        fn load(&self, key: &str) -> Option<String> {
            self.map.lock().get(key).cloned()
        }

        fn save(&self, key: &str, value: &str) -> bool {
            if self.fail_writes {
                return false;
            }
            self.map.lock().insert(key.to_string(), value.to_string());
            true
        }

        fn remove(&self, key: &str) -> bool {
            self.map.lock().remove(key);
            !self.fail_writes
        }
    }

    struct Harness {
        controller: CueController,
        leds: RecordingLeds,
        buttons: ScriptedButtons,
        displays: RecordingDisplays,
        broadcaster: CueBroadcaster,
    }

    fn make_harness(
        store: Option<Arc<dyn KvStore>>,
        ready: Vec<bool>,
        buttons: ScriptedButtons,
    ) -> Harness {
        let registry = CueRegistry::new(DEFAULTS.iter().map(|s| s.to_string()).collect(), 64);
        let leds = RecordingLeds::default();
        let displays = RecordingDisplays::new(ready);
        let broadcaster = CueBroadcaster::new();
        let controller = CueController::new(
            registry,
            ControlSettings::default(),
            Box::new(leds.clone()),
            Box::new(buttons.clone()),
            Box::new(displays.clone()),
            store,
            broadcaster.clone(),
        );
        Harness {
            controller,
            leds,
            buttons,
            displays,
            broadcaster,
        }
    }

    fn default_harness() -> Harness {
        make_harness(None, vec![true; 3], ScriptedButtons::unwired())
    }

    #[test]
    fn initialize_uses_defaults_without_store() {
        let mut h = default_harness();
        h.controller.initialize();

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.len(), 3);
        for (i, state) in snapshot.iter().enumerate() {
            assert_eq!(state.index, i);
            assert_eq!(state.text, DEFAULTS[i]);
            assert!(!state.active);
            assert!(state.display_ready);
        }
        // All LEDs driven low, one render per channel.
        assert_eq!(*h.leds.events.lock(), vec![(0, false), (1, false), (2, false)]);
        assert_eq!(h.displays.draws.lock().len(), 3);
    }

    #[test]
    fn initialize_prefers_persisted_text() {
        let store = Arc::new(MemoryStore::with_entries(&[("cue0", "  Places please  ")]));
        let mut h = make_harness(Some(store), vec![true; 3], ScriptedButtons::unwired());
        h.controller.initialize();

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot[0].text, "Places please"); // sanitized on load
        assert_eq!(snapshot[1].text, "Cue 2");
    }

    #[test]
    fn trigger_activates_lights_renders_and_broadcasts() {
        let mut h = default_harness();
        h.controller.initialize();
        let (_guard, mut rx) = h.broadcaster.subscribe(0);
        h.leds.events.lock().clear();
        h.displays.draws.lock().clear();

        h.controller.trigger(1, 1_000);

        assert!(h.controller.is_active(1));
        assert_eq!(*h.leds.events.lock(), vec![(1, true)]);
        assert!(!h.displays.draws.lock().is_empty());

        let event = rx.try_recv().unwrap();
        assert_eq!(event.index, 1);
        assert!(event.active);
        assert_eq!(event.text, "Cue 2");
        assert!(event.display_ready);
    }

    #[test]
    fn trigger_out_of_range_is_silent() {
        let mut h = default_harness();
        h.controller.initialize();
        let (_guard, mut rx) = h.broadcaster.subscribe(0);
        h.leds.events.lock().clear();

        h.controller.trigger(3, 1_000);

        assert!(rx.try_recv().is_err());
        assert!(h.leds.events.lock().is_empty());
    }

    #[test]
    fn active_window_clears_on_tick_after_duration() {
        let mut h = default_harness();
        h.controller.initialize();
        h.controller.trigger(0, 1_000);
        let (_guard, mut rx) = h.broadcaster.subscribe(0);
        h.leds.events.lock().clear();

        h.controller.tick(5_999);
        assert!(h.controller.is_active(0));
        assert!(rx.try_recv().is_err());

        h.controller.tick(6_000);
        assert!(!h.controller.is_active(0));
        assert_eq!(*h.leds.events.lock(), vec![(0, false)]);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.index, 0);
        assert!(!event.active);
    }

    #[test]
    fn set_text_sanitizes_and_broadcasts_once() {
        let mut h = default_harness();
        h.controller.initialize();
        let (_guard, mut rx) = h.broadcaster.subscribe(0);

        h.controller.set_text(0, "  Blackout  ", false);
        assert_eq!(h.controller.cue_state(0).unwrap().text, "Blackout");
        assert!(rx.try_recv().is_ok());

        // Same text again: idempotent, no second broadcast.
        h.controller.set_text(0, "Blackout", false);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn set_text_whitespace_resets_to_default() {
        let mut h = default_harness();
        h.controller.initialize();
        h.controller.set_text(0, "Blackout", false);

        h.controller.set_text(0, "   ", false);
        assert_eq!(h.controller.cue_state(0).unwrap().text, "Cue 1");
    }

    #[test]
    fn set_text_persists_when_asked() {
        let store = Arc::new(MemoryStore::default());
        let mut h = make_harness(Some(store.clone()), vec![true; 3], ScriptedButtons::unwired());
        h.controller.initialize();

        h.controller.set_text(2, "House half", false);
        assert_eq!(store.get("cue2"), None);

        h.controller.set_text(2, "House out", true);
        assert_eq!(store.get("cue2"), Some("House out".to_string()));

        // Unchanged text with persist still writes through.
        h.controller.set_text(2, "House out", true);
        assert_eq!(store.get("cue2"), Some("House out".to_string()));
    }

    #[test]
    fn store_write_failure_is_not_fatal() {
        let store = Arc::new(MemoryStore::failing());
        let mut h = make_harness(Some(store), vec![true; 3], ScriptedButtons::unwired());
        h.controller.initialize();

        h.controller.set_text(0, "Blackout", true);
        assert_eq!(h.controller.cue_state(0).unwrap().text, "Blackout");
    }

    #[test]
    fn trigger_does_not_persist_current_text() {
        let store = Arc::new(MemoryStore::default());
        let mut h = make_harness(Some(store.clone()), vec![true; 3], ScriptedButtons::unwired());
        h.controller.initialize();

        h.controller.trigger(0, 1_000);
        assert_eq!(store.get("cue0"), None);
    }

    #[test]
    fn set_text_during_active_window_keeps_the_timer() {
        let mut h = default_harness();
        h.controller.initialize();

        h.controller.trigger(0, 1_000);
        h.controller.set_text(0, "Changed", false);
        assert!(h.controller.is_active(0));

        // The window still expires relative to the original trigger.
        h.controller.tick(5_999);
        assert!(h.controller.is_active(0));
        h.controller.tick(6_000);
        assert!(!h.controller.is_active(0));
        assert_eq!(h.controller.cue_state(0).unwrap().text, "Changed");
    }

    #[test]
    fn debounced_button_press_triggers_cue() {
        let buttons = ScriptedButtons::all_idle();
        let mut h = make_harness(None, vec![true; 3], buttons.clone());
        h.controller.initialize();

        buttons.set(1, Level::Low);
        h.controller.tick(1_000); // raw change observed, window restarts
        assert!(!h.controller.is_active(1));
        h.controller.tick(1_020);
        assert!(!h.controller.is_active(1));
        h.controller.tick(1_040); // held for the full debounce window
        assert!(h.controller.is_active(1));

        // Holding the button produces no second trigger.
        let triggered_at = 1_040;
        h.controller.tick(triggered_at + 100);
        assert!(h.controller.is_active(1));
    }

    #[test]
    fn bouncing_button_never_triggers() {
        let buttons = ScriptedButtons::all_idle();
        let mut h = make_harness(None, vec![true; 3], buttons.clone());
        h.controller.initialize();

        let mut now = 1_000;
        for _ in 0..20 {
            buttons.set(0, Level::Low);
            h.controller.tick(now);
            now += 10;
            buttons.set(0, Level::High);
            h.controller.tick(now);
            now += 10;
        }
        assert!(!h.controller.is_active(0));
    }

    #[test]
    fn unwired_buttons_are_never_sampled() {
        let mut h = default_harness();
        h.controller.initialize();

        for now in (0..10_000).step_by(10) {
            h.controller.tick(now);
        }
        assert!((0..3).all(|i| !h.controller.is_active(i)));
    }

    #[test]
    fn unready_display_skips_render_and_surfaces_flag() {
        let mut h = make_harness(None, vec![true, false, true], ScriptedButtons::unwired());
        h.controller.initialize();

        // Initial render happened for channels 0 and 2 only.
        let drawn: Vec<usize> = h.displays.draws.lock().iter().map(|(i, _)| *i).collect();
        assert_eq!(drawn, vec![0, 2]);

        let snapshot = h.controller.snapshot();
        assert!(snapshot[0].display_ready);
        assert!(!snapshot[1].display_ready);

        // Triggering still works and still broadcasts the readiness flag.
        let (_guard, mut rx) = h.broadcaster.subscribe(0);
        h.controller.trigger(1, 500);
        let event = rx.try_recv().unwrap();
        assert!(event.active);
        assert!(!event.display_ready);
    }

    #[test]
    fn long_text_is_wrapped_for_the_display() {
        let mut h = default_harness();
        h.controller.initialize();
        h.displays.draws.lock().clear();

        h.controller.set_text(0, "abcdefghij abcdefghij abcdefghij", false);
        let draws = h.displays.draws.lock();
        let (_, lines) = draws.last().unwrap();
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.chars().count() <= 21));
    }

    #[test]
    fn housekeeping_runs_at_the_cleanup_interval() {
        let mut h = default_harness();
        h.controller.initialize();

        let (guard, _rx) = h.broadcaster.subscribe(0);
        drop(guard);
        assert_eq!(h.broadcaster.client_count(), 1);

        h.controller.tick(5_000); // below the interval: nothing pruned
        assert_eq!(h.broadcaster.client_count(), 1);

        h.controller.tick(10_000);
        assert_eq!(h.broadcaster.client_count(), 0);
    }

    #[test]
    fn snapshot_matches_live_state() {
        let mut h = default_harness();
        h.controller.initialize();
        h.controller.trigger(2, 100);
        h.controller.set_text(0, "Standby", false);

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].text, "Standby");
        assert!(!snapshot[0].active);
        assert!(snapshot[2].active);
        assert_eq!(snapshot[2].text, "Cue 3");
    }
}
