pub mod playback;
pub mod synth;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::ChatError;

pub use playback::{AudioGuard, AudioOutput, AudioResource, CommandAudioOutput};
pub use synth::{HttpSynthesizer, SpeechSynthesizer};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// `Idle -> Requesting -> Playing -> Idle`, with failures going straight
/// back to `Idle` from either busy phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NarrationPhase {
    #[default]
    Idle,
    /// Synthesis request in flight.
    Requesting,
    /// Audio is rendering.
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NarrationState {
    pub muted: bool,
    pub phase: NarrationPhase,
    /// An audio resource is currently acquired and not yet released.
    pub audio_held: bool,
}

impl NarrationState {
    /// True while exactly one utterance is in flight.
    pub fn is_playing(&self) -> bool {
        self.phase != NarrationPhase::Idle
    }
}

#[derive(Debug, Clone)]
pub struct NarrationConfig {
    /// Bound on a single synthesis request.
    pub synthesis_timeout: Duration,
    /// Bound on a single playback; the audio is released when it elapses.
    pub playback_timeout: Duration,
    pub start_muted: bool,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            synthesis_timeout: Duration::from_millis(20_000),
            playback_timeout: Duration::from_millis(120_000),
            start_muted: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller handle
// ---------------------------------------------------------------------------

enum Command {
    Narrate(String),
    SetMuted(bool),
    ToggleMute,
    Snapshot(oneshot::Sender<NarrationState>),
    Shutdown(oneshot::Sender<()>),
}

enum UtteranceEvent {
    AudioAcquired(u64),
    PlaybackStarted(u64),
    Finished(u64, Result<(), ChatError>),
}

/// Speaks bot lines, at most one at a time.
///
/// Requests that arrive while muted or while another line is in flight are
/// dropped, never queued. All state lives in a background task; this handle
/// only sends it commands and reads published snapshots.
pub struct NarrationController {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<NarrationState>,
    task: JoinHandle<()>,
}

impl NarrationController {
    /// Start the narration task. Must be called inside a Tokio runtime.
    pub fn spawn(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        config: NarrationConfig,
    ) -> Self {
        let initial = NarrationState {
            muted: config.start_muted,
            ..NarrationState::default()
        };
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (publish, state) = watch::channel(initial);

        let narrator = Narrator {
            synthesizer,
            output,
            config,
            state: initial,
            publish,
            events: events_tx,
            next_id: 0,
            active: None,
        };
        let task = tokio::spawn(narrator.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            state,
            task,
        }
    }

    /// Fire-and-forget. May be dropped by the skip policy.
    pub fn narrate(&self, text: impl Into<String>) {
        self.send(Command::Narrate(text.into()));
    }

    /// Applies to future narrations only; a line already in flight keeps going.
    pub fn set_muted(&self, muted: bool) {
        self.send(Command::SetMuted(muted));
    }

    pub fn toggle_mute(&self) {
        self.send(Command::ToggleMute);
    }

    /// Latest published state. May lag commands that were just sent.
    pub fn state(&self) -> NarrationState {
        *self.state.borrow()
    }

    /// State after every previously sent command has been handled.
    pub async fn snapshot(&self) -> NarrationState {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx));
        rx.await.unwrap_or_else(|_| self.state())
    }

    pub async fn wait_until(&self, mut done: impl FnMut(&NarrationState) -> bool) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| done(s)).await;
    }

    pub async fn wait_idle(&self) {
        self.wait_until(|s| !s.is_playing()).await;
    }

    /// Stop the task. An utterance in flight is aborted and its audio
    /// released before this returns.
    pub async fn shutdown(self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx));
        let _ = rx.await;
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Narration task is gone; command ignored");
        }
    }
}

impl Drop for NarrationController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Narration task
// ---------------------------------------------------------------------------

struct Narrator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    config: NarrationConfig,
    state: NarrationState,
    publish: watch::Sender<NarrationState>,
    events: mpsc::UnboundedSender<UtteranceEvent>,
    next_id: u64,
    active: Option<(u64, JoinHandle<()>)>,
}

impl Narrator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<UtteranceEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.stop().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
        debug!("Narration task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Narrate(text) => self.start(text),
            Command::SetMuted(muted) => self.set_muted(muted),
            Command::ToggleMute => self.set_muted(!self.state.muted),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.state);
            }
            // Handled by the run loop.
            Command::Shutdown(_) => {}
        }
    }

    fn set_muted(&mut self, muted: bool) {
        if self.state.muted != muted {
            info!("Narration {}", if muted { "muted" } else { "unmuted" });
        }
        self.state.muted = muted;
        self.publish();
    }

    fn start(&mut self, text: String) {
        if self.state.muted {
            debug!("Muted; dropping narration \"{text}\"");
            return;
        }
        if self.state.is_playing() {
            debug!("Narration in flight; dropping \"{text}\"");
            return;
        }
        if text.trim().is_empty() {
            debug!("Nothing to narrate");
            return;
        }

        self.next_id += 1;
        let id = self.next_id;
        self.state.phase = NarrationPhase::Requesting;
        self.publish();
        debug!("Narration {id} requested: \"{text}\"");

        let utterance = Utterance {
            id,
            text,
            synthesizer: Arc::clone(&self.synthesizer),
            output: Arc::clone(&self.output),
            config: self.config.clone(),
            events: self.events.clone(),
        };
        self.active = Some((id, tokio::spawn(utterance.run())));
    }

    fn handle_event(&mut self, event: UtteranceEvent) {
        match event {
            UtteranceEvent::AudioAcquired(id) if self.is_active(id) => {
                self.state.audio_held = true;
                self.publish();
            }
            UtteranceEvent::PlaybackStarted(id) if self.is_active(id) => {
                debug!("Narration {id} playing");
                self.state.phase = NarrationPhase::Playing;
                self.publish();
            }
            UtteranceEvent::Finished(id, outcome) if self.is_active(id) => {
                match outcome {
                    Ok(()) => debug!("Narration {id} finished"),
                    Err(e) => warn!("Narration {id} aborted: {e}"),
                }
                self.active = None;
                self.state.phase = NarrationPhase::Idle;
                self.state.audio_held = false;
                self.publish();
            }
            _ => {}
        }
    }

    fn is_active(&self, id: u64) -> bool {
        matches!(self.active, Some((active, _)) if active == id)
    }

    async fn stop(&mut self) {
        if let Some((id, handle)) = self.active.take() {
            debug!("Aborting narration {id}");
            handle.abort();
            // Resolves once the task's future, and with it the audio guard,
            // has been dropped.
            let _ = handle.await;
        }
        self.state.phase = NarrationPhase::Idle;
        self.state.audio_held = false;
        self.publish();
    }

    fn publish(&self) {
        self.publish.send_replace(self.state);
    }
}

impl Drop for Narrator {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.active.take() {
            handle.abort();
        }
    }
}

/// One accepted narration: a single acquire/release pair of audio.
struct Utterance {
    id: u64,
    text: String,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    config: NarrationConfig,
    events: mpsc::UnboundedSender<UtteranceEvent>,
}

impl Utterance {
    async fn run(self) {
        let outcome = self.speak().await;
        let _ = self.events.send(UtteranceEvent::Finished(self.id, outcome));
    }

    async fn speak(&self) -> Result<(), ChatError> {
        let audio = timeout(
            self.config.synthesis_timeout,
            self.synthesizer.synthesize(&self.text),
        )
        .await
        .map_err(|_| {
            ChatError::SynthesisFailed(format!(
                "timed out after {:?}",
                self.config.synthesis_timeout
            ))
        })??;

        let mut audio = AudioGuard::new(self.output.acquire(audio).await?);
        let _ = self.events.send(UtteranceEvent::AudioAcquired(self.id));

        audio.play().await?;
        let _ = self.events.send(UtteranceEvent::PlaybackStarted(self.id));

        if timeout(self.config.playback_timeout, audio.ended())
            .await
            .is_err()
        {
            warn!(
                "Narration {} still playing after {:?}; releasing audio",
                self.id, self.config.playback_timeout
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSynth {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynth {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ChatError::SynthesisFailed("status=500".into()));
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    #[derive(Default)]
    struct Counters {
        active: AtomicUsize,
        max_active: AtomicUsize,
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    #[derive(Default)]
    struct FakeOutput {
        counters: Arc<Counters>,
        play_for: Duration,
        fail_play: bool,
    }

    #[async_trait]
    impl AudioOutput for FakeOutput {
        async fn acquire(&self, _audio: Vec<u8>) -> Result<Box<dyn AudioResource>, ChatError> {
            let c = &self.counters;
            c.acquired.fetch_add(1, Ordering::SeqCst);
            let now = c.active.fetch_add(1, Ordering::SeqCst) + 1;
            c.max_active.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(FakeResource {
                counters: Arc::clone(&self.counters),
                play_for: self.play_for,
                fail_play: self.fail_play,
            }))
        }
    }

    struct FakeResource {
        counters: Arc<Counters>,
        play_for: Duration,
        fail_play: bool,
    }

    #[async_trait]
    impl AudioResource for FakeResource {
        async fn play(&mut self) -> Result<(), ChatError> {
            if self.fail_play {
                return Err(ChatError::PlaybackFailed("autoplay blocked".into()));
            }
            Ok(())
        }

        async fn ended(&mut self) {
            tokio::time::sleep(self.play_for).await;
        }

        fn release(self: Box<Self>) {
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller(
        synth: FakeSynth,
        output: FakeOutput,
        config: NarrationConfig,
    ) -> (NarrationController, Arc<FakeSynth>, Arc<Counters>) {
        let synth = Arc::new(synth);
        let counters = Arc::clone(&output.counters);
        let narrator = NarrationController::spawn(synth.clone(), Arc::new(output), config);
        (narrator, synth, counters)
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_muted_narration_issues_no_request() {
        let (narrator, synth, counters) =
            controller(FakeSynth::default(), FakeOutput::default(), NarrationConfig::default());

        narrator.set_muted(true);
        narrator.narrate("Hello");
        let state = narrator.snapshot().await;

        assert!(state.muted);
        assert!(!state.is_playing());
        assert_eq!(count(&synth.calls), 0);
        assert_eq!(count(&counters.acquired), 0);
    }

    #[tokio::test]
    async fn test_start_muted_and_toggle() {
        let config = NarrationConfig {
            start_muted: true,
            ..NarrationConfig::default()
        };
        let (narrator, synth, _) = controller(FakeSynth::default(), FakeOutput::default(), config);
        assert!(narrator.state().muted);

        narrator.toggle_mute();
        narrator.narrate("Now audible");
        assert!(!narrator.snapshot().await.muted);
        narrator.wait_idle().await;
        assert_eq!(count(&synth.calls), 1);
    }

    #[tokio::test]
    async fn test_narration_completes_and_releases() {
        let output = FakeOutput {
            play_for: Duration::from_millis(20),
            ..FakeOutput::default()
        };
        let (narrator, synth, counters) =
            controller(FakeSynth::default(), output, NarrationConfig::default());

        narrator.narrate("Hello");
        assert!(narrator.snapshot().await.is_playing());
        narrator.wait_idle().await;

        let state = narrator.state();
        assert_eq!(state.phase, NarrationPhase::Idle);
        assert!(!state.audio_held);
        assert_eq!(count(&synth.calls), 1);
        assert_eq!(count(&counters.acquired), 1);
        assert_eq!(count(&counters.released), 1);
        assert_eq!(count(&counters.active), 0);
    }

    #[tokio::test]
    async fn test_busy_narrations_are_dropped() {
        let synth = FakeSynth {
            delay: Duration::from_millis(20),
            ..FakeSynth::default()
        };
        let output = FakeOutput {
            play_for: Duration::from_millis(150),
            ..FakeOutput::default()
        };
        let (narrator, synth, counters) = controller(synth, output, NarrationConfig::default());

        for i in 0..5 {
            narrator.narrate(format!("line {i}"));
        }
        narrator.snapshot().await;
        narrator.wait_until(|s| s.phase == NarrationPhase::Playing).await;
        narrator.narrate("while playing");
        narrator.snapshot().await;
        narrator.wait_idle().await;

        assert_eq!(count(&synth.calls), 1);
        assert_eq!(count(&counters.max_active), 1);
        assert_eq!(count(&counters.active), 0);

        // Idle again, so the next line is accepted.
        narrator.narrate("after");
        narrator.snapshot().await;
        narrator.wait_idle().await;
        assert_eq!(count(&synth.calls), 2);
        assert_eq!(count(&counters.max_active), 1);
        assert_eq!(count(&counters.released), 2);
    }

    #[tokio::test]
    async fn test_synthesis_failure_resets() {
        let synth = FakeSynth {
            fail: true,
            ..FakeSynth::default()
        };
        let (narrator, synth, counters) =
            controller(synth, FakeOutput::default(), NarrationConfig::default());

        narrator.narrate("Hello");
        narrator.snapshot().await;
        narrator.wait_idle().await;

        assert_eq!(count(&synth.calls), 1);
        assert_eq!(count(&counters.acquired), 0);
        assert!(!narrator.state().is_playing());
    }

    #[tokio::test]
    async fn test_synthesis_timeout_resets() {
        let synth = FakeSynth {
            delay: Duration::from_secs(30),
            ..FakeSynth::default()
        };
        let config = NarrationConfig {
            synthesis_timeout: Duration::from_millis(30),
            ..NarrationConfig::default()
        };
        let (narrator, _, counters) = controller(synth, FakeOutput::default(), config);

        narrator.narrate("Hello");
        narrator.snapshot().await;
        narrator.wait_idle().await;
        assert_eq!(count(&counters.acquired), 0);
    }

    #[tokio::test]
    async fn test_playback_failure_releases() {
        let output = FakeOutput {
            fail_play: true,
            ..FakeOutput::default()
        };
        let (narrator, _, counters) =
            controller(FakeSynth::default(), output, NarrationConfig::default());

        narrator.narrate("Hello");
        narrator.snapshot().await;
        narrator.wait_idle().await;

        assert_eq!(count(&counters.acquired), 1);
        assert_eq!(count(&counters.released), 1);
        assert!(!narrator.state().audio_held);
    }

    #[tokio::test]
    async fn test_playback_timeout_releases() {
        let output = FakeOutput {
            play_for: Duration::from_secs(30),
            ..FakeOutput::default()
        };
        let config = NarrationConfig {
            playback_timeout: Duration::from_millis(30),
            ..NarrationConfig::default()
        };
        let (narrator, _, counters) = controller(FakeSynth::default(), output, config);

        narrator.narrate("Hello");
        narrator.snapshot().await;
        narrator.wait_idle().await;
        assert_eq!(count(&counters.released), 1);
    }

    #[tokio::test]
    async fn test_mute_does_not_interrupt_in_flight() {
        let output = FakeOutput {
            play_for: Duration::from_millis(50),
            ..FakeOutput::default()
        };
        let (narrator, synth, counters) =
            controller(FakeSynth::default(), output, NarrationConfig::default());

        narrator.narrate("Hello");
        narrator.set_muted(true);
        let state = narrator.snapshot().await;
        assert!(state.muted);
        assert!(state.is_playing());

        narrator.wait_idle().await;
        assert_eq!(count(&counters.released), 1);

        narrator.narrate("Muted now");
        assert!(!narrator.snapshot().await.is_playing());
        assert_eq!(count(&synth.calls), 1);
    }

    #[tokio::test]
    async fn test_blank_text_is_dropped() {
        let (narrator, synth, _) =
            controller(FakeSynth::default(), FakeOutput::default(), NarrationConfig::default());
        narrator.narrate("   ");
        assert!(!narrator.snapshot().await.is_playing());
        assert_eq!(count(&synth.calls), 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_held_audio() {
        let output = FakeOutput {
            play_for: Duration::from_secs(30),
            ..FakeOutput::default()
        };
        let (narrator, _, counters) =
            controller(FakeSynth::default(), output, NarrationConfig::default());

        narrator.narrate("A very long story");
        narrator.snapshot().await;
        narrator.wait_until(|s| s.audio_held).await;
        assert_eq!(count(&counters.active), 1);

        narrator.shutdown().await;
        assert_eq!(count(&counters.active), 0);
        assert_eq!(count(&counters.released), 1);
    }
}
