//! Player core: current media, current input, controls and accessors.

use std::sync::Arc;

use crossbeam_channel::Sender;

use super::session::{InputId, PlayerInput};
use super::{PlayerEvent, PlayerListener, PlayerState};
use crate::config::{MediaEndedAction, PlayerConfig};
use crate::error::{Error, InputError, Result};
use crate::input::{
    Capabilities, EsId, EventSink, Input, InputControl, InputEvent, InputFactory, InputState,
    InputStats, NavigateAction, Program, Renderer, SeekSpeed, Signal, Title, Track, TrackCategory,
    Whence,
};
use crate::listener::{ListenerId, Listeners};
use crate::models::Media;

pub(crate) type SinkFactory = Arc<dyn Fn(InputId) -> EventSink + Send + Sync>;

const RATE_MIN: f32 = 1.0 / 32.0;
const RATE_MAX: f32 = 32.0;

/// Steps walked by `increment_rate`/`decrement_rate`.
const RATES: [f32; 17] = [
    1.0 / 64.0,
    1.0 / 32.0,
    1.0 / 16.0,
    1.0 / 8.0,
    1.0 / 4.0,
    1.0 / 3.0,
    1.0 / 2.0,
    2.0 / 3.0,
    1.0,
    3.0 / 2.0,
    2.0,
    3.0,
    4.0,
    8.0,
    16.0,
    32.0,
    64.0,
];

fn clamp_rate(rate: f32) -> f32 {
    rate.signum() * rate.abs().clamp(RATE_MIN, RATE_MAX)
}

/// Player state reachable through [`PlayerGuard`](super::PlayerGuard), and
/// handed to owner hooks.
pub struct PlayerCore {
    pub(crate) config: PlayerConfig,
    factory: Arc<dyn InputFactory>,
    sinks: SinkFactory,
    reaper: Option<Sender<Box<dyn Input>>>,
    next_input_id: u64,

    media: Option<Media>,
    pub(crate) next_media: Option<Media>,
    input: Option<PlayerInput>,
    /// Stopped inputs waiting for their `Dead` event.
    pub(crate) closing: Vec<PlayerInput>,

    state: PlayerState,
    rate: f32,
    renderer: Option<Renderer>,
    listeners: Listeners<PlayerListener>,
}

impl PlayerCore {
    pub(crate) fn new(
        config: PlayerConfig,
        factory: Arc<dyn InputFactory>,
        sinks: SinkFactory,
        reaper: Sender<Box<dyn Input>>,
    ) -> Self {
        Self {
            config,
            factory,
            sinks,
            reaper: Some(reaper),
            next_input_id: 1,
            media: None,
            next_media: None,
            input: None,
            closing: Vec::new(),
            state: PlayerState::Stopped,
            rate: 1.0,
            renderer: None,
            listeners: Listeners::new(),
        }
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    pub fn add_listener(&mut self, listener: impl FnMut(&PlayerEvent) + Send + 'static) -> ListenerId {
        self.listeners.add(Box::new(listener))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub(crate) fn notify(&mut self, event: &PlayerEvent) {
        for listener in self.listeners.iter_mut() {
            listener(event);
        }
    }

    pub(crate) fn set_global_state(&mut self, state: PlayerState) {
        if self.state != state {
            log::debug!("segue: player state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.notify(&PlayerEvent::StateChanged(state));
        }
    }

    // ========================================================================
    // Input lifecycle
    // ========================================================================

    fn new_input(&mut self, media: &Media) -> std::result::Result<PlayerInput, InputError> {
        let id = InputId(self.next_input_id);
        self.next_input_id += 1;
        let handle = self.factory.create(media, (self.sinks)(id), self.renderer.as_ref())?;
        Ok(PlayerInput::new(id, handle, media.clone()))
    }

    fn reap(&self, input: Box<dyn Input>) {
        match &self.reaper {
            Some(reaper) => {
                if reaper.send(input).is_err() {
                    log::error!("segue: reaper gone, leaking an input");
                }
            }
            None => log::warn!("segue: input dead after shutdown"),
        }
    }

    /// Move an input out of the way: started ones wind down and wait for
    /// `Dead`, others are closed right away.
    fn dispose(&mut self, mut input: PlayerInput) {
        log::debug!("segue: disposing of the input for {}", input.media.uri());
        if input.started {
            input.handle.stop();
            input.started = false;
            input.state = PlayerState::Stopping;
            self.closing.push(input);
        } else {
            self.reap(input.handle);
        }
    }

    pub(crate) fn is_current(&self, id: InputId) -> bool {
        self.input.as_ref().is_some_and(|input| input.id == id)
    }

    fn started_input(&self) -> bool {
        self.input.as_ref().is_some_and(|input| input.started)
    }

    pub(crate) fn set_current_media(&mut self, media: Option<Media>) -> Result<()> {
        self.media = None;
        self.next_media = None;
        let was_started = self.started_input();
        if let Some(input) = self.input.take() {
            self.dispose(input);
        }

        let mut result = Ok(());
        if let Some(media) = media {
            match self.new_input(&media) {
                Ok(input) => {
                    self.input = Some(input);
                    self.media = Some(media);
                }
                Err(e) => {
                    log::error!("segue: {}", e);
                    result = Err(Error::InputCreation(e));
                }
            }
        }

        self.notify(&PlayerEvent::CurrentMediaChanged(self.media.clone()));
        // Switching media while playing keeps playing.
        if was_started && self.media.is_some() {
            result = self.start();
        }
        result
    }

    /// Start playback of the current media.
    pub fn start(&mut self) -> Result<()> {
        let media = self.media.clone().ok_or(Error::NoMedia)?;
        if self.started_input() {
            return Err(Error::AlreadyStarted);
        }
        if self.input.is_none() {
            let input = self.new_input(&media).map_err(Error::InputCreation)?;
            self.input = Some(input);
        }
        let (start_paused, rate) = (self.config.start_paused, self.rate);
        let Some(input) = self.input.as_mut() else {
            return Err(Error::NoMedia);
        };

        input.handle.start().map_err(Error::InputStart)?;
        input.started = true;
        input.state = PlayerState::Started;
        if start_paused {
            input.handle.control(InputControl::Pause);
        }
        if rate != 1.0 {
            input.handle.control(InputControl::SetRate(rate));
        }
        log::info!("segue: started {}", media.uri());
        self.begin_discontinuity();
        Ok(())
    }

    /// Detach the started input for stopping.
    pub(crate) fn begin_stop(&mut self) -> Result<PlayerInput> {
        match self.input.take() {
            Some(mut input) if input.started => {
                input.handle.stop();
                input.started = false;
                input.state = PlayerState::Stopping;
                self.set_global_state(PlayerState::Stopping);
                Ok(input)
            }
            other => {
                self.input = other;
                Err(Error::NotStarted)
            }
        }
    }

    /// Report STOPPED unless something else started meanwhile.
    pub(crate) fn settle_stopped(&mut self) {
        if !self.started_input() {
            self.set_global_state(PlayerState::Stopped);
        }
    }

    pub(crate) fn reap_closing(&mut self, id: InputId) {
        let Some(index) = self.closing.iter().position(|input| input.id == id) else {
            return;
        };
        let input = self.closing.swap_remove(index);
        self.reap(input.handle);
        self.settle_stopped();
    }

    /// The current input died. Returns whether it ended in error.
    pub(crate) fn retire_current(&mut self) -> bool {
        match self.input.take() {
            Some(input) => {
                let failed = input.state == PlayerState::Error;
                self.reap(input.handle);
                failed
            }
            None => false,
        }
    }

    /// Take every input and the reaper sender, for shutdown.
    pub(crate) fn detach_all(&mut self) -> (Vec<Box<dyn Input>>, Option<Sender<Box<dyn Input>>>) {
        let mut inputs: Vec<Box<dyn Input>> = self.closing.drain(..).map(|input| input.handle).collect();
        if let Some(input) = self.input.take() {
            inputs.push(input.handle);
        }
        (inputs, self.reaper.take())
    }

    // ========================================================================
    // Input events
    // ========================================================================

    pub(crate) fn on_input_state(&mut self, state: InputState) {
        let chaining = self.next_media.is_some() && self.config.media_ended == MediaEndedAction::Continue;
        let Some(input) = self.input.as_mut() else {
            return;
        };
        if input.state == PlayerState::Stopping {
            return;
        }
        let new_state = match state {
            InputState::Opening => PlayerState::Started,
            InputState::Playing => PlayerState::Playing,
            InputState::Paused => PlayerState::Paused,
            InputState::End => PlayerState::Stopped,
            InputState::Error => PlayerState::Error,
        };
        input.state = new_state;

        // Keep PLAYING across a chained transition.
        let report = match (self.state, new_state) {
            (PlayerState::Playing, PlayerState::Started | PlayerState::Playing) => false,
            (PlayerState::Playing, PlayerState::Stopped) => !chaining,
            _ => true,
        };
        if report {
            self.set_global_state(new_state);
        }
        if new_state == PlayerState::Playing {
            self.end_discontinuity();
        }
    }

    pub(crate) fn on_input_event(&mut self, event: InputEvent) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        let mut events = Vec::with_capacity(2);
        let mut buffering = None;

        match event {
            InputEvent::Rate(rate) => {
                input.rate = rate;
                self.rate = rate;
                events.push(PlayerEvent::RateChanged(rate));
            }
            InputEvent::Capabilities(caps) => {
                input.caps = caps;
                events.push(PlayerEvent::CapabilitiesChanged(caps));
            }
            InputEvent::Position { time_ms, position } => {
                input.time_ms = time_ms;
                input.position = position;
                if !input.discontinuity {
                    events.push(PlayerEvent::PositionChanged { time_ms, position, rate: input.rate });
                }
            }
            InputEvent::Length(length_ms) => {
                input.length_ms = length_ms;
                events.push(PlayerEvent::LengthChanged(length_ms));
            }
            InputEvent::Program(event) => events.extend(input.apply_program(event)),
            InputEvent::Es(event) => events.extend(input.apply_es(event)),
            InputEvent::Title(event) => events.extend(input.apply_title(event)),
            InputEvent::Chapter { title, chapter } => events.extend(input.apply_chapter(title, chapter)),
            InputEvent::Record(recording) => {
                input.recording = recording;
                events.push(PlayerEvent::RecordingChanged(recording));
            }
            InputEvent::Statistics(stats) => {
                input.stats = stats;
                events.push(PlayerEvent::StatisticsChanged(stats));
            }
            InputEvent::Signal(signal) => {
                input.signal = signal;
                events.push(PlayerEvent::SignalChanged(signal));
            }
            InputEvent::AudioDelay(delay) => {
                input.audio_delay_ms = delay;
                events.push(PlayerEvent::AudioDelayChanged(delay));
            }
            InputEvent::SubtitleDelay(delay) => {
                input.subtitle_delay_ms = delay;
                events.push(PlayerEvent::SubtitleDelayChanged(delay));
            }
            InputEvent::Cache(level) => {
                input.cache = level;
                events.push(PlayerEvent::BufferingChanged(level));
                buffering = Some(level);
            }
            InputEvent::Vout { action, .. } => events.push(input.apply_vout(action)),
            InputEvent::State(_) | InputEvent::SubItems(_) | InputEvent::Dead => {}
        }

        for event in &events {
            self.notify(event);
        }
        match buffering {
            Some(level) if level < 1.0 => self.begin_discontinuity(),
            Some(_) => self.end_discontinuity(),
            None => {}
        }
    }

    fn begin_discontinuity(&mut self) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        if !input.discontinuity {
            input.discontinuity = true;
            self.notify(&PlayerEvent::DiscontinuityChanged(true));
        }
    }

    /// Leave a discontinuity once fully buffered and playing, with one
    /// authoritative position.
    fn end_discontinuity(&mut self) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        if !input.discontinuity || input.cache < 1.0 || input.state != PlayerState::Playing {
            return;
        }
        input.discontinuity = false;
        let position = PlayerEvent::PositionChanged {
            time_ms: input.time_ms,
            position: input.position,
            rate: input.rate,
        };
        self.notify(&PlayerEvent::DiscontinuityChanged(false));
        self.notify(&position);
    }

    // ========================================================================
    // Controls
    // ========================================================================

    fn started_mut(&mut self) -> Result<&mut PlayerInput> {
        match self.input.as_mut() {
            Some(input) if input.started => Ok(input),
            _ => Err(Error::NotStarted),
        }
    }

    fn require(&mut self, caps: Capabilities) -> Result<&mut PlayerInput> {
        let input = self.started_mut()?;
        if !input.caps.contains(caps) {
            return Err(Error::Unsupported(caps));
        }
        Ok(input)
    }

    fn send(&mut self, control: InputControl) -> Result<()> {
        self.started_mut()?.handle.control(control);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require(Capabilities::PAUSE)?.handle.control(InputControl::Pause);
        self.begin_discontinuity();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.require(Capabilities::PAUSE)?.handle.control(InputControl::Play);
        Ok(())
    }

    pub fn seek_by_time(&mut self, time_ms: i64, speed: SeekSpeed, whence: Whence) -> Result<()> {
        let input = self.started_mut()?;
        let seekable = input.caps.contains(Capabilities::SEEK);
        input.handle.control(InputControl::SeekTime { time_ms, speed, whence });
        if seekable {
            self.begin_discontinuity();
        }
        Ok(())
    }

    pub fn seek_by_pos(&mut self, position: f32, speed: SeekSpeed, whence: Whence) -> Result<()> {
        let position = match whence {
            Whence::Absolute => position.clamp(0.0, 1.0),
            Whence::Relative => position.clamp(-1.0, 1.0),
        };
        let input = self.started_mut()?;
        let seekable = input.caps.contains(Capabilities::SEEK);
        input.handle.control(InputControl::SeekPosition { position, speed, whence });
        if seekable {
            self.begin_discontinuity();
        }
        Ok(())
    }

    /// Set the playback rate. Kept for the next inputs when nothing plays.
    pub fn change_rate(&mut self, rate: f32) -> Result<()> {
        if rate == 0.0 || !rate.is_finite() {
            log::debug!("segue: ignoring rate {}", rate);
            return Ok(());
        }
        let rate = clamp_rate(rate);
        let needed = if rate < 0.0 {
            Capabilities::CHANGE_RATE | Capabilities::REWIND
        } else {
            Capabilities::CHANGE_RATE
        };

        if self.started_input() {
            self.require(needed)?.handle.control(InputControl::SetRate(rate));
            self.rate = rate;
            self.begin_discontinuity();
        } else if self.rate != rate {
            self.rate = rate;
            self.notify(&PlayerEvent::RateChanged(rate));
        }
        Ok(())
    }

    pub fn increment_rate(&mut self) -> Result<()> {
        let mut rate = self.rate() * 1.1;
        if let Some(step) = RATES.iter().find(|step| **step > rate) {
            rate = *step;
        }
        self.change_rate(rate)
    }

    pub fn decrement_rate(&mut self) -> Result<()> {
        let mut rate = self.rate() * 0.9;
        if let Some(index) = RATES.iter().skip(1).position(|step| *step >= rate) {
            rate = RATES[index];
        }
        self.change_rate(rate)
    }

    pub fn select_track(&mut self, id: EsId) -> Result<()> {
        self.send(InputControl::SelectEs(id))
    }

    pub fn unselect_track(&mut self, id: EsId) -> Result<()> {
        self.send(InputControl::UnselectEs(id))
    }

    pub fn restart_track(&mut self, id: EsId) -> Result<()> {
        self.send(InputControl::RestartEs(id))
    }

    /// Attach an external audio or subtitle media to the current input. It
    /// shows up as a new track once the input has opened it.
    pub fn add_associated_media(
        &mut self,
        category: TrackCategory,
        uri: impl Into<String>,
        select: bool,
        check_ext: bool,
    ) -> Result<()> {
        if !matches!(category, TrackCategory::Audio | TrackCategory::Spu) {
            return Err(Error::UnsupportedCategory(category));
        }
        let uri = uri.into();
        let input = self.started_mut()?;
        log::debug!("segue: associating {} with {}", uri, input.media.uri());
        input.handle.control(InputControl::AddAssociatedMedia { category, uri, select, check_ext });
        Ok(())
    }

    /// Select the first track of `category` whose language is `language`.
    /// Nothing happens when the input has none.
    pub fn select_default_track(&mut self, category: TrackCategory, language: impl Into<String>) -> Result<()> {
        self.send(InputControl::SelectDefaultTrack { category, language: language.into() })
    }

    pub fn select_program(&mut self, id: i32) -> Result<()> {
        self.send(InputControl::SelectProgram(id))
    }

    pub fn select_title(&mut self, index: usize) -> Result<()> {
        self.send(InputControl::SelectTitle(index))
    }

    pub fn select_next_title(&mut self) -> Result<()> {
        self.send(InputControl::NextTitle)
    }

    pub fn select_prev_title(&mut self) -> Result<()> {
        self.send(InputControl::PrevTitle)
    }

    pub fn select_chapter(&mut self, index: usize) -> Result<()> {
        self.send(InputControl::SelectChapter(index))
    }

    pub fn select_next_chapter(&mut self) -> Result<()> {
        self.send(InputControl::NextChapter)
    }

    pub fn select_prev_chapter(&mut self) -> Result<()> {
        self.send(InputControl::PrevChapter)
    }

    pub fn set_audio_delay(&mut self, delay_ms: i64, whence: Whence) -> Result<()> {
        self.send(InputControl::SetAudioDelay { delay_ms, whence })
    }

    pub fn set_subtitle_delay(&mut self, delay_ms: i64, whence: Whence) -> Result<()> {
        self.send(InputControl::SetSubtitleDelay { delay_ms, whence })
    }

    pub fn set_recording(&mut self, enabled: bool) -> Result<()> {
        self.require(Capabilities::RECORD)?.handle.control(InputControl::SetRecording(enabled));
        Ok(())
    }

    pub fn navigate(&mut self, action: NavigateAction) -> Result<()> {
        self.send(InputControl::Navigate(action))
    }

    /// Select the output renderer, for this input and the next ones.
    pub fn set_renderer(&mut self, renderer: Option<Renderer>) {
        self.renderer = renderer.clone();
        if let Some(input) = self.input.as_mut() {
            input.handle.control(InputControl::SetRenderer(renderer));
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn media(&self) -> Option<&Media> {
        self.media.as_ref()
    }

    /// Lookahead computed when the current input opened.
    pub fn next_media(&self) -> Option<&Media> {
        self.next_media.as_ref()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.input.as_ref().map_or(Capabilities::NONE, |input| input.caps)
    }

    pub fn can_seek(&self) -> bool {
        self.capabilities().contains(Capabilities::SEEK)
    }

    pub fn can_pause(&self) -> bool {
        self.capabilities().contains(Capabilities::PAUSE)
    }

    pub fn can_change_rate(&self) -> bool {
        self.capabilities().contains(Capabilities::CHANGE_RATE)
    }

    pub fn can_rewind(&self) -> bool {
        self.capabilities().contains(Capabilities::REWIND)
    }

    pub fn can_record(&self) -> bool {
        self.capabilities().contains(Capabilities::RECORD)
    }

    pub fn length(&self) -> u64 {
        self.input.as_ref().map_or(0, |input| input.length_ms)
    }

    pub fn time(&self) -> u64 {
        self.input.as_ref().map_or(0, |input| input.time_ms)
    }

    pub fn position(&self) -> f32 {
        self.input.as_ref().map_or(0.0, |input| input.position)
    }

    pub fn rate(&self) -> f32 {
        self.input.as_ref().filter(|input| input.started).map_or(self.rate, |input| input.rate)
    }

    pub fn is_discontinuous(&self) -> bool {
        self.input.as_ref().is_some_and(|input| input.discontinuity)
    }

    /// Number of tracks of a category; 0 for categories that are not listed.
    pub fn track_count(&self, category: TrackCategory) -> usize {
        self.input.as_ref().map_or(0, |input| input.track_count(category))
    }

    pub fn track_at(&self, category: TrackCategory, index: usize) -> Option<&Track> {
        self.input.as_ref()?.tracks(category)?.get(index)
    }

    pub fn track(&self, id: EsId) -> Option<&Track> {
        self.input.as_ref()?.find_track(id)
    }

    pub fn program_count(&self) -> usize {
        self.input.as_ref().map_or(0, |input| input.programs.len())
    }

    pub fn program_at(&self, index: usize) -> Option<&Program> {
        self.input.as_ref()?.programs.get(index)
    }

    pub fn titles(&self) -> &[Title] {
        self.input.as_ref().map_or(&[][..], |input| input.titles.as_slice())
    }

    pub fn selected_title(&self) -> Option<usize> {
        self.input.as_ref()?.title_selected
    }

    pub fn selected_chapter(&self) -> Option<usize> {
        self.input.as_ref()?.chapter_selected
    }

    pub fn is_recording(&self) -> bool {
        self.input.as_ref().is_some_and(|input| input.recording)
    }

    pub fn statistics(&self) -> Option<InputStats> {
        self.input.as_ref().map(|input| input.stats)
    }

    pub fn signal(&self) -> Option<Signal> {
        self.input.as_ref().map(|input| input.signal)
    }

    pub fn audio_delay(&self) -> i64 {
        self.input.as_ref().map_or(0, |input| input.audio_delay_ms)
    }

    pub fn subtitle_delay(&self) -> i64 {
        self.input.as_ref().map_or(0, |input| input.subtitle_delay_ms)
    }

    pub fn vout_count(&self) -> usize {
        self.input.as_ref().map_or(0, |input| input.vout_count)
    }

    pub fn renderer(&self) -> Option<&Renderer> {
        self.renderer.as_ref()
    }
}
