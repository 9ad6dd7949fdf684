//! Simulated input: a thread walking a virtual timeline.
//!
//! No decoding happens. Each input opens, announces a fixed set of tracks,
//! programs and titles, buffers, plays and advances its clock by `step_ms`
//! every `tick` until the media length is reached. Controls are honored the
//! way a real input would answer them: through events.
//!
//! Per-URI scripts inject failures or sub-items, which makes this the
//! headless backend of the CLI and the test harness of the player.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::{
    Capabilities, Chapter, EsEvent, EsId, EventSink, Input, InputControl, InputEvent, InputFactory,
    InputState, InputStats, ProgramEvent, Renderer, Title, TitleEvent, Track, TrackCategory,
    VoutAction, Whence,
};
use crate::error::InputError;
use crate::models::{Media, MediaNode};

/// Behavior override for one URI.
#[derive(Debug, Clone)]
pub enum SimScript {
    /// `InputFactory::create` fails.
    FailCreate,
    /// `Input::start` fails.
    FailStart,
    /// Report ERROR once the clock reaches this time.
    ErrorAt(u64),
    /// Resolve into these sub-items, then end.
    SubItems(MediaNode),
}

/// What happened to simulated inputs, for assertions.
#[derive(Debug, Clone, Default)]
pub struct SimLog {
    pub created: Vec<String>,
    pub started: Vec<String>,
    pub controls: Vec<(String, InputControl)>,
    pub closed: Vec<String>,
}

#[derive(Clone)]
pub struct SimFactory {
    tick: Duration,
    step_ms: u64,
    length_ms: u64,
    caps: Capabilities,
    scripts: Arc<Mutex<HashMap<String, SimScript>>>,
    log: Arc<Mutex<SimLog>>,
}

impl SimFactory {
    pub fn new() -> Self {
        Self {
            tick: Duration::from_millis(50),
            step_ms: 50,
            length_ms: 10_000,
            caps: Capabilities::all(),
            scripts: Arc::new(Mutex::new(HashMap::new())),
            log: Arc::new(Mutex::new(SimLog::default())),
        }
    }

    /// Real time between two clock steps.
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Virtual milliseconds per step at rate 1.0.
    pub fn step_ms(mut self, step_ms: u64) -> Self {
        self.step_ms = step_ms;
        self
    }

    /// Length used when the media metadata has no duration.
    pub fn length_ms(mut self, length_ms: u64) -> Self {
        self.length_ms = length_ms;
        self
    }

    pub fn capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn script(&self, uri: impl Into<String>, script: SimScript) {
        self.scripts.lock().insert(uri.into(), script);
    }

    pub fn log(&self) -> SimLog {
        self.log.lock().clone()
    }
}

impl Default for SimFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl InputFactory for SimFactory {
    fn create(
        &self,
        media: &Media,
        events: EventSink,
        renderer: Option<&Renderer>,
    ) -> Result<Box<dyn Input>, InputError> {
        let uri = media.uri().to_string();
        let script = self.scripts.lock().get(&uri).cloned();
        if let Some(SimScript::FailCreate) = script {
            return Err(InputError::Create { uri, reason: "scripted failure".into() });
        }
        if let Some(renderer) = renderer {
            log::debug!("segue: sim input for {} renders to {}", uri, renderer.name);
        }
        self.log.lock().created.push(uri.clone());

        let (tx, rx) = unbounded();
        Ok(Box::new(SimInput {
            timeline: Timeline {
                tick: self.tick,
                step_ms: self.step_ms,
                length_ms: media.meta().duration_ms.unwrap_or(self.length_ms),
                caps: self.caps,
                script,
            },
            uri,
            events,
            tx,
            rx: Some(rx),
            thread: None,
            log: Arc::clone(&self.log),
        }))
    }
}

enum Msg {
    Control(InputControl),
    Stop,
}

struct Timeline {
    tick: Duration,
    step_ms: u64,
    length_ms: u64,
    caps: Capabilities,
    script: Option<SimScript>,
}

struct SimInput {
    uri: String,
    timeline: Timeline,
    events: EventSink,
    tx: Sender<Msg>,
    rx: Option<Receiver<Msg>>,
    thread: Option<JoinHandle<()>>,
    log: Arc<Mutex<SimLog>>,
}

impl Input for SimInput {
    fn start(&mut self) -> Result<(), InputError> {
        if let Some(SimScript::FailStart) = self.timeline.script {
            return Err(InputError::Start(format!("scripted failure for {}", self.uri)));
        }
        let Some(rx) = self.rx.take() else {
            return Err(InputError::Start("already started".into()));
        };
        let timeline = Timeline {
            tick: self.timeline.tick,
            step_ms: self.timeline.step_ms,
            length_ms: self.timeline.length_ms,
            caps: self.timeline.caps,
            script: self.timeline.script.take(),
        };
        let events = self.events.clone();
        let thread = thread::Builder::new()
            .name("segue-sim-input".into())
            .spawn(move || Playback::new(timeline, events).run(rx))
            .map_err(|e| InputError::Start(e.to_string()))?;
        self.thread = Some(thread);
        self.log.lock().started.push(self.uri.clone());
        Ok(())
    }

    fn stop(&mut self) {
        let _ = self.tx.send(Msg::Stop);
    }

    fn close(self: Box<Self>) {
        let _ = self.tx.send(Msg::Stop);
        if let Some(thread) = self.thread {
            let _ = thread.join();
        }
        self.log.lock().closed.push(self.uri);
    }

    fn control(&mut self, control: InputControl) {
        self.log.lock().controls.push((self.uri.clone(), control.clone()));
        let _ = self.tx.send(Msg::Control(control));
    }
}

// ---------------------------------------------------------------------------
// Input thread
// ---------------------------------------------------------------------------

const TRACKS: [(i32, TrackCategory, &str, Option<&str>); 4] = [
    (0, TrackCategory::Video, "Video", None),
    (1, TrackCategory::Audio, "Stereo", Some("en")),
    (2, TrackCategory::Audio, "Commentary", Some("fr")),
    (3, TrackCategory::Spu, "Subtitles", Some("en")),
];

const SPU_EXTENSIONS: [&str; 6] = ["srt", "ass", "ssa", "vtt", "sub", "idx"];
const AUDIO_EXTENSIONS: [&str; 8] = ["mp3", "aac", "ac3", "flac", "ogg", "opus", "wav", "m4a"];

/// Whether `uri` looks like a file of `category`.
fn has_extension_for(uri: &str, category: TrackCategory) -> bool {
    let Some((_, ext)) = uri.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    match category {
        TrackCategory::Spu => SPU_EXTENSIONS.contains(&ext.as_str()),
        TrackCategory::Audio => AUDIO_EXTENSIONS.contains(&ext.as_str()),
        _ => false,
    }
}

struct Playback {
    timeline: Timeline,
    events: EventSink,
    time_ms: u64,
    rate: f32,
    paused: bool,
    titles: Vec<Title>,
    title: usize,
    chapter: usize,
    tracks: Vec<Track>,
    next_es_id: i32,
    selected: HashMap<TrackCategory, EsId>,
    audio_delay_ms: i64,
    subtitle_delay_ms: i64,
    stats: InputStats,
}

impl Playback {
    fn new(timeline: Timeline, events: EventSink) -> Self {
        let length = timeline.length_ms;
        let titles = vec![
            Title {
                name: "Main".into(),
                length_ms: length,
                chapters: vec![
                    Chapter { name: "Opening".into(), time_ms: 0 },
                    Chapter { name: "Middle".into(), time_ms: length / 2 },
                ],
            },
            Title {
                name: "Extras".into(),
                length_ms: length,
                chapters: vec![Chapter { name: "Extras".into(), time_ms: 0 }],
            },
        ];
        Self {
            timeline,
            events,
            time_ms: 0,
            rate: 1.0,
            paused: false,
            titles,
            title: 0,
            chapter: 0,
            tracks: Vec::new(),
            next_es_id: TRACKS.len() as i32,
            selected: HashMap::new(),
            audio_delay_ms: 0,
            subtitle_delay_ms: 0,
            stats: InputStats::default(),
        }
    }

    fn send(&self, event: InputEvent) {
        self.events.send(event);
    }

    fn run(mut self, rx: Receiver<Msg>) {
        self.open();
        if let Some(SimScript::SubItems(node)) = &self.timeline.script {
            self.send(InputEvent::SubItems(node.clone()));
            self.send(InputEvent::State(InputState::End));
            self.send(InputEvent::Dead);
            return;
        }
        self.send(InputEvent::Cache(0.5));
        self.send(InputEvent::Cache(1.0));
        self.send(InputEvent::State(InputState::Playing));

        let mut ticks = 0u64;
        let end = loop {
            match rx.recv_timeout(self.timeline.tick) {
                Ok(Msg::Stop) | Err(RecvTimeoutError::Disconnected) => break InputState::End,
                Ok(Msg::Control(control)) => self.control(control),
                Err(RecvTimeoutError::Timeout) => {
                    if self.paused {
                        continue;
                    }
                    ticks += 1;
                    if let Some(state) = self.advance(ticks) {
                        break state;
                    }
                }
            }
        };

        self.send(InputEvent::State(end));
        self.send(InputEvent::Vout { action: VoutAction::Removed, id: 0 });
        self.send(InputEvent::Dead);
    }

    fn open(&mut self) {
        self.send(InputEvent::State(InputState::Opening));
        self.send(InputEvent::Capabilities(self.timeline.caps));
        self.send(InputEvent::Length(self.timeline.length_ms));
        self.send(InputEvent::Program(ProgramEvent::Added { id: 1, name: "Main".into() }));
        self.send(InputEvent::Program(ProgramEvent::Selected(1)));
        for (id, category, name, language) in TRACKS {
            let track = Track {
                id: EsId { id, category },
                name: name.into(),
                language: language.map(String::from),
                selected: false,
            };
            let select = !self.selected.contains_key(&category);
            self.add_track(track, select);
        }
        self.send(InputEvent::Title(TitleEvent::NewList(self.titles.clone())));
        self.send(InputEvent::Vout { action: VoutAction::Added, id: 0 });
    }

    /// One clock step. Returns the final state when playback is over.
    fn advance(&mut self, ticks: u64) -> Option<InputState> {
        let step = (self.timeline.step_ms as f32 * self.rate.abs()) as u64;
        self.time_ms = if self.rate < 0.0 {
            self.time_ms.saturating_sub(step)
        } else {
            (self.time_ms + step).min(self.timeline.length_ms)
        };

        if let Some(SimScript::ErrorAt(at)) = self.timeline.script {
            if self.time_ms >= at {
                return Some(InputState::Error);
            }
        }

        self.send_position();
        if ticks % 10 == 0 {
            self.stats.read_bytes += 40_000;
            self.stats.decoded_audio += 10;
            self.stats.decoded_video += 10;
            self.stats.displayed_pictures += 10;
            self.send(InputEvent::Statistics(self.stats));
        }
        if self.time_ms >= self.timeline.length_ms {
            return Some(InputState::End);
        }
        None
    }

    fn send_position(&self) {
        let position = if self.timeline.length_ms > 0 {
            self.time_ms as f32 / self.timeline.length_ms as f32
        } else {
            0.0
        };
        self.send(InputEvent::Position { time_ms: self.time_ms, position });
    }

    fn seek_to(&mut self, time_ms: u64) {
        self.time_ms = time_ms.min(self.timeline.length_ms);
        self.send(InputEvent::Cache(0.2));
        self.send_position();
        self.send(InputEvent::Cache(1.0));
    }

    fn control(&mut self, control: InputControl) {
        let caps = self.timeline.caps;
        match control {
            InputControl::Pause if caps.contains(Capabilities::PAUSE) && !self.paused => {
                self.paused = true;
                self.send(InputEvent::State(InputState::Paused));
            }
            InputControl::Play if self.paused => {
                self.paused = false;
                self.send(InputEvent::State(InputState::Playing));
            }
            InputControl::SetRate(rate) if caps.contains(Capabilities::CHANGE_RATE) => {
                self.rate = rate;
                self.send(InputEvent::Rate(rate));
                self.send(InputEvent::Cache(0.8));
                self.send(InputEvent::Cache(1.0));
            }
            InputControl::SeekTime { time_ms, whence, .. } if caps.contains(Capabilities::SEEK) => {
                let target = match whence {
                    Whence::Absolute => time_ms,
                    Whence::Relative => self.time_ms as i64 + time_ms,
                };
                self.seek_to(target.max(0) as u64);
            }
            InputControl::SeekPosition { position, whence, .. } if caps.contains(Capabilities::SEEK) => {
                let length = self.timeline.length_ms as f32;
                let target = match whence {
                    Whence::Absolute => position * length,
                    Whence::Relative => self.time_ms as f32 + position * length,
                };
                self.seek_to(target.max(0.0) as u64);
            }
            InputControl::SelectProgram(id) => {
                self.send(InputEvent::Program(ProgramEvent::Selected(id)));
            }
            InputControl::SelectEs(id) => self.select_es(id),
            InputControl::UnselectEs(id) => {
                if self.selected.get(&id.category) == Some(&id) {
                    self.selected.remove(&id.category);
                    self.send(InputEvent::Es(EsEvent::Unselected(id)));
                }
            }
            InputControl::RestartEs(id) => {
                self.send(InputEvent::Es(EsEvent::Unselected(id)));
                self.send(InputEvent::Es(EsEvent::Selected(id)));
            }
            InputControl::SelectTitle(index) => self.select_title(index),
            InputControl::NextTitle => self.select_title(self.title + 1),
            InputControl::PrevTitle => {
                if self.title > 0 {
                    self.select_title(self.title - 1);
                }
            }
            InputControl::SelectChapter(index) => self.select_chapter(index),
            InputControl::NextChapter => self.select_chapter(self.chapter + 1),
            InputControl::PrevChapter => {
                if self.chapter > 0 {
                    self.select_chapter(self.chapter - 1);
                }
            }
            InputControl::SetAudioDelay { delay_ms, whence } => {
                self.audio_delay_ms = apply(self.audio_delay_ms, delay_ms, whence);
                self.send(InputEvent::AudioDelay(self.audio_delay_ms));
            }
            InputControl::SetSubtitleDelay { delay_ms, whence } => {
                self.subtitle_delay_ms = apply(self.subtitle_delay_ms, delay_ms, whence);
                self.send(InputEvent::SubtitleDelay(self.subtitle_delay_ms));
            }
            InputControl::SetRecording(enabled) if caps.contains(Capabilities::RECORD) => {
                self.send(InputEvent::Record(enabled));
            }
            InputControl::AddAssociatedMedia { category, uri, select, check_ext } => {
                if check_ext && !has_extension_for(&uri, category) {
                    log::debug!("segue: sim input ignores {} as {:?}", uri, category);
                    return;
                }
                let name = uri.rsplit('/').next().unwrap_or(&uri).to_string();
                let id = EsId { id: self.next_es_id, category };
                self.next_es_id += 1;
                self.add_track(Track { id, name, language: None, selected: false }, select);
            }
            InputControl::SelectDefaultTrack { category, language } => {
                let found = self
                    .tracks
                    .iter()
                    .find(|track| {
                        track.id.category == category && track.language.as_deref() == Some(language.as_str())
                    })
                    .map(|track| track.id);
                match found {
                    Some(id) => self.select_es(id),
                    None => log::debug!("segue: sim input has no {:?} track in {}", category, language),
                }
            }
            other => log::debug!("segue: sim input ignores {:?}", other),
        }
    }

    fn add_track(&mut self, track: Track, select: bool) {
        let id = track.id;
        self.tracks.push(track.clone());
        self.send(InputEvent::Es(EsEvent::Added(track)));
        if select {
            self.select_es(id);
        }
    }

    /// Select `id`, unselecting the other track of its category.
    fn select_es(&mut self, id: EsId) {
        if let Some(previous) = self.selected.insert(id.category, id) {
            if previous != id {
                self.send(InputEvent::Es(EsEvent::Unselected(previous)));
            }
        }
        self.send(InputEvent::Es(EsEvent::Selected(id)));
    }

    fn select_title(&mut self, index: usize) {
        if index >= self.titles.len() {
            return;
        }
        self.title = index;
        self.chapter = 0;
        self.send(InputEvent::Title(TitleEvent::Selected(index)));
        self.send(InputEvent::Chapter { title: index, chapter: 0 });
    }

    fn select_chapter(&mut self, index: usize) {
        let Some(chapter) = self.titles[self.title].chapters.get(index) else {
            return;
        };
        let time_ms = chapter.time_ms;
        self.chapter = index;
        self.send(InputEvent::Chapter { title: self.title, chapter: index });
        self.seek_to(time_ms);
    }
}

fn apply(current: i64, delay: i64, whence: Whence) -> i64 {
    match whence {
        Whence::Absolute => delay,
        Whence::Relative => current + delay,
    }
}
