//! The input interface: what the player needs from a per-media worker.
//!
//! An input owns one thread that opens, demuxes and renders a media. The
//! player never looks inside; it drives the input through [`Input`] and
//! learns everything from the ordered [`InputEvent`] stream the input pushes
//! into its [`EventSink`].
//!
//! Contract for implementors:
//! - events are sent only from the input's own thread, never from inside
//!   `start`/`stop`/`control` (those run with the player lock held, and
//!   delivery takes that same lock);
//! - `Dead` is the last event, sent once the thread is about to exit;
//! - `close` joins the thread and may block.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::models::{Media, MediaNode};

#[cfg(feature = "sim")]
pub mod sim;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Bitmask of what the current input supports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const SEEK: Self = Self(1 << 0);
    pub const PAUSE: Self = Self(1 << 1);
    pub const CHANGE_RATE: Self = Self(1 << 2);
    pub const REWIND: Self = Self(1 << 3);
    pub const RECORD: Self = Self(1 << 4);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::SEEK, "seek"),
        (Self::PAUSE, "pause"),
        (Self::CHANGE_RATE, "change_rate"),
        (Self::REWIND, "rewind"),
        (Self::RECORD, "record"),
    ];

    pub const fn all() -> Self {
        Self(0b1_1111)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::all().0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capabilities({})", self)
    }
}

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// Input thread state as reported by the input itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    Opening,
    Playing,
    Paused,
    End,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackCategory {
    Unknown,
    Video,
    Audio,
    Spu,
    Data,
}

/// Elementary stream id, unique within one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EsId {
    pub id: i32,
    pub category: TrackCategory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: EsId,
    pub name: String,
    pub language: Option<String>,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EsEvent {
    Added(Track),
    Deleted(EsId),
    Updated(Track),
    Selected(EsId),
    Unselected(EsId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub id: i32,
    pub name: String,
    pub selected: bool,
    pub scrambled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgramEvent {
    Added { id: i32, name: String },
    Deleted(i32),
    Updated { id: i32, name: String },
    Scrambled { id: i32, scrambled: bool },
    Selected(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub name: String,
    pub time_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Title {
    pub name: String,
    pub length_ms: u64,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TitleEvent {
    NewList(Vec<Title>),
    Selected(usize),
}

/// Counters reported periodically by the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct InputStats {
    pub read_bytes: u64,
    pub input_bitrate: f32,
    pub demux_read_bytes: u64,
    pub demux_bitrate: f32,
    pub demux_corrupted: u64,
    pub demux_discontinuity: u64,
    pub decoded_audio: u64,
    pub decoded_video: u64,
    pub displayed_pictures: u64,
    pub lost_pictures: u64,
    pub played_abuffers: u64,
    pub lost_abuffers: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Signal {
    pub quality: f32,
    pub strength: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoutAction {
    Added,
    Removed,
}

/// One event of the ordered stream an input delivers to the player.
#[derive(Debug, Clone)]
pub enum InputEvent {
    State(InputState),
    Rate(f32),
    Capabilities(Capabilities),
    Position { time_ms: u64, position: f32 },
    Length(u64),
    Program(ProgramEvent),
    Es(EsEvent),
    Title(TitleEvent),
    Chapter { title: usize, chapter: usize },
    Record(bool),
    Statistics(InputStats),
    Signal(Signal),
    AudioDelay(i64),
    SubtitleDelay(i64),
    /// Buffer fill level in [0, 1].
    Cache(f32),
    Vout { action: VoutAction, id: u32 },
    SubItems(MediaNode),
    Dead,
}

// ---------------------------------------------------------------------------
// Controls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekSpeed {
    #[default]
    Precise,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Whence {
    #[default]
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigateAction {
    Activate,
    Up,
    Down,
    Left,
    Right,
    Popup,
    Menu,
}

/// Where the output goes when not rendered locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renderer {
    pub name: String,
    pub address: String,
}

/// Asynchronous request pushed to the input thread. The outcome, if any,
/// comes back as events.
#[derive(Debug, Clone, PartialEq)]
pub enum InputControl {
    Pause,
    Play,
    SetRate(f32),
    SeekTime { time_ms: i64, speed: SeekSpeed, whence: Whence },
    SeekPosition { position: f32, speed: SeekSpeed, whence: Whence },
    SelectProgram(i32),
    SelectEs(EsId),
    UnselectEs(EsId),
    RestartEs(EsId),
    SelectTitle(usize),
    NextTitle,
    PrevTitle,
    SelectChapter(usize),
    NextChapter,
    PrevChapter,
    SetAudioDelay { delay_ms: i64, whence: Whence },
    SetSubtitleDelay { delay_ms: i64, whence: Whence },
    SetRecording(bool),
    Navigate(NavigateAction),
    SetRenderer(Option<Renderer>),
    /// Attach an external audio or subtitle file. With `check_ext`, files
    /// whose extension does not fit the category are ignored.
    AddAssociatedMedia { category: TrackCategory, uri: String, select: bool, check_ext: bool },
    /// Select the first track of `category` in `language`.
    SelectDefaultTrack { category: TrackCategory, language: String },
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Handle on a running per-media worker.
pub trait Input: Send {
    /// Spawn the input thread. Events start flowing after this returns.
    fn start(&mut self) -> Result<(), InputError>;

    /// Ask the thread to wind down. Non-blocking; `Dead` follows.
    fn stop(&mut self);

    /// Release the input, joining its thread. May block.
    fn close(self: Box<Self>);

    fn control(&mut self, control: InputControl);
}

/// Builds inputs for media. Shared by the player for its whole life.
pub trait InputFactory: Send + Sync {
    fn create(
        &self,
        media: &Media,
        events: EventSink,
        renderer: Option<&Renderer>,
    ) -> Result<Box<dyn Input>, InputError>;
}

/// Where an input pushes its events. Sending after the player is gone is a
/// silent no-op.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(InputEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new(deliver: impl Fn(InputEvent) + Send + Sync + 'static) -> Self {
        Self { deliver: Arc::new(deliver) }
    }

    pub fn send(&self, event: InputEvent) {
        (self.deliver)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}
