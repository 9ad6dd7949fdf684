//! Per-input bookkeeping.
//!
//! A `PlayerInput` is everything the player knows about one input: its
//! handle, its own state, and the last values it reported. Applying an
//! event updates those values and yields the listener events to fire; the
//! player decides when to fire them.

use crate::input::{
    Capabilities, EsEvent, EsId, Input, InputStats, Program, ProgramEvent, Signal, Title, TitleEvent,
    Track, TrackCategory, VoutAction,
};
use crate::models::Media;

use super::{ListAction, PlayerEvent, PlayerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct InputId(pub(crate) u64);

pub(crate) struct PlayerInput {
    pub(crate) id: InputId,
    pub(crate) handle: Box<dyn Input>,
    pub(crate) media: Media,
    pub(crate) started: bool,
    pub(crate) state: PlayerState,
    pub(crate) caps: Capabilities,
    pub(crate) rate: f32,
    pub(crate) length_ms: u64,
    pub(crate) time_ms: u64,
    pub(crate) position: f32,
    pub(crate) cache: f32,
    pub(crate) discontinuity: bool,
    pub(crate) recording: bool,
    pub(crate) signal: Signal,
    pub(crate) stats: InputStats,
    pub(crate) audio_delay_ms: i64,
    pub(crate) subtitle_delay_ms: i64,
    pub(crate) video: Vec<Track>,
    pub(crate) audio: Vec<Track>,
    pub(crate) spu: Vec<Track>,
    pub(crate) programs: Vec<Program>,
    pub(crate) titles: Vec<Title>,
    pub(crate) title_selected: Option<usize>,
    pub(crate) chapter_selected: Option<usize>,
    pub(crate) vout_count: usize,
}

impl PlayerInput {
    pub(crate) fn new(id: InputId, handle: Box<dyn Input>, media: Media) -> Self {
        Self {
            id,
            handle,
            media,
            started: false,
            state: PlayerState::Stopped,
            caps: Capabilities::NONE,
            rate: 1.0,
            length_ms: 0,
            time_ms: 0,
            position: 0.0,
            cache: 0.0,
            discontinuity: false,
            recording: false,
            signal: Signal::default(),
            stats: InputStats::default(),
            audio_delay_ms: 0,
            subtitle_delay_ms: 0,
            video: Vec::new(),
            audio: Vec::new(),
            spu: Vec::new(),
            programs: Vec::new(),
            titles: Vec::new(),
            title_selected: None,
            chapter_selected: None,
            vout_count: 0,
        }
    }

    /// Backing vector of a track category; `None` for categories the player
    /// does not list (unknown, data).
    pub(crate) fn tracks(&self, category: TrackCategory) -> Option<&Vec<Track>> {
        match category {
            TrackCategory::Video => Some(&self.video),
            TrackCategory::Audio => Some(&self.audio),
            TrackCategory::Spu => Some(&self.spu),
            TrackCategory::Unknown | TrackCategory::Data => None,
        }
    }

    fn tracks_mut(&mut self, category: TrackCategory) -> Option<&mut Vec<Track>> {
        match category {
            TrackCategory::Video => Some(&mut self.video),
            TrackCategory::Audio => Some(&mut self.audio),
            TrackCategory::Spu => Some(&mut self.spu),
            TrackCategory::Unknown | TrackCategory::Data => None,
        }
    }

    pub(crate) fn track_count(&self, category: TrackCategory) -> usize {
        self.tracks(category).map_or(0, Vec::len)
    }

    pub(crate) fn find_track(&self, id: EsId) -> Option<&Track> {
        self.tracks(id.category)?.iter().find(|t| t.id == id)
    }

    pub(crate) fn apply_es(&mut self, event: EsEvent) -> Option<PlayerEvent> {
        let category = match &event {
            EsEvent::Added(track) | EsEvent::Updated(track) => track.id.category,
            EsEvent::Deleted(id) | EsEvent::Selected(id) | EsEvent::Unselected(id) => id.category,
        };
        let tracks = self.tracks_mut(category)?;

        match event {
            EsEvent::Added(track) => {
                tracks.push(track.clone());
                Some(PlayerEvent::TrackListChanged { action: ListAction::Added, track })
            }
            EsEvent::Deleted(id) => {
                let index = tracks.iter().position(|t| t.id == id)?;
                let track = tracks.remove(index);
                Some(PlayerEvent::TrackListChanged { action: ListAction::Removed, track })
            }
            EsEvent::Updated(update) => {
                let track = tracks.iter_mut().find(|t| t.id == update.id)?;
                track.name = update.name;
                track.language = update.language;
                Some(PlayerEvent::TrackListChanged { action: ListAction::Updated, track: track.clone() })
            }
            EsEvent::Selected(id) => {
                let track = tracks.iter_mut().find(|t| t.id == id)?;
                track.selected = true;
                Some(PlayerEvent::TrackSelectionChanged { unselected: None, selected: Some(id) })
            }
            EsEvent::Unselected(id) => {
                let track = tracks.iter_mut().find(|t| t.id == id)?;
                track.selected = false;
                Some(PlayerEvent::TrackSelectionChanged { unselected: Some(id), selected: None })
            }
        }
    }

    pub(crate) fn apply_program(&mut self, event: ProgramEvent) -> Option<PlayerEvent> {
        let programs = &mut self.programs;
        match event {
            ProgramEvent::Added { id, name } => {
                let program = Program { id, name, selected: false, scrambled: false };
                programs.push(program.clone());
                Some(PlayerEvent::ProgramListChanged { action: ListAction::Added, program })
            }
            ProgramEvent::Deleted(id) => {
                let index = programs.iter().position(|p| p.id == id)?;
                let program = programs.remove(index);
                Some(PlayerEvent::ProgramListChanged { action: ListAction::Removed, program })
            }
            ProgramEvent::Updated { id, name } => {
                let program = programs.iter_mut().find(|p| p.id == id)?;
                program.name = name;
                Some(PlayerEvent::ProgramListChanged { action: ListAction::Updated, program: program.clone() })
            }
            ProgramEvent::Scrambled { id, scrambled } => {
                let program = programs.iter_mut().find(|p| p.id == id)?;
                program.scrambled = scrambled;
                Some(PlayerEvent::ProgramListChanged { action: ListAction::Updated, program: program.clone() })
            }
            ProgramEvent::Selected(id) => {
                let mut unselected = None;
                let mut selected = None;
                for program in programs.iter_mut() {
                    if program.id == id {
                        if !program.selected {
                            program.selected = true;
                            selected = Some(id);
                        }
                    } else if program.selected {
                        program.selected = false;
                        unselected = Some(program.id);
                    }
                }
                if unselected.is_none() && selected.is_none() {
                    return None;
                }
                Some(PlayerEvent::ProgramSelectionChanged { unselected, selected })
            }
        }
    }

    pub(crate) fn apply_title(&mut self, event: TitleEvent) -> Vec<PlayerEvent> {
        match event {
            TitleEvent::NewList(titles) => {
                self.titles = titles;
                let mut events = vec![PlayerEvent::TitleListChanged(self.titles.clone())];
                if let Some(first) = self.titles.first() {
                    self.title_selected = Some(0);
                    self.chapter_selected = Some(0);
                    events.push(PlayerEvent::TitleSelectionChanged { index: 0, title: first.clone() });
                } else {
                    self.title_selected = None;
                    self.chapter_selected = None;
                }
                events
            }
            TitleEvent::Selected(index) => match self.titles.get(index) {
                Some(title) => {
                    self.title_selected = Some(index);
                    vec![PlayerEvent::TitleSelectionChanged { index, title: title.clone() }]
                }
                None => Vec::new(),
            },
        }
    }

    pub(crate) fn apply_chapter(&mut self, title: usize, chapter: usize) -> Option<PlayerEvent> {
        let entry = self.titles.get(title)?;
        if chapter >= entry.chapters.len() {
            return None;
        }
        self.title_selected = Some(title);
        self.chapter_selected = Some(chapter);
        Some(PlayerEvent::ChapterSelectionChanged { title, chapter })
    }

    pub(crate) fn apply_vout(&mut self, action: VoutAction) -> PlayerEvent {
        match action {
            VoutAction::Added => self.vout_count += 1,
            VoutAction::Removed => self.vout_count = self.vout_count.saturating_sub(1),
        }
        PlayerEvent::VoutChanged { action, count: self.vout_count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InputError;
    use crate::input::{Chapter, InputControl};

    struct Inert;

    impl Input for Inert {
        fn start(&mut self) -> Result<(), InputError> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn close(self: Box<Self>) {}
        fn control(&mut self, _: InputControl) {}
    }

    fn input() -> PlayerInput {
        PlayerInput::new(InputId(1), Box::new(Inert), Media::new("test://"))
    }

    fn track(id: i32, category: TrackCategory) -> Track {
        Track { id: EsId { id, category }, name: format!("track {}", id), language: None, selected: false }
    }

    #[test]
    fn track_count_reports_vector_size() {
        let mut input = input();
        input.apply_es(EsEvent::Added(track(0, TrackCategory::Video)));
        input.apply_es(EsEvent::Added(track(1, TrackCategory::Audio)));
        input.apply_es(EsEvent::Added(track(2, TrackCategory::Audio)));

        assert_eq!(input.track_count(TrackCategory::Video), 1);
        assert_eq!(input.track_count(TrackCategory::Audio), 2);
        assert_eq!(input.track_count(TrackCategory::Spu), 0);
        assert_eq!(input.track_count(TrackCategory::Data), 0);
        assert_eq!(input.track_count(TrackCategory::Unknown), 0);
    }

    #[test]
    fn unsupported_category_events_are_dropped() {
        let mut input = input();
        assert!(input.apply_es(EsEvent::Added(track(9, TrackCategory::Data))).is_none());
        assert_eq!(input.track_count(TrackCategory::Data), 0);
    }

    #[test]
    fn es_selection_and_removal() {
        let mut input = input();
        let id = EsId { id: 3, category: TrackCategory::Spu };
        input.apply_es(EsEvent::Added(track(3, TrackCategory::Spu)));

        let event = input.apply_es(EsEvent::Selected(id));
        assert!(matches!(event, Some(PlayerEvent::TrackSelectionChanged { selected: Some(s), .. }) if s == id));
        assert!(input.find_track(id).unwrap().selected);

        let event = input.apply_es(EsEvent::Deleted(id));
        assert!(matches!(event, Some(PlayerEvent::TrackListChanged { action: ListAction::Removed, .. })));
        assert!(input.find_track(id).is_none());
        assert!(input.apply_es(EsEvent::Selected(id)).is_none());
    }

    #[test]
    fn program_selection_reports_both_sides() {
        let mut input = input();
        input.apply_program(ProgramEvent::Added { id: 1, name: "one".into() });
        input.apply_program(ProgramEvent::Added { id: 2, name: "two".into() });
        input.apply_program(ProgramEvent::Selected(1));

        let event = input.apply_program(ProgramEvent::Selected(2));
        assert!(matches!(
            event,
            Some(PlayerEvent::ProgramSelectionChanged { unselected: Some(1), selected: Some(2) })
        ));
        assert!(input.apply_program(ProgramEvent::Selected(2)).is_none());
    }

    #[test]
    fn title_list_selects_first_and_validates_chapters() {
        let mut input = input();
        let titles = vec![Title {
            name: "Main".into(),
            length_ms: 1000,
            chapters: vec![Chapter { name: "a".into(), time_ms: 0 }, Chapter { name: "b".into(), time_ms: 500 }],
        }];
        let events = input.apply_title(TitleEvent::NewList(titles));
        assert_eq!(events.len(), 2);
        assert_eq!(input.title_selected, Some(0));

        assert!(input.apply_chapter(0, 1).is_some());
        assert_eq!(input.chapter_selected, Some(1));
        assert!(input.apply_chapter(0, 5).is_none());
        assert!(input.apply_chapter(3, 0).is_none());
        assert!(input.apply_title(TitleEvent::Selected(4)).is_empty());
    }

    #[test]
    fn vout_count_never_underflows() {
        let mut input = input();
        input.apply_vout(VoutAction::Removed);
        assert_eq!(input.vout_count, 0);
        input.apply_vout(VoutAction::Added);
        input.apply_vout(VoutAction::Added);
        assert!(matches!(input.apply_vout(VoutAction::Removed), PlayerEvent::VoutChanged { count: 1, .. }));
    }
}
