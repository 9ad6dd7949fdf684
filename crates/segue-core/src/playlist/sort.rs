//! Reordering the whole playlist: shuffle and multi-key sort.

use std::cmp::Ordering;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::{PlaylistItem, PlaylistState};
use crate::models::MediaMeta;
use crate::player::PlayerCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Title,
    Duration,
    Artist,
    Album,
    AlbumArtist,
    Genre,
    Date,
    TrackNumber,
    DiscNumber,
    Url,
    Rating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
    pub key: SortKey,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortCriterion {
    pub fn new(key: SortKey, order: SortOrder) -> Self {
        Self { key, order }
    }
}

/// One sortable field, extracted once per item.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Value {
    Text(String),
    Number(u64),
}

fn extract(key: SortKey, uri: &str, meta: &MediaMeta) -> Option<Value> {
    let text = |field: &Option<String>| field.as_deref().map(|s| Value::Text(s.to_lowercase()));
    match key {
        SortKey::Title => text(&meta.title),
        SortKey::Artist => text(&meta.artist),
        SortKey::Album => text(&meta.album),
        SortKey::AlbumArtist => text(&meta.album_artist),
        SortKey::Genre => text(&meta.genre),
        SortKey::Date => text(&meta.date),
        SortKey::Url => Some(Value::Text(uri.to_lowercase())),
        SortKey::Duration => meta.duration_ms.map(Value::Number),
        SortKey::TrackNumber => meta.track_number.map(|n| Value::Number(n.into())),
        SortKey::DiscNumber => meta.disc_number.map(|n| Value::Number(n.into())),
        SortKey::Rating => meta.rating.map(|n| Value::Number(n.into())),
    }
}

/// Missing values go last whatever the order.
fn compare(criteria: &[SortCriterion], a: &[Option<Value>], b: &[Option<Value>]) -> Ordering {
    for (criterion, (a, b)) in criteria.iter().zip(a.iter().zip(b)) {
        let ordering = match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => match criterion.order {
                SortOrder::Ascending => a.cmp(b),
                SortOrder::Descending => b.cmp(a),
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

impl PlaylistState {
    /// Physically shuffle the items. The current item keeps playing and
    /// stays current at its new index.
    pub(crate) fn shuffle(&mut self, player: &mut PlayerCore) {
        let current = self.current_item().cloned();
        self.items.shuffle(&mut self.rng);
        self.reset_keeping(player, current);
    }

    /// Stable sort by the given criteria, first one most significant.
    pub(crate) fn sort(&mut self, player: &mut PlayerCore, criteria: &[SortCriterion]) {
        if criteria.is_empty() {
            return;
        }
        let current = self.current_item().cloned();

        let mut keyed: Vec<(Vec<Option<Value>>, PlaylistItem)> = self
            .items
            .drain(..)
            .map(|item| {
                let meta = item.media().meta();
                let values = criteria
                    .iter()
                    .map(|criterion| extract(criterion.key, item.media().uri(), &meta))
                    .collect();
                (values, item)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| compare(criteria, a, b));
        self.items = keyed.into_iter().map(|(_, item)| item).collect();

        self.reset_keeping(player, current);
    }

    fn reset_keeping(&mut self, player: &mut PlayerCore, current: Option<PlaylistItem>) {
        let index = current.and_then(|item| self.index_of(&item));
        self.items_reset(index);
        self.invalidate_next_media(player);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(criteria: &[SortCriterion], uri: &str, meta: &MediaMeta) -> Vec<Option<Value>> {
        criteria.iter().map(|c| extract(c.key, uri, meta)).collect()
    }

    #[test]
    fn missing_values_sort_last_both_ways() {
        let with = MediaMeta { track_number: Some(3), ..MediaMeta::default() };
        let without = MediaMeta::default();
        for order in [SortOrder::Ascending, SortOrder::Descending] {
            let criteria = [SortCriterion::new(SortKey::TrackNumber, order)];
            let a = values(&criteria, "a", &with);
            let b = values(&criteria, "b", &without);
            assert_eq!(compare(&criteria, &a, &b), Ordering::Less);
        }
    }

    #[test]
    fn text_is_case_insensitive_and_later_keys_break_ties() {
        let criteria = [
            SortCriterion::new(SortKey::Artist, SortOrder::Ascending),
            SortCriterion::new(SortKey::Title, SortOrder::Descending),
        ];
        let a = MediaMeta { artist: Some("abba".into()), title: Some("Alpha".into()), ..MediaMeta::default() };
        let b = MediaMeta { artist: Some("ABBA".into()), title: Some("beta".into()), ..MediaMeta::default() };
        let (va, vb) = (values(&criteria, "x", &a), values(&criteria, "y", &b));
        assert_eq!(compare(&criteria, &va, &vb), Ordering::Greater);
    }

    #[test]
    fn criterion_order_defaults_to_ascending() {
        let c: SortCriterion = serde_json::from_str(r#"{"key":"album_artist"}"#).unwrap();
        assert_eq!(c, SortCriterion::new(SortKey::AlbumArtist, SortOrder::Ascending));
    }
}
