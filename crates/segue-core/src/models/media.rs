//! Media handles.
//!
//! A `Media` is an externally owned, reference-counted handle. The core
//! holds it (clone), releases it (drop) and compares identity; it never
//! looks inside except to sort and to display a title.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Descriptive metadata attached to a media, filled by the preparser or
/// by whoever creates the handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaMeta {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub duration_ms: Option<u64>,
    pub rating: Option<u8>,
}

impl MediaMeta {
    /// Overwrite every field `other` knows about, keep the rest.
    pub fn merge(&mut self, other: MediaMeta) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(title, artist, album, album_artist, genre, date, track_number, disc_number, duration_ms, rating);
    }
}

struct MediaInner {
    uri: String,
    meta: RwLock<MediaMeta>,
}

/// Shared handle to one media resource. Cloning holds, dropping releases.
#[derive(Clone)]
pub struct Media(Arc<MediaInner>);

impl Media {
    pub fn new(uri: impl Into<String>) -> Self {
        Self::with_meta(uri, MediaMeta::default())
    }

    pub fn with_meta(uri: impl Into<String>, meta: MediaMeta) -> Self {
        Media(Arc::new(MediaInner {
            uri: uri.into(),
            meta: RwLock::new(meta),
        }))
    }

    pub fn uri(&self) -> &str {
        &self.0.uri
    }

    /// Snapshot of the current metadata.
    pub fn meta(&self) -> MediaMeta {
        self.0.meta.read().clone()
    }

    pub fn update_meta(&self, f: impl FnOnce(&mut MediaMeta)) {
        f(&mut self.0.meta.write());
    }

    /// Title if known, URI otherwise.
    pub fn display_name(&self) -> String {
        self.0
            .meta
            .read()
            .title
            .clone()
            .unwrap_or_else(|| self.0.uri.clone())
    }

    pub fn ptr_eq(&self, other: &Media) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Media {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Media {}

impl fmt::Debug for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Media").field(&self.0.uri).finish()
    }
}

/// A media together with the sub-items it resolved into (a playlist file,
/// a directory, a disc).
#[derive(Debug, Clone)]
pub struct MediaNode {
    pub media: Media,
    pub children: Vec<MediaNode>,
}

impl MediaNode {
    pub fn new(media: Media) -> Self {
        Self { media, children: Vec::new() }
    }

    pub fn with_children(media: Media, children: Vec<MediaNode>) -> Self {
        Self { media, children }
    }

    /// Descendants in depth-first pre-order, excluding the node itself.
    pub fn flatten(&self) -> Vec<Media> {
        let mut out = Vec::new();
        for child in &self.children {
            child.collect_into(&mut out);
        }
        out
    }

    fn collect_into(&self, out: &mut Vec<Media>) {
        out.push(self.media.clone());
        for child in &self.children {
            child.collect_into(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_not_uri() {
        let a = Media::new("file:///a.flac");
        let b = Media::new("file:///a.flac");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn flatten_is_depth_first() {
        let leaf = |name: &str| MediaNode::new(Media::new(name));
        let node = MediaNode::with_children(
            Media::new("root"),
            vec![
                leaf("a"),
                MediaNode::with_children(Media::new("b"), vec![leaf("b1"), leaf("b2")]),
                leaf("c"),
            ],
        );
        let uris: Vec<_> = node.flatten().iter().map(|m| m.uri().to_string()).collect();
        assert_eq!(uris, vec!["a", "b", "b1", "b2", "c"]);
    }

    #[test]
    fn merge_keeps_unknown_fields() {
        let media = Media::with_meta(
            "x",
            MediaMeta { title: Some("Old".into()), artist: Some("Band".into()), ..Default::default() },
        );
        media.update_meta(|m| {
            m.merge(MediaMeta { title: Some("New".into()), duration_ms: Some(1000), ..Default::default() })
        });
        let meta = media.meta();
        assert_eq!(meta.title.as_deref(), Some("New"));
        assert_eq!(meta.artist.as_deref(), Some("Band"));
        assert_eq!(meta.duration_ms, Some(1000));
        assert_eq!(media.display_name(), "New");
    }
}
