//! Listener registries for the player and the playlist.
//!
//! Callbacks run synchronously, under the shared lock, on whichever thread
//! caused the change. They only get event data, never a handle back into
//! the player, so they cannot re-enter it.

use std::sync::atomic::{AtomicU64, Ordering};

/// Returned by `add_listener`, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct Listeners<F: ?Sized> {
    entries: Vec<(ListenerId, Box<F>)>,
}

impl<F: ?Sized> Listeners<F> {
    pub(crate) fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub(crate) fn add(&mut self, listener: Box<F>) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn get_mut(&mut self, id: ListenerId) -> Option<&mut F> {
        self.entries
            .iter_mut()
            .find(|(entry, _)| *entry == id)
            .map(|(_, listener)| &mut **listener)
    }

    /// Listeners in registration order.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut F> {
        self.entries.iter_mut().map(|(_, listener)| &mut **listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Callback = dyn FnMut(&mut Vec<u32>) + Send;

    #[test]
    fn add_remove_and_order() {
        let mut listeners: Listeners<Callback> = Listeners::new();
        let a = listeners.add(Box::new(|out: &mut Vec<u32>| out.push(1)));
        let b = listeners.add(Box::new(|out: &mut Vec<u32>| out.push(2)));
        assert_ne!(a, b);

        let mut out = Vec::new();
        for listener in listeners.iter_mut() {
            listener(&mut out);
        }
        assert_eq!(out, vec![1, 2]);

        assert!(listeners.remove(a));
        assert!(!listeners.remove(a));
        assert_eq!(listeners.iter_mut().count(), 1);
        assert!(listeners.get_mut(b).is_some());
        assert!(listeners.get_mut(a).is_none());
    }
}
