use std::collections::vec_deque::{Iter, VecDeque};
use crate::track::Track;

/// The pending tracks of a guild, plus the one playing and the one before it.
///
/// `current` is never part of the pending sequence: it leaves the sequence
/// when it starts playing.
#[derive(Clone, Debug, Default)]
pub struct Queue {
    tracks: VecDeque<Track>,
    pub current: Option<Track>,
    pub previous: Option<Track>,
}

impl Queue {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a track to the back of the queue.
    pub fn push(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    /// Prepends a track, making it the next one to play.
    pub fn unshift(&mut self, track: Track) {
        self.tracks.push_front(track);
    }

    /// Removes and returns the next track.
    pub fn shift(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    /// Removes and returns the last track.
    pub fn pop(&mut self) -> Option<Track> {
        self.tracks.pop_back()
    }

    pub fn remove(&mut self, index: usize) -> Option<Track> {
        self.tracks.remove(index)
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn first(&self) -> Option<&Track> {
        self.tracks.front()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn iter(&self) -> Iter<'_, Track> {
        self.tracks.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Total length of the pending tracks in milliseconds.
    pub fn duration(&self) -> u64 {
        self.tracks.iter().map(Track::length).sum()
    }
}

impl Extend<Track> for Queue {
    fn extend<I: IntoIterator<Item = Track>>(&mut self, iter: I) {
        self.tracks.extend(iter);
    }
}

impl<'a> IntoIterator for &'a Queue {
    type Item = &'a Track;
    type IntoIter = Iter<'a, Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackInfo;

    fn track(id: &str, length: u64) -> Track {
        let info = TrackInfo {
            identifier: id.to_owned(),
            length,
            ..TrackInfo::default()
        };

        Track::new(id, info, None)
    }

    #[test]
    fn shift_and_unshift_work_on_the_front() {
        let mut queue = Queue::new();
        queue.push(track("a", 1));
        queue.push(track("b", 1));
        queue.unshift(track("c", 1));

        assert_eq!(queue.shift().unwrap().info.identifier, "c");
        assert_eq!(queue.pop().unwrap().info.identifier, "b");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn duration_ignores_current() {
        let mut queue = Queue::new();
        queue.extend(vec![track("a", 1000), track("b", 2500)]);
        queue.current = Some(track("c", 9000));

        assert_eq!(queue.duration(), 3500);
    }
}
