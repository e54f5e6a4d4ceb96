//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::invariant;

/// Anything that can be placed on a [`Loader`]'s timeline.
pub trait Timestamped {
    fn tstamp(&self) -> i64;
}

struct Stream<T> {
    source: Box<dyn Iterator<Item = T>>,
    /// Next unread object from `source`, or `None` at end of stream.
    lookahead: Option<T>,
    /// Sliding window of objects within `timespan` of the current time.
    objs: Vec<T>,
    /// Index into `objs` of the first object not yet made "current".
    idx: usize,
    current: Option<T>,
    previous: Option<T>,
    active: Option<T>,
}

/// Synchronizes several timestamped streams (one per key `K`) against a
/// shared clock, keeping only the `timespan`-wide window of each stream
/// around the current time in memory.
///
/// Grounded on the `Loader` class used to drive the path-change
/// correlator over several per-destination measurement files in
/// parallel: every call here has a direct counterpart there
/// (`_fill`, `set_time`, `get_current`, `get_previous`, `get_active`,
/// `get_next`, `get_objects`, `forward`, `backward`, `pop_event`,
/// `iterate`).
pub struct Loader<K: Eq + std::hash::Hash + Ord + Clone, T: Timestamped + Clone> {
    timespan: i64,
    ctime: i64,
    streams: HashMap<K, Stream<T>>,
    keys: Vec<K>,
    event_heap: BinaryHeap<Reverse<(i64, K)>>,
}

impl<K: Eq + std::hash::Hash + Ord + Clone, T: Timestamped + Clone> Loader<K, T> {
    /// `sources` pairs each key with the stream of objects for it,
    /// already in ascending timestamp order.
    pub fn new<I>(timespan: i64, sources: Vec<(K, I)>) -> Loader<K, T>
    where
        I: Iterator<Item = T> + 'static,
    {
        let mut keys = Vec::with_capacity(sources.len());
        let mut streams = HashMap::with_capacity(sources.len());
        let mut ctime = 0i64;

        for (key, mut source) in sources {
            let lookahead = source.next();
            if let Some(obj) = &lookahead {
                ctime = ctime.max(obj.tstamp());
            }
            keys.push(key.clone());
            streams.insert(
                key,
                Stream {
                    source: Box::new(source),
                    lookahead,
                    objs: Vec::new(),
                    idx: 0,
                    current: None,
                    previous: None,
                    active: None,
                },
            );
        }

        let mut loader = Loader {
            timespan,
            ctime,
            streams,
            keys: keys.clone(),
            event_heap: BinaryHeap::new(),
        };
        for key in &keys {
            loader.fill(key);
        }
        for key in &keys {
            if let Some(obj) = loader.peek_next(key) {
                loader.event_heap.push(Reverse((obj.tstamp(), key.clone())));
            }
        }

        // Every stream must have at least one measurement by `ctime`
        // (the latest of every stream's first reading); streams whose
        // first reading came earlier need to be walked forward.
        let starttime = loader.ctime;
        loop {
            let stale = matches!(loader.event_heap.peek(), Some(Reverse((t, _))) if *t < starttime);
            if !stale {
                break;
            }
            loader.pop_event_raw();
        }

        loader
    }

    fn fill(&mut self, key: &K) {
        let timespan = self.timespan;
        let ctime = self.ctime;
        let stream = self
            .streams
            .get_mut(key)
            .unwrap_or_else(|| panic!("loader: unknown key"));

        while matches!(&stream.lookahead, Some(obj) if obj.tstamp() <= ctime + timespan) {
            let obj = stream.lookahead.take().unwrap();
            stream.objs.push(obj);
            stream.lookahead = stream.source.next();
        }

        if matches!(&stream.current, Some(cur) if cur.tstamp() < ctime) {
            stream.active = stream.current.clone();
        }

        while stream.idx < stream.objs.len() && stream.objs[stream.idx].tstamp() <= ctime {
            stream.previous = stream.current.take();
            stream.current = Some(stream.objs[stream.idx].clone());
            stream.idx += 1;
        }

        if matches!(&stream.current, Some(cur) if cur.tstamp() < ctime) {
            stream.active = stream.current.clone();
        }

        while matches!(stream.objs.first(), Some(obj) if obj.tstamp() <= ctime - timespan) {
            stream.objs.remove(0);
            stream.idx -= 1;
        }
    }

    fn peek_next(&self, key: &K) -> Option<&T> {
        let stream = &self.streams[key];
        if stream.objs.is_empty() && stream.lookahead.is_none() {
            None
        } else if stream.idx == stream.objs.len() {
            stream.lookahead.as_ref()
        } else {
            Some(&stream.objs[stream.idx])
        }
    }

    fn pop_event_raw(&mut self) -> Option<(i64, K)> {
        let Reverse((tstamp, key)) = self.event_heap.pop()?;
        self.ctime = tstamp;
        self.fill(&key);
        if let Some(obj) = self.peek_next(&key) {
            self.event_heap.push(Reverse((obj.tstamp(), key.clone())));
        }
        Some((tstamp, key))
    }

    /// Advances the clock to `tstamp`; callers must apply it via
    /// [`Loader::get_current`] or a sibling accessor before it takes
    /// effect.
    pub fn set_time(&mut self, tstamp: i64) {
        invariant!(tstamp >= self.ctime, "Loader::set_time: time must not go backwards");
        self.ctime = tstamp;
    }

    pub fn ctime(&self) -> i64 {
        self.ctime
    }

    /// All keys this loader was constructed with.
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    /// The object with the largest timestamp `<= ` the current time.
    pub fn get_current(&mut self, key: &K) -> Option<T> {
        self.fill(key);
        self.streams[key].current.clone()
    }

    /// The object observed immediately before [`Loader::get_current`].
    pub fn get_previous(&mut self, key: &K) -> Option<T> {
        self.fill(key);
        self.streams[key].previous.clone()
    }

    /// The object with the largest timestamp strictly less than the
    /// current time (unlike `get_current`, which allows equality).
    pub fn get_active(&mut self, key: &K) -> Option<T> {
        self.fill(key);
        self.streams[key].active.clone()
    }

    /// The first not-yet-current object, i.e. the next one `get_current`
    /// will return once the clock passes its timestamp.
    pub fn get_next(&mut self, key: &K) -> Option<T> {
        self.fill(key);
        self.peek_next(key).cloned()
    }

    /// All objects currently held in the `timespan`-wide window for
    /// `key`, in ascending timestamp order.
    pub fn get_objects(&mut self, key: &K) -> Vec<T> {
        self.fill(key);
        self.streams[key].objs.clone()
    }

    /// Buffered objects still ahead of the current position, oldest
    /// first.
    pub fn forward(&mut self, key: &K) -> Vec<T> {
        self.fill(key);
        let stream = &self.streams[key];
        stream.objs[stream.idx..].to_vec()
    }

    /// Buffered objects already consumed, most recent first.
    pub fn backward(&mut self, key: &K) -> Vec<T> {
        self.fill(key);
        let stream = &self.streams[key];
        let mut history = stream.objs[..stream.idx].to_vec();
        history.reverse();
        history
    }

    /// Pops the chronologically next event across all streams,
    /// returning `(tstamp, key, previous_object, new_current_object)`.
    pub fn pop_event(&mut self) -> Option<(i64, K, Option<T>, T)> {
        let (tstamp, key) = self.pop_event_raw()?;
        let stream = &self.streams[&key];
        let current = stream
            .current
            .clone()
            .unwrap_or_else(|| panic!("Loader::pop_event: current unset for key after fill"));
        let previous = stream.previous.clone();
        Some((tstamp, key, previous, current))
    }
}

impl<K: Eq + std::hash::Hash + Ord + Clone, T: Timestamped + Clone> Iterator for Loader<K, T> {
    type Item = (i64, K, Option<T>, T);

    fn next(&mut self) -> Option<Self::Item> {
        self.pop_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Tick(i64);

    impl Timestamped for Tick {
        fn tstamp(&self) -> i64 {
            self.0
        }
    }

    fn loader(a: Vec<i64>, b: Vec<i64>, timespan: i64) -> Loader<String, Tick> {
        Loader::new(
            timespan,
            vec![
                ("a".to_string(), a.into_iter().map(Tick).collect::<Vec<_>>().into_iter()),
                ("b".to_string(), b.into_iter().map(Tick).collect::<Vec<_>>().into_iter()),
            ],
        )
    }

    // Two streams, "a" with readings at 1,4,5,9 and "b" at 1,6,
    // timespan=2: exercises initial synchronization, the current/active
    // distinction, window growth and trimming, and clean exhaustion.
    #[test]
    fn synchronizes_two_streams_around_a_shared_clock() {
        let a = "a".to_string();
        let b = "b".to_string();
        let mut ldr = loader(vec![1, 4, 5, 9], vec![1, 6], 2);

        assert_eq!(ldr.ctime(), 1);
        assert_eq!(ldr.get_objects(&a).len(), 1);
        assert_eq!(ldr.get_objects(&b).len(), 1);
        assert_eq!(ldr.get_current(&a).unwrap().tstamp(), 1);
        assert_eq!(ldr.get_current(&b).unwrap().tstamp(), 1);
        assert!(ldr.get_active(&a).is_none());
        assert!(ldr.get_active(&b).is_none());
        assert_eq!(ldr.get_next(&a).unwrap().tstamp(), 4);
        assert_eq!(ldr.get_next(&b).unwrap().tstamp(), 6);

        let (tstamp, key, prev, obj) = ldr.pop_event().unwrap();
        assert_eq!(ldr.ctime(), 4);
        assert_eq!(tstamp, 4);
        assert_eq!(key, a);
        assert_eq!(prev.unwrap().tstamp(), 1);
        assert_eq!(obj.tstamp(), 4);
        assert_eq!(ldr.get_objects(&a).len(), 2); // [4, 5]: 1 trimmed out
        assert_eq!(ldr.get_current(&a).unwrap(), obj);
        assert_eq!(ldr.get_active(&a).unwrap().tstamp(), 1);
        assert_eq!(ldr.get_next(&a).unwrap().tstamp(), 5);
        // "b" has not been touched yet and still reflects ctime=1.
        assert_eq!(ldr.get_current(&b).unwrap().tstamp(), 1);
        assert_eq!(ldr.get_next(&b).unwrap().tstamp(), 6);

        let (tstamp, key, prev, obj) = ldr.pop_event().unwrap();
        assert_eq!(ldr.ctime(), 5);
        assert_eq!(key, a);
        assert_eq!(tstamp, 5);
        assert_eq!(prev.unwrap().tstamp(), 4);
        assert_eq!(obj.tstamp(), 5);
        assert_eq!(ldr.get_active(&a).unwrap().tstamp(), 4);

        let (tstamp, key, prev, obj) = ldr.pop_event().unwrap();
        assert_eq!(ldr.ctime(), 6);
        assert_eq!(key, b);
        assert_eq!(tstamp, 6);
        assert_eq!(prev.unwrap().tstamp(), 1);
        assert_eq!(obj.tstamp(), 6);
        assert_eq!(ldr.get_current(&b).unwrap().tstamp(), 6);
        assert_eq!(ldr.get_active(&b).unwrap().tstamp(), 1);
        assert!(ldr.get_next(&b).is_none(), "b's stream is exhausted");

        let (tstamp, key, prev, obj) = ldr.pop_event().unwrap();
        assert_eq!(ldr.ctime(), 9);
        assert_eq!(key, a);
        assert_eq!(tstamp, 9);
        assert_eq!(prev.unwrap().tstamp(), 5);
        assert_eq!(obj.tstamp(), 9);
        assert_eq!(ldr.get_active(&a).unwrap().tstamp(), 5);
        assert!(ldr.get_next(&a).is_none());

        assert!(ldr.pop_event().is_none(), "both streams exhausted");
    }

    #[test]
    fn set_time_rejects_moving_backwards() {
        let mut ldr = loader(vec![1, 2], vec![1], 1);
        ldr.set_time(5);
        assert_eq!(ldr.ctime(), 5);
    }

    #[test]
    #[should_panic(expected = "must not go backwards")]
    fn set_time_panics_when_going_backwards() {
        let mut ldr = loader(vec![1, 2], vec![1], 1);
        ldr.set_time(0);
    }

    // Two streams, "a" at 1,4,7 and "b" at 1,7, share a tstamp (7) once
    // both have advanced past their first reading: the tie must resolve
    // deterministically, "a" before "b", rather than by arrival order.
    #[test]
    fn ties_break_deterministically_by_key() {
        let a = "a".to_string();
        let b = "b".to_string();
        let mut ldr = loader(vec![1, 4, 7], vec![1, 7], 2);

        let (tstamp, key, _, _) = ldr.pop_event().unwrap();
        assert_eq!(tstamp, 4);
        assert_eq!(key, a);

        let (tstamp, key, _, _) = ldr.pop_event().unwrap();
        assert_eq!(tstamp, 7);
        assert_eq!(key, a);

        let (tstamp, key, _, _) = ldr.pop_event().unwrap();
        assert_eq!(tstamp, 7);
        assert_eq!(key, b);

        assert!(ldr.pop_event().is_none());
    }

    // The literal dataset from spec scenario 7: "a" at 1,2,3,6,7,8 and "b"
    // at 1,7, timespan=2. Pops in order 2,3,6,7a,7b,8 with ctime monotonic;
    // at ctime=6, "b" still reports its tstamp=1 reading as current and its
    // tstamp=7 reading as next.
    #[test]
    fn reproduces_scenario_seven_two_stream_synchronization() {
        let a = "a".to_string();
        let b = "b".to_string();
        let mut ldr = loader(vec![1, 2, 3, 6, 7, 8], vec![1, 7], 2);

        assert_eq!(ldr.ctime(), 1);
        assert_eq!(ldr.get_current(&a).unwrap().tstamp(), 1);
        assert_eq!(ldr.get_current(&b).unwrap().tstamp(), 1);

        let mut last_ctime = ldr.ctime();
        for expected in [2i64, 3, 6] {
            let (tstamp, key, _, obj) = ldr.pop_event().unwrap();
            assert_eq!(tstamp, expected);
            assert_eq!(key, a);
            assert_eq!(obj.tstamp(), expected);
            assert!(ldr.ctime() >= last_ctime);
            last_ctime = ldr.ctime();
        }
        assert_eq!(ldr.ctime(), 6);

        // "b" has had no reading of its own pop since tstamp 1: its current
        // observation is still that one, and its next pending one is at 7.
        assert_eq!(ldr.get_current(&b).unwrap().tstamp(), 1);
        assert_eq!(ldr.get_next(&b).unwrap().tstamp(), 7);

        // Both streams have a pending event at tstamp 7; the tie resolves
        // deterministically by key, "a" before "b".
        let (tstamp, key, _, _) = ldr.pop_event().unwrap();
        assert_eq!(tstamp, 7);
        assert_eq!(key, a);
        assert!(ldr.ctime() >= last_ctime);
        last_ctime = ldr.ctime();

        let (tstamp, key, _, _) = ldr.pop_event().unwrap();
        assert_eq!(tstamp, 7);
        assert_eq!(key, b);
        assert!(ldr.ctime() >= last_ctime);
        last_ctime = ldr.ctime();

        let (tstamp, key, _, _) = ldr.pop_event().unwrap();
        assert_eq!(tstamp, 8);
        assert_eq!(key, a);
        assert_eq!(ldr.ctime(), 8);
        assert!(ldr.ctime() >= last_ctime);

        assert!(ldr.pop_event().is_none());
    }
}
