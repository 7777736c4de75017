//! Snapshot interpolation for remote entities.
//!
//! Samples are stamped with their local arrival time and rendered a fixed
//! delay in the past, so under steady traffic there are two samples
//! bracketing the render time. Sampling is a pure function of the buffer and
//! `now`; nothing here owns a timer.

use presence_shared::{Euler, SessionId, Vector3};
use std::collections::{HashMap, VecDeque};

/// Values that can be blended between two samples.
pub trait Interpolate: Copy {
    /// Blend towards `target`; `alpha` runs from 0 (self) to 1 (target)
    fn interpolate(self, target: Self, alpha: f32) -> Self;
}

impl Interpolate for Vector3 {
    fn interpolate(self, target: Self, alpha: f32) -> Self {
        self.lerp(target, alpha)
    }
}

impl Interpolate for Euler {
    fn interpolate(self, target: Self, alpha: f32) -> Self {
        // Shortest arc on every axis
        self.lerp(target, alpha)
    }
}

/// A position/rotation pair, interpolated together.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vector3,
    pub rotation: Euler,
}

impl Interpolate for Transform {
    fn interpolate(self, target: Self, alpha: f32) -> Self {
        Self {
            position: self.position.interpolate(target.position, alpha),
            rotation: self.rotation.interpolate(target.rotation, alpha),
        }
    }
}

/// Time-ordered samples of one value, rendered `delay_ms` behind arrival
#[derive(Debug, Clone)]
pub struct InterpolationBuffer<T> {
    samples: VecDeque<(u64, T)>,
    delay_ms: u64,
    max_samples: usize,
}

impl<T: Interpolate> InterpolationBuffer<T> {
    /// Creates an empty buffer.
    ///
    /// # Arguments
    /// * `delay_ms` - How far behind the newest arrival rendering runs
    /// * `max_samples` - Upper bound on buffered samples, at least two
    pub fn new(delay_ms: u64, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            delay_ms,
            max_samples: max_samples.max(2),
        }
    }

    /// Records a sample that arrived at `arrival_ms`.
    ///
    /// Out-of-order arrival stamps are clamped to the newest one so the
    /// buffer stays sorted.
    pub fn push(&mut self, arrival_ms: u64, value: T) {
        let arrival_ms = match self.samples.back() {
            Some((last, _)) => arrival_ms.max(*last),
            None => arrival_ms,
        };
        self.samples.push_back((arrival_ms, value));

        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        self.prune(arrival_ms.saturating_sub(self.delay_ms));
    }

    /// Drops everything older than the newest sample at or behind `render_time`.
    fn prune(&mut self, render_time: u64) {
        while self.samples.len() > 1 && self.samples[1].0 <= render_time {
            self.samples.pop_front();
        }
    }

    /// Value to display at `now`, or `fallback` when nothing has arrived yet.
    pub fn sample(&self, now: u64, fallback: T) -> T {
        let render_time = now.saturating_sub(self.delay_ms);

        let mut before: Option<&(u64, T)> = None;
        let mut after: Option<&(u64, T)> = None;
        for entry in &self.samples {
            if entry.0 <= render_time {
                before = Some(entry);
            } else {
                after = Some(entry);
                break;
            }
        }

        match (before, after) {
            (Some(&(t1, from)), Some(&(t2, to))) => {
                let alpha = if t2 > t1 {
                    ((render_time - t1) as f32 / (t2 - t1) as f32).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                from.interpolate(to, alpha)
            }
            // Samples stopped: settle on the last target
            (Some(&(_, last)), None) => last,
            // Render time is still before the first sample
            (None, Some(&(_, first))) => first,
            (None, None) => fallback,
        }
    }

    /// Newest sample, ignoring the render delay
    pub fn latest(&self) -> Option<T> {
        self.samples.back().map(|(_, value)| *value)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// One buffer per remote session.
#[derive(Debug, Clone)]
pub struct InterpolationSet {
    buffers: HashMap<SessionId, InterpolationBuffer<Transform>>,
    delay_ms: u64,
    max_samples: usize,
}

impl InterpolationSet {
    pub fn new(delay_ms: u64, max_samples: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            delay_ms,
            max_samples,
        }
    }

    /// Adds a transform for `session_id`, creating its buffer on first use
    pub fn record(&mut self, session_id: &SessionId, arrival_ms: u64, transform: Transform) {
        let (delay_ms, max_samples) = (self.delay_ms, self.max_samples);
        self.buffers
            .entry(session_id.clone())
            .or_insert_with(|| InterpolationBuffer::new(delay_ms, max_samples))
            .push(arrival_ms, transform);
    }

    /// Smoothed transform for `session_id` at `now`.
    ///
    /// Peers without samples yet render at `fallback`.
    pub fn sample(&self, session_id: &SessionId, now: u64, fallback: Transform) -> Transform {
        match self.buffers.get(session_id) {
            Some(buffer) => buffer.sample(now, fallback),
            None => fallback,
        }
    }

    /// Forgets a departed peer
    pub fn remove(&mut self, session_id: &SessionId) {
        self.buffers.remove(session_id);
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
