// Bounded, time-indexed series with running max, plus the rate-of-change wrapper

use std::collections::{HashMap, VecDeque};

/// Extra slots kept beyond the visible window so the leftmost segment can scroll in.
const CAPACITY_SLACK: usize = 3;

/// Smallest running max; keeps `max_y` at 1 or above.
const MAX_FLOOR: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub value: f64,
    pub time: u64,
}

/// Number of points a series keeps for a `duration` window at one point per `interval`.
pub fn capacity_for(duration: u64, interval: u64) -> usize {
    let steps = if interval == 0 {
        0
    } else {
        duration.div_ceil(interval)
    };
    steps as usize + CAPACITY_SLACK
}

/// Fixed-capacity ring of `(value, time)` ordered oldest to newest.
///
/// Every appended point gets the next absolute index; the newest point's index is
/// [`MetricSeries::index`]. Writing an already present timestamp replaces its value in place and
/// neither appends nor evicts.
#[derive(Debug, Clone)]
pub struct MetricSeries {
    points: VecDeque<Point>,
    /// time -> absolute index of the point holding it.
    by_time: HashMap<u64, u64>,
    capacity: usize,
    interval: u64,
    max: f64,
    index: u64,
}

impl MetricSeries {
    pub fn new(duration: u64, interval: u64) -> Self {
        Self {
            points: VecDeque::new(),
            by_time: HashMap::new(),
            capacity: capacity_for(duration, interval),
            interval,
            max: MAX_FLOOR,
            index: 0,
        }
    }

    /// Adapts to a new window. A changed `interval` drops all data; otherwise the oldest points
    /// beyond the new capacity are trimmed.
    pub fn reset(&mut self, duration: u64, interval: u64) {
        self.capacity = capacity_for(duration, interval);
        if interval != self.interval {
            self.interval = interval;
            self.clear();
            return;
        }
        if self.points.len() > self.capacity {
            while self.points.len() > self.capacity {
                self.evict_oldest();
            }
            self.max = self.rescan_max();
        }
    }

    pub fn push(&mut self, time: u64, value: f64) {
        if let Some(&seq) = self.by_time.get(&time) {
            let position = self.position_of(seq);
            if let Some(point) = self.points.get_mut(position) {
                let replaced = point.value;
                point.value = value;
                if value >= self.max {
                    self.max = value;
                } else if replaced == self.max {
                    self.max = self.rescan_max();
                }
            }
            return;
        }

        let mut rescan = false;
        while self.points.len() >= self.capacity.max(1) {
            let evicted = self.evict_oldest();
            rescan |= evicted.is_some_and(|p| p.value == self.max);
        }
        self.index += 1;
        self.points.push_back(Point { value, time });
        self.by_time.insert(time, self.index);
        if rescan {
            self.max = self.rescan_max();
        } else {
            self.max = self.max.max(value);
        }
    }

    /// Replaces all data, keeping the newest `capacity` distinct timestamps.
    pub fn set_data(&mut self, points: impl IntoIterator<Item = Point>) {
        self.clear();
        for point in points {
            self.push(point.time, point.value);
        }
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.by_time.clear();
        self.max = MAX_FLOOR;
        self.index = 0;
    }

    /// Point with absolute index `index`, if still retained.
    pub fn value_at(&self, index: u64) -> Option<Point> {
        if index > self.index {
            return None;
        }
        let back = (self.index - index) as usize;
        if back >= self.points.len() {
            return None;
        }
        self.points.get(self.points.len() - 1 - back).copied()
    }

    pub fn value_at_time(&self, time: u64) -> Option<f64> {
        let seq = *self.by_time.get(&time)?;
        self.points.get(self.position_of(seq)).map(|p| p.value)
    }

    /// Absolute index of the newest point (0 when nothing was ever appended).
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn current(&self) -> f64 {
        self.points.back().map(|p| p.value).unwrap_or(0.0)
    }

    pub fn has_data(&self) -> bool {
        !self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn points(&self) -> impl DoubleEndedIterator<Item = &Point> + ExactSizeIterator {
        self.points.iter()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Running maximum of retained values, never below 1.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Chart scale: the power of ten at or above the max, halved (at most twice) while it would
    /// exceed double the max.
    pub fn max_y(&self) -> f64 {
        let mut max_y = 10f64.powf(self.max.log10().ceil());
        for _ in 0..2 {
            if max_y > self.max * 2.0 {
                max_y /= 2.0;
            }
        }
        max_y
    }

    fn position_of(&self, seq: u64) -> usize {
        let first = self.index + 1 - self.points.len() as u64;
        (seq - first) as usize
    }

    fn evict_oldest(&mut self) -> Option<Point> {
        let evicted = self.points.pop_front()?;
        self.by_time.remove(&evicted.time);
        Some(evicted)
    }

    fn rescan_max(&self) -> f64 {
        self.points.iter().fold(MAX_FLOOR, |max, p| max.max(p.value))
    }
}

/// Stores the per-second rate of change of the pushed values instead of the values themselves.
/// The first point after construction or `set_data` only primes the previous pair.
#[derive(Debug, Clone)]
pub struct DerivativeSeries {
    inner: MetricSeries,
    previous: Option<Point>,
}

impl DerivativeSeries {
    pub fn new(duration: u64, interval: u64) -> Self {
        Self {
            inner: MetricSeries::new(duration, interval),
            previous: None,
        }
    }

    pub fn push(&mut self, time: u64, value: f64) {
        match self.previous {
            Some(previous) if time < previous.time => return,
            Some(previous) if time > previous.time => {
                let rate = (value - previous.value) / (time - previous.time) as f64 * 1000.0;
                self.inner.push(time, rate);
            }
            _ => {}
        }
        self.previous = Some(Point { value, time });
    }

    pub fn set_data(&mut self, points: impl IntoIterator<Item = Point>) {
        self.inner.set_data(points);
        self.previous = None;
    }

    pub fn reset(&mut self, duration: u64, interval: u64) {
        let cleared = interval != self.inner.interval;
        self.inner.reset(duration, interval);
        if cleared {
            self.previous = None;
        }
    }

    pub fn series(&self) -> &MetricSeries {
        &self.inner
    }
}
