use itertools::Itertools;
use num::Integer;
use serde::{Deserialize, Serialize};

/// Half-open [start, end) time range
/// <N>: Any integer type
#[derive(Deserialize, Serialize, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct TimeRange<N>(pub N, pub N);

impl<N> TimeRange<N>
where
    N: Integer + Copy,
{
    /// Construct a new Time Range
    /// Range is half-open on [start, end)
    /// # Examples
    /// ```
    /// use meetplan::time::TimeRange;
    ///
    /// let test = TimeRange::new(0, 100);
    ///
    /// assert_eq!(test.0, 0);
    /// assert_eq!(test.1, 100);
    /// ```
    pub fn new(start: N, end: N) -> TimeRange<N> {
        TimeRange(start, end)
    }

    pub fn start(self) -> N {
        self.0
    }

    pub fn end(self) -> N {
        self.1
    }

    /// A range that covers no time at all. `TimeRange(5, 5)` and reversed ranges are empty.
    pub fn is_empty(self) -> bool {
        self.start() >= self.end()
    }

    /// # Examples
    /// ```
    /// use meetplan::time::TimeRange;
    ///
    /// assert_eq!(TimeRange::new(10_u32, 40).len(), 30);
    /// assert_eq!(TimeRange::new(40_u32, 10).len(), 0);
    /// ```
    pub fn len(self) -> N {
        if self.is_empty() {
            N::zero()
        } else {
            self.end() - self.start()
        }
    }

    /// Two ranges overlap when they share at least one instant. Touching ranges do not.
    ///
    /// # Examples
    /// ```
    /// use meetplan::time::TimeRange;
    ///
    /// let a = TimeRange::new(0, 10);
    ///
    /// assert!(a.overlaps(&TimeRange::new(9, 12)));
    /// assert!(!a.overlaps(&TimeRange::new(10, 12)));
    /// ```
    pub fn overlaps(&self, other: &TimeRange<N>) -> bool {
        self.start() < other.end() && other.start() < self.end()
    }

    /// The part of `self` inside `window`, if any.
    pub fn clamp(self, window: TimeRange<N>) -> Option<TimeRange<N>> {
        let clamped = TimeRange::new(
            self.start().max(window.start()),
            self.end().min(window.end()),
        );

        if clamped.is_empty() {
            None
        } else {
            Some(clamped)
        }
    }
}

pub trait TimeMerge<N>
where
    N: Integer + Copy,
{
    fn time_merge(self) -> Vec<TimeRange<N>>;
}

impl<'a, T, N> TimeMerge<N> for T
where
    T: Iterator<Item = &'a TimeRange<N>>,
    N: 'a + Integer + Copy,
{
    /// Combines overlapping and touching TimeRanges together.
    /// Input order does not matter, empty ranges are dropped.
    ///
    /// # Examples
    /// ```
    /// use meetplan::time::{TimeMerge, TimeRange};
    ///
    /// let time_merge = vec![
    ///     TimeRange::new(6, 7),
    ///     TimeRange::new(0, 1),
    ///     TimeRange::new(1, 3),
    ///     TimeRange::new(2, 4),
    ///     TimeRange::new(9, 9),
    /// ];
    ///
    /// assert_eq!(
    ///     time_merge.iter().time_merge(),
    ///     vec![TimeRange::new(0, 4), TimeRange::new(6, 7)]
    /// );
    /// ```
    fn time_merge(self) -> Vec<TimeRange<N>> {
        self.filter(|time| !time.is_empty())
            .sorted_unstable()
            .fold(Vec::new(), |mut acc: Vec<TimeRange<N>>, &curr| {
                match acc.last_mut() {
                    Some(last) if curr.start() <= last.end() => {
                        last.1 = last.end().max(curr.end());
                    }
                    _ => acc.push(curr),
                }
                acc
            })
    }
}

pub trait Available<N>
where
    N: Integer + Copy,
{
    fn get_availability(self, available_times: &[TimeRange<N>]) -> Vec<TimeRange<N>>;
}

impl<'a, T, N> Available<N> for T
where
    T: Iterator<Item = &'a TimeRange<N>>,
    N: 'a + Integer + Copy,
{
    /// Self is blocked times that cannot be scheduled
    /// This performs a type of Set Exclusion of available times
    /// and self. `available_times - self`
    ///
    /// # Examples
    ///
    /// ```
    /// use meetplan::time::{Available, TimeRange};
    ///
    /// let blocked_times = vec![TimeRange::new(2, 4), TimeRange::new(3, 6)];
    /// let available_times = vec![TimeRange::new(0, 10)];
    ///
    /// assert_eq!(
    ///     blocked_times.iter().get_availability(&available_times),
    ///     vec![TimeRange::new(0, 2), TimeRange::new(6, 10)]
    /// );
    /// ```
    fn get_availability(self, available_times: &[TimeRange<N>]) -> Vec<TimeRange<N>> {
        let blocked = self.time_merge();
        let mut free = Vec::with_capacity(blocked.len() + 1);

        for window in available_times.iter().time_merge() {
            let mut start = window.start();

            for block in blocked
                .iter()
                .skip_while(|block| block.end() <= window.start())
                .take_while(|block| block.start() < window.end())
            {
                if block.start() > start {
                    free.push(TimeRange::new(start, block.start()));
                }
                start = start.max(block.end());
            }

            if start < window.end() {
                free.push(TimeRange::new(start, window.end()));
            }
        }

        free
    }
}

pub trait FirstFit<N>
where
    N: Integer + Copy,
{
    fn first_fit(self, duration: N) -> Option<TimeRange<N>>;
}

impl<'a, T, N> FirstFit<N> for T
where
    T: Iterator<Item = &'a TimeRange<N>>,
    N: 'a + Integer + Copy,
{
    /// Places `duration` at the start of the first range long enough to hold it.
    /// Ranges are visited in iteration order.
    ///
    /// # Examples
    /// ```
    /// use meetplan::time::{FirstFit, TimeRange};
    ///
    /// let gaps = vec![TimeRange::new(0, 20), TimeRange::new(60, 120)];
    ///
    /// assert_eq!(gaps.iter().first_fit(30), Some(TimeRange::new(60, 90)));
    /// assert_eq!(gaps.iter().first_fit(90), None);
    /// ```
    fn first_fit(mut self, duration: N) -> Option<TimeRange<N>> {
        self.find(|time| time.len() >= duration)
            .map(|time| TimeRange::new(time.start(), time.start() + duration))
    }
}
