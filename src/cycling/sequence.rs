// src/cycling/sequence.rs

//! Recurrence sequences over the cycle point timeline.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use crate::cycling::{CyclePoint, Interval};
use crate::errors::{CycleflowError, Result};
use crate::types::CyclingMode;

/// A recurrence rule: start point, optional end point, interval, plus
/// explicitly excluded and included points.
///
/// Produces a lazy, monotonically increasing series of points; infinite
/// unless an end point is set. Excluded points are skipped, included points
/// are members even when off-grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    start: CyclePoint,
    end: Option<CyclePoint>,
    interval: Interval,
    exclusions: BTreeSet<CyclePoint>,
    inclusions: BTreeSet<CyclePoint>,
}

impl Sequence {
    pub fn new(start: CyclePoint, end: Option<CyclePoint>, interval: Interval) -> Result<Self> {
        if interval.is_zero() || interval.is_negative() {
            return Err(CycleflowError::ConfigError(format!(
                "sequence interval must be positive, got {interval}"
            )));
        }
        // Interval kind must match the point mode.
        start.add(&interval)?;
        if let Some(end) = &end {
            if start.try_cmp(end)? == Ordering::Greater {
                return Err(CycleflowError::ConfigError(format!(
                    "sequence end {end} precedes start {start}"
                )));
            }
        }
        Ok(Self {
            start,
            end,
            interval,
            exclusions: BTreeSet::new(),
            inclusions: BTreeSet::new(),
        })
    }

    /// Parse a recurrence expression from a graph section heading.
    ///
    /// Supported forms:
    /// - `R1` — a single point at the workflow's initial cycle point
    /// - `<interval>` — e.g. `P1`, `P2`, `PT6H`, `P1D`, `P1M`
    /// - `<interval>!<point>` / `<interval>!(<p1>,<p2>)` — with exclusions
    pub fn from_recurrence(
        expr: &str,
        initial: CyclePoint,
        final_point: Option<CyclePoint>,
        mode: CyclingMode,
    ) -> Result<Self> {
        let expr = expr.trim();
        if expr == "R1" {
            // Single occurrence at the initial point.
            let unit = match mode {
                CyclingMode::Integer => Interval::Integer(1),
                CyclingMode::Datetime => Interval::Seconds(86400),
            };
            return Sequence::new(initial, Some(initial), unit);
        }

        let (interval_str, exclusion_str) = match expr.split_once('!') {
            Some((i, e)) => (i, Some(e)),
            None => (expr, None),
        };

        let interval = Interval::parse(interval_str, mode)?;
        let mut seq = Sequence::new(initial, final_point, interval)?;

        if let Some(exclusion_str) = exclusion_str {
            let inner = exclusion_str
                .trim()
                .trim_start_matches('(')
                .trim_end_matches(')');
            for part in inner.split(',') {
                let point = CyclePoint::parse(part, mode)?;
                seq.exclude(point);
            }
        }
        Ok(seq)
    }

    pub fn start(&self) -> &CyclePoint {
        &self.start
    }

    pub fn end(&self) -> Option<&CyclePoint> {
        self.end.as_ref()
    }

    pub fn interval(&self) -> &Interval {
        &self.interval
    }

    pub fn exclude(&mut self, point: CyclePoint) {
        self.exclusions.insert(point);
    }

    pub fn include(&mut self, point: CyclePoint) {
        self.inclusions.insert(point);
    }

    /// First point of the sequence, skipping leading exclusions.
    pub fn first_point(&self) -> Result<Option<CyclePoint>> {
        if self.is_on_sequence(&self.start)? {
            let first_inclusion = self.inclusions.iter().next();
            if let Some(inc) = first_inclusion {
                if inc.try_cmp(&self.start)? == Ordering::Less {
                    return Ok(Some(*inc));
                }
            }
            return Ok(Some(self.start));
        }
        self.next_after(&self.start)
    }

    /// Smallest sequence point strictly after `p`, or `None` past the end.
    pub fn next_after(&self, p: &CyclePoint) -> Result<Option<CyclePoint>> {
        let mut grid = self.next_grid_after(p)?;
        // Skip exclusions on the grid.
        while let Some(candidate) = grid {
            if self.exclusions.contains(&candidate) {
                grid = self.next_grid_after(&candidate)?;
            } else {
                break;
            }
        }

        let mut best = grid;
        for inc in &self.inclusions {
            if inc.try_cmp(p)? == Ordering::Greater {
                best = Some(match best {
                    Some(b) if b.try_cmp(inc)? != Ordering::Greater => b,
                    _ => *inc,
                });
                break;
            }
        }
        Ok(best)
    }

    /// Largest sequence point at or before `p`, or `None` before the start.
    pub fn prev_or_equal(&self, p: &CyclePoint) -> Result<Option<CyclePoint>> {
        let mut grid = self.prev_grid_or_equal(p)?;
        while let Some(candidate) = grid {
            if self.exclusions.contains(&candidate) {
                let before = candidate.sub(self.step_unit())?;
                grid = self.prev_grid_or_equal(&before)?;
            } else {
                break;
            }
        }

        let mut best = grid;
        for inc in self.inclusions.iter().rev() {
            if inc.try_cmp(p)? != Ordering::Greater {
                best = Some(match best {
                    Some(b) if b.try_cmp(inc)? != Ordering::Less => b,
                    _ => *inc,
                });
                break;
            }
        }
        Ok(best)
    }

    /// Whether `p` is a member of this sequence.
    pub fn is_on_sequence(&self, p: &CyclePoint) -> Result<bool> {
        if self.inclusions.contains(p) {
            return Ok(true);
        }
        if self.exclusions.contains(p) {
            return Ok(false);
        }
        if p.try_cmp(&self.start)? == Ordering::Less {
            return Ok(false);
        }
        if let Some(end) = &self.end {
            if p.try_cmp(end)? == Ordering::Greater {
                return Ok(false);
            }
        }
        self.on_grid(p)
    }

    fn step_unit(&self) -> &Interval {
        &self.interval
    }

    fn on_grid(&self, p: &CyclePoint) -> Result<bool> {
        match self.interval {
            Interval::Integer(step) => {
                let Interval::Integer(diff) = p.diff(&self.start)? else {
                    unreachable!("integer diff for integer points");
                };
                Ok(diff >= 0 && diff % step == 0)
            }
            Interval::Seconds(step) => {
                let Interval::Seconds(diff) = p.diff(&self.start)? else {
                    unreachable!("seconds diff for date-time points");
                };
                Ok(diff >= 0 && diff % step == 0)
            }
            Interval::Months(_) => {
                // Month steps clamp, so walk from the start.
                let mut candidate = self.start;
                loop {
                    match candidate.try_cmp(p)? {
                        Ordering::Equal => return Ok(true),
                        Ordering::Greater => return Ok(false),
                        Ordering::Less => candidate = candidate.add(&self.interval)?,
                    }
                }
            }
        }
    }

    /// Smallest grid point strictly after `p`, ignoring exclusions and
    /// inclusions but honoring the end bound.
    fn next_grid_after(&self, p: &CyclePoint) -> Result<Option<CyclePoint>> {
        let candidate = if p.try_cmp(&self.start)? == Ordering::Less {
            self.start
        } else {
            match self.interval {
                Interval::Integer(step) => {
                    let Interval::Integer(diff) = p.diff(&self.start)? else {
                        unreachable!("integer diff for integer points");
                    };
                    self.start.add(&Interval::Integer((diff / step + 1) * step))?
                }
                Interval::Seconds(step) => {
                    let Interval::Seconds(diff) = p.diff(&self.start)? else {
                        unreachable!("seconds diff for date-time points");
                    };
                    self.start.add(&Interval::Seconds((diff / step + 1) * step))?
                }
                Interval::Months(_) => {
                    let mut candidate = self.start;
                    while candidate.try_cmp(p)? != Ordering::Greater {
                        candidate = candidate.add(&self.interval)?;
                    }
                    candidate
                }
            }
        };

        if let Some(end) = &self.end {
            if candidate.try_cmp(end)? == Ordering::Greater {
                return Ok(None);
            }
        }
        Ok(Some(candidate))
    }

    /// Largest grid point at or before `p`, ignoring exclusions and
    /// inclusions but honoring the end bound.
    fn prev_grid_or_equal(&self, p: &CyclePoint) -> Result<Option<CyclePoint>> {
        if p.try_cmp(&self.start)? == Ordering::Less {
            return Ok(None);
        }
        let bounded = match &self.end {
            Some(end) if p.try_cmp(end)? == Ordering::Greater => *end,
            _ => *p,
        };
        match self.interval {
            Interval::Integer(step) => {
                let Interval::Integer(diff) = bounded.diff(&self.start)? else {
                    unreachable!("integer diff for integer points");
                };
                Ok(Some(self.start.add(&Interval::Integer(diff / step * step))?))
            }
            Interval::Seconds(step) => {
                let Interval::Seconds(diff) = bounded.diff(&self.start)? else {
                    unreachable!("seconds diff for date-time points");
                };
                Ok(Some(self.start.add(&Interval::Seconds(diff / step * step))?))
            }
            Interval::Months(_) => {
                let mut candidate = self.start;
                let mut last = self.start;
                while candidate.try_cmp(&bounded)? != Ordering::Greater {
                    last = candidate;
                    candidate = candidate.add(&self.interval)?;
                }
                Ok(Some(last))
            }
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start, self.interval)?;
        if let Some(end) = &self.end {
            write!(f, "..{end}")?;
        }
        Ok(())
    }
}
