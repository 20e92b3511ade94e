//! ROI and intrusion-rule records (§3).

use serde::{Deserialize, Serialize};

/// An ordered polygon in image coordinates, `3..=100` points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub points: Vec<(f64, f64)>,
}

impl Polygon {
    /// Point-in-polygon via ray casting, tolerant of closed polygons where
    /// `first == last` (§4.5 "Point-in-polygon"). Points exactly on
    /// an edge are considered inside (§8 boundary behavior).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let pts: Vec<(f64, f64)> = {
            let mut p = self.points.clone();
            if p.len() > 1 && p.first() == p.last() {
                p.pop();
            }
            p
        };
        let n = pts.len();
        if n < 3 {
            return false;
        }

        for i in 0..n {
            let (x1, y1) = pts[i];
            let (x2, y2) = pts[(i + 1) % n];
            if point_on_segment(x, y, x1, y1, x2, y2) {
                return true;
            }
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = pts[i];
            let (xj, yj) = pts[j];
            let intersects = (yi > y) != (yj > y)
                && x < (xj - xi) * (y - yi) / (yj - yi) + xi;
            if intersects {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    pub fn area(&self) -> f64 {
        let pts: Vec<(f64, f64)> = {
            let mut p = self.points.clone();
            if p.len() > 1 && p.first() == p.last() {
                p.pop();
            }
            p
        };
        let n = pts.len();
        if n < 3 {
            return 0.0;
        }
        let mut acc = 0.0;
        for i in 0..n {
            let (x1, y1) = pts[i];
            let (x2, y2) = pts[(i + 1) % n];
            acc += x1 * y2 - x2 * y1;
        }
        (acc / 2.0).abs()
    }
}

fn point_on_segment(px: f64, py: f64, x1: f64, y1: f64, x2: f64, y2: f64) -> bool {
    let cross = (py - y1) * (x2 - x1) - (px - x1) * (y2 - y1);
    if cross.abs() > 1e-9 {
        return false;
    }
    let dot = (px - x1) * (x2 - x1) + (py - y1) * (y2 - y1);
    if dot < 0.0 {
        return false;
    }
    let len_sq = (x2 - x1).powi(2) + (y2 - y1).powi(2);
    dot <= len_sq
}

/// `HH:MM[:SS]` wall-clock time of day, used for ROI active windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub seconds_since_midnight: u32,
}

impl TimeOfDay {
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let (h, m, sec) = match parts.as_slice() {
            [h, m] => (h.parse().ok()?, m.parse().ok()?, 0u32),
            [h, m, s] => (h.parse().ok()?, m.parse().ok()?, s.parse().ok()?),
            _ => return None,
        };
        let h: u32 = h;
        let m: u32 = m;
        if h > 23 || m > 59 || sec > 59 {
            return None;
        }
        Some(Self {
            seconds_since_midnight: h * 3600 + m * 60 + sec,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub id: String,
    pub name: String,
    pub polygon: Polygon,
    pub enabled: bool,
    pub priority: u8,
    pub start_time: Option<TimeOfDay>,
    pub end_time: Option<TimeOfDay>,
}

impl Roi {
    /// Active iff `enabled` AND either both times are empty, or the
    /// current time-of-day falls in `[start, end]` with wrap-around when
    /// `end <= start` spans midnight (§4.5 "ROI activeness").
    pub fn is_active_at(&self, now: TimeOfDay) -> bool {
        if !self.enabled {
            return false;
        }
        match (self.start_time, self.end_time) {
            (None, None) => true,
            (Some(start), Some(end)) => {
                let t = now.seconds_since_midnight;
                let s = start.seconds_since_midnight;
                let e = end.seconds_since_midnight;
                if e <= s {
                    t >= s || t <= e
                } else {
                    t >= s && t <= e
                }
            }
            // A config with only one bound set behaves as always-active;
            // admission validation should reject this, but analyze() must
            // never panic on it.
            _ => true,
        }
    }

    /// Whether this ROI carries an explicit time restriction, used as the
    /// "more specific" tie-break in priority conflict resolution
    /// (§4.5 step 3).
    pub fn has_time_restriction(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrusionRule {
    pub id: String,
    pub roi_id: String,
    pub min_duration_s: f32,
    pub confidence_threshold: f32,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        Polygon {
            points: vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)],
        }
    }

    #[test]
    fn point_inside_square() {
        assert!(square().contains(5.0, 5.0));
    }

    #[test]
    fn point_on_edge_is_inside() {
        assert!(square().contains(0.0, 5.0));
        assert!(square().contains(10.0, 5.0));
    }

    #[test]
    fn point_outside_square() {
        assert!(!square().contains(20.0, 20.0));
    }

    #[test]
    fn closed_polygon_first_equals_last() {
        let p = Polygon {
            points: vec![
                (0.0, 0.0),
                (10.0, 0.0),
                (10.0, 10.0),
                (0.0, 10.0),
                (0.0, 0.0),
            ],
        };
        assert!(p.contains(5.0, 5.0));
    }

    #[test]
    fn wraparound_time_window() {
        let roi = Roi {
            id: "r1".into(),
            name: "overnight".into(),
            polygon: square(),
            enabled: true,
            priority: 1,
            start_time: TimeOfDay::parse("22:00"),
            end_time: TimeOfDay::parse("06:00"),
        };
        assert!(roi.is_active_at(TimeOfDay::parse("23:30").unwrap()));
        assert!(roi.is_active_at(TimeOfDay::parse("02:00").unwrap()));
        assert!(!roi.is_active_at(TimeOfDay::parse("12:00").unwrap()));
    }
}
