//! Height estimation parameters, fed by whatever measuring the renderer
//! does and consulted wherever the height map has no measured value.

use core_text::Text;

const EPSILON: f64 = 0.001;

/// Font/viewport metrics used to estimate line heights. The renderer
/// refreshes these from actual measurements; a headless host just keeps the
/// defaults.
#[derive(Debug, Clone)]
pub struct HeightOracle {
    pub doc: Text,
    pub line_wrapping: bool,
    pub line_height: f64,
    pub char_width: f64,
    /// Estimated average line length, in characters, used to guess wrap
    /// counts.
    pub line_length: f64,
    height_samples: Vec<f64>,
}

impl HeightOracle {
    pub fn new(doc: Text) -> HeightOracle {
        HeightOracle {
            doc,
            line_wrapping: false,
            line_height: 14.0,
            char_width: 7.0,
            line_length: 30.0,
            height_samples: Vec::new(),
        }
    }

    /// Swap in another document without touching the metrics.
    pub fn set_doc(&mut self, doc: Text) -> &mut Self {
        self.doc = doc;
        self
    }

    /// Estimated height of a plain-text gap `from..to`: one line height per
    /// line, plus (when wrapping) a rough integral of the wrap count.
    pub fn height_for_gap(&self, from: usize, to: usize) -> f64 {
        let first = self.doc.line_at(from).map(|l| l.number).unwrap_or(1);
        let last = self.doc.line_at(to).map(|l| l.number).unwrap_or(first);
        let mut lines = (last - first + 1) as f64;
        if self.line_wrapping {
            let chars = (to - from) as f64;
            let wrapped = ((chars - lines * self.line_length * 0.5) / self.line_length).ceil();
            lines += wrapped.max(0.0);
        }
        self.line_height * lines
    }

    /// Estimated height of one line of the given (collapsed-adjusted)
    /// length.
    pub fn height_for_line(&self, length: usize) -> f64 {
        if !self.line_wrapping {
            return self.line_height;
        }
        let extra = ((length as f64 - self.line_length) / (self.line_length - 5.0)).ceil();
        (1.0 + extra.max(0.0)) * self.line_height
    }

    /// Whether the measured heights disagree with what the oracle would
    /// have estimated, so a forced refresh is needed.
    pub fn must_refresh(&self, heights: &[f64]) -> bool {
        for &height in heights {
            if (height - self.line_height).abs() > EPSILON
                && !self.height_samples.iter().any(|&s| (s - height).abs() <= EPSILON)
            {
                return true;
            }
        }
        false
    }

    /// Update metrics from measurements. Returns whether anything changed
    /// enough to invalidate cached heights.
    pub fn refresh(
        &mut self,
        line_height: f64,
        char_width: f64,
        line_length: f64,
        line_wrapping: bool,
        known_heights: &[f64],
    ) -> bool {
        let changed = (line_height - self.line_height).abs() > EPSILON
            || (char_width - self.char_width).abs() > EPSILON
            || self.line_wrapping != line_wrapping;
        self.line_height = line_height;
        self.char_width = char_width;
        self.line_length = line_length;
        self.line_wrapping = line_wrapping;
        if changed {
            self.height_samples.clear();
        }
        for &height in known_heights {
            if !self.height_samples.iter().any(|&s| (s - height).abs() <= EPSILON) {
                self.height_samples.push(height);
            }
        }
        changed
    }
}

/// Line heights measured by a renderer, consumed front to back while the
/// height map updates.
#[derive(Debug, Clone)]
pub struct MeasuredHeights {
    pub from: usize,
    pub heights: Vec<f64>,
    pub index: usize,
}

impl MeasuredHeights {
    pub fn new(from: usize, heights: Vec<f64>) -> MeasuredHeights {
        MeasuredHeights { from, heights, index: 0 }
    }

    pub fn more(&self) -> bool {
        self.index < self.heights.len()
    }

    pub(crate) fn take(&mut self) -> f64 {
        let value = self.heights[self.index];
        self.index += 1;
        value
    }
}
