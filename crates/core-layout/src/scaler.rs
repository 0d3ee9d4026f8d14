//! Compression of very tall documents into a height a renderer can
//! actually represent. Inside the current viewport(s) coordinates map 1:1,
//! so visible pixels stay exact; everything off-screen is scaled linearly.

use crate::heightmap::{HeightMap, QueryType};
use crate::oracle::HeightOracle;

/// The tallest pixel position a renderer is assumed to handle.
pub const MAX_NATIVE_HEIGHT: f64 = 7e6;

#[derive(Debug, Clone, Copy)]
struct ViewportBand {
    top: f64,
    bottom: f64,
    out_top: f64,
    out_bottom: f64,
}

/// Maps the height map's intrinsic coordinates to renderer coordinates.
#[derive(Debug, Clone)]
pub enum Scaler {
    /// No compression needed; coordinates pass through.
    Identity,
    /// Linear compression outside the given viewports.
    Big { scale: f64, viewports: Vec<ViewportBandPublic> },
}

/// Public view of one uncompressed band.
#[derive(Debug, Clone, Copy)]
pub struct ViewportBandPublic {
    pub top: f64,
    pub bottom: f64,
    pub out_top: f64,
    pub out_bottom: f64,
}

impl From<ViewportBand> for ViewportBandPublic {
    fn from(band: ViewportBand) -> Self {
        ViewportBandPublic {
            top: band.top,
            bottom: band.bottom,
            out_top: band.out_top,
            out_bottom: band.out_bottom,
        }
    }
}

impl Scaler {
    /// Pick a scaler for the given map and viewports (`(from, to)` document
    /// ranges). Identity while the total height is representable.
    pub fn for_map(
        map: &HeightMap,
        oracle: &HeightOracle,
        viewports: &[(usize, usize)],
    ) -> Scaler {
        if map.height() <= MAX_NATIVE_HEIGHT {
            return Scaler::Identity;
        }
        let mut bands: Vec<ViewportBand> = viewports
            .iter()
            .map(|&(from, to)| {
                let top = map.line_at(from, 0.0, QueryType::ByPos, oracle, 0.0, 0).top;
                let bottom = map.line_at(to, 0.0, QueryType::ByPos, oracle, 0.0, 0).bottom();
                ViewportBand { top, bottom, out_top: 0.0, out_bottom: 0.0 }
            })
            .collect();
        bands.sort_by(|a, b| a.top.total_cmp(&b.top));
        let viewport_height: f64 = bands.iter().map(|b| b.bottom - b.top).sum();
        let scale = (MAX_NATIVE_HEIGHT - viewport_height) / (map.height() - viewport_height);
        let mut base = 0.0;
        let mut out_base = 0.0;
        for band in bands.iter_mut() {
            band.out_top = out_base + (band.top - base) * scale;
            band.out_bottom = band.out_top + (band.bottom - band.top);
            out_base = band.out_bottom;
            base = band.bottom;
        }
        Scaler::Big { scale, viewports: bands.into_iter().map(Into::into).collect() }
    }

    pub fn scale(&self) -> f64 {
        match self {
            Scaler::Identity => 1.0,
            Scaler::Big { scale, .. } => *scale,
        }
    }

    /// Intrinsic height map coordinate to renderer coordinate.
    pub fn to_native(&self, value: f64) -> f64 {
        match self {
            Scaler::Identity => value,
            Scaler::Big { scale, viewports } => {
                let mut base = 0.0;
                let mut out_base = 0.0;
                for band in viewports {
                    if value < band.top {
                        return out_base + (value - base) * scale;
                    }
                    if value <= band.bottom {
                        return band.out_top + (value - band.top);
                    }
                    base = band.bottom;
                    out_base = band.out_bottom;
                }
                out_base + (value - base) * scale
            }
        }
    }

    /// Renderer coordinate back to intrinsic coordinate.
    pub fn from_native(&self, value: f64) -> f64 {
        match self {
            Scaler::Identity => value,
            Scaler::Big { scale, viewports } => {
                let mut base = 0.0;
                let mut out_base = 0.0;
                for band in viewports {
                    if value < band.out_top {
                        return base + (value - out_base) / scale;
                    }
                    if value <= band.out_bottom {
                        return band.top + (value - band.out_top);
                    }
                    base = band.bottom;
                    out_base = band.out_bottom;
                }
                base + (value - out_base) / scale
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightmap::ChangedRange;
    use core_text::Text;

    #[test]
    fn identity_below_the_limit() {
        let doc = Text::from("one\ntwo");
        let oracle = HeightOracle::new(doc.clone());
        let map = HeightMap::empty().apply_changes(
            &[],
            &Text::empty(),
            &oracle,
            &[ChangedRange { from_a: 0, to_a: 0, from_b: 0, to_b: doc.len() }],
        );
        let scaler = Scaler::for_map(&map, &oracle, &[(0, doc.len())]);
        assert!(matches!(scaler, Scaler::Identity));
        assert_eq!(scaler.to_native(123.0), 123.0);
    }

    #[test]
    fn big_documents_compress_outside_the_viewport() {
        // A million lines at 14px is far beyond the native limit.
        let lines: Vec<String> = (0..1_000_000).map(|i| format!("l{i}")).collect();
        let doc = Text::of(lines).unwrap();
        let oracle = HeightOracle::new(doc.clone());
        let map = HeightMap::empty().apply_changes(
            &[],
            &Text::empty(),
            &oracle,
            &[ChangedRange { from_a: 0, to_a: 0, from_b: 0, to_b: doc.len() }],
        );
        assert!(map.height() > MAX_NATIVE_HEIGHT);

        let line_500k = doc.line(500_000).unwrap();
        let vp = (line_500k.from, doc.line(500_050).unwrap().to);
        let scaler = Scaler::for_map(&map, &oracle, &[vp]);
        assert!(scaler.scale() < 1.0);

        // Total output height fits the native limit.
        assert!(scaler.to_native(map.height()) <= MAX_NATIVE_HEIGHT + 1.0);
        // Inside the viewport, distances are preserved exactly.
        let top = map.line_at(vp.0, 0.0, QueryType::ByPos, &oracle, 0.0, 0).top;
        let a = scaler.to_native(top);
        let b = scaler.to_native(top + 14.0);
        assert!((b - a - 14.0).abs() < 0.001);
        // Round trip.
        let back = scaler.from_native(a);
        assert!((back - top).abs() < 0.001);
    }
}
