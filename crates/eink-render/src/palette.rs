//! Fixed device palette and nearest-color quantization with dithering.

use serde::{Deserialize, Serialize};

/// An RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    /// Squared Euclidean distance to another color.
    fn distance_sq(&self, other: &Rgb) -> u32 {
        let dr = self.0[0] as i32 - other.0[0] as i32;
        let dg = self.0[1] as i32 - other.0[1] as i32;
        let db = self.0[2] as i32 - other.0[2] as i32;
        (dr * dr + dg * dg + db * db) as u32
    }
}

// The seven colors the display can actually show.
pub const BLACK: Rgb = Rgb::new(0, 0, 0);
pub const WHITE: Rgb = Rgb::new(255, 255, 255);
pub const BLUE: Rgb = Rgb::new(0, 0, 255);
pub const RED: Rgb = Rgb::new(255, 0, 0);
pub const GREEN: Rgb = Rgb::new(0, 255, 0);
pub const ORANGE: Rgb = Rgb::new(255, 128, 0);
pub const YELLOW: Rgb = Rgb::new(255, 255, 0);

/// Spatial dither pattern selecting between two displayable colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    /// 50/50 checkerboard: matching x/y parity yields the first color.
    Checker2x2,
    /// Mostly the first color, second only on every 4th pixel both ways.
    Sparse4x4,
}

impl PatternKind {
    /// Evaluate the pattern at pixel coordinates `(x, y)`.
    pub fn eval(&self, x: u32, y: u32, a: Rgb, b: Rgb) -> Rgb {
        match self {
            PatternKind::Checker2x2 => {
                if x % 2 == y % 2 {
                    a
                } else {
                    b
                }
            }
            PatternKind::Sparse4x4 => {
                if x % 4 == 0 && y % 4 == 0 {
                    b
                } else {
                    a
                }
            }
        }
    }
}

/// One palette table entry: either a directly displayable color, or an
/// intermediate shade approximated by dithering two displayable colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaletteEntry {
    Flat(Rgb),
    Dithered {
        /// The shade this entry stands in for; distance is measured
        /// against this, not against the dither constituents.
        nominal: Rgb,
        a: Rgb,
        b: Rgb,
        pattern: PatternKind,
    },
}

impl PaletteEntry {
    fn nominal(&self) -> Rgb {
        match self {
            PaletteEntry::Flat(c) => *c,
            PaletteEntry::Dithered { nominal, .. } => *nominal,
        }
    }
}

/// An immutable ordered palette table.
///
/// Constructed once at startup and shared; quantization itself is
/// stateless and safe to call from any number of workers.
#[derive(Debug, Clone)]
pub struct Palette {
    entries: Vec<PaletteEntry>,
}

impl Palette {
    /// Build a palette from an entry table. The first entry acts as the
    /// fallback match, so the table must not be empty.
    pub fn new(entries: Vec<PaletteEntry>) -> Self {
        assert!(!entries.is_empty(), "palette table must not be empty");
        Self { entries }
    }

    pub fn entries(&self) -> &[PaletteEntry] {
        &self.entries
    }

    /// The table tuned for OSM-style map tiles on the 7-color display:
    /// the seven displayable colors plus checkerboard blends for the
    /// intermediate shades map renderers actually emit.
    pub fn eink_map_tiles() -> Self {
        use PaletteEntry::{Dithered, Flat};
        use PatternKind::Checker2x2;

        let dither = |nominal: Rgb, a: Rgb, b: Rgb| Dithered {
            nominal,
            a,
            b,
            pattern: Checker2x2,
        };

        Self::new(vec![
            Flat(BLACK),
            dither(Rgb::new(127, 127, 127), BLACK, WHITE),
            Flat(WHITE),
            Flat(BLUE),
            dither(Rgb::new(0, 0, 127), BLACK, BLUE),
            Flat(RED),
            dither(Rgb::new(127, 0, 0), BLACK, RED),
            Flat(GREEN),
            dither(Rgb::new(0, 127, 0), BLACK, GREEN),
            Flat(ORANGE),
            Flat(YELLOW),
            dither(Rgb::new(127, 127, 0), BLACK, YELLOW),
            dither(Rgb::new(255, 255, 127), WHITE, YELLOW),
            dither(Rgb::new(0, 255, 255), WHITE, BLUE),
            dither(Rgb::new(127, 0, 127), RED, BLUE),
            dither(Rgb::new(127, 255, 0), YELLOW, GREEN),
            dither(Rgb::new(127, 191, 0), ORANGE, GREEN),
            dither(Rgb::new(0x7c, 0xa4, 0x7c), WHITE, GREEN),
            dither(Rgb::new(0xa4, 0x7c, 0x7c), WHITE, RED),
            dither(Rgb::new(0x7c, 0x7c, 0xa4), WHITE, BLUE),
            dither(Rgb::new(0xb8, 0x91, 0x81), WHITE, ORANGE),
            dither(Rgb::new(0xff, 0x2c, 0x00), RED, ORANGE),
            dither(Rgb::new(0xff, 0x9c, 0x00), YELLOW, ORANGE),
        ])
    }

    /// Map one pixel onto the palette.
    ///
    /// Nearest entry by squared RGB distance, ties broken by table order;
    /// a dithered winner resolves through its pattern at `(x, y)`. This is
    /// the hot path: it runs for every pixel of every fetched tile.
    pub fn quantize(&self, pixel: Rgb, x: u32, y: u32) -> Rgb {
        let mut best = &self.entries[0];
        let mut best_dist = pixel.distance_sq(&best.nominal());

        for entry in &self.entries[1..] {
            let dist = pixel.distance_sq(&entry.nominal());
            if dist < best_dist {
                best_dist = dist;
                best = entry;
            }
        }

        match best {
            PaletteEntry::Flat(c) => *c,
            PaletteEntry::Dithered { a, b, pattern, .. } => pattern.eval(x, y, *a, *b),
        }
    }

    /// The display driver's index for a displayable color.
    ///
    /// Anything outside the seven base colors maps to 7, which the panel
    /// treats as "no ink". Quantized output never produces it.
    pub fn device_index(color: Rgb) -> u8 {
        match color {
            BLACK => 0,
            WHITE => 1,
            GREEN => 2,
            BLUE => 3,
            RED => 4,
            YELLOW => 5,
            ORANGE => 6,
            _ => 7,
        }
    }
}
