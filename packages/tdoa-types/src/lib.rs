//! # tdoa-types
//!
//! Shared data model for the TDOA positioning bench.
//!
//! These types are used by:
//! - `tdoa-simulator`: producing ground truth, impaired TDOA observations and
//!   problem labels, and consuming them in the estimator family
//! - the `tdoa-sim` binary: reporting estimates against ground truth
//!
//! ## Conventions
//!
//! - **Workspace frame**: Cartesian, origin at one workspace corner, every
//!   coordinate in `[0, extent]` on its axis. Units are whatever the
//!   configuration uses (metres in the bundled config).
//! - **Differential range**: `d(target, anchor_i) - d(target, anchor_ref)`,
//!   i.e. a TDOA already multiplied by the propagation speed.
//! - **Reference column**: always removed from both [`TdoaMatrix`] and
//!   [`ProblemMask`], so column `j` maps to anchor `j` if `j < ref` and to
//!   anchor `j + 1` otherwise.
//!
//! ## Invariants
//! - `ProblemMask` shape always equals `TdoaMatrix` shape
//! - A missing measurement is `None`; an unsolvable sample is a `None` row in
//!   [`PositionEstimate`]

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

// ── Problem labels ────────────────────────────────────────────────────────────

/// Ground-truth impairment label of one TDOA cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ProblemKind {
    /// No impairment beyond measurement noise
    #[default]
    Clean = 0,
    /// Non-line-of-sight, positive bias added
    Nlos = 1,
    /// Reflected path, non-negative delay added
    Multipath = 2,
    /// Signal lost, cell is missing
    Blockage = 3,
}

impl ProblemKind {
    pub const ALL: [ProblemKind; 4] = [Self::Clean, Self::Nlos, Self::Multipath, Self::Blockage];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Clean),
            1 => Some(Self::Nlos),
            2 => Some(Self::Multipath),
            3 => Some(Self::Blockage),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 { self as u8 }
    pub fn is_clean(self) -> bool { self == Self::Clean }
}

// ── Workspace & anchors ───────────────────────────────────────────────────────

/// Axis-aligned simulation volume. Only the first `dimension` extents matter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub space_x: f64,
    pub space_y: f64,
    pub space_z: f64,
    /// 2 or 3
    pub dimension: usize,
}

impl Workspace {
    pub fn new(space_x: f64, space_y: f64, space_z: f64, dimension: usize) -> Self {
        Self { space_x, space_y, space_z, dimension }
    }

    /// Per-axis extent, truncated to the workspace dimension.
    pub fn upper_bounds(&self) -> DVector<f64> {
        let all = [self.space_x, self.space_y, self.space_z];
        DVector::from_iterator(self.dimension, all.into_iter().take(self.dimension))
    }

    pub fn contains(&self, p: &DVector<f64>) -> bool {
        p.len() == self.dimension
            && p.iter().zip(self.upper_bounds().iter()).all(|(&v, &hi)| (0.0..=hi).contains(&v))
    }
}

/// Fixed receivers with known coordinates. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorSet {
    dimension: usize,
    positions: Vec<DVector<f64>>,
}

/// Anchor heights for the 3D layout. Distinct so the set is non-coplanar.
const CORNER_HEIGHTS: [f64; 4] = [1.0, 4.0, 3.0, 2.0];

impl AnchorSet {
    /// Returns `None` if any position does not have `dimension` coordinates.
    pub fn new(dimension: usize, positions: Vec<DVector<f64>>) -> Option<Self> {
        if positions.iter().any(|p| p.len() != dimension) {
            return None;
        }
        Some(Self { dimension, positions })
    }

    /// Four anchors on the workspace rectangle corners, in the order
    /// `(0,0) (0,Y) (X,0) (X,Y)`. In 3D each corner gets its own height.
    pub fn corners(ws: &Workspace) -> Self {
        let corners = [
            (0.0, 0.0),
            (0.0, ws.space_y),
            (ws.space_x, 0.0),
            (ws.space_x, ws.space_y),
        ];
        let positions = corners.iter().zip(CORNER_HEIGHTS)
            .map(|(&(x, y), z)| {
                if ws.dimension == 2 {
                    DVector::from_vec(vec![x, y])
                } else {
                    DVector::from_vec(vec![x, y, z])
                }
            })
            .collect();
        Self { dimension: ws.dimension, positions }
    }

    pub fn dimension(&self) -> usize { self.dimension }
    pub fn len(&self) -> usize { self.positions.len() }
    pub fn is_empty(&self) -> bool { self.positions.is_empty() }
    pub fn get(&self, i: usize) -> Option<&DVector<f64>> { self.positions.get(i) }
    pub fn iter(&self) -> impl Iterator<Item = &DVector<f64>> { self.positions.iter() }

    /// Arithmetic mean of all anchor positions.
    pub fn centroid(&self) -> DVector<f64> {
        let mut sum = DVector::zeros(self.dimension);
        for p in &self.positions {
            sum += p;
        }
        sum / self.positions.len().max(1) as f64
    }

    /// Anchor index that a TDOA column refers to once the reference column
    /// has been removed.
    pub fn anchor_for_column(column: usize, reference_index: usize) -> usize {
        if column < reference_index { column } else { column + 1 }
    }
}

// ── Row-major grids ───────────────────────────────────────────────────────────

/// Dense row-major matrix of cells. One row per target sample.
///
/// Always holds exactly `n_rows * width` cells; deserialising checks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGrid<T>", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Grid<T> {
    n_rows: usize,
    width: usize,
    cells: Vec<T>,
}

/// Wire form of [`Grid`] before the shape check.
#[derive(Deserialize)]
struct RawGrid<T> {
    n_rows: usize,
    width: usize,
    cells: Vec<T>,
}

impl<T> TryFrom<RawGrid<T>> for Grid<T> {
    type Error = String;

    fn try_from(raw: RawGrid<T>) -> Result<Self, Self::Error> {
        match raw.n_rows.checked_mul(raw.width) {
            Some(n) if n == raw.cells.len() => {
                Ok(Self { n_rows: raw.n_rows, width: raw.width, cells: raw.cells })
            }
            _ => Err(format!(
                "grid of {} x {} cannot hold {} cells",
                raw.n_rows, raw.width, raw.cells.len()
            )),
        }
    }
}

impl<T: Clone> Grid<T> {
    pub fn filled(n_rows: usize, width: usize, value: T) -> Self {
        Self { n_rows, width, cells: vec![value; n_rows * width] }
    }

    /// Returns `None` if rows have unequal lengths.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Option<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != width) {
            return None;
        }
        let n_rows = rows.len();
        Some(Self { n_rows, width, cells: rows.into_iter().flatten().collect() })
    }

    pub fn n_rows(&self) -> usize { self.n_rows }
    pub fn width(&self) -> usize { self.width }
    pub fn shape(&self) -> (usize, usize) { (self.n_rows, self.width) }

    pub fn row(&self, i: usize) -> &[T] {
        &self.cells[i * self.width..(i + 1) * self.width]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [T] {
        &mut self.cells[i * self.width..(i + 1) * self.width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        // chunks(0) panics; a zero-width grid has no cells anyway
        self.cells.chunks(self.width.max(1)).take(self.n_rows)
    }

    pub fn get(&self, row: usize, col: usize) -> &T { &self.cells[row * self.width + col] }

    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.cells[row * self.width + col] = value;
    }

    pub fn cells(&self) -> &[T] { &self.cells }

    /// Copy of the grid without column `col`.
    pub fn without_column(&self, col: usize) -> Self {
        let width = self.width.saturating_sub(1);
        let cells = self.rows()
            .flat_map(|r| r.iter().enumerate().filter(move |(j, _)| *j != col).map(|(_, v)| v.clone()))
            .collect();
        Self { n_rows: self.n_rows, width, cells }
    }
}

/// True target-to-anchor distances, one column per anchor.
pub type DistanceMatrix = Grid<f64>;

/// Differential ranges relative to the reference anchor, reference column
/// removed. `None` marks a dropped measurement.
pub type TdoaMatrix = Grid<Option<f64>>;

/// Impairment labels aligned cell-for-cell with a [`TdoaMatrix`].
pub type ProblemMask = Grid<ProblemKind>;

impl TdoaMatrix {
    pub fn missing_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }
}

impl ProblemMask {
    pub fn count(&self, kind: ProblemKind) -> usize {
        self.cells.iter().filter(|&&k| k == kind).count()
    }
}

// ── Ground truth & estimates ──────────────────────────────────────────────────

/// Ground-truth target positions, one per sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSet {
    pub dimension: usize,
    pub points: Vec<DVector<f64>>,
    /// Sample times in seconds for continuous trajectories; `None` for scatter.
    pub timestamps: Option<Vec<f64>>,
}

impl TargetSet {
    pub fn len(&self) -> usize { self.points.len() }
    pub fn is_empty(&self) -> bool { self.points.is_empty() }
}

/// Estimator output, one row per sample. `None` is the undefined position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub dimension: usize,
    pub rows: Vec<Option<DVector<f64>>>,
}

impl PositionEstimate {
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
    pub fn get(&self, i: usize) -> Option<&DVector<f64>> { self.rows.get(i).and_then(Option::as_ref) }
    pub fn undefined_count(&self) -> usize { self.rows.iter().filter(|r| r.is_none()).count() }
}
