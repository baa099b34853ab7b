use crate::base::Error;
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Holds the topology of a root system and its mapping onto macro soil cells
///
/// Segment `j` connects `nodes[segments[j][0]]` to `nodes[segments[j][1]]`; node 0 is the
/// root collar. Coordinates are in cm with `z` pointing up.
#[derive(Clone, Debug, PartialEq)]
pub struct RootGeometry {
    nodes: Vec<[f64; 3]>,
    segments: Vec<[usize; 2]>,
    radii: Vec<f64>,
    lengths: Vec<f64>,

    /// Macro cell containing the midpoint of each segment (None if outside the soil domain)
    cells: Vec<Option<usize>>,

    /// Inverse of `cells`
    cell_to_segments: BTreeMap<usize, Vec<usize>>,

    /// Macro cell containing the collar node
    collar_cell: Option<usize>,
}

impl RootGeometry {
    /// Allocates a new instance from nodes, segments and segment radii
    pub fn from_parts(nodes: Vec<[f64; 3]>, segments: Vec<[usize; 2]>, radii: Vec<f64>) -> Result<Self, Error> {
        if nodes.len() < 2 || segments.is_empty() {
            return Err(Error::InvalidGeometry(
                "a root system needs at least two nodes and one segment".to_string(),
            ));
        }
        if radii.len() != segments.len() {
            return Err(Error::InvalidGeometry(format!(
                "the number of radii ({}) must equal the number of segments ({})",
                radii.len(),
                segments.len()
            )));
        }
        let mut lengths = Vec::with_capacity(segments.len());
        for (j, seg) in segments.iter().enumerate() {
            let [a, b] = *seg;
            if a >= nodes.len() || b >= nodes.len() || a == b {
                return Err(Error::InvalidGeometry(format!("segment {} has invalid nodes {:?}", j, seg)));
            }
            if !(radii[j] > 0.0) {
                return Err(Error::InvalidGeometry(format!("radius of segment {} must be > 0.0", j)));
            }
            let l = distance(&nodes[a], &nodes[b]);
            if !(l > 0.0) {
                return Err(Error::InvalidGeometry(format!("segment {} has zero length", j)));
            }
            lengths.push(l);
        }
        let ns = segments.len();
        Ok(RootGeometry {
            nodes,
            segments,
            radii,
            lengths,
            cells: vec![None; ns],
            cell_to_segments: BTreeMap::new(),
            collar_cell: None,
        })
    }

    /// Allocates a single vertical root growing downward from `top`
    pub fn straight_root(top: [f64; 3], length: f64, n_segments: usize, radius: f64) -> Result<Self, Error> {
        if n_segments < 1 || !(length > 0.0) {
            return Err(Error::InvalidGeometry(
                "a straight root needs a positive length and at least one segment".to_string(),
            ));
        }
        let dz = length / (n_segments as f64);
        let nodes = (0..=n_segments)
            .map(|i| [top[0], top[1], top[2] - dz * (i as f64)])
            .collect();
        let segments = (0..n_segments).map(|i| [i, i + 1]).collect();
        RootGeometry::from_parts(nodes, segments, vec![radius; n_segments])
    }

    /// Maps the segments onto macro cells using the midpoint of each segment
    ///
    /// The picker returns the cell containing a point, or None if the point is outside.
    pub fn set_cells<F>(&mut self, picker: F) -> &mut Self
    where
        F: Fn(&[f64; 3]) -> Option<usize>,
    {
        self.cell_to_segments.clear();
        for j in 0..self.segments.len() {
            let cell = picker(&self.midpoint(j));
            self.cells[j] = cell;
            if let Some(c) = cell {
                self.cell_to_segments.entry(c).or_insert_with(Vec::new).push(j);
            }
        }
        self.collar_cell = picker(&self.nodes[0]);
        self
    }

    /// Calculates the radius of the soil cylinder around each segment
    ///
    /// The cylinders of all segments in a cell share the cell volume in proportion to their
    /// lengths: `r_out = sqrt(V_cell / (π Σ l_cell))`. Segments outside the domain get zero.
    pub fn outer_radii(&self, cell_volumes: &[f64]) -> Result<Vec<f64>, Error> {
        let mut res = vec![0.0; self.segments.len()];
        for (cell, segs) in &self.cell_to_segments {
            if *cell >= cell_volumes.len() {
                return Err(Error::InvalidGeometry(format!("cell index {} is out of range", cell)));
            }
            let total: f64 = segs.iter().map(|j| self.lengths[*j]).sum();
            let r = f64::sqrt(cell_volumes[*cell] / (PI * total));
            for j in segs {
                res[*j] = r;
            }
        }
        Ok(res)
    }

    /// Returns the midpoint of segment j
    pub fn midpoint(&self, j: usize) -> [f64; 3] {
        let [a, b] = self.segments[j];
        let (pa, pb) = (&self.nodes[a], &self.nodes[b]);
        [0.5 * (pa[0] + pb[0]), 0.5 * (pa[1] + pb[1]), 0.5 * (pa[2] + pb[2])]
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn nodes(&self) -> &[[f64; 3]] {
        &self.nodes
    }

    pub fn segments(&self) -> &[[usize; 2]] {
        &self.segments
    }

    /// Returns the segment radii (inner radii of the soil cylinders)
    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    pub fn lengths(&self) -> &[f64] {
        &self.lengths
    }

    /// Returns the macro cell of each segment
    pub fn cells(&self) -> &[Option<usize>] {
        &self.cells
    }

    /// Returns the segments of each macro cell
    pub fn cell_to_segments(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.cell_to_segments
    }

    /// Returns the macro cell containing the collar
    pub fn collar_cell(&self) -> Option<usize> {
        self.collar_cell
    }
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    f64::sqrt((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2))
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
