use crate::base::Error;
use std::f64::consts::PI;

/// Holds a one-dimensional cylindrical finite volume grid
///
/// The grid has `ndof = nodes.len() − 1` cells; cell `i` spans `[nodes[i], nodes[i+1]]`.
/// Volumes and areas are given per unit axial length.
///
/// ```text
///  r_in                                               r_out
///   |----o----|------o------|--------o--------| ...    |
///  node 0  center 0  node 1   center 1   node 2       node ndof
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RadialGrid {
    nodes: Vec<f64>,
    centers: Vec<f64>,
    volumes: Vec<f64>,
}

impl RadialGrid {
    /// Allocates a new grid with geometric (log-uniform) node spacing
    ///
    /// # Input
    ///
    /// * `inner_radius` -- radius of the root surface (> 0)
    /// * `outer_radius` -- radius of the soil cylinder (> inner_radius)
    /// * `node_count` -- number of nodes (≥ 2)
    /// * `log_base` -- base of the logarithmic spacing (> 1)
    pub fn new(inner_radius: f64, outer_radius: f64, node_count: usize, log_base: f64) -> Result<Self, Error> {
        check_radii(inner_radius, outer_radius, node_count)?;
        if log_base <= 1.0 || !log_base.is_finite() {
            return Err(Error::InvalidGeometry("log_base must be > 1.0".to_string()));
        }
        let lb = f64::ln(log_base);
        let lo = f64::ln(inner_radius) / lb;
        let hi = f64::ln(outer_radius) / lb;
        let last = node_count - 1;
        let mut nodes: Vec<_> = (0..node_count)
            .map(|i| f64::powf(log_base, lo + (hi - lo) * (i as f64) / (last as f64)))
            .collect();
        nodes[0] = inner_radius;
        nodes[last] = outer_radius;
        RadialGrid::from_nodes(nodes)
    }

    /// Allocates a new grid with uniform node spacing
    pub fn linear(inner_radius: f64, outer_radius: f64, node_count: usize) -> Result<Self, Error> {
        check_radii(inner_radius, outer_radius, node_count)?;
        let last = node_count - 1;
        let mut nodes: Vec<_> = (0..node_count)
            .map(|i| inner_radius + (outer_radius - inner_radius) * (i as f64) / (last as f64))
            .collect();
        nodes[last] = outer_radius;
        RadialGrid::from_nodes(nodes)
    }

    /// Allocates a new grid from given node radii (strictly increasing and positive)
    pub fn from_nodes(nodes: Vec<f64>) -> Result<Self, Error> {
        if nodes.len() < 2 {
            return Err(Error::InvalidGeometry("at least two nodes are required".to_string()));
        }
        check_radii(nodes[0], nodes[nodes.len() - 1], nodes.len())?;
        for i in 1..nodes.len() {
            if !(nodes[i] > nodes[i - 1]) {
                return Err(Error::InvalidGeometry(format!(
                    "node radii must be strictly increasing (node {} = {:?} ≤ {:?})",
                    i,
                    nodes[i],
                    nodes[i - 1]
                )));
            }
        }
        let ndof = nodes.len() - 1;
        let centers = (0..ndof).map(|i| 0.5 * (nodes[i] + nodes[i + 1])).collect();
        let volumes = (0..ndof)
            .map(|i| PI * (nodes[i + 1] * nodes[i + 1] - nodes[i] * nodes[i]))
            .collect();
        Ok(RadialGrid { nodes, centers, volumes })
    }

    /// Returns the number of cells
    #[inline]
    pub fn ndof(&self) -> usize {
        self.centers.len()
    }

    /// Returns the node radii (ndof + 1 values)
    #[inline]
    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    /// Returns the cell-center radii
    #[inline]
    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    /// Returns the center of cell i
    #[inline]
    pub fn center(&self, i: usize) -> f64 {
        self.centers[i]
    }

    /// Returns the cell volumes per unit length
    #[inline]
    pub fn volumes(&self) -> &[f64] {
        &self.volumes
    }

    /// Returns the face area per unit length at node i (2πrᵢ)
    #[inline]
    pub fn face_area(&self, i: usize) -> f64 {
        2.0 * PI * self.nodes[i]
    }

    /// Returns the inner radius
    #[inline]
    pub fn inner_radius(&self) -> f64 {
        self.nodes[0]
    }

    /// Returns the outer radius
    #[inline]
    pub fn outer_radius(&self) -> f64 {
        self.nodes[self.nodes.len() - 1]
    }

    /// Returns the distance between the inner boundary and the first cell center
    #[inline]
    pub fn inner_spacing(&self) -> f64 {
        self.centers[0] - self.nodes[0]
    }

    /// Returns the distance between the last cell center and the outer boundary
    #[inline]
    pub fn outer_spacing(&self) -> f64 {
        self.outer_radius() - self.centers[self.ndof() - 1]
    }

    /// Returns the total volume per unit length π(r_out² − r_in²)
    pub fn total_volume(&self) -> f64 {
        self.volumes.iter().sum()
    }
}

fn check_radii(inner_radius: f64, outer_radius: f64, node_count: usize) -> Result<(), Error> {
    if node_count < 2 {
        return Err(Error::InvalidGeometry("node_count must be ≥ 2".to_string()));
    }
    if !(inner_radius > 0.0) || !inner_radius.is_finite() {
        return Err(Error::InvalidGeometry("inner radius must be > 0.0".to_string()));
    }
    if !(inner_radius < outer_radius) || !outer_radius.is_finite() {
        return Err(Error::InvalidGeometry(format!(
            "inner radius ({:?}) must be smaller than outer radius ({:?})",
            inner_radius, outer_radius
        )));
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
