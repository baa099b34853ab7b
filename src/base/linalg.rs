use super::Error;
use ndarray::Array1;

/// Holds a tridiagonal matrix with diagonals at offsets -1, 0, +1
#[derive(Clone, Debug)]
pub struct Tridiagonal {
    /// Size of matrix (= size of main diagonal)
    pub n: usize,

    /// Lower diagonal (-1); low[i] multiplies x[i-1] in row i (low[0] is unused)
    pub low: Array1<f64>,

    /// Main diagonal
    pub dia: Array1<f64>,

    /// Upper diagonal (+1); upp[i] multiplies x[i+1] in row i (upp[n-1] is unused)
    pub upp: Array1<f64>,
}

impl Tridiagonal {
    /// Allocates a new (zeroed) instance
    pub fn new(n: usize) -> Self {
        Tridiagonal {
            n,
            low: Array1::zeros(n),
            dia: Array1::zeros(n),
            upp: Array1::zeros(n),
        }
    }

    /// Clears all diagonals
    pub fn reset(&mut self) {
        self.low.fill(0.0);
        self.dia.fill(0.0);
        self.upp.fill(0.0);
    }

    /// Computes y = A x
    pub fn mat_vec(&self, x: &Array1<f64>) -> Array1<f64> {
        let n = self.n;
        let mut y = Array1::zeros(n);
        for i in 0..n {
            let mut v = self.dia[i] * x[i];
            if i > 0 {
                v += self.low[i] * x[i - 1];
            }
            if i + 1 < n {
                v += self.upp[i] * x[i + 1];
            }
            y[i] = v;
        }
        y
    }

    /// Solves A x = d with the Thomas algorithm (no pivoting)
    ///
    /// On input, `d` holds the right-hand side; on output, the solution.
    #[allow(clippy::many_single_char_names)]
    pub fn solve(&self, d: &mut Array1<f64>) -> Result<(), Error> {
        let n = self.n;
        if d.len() != n {
            return Err(Error::InvalidParameter(
                "right-hand side is incompatible with the tridiagonal matrix".to_string(),
            ));
        }
        if n == 0 {
            return Ok(());
        }
        let a = &self.low;
        let b = &self.dia;
        let c = &self.upp;
        let mut w = vec![0.0; n];

        // forward sweep
        if b[0] == 0.0 {
            return Err(Error::SingularMatrix("zero pivot in tridiagonal solver"));
        }
        w[0] = c[0] / b[0];
        d[0] = d[0] / b[0];
        for i in 1..n {
            let den = b[i] - a[i] * w[i - 1];
            if den == 0.0 || !den.is_finite() {
                return Err(Error::SingularMatrix("zero pivot in tridiagonal solver"));
            }
            w[i] = if i + 1 < n { c[i] / den } else { 0.0 };
            d[i] = (d[i] - a[i] * d[i - 1]) / den;
        }

        // back substitution
        for i in (0..n - 1).rev() {
            d[i] = d[i] - w[i] * d[i + 1];
        }
        Ok(())
    }
}

/// Holds a square matrix whose off-diagonal entries follow the edges of a tree
///
/// Row `i` couples node `i` to its parent and to its children only, as in the equations of a
/// branched root network. Eliminating the leaves first produces no fill-in, thus the system is
/// solved in O(n) like a tridiagonal one.
#[derive(Clone, Debug)]
pub struct TreeMatrix {
    /// Size of matrix (= number of nodes)
    pub n: usize,

    /// Main diagonal
    pub dia: Array1<f64>,

    /// up[i] = A[i, parent(i)] (unused at the root)
    pub up: Array1<f64>,

    /// down[i] = A[parent(i), i] (unused at the root)
    pub down: Array1<f64>,

    parent: Vec<Option<usize>>,

    /// Nodes sorted such that parents come before their children
    order: Vec<usize>,
}

impl TreeMatrix {
    /// Allocates a new (zeroed) instance from the edges of a tree
    ///
    /// Fails if the edges do not form a tree spanning all nodes.
    pub fn new(n: usize, edges: &[[usize; 2]], root: usize) -> Result<Self, Error> {
        if root >= n || edges.len() + 1 != n {
            return Err(Error::InvalidGeometry(format!(
                "{} edges cannot form a tree with {} nodes",
                edges.len(),
                n
            )));
        }
        let mut neighbours = vec![Vec::new(); n];
        for [a, b] in edges {
            if *a >= n || *b >= n || a == b {
                return Err(Error::InvalidGeometry(format!("invalid edge [{}, {}]", a, b)));
            }
            neighbours[*a].push(*b);
            neighbours[*b].push(*a);
        }
        let mut parent = vec![None; n];
        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        visited[root] = true;
        order.push(root);
        let mut k = 0;
        while k < order.len() {
            let i = order[k];
            for j in &neighbours[i] {
                if !visited[*j] {
                    visited[*j] = true;
                    parent[*j] = Some(i);
                    order.push(*j);
                }
            }
            k += 1;
        }
        if order.len() != n {
            return Err(Error::InvalidGeometry("the edges do not connect all nodes".to_string()));
        }
        Ok(TreeMatrix {
            n,
            dia: Array1::zeros(n),
            up: Array1::zeros(n),
            down: Array1::zeros(n),
            parent,
            order,
        })
    }

    /// Returns the parent of node i
    pub fn parent(&self, i: usize) -> Option<usize> {
        self.parent[i]
    }

    /// Clears all entries
    pub fn reset(&mut self) {
        self.dia.fill(0.0);
        self.up.fill(0.0);
        self.down.fill(0.0);
    }

    /// Adds a value to A[i, j]
    ///
    /// Fails if (i, j) is not on the diagonal or on an edge of the tree.
    pub fn add(&mut self, i: usize, j: usize, value: f64) -> Result<(), Error> {
        if i == j {
            self.dia[i] += value;
        } else if self.parent[i] == Some(j) {
            self.up[i] += value;
        } else if self.parent[j] == Some(i) {
            self.down[j] += value;
        } else {
            return Err(Error::InvalidParameter(format!("({}, {}) is not an edge of the tree", i, j)));
        }
        Ok(())
    }

    /// Sets all entries of row i to zero
    pub fn clear_row(&mut self, i: usize) {
        self.dia[i] = 0.0;
        self.up[i] = 0.0;
        for j in 0..self.n {
            if self.parent[j] == Some(i) {
                self.down[j] = 0.0;
            }
        }
    }

    /// Computes y = A x
    pub fn mat_vec(&self, x: &Array1<f64>) -> Array1<f64> {
        let mut y = Array1::zeros(self.n);
        for i in 0..self.n {
            y[i] += self.dia[i] * x[i];
            if let Some(p) = self.parent[i] {
                y[i] += self.up[i] * x[p];
                y[p] += self.down[i] * x[i];
            }
        }
        y
    }

    /// Solves A x = d by eliminating the leaves first (no pivoting)
    ///
    /// On input, `d` holds the right-hand side; on output, the solution.
    pub fn solve(&self, d: &mut Array1<f64>) -> Result<(), Error> {
        if d.len() != self.n {
            return Err(Error::InvalidParameter(
                "right-hand side is incompatible with the tree matrix".to_string(),
            ));
        }
        let scale = self.dia.iter().fold(0.0_f64, |acc, v| f64::max(acc, f64::abs(*v)));
        let tiny = f64::EPSILON * f64::max(scale, f64::MIN_POSITIVE) * (self.n as f64);
        let mut w = self.dia.to_vec();

        // elimination toward the root
        for i in self.order.iter().rev() {
            if f64::abs(w[*i]) <= tiny || !w[*i].is_finite() {
                return Err(Error::SingularMatrix("zero pivot in tree solver"));
            }
            if let Some(p) = self.parent[*i] {
                let factor = self.down[*i] / w[*i];
                w[p] -= factor * self.up[*i];
                d[p] -= factor * d[*i];
            }
        }

        // substitution toward the leaves
        for i in &self.order {
            let coupled = match self.parent[*i] {
                Some(p) => self.up[*i] * d[p],
                None => 0.0,
            };
            d[*i] = (d[*i] - coupled) / w[*i];
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
