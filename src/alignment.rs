//! Word alignment matrices.
//!
//! A matrix has one row per word of the first sentence and one column per
//! word of the second one (NULL words excluded); cell `(i, j)` is set when
//! row word `i` is aligned with column word `j`. Indices are 0-based.

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentMatrix {
    rows: usize,
    cols: usize,
    cells: Vec<bool>,
}

impl AlignmentMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        AlignmentMatrix {
            rows,
            cols,
            cells: vec![false; rows * cols],
        }
    }

    /// Build a matrix from a list of `(row, col)` links.
    pub fn from_links(rows: usize, cols: usize, links: &[(usize, usize)]) -> Result<Self> {
        let mut matrix = AlignmentMatrix::new(rows, cols);
        for &(i, j) in links {
            if i >= rows || j >= cols {
                return Err(anyhow!("link ({}, {}) out of a {}x{} matrix", i, j, rows, cols));
            }
            matrix.set(i, j);
        }
        Ok(matrix)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> bool {
        self.cells[i * self.cols + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize) {
        self.cells[i * self.cols + j] = true;
    }

    pub fn is_row_aligned(&self, i: usize) -> bool {
        (0..self.cols).any(|j| self.get(i, j))
    }

    pub fn is_col_aligned(&self, j: usize) -> bool {
        (0..self.rows).any(|i| self.get(i, j))
    }

    /// All links, row-major.
    pub fn links(&self) -> Vec<(usize, usize)> {
        let mut links = Vec::new();
        for i in 0..self.rows {
            for j in 0..self.cols {
                if self.get(i, j) {
                    links.push((i, j));
                }
            }
        }
        links
    }

    pub fn transpose(&self) -> AlignmentMatrix {
        let mut t = AlignmentMatrix::new(self.cols, self.rows);
        for (i, j) in self.links() {
            t.set(j, i);
        }
        t
    }

    fn check_shape(&self, other: &AlignmentMatrix) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(anyhow!(
                "cannot combine a {}x{} alignment with a {}x{} one",
                self.rows,
                self.cols,
                other.rows,
                other.cols
            ));
        }
        Ok(())
    }

    /// Links present in both matrices
    pub fn intersection(&self, other: &AlignmentMatrix) -> Result<AlignmentMatrix> {
        self.check_shape(other)?;
        let cells = self.cells.iter().zip(&other.cells).map(|(a, b)| *a && *b).collect();
        Ok(AlignmentMatrix { rows: self.rows, cols: self.cols, cells })
    }

    /// Links present in either matrix
    pub fn union(&self, other: &AlignmentMatrix) -> Result<AlignmentMatrix> {
        self.check_shape(other)?;
        let cells = self.cells.iter().zip(&other.cells).map(|(a, b)| *a || *b).collect();
        Ok(AlignmentMatrix { rows: self.rows, cols: self.cols, cells })
    }

    fn has_adjacent_link(&self, i: usize, j: usize) -> bool {
        (i > 0 && self.get(i - 1, j))
            || (i + 1 < self.rows && self.get(i + 1, j))
            || (j > 0 && self.get(i, j - 1))
            || (j + 1 < self.cols && self.get(i, j + 1))
    }

    /// Refined symmetrization ("symmetr1"): start from the intersection of
    /// both matrices and repeatedly add links of the union that either
    /// connect two unaligned words, or touch an existing link horizontally
    /// or vertically while one of their words is still unaligned.
    pub fn symmetr1(&mut self, other: &AlignmentMatrix) -> Result<()> {
        let union = self.union(other)?;
        let mut sym = self.intersection(other)?;
        loop {
            let mut changed = false;
            for (i, j) in union.links() {
                if sym.get(i, j) {
                    continue;
                }
                let row_aligned = sym.is_row_aligned(i);
                let col_aligned = sym.is_col_aligned(j);
                let add = (!row_aligned && !col_aligned)
                    || ((!row_aligned || !col_aligned) && sym.has_adjacent_link(i, j));
                if add {
                    sym.set(i, j);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        *self = sym;
        Ok(())
    }
}
