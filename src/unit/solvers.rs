//! Closed-form fits seeding the weights of projection units.

use crate::error::{Error, Result};

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use tracing::{debug, warn};

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Regularization added to systems which may be singular.
const RIDGE: f64 = 1e-6;

/// A linear projection `W (x - mean)` with `k` rows of `d` columns.
#[derive(Debug, Clone)]
pub struct Projection {
    pub weights: DMatrix<f64>,
    pub mean: DVector<f64>,
}

impl Projection {
    /// Encoder weights and the biases `-W mean`.
    pub fn encoder_params(&self) -> (Vec<f32>, Vec<f32>) {
        let bias = -(&self.weights * &self.mean);
        (row_major(&self.weights), to_f32(bias.iter()))
    }

    /// Decoder reversing an orthonormal projection: `W^T`, biased by the mean.
    pub fn transposed_params(&self) -> (Vec<f32>, Vec<f32>) {
        (
            row_major(&self.weights.transpose()),
            to_f32(self.mean.iter()),
        )
    }

    /// Decoder reversing any projection with its pseudo inverse, biased by the mean.
    pub fn pseudo_inverse_params(&self) -> Result<(Vec<f32>, Vec<f32>)> {
        let inverse = self
            .weights
            .clone()
            .pseudo_inverse(RIDGE)
            .map_err(|_| Error::Numerical {
                stage: "projection pseudo inverse",
            })?;
        check_finite(&inverse, "projection pseudo inverse")?;
        Ok((row_major(&inverse), to_f32(self.mean.iter())))
    }
}

/// Stacks flattened samples of length `dim` as the rows of a matrix.
pub fn samples_matrix(samples: &[f32], dim: usize) -> DMatrix<f64> {
    assert!(dim > 0 && samples.len() % dim == 0, "Samples don't divide into rows of {}", dim);
    let data: Vec<f64> = samples.iter().map(|v| *v as f64).collect();
    DMatrix::from_row_slice(samples.len() / dim, dim, &data)
}

fn column_means(samples: &DMatrix<f64>) -> DVector<f64> {
    let n = samples.nrows() as f64;
    DVector::from_fn(samples.ncols(), |j, _| samples.column(j).sum() / n)
}

/// `k` eigenvectors with the largest eigenvalues as the columns of a matrix, with their eigenvalues.
fn leading_eigenvectors(
    values: &DVector<f64>,
    vectors: &DMatrix<f64>,
    k: usize,
) -> (DMatrix<f64>, Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| values[*b].partial_cmp(&values[*a]).unwrap_or(Ordering::Equal));
    order.truncate(k);
    let leading = DMatrix::from_fn(vectors.nrows(), k, |i, j| vectors[(i, order[j])]);
    (leading, order.iter().map(|i| values[*i]).collect())
}

/// Principal components of the rows of `samples`.
pub fn pca(samples: &DMatrix<f64>, k: usize) -> Result<Projection> {
    let (n, d) = samples.shape();
    if n == 0 {
        return Err(Error::Empty("principal component samples"));
    }
    if k > d {
        return Err(Error::config(format!(
            "cannot extract {} components from {} dimensions",
            k, d
        )));
    }

    let mean = column_means(samples);
    let centered = DMatrix::from_fn(n, d, |i, j| samples[(i, j)] - mean[j]);
    let covariance = centered.transpose() * &centered / n as f64;
    check_finite(&covariance, "pca covariance")?;

    let eigen = SymmetricEigen::new(covariance);
    let (components, spectrum) = leading_eigenvectors(&eigen.eigenvalues, &eigen.eigenvectors, k);
    check_finite(&components, "pca eigen decomposition")?;
    debug!(
        samples = n,
        dims = d,
        components = k,
        largest = spectrum.first().copied().unwrap_or(0.),
        smallest = spectrum.last().copied().unwrap_or(0.),
        "fitted principal components"
    );

    Ok(Projection {
        weights: components.transpose(),
        mean,
    })
}

/// Linear discriminant directions of the labelled rows of `samples`, normalized to unit length.
///
/// The within class scatter is whitened first so the generalized problem
/// `Sb w = l Sw w` becomes a symmetric one.
pub fn lda(samples: &DMatrix<f64>, labels: &[usize], k: usize) -> Result<Projection> {
    let (n, d) = samples.shape();
    assert_eq!(labels.len(), n, "Every sample needs a label");
    if n == 0 {
        return Err(Error::Empty("discriminant analysis samples"));
    }
    if k > d {
        return Err(Error::config(format!(
            "cannot extract {} discriminant directions from {} dimensions",
            k, d
        )));
    }

    let mut classes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, label) in labels.iter().enumerate() {
        classes.entry(*label).or_default().push(row);
    }
    if classes.len() < 2 {
        warn!(
            classes = classes.len(),
            "discriminant analysis on a single class has no between class scatter"
        );
    }

    let mean = column_means(samples);
    let mut within = DMatrix::zeros(d, d);
    let mut between = DMatrix::zeros(d, d);
    for rows in classes.values() {
        let count = rows.len() as f64;
        let class_mean = DVector::from_fn(d, |j, _| {
            rows.iter().map(|r| samples[(*r, j)]).sum::<f64>() / count
        });
        for r in rows {
            let diff = samples.row(*r).transpose() - &class_mean;
            within += &diff * diff.transpose();
        }
        let diff = &class_mean - &mean;
        between += (&diff * diff.transpose()) * count;
    }

    let ridge = RIDGE * (within.trace() / d as f64).max(1.);
    for i in 0..d {
        within[(i, i)] += ridge;
    }
    check_finite(&within, "lda within class scatter")?;

    let scatter = SymmetricEigen::new(within);
    let inv_sqrt = scatter.eigenvalues.map(|v| 1. / v.max(ridge).sqrt());
    let whitening =
        &scatter.eigenvectors * DMatrix::from_diagonal(&inv_sqrt) * scatter.eigenvectors.transpose();

    let problem = &whitening * between * &whitening;
    let eigen = SymmetricEigen::new(problem);
    let (directions, spectrum) = leading_eigenvectors(&eigen.eigenvalues, &eigen.eigenvectors, k);

    let mut directions = &whitening * directions;
    for mut column in directions.column_iter_mut() {
        let norm = column.norm();
        if norm > 0. {
            column /= norm;
        }
    }
    check_finite(&directions, "lda eigen decomposition")?;
    debug!(
        samples = n,
        dims = d,
        classes = classes.len(),
        directions = k,
        largest = spectrum.first().copied().unwrap_or(0.),
        "fitted discriminant directions"
    );

    Ok(Projection {
        weights: directions.transpose(),
        mean,
    })
}

/// Fits `targets ~ W hidden + b` by ridge regularized least squares.
/// Returns the row major `W` (targets x hidden) and `b`.
pub fn fit_decoder(hidden: &DMatrix<f64>, targets: &DMatrix<f64>) -> Result<(Vec<f32>, Vec<f32>)> {
    let (n, k) = hidden.shape();
    assert_eq!(targets.nrows(), n, "Every hidden vector needs a target");

    let augmented = DMatrix::from_fn(n, k + 1, |i, j| if j < k { hidden[(i, j)] } else { 1. });
    let mut gram = augmented.transpose() * &augmented;
    for i in 0..=k {
        gram[(i, i)] += RIDGE;
    }
    let rhs = augmented.transpose() * targets;

    let solution = gram
        .cholesky()
        .ok_or(Error::Numerical {
            stage: "decoder least squares",
        })?
        .solve(&rhs);
    check_finite(&solution, "decoder least squares")?;

    let weights = solution.rows(0, k).transpose();
    let biases = solution.row(k);
    Ok((row_major(&weights.into_owned()), to_f32(biases.iter())))
}

fn row_major(matrix: &DMatrix<f64>) -> Vec<f32> {
    to_f32(matrix.transpose().iter())
}

fn to_f32<'a, I: Iterator<Item = &'a f64>>(values: I) -> Vec<f32> {
    values.map(|v| *v as f32).collect()
}

fn check_finite(matrix: &DMatrix<f64>, stage: &'static str) -> Result<()> {
    if matrix.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(Error::Numerical { stage })
    }
}
