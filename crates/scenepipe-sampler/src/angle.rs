//! Spherical camera angles from extrinsic matrices.

use thiserror::Error;

use scenepipe_models::Matrix;

/// Camera position on the sphere around the scene origin, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngularCoordinate {
    /// Polar angle from +z, `acos(z / r)`, in `[0, 180]`
    pub theta: f64,
    /// Azimuth, `atan(y / x)`, in `[-90, 90]`
    pub phi: f64,
}

impl AngularCoordinate {
    pub fn as_point(&self) -> [f64; 2] {
        [self.theta, self.phi]
    }
}

/// Per-frame geometry errors. These never produce NaN coordinates.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("extrinsic matrix must be 4x4, got {rows} rows with a row of length {cols}")]
    MalformedShape { rows: usize, cols: usize },

    #[error("extrinsic matrix has a non-finite entry at ({row}, {col})")]
    NonFinite { row: usize, col: usize },

    #[error("translation vector has zero length")]
    ZeroTranslation,
}

/// Compute `(theta, phi)` from the translation column of a 4x4 pose.
///
/// On the polar axis (`x == 0 && y == 0`) the azimuth is undefined and is
/// reported as `0`. With `x == 0` and `y != 0`, `phi` is `±90`.
pub fn angular_coordinate(matrix: &Matrix) -> Result<AngularCoordinate, GeometryError> {
    validate_shape(matrix)?;

    let x = matrix[0][3];
    let y = matrix[1][3];
    let z = matrix[2][3];

    let r = x.hypot(y).hypot(z);
    if r == 0.0 {
        return Err(GeometryError::ZeroTranslation);
    }

    let theta = (z / r).clamp(-1.0, 1.0).acos().to_degrees();
    let phi = if x == 0.0 && y == 0.0 {
        0.0
    } else {
        (y / x).atan().to_degrees()
    };

    Ok(AngularCoordinate { theta, phi })
}

fn validate_shape(matrix: &Matrix) -> Result<(), GeometryError> {
    if matrix.len() != 4 {
        let cols = matrix.first().map_or(0, Vec::len);
        return Err(GeometryError::MalformedShape {
            rows: matrix.len(),
            cols,
        });
    }
    if let Some(row) = matrix.iter().find(|row| row.len() != 4) {
        return Err(GeometryError::MalformedShape {
            rows: 4,
            cols: row.len(),
        });
    }
    for (r, row) in matrix.iter().enumerate() {
        if let Some(c) = row.iter().position(|v| !v.is_finite()) {
            return Err(GeometryError::NonFinite { row: r, col: c });
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn pose(x: f64, y: f64, z: f64) -> Matrix {
    vec![
        vec![1.0, 0.0, 0.0, x],
        vec![0.0, 1.0, 0.0, y],
        vec![0.0, 0.0, 1.0, z],
        vec![0.0, 0.0, 0.0, 1.0],
    ]
}
