//! Frame down-sampling for reconstruction results.
//!
//! An SfM worker returns one camera pose per extracted frame, often
//! hundreds or thousands. Before the NeRF stage the frames are reduced to a
//! spatially representative subset:
//!
//! 1. Each pose's translation is converted to spherical angles `(theta, phi)`.
//! 2. The angles are clustered with k-means (several restarts, best kept).
//! 3. One frame per non-empty cluster is kept.
//!
//! Everything here is pure: no I/O, no global state. Randomness comes from
//! a caller-supplied or seeded RNG so results can be pinned in tests.

pub mod angle;
pub mod config;
pub mod kmeans;
pub mod sampler;
pub mod selection;

pub use angle::{angular_coordinate, AngularCoordinate, GeometryError};
pub use config::SamplerConfig;
pub use kmeans::{kmeans, KMeansConfig, KMeansFit, Point};
pub use sampler::{sample, FrameSampler, RejectedFrame, Sample};
pub use selection::SelectionPolicy;
