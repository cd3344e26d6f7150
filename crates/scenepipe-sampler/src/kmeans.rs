//! Lloyd's k-means over 2-D points with k-means++ seeding and restarts.

use rand::Rng;

/// A point in angle space: `[theta, phi]` in degrees.
pub type Point = [f64; 2];

/// Fewest restarts any clustering run performs.
pub const MIN_N_INIT: usize = 10;

/// Configuration for the clustering run.
#[derive(Debug, Clone)]
pub struct KMeansConfig {
    /// Independent seeded runs; the lowest-inertia run wins. Raised to
    /// [`MIN_N_INIT`] when smaller.
    pub n_init: usize,
    /// Lloyd iteration cap per run
    pub max_iter: usize,
    /// Stop when no centroid moves further than this
    pub tolerance: f64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            n_init: 10,
            max_iter: 300,
            tolerance: 1e-4,
        }
    }
}

/// Result of a clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    /// Cluster label per input point
    pub labels: Vec<usize>,
    /// One centroid per cluster; a cluster may end up with no members
    pub centroids: Vec<Point>,
    /// Sum of squared distances from each point to its centroid
    pub inertia: f64,
}

impl KMeansFit {
    fn empty() -> Self {
        Self {
            labels: Vec::new(),
            centroids: Vec::new(),
            inertia: 0.0,
        }
    }

    /// Member indices per cluster, in input order. Empty clusters are kept
    /// as empty vectors so positions line up with `centroids`.
    pub fn clusters(&self) -> Vec<Vec<usize>> {
        let mut clusters = vec![Vec::new(); self.centroids.len()];
        for (i, &label) in self.labels.iter().enumerate() {
            clusters[label].push(i);
        }
        clusters
    }
}

/// Cluster `points` into at most `k` groups.
///
/// `k` is clamped to the number of points, so no run ever asks for more
/// clusters than there are observations. No points (or `k == 0`) yields an
/// empty fit.
pub fn kmeans<R: Rng + ?Sized>(
    points: &[Point],
    k: usize,
    config: &KMeansConfig,
    rng: &mut R,
) -> KMeansFit {
    if points.is_empty() || k == 0 {
        return KMeansFit::empty();
    }
    let k = k.min(points.len());

    let mut best: Option<KMeansFit> = None;
    for _ in 0..config.n_init.max(MIN_N_INIT) {
        let fit = lloyd(points, k, config, rng);
        if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
            best = Some(fit);
        }
    }

    best.unwrap_or_else(KMeansFit::empty)
}

fn lloyd<R: Rng + ?Sized>(points: &[Point], k: usize, config: &KMeansConfig, rng: &mut R) -> KMeansFit {
    let mut centroids = seed_centroids(points, k, rng);
    let mut labels = vec![0usize; points.len()];
    let tolerance_sq = config.tolerance * config.tolerance;

    for _ in 0..config.max_iter {
        assign(points, &centroids, &mut labels);

        let mut sums = vec![[0.0f64; 2]; k];
        let mut counts = vec![0usize; k];
        for (p, &label) in points.iter().zip(&labels) {
            sums[label][0] += p[0];
            sums[label][1] += p[1];
            counts[label] += 1;
        }

        let mut max_shift = 0.0f64;
        for c in 0..k {
            // An emptied cluster keeps its previous centroid.
            if counts[c] == 0 {
                continue;
            }
            let n = counts[c] as f64;
            let updated = [sums[c][0] / n, sums[c][1] / n];
            max_shift = max_shift.max(squared_distance(&centroids[c], &updated));
            centroids[c] = updated;
        }

        if max_shift <= tolerance_sq {
            break;
        }
    }

    let inertia = assign(points, &centroids, &mut labels);
    KMeansFit {
        labels,
        centroids,
        inertia,
    }
}

/// k-means++: each next centroid is drawn with probability proportional to
/// its squared distance from the nearest centroid chosen so far.
fn seed_centroids<R: Rng + ?Sized>(points: &[Point], k: usize, rng: &mut R) -> Vec<Point> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.random_range(0..points.len())]);

    let mut distances: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = distances.iter().sum();
        let next = if total > 0.0 {
            weighted_pick(&distances, rng.random::<f64>() * total)
        } else {
            // Every point already coincides with a centroid.
            rng.random_range(0..points.len())
        };

        let centroid = points[next];
        centroids.push(centroid);
        for (d, p) in distances.iter_mut().zip(points) {
            *d = d.min(squared_distance(p, &centroid));
        }
    }

    centroids
}

fn weighted_pick(weights: &[f64], mut target: f64) -> usize {
    let mut last_positive = 0;
    for (i, &w) in weights.iter().enumerate() {
        if w <= 0.0 {
            continue;
        }
        if target < w {
            return i;
        }
        target -= w;
        last_positive = i;
    }
    last_positive
}

/// Assign each point to its nearest centroid (lowest index on ties) and
/// return the resulting inertia.
fn assign(points: &[Point], centroids: &[Point], labels: &mut [usize]) -> f64 {
    let mut inertia = 0.0;
    for (p, label) in points.iter().zip(labels.iter_mut()) {
        let (nearest, distance) = nearest_centroid(p, centroids);
        *label = nearest;
        inertia += distance;
    }
    inertia
}

fn nearest_centroid(point: &Point, centroids: &[Point]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_distance(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

pub(crate) fn squared_distance(a: &Point, b: &Point) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}
