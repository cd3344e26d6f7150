//! Representative selection within a cluster.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::kmeans::{squared_distance, Point};

/// How one frame is chosen from each cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Uniformly random member
    Random,
    /// Member closest to the cluster centroid, lowest index on ties
    #[default]
    NearestCentroid,
}

impl SelectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionPolicy::Random => "random",
            SelectionPolicy::NearestCentroid => "nearest_centroid",
        }
    }

    /// Pick one entry of `members` (indices into `points`).
    ///
    /// `members` must be non-empty.
    pub fn select<R: Rng + ?Sized>(
        &self,
        members: &[usize],
        points: &[Point],
        centroid: &Point,
        rng: &mut R,
    ) -> usize {
        debug_assert!(!members.is_empty());
        match self {
            SelectionPolicy::Random => members[rng.random_range(0..members.len())],
            SelectionPolicy::NearestCentroid => {
                let mut best = members[0];
                let mut best_distance = squared_distance(&points[best], centroid);
                for &m in &members[1..] {
                    let d = squared_distance(&points[m], centroid);
                    if d < best_distance || (d == best_distance && m < best) {
                        best = m;
                        best_distance = d;
                    }
                }
                best
            }
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(SelectionPolicy::Random),
            "nearest_centroid" | "nearest-centroid" | "centroid" => {
                Ok(SelectionPolicy::NearestCentroid)
            }
            other => Err(format!("unknown selection policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_nearest_centroid_picks_closest() {
        let points = [[0.0, 0.0], [4.0, 4.0], [2.1, 2.0], [10.0, 10.0]];
        let members = [0, 1, 2];
        let mut rng = StdRng::seed_from_u64(0);
        let chosen = SelectionPolicy::NearestCentroid.select(&members, &points, &[2.0, 2.0], &mut rng);
        assert_eq!(chosen, 2);
    }

    #[test]
    fn test_nearest_centroid_ties_take_lowest_index() {
        let points = [[1.0, 0.0], [-1.0, 0.0]];
        let mut rng = StdRng::seed_from_u64(0);
        let chosen = SelectionPolicy::NearestCentroid.select(&[1, 0], &points, &[0.0, 0.0], &mut rng);
        assert_eq!(chosen, 0);
    }

    #[test]
    fn test_random_stays_within_members() {
        let points = vec![[0.0, 0.0]; 10];
        let members = [2, 5, 7];
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..50 {
            let chosen = SelectionPolicy::Random.select(&members, &points, &[0.0, 0.0], &mut rng);
            assert!(members.contains(&chosen));
        }
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!("random".parse::<SelectionPolicy>().unwrap(), SelectionPolicy::Random);
        assert_eq!(
            "Nearest_Centroid".parse::<SelectionPolicy>().unwrap(),
            SelectionPolicy::NearestCentroid
        );
        assert!("closest".parse::<SelectionPolicy>().is_err());
        assert_eq!(
            serde_json::to_string(&SelectionPolicy::NearestCentroid).unwrap(),
            "\"nearest_centroid\""
        );
    }
}
