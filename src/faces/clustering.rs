//! Density-based clustering of face embeddings.
//!
//! DBSCAN over Euclidean distance. A point is a core point when at least
//! `min_points` *other* points lie within `eps`. Core points within `eps` of
//! each other share a cluster, border points join the first cluster that
//! reaches them, and everything else is noise (`-1`).
//!
//! Labels are assigned in order of first discovery, so identical input order
//! and parameters always yield identical labels.

use std::collections::{BTreeMap, VecDeque};

use super::detector::euclidean_distance;
use crate::config::ClusteringConfig;

/// Label for faces that belong to no cluster
pub const NOISE: i32 = -1;
const UNVISITED: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DbscanParams {
    /// Neighbourhood radius
    pub eps: f32,
    /// Neighbours (excluding the point itself) required for a core point
    pub min_points: usize,
}

impl From<&ClusteringConfig> for DbscanParams {
    fn from(config: &ClusteringConfig) -> Self {
        Self {
            eps: config.eps,
            min_points: config.min_points,
        }
    }
}

fn region_query(points: &[Vec<f32>], idx: usize, eps: f32) -> Vec<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(j, p)| *j != idx && euclidean_distance(&points[idx], p) <= eps)
        .map(|(j, _)| j)
        .collect()
}

/// Cluster embeddings, returning one label per input point.
pub fn dbscan(points: &[Vec<f32>], params: DbscanParams) -> Vec<i32> {
    let mut labels = vec![UNVISITED; points.len()];
    let mut next_cluster = 0;

    for i in 0..points.len() {
        if labels[i] != UNVISITED {
            continue;
        }

        let neighbours = region_query(points, i, params.eps);
        if neighbours.len() < params.min_points {
            labels[i] = NOISE;
            continue;
        }

        let cluster = next_cluster;
        next_cluster += 1;
        labels[i] = cluster;

        let mut queue: VecDeque<usize> = neighbours.into();
        while let Some(j) = queue.pop_front() {
            if labels[j] == NOISE {
                // Border point
                labels[j] = cluster;
                continue;
            }
            if labels[j] != UNVISITED {
                continue;
            }
            labels[j] = cluster;

            let expansion = region_query(points, j, params.eps);
            if expansion.len() >= params.min_points {
                queue.extend(expansion);
            }
        }
    }

    labels
}

/// Indices of each label's members, in input order. Noise sorts first.
pub fn group_by_label(labels: &[i32]) -> BTreeMap<i32, Vec<usize>> {
    let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (idx, label) in labels.iter().enumerate() {
        groups.entry(*label).or_default().push(idx);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn params(eps: f32, min_points: usize) -> DbscanParams {
        DbscanParams { eps, min_points }
    }

    /// Labels as a set of member sets, ignoring label values
    fn partition(labels: &[i32]) -> BTreeSet<Vec<usize>> {
        group_by_label(labels)
            .into_iter()
            .filter(|(label, _)| *label != NOISE)
            .map(|(_, members)| members)
            .collect()
    }

    fn noise(labels: &[i32]) -> Vec<usize> {
        group_by_label(labels).remove(&NOISE).unwrap_or_default()
    }

    #[test]
    fn test_dense_group_and_outliers() {
        let points = vec![
            vec![0.0, 0.0],
            vec![0.05, 0.0],
            vec![0.0, 0.05],
            vec![20.0, 0.0],
            vec![0.0, -20.0],
        ];
        let labels = dbscan(&points, params(0.5, 2));

        assert!(labels[0] >= 0);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[3], NOISE);
        assert_eq!(labels[4], NOISE);
    }

    #[test]
    fn test_empty_input() {
        assert!(dbscan(&[], params(0.5, 2)).is_empty());
    }

    #[test]
    fn test_all_noise() {
        let points = vec![vec![0.0], vec![10.0], vec![20.0]];
        let labels = dbscan(&points, params(1.0, 1));
        assert!(labels.iter().all(|l| *l == NOISE));
    }

    #[test]
    fn test_min_points_counts_others_only() {
        // A pair within eps: each point has exactly one neighbour
        let points = vec![vec![0.0], vec![0.3]];
        assert_eq!(partition(&dbscan(&points, params(0.5, 1))).len(), 1);
        assert_eq!(noise(&dbscan(&points, params(0.5, 2))), vec![0, 1]);
    }

    #[test]
    fn test_border_point_joins_cluster() {
        // 0..2 form a dense core; 3 is only near point 2
        let points = vec![vec![0.0], vec![0.1], vec![0.2], vec![0.65]];
        let labels = dbscan(&points, params(0.5, 2));
        assert_eq!(partition(&labels), BTreeSet::from([vec![0, 1, 2, 3]]));
    }

    #[test]
    fn test_chain_connects_through_cores() {
        let points: Vec<Vec<f32>> = (0..6).map(|i| vec![i as f32 * 0.4]).collect();
        let labels = dbscan(&points, params(0.5, 1));
        assert_eq!(partition(&labels).len(), 1);
        assert!(noise(&labels).is_empty());
    }

    #[test]
    fn test_deterministic_partition() {
        let points = vec![
            vec![0.0, 0.0],
            vec![5.0, 5.0],
            vec![0.1, 0.1],
            vec![5.1, 5.0],
            vec![9.0, -9.0],
        ];
        let first = dbscan(&points, params(0.5, 1));
        let second = dbscan(&points, params(0.5, 1));
        assert_eq!(partition(&first), partition(&second));
        assert_eq!(partition(&first), BTreeSet::from([vec![0, 2], vec![1, 3]]));
        assert_eq!(noise(&first), vec![4]);
        assert!(first.iter().all(|l| *l == NOISE || *l >= 0));
    }
}
