//! Local maxima of the density and the ratios of their characteristic spacings.

use serde::{Deserialize, Serialize};

use crate::grid::DensityField;

/// A strict local maximum of the field.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Cell coordinates (i, j, k)
    pub cell: [usize; 3],
    pub value: f64,
}

/// Peaks found in one field and the spacing ratios derived from them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakAnalysis {
    pub peaks: Vec<Peak>,
    /// Mean spacing of each cluster over the smallest cluster's mean, ascending.
    /// Empty when fewer than two peaks exist.
    pub spacing_ratios: Vec<f64>,
}

/// Cells strictly greater than all 26 periodic neighbors and at least
/// `mean + min_relative_height * (max - mean)`. Sorted by (i, j, k).
pub fn find_local_maxima(field: &DensityField, min_relative_height: f64) -> Vec<Peak> {
    let n = field.resolution;
    let mean = field.mean();
    let threshold = mean + min_relative_height * (field.max() - mean);

    let mut peaks = Vec::new();
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let idx = field.cell_index(i, j, k);
                let value = field.values()[idx];
                if value < threshold {
                    continue;
                }
                if is_strict_maximum(field, i, j, k, idx, value) {
                    peaks.push(Peak { cell: [i, j, k], value });
                }
            }
        }
    }
    peaks.sort_by_key(|p| (p.cell[0], p.cell[1], p.cell[2]));
    peaks
}

fn is_strict_maximum(field: &DensityField, i: usize, j: usize, k: usize, idx: usize, value: f64) -> bool {
    for dk in -1..=1 {
        for dj in -1..=1 {
            for di in -1..=1 {
                if di == 0 && dj == 0 && dk == 0 {
                    continue;
                }
                let nb = field.offset_index(i, j, k, di, dj, dk);
                // Tiny grids wrap a neighbor onto the cell itself
                if nb == idx {
                    continue;
                }
                if field.values()[nb] >= value {
                    return false;
                }
            }
        }
    }
    true
}

/// Characteristic spacing ratios of a set of peaks.
///
/// Each peak contributes the minimum-image distance to its nearest other
/// peak. Those distances are grouped, in ascending order, into clusters whose
/// members lie within `tolerance` (relative) of the cluster's smallest
/// member. The result is each cluster's mean divided by the first cluster's
/// mean, so it always starts with 1.0. Fewer than two peaks give an empty
/// list.
pub fn measure_spacing_ratios(field: &DensityField, peaks: &[Peak], tolerance: f64) -> Vec<f64> {
    if peaks.len() < 2 {
        return Vec::new();
    }

    let cell = |p: &Peak| (p.cell[0], p.cell[1], p.cell[2]);
    let mut spacings: Vec<f64> = peaks
        .iter()
        .enumerate()
        .map(|(a, pa)| {
            peaks
                .iter()
                .enumerate()
                .filter(|(b, _)| *b != a)
                .map(|(_, pb)| field.cell_distance(cell(pa), cell(pb)))
                .fold(f64::INFINITY, f64::min)
        })
        .filter(|d| *d > 0.0)
        .collect();
    if spacings.is_empty() {
        return Vec::new();
    }
    spacings.sort_by(|a, b| a.total_cmp(b));

    let mut clusters: Vec<(f64, f64, usize)> = Vec::new(); // (first, sum, count)
    for d in spacings {
        match clusters.last_mut() {
            Some((first, sum, count)) if (d - *first) / *first <= tolerance => {
                *sum += d;
                *count += 1;
            }
            _ => clusters.push((d, d, 1)),
        }
    }

    let base = clusters[0].1 / clusters[0].2 as f64;
    clusters
        .iter()
        .map(|(_, sum, count)| (sum / *count as f64) / base)
        .collect()
}

/// Peak detection plus spacing analysis with fixed thresholds.
#[derive(Clone, Copy, Debug)]
pub struct PeakRatioAnalyzer {
    pub min_relative_height: f64,
    pub spacing_tolerance: f64,
}

impl PeakRatioAnalyzer {
    pub fn new(min_relative_height: f64, spacing_tolerance: f64) -> Self {
        Self {
            min_relative_height,
            spacing_tolerance,
        }
    }

    pub fn analyze(&self, field: &DensityField) -> PeakAnalysis {
        let peaks = find_local_maxima(field, self.min_relative_height);
        let spacing_ratios = measure_spacing_ratios(field, &peaks, self.spacing_tolerance);
        PeakAnalysis {
            peaks,
            spacing_ratios,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_with_spikes(n: usize, spikes: &[((usize, usize, usize), f64)]) -> DensityField {
        let mut values = vec![1.0; n * n * n];
        for &((i, j, k), v) in spikes {
            values[k * n * n + j * n + i] = v;
        }
        DensityField::from_values(n, 1.0 / n as f64, values).unwrap()
    }

    #[test]
    fn test_uniform_field_has_no_peaks() {
        let field = field_with_spikes(6, &[]);
        assert!(find_local_maxima(&field, 0.0).is_empty());
    }

    #[test]
    fn test_finds_sorted_spikes() {
        let field = field_with_spikes(8, &[((5, 1, 1), 3.0), ((1, 1, 1), 2.0)]);
        let peaks = find_local_maxima(&field, 0.0);
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].cell, [1, 1, 1]);
        assert_eq!(peaks[1].cell, [5, 1, 1]);
    }

    #[test]
    fn test_height_threshold_filters_small_bumps() {
        let field = field_with_spikes(8, &[((1, 1, 1), 10.0), ((5, 5, 5), 1.5)]);
        assert_eq!(find_local_maxima(&field, 0.5).len(), 1);
    }

    #[test]
    fn test_plateau_is_not_strict_maximum() {
        let field = field_with_spikes(8, &[((2, 2, 2), 5.0), ((3, 2, 2), 5.0)]);
        assert!(find_local_maxima(&field, 0.0).is_empty());
    }

    #[test]
    fn test_maximum_across_periodic_seam() {
        // Neighbor of (0,0,0) at (7,7,7) is higher, so only the corner spike is a peak
        let field = field_with_spikes(8, &[((0, 0, 0), 2.0), ((7, 7, 7), 3.0)]);
        let peaks = find_local_maxima(&field, 0.0);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].cell, [7, 7, 7]);
    }

    #[test]
    fn test_fewer_than_two_peaks_gives_empty_ratios() {
        let field = field_with_spikes(8, &[((4, 4, 4), 2.0)]);
        let analysis = PeakRatioAnalyzer::new(0.0, 0.1).analyze(&field);
        assert_eq!(analysis.peaks.len(), 1);
        assert!(analysis.spacing_ratios.is_empty());
    }

    #[test]
    fn test_two_spacing_clusters() {
        // Pair A 2 cells apart, pair B 4 cells apart, pairs far from each other
        let field = field_with_spikes(
            16,
            &[
                ((1, 1, 1), 2.0),
                ((3, 1, 1), 2.0),
                ((1, 9, 9), 2.0),
                ((5, 9, 9), 2.0),
            ],
        );
        let peaks = find_local_maxima(&field, 0.0);
        assert_eq!(peaks.len(), 4);
        let ratios = measure_spacing_ratios(&field, &peaks, 0.1);
        assert_eq!(ratios.len(), 2);
        assert_eq!(ratios[0], 1.0);
        assert!((ratios[1] - 2.0).abs() < 1e-12);
    }
}
