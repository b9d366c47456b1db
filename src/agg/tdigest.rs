use serde::{Deserialize, Serialize};

const BUFFER_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub mean: f64,
    pub weight: f64,
}

/// Merging t-digest for approximate percentiles. Values accumulate in a
/// buffer that doubles as an exact representation for small inputs; once the
/// buffer spills, centroids are compacted under the usual k-size bound.
/// The whole state serializes for the shard → coordinator wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TDigest {
    compression: f64,
    centroids: Vec<Centroid>,
    buffer: Vec<f64>,
    count: u64,
    min: f64,
    max: f64,
}

impl TDigest {
    pub fn new(compression: f64) -> Self {
        TDigest {
            compression,
            centroids: Vec::new(),
            buffer: Vec::new(),
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn add(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.buffer.push(value);
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        if self.buffer.len() >= BUFFER_LIMIT {
            self.compress();
        }
    }

    pub fn merge(&mut self, other: &TDigest) {
        if other.count == 0 {
            return;
        }
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.centroids.extend_from_slice(&other.centroids);
        for &value in &other.buffer {
            self.buffer.push(value);
        }
        self.compress();
    }

    /// Fold the buffer into the centroid list and compact adjacent centroids
    /// while the merged weight stays under the k-size limit.
    pub fn compress(&mut self) {
        if self.buffer.is_empty() && self.centroids.len() <= (2.0 * self.compression) as usize {
            return;
        }
        let mut points: Vec<Centroid> = self.centroids.drain(..).collect();
        points.extend(self.buffer.drain(..).map(|mean| Centroid { mean, weight: 1.0 }));
        if points.is_empty() {
            return;
        }
        points.sort_by(|a, b| a.mean.total_cmp(&b.mean));

        let total: f64 = points.iter().map(|c| c.weight).sum();
        let mut merged: Vec<Centroid> = Vec::new();
        let mut seen = 0.0f64;
        for point in points {
            match merged.last_mut() {
                Some(last) => {
                    let candidate_weight = last.weight + point.weight;
                    let q = (seen + candidate_weight / 2.0) / total;
                    let limit = 4.0 * total * q * (1.0 - q) / self.compression;
                    if candidate_weight <= limit.max(1.0) {
                        last.mean = (last.mean * last.weight + point.mean * point.weight)
                            / candidate_weight;
                        last.weight = candidate_weight;
                    } else {
                        seen += last.weight;
                        merged.push(point);
                    }
                }
                None => merged.push(point),
            }
        }
        self.centroids = merged;
    }

    /// Quantile in `[0, 1]` by linear interpolation over centroid midpoints.
    pub fn quantile(&mut self, q: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        self.compress();
        let q = q.clamp(0.0, 1.0);
        let total: f64 = self.centroids.iter().map(|c| c.weight).sum();
        let target = q * total;

        let mut seen = 0.0;
        for (i, centroid) in self.centroids.iter().enumerate() {
            let mid = seen + centroid.weight / 2.0;
            if target <= mid {
                if i == 0 {
                    let prev_mid = 0.0;
                    let frac = if mid > prev_mid {
                        (target - prev_mid) / (mid - prev_mid)
                    } else {
                        1.0
                    };
                    return Some(self.min + (centroid.mean - self.min) * frac.clamp(0.0, 1.0));
                }
                let prev = &self.centroids[i - 1];
                let prev_mid = seen - prev.weight / 2.0;
                let frac = if mid > prev_mid {
                    (target - prev_mid) / (mid - prev_mid)
                } else {
                    1.0
                };
                return Some(prev.mean + (centroid.mean - prev.mean) * frac.clamp(0.0, 1.0));
            }
            seen += centroid.weight;
        }
        Some(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_inputs_are_exact_order_statistics() {
        let mut d = TDigest::new(100.0);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            d.add(v);
        }
        let median = d.quantile(0.5).unwrap();
        assert!((median - 3.0).abs() < 1.0, "median {}", median);
        assert_eq!(d.quantile(0.0).unwrap(), 1.0);
        assert_eq!(d.quantile(1.0).unwrap(), 5.0);
    }

    #[test]
    fn large_uniform_within_error_bound() {
        let mut d = TDigest::new(100.0);
        for i in 0..10_000 {
            d.add(i as f64);
        }
        let p50 = d.quantile(0.5).unwrap();
        assert!((p50 - 5_000.0).abs() < 250.0, "p50 {}", p50);
        let p99 = d.quantile(0.99).unwrap();
        assert!((p99 - 9_900.0).abs() < 250.0, "p99 {}", p99);
    }

    #[test]
    fn merge_matches_combined_stream_roughly() {
        let mut a = TDigest::new(100.0);
        let mut b = TDigest::new(100.0);
        let mut whole = TDigest::new(100.0);
        for i in 0..1_000 {
            let v = (i * 7 % 1_000) as f64;
            if i % 2 == 0 {
                a.add(v);
            } else {
                b.add(v);
            }
            whole.add(v);
        }
        a.merge(&b);
        assert_eq!(a.count(), whole.count());
        let merged_p50 = a.quantile(0.5).unwrap();
        let whole_p50 = whole.quantile(0.5).unwrap();
        assert!((merged_p50 - whole_p50).abs() < 50.0);
    }
}
