//! Histogram binning.
//!
//! [`bin`] converts raw samples into equal-width buckets spanning
//! `[min, max]` of the input. Arithmetic is done in `f64` regardless of the
//! sample type; bucket edges are narrowed back into the sample type.

use serde::{Deserialize, Serialize};

use crate::error::{HistogramError, Result};
use crate::numeric::Numeric;
use crate::record::HistogramBucket;

/// One histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Instance<T> {
    /// Left edge.
    pub left: T,
    /// Right edge.
    pub right: T,
    /// Number of samples that fell into this bucket.
    pub frequency: i64,
}

impl<T: Numeric> Instance<T> {
    /// Converts into the kind-tagged persisted form.
    pub fn to_bucket(&self) -> HistogramBucket {
        HistogramBucket {
            left: self.left.into_value(),
            right: self.right.into_value(),
            frequency: self.frequency,
        }
    }

    /// Converts from the persisted form, returning `None` if either edge has
    /// a different numeric kind than `T`.
    pub fn from_bucket(bucket: &HistogramBucket) -> Option<Self> {
        Some(Self {
            left: T::from_value(bucket.left)?,
            right: T::from_value(bucket.right)?,
            frequency: bucket.frequency,
        })
    }
}

/// Bins `values` into `num_buckets` equal-width buckets.
///
/// Buckets are returned in ascending order and are contiguous: the right
/// edge of each bucket equals the left edge of the next, the first left edge
/// is the minimum sample and the last right edge is the maximum. A value `x`
/// lands in bucket `clamp(floor((x - min) / w), 0, num_buckets - 1)` where
/// `w = (max - min) / num_buckets`, so the maximum sample is counted in the
/// last bucket.
///
/// If every sample has the same value, a single bucket `[v, v]` holding all
/// samples is returned. An empty input yields no buckets.
///
/// # Errors
///
/// - [`HistogramError::InvalidBucketCount`] if `num_buckets` is zero
/// - [`HistogramError::NonFiniteValue`] if a sample is NaN or infinite
///
/// # Examples
///
/// ```rust
/// use vislog::histogram::bin;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let buckets = bin(&[1.0f32, 2.0, 2.5, 4.0], 3)?;
/// assert_eq!(buckets.len(), 3);
/// assert_eq!(buckets[0].left, 1.0);
/// assert_eq!(buckets[2].right, 4.0);
/// assert_eq!(buckets.iter().map(|b| b.frequency).sum::<i64>(), 4);
/// # Ok(())
/// # }
/// ```
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn bin<T: Numeric>(values: &[T], num_buckets: usize) -> Result<Vec<Instance<T>>> {
    if num_buckets == 0 {
        return Err(HistogramError::InvalidBucketCount { count: num_buckets }.into());
    }

    let Some(&first) = values.first() else {
        return Ok(Vec::new());
    };

    let mut min_v = first;
    let mut max_v = first;
    for (position, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(HistogramError::NonFiniteValue { position }.into());
        }
        if value < min_v {
            min_v = value;
        }
        if value > max_v {
            max_v = value;
        }
    }

    if min_v == max_v {
        return Ok(vec![Instance {
            left: min_v,
            right: min_v,
            frequency: values.len() as i64,
        }]);
    }

    // Working on halves keeps max - min finite at the f64 extremes.
    let lo = min_v.to_f64() / 2.0;
    let span = max_v.to_f64() / 2.0 - lo;
    let buckets = num_buckets as f64;

    let mut frequencies = vec![0i64; num_buckets];
    for &value in values {
        let position = ((value.to_f64() / 2.0 - lo) / span * buckets).floor();
        let index = if position <= 0.0 {
            0
        } else {
            (position as usize).min(num_buckets - 1)
        };
        frequencies[index] += 1;
    }

    let edge = |i: usize| -> T {
        if i == 0 {
            min_v
        } else if i == num_buckets {
            max_v
        } else {
            let edge = T::from_f64(2.0 * (lo + span * (i as f64 / buckets)));
            if edge < min_v {
                min_v
            } else if edge > max_v {
                max_v
            } else {
                edge
            }
        }
    };

    Ok(frequencies
        .into_iter()
        .enumerate()
        .map(|(i, frequency)| Instance {
            left: edge(i),
            right: edge(i + 1),
            frequency,
        })
        .collect())
}
