#![forbid(unsafe_code)]

/// Mean of little-endian `f32` feature vectors, re-encoded the same way. `None` when there is
/// nothing to average or the vectors disagree on length.
pub(super) fn mean_centroid(features: &[Vec<u8>]) -> Option<Vec<u8>> {
    let mut sum: Vec<f32> = Vec::new();
    let mut count = 0usize;
    for feature in features {
        if feature.is_empty() || feature.len() % 4 != 0 {
            return None;
        }
        let dim = feature.len() / 4;
        if sum.is_empty() {
            sum = vec![0.0f32; dim];
        } else if sum.len() != dim {
            return None;
        }
        for (slot, chunk) in sum.iter_mut().zip(feature.chunks_exact(4)) {
            *slot += f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let n = count as f32;
    Some(
        sum.into_iter()
            .flat_map(|value| (value / n).to_le_bytes())
            .collect(),
    )
}
