/// Deterministic pseudo-embedding used when the provider is unreachable.
///
/// Not semantically meaningful — it only keeps search returning *something*
/// instead of crashing. Each character rotates into a dimension bucket by
/// its position and code point; the result is magnitude-normalized so
/// cosine comparisons stay in range.
pub fn pseudo_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions.max(1)];

    for (position, c) in text.chars().enumerate() {
        let code = c as u32;
        let index = (position + code as usize) % vector.len();
        let sign = if (code + position as u32) % 2 == 0 {
            1.0
        } else {
            -1.0
        };
        vector[index] += sign * ((code % 97) as f32 + 1.0) / 97.0;
    }

    let magnitude: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for v in &mut vector {
            *v /= magnitude;
        }
    } else {
        // Empty text still gets a unit vector.
        vector[0] = 1.0;
    }

    vector
}
