//! Face alignment via a 4-DOF similarity transform.
//!
//! Warps a detected face to the canonical 112×112 ArcFace crop using the
//! five InsightFace reference landmarks and a least-squares fit.

/// ArcFace reference landmarks for a 112×112 crop.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Side length of the aligned output crop.
pub const ALIGNED_SIZE: usize = 112;

/// Align a face in an RGB24 frame to a canonical 112×112 RGB24 crop.
pub fn align_face(
    rgb: &[u8],
    width: u32,
    height: u32,
    landmarks: &[(f32, f32); 5],
) -> Vec<u8> {
    let m = similarity_transform(landmarks, &REFERENCE_LANDMARKS);
    warp_rgb(rgb, width as usize, height as usize, &m, ALIGNED_SIZE)
}

/// Least-squares 4-DOF (scale, rotation, translation) transform mapping
/// `src` landmarks onto `dst`. Returned as the 2×3 row-major matrix
/// `[a, -b, tx, b, a, ty]`.
fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Normal equations for A * [a, b, tx, ty]^T = B, where each landmark
    // pair contributes the two rows
    //   [sx, -sy, 1, 0] -> dx
    //   [sy,  sx, 0, 1] -> dy
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];

        for (row, rhs) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atb[j] += row[j] * rhs;
            }
        }
    }

    let [a, b, tx, ty] = solve4(ata, atb);
    [a, -b, tx, b, a, ty]
}

/// Gaussian elimination with partial pivoting for the 4×4 normal equations.
/// Degenerate systems fall back to an identity-like solution.
fn solve4(a: [[f32; 4]; 4], b: [f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&a[i]);
        m[i][4] = b[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| {
                m[r1][col]
                    .abs()
                    .partial_cmp(&m[r2][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    x
}

/// Apply the inverse of a similarity transform to produce a square RGB24
/// output crop, sampling the source bilinearly. Out-of-bounds samples are
/// black.
fn warp_rgb(
    rgb: &[u8],
    src_width: usize,
    src_height: usize,
    matrix: &[f32; 6],
    out_size: usize,
) -> Vec<u8> {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // Invert the rotation/scale part [[a, -b], [b, a]]; det = a^2 + b^2.
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return vec![0u8; out_size * out_size * 3];
    }
    let ia = a / det;
    let ib = b / det;

    let mut out = vec![0u8; out_size * out_size * 3];

    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let sample = |x: i64, y: i64, c: usize| -> f32 {
                if x >= 0 && (x as usize) < src_width && y >= 0 && (y as usize) < src_height {
                    rgb[(y as usize * src_width + x as usize) * 3 + c] as f32
                } else {
                    0.0
                }
            };

            let base = (oy * out_size + ox) * 3;
            for c in 0..3 {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                out[base + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}
