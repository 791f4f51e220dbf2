//! Deterministic mock payloads.
//!
//! Values depend only on the simulated time and the sub-element index, so two
//! runs with the same configuration produce identical timelines.

use contracts::ProducerKind;

/// Bytes of one sub-element carrying a 4x4 `f32` matrix
pub const MATRIX_BYTES: usize = 64;

/// Whether `kind` can fill sub-elements of `element_size` bytes
pub fn fits(kind: ProducerKind, element_size: usize) -> bool {
    match kind {
        ProducerKind::Markers => element_size > 0 && element_size % 4 == 0,
        ProducerKind::Matrices => element_size == MATRIX_BYTES,
    }
}

/// Fill `out` with sub-element `slot` at simulated time `t_ms`
pub fn fill(kind: ProducerKind, t_ms: f64, slot: usize, out: &mut [u8]) {
    match kind {
        ProducerKind::Markers => marker(t_ms, slot, out),
        ProducerKind::Matrices => matrix(t_ms, slot, out),
    }
}

/// Marker `slot` circling the origin: lanes are x, y, then the slot index
fn marker(t_ms: f64, slot: usize, out: &mut [u8]) {
    let angle = t_ms / 1000.0 + slot as f64;
    let radius = 1.0 + slot as f64;
    for (lane, chunk) in out.chunks_exact_mut(4).enumerate() {
        let value = match lane {
            0 => (radius * angle.cos()) as f32,
            1 => (radius * angle.sin()) as f32,
            _ => slot as f32,
        };
        chunk.copy_from_slice(bytemuck::bytes_of(&value));
    }
}

/// Row-major rigid transform: yaw about z plus a slowly drifting translation
fn matrix(t_ms: f64, slot: usize, out: &mut [u8]) {
    let t = t_ms / 1000.0;
    let yaw = 0.5 * t + 0.1 * slot as f64;
    let (sin, cos) = (yaw.sin() as f32, yaw.cos() as f32);
    #[rustfmt::skip]
    let values: [f32; 16] = [
        cos, -sin, 0.0, slot as f32,
        sin, cos, 0.0, t as f32,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ];
    out[..MATRIX_BYTES].copy_from_slice(bytemuck::bytes_of(&values));
}

/// Sub-element left out of frame `seq`, every `period` frames
pub fn occluded_slot(seq: u64, period: Option<u64>, max_elements: usize) -> Option<usize> {
    let period = period.filter(|p| *p > 0)?;
    if max_elements == 0 || seq % period != period - 1 {
        return None;
    }
    Some(((seq / period) % max_elements as u64) as usize)
}
