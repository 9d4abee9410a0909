//! Fixed-capacity ring of spectrogram columns.
//!
//! Storage is allocated once at construction: `width` columns of
//! `height * channels` values each. Writes wrap modulo `width`, so the
//! newest `width` columns are always retained and eviction is O(1).

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct ColumnBuffer {
    values: Vec<f32>,
    width: usize,
    height: usize,
    channels: usize,
    write_idx: usize,
    total_written: u64,
}

impl ColumnBuffer {
    pub fn new(width: usize, height: usize, channels: usize) -> Result<Self> {
        if width == 0 || height == 0 || channels == 0 {
            return Err(PipelineError::invalid(format!(
                "column buffer geometry {width}x{height}x{channels} must be non-zero"
            )));
        }
        Ok(Self {
            values: vec![0.0; width * height * channels],
            width,
            height,
            channels,
            write_idx: 0,
            total_written: 0,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Values per column.
    pub fn stride(&self) -> usize {
        self.height * self.channels
    }

    /// Occupied columns, `min(total_written, width)`.
    pub fn len(&self) -> usize {
        self.total_written.min(self.width as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.total_written == 0
    }

    pub fn is_full(&self) -> bool {
        self.total_written >= self.width as u64
    }

    /// Columns ever enqueued since construction or the last clear.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Ring index the next column will be written to.
    pub fn write_index(&self) -> usize {
        self.write_idx
    }

    /// Ring index of the newest column, if any.
    pub fn latest_column(&self) -> Option<usize> {
        (!self.is_empty()).then(|| (self.write_idx + self.width - 1) % self.width)
    }

    /// Occupied fraction of the ring.
    pub fn fill_ratio(&self) -> f32 {
        self.len() as f32 / self.width as f32
    }

    /// Raw ring storage, unordered once wrapped.
    pub fn storage(&self) -> &[f32] {
        &self.values
    }

    /// Appends whole columns, keeping only the newest `width` of a larger batch.
    /// Returns how many columns the batch contained.
    pub fn enqueue(&mut self, columns: &[f32]) -> Result<usize> {
        let stride = self.stride();
        if columns.len() % stride != 0 {
            return Err(PipelineError::invalid(format!(
                "{} values is not a whole number of {stride}-value columns",
                columns.len()
            )));
        }

        let count = columns.len() / stride;
        let skipped = count.saturating_sub(self.width);
        let kept = &columns[skipped * stride..];
        let n = count - skipped;

        let first = (self.width - self.write_idx).min(n);
        let at = self.write_idx * stride;
        self.values[at..at + first * stride].copy_from_slice(&kept[..first * stride]);
        let rest = n - first;
        self.values[..rest * stride].copy_from_slice(&kept[first * stride..]);

        self.write_idx = (self.write_idx + n) % self.width;
        self.total_written += count as u64;
        Ok(count)
    }

    /// Forgets all columns. Storage is kept.
    pub fn clear(&mut self) {
        self.write_idx = 0;
        self.total_written = 0;
    }

    /// Occupied columns in time order, oldest first.
    pub fn linearize(&self) -> ColumnView<'_> {
        let stride = self.stride();
        let len = self.len();
        let (head, tail) = if self.is_full() {
            let split = self.write_idx * stride;
            (&self.values[split..], &self.values[..split])
        } else {
            (&self.values[..len * stride], &self.values[..0])
        };
        ColumnView {
            head,
            tail,
            stride,
            len,
        }
    }
}

/// Time-ordered view of a [`ColumnBuffer`] as at most two contiguous runs.
#[derive(Debug, Clone, Copy)]
pub struct ColumnView<'a> {
    head: &'a [f32],
    tail: &'a [f32],
    stride: usize,
    len: usize,
}

impl<'a> ColumnView<'a> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Older run followed by newer run; the second is empty unless wrapped.
    pub fn segments(&self) -> (&'a [f32], &'a [f32]) {
        (self.head, self.tail)
    }

    pub fn is_wrapped(&self) -> bool {
        !self.tail.is_empty()
    }

    pub fn column(&self, index: usize) -> Option<&'a [f32]> {
        if index >= self.len {
            return None;
        }
        let head_cols = self.head.len() / self.stride;
        let (run, at) = if index < head_cols {
            (self.head, index)
        } else {
            (self.tail, index - head_cols)
        };
        Some(&run[at * self.stride..(at + 1) * self.stride])
    }

    pub fn iter_columns(&self) -> impl Iterator<Item = &'a [f32]> + 'a {
        self.head
            .chunks_exact(self.stride)
            .chain(self.tail.chunks_exact(self.stride))
    }

    /// Copies as many values as fit into `dst`, oldest first.
    pub fn copy_into(&self, dst: &mut [f32]) -> usize {
        let total = self.head.len() + self.tail.len();
        let len = dst.len().min(total);
        if self.head.len() >= len {
            dst[..len].copy_from_slice(&self.head[..len]);
        } else {
            let split = self.head.len();
            dst[..split].copy_from_slice(self.head);
            dst[split..len].copy_from_slice(&self.tail[..len - split]);
        }
        len
    }

    pub fn to_vec(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.head.len() + self.tail.len());
        out.extend_from_slice(self.head);
        out.extend_from_slice(self.tail);
        out
    }

    /// Byte views of the two runs for texture uploads.
    pub fn byte_segments(&self) -> (&'a [u8], &'a [u8]) {
        (bytemuck::cast_slice(self.head), bytemuck::cast_slice(self.tail))
    }
}

/// Ring width for a pane: the canvas width times `multiplier`, capped by the
/// renderer's maximum texture size.
pub fn buffer_width_for(canvas_width: usize, multiplier: usize, max_texture_size: usize) -> usize {
    canvas_width
        .saturating_mul(multiplier)
        .min(max_texture_size)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEIGHT: usize = 3;

    fn batch(range: std::ops::Range<usize>) -> Vec<f32> {
        range.flat_map(|i| [i as f32; HEIGHT]).collect()
    }

    fn column_ids(view: &ColumnView<'_>) -> Vec<usize> {
        view.iter_columns().map(|c| c[0] as usize).collect()
    }

    #[test]
    fn two_batches_of_sixty_keep_the_newest_hundred() {
        let mut buffer = ColumnBuffer::new(100, HEIGHT, 1).unwrap();
        buffer.enqueue(&batch(0..60)).unwrap();
        buffer.enqueue(&batch(60..120)).unwrap();

        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.total_written(), 120);
        let view = buffer.linearize();
        assert!(view.is_wrapped());
        assert_eq!(column_ids(&view), (20..120).collect::<Vec<_>>());
        assert_eq!(view.to_vec(), batch(20..120));
    }

    #[test]
    fn oversized_batch_keeps_its_tail() {
        let mut buffer = ColumnBuffer::new(10, HEIGHT, 1).unwrap();
        buffer.enqueue(&batch(0..3)).unwrap();
        assert_eq!(buffer.enqueue(&batch(3..28)).unwrap(), 25);

        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.total_written(), 28);
        assert_eq!(column_ids(&buffer.linearize()), (18..28).collect::<Vec<_>>());
    }

    #[test]
    fn linearize_matches_history_suffix_for_mixed_batches() {
        let width = 7;
        let mut buffer = ColumnBuffer::new(width, HEIGHT, 1).unwrap();
        let mut next = 0;
        for size in [1, 3, 0, 6, 2, 9, 7, 4, 1, 13, 5] {
            buffer.enqueue(&batch(next..next + size)).unwrap();
            next += size;

            let expected: Vec<usize> = (next.saturating_sub(width)..next).collect();
            let view = buffer.linearize();
            assert_eq!(view.len(), expected.len());
            assert_eq!(column_ids(&view), expected, "after {next} columns");
        }
    }

    #[test]
    fn clear_behaves_like_a_fresh_buffer() {
        let mut used = ColumnBuffer::new(5, HEIGHT, 1).unwrap();
        used.enqueue(&batch(0..8)).unwrap();
        used.clear();
        assert!(used.linearize().is_empty());
        assert_eq!(used.latest_column(), None);
        used.clear();

        let mut fresh = ColumnBuffer::new(5, HEIGHT, 1).unwrap();
        for b in [batch(100..103), batch(103..109)] {
            used.enqueue(&b).unwrap();
            fresh.enqueue(&b).unwrap();
            assert_eq!(used.linearize().to_vec(), fresh.linearize().to_vec());
            assert_eq!(used.write_index(), fresh.write_index());
        }
    }

    #[test]
    fn partial_columns_are_rejected() {
        let mut buffer = ColumnBuffer::new(4, HEIGHT, 2).unwrap();
        assert_eq!(buffer.stride(), 6);
        let err = buffer.enqueue(&[0.0; 7]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(buffer.is_empty());
        assert_eq!(buffer.enqueue(&[1.0; 12]).unwrap(), 2);
    }

    #[test]
    fn zero_geometry_is_rejected() {
        assert!(ColumnBuffer::new(0, 4, 1).is_err());
        assert!(ColumnBuffer::new(4, 0, 1).is_err());
    }

    #[test]
    fn view_column_access_spans_the_wrap() {
        let mut buffer = ColumnBuffer::new(4, HEIGHT, 1).unwrap();
        buffer.enqueue(&batch(0..6)).unwrap();
        let view = buffer.linearize();
        assert_eq!(view.column(0).unwrap()[0], 2.0);
        assert_eq!(view.column(3).unwrap()[0], 5.0);
        assert!(view.column(4).is_none());
        assert_eq!(buffer.latest_column(), Some(1));

        let mut dst = vec![0.0; 5];
        assert_eq!(view.copy_into(&mut dst), 5);
        assert_eq!(dst, vec![2.0, 2.0, 2.0, 3.0, 3.0]);

        let (head, tail) = view.byte_segments();
        assert_eq!(head.len() + tail.len(), 4 * HEIGHT * 4);
    }

    #[test]
    fn width_follows_canvas_and_texture_cap() {
        assert_eq!(buffer_width_for(800, 4, 4096), 3200);
        assert_eq!(buffer_width_for(1600, 4, 4096), 4096);
        assert_eq!(buffer_width_for(0, 4, 4096), 1);
    }
}
