// corebridge — Sample Pipeline
//
// Raw accelerometer triples are collected into a fixed buffer. When the next
// triple would overflow it, the buffer is block-averaged down to one feature
// vector and handed to the pattern engine according to the current mode.

use crate::config::*;
use crate::pme::PatternClassifier;

pub type FeatureVector = [u8; VECTOR_SIZE];

// ---------------------------------------------------------------------------
// Sample buffer
// ---------------------------------------------------------------------------

/// `C` bytes of interleaved X/Y/Z samples plus a write cursor that always
/// sits on a triple boundary.
pub struct SampleBuffer<const C: usize> {
    data: [u8; C],
    cursor: usize,
}

impl<const C: usize> SampleBuffer<C> {
    pub fn new() -> Self {
        Self {
            data: [0; C],
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Append one triple. Returns the feature vector when the buffer filled.
    pub fn ingest(&mut self, triple: [u8; VALUES_PER_SAMPLE]) -> Option<FeatureVector> {
        self.data[self.cursor..self.cursor + VALUES_PER_SAMPLE].copy_from_slice(&triple);
        self.cursor += VALUES_PER_SAMPLE;

        if self.cursor + VALUES_PER_SAMPLE > C {
            let samples = self.cursor / VALUES_PER_SAMPLE;
            let vector = undersample(&self.data, samples);
            self.cursor = 0;
            return Some(vector);
        }
        None
    }
}

impl<const C: usize> Default for SampleBuffer<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncating mean of `count` values starting at `pos`, `step` apart.
fn average(input: &[u8], pos: usize, step: usize, count: usize) -> u8 {
    if count == 0 {
        return 0;
    }
    let sum: u32 = (0..count).map(|i| u32::from(input[pos + step * i])).sum();
    (sum / count as u32) as u8
}

/// Reduce `samples` triples to `SAMPLES_PER_VECTOR` averaged triples.
pub fn undersample(input: &[u8], samples: usize) -> FeatureVector {
    let mut output = [0u8; VECTOR_SIZE];
    let count = samples / SAMPLES_PER_VECTOR;
    log::debug!(
        "undersample: samples={} samples_per_vector={} count={}",
        samples,
        SAMPLES_PER_VECTOR,
        count
    );

    let mut ii = 0;
    for group in output
        .chunks_exact_mut(VALUES_PER_SAMPLE)
        .take(SAMPLES_PER_VECTOR)
    {
        for (axis, out) in group.iter_mut().enumerate() {
            *out = average(input, ii + axis, VALUES_PER_SAMPLE, count);
        }
        ii += count * VALUES_PER_SAMPLE;
    }
    output
}

// ---------------------------------------------------------------------------
// Mode machine
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    #[default]
    Idle,
    /// Learn the next vector as this category, then go idle.
    Learning(u16),
    /// Classify every vector until stopped.
    Classifying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Learned { category: u16, committed: u16 },
    Classified { category: u16 },
}

pub struct SamplePipeline {
    buffer: SampleBuffer<SAMPLE_BUFFER_SIZE>,
    mode: PipelineMode,
}

impl Default for SamplePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplePipeline {
    pub fn new() -> Self {
        Self {
            buffer: SampleBuffer::new(),
            mode: PipelineMode::Idle,
        }
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PipelineMode) {
        if self.mode != mode {
            log::info!("pipeline: {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
    }

    /// Feed one raw triple. Ignored while idle.
    pub fn feed(
        &mut self,
        triple: [u8; VALUES_PER_SAMPLE],
        engine: &mut dyn PatternClassifier,
    ) -> Option<PipelineOutcome> {
        if self.mode == PipelineMode::Idle {
            return None;
        }
        let vector = self.buffer.ingest(triple)?;

        match self.mode {
            PipelineMode::Learning(category) => {
                let committed = engine.learn(&vector, category);
                log::info!("pipeline: learned category {} ({} neurons)", category, committed);
                self.mode = PipelineMode::Idle;
                Some(PipelineOutcome::Learned { category, committed })
            }
            PipelineMode::Classifying => {
                let category = engine.classify(&vector);
                log::info!("pipeline: classified as category {}", category);
                Some(PipelineOutcome::Classified { category })
            }
            PipelineMode::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pme::SoftClassifier;

    const TRIPLES_PER_VECTOR: usize = 682;

    fn triple(i: usize) -> [u8; 3] {
        [(i % 251) as u8, (i * 7 % 256) as u8, 200]
    }

    #[test]
    fn one_vector_per_full_buffer() {
        let mut buffer = SampleBuffer::<SAMPLE_BUFFER_SIZE>::new();
        for i in 0..TRIPLES_PER_VECTOR - 1 {
            assert!(buffer.ingest(triple(i)).is_none());
        }
        assert_eq!(buffer.cursor(), 2043);
        assert!(buffer.ingest(triple(TRIPLES_PER_VECTOR - 1)).is_some());
        assert_eq!(buffer.cursor(), 0);
    }

    #[test]
    fn first_group_is_truncating_average() {
        let mut buffer = SampleBuffer::<SAMPLE_BUFFER_SIZE>::new();
        let vector = (0..TRIPLES_PER_VECTOR)
            .find_map(|i| buffer.ingest(triple(i)))
            .unwrap();

        // count = 682 / 42 = 16 samples per group
        let x: u32 = (0..16).map(|i| u32::from(triple(i)[0])).sum();
        assert_eq!(vector[0], (x / 16) as u8);
        let y: u32 = (16..32).map(|i| u32::from(triple(i)[1])).sum();
        assert_eq!(vector[4], (y / 16) as u8);
        assert_eq!(vector[2], 200);
        assert_eq!(&vector[126..], &[0, 0]);
    }

    #[test]
    fn identical_input_gives_identical_vectors() {
        let mut a = SampleBuffer::<SAMPLE_BUFFER_SIZE>::new();
        let mut b = SampleBuffer::<SAMPLE_BUFFER_SIZE>::new();
        let va = (0..TRIPLES_PER_VECTOR).find_map(|i| a.ingest(triple(i)));
        let vb = (0..TRIPLES_PER_VECTOR).find_map(|i| b.ingest(triple(i)));
        assert_eq!(va, vb);
    }

    #[test]
    fn too_few_samples_average_to_zero() {
        assert_eq!(undersample(&[9; 30], 10), [0; VECTOR_SIZE]);
    }

    #[test]
    fn idle_pipeline_ignores_samples() {
        let mut pipeline = SamplePipeline::new();
        let mut engine = SoftClassifier::new();
        for i in 0..TRIPLES_PER_VECTOR * 2 {
            assert!(pipeline.feed(triple(i), &mut engine).is_none());
        }
        assert_eq!(engine.committed_count(), 0);
    }

    #[test]
    fn learning_goes_idle_after_one_vector() {
        let mut pipeline = SamplePipeline::new();
        let mut engine = SoftClassifier::new();
        pipeline.set_mode(PipelineMode::Learning(4));

        let outcome = (0..TRIPLES_PER_VECTOR).find_map(|i| pipeline.feed(triple(i), &mut engine));
        assert_eq!(outcome, Some(PipelineOutcome::Learned { category: 4, committed: 1 }));
        assert_eq!(pipeline.mode(), PipelineMode::Idle);
    }

    #[test]
    fn classifying_keeps_running() {
        let mut pipeline = SamplePipeline::new();
        let mut engine = SoftClassifier::new();
        pipeline.set_mode(PipelineMode::Learning(4));
        (0..TRIPLES_PER_VECTOR).for_each(|i| {
            pipeline.feed(triple(i), &mut engine);
        });

        pipeline.set_mode(PipelineMode::Classifying);
        for _ in 0..2 {
            let outcome =
                (0..TRIPLES_PER_VECTOR).find_map(|i| pipeline.feed(triple(i), &mut engine));
            assert_eq!(outcome, Some(PipelineOutcome::Classified { category: 4 }));
        }
        assert_eq!(pipeline.mode(), PipelineMode::Classifying);
    }
}
