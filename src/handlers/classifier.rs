// corebridge — Pattern Classifier Handler
//
// Owns the pattern engine and the sample pipeline that feeds it from the
// accelerometer.

use crate::config::VECTOR_SIZE;
use crate::error::{IpmError, Result};
use crate::ipm::message::{ChannelId, ClassifierData, ClassifierOp};
use crate::pipeline::{PipelineMode, PipelineOutcome, SamplePipeline};
use crate::pme::PatternClassifier;

use super::decode;

pub struct ClassifierHandler {
    engine: Box<dyn PatternClassifier>,
    pipeline: SamplePipeline,
}

impl ClassifierHandler {
    pub fn new(engine: Box<dyn PatternClassifier>) -> Self {
        Self {
            engine,
            pipeline: SamplePipeline::new(),
        }
    }

    pub fn mode(&self) -> PipelineMode {
        self.pipeline.mode()
    }

    pub fn engine(&self) -> &dyn PatternClassifier {
        self.engine.as_ref()
    }

    fn test_vector(data: &ClassifierData) -> Result<&[u8]> {
        if data.count == 0 || data.count > VECTOR_SIZE {
            return Err(IpmError::InvalidParameter(format!(
                "vector length {} not in 1..={}",
                data.count, VECTOR_SIZE
            )));
        }
        Ok(&data.vector[..data.count])
    }

    pub fn handle(&mut self, operation: u32, data: &mut ClassifierData) -> Result<()> {
        match decode::<ClassifierOp>(ChannelId::Classifier, operation)? {
            ClassifierOp::Init => {
                self.engine.init();
                self.pipeline.set_mode(PipelineMode::Idle);
            }
            ClassifierOp::LearnTest => {
                let vector = Self::test_vector(data)?;
                log::info!(
                    "pme learn: [{}, {}, {}, ...] count={} category={}",
                    vector[0],
                    vector.get(1).copied().unwrap_or(0),
                    vector.get(2).copied().unwrap_or(0),
                    data.count,
                    data.category
                );
                let committed = self.engine.learn(vector, data.category);
                log::info!("count: {}", committed);
                data.count = usize::from(committed);
            }
            ClassifierOp::ClassifyTest => {
                let vector = Self::test_vector(data)?;
                data.category = self.engine.classify(vector);
                log::info!("pme classify: category={}", data.category);
            }
            ClassifierOp::LearnImu => {
                self.pipeline.set_mode(PipelineMode::Learning(data.category));
                log::info!("neurons: {}", self.engine.committed_count());
            }
            ClassifierOp::ClassifyImu => {
                self.pipeline.set_mode(PipelineMode::Classifying);
                log::info!("neurons: {}", self.engine.committed_count());
            }
            ClassifierOp::ReadNeurons => {
                let neurons = self.engine.committed();
                log::info!("context: {}", crate::config::PME_GLOBAL_CONTEXT);
                log::info!("neurons: {}", neurons.len());
                for (nid, neuron) in neurons.iter().enumerate() {
                    log::info!(
                        "Neuron: NID={} CTX={} AIF={} MIF={} cat={}",
                        nid + 1,
                        neuron.context,
                        neuron.influence,
                        neuron.min_influence,
                        neuron.category
                    );
                }
                data.count = neurons.len();
            }
            ClassifierOp::Stop => self.pipeline.set_mode(PipelineMode::Idle),
        }
        Ok(())
    }

    /// Feed one raw accelerometer triple into the pipeline.
    pub fn feed(&mut self, triple: [u8; 3]) -> Option<PipelineOutcome> {
        self.pipeline.feed(triple, self.engine.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NO_MATCH_CATEGORY;
    use crate::pme::SoftClassifier;

    fn handler() -> ClassifierHandler {
        ClassifierHandler::new(Box::new(SoftClassifier::new()))
    }

    fn send(h: &mut ClassifierHandler, op: ClassifierOp, data: &mut ClassifierData) -> Result<()> {
        h.handle(op.into(), data)
    }

    #[test]
    fn learn_test_then_classify_test() {
        let mut pme = handler();
        let mut learn = ClassifierData::with_vector(&[10, 20, 30], 2);
        send(&mut pme, ClassifierOp::LearnTest, &mut learn).unwrap();
        assert_eq!(learn.count, 1);
        assert_eq!(pme.mode(), PipelineMode::Idle);

        let mut probe = ClassifierData::with_vector(&[11, 20, 30], 0);
        send(&mut pme, ClassifierOp::ClassifyTest, &mut probe).unwrap();
        assert_eq!(probe.category, 2);
    }

    #[test]
    fn classify_on_empty_engine_is_no_match() {
        let mut pme = handler();
        let mut probe = ClassifierData::with_vector(&[1], 0);
        send(&mut pme, ClassifierOp::ClassifyTest, &mut probe).unwrap();
        assert_eq!(probe.category, NO_MATCH_CATEGORY);
    }

    #[test]
    fn empty_test_vector_is_invalid() {
        let mut pme = handler();
        let err = send(&mut pme, ClassifierOp::LearnTest, &mut ClassifierData::default()).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidParameter);
    }

    #[test]
    fn mode_transitions() {
        let mut pme = handler();
        let mut data = ClassifierData { category: 6, ..ClassifierData::default() };
        send(&mut pme, ClassifierOp::LearnImu, &mut data).unwrap();
        assert_eq!(pme.mode(), PipelineMode::Learning(6));

        send(&mut pme, ClassifierOp::ClassifyImu, &mut data).unwrap();
        assert_eq!(pme.mode(), PipelineMode::Classifying);

        send(&mut pme, ClassifierOp::Stop, &mut data).unwrap();
        assert_eq!(pme.mode(), PipelineMode::Idle);

        send(&mut pme, ClassifierOp::ClassifyImu, &mut data).unwrap();
        send(&mut pme, ClassifierOp::Init, &mut data).unwrap();
        assert_eq!(pme.mode(), PipelineMode::Idle);
    }

    #[test]
    fn read_neurons_reports_count() {
        let mut pme = handler();
        send(&mut pme, ClassifierOp::LearnTest, &mut ClassifierData::with_vector(&[0], 1)).unwrap();
        send(&mut pme, ClassifierOp::LearnTest, &mut ClassifierData::with_vector(&[90], 2)).unwrap();

        let mut data = ClassifierData::default();
        send(&mut pme, ClassifierOp::ReadNeurons, &mut data).unwrap();
        assert_eq!(data.count, 2);
    }

    #[test]
    fn imu_learning_commits_after_one_vector() {
        let mut pme = handler();
        let mut data = ClassifierData { category: 3, ..ClassifierData::default() };
        send(&mut pme, ClassifierOp::LearnImu, &mut data).unwrap();

        let outcome = (0..682).find_map(|i| pme.feed([i as u8, 0, 9]));
        assert_eq!(outcome, Some(PipelineOutcome::Learned { category: 3, committed: 1 }));
        assert_eq!(pme.engine().committed_count(), 1);
        assert_eq!(pme.mode(), PipelineMode::Idle);
    }
}
