// corebridge — Pattern Matching Engine Interface
//
// The compute core hands 128-byte feature vectors to a pattern matching
// engine that learns (vector, category) pairs and classifies new vectors.
//
// Back-ends:
//   1. `SoftClassifier`: restricted-coulomb RBF network in software, L1
//      distance, same influence-field rules as the silicon engine. Used on
//      development hosts and by the tests.
//   2. A hardware engine plugs in by implementing `PatternClassifier`.

use crate::config::*;

/// Snapshot of one committed neuron.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeuronRecord {
    pub context: u8,
    pub category: u16,
    /// Active influence field.
    pub influence: u16,
    pub min_influence: u16,
    pub vector: Vec<u8>,
}

pub trait PatternClassifier: Send {
    /// Forget every neuron.
    fn init(&mut self);

    /// Learn `vector` as `category`. Returns the committed neuron count.
    fn learn(&mut self, vector: &[u8], category: u16) -> u16;

    /// Category of the closest firing neuron, or `NO_MATCH_CATEGORY`.
    fn classify(&mut self, vector: &[u8]) -> u16;

    fn committed(&self) -> Vec<NeuronRecord>;

    fn committed_count(&self) -> u16 {
        self.committed().len() as u16
    }
}

// ---------------------------------------------------------------------------
// Software back-end
// ---------------------------------------------------------------------------
#[derive(Debug, Clone)]
struct Neuron {
    category: u16,
    influence: u16,
    vector: Vec<u8>,
}

impl Neuron {
    fn distance(&self, input: &[u8]) -> u32 {
        self.vector
            .iter()
            .zip(input)
            .map(|(&a, &b)| u32::from(a.abs_diff(b)))
            .sum()
    }

    fn fires(&self, distance: u32) -> bool {
        distance < u32::from(self.influence)
    }
}

/// Software RBF classifier with `PME_NEURON_COUNT` neurons.
#[derive(Debug, Clone)]
pub struct SoftClassifier {
    neurons: Vec<Neuron>,
    capacity: usize,
}

impl Default for SoftClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftClassifier {
    pub fn new() -> Self {
        Self::with_capacity(PME_NEURON_COUNT)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            neurons: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn clamp_influence(distance: u32) -> u16 {
        distance.clamp(u32::from(PME_MIN_INFLUENCE), u32::from(PME_MAX_INFLUENCE)) as u16
    }
}

impl PatternClassifier for SoftClassifier {
    fn init(&mut self) {
        self.neurons.clear();
    }

    fn learn(&mut self, vector: &[u8], category: u16) -> u16 {
        let mut recognised = false;
        let mut nearest_other = u32::from(PME_MAX_INFLUENCE);

        for neuron in &mut self.neurons {
            let distance = neuron.distance(vector);
            if neuron.category == category {
                recognised |= neuron.fires(distance);
                continue;
            }
            nearest_other = nearest_other.min(distance);
            // Wrongly firing neurons shrink back to the new example.
            if neuron.fires(distance) {
                neuron.influence = Self::clamp_influence(distance);
            }
        }

        // Category 0 is a counter-example: it only shrinks other neurons.
        if !recognised && category != 0 {
            if self.neurons.len() < self.capacity {
                self.neurons.push(Neuron {
                    category,
                    influence: Self::clamp_influence(nearest_other),
                    vector: vector.to_vec(),
                });
            } else {
                log::warn!("pme: all {} neurons committed, category {} not learned", self.capacity, category);
            }
        }
        self.neurons.len() as u16
    }

    fn classify(&mut self, vector: &[u8]) -> u16 {
        self.neurons
            .iter()
            .map(|n| (n.distance(vector), n))
            .filter(|(d, n)| n.fires(*d))
            .min_by_key(|(d, _)| *d)
            .map(|(_, n)| n.category)
            .unwrap_or(NO_MATCH_CATEGORY)
    }

    fn committed(&self) -> Vec<NeuronRecord> {
        self.neurons
            .iter()
            .map(|n| NeuronRecord {
                context: PME_GLOBAL_CONTEXT,
                category: n.category,
                influence: n.influence,
                min_influence: PME_MIN_INFLUENCE,
                vector: n.vector.clone(),
            })
            .collect()
    }

    fn committed_count(&self) -> u16 {
        self.neurons.len() as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_engine_matches_nothing() {
        let mut pme = SoftClassifier::new();
        assert_eq!(pme.classify(&[1, 2, 3]), NO_MATCH_CATEGORY);
        assert_eq!(pme.committed_count(), 0);
    }

    #[test]
    fn learned_vector_is_recognised() {
        let mut pme = SoftClassifier::new();
        assert_eq!(pme.learn(&[10, 10, 10], 3), 1);
        assert_eq!(pme.classify(&[10, 10, 10]), 3);
        assert_eq!(pme.classify(&[12, 9, 10]), 3);
    }

    #[test]
    fn nearest_neuron_wins() {
        let mut pme = SoftClassifier::new();
        pme.learn(&[0, 0, 0], 1);
        pme.learn(&[100, 100, 100], 2);
        assert_eq!(pme.classify(&[5, 0, 0]), 1);
        assert_eq!(pme.classify(&[95, 100, 100]), 2);
    }

    #[test]
    fn conflicting_category_shrinks_influence() {
        let mut pme = SoftClassifier::new();
        pme.learn(&[0, 0, 0], 1);
        assert_eq!(pme.committed()[0].influence, PME_MAX_INFLUENCE);

        pme.learn(&[30, 0, 0], 2);
        let neurons = pme.committed();
        assert_eq!(neurons.len(), 2);
        assert_eq!(neurons[0].influence, 30);
        assert_eq!(neurons[1].influence, 30);
        assert_eq!(neurons[1].context, PME_GLOBAL_CONTEXT);
    }

    #[test]
    fn repeated_example_commits_once() {
        let mut pme = SoftClassifier::new();
        pme.learn(&[4, 5, 6], 7);
        assert_eq!(pme.learn(&[4, 5, 6], 7), 1);
    }

    #[test]
    fn init_forgets_everything() {
        let mut pme = SoftClassifier::new();
        pme.learn(&[1], 1);
        pme.init();
        assert!(pme.committed().is_empty());
    }

    #[test]
    fn full_network_stops_committing() {
        let mut pme = SoftClassifier::with_capacity(2);
        pme.learn(&[0], 1);
        pme.learn(&[200], 2);
        assert_eq!(pme.learn(&[100], 3), 2);
    }
}
