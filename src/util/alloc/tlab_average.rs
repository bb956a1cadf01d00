use crate::util::options::Options;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Factor a TLAB size target shrinks by once TLABs reach the desired fill.
pub const REDUCTION_RATE: f64 = 0.75;

/// A TLAB fill observation: bytes used out of the TLAB's capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Sample {
    occupied: usize,
    capacity: usize,
}

/// A process-wide moving average that steers the TLAB size.
///
/// Mutators record one sample per retired TLAB. Once per GC cycle the collector calls
/// [`compute_new_sum_and_reset_samples`](Self::compute_new_sum_and_reset_samples), which
/// folds the samples into an exponentially weighted fill fraction and moves the TLAB
/// size target towards the desired fill. The target always stays within
/// `[lower_sum_border, upper_sum_border]`.
#[derive(Debug)]
pub struct WeightedAdaptiveTlabAverage {
    samples: spin::Mutex<Vec<Sample>>,
    last_counted_sum: AtomicUsize,
    lower_sum_border: usize,
    upper_sum_border: usize,
    max_grow_ratio: f64,
    weight: f64,
    desired_fill_fraction: f64,
    reduction_rate: f64,
}

impl WeightedAdaptiveTlabAverage {
    /// `initial` is both the starting target and its lower bound.
    pub fn new(
        initial: usize,
        upper_sum_border: usize,
        max_grow_ratio: f64,
        weight: f64,
        desired_fill_fraction: f64,
    ) -> Self {
        assert!(initial <= upper_sum_border);
        assert!(max_grow_ratio >= 1.0);
        assert!(weight > 0.0 && weight <= 1.0);
        assert!(desired_fill_fraction > 0.0 && desired_fill_fraction <= 1.0);
        WeightedAdaptiveTlabAverage {
            samples: spin::Mutex::new(Vec::new()),
            last_counted_sum: AtomicUsize::new(initial),
            lower_sum_border: initial,
            upper_sum_border,
            max_grow_ratio,
            weight,
            desired_fill_fraction,
            reduction_rate: REDUCTION_RATE,
        }
    }

    pub fn from_options(options: &Options) -> Self {
        WeightedAdaptiveTlabAverage::new(
            options.initial_tlab_size,
            options.max_tlab_size.max(options.initial_tlab_size),
            options.tlab_max_grow_ratio,
            options.tlab_weight,
            options.tlab_desired_fill_fraction,
        )
        .with_reduction_rate(options.tlab_reduction_rate)
    }

    pub fn with_reduction_rate(mut self, rate: f64) -> Self {
        assert!(rate > 0.0 && rate <= 1.0);
        self.reduction_rate = rate;
        self
    }

    /// Record the fill of one retired TLAB.
    pub fn store_new_sample(&self, occupied: usize, capacity: usize) {
        debug_assert!(occupied <= capacity);
        self.samples.lock().push(Sample { occupied, capacity });
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().len()
    }

    /// Fold the recorded samples into a new target and drop them.
    pub fn compute_new_sum_and_reset_samples(&self) {
        let mut samples = self.samples.lock();
        let average = samples
            .iter()
            .filter(|s| s.capacity != 0)
            .map(|s| s.occupied as f64 / s.capacity as f64)
            .fold(None, |avg: Option<f64>, fill| {
                Some(match avg {
                    None => fill,
                    Some(avg) => self.weight * fill + (1.0 - self.weight) * avg,
                })
            });
        samples.clear();

        let Some(average) = average else {
            trace!("No TLAB samples with capacity, keeping the current target");
            return;
        };

        let last = self.last_counted_sum.load(Ordering::Relaxed) as f64;
        let next = if average < self.desired_fill_fraction {
            let ratio = if average == 0.0 {
                self.max_grow_ratio
            } else {
                (self.desired_fill_fraction / average).min(self.max_grow_ratio)
            };
            last * ratio
        } else {
            last * self.reduction_rate
        };
        let blended = self.weight * next + (1.0 - self.weight) * last;
        let clamped = (blended as usize).clamp(self.lower_sum_border, self.upper_sum_border);
        debug!(
            "TLAB average fill {:.3}, target {} -> {}",
            average, last as usize, clamped
        );
        self.last_counted_sum.store(clamped, Ordering::Relaxed);
    }

    pub fn get_last_counted_sum_in_size_t(&self) -> usize {
        self.last_counted_sum.load(Ordering::Relaxed)
    }

    pub fn lower_sum_border(&self) -> usize {
        self.lower_sum_border
    }

    pub fn upper_sum_border(&self) -> usize {
        self.upper_sum_border
    }
}
