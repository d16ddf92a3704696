use rand::Rng;
use rand::seq::SliceRandom;

/// Uniform sample, without replacement, from the lesson window an exam
/// covers. The shuffled order is the order the questions are asked in.
///
/// When the window is shorter than the requested size the whole window is
/// used; questions are never repeated to pad the sample.
pub fn sample_exam_questions<R: Rng + ?Sized>(
    mut window: Vec<u32>,
    size: usize,
    rng: &mut R,
) -> Vec<u32> {
    window.shuffle(rng);
    window.truncate(size);
    window
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn sample_draws_distinct_questions_from_the_window() {
        let window: Vec<u32> = (1..=25).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let sample = sample_exam_questions(window.clone(), 10, &mut rng);

        assert_eq!(sample.len(), 10);
        let mut seen = sample.clone();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 10, "sample must not repeat questions");
        assert!(sample.iter().all(|q| window.contains(q)));
    }

    #[test]
    fn short_window_yields_the_whole_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let sample = sample_exam_questions(vec![1, 2, 3], 10, &mut rng);

        let mut sorted = sample.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3]);
    }

    #[test]
    fn empty_window_yields_empty_sample() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(sample_exam_questions(Vec::new(), 10, &mut rng).is_empty());
    }

    #[test]
    fn sampling_is_deterministic_for_a_seeded_rng() {
        let window: Vec<u32> = (1..=25).collect();
        let a = sample_exam_questions(window.clone(), 10, &mut StdRng::seed_from_u64(42));
        let b = sample_exam_questions(window, 10, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }
}
