//! First-match identification against the registry, with the reference identity as fallback.

use crate::types::Embedding;
use crate::vision::FaceComparator;

/// Which candidate set a probe matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    Registry(usize),
    Reference,
    Unknown,
}

/// Lowest index whose flag is set.
pub fn first_match(within_tolerance: &[bool]) -> Option<usize> {
    within_tolerance.iter().position(|&hit| hit)
}

/// Resolves a probe embedding against registry candidates in enrollment order.
///
/// The winner is the first candidate within tolerance, not the nearest one:
/// a later candidate never displaces an earlier match.
pub struct Matcher {
    comparator: Box<dyn FaceComparator>,
    tolerance: f32,
}

impl Matcher {
    pub fn new(comparator: Box<dyn FaceComparator>, tolerance: f32) -> Self {
        Self { comparator, tolerance }
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Index of the first candidate within tolerance of `probe`.
    pub fn find(&self, probe: &Embedding, candidates: &[Embedding]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let flags = self.comparator.compare_faces(candidates, probe, self.tolerance);
        first_match(&flags).filter(|&idx| idx < candidates.len())
    }

    /// Registry first, then the reference identity, else unknown.
    pub fn identify(
        &self,
        probe: &Embedding,
        registry: &[Embedding],
        reference: Option<&Embedding>,
    ) -> Match {
        if let Some(idx) = self.find(probe, registry) {
            return Match::Registry(idx);
        }
        match reference {
            Some(reference) if self.find(probe, std::slice::from_ref(reference)).is_some() => {
                Match::Reference
            }
            _ => Match::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::EuclideanComparator;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn matcher() -> Matcher {
        Matcher::new(Box::new(EuclideanComparator), 0.5)
    }

    #[test]
    fn test_first_match_not_nearest() {
        let probe = emb(&[0.0, 0.0]);
        // Both under tolerance; index 0 is farther but must win.
        let registry = vec![emb(&[0.4, 0.0]), emb(&[0.1, 0.0])];
        assert_eq!(matcher().find(&probe, &registry), Some(0));
        assert_eq!(matcher().identify(&probe, &registry, None), Match::Registry(0));
    }

    #[test]
    fn test_skips_candidates_outside_tolerance() {
        let probe = emb(&[0.0, 0.0]);
        let registry = vec![emb(&[3.0, 0.0]), emb(&[0.0, 0.9]), emb(&[0.2, 0.2])];
        assert_eq!(matcher().find(&probe, &registry), Some(2));
    }

    #[test]
    fn test_reference_fallback() {
        let probe = emb(&[1.0, 1.0]);
        let registry = vec![emb(&[5.0, 5.0])];
        let reference = emb(&[1.1, 1.0]);
        assert_eq!(matcher().identify(&probe, &registry, Some(&reference)), Match::Reference);
    }

    #[test]
    fn test_registry_beats_reference() {
        let probe = emb(&[1.0, 1.0]);
        let registry = vec![emb(&[1.2, 1.0])];
        let reference = emb(&[1.0, 1.0]);
        assert_eq!(matcher().identify(&probe, &registry, Some(&reference)), Match::Registry(0));
    }

    #[test]
    fn test_unknown_when_nothing_matches() {
        let probe = emb(&[1.0, 1.0]);
        assert_eq!(matcher().identify(&probe, &[], None), Match::Unknown);
        let far = emb(&[9.0, 9.0]);
        assert_eq!(matcher().identify(&probe, &[far.clone()], Some(&far)), Match::Unknown);
    }

    #[test]
    fn test_first_match_helper() {
        assert_eq!(first_match(&[false, true, true]), Some(1));
        assert_eq!(first_match(&[false, false]), None);
        assert_eq!(first_match(&[]), None);
    }
}
