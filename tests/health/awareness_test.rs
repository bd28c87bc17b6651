// Awareness Tests
// Health score clamping and probe timeout scaling

use meshlist::health::{Awareness, HealthError};
use std::time::Duration;

#[test]
fn test_score_walks_and_clamps() {
    let awareness = Awareness::new(8).unwrap();
    let timeout = Duration::from_secs(1);

    let steps: [(isize, usize); 9] = [
        (0, 0),
        (-1, 0),
        (-10, 0),
        (1, 1),
        (-1, 0),
        (10, 7),
        (-1, 6),
        (-1, 5),
        (-10, 0),
    ];

    for (delta, score) in steps {
        awareness.apply_delta(delta);
        assert_eq!(awareness.score(), score, "after delta {}", delta);
        assert_eq!(
            awareness.scale_timeout(timeout),
            timeout * (score as u32 + 1)
        );
    }
}

#[test]
fn test_apply_delta_returns_whether_changed() {
    let awareness = Awareness::new(3).unwrap();

    assert!(!awareness.apply_delta(-1));
    assert!(awareness.apply_delta(1));
    assert!(awareness.apply_delta(5));
    assert!(!awareness.apply_delta(1));
    assert_eq!(awareness.score(), 2);
}

#[test]
fn test_max_of_one_never_moves() {
    let awareness = Awareness::new(1).unwrap();
    assert!(!awareness.apply_delta(3));
    assert_eq!(awareness.score(), 0);
    assert_eq!(awareness.max(), 1);
}

#[test]
fn test_zero_max_is_invalid() {
    assert!(matches!(
        Awareness::new(0),
        Err(HealthError::InvalidArgument(_))
    ));
}
