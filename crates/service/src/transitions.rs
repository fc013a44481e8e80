//! Order status transition table.

use model::OrderStatus;

/// Statuses reachable from `from` in one step. Terminal statuses return an empty slice.
pub const fn allowed_transitions(from: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match from {
        Pending => &[Paid, Canceled],
        Paid => &[Preparing, Canceled],
        Preparing => &[Ready, Canceled],
        Ready => &[OutForDelivery, Canceled],
        OutForDelivery => &[Delivered, Canceled],
        Delivered | Canceled => &[],
    }
}

/// Whether `current -> target` is a legal transition. Self-transitions never are.
pub fn can_transition(current: OrderStatus, target: OrderStatus) -> bool {
    allowed_transitions(current).contains(&target)
}

/// Whether no further transitions are possible.
pub const fn is_terminal(status: OrderStatus) -> bool {
    allowed_transitions(status).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn test_forward_path() {
        let path = [Pending, Paid, Preparing, Ready, OutForDelivery, Delivered];
        for pair in path.windows(2) {
            assert!(can_transition(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_cancel_from_every_non_terminal_status() {
        for status in OrderStatus::ALL {
            assert_eq!(can_transition(status, Canceled), !is_terminal(status));
        }
    }

    #[test]
    fn test_terminal_statuses_are_absorbing() {
        assert!(is_terminal(Delivered));
        assert!(is_terminal(Canceled));
        for target in OrderStatus::ALL {
            assert!(!can_transition(Delivered, target));
            assert!(!can_transition(Canceled, target));
        }
    }

    #[test]
    fn test_self_transition_rejected() {
        for status in OrderStatus::ALL {
            assert!(!can_transition(status, status));
        }
    }

    #[test]
    fn test_no_backward_or_skipping_moves() {
        assert!(!can_transition(Preparing, Paid));
        assert!(!can_transition(Pending, Preparing));
        assert!(!can_transition(Ready, Delivered));
        assert!(!can_transition(Paid, Pending));
    }
}
