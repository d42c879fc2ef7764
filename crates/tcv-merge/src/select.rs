//! # Selection — which source emits next
//!
//! The ordering rule of the merge stream, free of I/O and buffer types so
//! it can be checked exhaustively.
//!
//! # Rule
//!
//! 1. If any source has nothing buffered but may still deliver (a live
//!    cursor or a fetch in flight), nothing may be emitted: that source could
//!    hold a statement newer than every buffered one.
//! 2. Otherwise the source whose front key is greatest wins. Ties go to the
//!    first source in iteration order.
//! 3. No buffered statements and nothing pending anywhere: exhausted.

/// What one source offers to a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head<K> {
    /// Ordering key of the buffered front statement.
    pub front: Option<K>,
    /// More data may still arrive for this source.
    pub pending: bool,
}

/// Outcome of one selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Emit the front of this source.
    Take(usize),
    /// This source must be fetched before anything can be emitted.
    Await(usize),
    /// Nothing buffered, nothing pending.
    Exhausted,
}

pub fn select<K, I>(heads: I) -> Selection
where
    K: Ord,
    I: IntoIterator<Item = Head<K>>,
{
    let mut best: Option<(usize, K)> = None;

    for (slot, head) in heads.into_iter().enumerate() {
        match head.front {
            None if head.pending => return Selection::Await(slot),
            None => {}
            Some(key) => {
                let newer = match &best {
                    Some((_, best_key)) => key > *best_key,
                    None => true,
                };
                if newer {
                    best = Some((slot, key));
                }
            }
        }
    }

    match best {
        Some((slot, _)) => Selection::Take(slot),
        None => Selection::Exhausted,
    }
}

// =============================================================================
// Kani Proofs: Selection Safety
// =============================================================================

#[cfg(kani)]
mod proofs {
    use super::*;

    fn any_head() -> Head<u8> {
        let has_front: bool = kani::any();
        Head {
            front: if has_front { Some(kani::any()) } else { None },
            pending: kani::any(),
        }
    }

    /// **Proof: never emit past a source that may hold something newer**
    #[kani::proof]
    fn verify_blocked_source_stops_selection() {
        let heads = [any_head(), any_head(), any_head()];
        if let Selection::Take(_) = select(heads) {
            for h in &heads {
                assert!(h.front.is_some() || !h.pending);
            }
        }
    }

    /// **Proof: the chosen front is the greatest buffered front**
    #[kani::proof]
    fn verify_take_is_maximal() {
        let heads = [any_head(), any_head(), any_head()];
        if let Selection::Take(slot) = select(heads) {
            let chosen = heads[slot].front.unwrap();
            for h in &heads {
                if let Some(k) = h.front {
                    assert!(k <= chosen);
                }
            }
        }
    }
}
