//! Gang validation of stripe headers at open
//!
//! Rebuilds the logical-to-physical stripe maps from whatever headers
//! survived, repairing up to P corrupt headers along the way.

use crate::error::{Error, Result};
use crate::raid::header::StripeHeader;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Result of validating the headers of an open layout
#[derive(Debug, Default)]
pub struct Validation {
    /// Logical stripe id to physical slot
    pub map_lp: BTreeMap<u32, u32>,
    /// Physical slot to logical stripe id
    pub map_pl: BTreeMap<u32, u32>,
    /// Physical slots whose header was rebuilt and should be persisted
    /// under store-recovery
    pub repaired: Vec<usize>,
    /// True if every header was invalid, i.e. the file is new
    pub is_new_file: bool,
}

/// Validate all stripe headers and rebuild the stripe maps.
///
/// Cases:
/// - every header invalid: a new file; all headers become valid with zero
///   blocks and identity mapping
/// - every header valid: the carried mapping is trusted
/// - up to `nb_parity` invalid: each corrupt slot is assigned the lowest
///   unused logical id and copies its block counts from a valid header
/// - more than `nb_parity` invalid: the open must fail
pub fn validate_headers(headers: &mut [StripeHeader], nb_parity: usize) -> Result<Validation> {
    let nb_total = headers.len();
    let invalid: Vec<usize> = (0..nb_total)
        .filter(|&i| !headers[i].is_valid())
        .collect();

    let mut outcome = Validation::default();

    if invalid.len() == nb_total {
        // New file
        for (physical, header) in headers.iter_mut().enumerate() {
            header.set_stripe_id(physical as u32);
            header.set_nb_blocks(0);
            header.set_last_block_size(0);
            header.set_valid(true);
        }
        outcome.is_new_file = true;
    } else if invalid.len() > nb_parity {
        return Err(Error::HeadersInvalid {
            nb_invalid: invalid.len(),
            tolerance: nb_parity,
        });
    } else if !invalid.is_empty() {
        let reference = headers
            .iter()
            .position(|h| h.is_valid())
            .expect("at least one valid header");
        let (ref_nb_blocks, ref_last) = (
            headers[reference].nb_blocks(),
            headers[reference].last_block_size(),
        );

        let used: BTreeSet<u32> = headers
            .iter()
            .filter(|h| h.is_valid())
            .map(|h| h.stripe_id())
            .collect();
        let mut unused = (0..nb_total as u32).filter(|id| !used.contains(id));

        for &physical in &invalid {
            let stripe_id = unused
                .next()
                .ok_or_else(|| Error::Internal("no unused stripe id left".to_string()))?;
            let header = &mut headers[physical];
            header.set_stripe_id(stripe_id);
            header.set_nb_blocks(ref_nb_blocks);
            header.set_last_block_size(ref_last);
            header.set_valid(true);
            outcome.repaired.push(physical);
            debug!(physical, stripe_id, "rebuilt corrupt stripe header");
        }
    }

    // The headers now carry the full mapping; check it is a bijection
    for (physical, header) in headers.iter().enumerate() {
        let logical = header.stripe_id();
        if logical >= nb_total as u32
            || outcome.map_lp.insert(logical, physical as u32).is_some()
        {
            return Err(Error::HeadersInvalid {
                nb_invalid: nb_total,
                tolerance: nb_parity,
            });
        }
        outcome.map_pl.insert(physical as u32, logical);
    }

    Ok(outcome)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn valid_header(stripe_id: u32, nb_blocks: u64) -> StripeHeader {
        let mut h = StripeHeader::invalid();
        h.set_stripe_id(stripe_id);
        h.set_nb_blocks(nb_blocks);
        h.set_last_block_size(10);
        h.set_valid(true);
        h
    }

    #[test]
    fn test_new_file_initializes_all_headers() {
        let mut headers = vec![StripeHeader::invalid(), StripeHeader::invalid()];
        let outcome = validate_headers(&mut headers, 1).unwrap();

        assert!(outcome.is_new_file);
        assert!(outcome.repaired.is_empty());
        for (i, h) in headers.iter().enumerate() {
            assert!(h.is_valid());
            assert_eq!(h.nb_blocks(), 0);
            assert_eq!(h.stripe_id(), i as u32);
        }
        assert_eq!(outcome.map_lp.len(), 2);
    }

    #[test]
    fn test_all_valid_headers_are_trusted() {
        // Logical ids deliberately permuted
        let mut headers = vec![valid_header(2, 5), valid_header(0, 5), valid_header(1, 5)];
        let outcome = validate_headers(&mut headers, 1).unwrap();

        assert!(!outcome.is_new_file);
        assert_eq!(outcome.map_pl[&0], 2);
        assert_eq!(outcome.map_pl[&1], 0);
        assert_eq!(outcome.map_pl[&2], 1);
        assert_eq!(outcome.map_lp[&2], 0);
    }

    #[test]
    fn test_corrupt_headers_get_unused_ids() {
        let mut headers = vec![
            valid_header(2, 7),
            StripeHeader::invalid(),
            valid_header(0, 7),
            StripeHeader::invalid(),
        ];
        let outcome = validate_headers(&mut headers, 2).unwrap();

        assert_eq!(outcome.repaired, vec![1, 3]);
        // Unused logical ids 1 and 3 were assigned in order
        assert_eq!(headers[1].stripe_id(), 1);
        assert_eq!(headers[3].stripe_id(), 3);
        assert_eq!(headers[1].nb_blocks(), 7);
        assert_eq!(headers[3].last_block_size(), 10);
        assert!(headers.iter().all(|h| h.is_valid()));

        // The resulting maps form a bijection
        assert_eq!(outcome.map_lp.len(), 4);
        assert_eq!(outcome.map_pl.len(), 4);
    }

    #[test]
    fn test_too_many_corrupt_headers_fail() {
        let mut headers = vec![
            valid_header(0, 7),
            StripeHeader::invalid(),
            StripeHeader::invalid(),
            StripeHeader::invalid(),
        ];
        assert_matches!(
            validate_headers(&mut headers, 2),
            Err(Error::HeadersInvalid {
                nb_invalid: 3,
                tolerance: 2
            })
        );
    }

    #[test]
    fn test_duplicate_logical_ids_fail() {
        let mut headers = vec![valid_header(0, 7), valid_header(0, 7)];
        assert_matches!(
            validate_headers(&mut headers, 1),
            Err(Error::HeadersInvalid { .. })
        );
    }
}
