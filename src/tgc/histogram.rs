//! Circular time-bin histogram of bytes freed by the garbage collector

use super::clock::Clock;
use super::constants::{
    FREED_BYTES_HISTOGRAM_MAX_BIN_WIDTH_SECS, FREED_BYTES_HISTOGRAM_MAX_NB_BINS,
};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug)]
struct Inner {
    bins: Vec<u64>,
    start_index: usize,
    bin_width_secs: u32,
    last_update_timestamp: i64,
}

/// Histogram of bytes freed over time.
///
/// The youngest bin is at `start_index` and covers "now"; each following
/// bin (circularly) is one `bin_width_secs` slice further in the past.
pub struct FreedBytesHistogram {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FreedBytesHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreedBytesHistogram")
            .field("inner", &self.inner)
            .finish()
    }
}

impl FreedBytesHistogram {
    /// Create a histogram of `nb_bins` bins of `bin_width_secs` seconds each
    pub fn new(nb_bins: u32, bin_width_secs: u32, clock: Arc<dyn Clock>) -> Result<Self> {
        if nb_bins == 0 || nb_bins > FREED_BYTES_HISTOGRAM_MAX_NB_BINS {
            return Err(Error::InvalidNbBins {
                nb_bins,
                max: FREED_BYTES_HISTOGRAM_MAX_NB_BINS,
            });
        }
        if bin_width_secs == 0 || bin_width_secs > FREED_BYTES_HISTOGRAM_MAX_BIN_WIDTH_SECS {
            return Err(Error::InvalidBinWidth {
                width: bin_width_secs,
                max: FREED_BYTES_HISTOGRAM_MAX_BIN_WIDTH_SECS,
            });
        }

        let last_update_timestamp = clock.now_secs();
        Ok(Self {
            inner: Mutex::new(Inner {
                bins: vec![0; nb_bins as usize],
                start_index: 0,
                bin_width_secs,
                last_update_timestamp,
            }),
            clock,
        })
    }

    /// Record that `nb_bytes` were freed now
    pub fn bytes_freed(&self, nb_bytes: u64) {
        let mut inner = self.inner.lock();
        align_with_now(&mut inner, self.clock.now_secs());
        let idx = inner.start_index;
        inner.bins[idx] += nb_bytes;
    }

    /// Return the number of bytes freed in the last `last_nb_secs` seconds
    pub fn nb_bytes_freed_in_last(&self, last_nb_secs: u32) -> Result<u64> {
        let mut inner = self.inner.lock();

        let nb_bins = inner.bins.len();
        let depth = nb_bins as u32 * inner.bin_width_secs;
        if last_nb_secs > depth {
            return Err(Error::TooFarBackInTime {
                requested: last_nb_secs,
                depth,
            });
        }
        let nb_bins_to_total = div_round_up(last_nb_secs as u64, inner.bin_width_secs as u64);

        align_with_now(&mut inner, self.clock.now_secs());

        let mut total = 0u64;
        for offset in 0..nb_bins_to_total as usize {
            total += inner.bins[(inner.start_index + offset) % nb_bins];
        }
        Ok(total)
    }

    /// Return the total number of bytes freed within the histogram horizon
    pub fn total_bytes_freed(&self) -> u64 {
        let mut inner = self.inner.lock();
        align_with_now(&mut inner, self.clock.now_secs());
        inner.bins.iter().sum()
    }

    /// Return the number of bytes freed in the bin `bin_index` slices ago
    pub fn freed_bytes_in_bin(&self, bin_index: u32) -> Result<u64> {
        let inner = self.inner.lock();
        let max = inner.bins.len() as u32 - 1;
        if bin_index > max {
            return Err(Error::InvalidBinIndex {
                index: bin_index,
                max,
            });
        }
        let idx = (inner.start_index + bin_index as usize) % inner.bins.len();
        Ok(inner.bins[idx])
    }

    /// Change the bin width, conservatively rebuilding the recorded history
    /// from the per-second rates of the old binning
    pub fn set_bin_width_secs(&self, new_bin_width_secs: u32) -> Result<()> {
        if new_bin_width_secs == 0 || new_bin_width_secs > FREED_BYTES_HISTOGRAM_MAX_BIN_WIDTH_SECS
        {
            return Err(Error::InvalidBinWidth {
                width: new_bin_width_secs,
                max: FREED_BYTES_HISTOGRAM_MAX_BIN_WIDTH_SECS,
            });
        }

        let mut inner = self.inner.lock();
        let nb_bins = inner.bins.len();
        let mut temp = vec![0u64; nb_bins];
        let new_depth_secs = nb_bins as u32 * new_bin_width_secs;

        for secs_ago in 1..=new_depth_secs {
            let bin_index = ((secs_ago - 1) / new_bin_width_secs) as usize;
            match freed_bytes_per_sec(&inner, secs_ago) {
                Ok(rate) => temp[bin_index] += rate,
                Err(Error::TooFarBackInTime { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        inner.bins = temp;
        inner.start_index = 0;
        inner.bin_width_secs = new_bin_width_secs;
        Ok(())
    }

    /// Return the bin width in seconds
    pub fn bin_width_secs(&self) -> u32 {
        self.inner.lock().bin_width_secs
    }

    /// Return the number of bins
    pub fn nb_bins(&self) -> u32 {
        self.inner.lock().bins.len() as u32
    }
}

/// Slide the histogram so that the youngest bin is aligned with `now`,
/// zeroing the bins that were skipped over
fn align_with_now(inner: &mut Inner, now: i64) {
    let nb_bins = inner.bins.len();
    let age_secs = (now - inner.last_update_timestamp).max(0) as u64;
    let raw_nb_bins_to_move = div_round_nearest(age_secs, inner.bin_width_secs as u64) as usize;
    let nb_bins_to_move = raw_nb_bins_to_move.min(nb_bins);

    inner.start_index = (inner.start_index + nb_bins - nb_bins_to_move) % nb_bins;
    for i in 0..nb_bins_to_move {
        let idx = (inner.start_index + i) % nb_bins;
        inner.bins[idx] = 0;
    }
    inner.last_update_timestamp = now;
}

/// Average rate of freed bytes during the second `secs_ago` seconds in
/// the past
fn freed_bytes_per_sec(inner: &Inner, secs_ago: u32) -> Result<u64> {
    let depth = inner.bins.len() as u32 * inner.bin_width_secs;
    if secs_ago > depth {
        return Err(Error::TooFarBackInTime {
            requested: secs_ago,
            depth,
        });
    }
    if secs_ago == 0 {
        return Ok(0);
    }

    let offset = ((secs_ago - 1) / inner.bin_width_secs) as usize;
    let idx = (inner.start_index + offset) % inner.bins.len();
    Ok(div_round_nearest(inner.bins[idx], inner.bin_width_secs as u64))
}

fn div_round_up(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator - 1) / denominator
}

fn div_round_nearest(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator / 2) / denominator
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tgc::clock::FakeClock;
    use assert_matches::assert_matches;

    fn histogram(nb_bins: u32, width: u32) -> (FreedBytesHistogram, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(10_000));
        let h = FreedBytesHistogram::new(nb_bins, width, clock.clone()).unwrap();
        (h, clock)
    }

    #[test]
    fn test_invalid_construction() {
        let clock = Arc::new(FakeClock::new(0));
        assert_matches!(
            FreedBytesHistogram::new(0, 60, clock.clone()),
            Err(Error::InvalidNbBins { .. })
        );
        assert_matches!(
            FreedBytesHistogram::new(FREED_BYTES_HISTOGRAM_MAX_NB_BINS + 1, 60, clock.clone()),
            Err(Error::InvalidNbBins { .. })
        );
        assert_matches!(
            FreedBytesHistogram::new(10, 0, clock.clone()),
            Err(Error::InvalidBinWidth { .. })
        );
        assert_matches!(
            FreedBytesHistogram::new(10, FREED_BYTES_HISTOGRAM_MAX_BIN_WIDTH_SECS + 1, clock),
            Err(Error::InvalidBinWidth { .. })
        );
    }

    #[test]
    fn test_bytes_land_in_youngest_bin() {
        let (h, _clock) = histogram(10, 60);
        h.bytes_freed(100);
        h.bytes_freed(50);
        assert_eq!(h.freed_bytes_in_bin(0).unwrap(), 150);
        assert_eq!(h.total_bytes_freed(), 150);
    }

    #[test]
    fn test_bins_age_as_time_passes() {
        let (h, clock) = histogram(10, 60);
        h.bytes_freed(100);

        clock.advance(60);
        h.bytes_freed(7);

        assert_eq!(h.freed_bytes_in_bin(0).unwrap(), 7);
        assert_eq!(h.freed_bytes_in_bin(1).unwrap(), 100);
        assert_eq!(h.total_bytes_freed(), 107);
        assert_eq!(h.nb_bytes_freed_in_last(60).unwrap(), 7);
        assert_eq!(h.nb_bytes_freed_in_last(120).unwrap(), 107);
    }

    #[test]
    fn test_history_expires_past_the_horizon() {
        let (h, clock) = histogram(4, 10);
        h.bytes_freed(100);

        clock.advance(4 * 10);
        assert_eq!(h.total_bytes_freed(), 0);
    }

    #[test]
    fn test_too_far_back_in_time() {
        let (h, _clock) = histogram(4, 10);
        assert_eq!(h.nb_bytes_freed_in_last(40).unwrap(), 0);
        assert_matches!(
            h.nb_bytes_freed_in_last(41),
            Err(Error::TooFarBackInTime { depth: 40, .. })
        );
    }

    #[test]
    fn test_invalid_bin_index() {
        let (h, _clock) = histogram(4, 10);
        assert_matches!(
            h.freed_bytes_in_bin(4),
            Err(Error::InvalidBinIndex { index: 4, max: 3 })
        );
    }

    #[test]
    fn test_sum_matches_total_freed_within_horizon() {
        let (h, clock) = histogram(10, 60);
        let mut total = 0u64;
        for i in 0..5u64 {
            h.bytes_freed(10 + i);
            total += 10 + i;
            clock.advance(60);
        }
        let mut sum = 0;
        for bin in 0..h.nb_bins() {
            sum += h.freed_bytes_in_bin(bin).unwrap();
        }
        assert_eq!(sum, total);
        assert_eq!(h.total_bytes_freed(), total);
    }

    #[test]
    fn test_set_bin_width_preserves_totals() {
        let (h, _clock) = histogram(10, 60);
        h.bytes_freed(600);

        h.set_bin_width_secs(30).unwrap();
        assert_eq!(h.bin_width_secs(), 30);
        assert_eq!(h.nb_bins(), 10);

        // 600 bytes over a 60 s bin is 10 bytes/s; the 10 new 30 s bins
        // cover 300 s, of which the first 60 s carry the old rate.
        assert_eq!(h.total_bytes_freed(), 600);
        assert_eq!(h.freed_bytes_in_bin(0).unwrap(), 300);
        assert_eq!(h.freed_bytes_in_bin(1).unwrap(), 300);
        assert_eq!(h.freed_bytes_in_bin(2).unwrap(), 0);
    }

    #[test]
    fn test_set_bin_width_rejects_invalid() {
        let (h, _clock) = histogram(10, 60);
        assert_matches!(h.set_bin_width_secs(0), Err(Error::InvalidBinWidth { .. }));
    }
}
