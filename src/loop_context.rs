use std::sync::{PoisonError, RwLock};

use crate::decode::GcAdpcmDecoder;

/// Decoder state that must be loaded to resume playback at `loop_start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopContext {
    pub loop_start: usize,
    pub predictor_scale: u8,
    pub hist_1: i16,
    pub hist_2: i16,
}

impl LoopContext {
    /// Replays the channel from sample 0 up to `loop_start`.
    ///
    /// Works for any start, frame-aligned or not, since the decoder tracks
    /// history per sample.
    pub fn resolve(adpcm: &[u8], coefficients: &[i16; 16], loop_start: usize) -> Self {
        let mut decoder = GcAdpcmDecoder::new(adpcm, coefficients);
        decoder.skip_to(loop_start);

        let (hist_1, hist_2) = decoder.history();
        let predictor_scale = decoder.predictor_scale().unwrap_or(0);

        Self { loop_start, predictor_scale, hist_1, hist_2 }
    }
}

/// Memo of a channel's loop context.
///
/// A context read from a container is kept for its own loop start. Any other
/// loop start is resolved on first use and kept until a different one is
/// requested. Racing resolutions for the same start compute the same value,
/// so whichever is stored last is correct.
#[derive(Debug, Default)]
pub struct LoopContextCache {
    seeded: Option<LoopContext>,
    resolved: RwLock<Option<LoopContext>>,
}

impl LoopContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache pre-filled with a context read from a container.
    pub fn seeded(context: LoopContext) -> Self {
        Self { seeded: Some(context), resolved: RwLock::new(None) }
    }

    /// The most recently resolved context, or the seeded one.
    pub fn cached(&self) -> Option<LoopContext> {
        self.last_resolved().or(self.seeded)
    }

    fn last_resolved(&self) -> Option<LoopContext> {
        *self.resolved.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_or_resolve(
        &self,
        loop_start: usize,
        resolve: impl FnOnce() -> LoopContext,
    ) -> LoopContext {
        let matching = |context: &LoopContext| context.loop_start == loop_start;
        if let Some(context) = self.seeded.filter(matching) {
            return context;
        }
        if let Some(context) = self.last_resolved().filter(matching) {
            return context;
        }

        let context = resolve();
        *self.resolved.write().unwrap_or_else(PoisonError::into_inner) = Some(context);
        context
    }
}

impl Clone for LoopContextCache {
    fn clone(&self) -> Self {
        Self { seeded: self.seeded, resolved: RwLock::new(self.last_resolved()) }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{decode::decode, decode::decode_gc_adpcm, encode::encode, CodecParameters};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn signal(count: usize) -> Vec<i16> {
        (0..count)
            .map(|i| {
                let t = i as f64 / 32000.0;
                (6000.0 * (2.0 * std::f64::consts::PI * 523.0 * t).sin()
                    + 2000.0 * (2.0 * std::f64::consts::PI * 97.0 * t).sin()) as i16
            })
            .collect()
    }

    #[test]
    fn test_resumes_at_loop_start() {
        let pcm = signal(6000);
        let encoded = encode(&pcm);
        let full = decode(&encoded.adpcm, &encoded.coefficients, 0, 0, pcm.len());

        for (loop_start, loop_end) in [(1000, 5000), (1008, 5000), (1, 6000), (4999, 5000)] {
            let context = LoopContext::resolve(&encoded.adpcm, &encoded.coefficients, loop_start);
            let config = CodecParameters::new(loop_end - loop_start)
                .starting_at(loop_start)
                .with_history(context.hist_1, context.hist_2);
            let looped = decode_gc_adpcm(&encoded.adpcm, &encoded.coefficients, &config);

            assert_eq!(looped, &full[loop_start..loop_end], "loop start {}", loop_start);
            assert_eq!(context.predictor_scale, encoded.adpcm[loop_start / 14 * 8]);
        }
    }

    #[test]
    fn test_zero_loop_start() {
        let pcm = signal(100);
        let encoded = encode(&pcm);
        let context = LoopContext::resolve(&encoded.adpcm, &encoded.coefficients, 0);
        assert_eq!((context.hist_1, context.hist_2), (0, 0));
        assert_eq!(context.predictor_scale, encoded.adpcm[0]);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let pcm = signal(3000);
        let encoded = encode(&pcm);
        let first = LoopContext::resolve(&encoded.adpcm, &encoded.coefficients, 1234);
        let second = LoopContext::resolve(&encoded.adpcm, &encoded.coefficients, 1234);
        assert_eq!(first, second);
    }

    #[test]
    fn test_cache_computes_once() {
        let cache = LoopContextCache::new();
        let calls = AtomicUsize::new(0);
        let resolve = || {
            calls.fetch_add(1, Ordering::SeqCst);
            LoopContext { loop_start: 28, predictor_scale: 0x12, hist_1: 5, hist_2: -5 }
        };

        assert_eq!(cache.get_or_resolve(28, resolve).hist_1, 5);
        assert_eq!(cache.get_or_resolve(28, resolve).hist_2, -5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let other =
            cache.get_or_resolve(42, || LoopContext { loop_start: 42, ..Default::default() });
        assert_eq!(other.loop_start, 42);
        assert_eq!(cache.cached().map(|c| c.loop_start), Some(42));
    }

    #[test]
    fn test_cache_keeps_latest_loop_start() {
        let cache = LoopContextCache::new();
        let calls = AtomicUsize::new(0);
        let resolve_at = |loop_start| {
            calls.fetch_add(1, Ordering::SeqCst);
            LoopContext { loop_start, ..Default::default() }
        };

        cache.get_or_resolve(28, || resolve_at(28));
        cache.get_or_resolve(42, || resolve_at(42));
        cache.get_or_resolve(42, || resolve_at(42));
        assert_eq!(cache.clone().get_or_resolve(42, || resolve_at(42)).loop_start, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cache.get_or_resolve(28, || resolve_at(28));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_seeded_cache_is_used() {
        let seeded = LoopContext { loop_start: 14, predictor_scale: 0x21, hist_1: 1, hist_2: 2 };
        let cache = LoopContextCache::seeded(seeded);
        let context = cache.get_or_resolve(14, || panic!("seeded context should be used"));
        assert_eq!(context, seeded);
        assert_eq!(cache.clone().cached(), Some(seeded));

        // Resolving another start leaves the seeded context in place.
        let other = cache.get_or_resolve(28, || LoopContext { loop_start: 28, ..seeded });
        assert_eq!(other.loop_start, 28);
        let again = cache.get_or_resolve(14, || panic!("seeded context should be kept"));
        assert_eq!(again, seeded);
    }
}
