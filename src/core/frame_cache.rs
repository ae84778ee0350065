//! Per-stream LRU frame cache with background prefetch
//!
//! **Why**: Displaying N synchronized videos needs the frame at the playhead
//! for every stream each tick. Decoding on demand stalls the command loop on
//! every miss, so the cache keeps a bounded window of decoded frames per
//! stream and prefetches ahead of the playhead in the direction of travel.
//!
//! **Used by**: Session (panel composition, export)
//!
//! # Ownership
//!
//! The cache itself is owned by the command loop thread. Worker jobs never
//! touch cache entries: they decode through the stream's `DecodeAdapter`
//! (one mutex per stream, so at most one decode per stream at a time) and
//! send `PrefetchResult`s over a channel. `drain_prefetch()` applies them on
//! the owner thread.
//!
//! # Stale results
//!
//! A prefetch result is discarded when any of these holds:
//! - its stream was removed
//! - the stream's epoch moved on (the playhead jumped out of the window)
//! - its index is no longer inside the current prefetch window
//! - the index is already cached (never overwrite a fresher entry)
//!
//! # Eviction
//!
//! Least-recently-used first, never the pinned index
//! `min(playhead, frame_count - 1)` of that stream.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, trace, warn};
use lru::LruCache;

use super::workers::Workers;
use crate::entities::decoder::{DecodeAdapter, DecodeError, DecodeStats};
use crate::entities::frame::Frame;
use crate::entities::stream::{VideoId, VideoStream};

/// Marker value for "no prefetch job in flight"
const IDLE: u64 = u64::MAX;

/// Longest a miss waits for the in-flight prefetch job to deliver its index
const PREFETCH_WAIT: Duration = Duration::from_millis(500);

/// Re-check interval while waiting (the job may end without sending `index`)
const PREFETCH_POLL: Duration = Duration::from_millis(2);

/// Cache hit/miss counters
///
/// **Why**: Prefetch tuning (window size, worker count) is judged by how many
/// playhead requests were already decoded. Counters are atomics so the
/// `Arc` can be shared with the status line without borrowing the cache.
///
/// **Used by**: FrameCache (updates), Session::cache_stats, `status` snapshot
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    /// Worker results that were inserted
    prefetched: AtomicU64,
    /// Worker results dropped as stale or already cached
    discarded: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn prefetched(&self) -> u64 {
        self.prefetched.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Hits over all requests, 0.0 before the first request
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }
}

/// Frame decoded by a worker, waiting to be applied on the owner thread
///
/// **Why**: Workers never lock the cache. They hand each decoded frame back
/// over a channel, tagged with the stream epoch current when the job was
/// queued, and the owner drops the result if that epoch has since moved on.
///
/// **Used by**: prefetch jobs (send), FrameCache::drain_prefetch (apply)
pub struct PrefetchResult {
    pub video_id: VideoId,
    /// Stream epoch at enqueue time
    pub epoch: u64,
    pub index: usize,
    /// Decode errors are carried through so the owner records them as faults
    pub result: Result<Frame, DecodeError>,
}

struct StreamSlot {
    frame_count: usize,
    resolution: (usize, usize),
    adapter: Arc<Mutex<DecodeAdapter>>,
    entries: LruCache<usize, Frame>,
    /// Last successfully decoded frame (placeholder source)
    last_good: Option<Frame>,
    epoch: Arc<AtomicU64>,
    /// Epoch of the prefetch job in flight, or IDLE
    inflight: Arc<AtomicU64>,
    window: Range<usize>,
    last_request: Option<usize>,
    forward: bool,
}

impl StreamSlot {
    fn pinned(&self, playhead: usize) -> usize {
        playhead.min(self.frame_count.saturating_sub(1))
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Bounded per-stream frame store
///
/// **Why**: Every stream gets its own LRU of `capacity` frames, so a long
/// high-resolution video cannot evict a short one. A miss decodes in the
/// foreground; everything near the playhead is decoded by `Workers` first.
///
/// **Used by**: Session (one instance, owned by the command loop thread)
///
/// # Example
/// ```ignore
/// let mut cache = FrameCache::new(120, 8, Some(workers));
/// cache.add_stream(&stream, adapter);
/// cache.set_playhead(42);
/// let frame = cache.get(stream.id, 42); // queues 43..51 as well
/// ```
pub struct FrameCache {
    streams: HashMap<VideoId, StreamSlot>,
    capacity: usize,
    prefetch_window: usize,
    playhead: usize,
    workers: Option<Arc<Workers>>,
    tx: Sender<PrefetchResult>,
    rx: Receiver<PrefetchResult>,
    stats: Arc<CacheStats>,
    faults: Vec<DecodeError>,
}

impl FrameCache {
    /// Create a cache holding `capacity` frames per stream (min 2).
    ///
    /// Without `workers` every miss decodes synchronously and nothing is
    /// prefetched.
    pub fn new(capacity: usize, prefetch_window: usize, workers: Option<Arc<Workers>>) -> Self {
        let capacity = capacity.max(2);
        let prefetch_window = prefetch_window.min(capacity - 1);
        let (tx, rx) = unbounded();
        debug!(
            "FrameCache created: capacity={}/stream, prefetch_window={}, workers={}",
            capacity,
            prefetch_window,
            workers.as_ref().map(|w| w.num_threads()).unwrap_or(0)
        );
        Self {
            streams: HashMap::new(),
            capacity,
            prefetch_window,
            playhead: 0,
            workers,
            tx,
            rx,
            stats: Arc::new(CacheStats::new()),
            faults: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Register a stream and its decode adapter
    pub fn add_stream(&mut self, stream: &VideoStream, adapter: DecodeAdapter) {
        let slot = StreamSlot {
            frame_count: stream.frame_count,
            resolution: stream.native_resolution,
            adapter: Arc::new(Mutex::new(adapter)),
            entries: LruCache::unbounded(),
            last_good: None,
            epoch: Arc::new(AtomicU64::new(0)),
            inflight: Arc::new(AtomicU64::new(IDLE)),
            window: 0..0,
            last_request: None,
            forward: true,
        };
        self.streams.insert(stream.id, slot);
    }

    /// Drop a stream's entries and cancel its prefetch
    pub fn remove_stream(&mut self, id: VideoId) {
        if let Some(slot) = self.streams.remove(&id) {
            slot.bump_epoch();
            debug!("Cache: removed video {} ({} frames)", id, slot.entries.len());
        }
    }

    pub fn clear(&mut self) {
        for slot in self.streams.values() {
            slot.bump_epoch();
        }
        self.streams.clear();
        self.faults.clear();
        while self.rx.try_recv().is_ok() {}
    }

    /// Global display index; pins one entry per stream against eviction
    pub fn set_playhead(&mut self, index: usize) {
        self.playhead = index;
    }

    /// Whether `index` is cached, without touching recency
    pub fn contains(&self, id: VideoId, index: usize) -> bool {
        self.streams
            .get(&id)
            .is_some_and(|s| s.entries.contains(&index))
    }

    /// Cached frame count for a stream
    pub fn len(&self, id: VideoId) -> usize {
        self.streams.get(&id).map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn decode_stats(&self, id: VideoId) -> Option<DecodeStats> {
        self.streams
            .get(&id)
            .map(|s| s.adapter.lock().unwrap_or_else(|e| e.into_inner()).stats())
    }

    /// Whether a job for the stream's current epoch is still running
    pub fn is_prefetching(&self, id: VideoId) -> bool {
        self.streams.get(&id).is_some_and(|s| {
            let inflight = s.inflight.load(Ordering::Acquire);
            inflight != IDLE && inflight == s.epoch.load(Ordering::Acquire)
        })
    }

    /// Decode errors since the last call
    pub fn take_faults(&mut self) -> Vec<DecodeError> {
        std::mem::take(&mut self.faults)
    }

    /// Resolve a frame, decoding on miss.
    ///
    /// Returns None only for unknown ids. Decode failures yield a placeholder
    /// (last good frame, else black) that is not cached, and are recorded in
    /// `take_faults()`.
    ///
    /// `index` past the stream's end is clamped to its last frame. A miss on
    /// an index the running prefetch job will produce waits for that job
    /// (up to `PREFETCH_WAIT`) before decoding here. Each call re-centers
    /// the prefetch window on `index`, in the direction of the previous
    /// request.
    pub fn get(&mut self, id: VideoId, index: usize) -> Option<Frame> {
        self.drain_prefetch();
        let slot = self.streams.get(&id)?;
        let index = index.min(slot.frame_count.saturating_sub(1));
        if !slot.entries.contains(&index) {
            self.await_prefetch(id, index);
        }

        let slot = self.streams.get_mut(&id)?;
        if let Some(frame) = slot.entries.get(&index) {
            self.stats.record_hit();
            trace!("Cache hit: video {} frame {}", id, index);
            let frame = frame.clone();
            self.schedule_prefetch(id, index);
            return Some(frame);
        }

        self.stats.record_miss();
        trace!("Cache miss: video {} frame {}", id, index);
        let result = slot
            .adapter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .decode_frame(index);

        let frame = match result {
            Ok(frame) => {
                self.put(id, index, frame.clone());
                frame
            }
            Err(e) => {
                warn!("{}; substituting placeholder", e);
                let placeholder = match &slot.last_good {
                    Some(last) => last.as_placeholder(),
                    None => Frame::new(slot.resolution.0, slot.resolution.1),
                };
                self.faults.push(e);
                placeholder
            }
        };
        self.schedule_prefetch(id, index);
        Some(frame)
    }

    /// Insert a decoded frame, evicting least-recently-used unpinned entries
    pub fn put(&mut self, id: VideoId, index: usize, frame: Frame) {
        let Some(slot) = self.streams.get_mut(&id) else {
            return;
        };
        slot.last_good = Some(frame.clone());
        slot.entries.put(index, frame);

        let pinned = slot.pinned(self.playhead);
        while slot.entries.len() > self.capacity {
            // iter() runs most- to least-recently used
            let victim = slot.entries.iter().rev().map(|(k, _)| *k).find(|k| *k != pinned);
            match victim {
                Some(k) => {
                    slot.entries.pop(&k);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!("Cache evict: video {} frame {}", id, k);
                }
                None => break,
            }
        }
    }

    /// Apply finished prefetch results
    pub fn drain_prefetch(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            self.apply_prefetch(msg);
        }
    }

    fn apply_prefetch(&mut self, msg: PrefetchResult) {
        let Some(slot) = self.streams.get_mut(&msg.video_id) else {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let stale = msg.epoch != slot.epoch.load(Ordering::Acquire)
            || !slot.window.contains(&msg.index)
            || slot.entries.contains(&msg.index);
        if stale {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Prefetch discarded: video {} frame {} (epoch {})",
                msg.video_id, msg.index, msg.epoch
            );
            return;
        }
        match msg.result {
            Ok(frame) => {
                self.stats.prefetched.fetch_add(1, Ordering::Relaxed);
                self.put(msg.video_id, msg.index, frame);
            }
            Err(e) => debug!("Prefetch failed: {}", e),
        }
    }

    /// Wait for the running prefetch job when it is about to produce `index`.
    ///
    /// Decoding the same index on this thread would move the stream's decode
    /// cursor under the worker, turning both its next read and ours into
    /// seeks. Returns true once `index` is cached; false when no job covers
    /// it, the job ended without it, or `PREFETCH_WAIT` ran out.
    fn await_prefetch(&mut self, id: VideoId, index: usize) -> bool {
        let deadline = Instant::now() + PREFETCH_WAIT;
        loop {
            let Some(slot) = self.streams.get(&id) else {
                return false;
            };
            if slot.entries.contains(&index) {
                return true;
            }
            if !slot.window.contains(&index) {
                return false;
            }
            let epoch = slot.epoch.load(Ordering::Acquire);
            if slot.inflight.load(Ordering::Acquire) != epoch {
                // job finished; its last results may still be queued
                self.drain_prefetch();
                return self.contains(id, index);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("Video {}: prefetch of {} timed out, decoding in place", id, index);
                return false;
            }
            match self.rx.recv_timeout((deadline - now).min(PREFETCH_POLL)) {
                Ok(msg) => self.apply_prefetch(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    /// Queue decoding of the window after (or before) `index`
    fn schedule_prefetch(&mut self, id: VideoId, index: usize) {
        let window_len = self.prefetch_window;
        let Some(slot) = self.streams.get_mut(&id) else {
            return;
        };

        if let Some(last) = slot.last_request {
            if index > last {
                slot.forward = true;
            } else if index < last {
                slot.forward = false;
            }
        }
        slot.last_request = Some(index);

        let window = if slot.forward {
            (index + 1).min(slot.frame_count)..(index + 1 + window_len).min(slot.frame_count)
        } else {
            index.saturating_sub(window_len)..index
        };
        if window != slot.window {
            if !slot.window.contains(&index) {
                let epoch = slot.bump_epoch();
                trace!("Video {}: prefetch epoch -> {}", id, epoch);
            }
            slot.window = window.clone();
        }

        let Some(workers) = self.workers.as_ref() else {
            return;
        };
        let epoch = slot.epoch.load(Ordering::Acquire);
        if slot.inflight.load(Ordering::Acquire) == epoch {
            return;
        }
        // ascending order: a backward window costs one seek, then sequential reads
        let missing: Vec<usize> = window.filter(|i| !slot.entries.contains(i)).collect();
        if missing.is_empty() {
            return;
        }

        slot.inflight.store(epoch, Ordering::Release);
        let adapter = Arc::clone(&slot.adapter);
        let epoch_ref = Arc::clone(&slot.epoch);
        let inflight = Arc::clone(&slot.inflight);
        let tx = self.tx.clone();
        trace!("Video {}: prefetch {:?} (epoch {})", id, missing, epoch);

        let job_epoch = Arc::clone(&epoch_ref);
        workers.execute_with_epoch(epoch_ref, epoch, move || {
            for index in missing {
                if job_epoch.load(Ordering::Acquire) != epoch {
                    break;
                }
                let result = adapter
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .decode_frame(index);
                let msg = PrefetchResult {
                    video_id: id,
                    epoch,
                    index,
                    result,
                };
                if tx.send(msg).is_err() {
                    break;
                }
            }
            let _ = inflight.compare_exchange(epoch, IDLE, Ordering::AcqRel, Ordering::Acquire);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::decoder::{DecodeService, VideoSource};
    use crate::entities::stream::StreamInfo;
    use crate::entities::synthetic::SyntheticService;
    use std::path::Path;

    /// Backend that takes `delay` per decoded frame
    struct SlowSource {
        inner: Box<dyn VideoSource>,
        delay: Duration,
    }

    impl VideoSource for SlowSource {
        fn info(&self) -> StreamInfo {
            self.inner.info()
        }

        fn seek_decode(&mut self, index: usize) -> Result<Frame, String> {
            std::thread::sleep(self.delay);
            self.inner.seek_decode(index)
        }

        fn read_next(&mut self) -> Result<Frame, String> {
            std::thread::sleep(self.delay);
            self.inner.read_next()
        }
    }

    fn add(cache: &mut FrameCache, id: u32, spec: &str) -> VideoStream {
        let svc = SyntheticService::new();
        let source = svc.open(Path::new(spec)).unwrap();
        let stream = VideoStream::new(VideoId(id), Path::new(spec), &source.info());
        cache.add_stream(&stream, DecodeAdapter::new(VideoId(id), source));
        stream
    }

    #[test]
    fn test_get_is_idempotent_and_hits() {
        let mut cache = FrameCache::new(10, 4, None);
        add(&mut cache, 0, "synthetic:a?frames=50&w=8&h=8");
        let first = cache.get(VideoId(0), 7).unwrap();
        let decodes = cache.decode_stats(VideoId(0)).unwrap().decodes();
        let second = cache.get(VideoId(0), 7).unwrap();
        assert_eq!(first.pixels(), second.pixels());
        assert_eq!(cache.decode_stats(VideoId(0)).unwrap().decodes(), decodes);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_unknown_id_is_none() {
        let mut cache = FrameCache::new(10, 4, None);
        assert!(cache.get(VideoId(9), 0).is_none());
    }

    #[test]
    fn test_capacity_bound_and_lru_order() {
        let mut cache = FrameCache::new(3, 0, None);
        add(&mut cache, 0, "synthetic:a?frames=50&w=4&h=4");
        cache.set_playhead(40);
        for i in 0..3 {
            cache.get(VideoId(0), i);
        }
        // touch 0 so 1 becomes least recent
        cache.get(VideoId(0), 0);
        cache.get(VideoId(0), 3);
        assert_eq!(cache.len(VideoId(0)), 3);
        assert!(cache.contains(VideoId(0), 0));
        assert!(!cache.contains(VideoId(0), 1));
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_pinned_index_never_evicted() {
        let mut cache = FrameCache::new(2, 0, None);
        add(&mut cache, 0, "synthetic:a?frames=50&w=4&h=4");
        cache.set_playhead(5);
        cache.get(VideoId(0), 5);
        cache.get(VideoId(0), 6);
        cache.get(VideoId(0), 7);
        // 5 is least recent but pinned, so 6 goes
        assert!(cache.contains(VideoId(0), 5));
        assert!(!cache.contains(VideoId(0), 6));
        assert!(cache.contains(VideoId(0), 7));
    }

    #[test]
    fn test_pin_clamps_to_short_stream() {
        let mut cache = FrameCache::new(2, 0, None);
        add(&mut cache, 0, "synthetic:b?frames=10&w=4&h=4");
        cache.set_playhead(200);
        cache.get(VideoId(0), 9);
        cache.get(VideoId(0), 1);
        cache.get(VideoId(0), 2);
        assert!(cache.contains(VideoId(0), 9));
    }

    #[test]
    fn test_decode_failure_substitutes_last_good() {
        let mut cache = FrameCache::new(10, 0, None);
        add(&mut cache, 0, "synthetic:a?frames=20&w=4&h=4&fail=5");
        let good = cache.get(VideoId(0), 4).unwrap();
        let bad = cache.get(VideoId(0), 5).unwrap();
        assert!(bad.is_placeholder());
        assert_eq!(bad.pixels(), good.pixels());
        assert!(!cache.contains(VideoId(0), 5));
        let faults = cache.take_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].index, 5);
        assert!(cache.take_faults().is_empty());
    }

    #[test]
    fn test_failure_without_history_is_black() {
        let mut cache = FrameCache::new(10, 0, None);
        add(&mut cache, 0, "synthetic:a?frames=20&w=4&h=2&fail=0");
        let bad = cache.get(VideoId(0), 0).unwrap();
        assert!(bad.is_placeholder());
        assert_eq!(bad.resolution(), (4, 2));
        assert!(bad.pixels().chunks_exact(4).all(|p| p == [0, 0, 0, 255]));
    }

    #[test]
    fn test_failure_isolated_per_stream() {
        let mut cache = FrameCache::new(10, 0, None);
        add(&mut cache, 0, "synthetic:a?frames=20&w=4&h=4&fail=3");
        add(&mut cache, 1, "synthetic:b?frames=20&w=4&h=4");
        assert!(cache.get(VideoId(0), 3).unwrap().is_placeholder());
        assert!(!cache.get(VideoId(1), 3).unwrap().is_placeholder());
    }

    #[test]
    fn test_stale_results_discarded() {
        let mut cache = FrameCache::new(10, 4, None);
        add(&mut cache, 0, "synthetic:a?frames=50&w=4&h=4");
        cache.get(VideoId(0), 10); // window 11..15, epoch 1

        let tx = cache.tx.clone();
        let frame = Frame::new(4, 4).with_status(crate::entities::frame::FrameStatus::Decoded);
        // wrong epoch
        tx.send(PrefetchResult { video_id: VideoId(0), epoch: 0, index: 11, result: Ok(frame.clone()) }).unwrap();
        // outside window
        tx.send(PrefetchResult { video_id: VideoId(0), epoch: 1, index: 30, result: Ok(frame.clone()) }).unwrap();
        // already cached
        tx.send(PrefetchResult { video_id: VideoId(0), epoch: 1, index: 10, result: Ok(frame.clone()) }).unwrap();
        // unknown stream
        tx.send(PrefetchResult { video_id: VideoId(7), epoch: 1, index: 11, result: Ok(frame.clone()) }).unwrap();
        // valid
        tx.send(PrefetchResult { video_id: VideoId(0), epoch: 1, index: 12, result: Ok(frame.clone()) }).unwrap();
        cache.drain_prefetch();

        assert_eq!(cache.stats().discarded(), 4);
        assert_eq!(cache.stats().prefetched(), 1);
        assert!(!cache.contains(VideoId(0), 11));
        assert!(cache.contains(VideoId(0), 12));
        // cached 10 keeps its decoded pixels
        assert!(!cache.get(VideoId(0), 10).unwrap().ptr_eq(&frame));
    }

    #[test]
    fn test_background_prefetch_fills_forward_window() {
        let workers = Arc::new(Workers::new(2).unwrap());
        let mut cache = FrameCache::new(20, 5, Some(workers));
        add(&mut cache, 0, "synthetic:a?frames=100&w=8&h=8");
        cache.set_playhead(10);
        cache.get(VideoId(0), 10);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !(11..16).all(|i| cache.contains(VideoId(0), i)) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
            cache.drain_prefetch();
        }
        assert!((11..16).all(|i| cache.contains(VideoId(0), i)));

        // the window was decoded with one seek (to 10) then sequential reads
        let stats = cache.decode_stats(VideoId(0)).unwrap();
        assert_eq!(stats.seeks, 1);
        assert_eq!(stats.sequential_reads, 5);

        // playback through the window is all hits
        let hits = cache.stats().hits();
        for i in 11..16 {
            cache.set_playhead(i);
            cache.get(VideoId(0), i);
        }
        assert_eq!(cache.stats().hits(), hits + 5);
    }

    #[test]
    fn test_playback_outrunning_prefetch_stays_sequential() {
        let workers = Arc::new(Workers::new(2).unwrap());
        let mut cache = FrameCache::new(40, 8, Some(workers));
        let spec = "synthetic:a?frames=100&w=8&h=8";
        let source = SyntheticService::new().open(Path::new(spec)).unwrap();
        let stream = VideoStream::new(VideoId(0), Path::new(spec), &source.info());
        let slow = SlowSource {
            inner: source,
            delay: Duration::from_millis(20),
        };
        cache.add_stream(&stream, DecodeAdapter::new(VideoId(0), Box::new(slow)));

        // requests arrive twice as fast as frames decode
        for i in 0..30 {
            cache.set_playhead(i);
            let frame = cache.get(VideoId(0), i).unwrap();
            assert!(!frame.is_placeholder());
            std::thread::sleep(Duration::from_millis(10));
        }

        let stats = cache.decode_stats(VideoId(0)).unwrap();
        assert_eq!(stats.seeks, 0);
        assert!(cache.take_faults().is_empty());
    }

    #[test]
    fn test_backward_prefetch_fills_window_behind() {
        let workers = Arc::new(Workers::new(2).unwrap());
        let mut cache = FrameCache::new(20, 5, Some(workers));
        add(&mut cache, 0, "synthetic:a?frames=100&w=8&h=8");
        cache.set_playhead(50);
        cache.get(VideoId(0), 50);
        // a lower index flips the direction: the window becomes 44..49
        cache.set_playhead(49);
        cache.get(VideoId(0), 49);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !(44..49).all(|i| cache.contains(VideoId(0), i)) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
            cache.drain_prefetch();
        }
        assert!((44..49).all(|i| cache.contains(VideoId(0), i)));

        // stepping back through the window never decodes in the foreground
        let (hits, misses) = (cache.stats().hits(), cache.stats().misses());
        for i in (44..49).rev() {
            cache.set_playhead(i);
            assert!(!cache.get(VideoId(0), i).unwrap().is_placeholder());
        }
        assert_eq!(cache.stats().misses(), misses);
        assert_eq!(cache.stats().hits(), hits + 5);
    }

    #[test]
    fn test_remove_stream_drops_entries() {
        let mut cache = FrameCache::new(10, 0, None);
        add(&mut cache, 0, "synthetic:a?frames=20&w=4&h=4");
        cache.get(VideoId(0), 1);
        cache.remove_stream(VideoId(0));
        assert!(!cache.contains(VideoId(0), 1));
        assert!(cache.get(VideoId(0), 1).is_none());
    }
}
