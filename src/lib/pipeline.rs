//! Order-preserving parallel formatting pipeline.
//!
//! Three actor classes cooperate over the processing-unit ring:
//!
//! - the **producer** (the caller's thread) claims the next unit in submission
//!   order, fills its payload, and dispatches a formatter task;
//! - **formatter workers** (pool threads) each format exactly one claimed unit
//!   into the unit's private buffer, with a fresh [`OutputFormat`] instance
//!   per unit;
//! - the **collector** (one dedicated thread) walks the ring strictly in
//!   submission order, copies each unit's bytes into the real sink, merges
//!   statistics, and recycles the unit.
//!
//! Formatting runs unordered across workers; emission is strictly FIFO
//! because the collector only advances past a unit after writing it. The
//! producer blocks when the ring is full and the collector blocks on the
//! next-in-order unit, so at most `capacity` units are ever in flight.
//!
//! Failure and cancellation share one mechanism: the first failing actor
//! stores its error (first writer wins), raises the monotone
//! `emergency_stop` flag, and wakes every waiter. The stored error is
//! delivered to the caller exactly once, through [`ParallelFormatter::consume`]
//! or [`ParallelFormatter::finalize`]; [`ParallelFormatter::cancel`] swallows
//! it. The pipeline is single-use per output stream.
//!
//! [`OutputFormat`]: crate::format::OutputFormat

use parking_lot::{Condvar, Mutex};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crate::chunk::{Chunk, Schema};
use crate::errors::{FormatError, Result};
use crate::event::Event;
use crate::format::FormatFactory;
use crate::pool::{PoolMetrics, WorkerPool};
use crate::ring::{Ring, UnitKind, UnitStatus};
use crate::statistics::Statistics;

/// Construction parameters for [`ParallelFormatter`].
pub struct FormatterParams {
    /// The real output sink. Only the collector thread ever writes to it.
    pub sink: Box<dyn Write + Send>,
    /// Column layout of the stream.
    pub schema: Arc<Schema>,
    /// Creates one formatter instance per processing unit.
    pub factory: FormatFactory,
    /// Worker-thread budget for parallel formatting.
    pub max_threads: usize,
    /// Injected pool counters; a fresh set is created when absent.
    pub pool_metrics: Option<Arc<PoolMetrics>>,
}

/// State shared between the producer, the formatter workers, and the
/// collector.
struct Inner {
    ring: Ring,
    factory: FormatFactory,
    /// Guards nothing by itself; pairs with the two condvars below. Status
    /// fields are atomics, but waiters re-check them under this lock and
    /// signalers notify under it, so no wakeup can fall between a waiter's
    /// check and its sleep.
    ring_mutex: Mutex<()>,
    /// Woken when a unit returns to `ReadyToInsert` (or on emergency stop).
    writer_condvar: Condvar,
    /// Woken when a unit may have become `ReadyToRead` (or on emergency stop).
    collector_condvar: Condvar,
    /// Monotone: once set it never clears; observed at every wait point.
    emergency_stop: AtomicBool,
    /// Flush the sink at the next unit boundary.
    need_flush: AtomicBool,
    /// First error observed by any actor; delivered at most once via `take`.
    background_error: Mutex<Option<FormatError>>,
    /// Aggregate statistics; own lock because watermark callbacks arrive from
    /// threads unrelated to chunk flow.
    statistics: Mutex<Statistics>,
    collector_unit_number: AtomicU64,
    /// Fired when the collector thread exits, success or failure.
    collector_finished: Event,
}

impl Inner {
    /// Wake the producer; notify under the ring lock (see `ring_mutex`).
    fn signal_writer(&self) {
        let _guard = self.ring_mutex.lock();
        self.writer_condvar.notify_all();
    }

    /// Wake the collector; notify under the ring lock (see `ring_mutex`).
    fn signal_collector(&self) {
        let _guard = self.ring_mutex.lock();
        self.collector_condvar.notify_all();
    }

    /// Record a failure (first writer wins), stop the pipeline, and wake
    /// every waiter.
    fn on_background_error(&self, error: FormatError) {
        {
            let mut slot = self.background_error.lock();
            if slot.is_some() {
                log::warn!("discarding secondary formatting error: {error}");
            } else {
                *slot = Some(error);
            }
        }
        self.emergency_stop.store(true, Ordering::SeqCst);
        let guard = self.ring_mutex.lock();
        self.writer_condvar.notify_all();
        self.collector_condvar.notify_all();
        drop(guard);
    }

    /// Raise the stop flag without recording an error (cancellation).
    fn trigger_emergency_stop(&self) {
        self.emergency_stop.store(true, Ordering::SeqCst);
        let guard = self.ring_mutex.lock();
        self.writer_condvar.notify_all();
        self.collector_condvar.notify_all();
        drop(guard);
    }

    /// Worker entry point: format one claimed unit.
    fn format_unit(&self, unit_number: u64) {
        if self.emergency_stop.load(Ordering::SeqCst) {
            return;
        }
        match self.try_format_unit(unit_number) {
            Ok(()) => {
                self.ring.unit(unit_number).set_status(UnitStatus::ReadyToRead);
                self.signal_collector();
            }
            // The unit's status stays unflipped; the collector observes the
            // stop flag instead of waiting on it forever.
            Err(error) => self.on_background_error(error),
        }
    }

    fn try_format_unit(&self, unit_number: u64) -> Result<()> {
        let unit = self.ring.unit(unit_number);
        let mut state = unit.state.lock();
        let kind = state.kind;
        let first_row = state.first_row;
        let chunk = std::mem::take(&mut state.chunk);
        state.buffer.clear();

        if kind == UnitKind::Finalize {
            // Teardown sentinel: no formatter runs and the buffer stays
            // empty. It cannot fail, so a failure here is a logic error.
            debug_assert!(chunk.is_empty());
            return Ok(());
        }

        let mut format = (self.factory)();
        let out = &mut state.buffer;
        match kind {
            UnitKind::Prefix => format.write_prefix(out)?,
            UnitKind::Body => format.write_chunk(&chunk, first_row, out)?,
            UnitKind::BodyFinish => format.write_suffix(out)?,
            UnitKind::Totals => format.write_totals(&chunk, out)?,
            UnitKind::Extremes => format.write_extremes(&chunk, out)?,
            UnitKind::Finalize => unreachable!("handled above"),
        }
        Ok(())
    }

    /// Collector thread body: drain units strictly in submission order.
    fn run_collector(&self, sink: &mut dyn Write) -> Result<()> {
        loop {
            let unit_number = self.collector_unit_number.load(Ordering::SeqCst);
            let unit = self.ring.unit(unit_number);

            {
                let mut guard = self.ring_mutex.lock();
                while unit.status() != UnitStatus::ReadyToRead
                    && !self.emergency_stop.load(Ordering::SeqCst)
                {
                    self.collector_condvar.wait(&mut guard);
                }
            }
            if self.emergency_stop.load(Ordering::SeqCst) {
                // No further bytes are written after the stop.
                return Ok(());
            }

            let (kind, rows) = {
                let mut state = unit.state.lock();
                sink.write_all(&state.buffer)?;
                state.buffer.clear();
                (state.kind, std::mem::take(&mut state.rows))
            };

            if rows > 0 {
                self.statistics.lock().rows_written += rows;
            }
            // Flushes land on unit boundaries, never mid-chunk.
            if self.need_flush.swap(false, Ordering::SeqCst) {
                sink.flush()?;
            }
            if kind == UnitKind::Finalize {
                return Ok(());
            }

            unit.set_status(UnitStatus::ReadyToInsert);
            self.collector_unit_number.fetch_add(1, Ordering::SeqCst);
            self.signal_writer();
        }
    }

    fn collector_loop(self: &Arc<Self>, mut sink: Box<dyn Write + Send>) {
        if let Err(error) = self.run_collector(&mut sink) {
            self.on_background_error(error);
        }
        // Always fire, success or failure, so finalization never blocks on a
        // dead collector.
        self.collector_finished.set();
    }
}

/// Order-preserving parallel formatting of chunks into a byte sink.
///
/// See the [module docs](self) for the architecture. The pipeline is
/// single-use: after [`finalize`](Self::finalize) or
/// [`cancel`](Self::cancel) it only reports [`FormatError::PipelineFinished`].
pub struct ParallelFormatter {
    inner: Arc<Inner>,
    pool: WorkerPool,
    collector: Option<JoinHandle<()>>,
    schema: Arc<Schema>,

    // Producer-side state; only the owning caller touches it.
    writer_unit_number: u64,
    rows_consumed: u64,
    started_prefix: bool,
    started_suffix: bool,
    finished: bool,

    inline_aggregates: bool,
    writes_exception: bool,
}

impl ParallelFormatter {
    /// Start a pipeline: allocates the ring, spawns the worker pool and the
    /// collector thread.
    #[must_use]
    pub fn new(params: FormatterParams) -> Self {
        let FormatterParams { sink, schema, factory, max_threads, pool_metrics } = params;

        // Capability probe: one fresh instance, constructed without a sink.
        let probe = factory();
        let inline_aggregates = probe.supports_inline_aggregates();
        let writes_exception = probe.supports_writing_exception();
        drop(probe);

        let inner = Arc::new(Inner {
            ring: Ring::for_threads(max_threads),
            factory,
            ring_mutex: Mutex::new(()),
            writer_condvar: Condvar::new(),
            collector_condvar: Condvar::new(),
            emergency_stop: AtomicBool::new(false),
            need_flush: AtomicBool::new(false),
            background_error: Mutex::new(None),
            statistics: Mutex::new(Statistics::default()),
            collector_unit_number: AtomicU64::new(0),
            collector_finished: Event::new(),
        });

        log::debug!(
            "parallel formatting pipeline started: {} worker threads, ring capacity {}",
            max_threads.max(1),
            inner.ring.capacity()
        );

        let metrics = pool_metrics.unwrap_or_default();
        let pool = WorkerPool::new("format-worker", max_threads, metrics);

        // Nothing fallible may run after this point: the collector is live
        // and teardown relies on this struct's Drop joining it.
        let collector = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("format-collector".to_string())
                .spawn(move || inner.collector_loop(sink))
                .unwrap_or_else(|e| panic!("failed to spawn collector thread: {e}"))
        };

        Self {
            inner,
            pool,
            collector: Some(collector),
            schema,
            writer_unit_number: 0,
            rows_consumed: 0,
            started_prefix: false,
            started_suffix: false,
            finished: false,
            inline_aggregates,
            writes_exception,
        }
    }

    /// The stream's column layout.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Ring capacity: the maximum number of in-flight units.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.ring.capacity()
    }

    /// True if mid-stream error text can be embedded in the output format.
    #[must_use]
    pub fn supports_writing_exception(&self) -> bool {
        self.writes_exception
    }

    /// Emit the stream preamble. Call at most once, before any body chunk.
    pub fn write_prefix(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.submit(Chunk::empty(), UnitKind::Prefix, true)?;
        self.started_prefix = true;
        Ok(())
    }

    /// Submit one ordered body chunk.
    pub fn consume(&mut self, chunk: Chunk) -> Result<()> {
        self.ensure_active()?;
        self.submit(chunk, UnitKind::Body, true)
    }

    /// Submit the totals rows.
    ///
    /// For formats with inline aggregates these are captured straight into
    /// the statistics snapshot; aggregate rows have no row-order semantics,
    /// so there is no reason to thread them through the ordered ring.
    pub fn consume_totals(&mut self, totals: Chunk) -> Result<()> {
        self.ensure_active()?;
        if self.inline_aggregates {
            self.inner.statistics.lock().totals = Some(totals);
            Ok(())
        } else {
            self.submit(totals, UnitKind::Totals, true)
        }
    }

    /// Submit the extremes rows. Routed like [`consume_totals`](Self::consume_totals).
    pub fn consume_extremes(&mut self, extremes: Chunk) -> Result<()> {
        self.ensure_active()?;
        if self.inline_aggregates {
            self.inner.statistics.lock().extremes = Some(extremes);
            Ok(())
        } else {
            self.submit(extremes, UnitKind::Extremes, true)
        }
    }

    /// Emit the stream postamble. Call at most once, after all body chunks.
    pub fn write_suffix(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.submit(Chunk::empty(), UnitKind::BodyFinish, true)?;
        self.started_suffix = true;
        Ok(())
    }

    /// Request a sink flush at the next unit boundary.
    pub fn flush(&self) {
        self.inner.need_flush.store(true, Ordering::SeqCst);
    }

    /// Report the pre-LIMIT row count. Callable from any thread.
    pub fn set_rows_before_limit(&self, rows: u64) {
        self.inner.statistics.lock().rows_before_limit = Some(rows);
    }

    /// Report the pre-aggregation row count. Callable from any thread.
    pub fn set_rows_before_aggregation(&self, rows: u64) {
        self.inner.statistics.lock().rows_before_aggregation = Some(rows);
    }

    /// Snapshot of the aggregate statistics.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.inner.statistics.lock().clone()
    }

    /// Resetting a parallel pipeline for a new stream is unsupported; fail
    /// fast instead of attempting a partial reset.
    pub fn reset_formatter(&mut self) -> Result<()> {
        Err(FormatError::ResetUnsupported)
    }

    /// Drain and complete the stream.
    ///
    /// Submits the teardown sentinel, waits for the collector to finish,
    /// joins all threads, and then either delivers the captured error (if it
    /// has not been delivered through an earlier call) or returns the final
    /// statistics snapshot. A missing prefix or suffix is not forced
    /// implicitly. Idempotent.
    pub fn finalize(&mut self) -> Result<Statistics> {
        if self.finished {
            return Ok(self.statistics());
        }
        self.finished = true;
        if !self.started_prefix || !self.started_suffix {
            log::debug!(
                "stream finalized without {}",
                if self.started_prefix { "suffix" } else { "prefix" }
            );
        }

        self.inner.need_flush.store(true, Ordering::SeqCst);
        // Must not throw here: the stored error surfaces after the collector
        // is joined.
        self.submit(Chunk::empty(), UnitKind::Finalize, false)?;
        self.inner.collector_finished.wait();
        self.join_threads();

        if let Some(error) = self.inner.background_error.lock().take() {
            return Err(error);
        }
        Ok(self.statistics())
    }

    /// Abandon the stream: stop all actors, join all threads, and swallow any
    /// captured error. Never blocks indefinitely; idempotent; safe after
    /// [`finalize`](Self::finalize).
    pub fn cancel(&mut self) {
        if !self.finished {
            log::debug!("parallel formatting pipeline cancelled");
        }
        self.finished = true;
        self.inner.trigger_emergency_stop();
        self.join_threads();
        // Cancellation is not reported as an error.
        let _ = self.inner.background_error.lock().take();
    }

    fn ensure_active(&self) -> Result<()> {
        if self.finished {
            return Err(FormatError::PipelineFinished);
        }
        Ok(())
    }

    /// Claim the next unit in submission order, fill it, and dispatch a
    /// formatter task for it.
    ///
    /// Blocks while the ring is full. If the emergency stop is observed,
    /// returns without submitting; with `allow_throw` the captured error is
    /// delivered here (at most once across the pipeline's lifetime).
    fn submit(&mut self, chunk: Chunk, kind: UnitKind, allow_throw: bool) -> Result<()> {
        let unit_number = self.writer_unit_number;
        let unit = self.inner.ring.unit(unit_number);

        {
            let mut guard = self.inner.ring_mutex.lock();
            while unit.status() != UnitStatus::ReadyToInsert
                && !self.inner.emergency_stop.load(Ordering::SeqCst)
            {
                self.inner.writer_condvar.wait(&mut guard);
            }
        }
        if self.inner.emergency_stop.load(Ordering::SeqCst) {
            if allow_throw {
                return self.deliver_background_error();
            }
            return Ok(());
        }

        let rows = chunk.num_rows() as u64;
        let first_row = self.rows_consumed;
        if kind == UnitKind::Body {
            self.rows_consumed += rows;
        }
        {
            let mut state = unit.state.lock();
            state.kind = kind;
            state.chunk = chunk;
            state.first_row = first_row;
            state.rows = if kind == UnitKind::Body { rows } else { 0 };
        }
        unit.set_status(UnitStatus::ReadyToFormat);
        self.writer_unit_number += 1;

        let inner = Arc::clone(&self.inner);
        self.pool.execute(Box::new(move || inner.format_unit(unit_number)));
        // The freshly dispatched unit may be the one the collector is
        // blocked on.
        self.inner.signal_collector();
        Ok(())
    }

    /// Deliver the captured error exactly once. Later observers see `Ok`, so
    /// the caller can keep using the owning format to write an error payload
    /// after catching it.
    fn deliver_background_error(&self) -> Result<()> {
        match self.inner.background_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn join_threads(&mut self) {
        self.pool.join();
        if let Some(handle) = self.collector.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ParallelFormatter {
    fn drop(&mut self) {
        if self.finished {
            // Threads are already joined after finalize/cancel; this is a
            // no-op then.
            self.join_threads();
        } else {
            // The caller skipped finalize: join everything, drop the error.
            self.cancel();
        }
    }
}
