//! Integration tests for the parallel formatting pipeline.
//!
//! Run with: `cargo test --test pipeline_tests`
//!
//! These tests validate the end-to-end guarantees of the pipeline under real
//! multi-threaded execution: order preservation, fail-stop error delivery,
//! silent cancellation, flush boundaries, ring back-pressure, and bounded
//! worker concurrency.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use parfmt::format::{self, OutputFormat};
use parfmt::formats::{CsvFormat, JsonRowsFormat};
use parfmt::{
    Chunk, ColumnSpec, DataType, FormatError, FormatterParams, ParallelFormatter, PoolMetrics,
    Result, Schema, Value,
};

// ============================================================================
// Test helpers
// ============================================================================

/// Enable `RUST_LOG` diagnostics for a test run.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Shared in-memory sink whose contents outlive the pipeline.
#[derive(Clone, Default)]
struct SharedSink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedSink {
    fn new() -> Self {
        Self::default()
    }

    fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    fn as_string(&self) -> String {
        String::from_utf8(self.contents()).unwrap()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink recording the byte segments between flushes.
#[derive(Clone, Default)]
struct SegmentingSink {
    segments: Arc<Mutex<Vec<Vec<u8>>>>,
    current: Arc<Mutex<Vec<u8>>>,
}

impl SegmentingSink {
    fn new() -> Self {
        Self::default()
    }

    /// Segments closed by a flush, plus any trailing unflushed bytes.
    fn segments(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .segments
            .lock()
            .iter()
            .map(|s| String::from_utf8(s.clone()).unwrap())
            .collect();
        let tail = self.current.lock().clone();
        if !tail.is_empty() {
            all.push(String::from_utf8(tail).unwrap());
        }
        all
    }
}

impl Write for SegmentingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.current.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let drained = std::mem::take(&mut *self.current.lock());
        self.segments.lock().push(drained);
        Ok(())
    }
}

/// Sink that blocks every write until released; used to fill the ring.
#[derive(Clone)]
struct GatedSink {
    open: Arc<AtomicBool>,
}

impl GatedSink {
    fn new() -> Self {
        Self { open: Arc::new(AtomicBool::new(false)) }
    }

    fn release(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}

impl Write for GatedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        while !self.open.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Format echoing the first column's text, with optional per-chunk jitter and
/// a poison value that makes formatting fail.
struct EchoFormat {
    jitter_ms: u64,
    poison: Option<&'static str>,
    poison_delay_ms: u64,
}

impl EchoFormat {
    fn plain() -> Self {
        Self { jitter_ms: 0, poison: None, poison_delay_ms: 0 }
    }

    fn jittered(jitter_ms: u64) -> Self {
        Self { jitter_ms, poison: None, poison_delay_ms: 0 }
    }

    fn poisoned(poison: &'static str, poison_delay_ms: u64) -> Self {
        Self { jitter_ms: 0, poison: Some(poison), poison_delay_ms }
    }
}

impl OutputFormat for EchoFormat {
    fn write_prefix(&mut self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"[")?;
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &Chunk, _first_row: u64, out: &mut dyn Write) -> Result<()> {
        if self.jitter_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..self.jitter_ms);
            thread::sleep(Duration::from_millis(delay));
        }
        for value in chunk.column(0) {
            let text = value.to_text();
            if self.poison == Some(text.as_str()) {
                thread::sleep(Duration::from_millis(self.poison_delay_ms));
                return Err(FormatError::format(format!("cannot format '{text}'")));
            }
            out.write_all(text.as_bytes())?;
        }
        Ok(())
    }

    fn write_suffix(&mut self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"]")?;
        Ok(())
    }
}

fn one_column_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![ColumnSpec::new("value", DataType::Utf8)]))
}

fn str_chunk(text: &str) -> Chunk {
    Chunk::new(vec![vec![Value::Str(text.to_string())]]).unwrap()
}

fn int_chunk(values: &[i64]) -> Chunk {
    Chunk::new(vec![values.iter().map(|v| Value::Int64(*v)).collect()]).unwrap()
}

// ============================================================================
// Order preservation
// ============================================================================

/// For any submission order, the sink content equals the independent
/// formatting of each chunk concatenated in order, regardless of which worker
/// finishes first.
#[test]
fn test_order_preserved_under_jittered_workers() {
    init_logging();
    let sink = SharedSink::new();
    let mut pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(sink.clone()),
        schema: one_column_schema(),
        factory: format::factory(|| EchoFormat::jittered(3)),
        max_threads: 4,
        pool_metrics: None,
    });

    pipeline.write_prefix().unwrap();
    let mut expected = String::from("[");
    for i in 0..64 {
        let text = format!("c{i:02},");
        expected.push_str(&text);
        pipeline.consume(str_chunk(&text)).unwrap();
    }
    pipeline.write_suffix().unwrap();
    expected.push(']');
    pipeline.finalize().unwrap();

    assert_eq!(sink.as_string(), expected);
}

/// Prefix "[", two chunks "A," and "B,", suffix "]" → "[A,B,]".
#[test]
fn test_two_chunk_scenario() {
    let sink = SharedSink::new();
    let mut pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(sink.clone()),
        schema: one_column_schema(),
        factory: format::factory(EchoFormat::plain),
        max_threads: 2,
        pool_metrics: None,
    });

    pipeline.write_prefix().unwrap();
    pipeline.consume(str_chunk("A,")).unwrap();
    pipeline.consume(str_chunk("B,")).unwrap();
    pipeline.write_suffix().unwrap();
    pipeline.finalize().unwrap();

    assert_eq!(sink.as_string(), "[A,B,]");
}

/// Zero chunks, prefix and suffix only → "[]".
#[test]
fn test_empty_stream_scenario() {
    let sink = SharedSink::new();
    let mut pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(sink.clone()),
        schema: one_column_schema(),
        factory: format::factory(EchoFormat::plain),
        max_threads: 2,
        pool_metrics: None,
    });

    pipeline.write_prefix().unwrap();
    pipeline.write_suffix().unwrap();
    pipeline.finalize().unwrap();

    assert_eq!(sink.as_string(), "[]");
}

/// The JSON rows format reconstructs cross-chunk separators from first_row,
/// so parallel formatting with fresh instances per chunk still yields one
/// valid document.
#[test]
fn test_json_rows_document_across_chunks() {
    let sink = SharedSink::new();
    let mut pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(sink.clone()),
        schema: Arc::new(Schema::new(vec![ColumnSpec::new("n", DataType::Int64)])),
        factory: format::factory(JsonRowsFormat::new),
        max_threads: 4,
        pool_metrics: None,
    });

    pipeline.write_prefix().unwrap();
    pipeline.consume(int_chunk(&[1, 2])).unwrap();
    pipeline.consume(int_chunk(&[3])).unwrap();
    pipeline.consume(int_chunk(&[4, 5])).unwrap();
    pipeline.write_suffix().unwrap();
    pipeline.finalize().unwrap();

    assert_eq!(sink.as_string(), "[[1],[2],[3],[4],[5]]");
}

// ============================================================================
// Failure propagation
// ============================================================================

/// If formatting chunk 3 fails, no bytes from chunk 3 or 4 reach the sink and
/// the error is delivered exactly once across all throwing entry points.
#[test]
fn test_fail_stop_delivers_error_exactly_once() {
    init_logging();
    let sink = SharedSink::new();
    let mut pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(sink.clone()),
        schema: one_column_schema(),
        // The poisoned chunk sleeps before failing so earlier chunks drain.
        factory: format::factory(|| EchoFormat::poisoned("X", 200)),
        max_threads: 2,
        pool_metrics: None,
    });

    let mut deliveries = 0;
    pipeline.write_prefix().unwrap();
    for text in ["A", "B", "X", "D"] {
        if pipeline.consume(str_chunk(text)).is_err() {
            deliveries += 1;
        }
    }
    let finalize_result = pipeline.finalize();
    if finalize_result.is_err() {
        deliveries += 1;
    }
    // A second finalize never re-raises.
    assert!(pipeline.finalize().is_ok());

    assert_eq!(deliveries, 1, "the captured error must surface exactly once");
    assert_eq!(sink.as_string(), "[AB");
}

/// A failing sink stops the pipeline the same way a failing formatter does.
#[test]
fn test_sink_failure_surfaces_in_finalize() {
    struct BrokenSink;
    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink gone"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let mut pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(BrokenSink),
        schema: one_column_schema(),
        factory: format::factory(EchoFormat::plain),
        max_threads: 2,
        pool_metrics: None,
    });

    pipeline.write_prefix().unwrap();
    let mut deliveries = 0;
    for text in ["A", "B", "C"] {
        if pipeline.consume(str_chunk(text)).is_err() {
            deliveries += 1;
        }
    }
    if pipeline.finalize().is_err() {
        deliveries += 1;
    }
    assert_eq!(deliveries, 1);
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cancel at any point returns silently and leaves no running threads.
#[test]
fn test_cancel_is_silent_and_terminating() {
    // Before any submission.
    let mut before = ParallelFormatter::new(FormatterParams {
        sink: Box::new(SharedSink::new()),
        schema: one_column_schema(),
        factory: format::factory(EchoFormat::plain),
        max_threads: 2,
        pool_metrics: None,
    });
    before.cancel();

    // Mid-stream with slow workers.
    let mut mid = ParallelFormatter::new(FormatterParams {
        sink: Box::new(SharedSink::new()),
        schema: one_column_schema(),
        factory: format::factory(|| EchoFormat::jittered(10)),
        max_threads: 2,
        pool_metrics: None,
    });
    mid.write_prefix().unwrap();
    for i in 0..8 {
        mid.consume(str_chunk(&format!("c{i}"))).unwrap();
    }
    mid.cancel();
    mid.cancel(); // idempotent

    // After finalize.
    let mut after = ParallelFormatter::new(FormatterParams {
        sink: Box::new(SharedSink::new()),
        schema: one_column_schema(),
        factory: format::factory(EchoFormat::plain),
        max_threads: 2,
        pool_metrics: None,
    });
    after.finalize().unwrap();
    after.cancel();
}

// ============================================================================
// Flush semantics
// ============================================================================

/// A flush requested between two chunks lands after the earlier chunk's bytes
/// and before the later chunk's, never mid-chunk.
#[test]
fn test_flush_lands_on_chunk_boundary() {
    let sink = SegmentingSink::new();
    let mut pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(sink.clone()),
        schema: one_column_schema(),
        factory: format::factory(EchoFormat::plain),
        max_threads: 2,
        pool_metrics: None,
    });

    pipeline.write_prefix().unwrap();
    pipeline.consume(str_chunk("first,")).unwrap();
    pipeline.flush();
    pipeline.consume(str_chunk("second,")).unwrap();
    pipeline.write_suffix().unwrap();
    pipeline.finalize().unwrap();

    let segments = sink.segments();
    let joined = segments.concat();
    assert_eq!(joined, "[first,second,]");
    // Every flush boundary falls between units, never inside one. The unit
    // ends sit at bytes 1 ("["), 7 ("first,"), 14 ("second,"), 15 ("]").
    for boundary in segments.iter().scan(0, |acc, s| {
        *acc += s.len();
        Some(*acc)
    }) {
        assert!(
            [1, 7, 14, 15].contains(&boundary),
            "flush split a chunk: boundary at byte {boundary} of {joined:?}"
        );
    }
}

// ============================================================================
// Back-pressure and concurrency bounds
// ============================================================================

/// The producer never gets more than `capacity` units ahead of the collector.
#[test]
fn test_ring_backpressure_blocks_producer() {
    init_logging();
    let sink = GatedSink::new();
    let gate = sink.clone();
    let submitted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&submitted);

    let mut pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(sink),
        schema: one_column_schema(),
        factory: format::factory(EchoFormat::plain),
        max_threads: 1, // ring capacity 3
        pool_metrics: None,
    });
    let capacity = pipeline.capacity();
    assert_eq!(capacity, 3);

    let producer = thread::spawn(move || {
        for i in 0..10 {
            pipeline.consume(str_chunk(&format!("c{i}"))).unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
        }
        pipeline.finalize().unwrap();
    });

    // With the sink gated shut, the collector drains nothing, so at most
    // `capacity` submissions can complete.
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        assert!(submitted.load(Ordering::SeqCst) <= capacity);
        thread::sleep(Duration::from_millis(10));
    }

    gate.release();
    producer.join().unwrap();
    assert_eq!(submitted.load(Ordering::SeqCst), 10);
}

/// No more than `max_threads` formatter tasks ever execute at once.
#[test]
fn test_bounded_worker_concurrency() {
    let metrics = Arc::new(PoolMetrics::new());
    let sink = SharedSink::new();
    let mut pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(sink),
        schema: one_column_schema(),
        factory: format::factory(|| EchoFormat::jittered(4)),
        max_threads: 3,
        pool_metrics: Some(Arc::clone(&metrics)),
    });

    for i in 0..40 {
        pipeline.consume(str_chunk(&format!("c{i}"))).unwrap();
    }
    pipeline.finalize().unwrap();

    assert!(metrics.peak_active() <= 3, "peak active was {}", metrics.peak_active());
    assert_eq!(metrics.scheduled(), 41); // 40 chunks + finalize sentinel
}

// ============================================================================
// Statistics and aggregate routing
// ============================================================================

/// CSV routes totals through the ordered ring; they appear in the stream at
/// their submission position.
#[test]
fn test_ordered_totals_appear_in_stream() {
    let sink = SharedSink::new();
    let schema = Arc::new(Schema::new(vec![ColumnSpec::new("n", DataType::Int64)]));
    let factory = {
        let schema = Arc::clone(&schema);
        format::factory(move || CsvFormat::new(Arc::clone(&schema)))
    };
    let mut pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(sink.clone()),
        schema,
        factory,
        max_threads: 2,
        pool_metrics: None,
    });

    pipeline.write_prefix().unwrap();
    pipeline.consume(int_chunk(&[1, 2])).unwrap();
    pipeline.consume_totals(int_chunk(&[3])).unwrap();
    pipeline.write_suffix().unwrap();
    let stats = pipeline.finalize().unwrap();

    assert_eq!(sink.as_string(), "n\n1\n2\n\n3\n");
    assert!(stats.totals.is_none(), "ordered totals must not land in statistics");
    assert_eq!(stats.rows_written, 2);
}

/// JSON captures totals/extremes inline; nothing extra reaches the stream.
#[test]
fn test_inline_totals_reach_statistics_not_stream() {
    let sink = SharedSink::new();
    let mut pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(sink.clone()),
        schema: Arc::new(Schema::new(vec![ColumnSpec::new("n", DataType::Int64)])),
        factory: format::factory(JsonRowsFormat::new),
        max_threads: 2,
        pool_metrics: None,
    });

    pipeline.write_prefix().unwrap();
    pipeline.consume(int_chunk(&[1])).unwrap();
    pipeline.consume_totals(int_chunk(&[100])).unwrap();
    pipeline.consume_extremes(int_chunk(&[0, 100])).unwrap();
    pipeline.write_suffix().unwrap();
    let stats = pipeline.finalize().unwrap();

    assert_eq!(sink.as_string(), "[[1]]");
    assert_eq!(stats.totals.unwrap().value(0, 0), &Value::Int64(100));
    assert_eq!(stats.extremes.unwrap().num_rows(), 2);
}

/// Watermark setters are callable from a thread unrelated to chunk flow.
#[test]
fn test_watermarks_from_unrelated_thread() {
    let sink = SharedSink::new();
    let pipeline = ParallelFormatter::new(FormatterParams {
        sink: Box::new(sink),
        schema: one_column_schema(),
        factory: format::factory(EchoFormat::plain),
        max_threads: 2,
        pool_metrics: None,
    });
    let pipeline = Arc::new(Mutex::new(pipeline));

    let reporter = {
        let pipeline = Arc::clone(&pipeline);
        thread::spawn(move || {
            pipeline.lock().set_rows_before_limit(777);
        })
    };
    reporter.join().unwrap();

    let mut pipeline = Arc::try_unwrap(pipeline).map_err(|_| ()).unwrap().into_inner();
    pipeline.consume(str_chunk("row")).unwrap();
    let stats = pipeline.finalize().unwrap();
    assert_eq!(stats.rows_before_limit, Some(777));
    assert_eq!(stats.rows_written, 1);
}
