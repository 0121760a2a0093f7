//! End-to-end pipeline tests over in-memory adapters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use wraith_pipe::{
    AdapterResult, Capabilities, FilterChain, FilterResult, PipelineBuilder, PipelineSession,
    PresentationAdapter, PresentationFilter, SessionEvent, WorkloadAdapter, WorkloadFilter,
};
use wraith_vt::Token;

/// Workload backed by a channel of output chunks. Input and resizes are
/// recorded for inspection.
struct ChannelWorkload {
    output: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    input: Mutex<Vec<u8>>,
    resizes: Mutex<Vec<(u16, u16)>>,
}

impl ChannelWorkload {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let workload = Arc::new(Self {
            output: tokio::sync::Mutex::new(rx),
            input: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
        });
        (workload, tx)
    }

    fn input(&self) -> Vec<u8> {
        self.input.lock().unwrap().clone()
    }

    fn resizes(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkloadAdapter for ChannelWorkload {
    async fn read_output(&self) -> AdapterResult<Option<Vec<u8>>> {
        Ok(self.output.lock().await.recv().await)
    }

    fn output_ready(&self) -> bool {
        self.output.try_lock().map(|rx| !rx.is_empty()).unwrap_or(false)
    }

    async fn write_input(&self, data: &[u8]) -> AdapterResult<()> {
        self.input.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> AdapterResult<()> {
        self.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }
}

/// Presentation backed by a channel of input chunks; rendered output and
/// interactive-mode transitions are recorded.
struct ChannelPresentation {
    written: Mutex<Vec<u8>>,
    input: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    enters: AtomicUsize,
    exits: AtomicUsize,
}

impl ChannelPresentation {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let presentation = Arc::new(Self {
            written: Mutex::new(Vec::new()),
            input: tokio::sync::Mutex::new(rx),
            enters: AtomicUsize::new(0),
            exits: AtomicUsize::new(0),
        });
        (presentation, tx)
    }

    fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl PresentationAdapter for ChannelPresentation {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_true_color: true,
            supports_alternate_screen: true,
            ..Capabilities::default()
        }
    }

    async fn write_output(&self, data: &[u8]) -> AdapterResult<()> {
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn read_input(&self) -> AdapterResult<Option<Vec<u8>>> {
        Ok(self.input.lock().await.recv().await)
    }

    async fn enter_interactive_mode(&self) -> AdapterResult<()> {
        self.enters.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exit_interactive_mode(&self) -> AdapterResult<()> {
        self.exits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Filter that records every callback it receives.
#[derive(Clone)]
struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl WorkloadFilter for Recorder {
    fn on_session_start(&mut self, cols: u16, rows: u16, _started_at: Duration) {
        self.push(format!("start {cols}x{rows}"));
    }
    fn on_output(&mut self, tokens: &[Token], _elapsed: Duration) -> FilterResult {
        self.push(format!("output {}", tokens.len()));
        Ok(())
    }
    fn on_frame_complete(&mut self, _elapsed: Duration) -> FilterResult {
        self.push("frame");
        Ok(())
    }
    fn on_resize(&mut self, cols: u16, rows: u16, _elapsed: Duration) {
        self.push(format!("resize {cols}x{rows}"));
    }
    fn on_session_end(&mut self, _elapsed: Duration) {
        self.push("end");
    }
}

impl PresentationFilter for Recorder {
    fn on_session_start(&mut self, cols: u16, rows: u16, _started_at: Duration) {
        self.push(format!("start {cols}x{rows}"));
    }
    fn on_input(&mut self, data: &[u8], _elapsed: Duration) -> FilterResult {
        self.push(format!("input {}", data.len()));
        Ok(())
    }
    fn on_resize(&mut self, cols: u16, rows: u16, _elapsed: Duration) {
        self.push(format!("resize {cols}x{rows}"));
    }
    fn on_session_end(&mut self, _elapsed: Duration) {
        self.push("end");
    }
}

/// Filter whose observation callbacks always fail.
struct Faulty;

impl WorkloadFilter for Faulty {
    fn on_output(&mut self, _tokens: &[Token], _elapsed: Duration) -> FilterResult {
        Err(wraith_pipe::FilterError::new("broken on purpose"))
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not met within deadline");
}

async fn wait_for_ended(session: &mut PipelineSession) -> Duration {
    loop {
        match session.next_event().await {
            Some(SessionEvent::Ended { elapsed }) => return elapsed,
            Some(_) => {}
            None => panic!("event channel closed before the session ended"),
        }
    }
}

#[tokio::test]
async fn test_output_reaches_grid_and_presentation() {
    let (workload, out_tx) = ChannelWorkload::new();
    let (presentation, _in_tx) = ChannelPresentation::new();
    let session = PipelineBuilder::new(workload, presentation.clone(), 80, 24)
        .start()
        .await
        .unwrap();

    out_tx.send(b"hi\x1b[31m!".to_vec()).unwrap();
    wait_for(|| presentation.written() == b"hi\x1b[31m!").await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.cell(0, 0).unwrap().glyph, "h");
    assert_eq!(snapshot.cell(1, 0).unwrap().glyph, "i");
    let bang = snapshot.cell(2, 0).unwrap();
    assert_eq!(bang.glyph, "!");
    assert!(bang.fg.is_some());
    session.shutdown().await;
}

#[tokio::test]
async fn test_escape_split_across_chunks_forwards_losslessly() {
    let (workload, out_tx) = ChannelWorkload::new();
    let (presentation, _in_tx) = ChannelPresentation::new();
    let session = PipelineBuilder::new(workload, presentation.clone(), 80, 24)
        .start()
        .await
        .unwrap();

    out_tx.send(b"\x1b[3".to_vec()).unwrap();
    out_tx.send(b"1mA".to_vec()).unwrap();
    wait_for(|| presentation.written() == b"\x1b[31mA").await;

    let snapshot = session.snapshot();
    let cell = snapshot.cell(0, 0).unwrap();
    assert_eq!(cell.glyph, "A");
    assert!(cell.fg.is_some());
    session.shutdown().await;
}

#[tokio::test]
async fn test_frame_complete_fires_once_per_drain() {
    let (workload, out_tx) = ChannelWorkload::new();
    let (presentation, _in_tx) = ChannelPresentation::new();
    let recorder = Recorder::new();

    // Queue both chunks before the session starts so the flow sees a
    // two-batch drain deterministically.
    out_tx.send(b"first".to_vec()).unwrap();
    out_tx.send(b"second".to_vec()).unwrap();

    let session = PipelineBuilder::new(workload, presentation, 80, 24)
        .with_workload_filter(recorder.clone())
        .start()
        .await
        .unwrap();

    wait_for(|| recorder.calls().iter().any(|c| c == "frame")).await;
    let calls = recorder.calls();
    assert_eq!(
        calls,
        vec!["start 80x24", "output 1", "output 1", "frame"],
        "expected one frame after both batches"
    );
    session.shutdown().await;
}

#[tokio::test]
async fn test_input_flows_to_workload_unparsed() {
    let (workload, _out_tx) = ChannelWorkload::new();
    let (presentation, in_tx) = ChannelPresentation::new();
    let recorder = Recorder::new();
    let session = PipelineBuilder::new(workload.clone(), presentation, 80, 24)
        .with_presentation_filter(recorder.clone())
        .start()
        .await
        .unwrap();

    // An escape sequence in input stays raw bytes; nothing parses it.
    in_tx.send(b"k\x1b[A".to_vec()).unwrap();
    wait_for(|| workload.input() == b"k\x1b[A").await;
    assert!(recorder.calls().contains(&"input 4".to_string()));
    session.shutdown().await;
}

#[tokio::test]
async fn test_filter_failure_is_isolated() {
    let (workload, out_tx) = ChannelWorkload::new();
    let (presentation, _in_tx) = ChannelPresentation::new();
    let recorder = Recorder::new();
    let mut session = PipelineBuilder::new(workload, presentation.clone(), 80, 24)
        .with_workload_filter(Faulty)
        .with_workload_filter(recorder.clone())
        .start()
        .await
        .unwrap();

    out_tx.send(b"data".to_vec()).unwrap();
    wait_for(|| presentation.written() == b"data").await;

    // The faulty filter did not block the second filter or the forward.
    assert!(recorder.calls().contains(&"output 1".to_string()));
    let diagnostics = session.drain_diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].chain, FilterChain::Workload);
    assert_eq!(diagnostics[0].index, 0);
    assert_eq!(diagnostics[0].callback, "on_output");
    session.shutdown().await;
}

#[tokio::test]
async fn test_input_eof_does_not_stop_output() {
    let (workload, out_tx) = ChannelWorkload::new();
    let (presentation, in_tx) = ChannelPresentation::new();
    let mut session = PipelineBuilder::new(workload, presentation.clone(), 80, 24)
        .start()
        .await
        .unwrap();

    drop(in_tx);
    assert_eq!(
        session.next_event().await,
        Some(SessionEvent::PresentationDisconnected)
    );

    // Output keeps flowing after the input side closed.
    out_tx.send(b"still here".to_vec()).unwrap();
    wait_for(|| presentation.written() == b"still here").await;
    session.shutdown().await;
}

#[tokio::test]
async fn test_both_flows_closing_ends_session() {
    let (workload, out_tx) = ChannelWorkload::new();
    let (presentation, in_tx) = ChannelPresentation::new();
    let recorder = Recorder::new();
    let mut session = PipelineBuilder::new(workload, presentation.clone(), 80, 24)
        .with_workload_filter(recorder.clone())
        .start()
        .await
        .unwrap();

    drop(out_tx);
    drop(in_tx);
    wait_for_ended(&mut session).await;

    let calls = recorder.calls();
    assert_eq!(calls.iter().filter(|c| *c == "end").count(), 1);
    assert_eq!(presentation.exits.load(Ordering::SeqCst), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_interrupts_suspended_reads() {
    let (workload, _out_tx) = ChannelWorkload::new();
    let (presentation, _in_tx) = ChannelPresentation::new();
    let recorder = Recorder::new();
    let session = PipelineBuilder::new(workload, presentation, 80, 24)
        .with_workload_filter(recorder.clone())
        .start()
        .await
        .unwrap();

    // Both flows are parked in reads with nothing queued; shutdown must
    // still return promptly and fire the end callback exactly once.
    tokio::time::timeout(Duration::from_secs(1), session.shutdown())
        .await
        .expect("shutdown did not complete in time");
    let calls = recorder.calls();
    assert_eq!(calls.iter().filter(|c| *c == "end").count(), 1);
}

#[tokio::test]
async fn test_resize_propagates_in_order() {
    let (workload, _out_tx) = ChannelWorkload::new();
    let (presentation, _in_tx) = ChannelPresentation::new();
    let wl_recorder = Recorder::new();
    let pr_recorder = Recorder::new();
    let session = PipelineBuilder::new(workload.clone(), presentation, 80, 24)
        .with_workload_filter(wl_recorder.clone())
        .with_presentation_filter(pr_recorder.clone())
        .start()
        .await
        .unwrap();

    session.resize(100, 40).unwrap();
    assert_eq!(session.snapshot().width, 100);
    assert_eq!(session.snapshot().height, 40);
    assert_eq!(workload.resizes(), vec![(100, 40)]);
    assert!(wl_recorder.calls().contains(&"resize 100x40".to_string()));
    assert!(pr_recorder.calls().contains(&"resize 100x40".to_string()));
    session.shutdown().await;
}

#[tokio::test]
async fn test_session_start_callback_carries_dimensions() {
    let (workload, _out_tx) = ChannelWorkload::new();
    let (presentation, _in_tx) = ChannelPresentation::new();
    let recorder = Recorder::new();
    let session = PipelineBuilder::new(workload, presentation.clone(), 132, 43)
        .with_workload_filter(recorder.clone())
        .start()
        .await
        .unwrap();

    assert_eq!(recorder.calls()[0], "start 132x43");
    assert_eq!(presentation.enters.load(Ordering::SeqCst), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn test_capabilities_come_from_presentation() {
    let (workload, _out_tx) = ChannelWorkload::new();
    let (presentation, _in_tx) = ChannelPresentation::new();
    let session = PipelineBuilder::new(workload, presentation, 80, 24)
        .start()
        .await
        .unwrap();
    let caps = session.capabilities();
    assert!(caps.supports_true_color);
    assert!(!caps.supports_mouse);
    session.shutdown().await;
}
