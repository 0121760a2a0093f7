//! The pipeline session: two concurrent flows between workload and
//! presentation, with the cell grid and filter chains in between.
//!
//! The output flow reads workload bytes, parses them, applies the tokens to
//! the grid, notifies workload-side filters, and forwards the re-serialized
//! batch to the presentation. The input flow reads presentation bytes,
//! notifies presentation-side filters, and forwards them to the workload
//! without parsing. The flows progress independently: an idle input source
//! never starves output, and input closing does not end output.
//!
//! Shutdown is cooperative. Both flows wait inside `tokio::select!` on a
//! shared watch channel, so a shutdown request interrupts any suspended read
//! immediately; a token batch already being applied always lands in full
//! before the flow observes the signal. A supervisor task joins both flows
//! and fires the session-end callbacks exactly once, whether the session was
//! shut down explicitly or both flows terminated on their own.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use wraith_vt::{CellGrid, Clock, GridError, GridSnapshot, MonotonicClock, Parser};

use crate::adapter::{AdapterError, Capabilities, PresentationAdapter, WorkloadAdapter};
use crate::filter::{
    FilterChain, FilterDiagnostic, FilterError, FilterResult, PresentationFilter, WorkloadFilter,
};

/// Errors from session construction and control.
#[derive(Debug)]
pub enum PipelineError {
    /// Width or height of zero was requested.
    InvalidDimensions { cols: u16, rows: u16 },
    Adapter(AdapterError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::InvalidDimensions { cols, rows } => {
                write!(f, "dimensions must be positive, got {cols}x{rows}")
            }
            PipelineError::Adapter(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Adapter(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AdapterError> for PipelineError {
    fn from(err: AdapterError) -> Self {
        PipelineError::Adapter(err)
    }
}

impl From<GridError> for PipelineError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::InvalidDimensions { cols, rows } => {
                PipelineError::InvalidDimensions { cols, rows }
            }
        }
    }
}

/// Lifecycle notifications surfaced to the session's owner.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The workload's output reached end-of-stream (or failed, which is
    /// treated the same).
    WorkloadDisconnected,
    /// The presentation's input reached end-of-stream.
    PresentationDisconnected,
    /// Both flows have stopped and end callbacks have run.
    Ended { elapsed: Duration },
}

type WorkloadFilters = Arc<Mutex<Vec<Box<dyn WorkloadFilter>>>>;
type PresentationFilters = Arc<Mutex<Vec<Box<dyn PresentationFilter>>>>;

/// State shared by the flows, the supervisor, and the session handle.
struct Shared {
    workload: Arc<dyn WorkloadAdapter>,
    presentation: Arc<dyn PresentationAdapter>,
    grid: Mutex<CellGrid>,
    workload_filters: WorkloadFilters,
    presentation_filters: PresentationFilters,
    clock: Arc<dyn Clock>,
    started_at: Duration,
    events: mpsc::UnboundedSender<SessionEvent>,
    diagnostics: mpsc::UnboundedSender<FilterDiagnostic>,
}

impl Shared {
    fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.started_at)
    }

    /// Run one callback over the workload chain, isolating failures.
    fn each_workload_filter(
        &self,
        callback: &'static str,
        elapsed: Duration,
        mut call: impl FnMut(&mut dyn WorkloadFilter) -> FilterResult,
    ) {
        let mut filters = self.workload_filters.lock().unwrap();
        for (index, filter) in filters.iter_mut().enumerate() {
            if let Err(error) = call(filter.as_mut()) {
                self.report(FilterChain::Workload, index, callback, error, elapsed);
            }
        }
    }

    fn each_presentation_filter(
        &self,
        callback: &'static str,
        elapsed: Duration,
        mut call: impl FnMut(&mut dyn PresentationFilter) -> FilterResult,
    ) {
        let mut filters = self.presentation_filters.lock().unwrap();
        for (index, filter) in filters.iter_mut().enumerate() {
            if let Err(error) = call(filter.as_mut()) {
                self.report(FilterChain::Presentation, index, callback, error, elapsed);
            }
        }
    }

    fn report(
        &self,
        chain: FilterChain,
        index: usize,
        callback: &'static str,
        error: FilterError,
        elapsed: Duration,
    ) {
        log::warn!("{chain:?} filter {index} failed in {callback}: {error}");
        let _ = self.diagnostics.send(FilterDiagnostic {
            chain,
            index,
            callback,
            error,
            elapsed,
        });
    }
}

/// Configures and starts a [`PipelineSession`].
///
/// Filters can only be registered here, before the session starts; the
/// chains are fixed for the session's lifetime.
pub struct PipelineBuilder {
    workload: Arc<dyn WorkloadAdapter>,
    presentation: Arc<dyn PresentationAdapter>,
    cols: u16,
    rows: u16,
    clock: Arc<dyn Clock>,
    workload_filters: Vec<Box<dyn WorkloadFilter>>,
    presentation_filters: Vec<Box<dyn PresentationFilter>>,
}

impl PipelineBuilder {
    /// Start configuring a session over the given adapters.
    ///
    /// The adapters stay owned by the caller; shutting the session down
    /// never disposes them.
    pub fn new(
        workload: Arc<dyn WorkloadAdapter>,
        presentation: Arc<dyn PresentationAdapter>,
        cols: u16,
        rows: u16,
    ) -> Self {
        Self {
            workload,
            presentation,
            cols,
            rows,
            clock: Arc::new(MonotonicClock::new()),
            workload_filters: Vec::new(),
            presentation_filters: Vec::new(),
        }
    }

    /// Substitute the clock all stamps and elapsed values read from.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_workload_filter(mut self, filter: impl WorkloadFilter + 'static) -> Self {
        self.workload_filters.push(Box::new(filter));
        self
    }

    pub fn with_presentation_filter(mut self, filter: impl PresentationFilter + 'static) -> Self {
        self.presentation_filters.push(Box::new(filter));
        self
    }

    /// Enter interactive mode, fire session-start callbacks, and spawn both
    /// flows. Must run inside a tokio runtime.
    pub async fn start(self) -> Result<PipelineSession, PipelineError> {
        let Self {
            workload,
            presentation,
            cols,
            rows,
            clock,
            mut workload_filters,
            mut presentation_filters,
        } = self;
        let grid = CellGrid::with_clock(cols, rows, clock.clone())?;
        let started_at = clock.now();

        presentation.enter_interactive_mode().await?;
        for filter in workload_filters.iter_mut() {
            filter.on_session_start(cols, rows, started_at);
        }
        for filter in presentation_filters.iter_mut() {
            filter.on_session_start(cols, rows, started_at);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (diag_tx, diag_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            workload,
            presentation,
            grid: Mutex::new(grid),
            workload_filters: Arc::new(Mutex::new(workload_filters)),
            presentation_filters: Arc::new(Mutex::new(presentation_filters)),
            clock,
            started_at,
            events: event_tx,
            diagnostics: diag_tx,
        });

        let out = tokio::spawn(output_flow(shared.clone(), shutdown_tx.subscribe()));
        let inp = tokio::spawn(input_flow(shared.clone(), shutdown_tx.subscribe()));
        let supervisor = tokio::spawn(supervise(shared.clone(), out, inp));

        Ok(PipelineSession {
            shared,
            shutdown: shutdown_tx,
            supervisor,
            events: event_rx,
            diagnostics: diag_rx,
        })
    }
}

/// A live session. Dropped into existence by [`PipelineBuilder::start`];
/// consumed by [`PipelineSession::shutdown`], so a disposed session cannot
/// be reused.
pub struct PipelineSession {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    diagnostics: mpsc::UnboundedReceiver<FilterDiagnostic>,
}

impl PipelineSession {
    /// The session clock's reading when the session started.
    pub fn started_at(&self) -> Duration {
        self.shared.started_at
    }

    /// Time elapsed since session start.
    pub fn elapsed(&self) -> Duration {
        self.shared.elapsed()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.shared.presentation.capabilities()
    }

    /// A consistent copy of the current screen. Never observes a
    /// partially-applied token.
    pub fn snapshot(&self) -> GridSnapshot {
        self.shared.grid.lock().unwrap().snapshot()
    }

    /// Propagate a geometry change: grid first (waiting out any in-flight
    /// token), then the workload, then both filter chains.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PipelineError> {
        if cols == 0 || rows == 0 {
            return Err(PipelineError::InvalidDimensions { cols, rows });
        }
        self.shared.grid.lock().unwrap().resize(cols, rows)?;
        self.shared.workload.resize(cols, rows)?;
        let elapsed = self.shared.elapsed();
        self.shared.each_workload_filter("on_resize", elapsed, |f| {
            f.on_resize(cols, rows, elapsed);
            Ok(())
        });
        self.shared.each_presentation_filter("on_resize", elapsed, |f| {
            f.on_resize(cols, rows, elapsed);
            Ok(())
        });
        Ok(())
    }

    /// Next lifecycle event, or `None` once the session has ended and the
    /// queue is drained.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Collect any filter failures reported since the last call.
    pub fn drain_diagnostics(&mut self) -> Vec<FilterDiagnostic> {
        let mut out = Vec::new();
        while let Ok(diag) = self.diagnostics.try_recv() {
            out.push(diag);
        }
        out
    }

    /// Whether either flow is still running.
    pub fn is_running(&self) -> bool {
        !self.supervisor.is_finished()
    }

    /// Request cooperative shutdown and wait for both flows and the end
    /// callbacks to finish. Any suspended read returns promptly; a token
    /// batch mid-apply lands in full first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.supervisor.await {
            log::warn!("pipeline supervisor task failed: {err}");
        }
    }
}

async fn output_flow(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut parser = Parser::new();
    let mut dirty = false;
    loop {
        let read = tokio::select! {
            _ = shutdown.changed() => return,
            read = shared.workload.read_output() => read,
        };
        let data = match read {
            Ok(Some(data)) => data,
            Ok(None) => {
                let _ = shared.events.send(SessionEvent::WorkloadDisconnected);
                return;
            }
            Err(err) => {
                log::warn!("workload read failed, treating as disconnect: {err}");
                let _ = shared.events.send(SessionEvent::WorkloadDisconnected);
                return;
            }
        };
        let tokens = parser.feed(&data);
        if !tokens.is_empty() {
            {
                let mut grid = shared.grid.lock().unwrap();
                for token in &tokens {
                    grid.apply(token);
                }
            }
            let elapsed = shared.elapsed();
            shared.each_workload_filter("on_output", elapsed, |f| f.on_output(&tokens, elapsed));

            let mut bytes = Vec::with_capacity(data.len());
            for token in &tokens {
                token.append_raw(&mut bytes);
            }
            if let Err(err) = shared.presentation.write_output(&bytes).await {
                log::warn!("presentation write failed, treating as disconnect: {err}");
                let _ = shared.events.send(SessionEvent::PresentationDisconnected);
                return;
            }
            dirty = true;
        }
        if dirty && !shared.workload.output_ready() {
            let elapsed = shared.elapsed();
            shared.each_workload_filter("on_frame_complete", elapsed, |f| {
                f.on_frame_complete(elapsed)
            });
            dirty = false;
        }
    }
}

async fn input_flow(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let read = tokio::select! {
            _ = shutdown.changed() => return,
            read = shared.presentation.read_input() => read,
        };
        let data = match read {
            Ok(Some(data)) => data,
            Ok(None) => {
                let _ = shared.events.send(SessionEvent::PresentationDisconnected);
                return;
            }
            Err(err) => {
                log::warn!("presentation read failed, treating as disconnect: {err}");
                let _ = shared.events.send(SessionEvent::PresentationDisconnected);
                return;
            }
        };
        let elapsed = shared.elapsed();
        shared.each_presentation_filter("on_input", elapsed, |f| f.on_input(&data, elapsed));
        if let Err(err) = shared.workload.write_input(&data).await {
            // The output flow notices the disconnect on its side; this flow
            // just stops forwarding.
            log::warn!("workload input write failed: {err}");
            return;
        }
    }
}

/// Joins both flows, then tears the session down exactly once.
async fn supervise(shared: Arc<Shared>, out: JoinHandle<()>, inp: JoinHandle<()>) {
    if let Err(err) = out.await {
        log::warn!("output flow task failed: {err}");
    }
    if let Err(err) = inp.await {
        log::warn!("input flow task failed: {err}");
    }
    if let Err(err) = shared.presentation.exit_interactive_mode().await {
        log::warn!("failed to exit interactive mode: {err}");
    }
    let elapsed = shared.elapsed();
    {
        let mut filters = shared.workload_filters.lock().unwrap();
        for filter in filters.iter_mut() {
            filter.on_session_end(elapsed);
        }
    }
    {
        let mut filters = shared.presentation_filters.lock().unwrap();
        for filter in filters.iter_mut() {
            filter.on_session_end(elapsed);
        }
    }
    let _ = shared.events.send(SessionEvent::Ended { elapsed });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::adapter::AdapterResult;

    struct NullWorkload;

    #[async_trait]
    impl WorkloadAdapter for NullWorkload {
        async fn read_output(&self) -> AdapterResult<Option<Vec<u8>>> {
            Ok(None)
        }
        fn output_ready(&self) -> bool {
            false
        }
        async fn write_input(&self, _data: &[u8]) -> AdapterResult<()> {
            Ok(())
        }
        fn resize(&self, _cols: u16, _rows: u16) -> AdapterResult<()> {
            Ok(())
        }
    }

    struct NullPresentation;

    #[async_trait]
    impl PresentationAdapter for NullPresentation {
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
        async fn write_output(&self, _data: &[u8]) -> AdapterResult<()> {
            Ok(())
        }
        async fn read_input(&self) -> AdapterResult<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn enter_interactive_mode(&self) -> AdapterResult<()> {
            Ok(())
        }
        async fn exit_interactive_mode(&self) -> AdapterResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_rejects_zero_dimensions() {
        let result = PipelineBuilder::new(Arc::new(NullWorkload), Arc::new(NullPresentation), 0, 24)
            .start()
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::InvalidDimensions { cols: 0, rows: 24 })
        ));
    }

    #[tokio::test]
    async fn test_resize_rejects_zero_dimensions() {
        let session =
            PipelineBuilder::new(Arc::new(NullWorkload), Arc::new(NullPresentation), 80, 24)
                .start()
                .await
                .unwrap();
        assert!(session.resize(80, 0).is_err());
        assert_eq!(session.snapshot().width, 80);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_session_with_closed_adapters_ends() {
        let mut session =
            PipelineBuilder::new(Arc::new(NullWorkload), Arc::new(NullPresentation), 80, 24)
                .start()
                .await
                .unwrap();
        let mut saw_end = false;
        while let Some(event) = session.next_event().await {
            if let SessionEvent::Ended { .. } = event {
                saw_end = true;
                break;
            }
        }
        assert!(saw_end);
        session.shutdown().await;
    }
}
