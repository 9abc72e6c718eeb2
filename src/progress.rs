use clap::ValueEnum;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const MAX_STORED_WARNINGS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum ProgressMode {
    Auto,
    Rich,
    Plain,
    Quiet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedProgressMode {
    Rich,
    Plain,
    Quiet,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressConfig {
    pub mode: ProgressMode,
    pub idle_threshold: Duration,
    pub plain_interval: Duration,
    tty_override: Option<bool>,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            mode: ProgressMode::Auto,
            idle_threshold: Duration::from_secs(30),
            plain_interval: Duration::from_secs(2),
            tty_override: None,
        }
    }
}

impl ProgressConfig {
    pub fn new(mode: ProgressMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn with_tty_override(mut self, is_tty: bool) -> Self {
        self.tty_override = Some(is_tty);
        self
    }

    pub fn resolve_mode(self) -> ResolvedProgressMode {
        self.mode.resolve(
            self.tty_override
                .unwrap_or_else(|| std::io::stderr().is_terminal()),
        )
    }
}

impl ProgressMode {
    fn resolve(self, stderr_is_tty: bool) -> ResolvedProgressMode {
        match self {
            ProgressMode::Auto => {
                if stderr_is_tty {
                    ResolvedProgressMode::Rich
                } else {
                    ResolvedProgressMode::Plain
                }
            }
            ProgressMode::Rich => ResolvedProgressMode::Rich,
            ProgressMode::Plain => ResolvedProgressMode::Plain,
            ProgressMode::Quiet => ResolvedProgressMode::Quiet,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressOutcome {
    pub elapsed: Duration,
    pub total: u64,
    pub processed: u64,
    pub avg_per_sec: f64,
    pub warning_count: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub label: String,
    pub stage: String,
    pub unit: &'static str,
    pub processed: u64,
    pub total: u64,
    pub elapsed: Duration,
    pub rate_per_sec: f64,
    pub eta: Option<Duration>,
    pub active_ops: Vec<String>,
}

/// Cheap cloneable handle used by pipeline stages to report progress.
#[derive(Clone)]
pub struct ProgressHandle {
    inner: Arc<ProgressInner>,
}

/// Owns the ticker thread; dropping it finalizes the display.
pub struct ProgressReporter {
    handle: ProgressHandle,
    ticker: Option<JoinHandle<()>>,
}

struct ProgressInner {
    label: String,
    unit: &'static str,
    mode: ResolvedProgressMode,
    idle_threshold: Duration,
    plain_interval: Duration,
    state: Mutex<ProgressState>,
    rich: Option<RichUi>,
    stop: AtomicBool,
    finalized: AtomicBool,
}

struct RichUi {
    multi: MultiProgress,
    overall: ProgressBar,
    stage: ProgressBar,
    ops: Mutex<HashMap<String, ProgressBar>>,
}

#[derive(Debug)]
struct ProgressState {
    started: Instant,
    stage: String,
    total: u64,
    processed: u64,
    last_progress: Instant,
    last_plain_emit: Instant,
    last_idle_warn: Option<Instant>,
    rate_sample_at: Instant,
    rate_sample_count: u64,
    smoothed_rate: f64,
    operations: HashMap<String, String>,
    warnings: Vec<String>,
}

impl ProgressReporter {
    pub fn new(
        label: impl Into<String>,
        unit: &'static str,
        total: u64,
        config: ProgressConfig,
    ) -> Self {
        let label = label.into();
        let mode = config.resolve_mode();
        let now = Instant::now();

        let rich = if mode == ResolvedProgressMode::Rich {
            Some(RichUi::new(&label, unit, total))
        } else {
            None
        };

        let inner = Arc::new(ProgressInner {
            label: label.clone(),
            unit,
            mode,
            idle_threshold: config.idle_threshold,
            plain_interval: config.plain_interval,
            state: Mutex::new(ProgressState {
                started: now,
                stage: "initializing".to_string(),
                total,
                processed: 0,
                last_progress: now,
                last_plain_emit: now.checked_sub(config.plain_interval).unwrap_or(now),
                last_idle_warn: None,
                rate_sample_at: now,
                rate_sample_count: 0,
                smoothed_rate: 0.0,
                operations: HashMap::new(),
                warnings: Vec::new(),
            }),
            rich,
            stop: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
        });

        let ticker_inner = Arc::clone(&inner);
        let ticker = thread::spawn(move || {
            while !ticker_inner.stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(250));
                ticker_inner.tick_once();
            }
        });

        let handle = ProgressHandle { inner };
        handle.set_stage("starting");
        Self {
            handle,
            ticker: Some(ticker),
        }
    }

    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    pub fn finish(mut self, final_message: impl Into<String>) -> ProgressOutcome {
        self.shutdown_ticker();
        self.handle.inner.finalize(Some(final_message.into()))
    }

    fn shutdown_ticker(&mut self) {
        self.handle.inner.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.ticker.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.shutdown_ticker();
        let _ = self.handle.inner.finalize(None);
    }
}

impl ProgressHandle {
    /// Sets the item count once it is known; zero means "not counting yet".
    pub fn set_total(&self, total: u64) {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            state.total = total;
            state.last_progress = Instant::now();
            refresh_rate_locked(&mut state, Instant::now());
            snapshot_locked(&self.inner.label, self.inner.unit, &state)
        };
        if let Some(rich) = &self.inner.rich {
            rich.overall.set_length(total.max(1));
        }
        self.inner.render_snapshot(&snapshot, true);
    }

    pub fn set_stage(&self, stage: impl Into<String>) {
        let stage = stage.into();
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            state.stage = stage;
            state.last_progress = Instant::now();
            refresh_rate_locked(&mut state, Instant::now());
            snapshot_locked(&self.inner.label, self.inner.unit, &state)
        };
        self.inner.render_snapshot(&snapshot, true);
    }

    /// Advances the counter and, in plain mode, prints a `processed/total` line
    /// for every call so per-item progress is never coalesced.
    pub fn inc(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            state.processed = state.processed.saturating_add(delta);
            if state.total > 0 {
                state.processed = state.processed.min(state.total);
            }
            let now = Instant::now();
            state.last_progress = now;
            state.last_plain_emit = now;
            refresh_rate_locked(&mut state, now);
            snapshot_locked(&self.inner.label, self.inner.unit, &state)
        };
        self.inner.render_snapshot(&snapshot, true);
    }

    /// Restarts the counter at zero, e.g. when a batch is redone from scratch.
    pub fn reset(&self) {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            let now = Instant::now();
            state.processed = 0;
            state.rate_sample_at = now;
            state.rate_sample_count = 0;
            state.smoothed_rate = 0.0;
            state.last_progress = now;
            snapshot_locked(&self.inner.label, self.inner.unit, &state)
        };
        self.inner.render_snapshot(&snapshot, false);
    }

    pub fn set_operation_status(&self, operation_id: impl Into<String>, status: impl Into<String>) {
        let op_id = operation_id.into();
        let status = status.into();

        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            state.operations.insert(op_id.clone(), status.clone());
            refresh_rate_locked(&mut state, Instant::now());
            snapshot_locked(&self.inner.label, self.inner.unit, &state)
        };

        if let Some(rich) = &self.inner.rich {
            rich.set_operation(&op_id, &status);
        }
        self.inner.render_snapshot(&snapshot, false);
    }

    pub fn clear_operation(&self, operation_id: &str, final_status: Option<&str>) {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            state.operations.remove(operation_id);
            refresh_rate_locked(&mut state, Instant::now());
            snapshot_locked(&self.inner.label, self.inner.unit, &state)
        };

        if let Some(rich) = &self.inner.rich {
            rich.clear_operation(operation_id, final_status);
        }
        self.inner.render_snapshot(&snapshot, false);
    }

    pub fn log(&self, message: impl Into<String>) {
        self.inner.emit_message("INFO", &message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut state = self.inner.state.lock().unwrap();
            push_warning_locked(&mut state, &message);
        }
        self.inner.emit_message("WARN", &message);
    }
}

impl ProgressInner {
    fn tick_once(&self) {
        if self.mode == ResolvedProgressMode::Quiet {
            return;
        }

        let (snapshot, plain_due, idle_warning) = {
            let mut state = self.state.lock().unwrap();
            let now = Instant::now();
            refresh_rate_locked(&mut state, now);

            let plain_due = now.duration_since(state.last_plain_emit) >= self.plain_interval;
            if plain_due {
                state.last_plain_emit = now;
            }

            let idle_due = idle_warning_due(
                now,
                state.last_progress,
                state.last_idle_warn,
                self.idle_threshold,
                state.processed,
                state.total,
            );
            let idle_warning = if idle_due {
                state.last_idle_warn = Some(now);
                let msg = format!(
                    "IDLE WARNING: no progress for {}s (stage={}, active={})",
                    now.duration_since(state.last_progress).as_secs(),
                    state.stage,
                    active_op_display(&state.operations)
                );
                push_warning_locked(&mut state, &msg);
                Some(msg)
            } else {
                None
            };

            let snapshot = snapshot_locked(&self.label, self.unit, &state);
            (snapshot, plain_due, idle_warning)
        };

        if self.mode == ResolvedProgressMode::Rich {
            self.render_snapshot_rich(&snapshot);
        } else if plain_due {
            self.render_snapshot_plain(&snapshot);
        }

        if let Some(msg) = idle_warning {
            self.emit_message("WARN", &msg);
        }
    }

    fn render_snapshot(&self, snapshot: &ProgressSnapshot, force_plain: bool) {
        match self.mode {
            ResolvedProgressMode::Rich => self.render_snapshot_rich(snapshot),
            ResolvedProgressMode::Plain => {
                if force_plain {
                    self.render_snapshot_plain(snapshot);
                }
            }
            ResolvedProgressMode::Quiet => {}
        }
    }

    fn render_snapshot_rich(&self, snapshot: &ProgressSnapshot) {
        let Some(rich) = &self.rich else {
            return;
        };

        rich.overall.set_length(snapshot.total.max(1));
        rich.overall.set_position(snapshot.processed.min(snapshot.total.max(1)));
        rich.overall.set_message(format!(
            "stage={} rate={} ETA={} active={}",
            snapshot.stage,
            format_rate(snapshot.rate_per_sec, snapshot.unit),
            format_eta(snapshot.eta),
            join_ops(&snapshot.active_ops)
        ));

        rich.stage.set_message(format!(
            "{} | elapsed {}",
            snapshot.stage,
            format_duration(snapshot.elapsed)
        ));
        rich.stage.tick();
    }

    fn render_snapshot_plain(&self, snapshot: &ProgressSnapshot) {
        eprintln!(
            "[PROGRESS] {} elapsed={} stage={} done={}/{} {} ({:.1}%) rate={} ETA={} active={}",
            snapshot.label,
            format_duration(snapshot.elapsed),
            snapshot.stage,
            snapshot.processed,
            snapshot.total,
            snapshot.unit,
            percent(snapshot.processed, snapshot.total),
            format_rate(snapshot.rate_per_sec, snapshot.unit),
            format_eta(snapshot.eta),
            join_ops(&snapshot.active_ops)
        );
    }

    fn emit_message(&self, level: &str, message: &str) {
        match self.mode {
            ResolvedProgressMode::Quiet => {}
            ResolvedProgressMode::Plain => {
                eprintln!("[{}] {}: {}", level, self.label, message);
            }
            ResolvedProgressMode::Rich => {
                if let Some(rich) = &self.rich {
                    rich.stage
                        .println(format!("[{}] {}: {}", level, self.label, message));
                } else {
                    eprintln!("[{}] {}: {}", level, self.label, message);
                }
            }
        }
    }

    fn finalize(&self, final_message: Option<String>) -> ProgressOutcome {
        if self.finalized.swap(true, Ordering::Relaxed) {
            return self.current_outcome();
        }

        let (snapshot, warnings) = {
            let mut state = self.state.lock().unwrap();
            refresh_rate_locked(&mut state, Instant::now());
            let snapshot = snapshot_locked(&self.label, self.unit, &state);
            let warnings = state.warnings.clone();
            (snapshot, warnings)
        };

        match self.mode {
            ResolvedProgressMode::Quiet => {}
            ResolvedProgressMode::Plain => {
                if let Some(msg) = final_message.as_deref() {
                    self.render_snapshot_plain(&snapshot);
                    eprintln!("[DONE] {}: {}", self.label, msg);
                }
            }
            ResolvedProgressMode::Rich => {
                if let Some(rich) = &self.rich {
                    rich.overall.finish_with_message(format!(
                        "done={}/{} {} elapsed={}",
                        snapshot.processed,
                        snapshot.total,
                        snapshot.unit,
                        format_duration(snapshot.elapsed)
                    ));
                    if let Some(msg) = final_message {
                        rich.stage.finish_with_message(msg);
                    } else {
                        rich.stage.finish_and_clear();
                    }
                    rich.clear_all_ops();
                }
            }
        }

        outcome_from(&snapshot, warnings)
    }

    fn current_outcome(&self) -> ProgressOutcome {
        let (snapshot, warnings) = {
            let state = self.state.lock().unwrap();
            (
                snapshot_locked(&self.label, self.unit, &state),
                state.warnings.clone(),
            )
        };
        outcome_from(&snapshot, warnings)
    }
}

impl RichUi {
    fn new(label: &str, unit: &str, total: u64) -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total.max(1)));
        let stage = multi.add(ProgressBar::new_spinner());

        overall.set_style(
            ProgressStyle::with_template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] {{wide_bar:.cyan/blue}} {{pos}}/{{len}} {} | {{msg}}",
                unit
            ))
            .expect("valid progress template"),
        );
        overall.set_message(format!("{} starting", label));

        stage.set_style(
            ProgressStyle::with_template("{spinner:.yellow} {msg}")
                .expect("valid stage template")
                .tick_chars("|/-\\ "),
        );
        stage.enable_steady_tick(Duration::from_millis(120));
        stage.set_message("starting");

        Self {
            multi,
            overall,
            stage,
            ops: Mutex::new(HashMap::new()),
        }
    }

    fn set_operation(&self, op_id: &str, status: &str) {
        let mut ops = self.ops.lock().unwrap();
        let bar = ops.entry(op_id.to_string()).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(
                ProgressStyle::with_template("{spinner:.magenta} {prefix:.bold} {msg}")
                    .expect("valid operation template")
                    .tick_chars("|/-\\ "),
            );
            pb.enable_steady_tick(Duration::from_millis(120));
            pb.set_prefix(op_id.to_string());
            pb
        });
        bar.set_message(status.to_string());
    }

    fn clear_operation(&self, op_id: &str, final_status: Option<&str>) {
        let mut ops = self.ops.lock().unwrap();
        if let Some(bar) = ops.remove(op_id) {
            if let Some(status) = final_status {
                bar.finish_with_message(status.to_string());
            } else {
                bar.finish_and_clear();
            }
        }
    }

    fn clear_all_ops(&self) {
        let mut ops = self.ops.lock().unwrap();
        for (_id, bar) in ops.drain() {
            bar.finish_and_clear();
        }
    }
}

fn outcome_from(snapshot: &ProgressSnapshot, warnings: Vec<String>) -> ProgressOutcome {
    ProgressOutcome {
        elapsed: snapshot.elapsed,
        total: snapshot.total,
        processed: snapshot.processed,
        avg_per_sec: average_rate(snapshot.processed, snapshot.elapsed),
        warning_count: warnings.len(),
        warnings,
    }
}

fn push_warning_locked(state: &mut ProgressState, message: &str) {
    if state.warnings.len() >= MAX_STORED_WARNINGS {
        state.warnings.remove(0);
    }
    state.warnings.push(message.to_string());
}

fn snapshot_locked(label: &str, unit: &'static str, state: &ProgressState) -> ProgressSnapshot {
    let rate_per_sec = if state.smoothed_rate > f64::EPSILON {
        state.smoothed_rate
    } else {
        average_rate(state.processed, state.started.elapsed())
    };
    let eta = compute_eta(state.total, state.processed, rate_per_sec);

    let mut active_ops = state.operations.keys().cloned().collect::<Vec<_>>();
    active_ops.sort();
    active_ops.truncate(4);

    ProgressSnapshot {
        label: label.to_string(),
        stage: state.stage.clone(),
        unit,
        processed: state.processed,
        total: state.total,
        elapsed: state.started.elapsed(),
        rate_per_sec,
        eta,
        active_ops,
    }
}

fn refresh_rate_locked(state: &mut ProgressState, now: Instant) {
    let dt = now
        .duration_since(state.rate_sample_at)
        .as_secs_f64()
        .max(1e-6);
    if dt < 0.5 {
        return;
    }
    let delta = state.processed.saturating_sub(state.rate_sample_count);
    let instant_rate = delta as f64 / dt;
    state.smoothed_rate = if state.smoothed_rate <= f64::EPSILON {
        instant_rate
    } else {
        // EWMA to avoid erratic ETA changes.
        (state.smoothed_rate * 0.7) + (instant_rate * 0.3)
    };
    state.rate_sample_at = now;
    state.rate_sample_count = state.processed;
}

fn active_op_display(ops: &HashMap<String, String>) -> String {
    if ops.is_empty() {
        return "-".to_string();
    }
    let mut keys = ops.keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys.into_iter().take(3).collect::<Vec<_>>().join(",")
}

fn join_ops(ops: &[String]) -> String {
    if ops.is_empty() {
        "-".to_string()
    } else {
        ops.join(",")
    }
}

fn percent(processed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (processed as f64 / total as f64) * 100.0
    }
}

fn average_rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(1e-6);
    count as f64 / secs
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

fn format_rate(per_sec: f64, unit: &str) -> String {
    if per_sec <= 0.01 {
        format!("0 {}/s", unit)
    } else {
        format!("{:.2} {}/s", per_sec, unit)
    }
}

fn format_eta(eta: Option<Duration>) -> String {
    eta.map(format_duration)
        .unwrap_or_else(|| "--:--".to_string())
}

fn compute_eta(total: u64, processed: u64, rate_per_sec: f64) -> Option<Duration> {
    if rate_per_sec <= 0.01 || processed >= total {
        return None;
    }
    let remaining = total.saturating_sub(processed) as f64;
    let secs = (remaining / rate_per_sec).max(0.0);
    Some(Duration::from_secs_f64(secs))
}

fn idle_warning_due(
    now: Instant,
    last_progress: Instant,
    last_idle_warn: Option<Instant>,
    idle_threshold: Duration,
    processed: u64,
    total: u64,
) -> bool {
    // Stages without a count (extract, encode) and finished counts are not idle.
    if total == 0 || processed >= total {
        return false;
    }
    if now.duration_since(last_progress) < idle_threshold {
        return false;
    }
    match last_idle_warn {
        Some(last_warn) => now.duration_since(last_warn) >= idle_threshold,
        None => true,
    }
}
