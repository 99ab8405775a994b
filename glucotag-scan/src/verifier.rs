//! Repeated-read consistency verification
//!
//! A single read of the sensor is noisy. The verifier repeats full read
//! passes within a time and attempt budget, clusters the decoded raw values
//! and only publishes a glucose value once enough passes agree.
//!
//! State progression per run:
//! ```text
//! Idle -> Attempting <-> Clustering -> Succeeded
//!                                   -> FailedNoQuorum
//!                                   -> FailedNoData
//! ```
//!
//! Clustering compares the unmasked `raw16` sample. A reading joins the
//! nearest existing cluster whose representative is within the tolerance
//! (earliest cluster on a tie); otherwise it starts a new one. The first
//! cluster to reach the quorum wins and stops the loop.

use crate::calibration::Calibration;
use crate::decoder::{self, RawBlockSet, DiscardReason, MIN_BLOCKS};
use crate::error::Error;
use crate::tag::{read_blocks_into, TagHandle};
use glucotag_common::events::VerificationOutcome;
use glucotag_common::reading::keys;
use glucotag_common::time::format_secs;
use glucotag_common::DecodedReading;
use std::cmp::Reverse;
use std::time::Duration;
use tokio::time::Instant;

/// Log at debug when verbose logging is on, trace otherwise
macro_rules! verbose_log {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

/// Verification parameters
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierConfig {
    /// Wall-clock budget for the whole loop
    pub time_budget: Duration,
    pub max_attempts: u32,
    /// Matching reads needed to accept a value
    pub required_consistent_reads: u32,
    /// Largest raw16 distance that still counts as a match
    pub cluster_tolerance: u16,
    /// Blocks read per pass
    pub block_count: usize,
    /// Bound for the diagnostic pass after an empty run
    pub fallback_read_timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            time_budget: Duration::from_secs(10),
            max_attempts: 8,
            required_consistent_reads: 3,
            cluster_tolerance: 2,
            block_count: MIN_BLOCKS,
            fallback_read_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierState {
    Idle,
    Attempting,
    Clustering,
    Succeeded,
    FailedNoQuorum,
    FailedNoData,
}

/// Why the attempt loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Quorum,
    TimeBudget,
    AttemptBudget,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Quorum => "quorum",
            StopReason::TimeBudget => "timeBudget",
            StopReason::AttemptBudget => "attemptBudget",
        }
    }
}

/// Readings whose raw16 values agree within tolerance
///
/// Everything except `count` describes the first member.
#[derive(Debug, Clone)]
pub struct CandidateCluster {
    pub representative: u16,
    pub count: u32,
    pub reading: DecodedReading,
    pub blocks: RawBlockSet,
    pub attempt_duration: Duration,
    pub attempt: u32,
}

/// Outcome of one verification run
///
/// `reading` is always present so the caller can persist an audit entry;
/// its glucose is `None` unless the outcome is `Succeeded`.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub outcome: VerificationOutcome,
    pub stop_reason: StopReason,
    pub reading: DecodedReading,
    /// Blocks that produced `reading`
    pub blocks: RawBlockSet,
    pub attempts: u32,
    pub failed_passes: u32,
    pub clusters: Vec<CandidateCluster>,
}

impl VerificationResult {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }

    /// Error for a failed run, `None` on success
    pub fn error(&self) -> Option<Error> {
        match (self.outcome, self.stop_reason) {
            (VerificationOutcome::Succeeded, _) => None,
            (VerificationOutcome::FailedNoData, _) => Some(Error::NoDataAcquired),
            (VerificationOutcome::FailedNoQuorum, StopReason::TimeBudget) => {
                Some(Error::VerificationTimeout { attempts: self.attempts })
            }
            (VerificationOutcome::FailedNoQuorum, _) => {
                Some(Error::VerificationNoQuorum { attempts: self.attempts })
            }
        }
    }
}

/// Drives read passes against a connected tag
pub struct Verifier {
    config: VerifierConfig,
    verbose: bool,
}

/// Mutable state of a single run
struct Run {
    state: VerifierState,
    attempts: u32,
    failed_passes: u32,
    any_blocks: bool,
    clusters: Vec<CandidateCluster>,
    winner: Option<usize>,
}

impl Run {
    fn transition(&mut self, next: VerifierState, verbose: bool) {
        if self.state != next {
            verbose_log!(verbose, "[Verify] {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self {
            config,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Run the attempt loop and resolve the final reading
    pub async fn run<T: TagHandle>(&self, tag: &mut T, calibration: &Calibration) -> VerificationResult {
        let cfg = &self.config;
        let overall_start = Instant::now();
        let mut run = Run {
            state: VerifierState::Idle,
            attempts: 0,
            failed_passes: 0,
            any_blocks: false,
            clusters: Vec::new(),
            winner: None,
        };

        while overall_start.elapsed() < cfg.time_budget
            && run.attempts < cfg.max_attempts
            && run.winner.is_none()
        {
            run.attempts += 1;
            run.transition(VerifierState::Attempting, self.verbose);
            let attempt = run.attempts;
            let attempt_start = Instant::now();
            let remaining = cfg.time_budget.saturating_sub(overall_start.elapsed());

            let (blocks, failure) = self.pass(tag, remaining).await;
            run.any_blocks |= !blocks.is_empty();
            let attempt_duration = attempt_start.elapsed();

            if let Some(e) = failure {
                run.failed_passes += 1;
                verbose_log!(self.verbose, "[Verify] Attempt #{} failed early: {}", attempt, e);
                continue;
            }
            verbose_log!(
                self.verbose,
                "[Verify] Attempt #{} completed in {}s",
                attempt,
                format_secs(attempt_duration, 2)
            );

            run.transition(VerifierState::Clustering, self.verbose);
            let reading = decoder::decode(&blocks, calibration);
            match (reading.raw16(), reading.glucose) {
                (Some(raw16), Some(_)) => {
                    self.cluster(&mut run, raw16, reading, blocks, attempt_duration, attempt);
                }
                _ => {
                    verbose_log!(
                        self.verbose,
                        "[Verify] Attempt #{} no plausible reading (discardReason={})",
                        attempt,
                        reading.discard_reason().unwrap_or("none")
                    );
                }
            }
        }

        let stop_reason = if run.winner.is_some() {
            StopReason::Quorum
        } else if overall_start.elapsed() >= cfg.time_budget {
            StopReason::TimeBudget
        } else {
            StopReason::AttemptBudget
        };

        let (outcome, reading, blocks, final_duration) = self.resolve(&mut run, tag, calibration).await;
        run.transition(
            match outcome {
                VerificationOutcome::Succeeded => VerifierState::Succeeded,
                VerificationOutcome::FailedNoQuorum => VerifierState::FailedNoQuorum,
                VerificationOutcome::FailedNoData => VerifierState::FailedNoData,
            },
            self.verbose,
        );

        let reading = self.annotate(
            reading,
            &run,
            outcome,
            stop_reason,
            overall_start.elapsed(),
            final_duration,
        );

        VerificationResult {
            outcome,
            stop_reason,
            reading,
            blocks,
            attempts: run.attempts,
            failed_passes: run.failed_passes,
            clusters: run.clusters,
        }
    }

    /// One pass bounded by `limit`; an overrun counts as a failed pass
    async fn pass<T: TagHandle>(&self, tag: &mut T, limit: Duration) -> (RawBlockSet, Option<Error>) {
        let mut blocks = RawBlockSet::with_capacity(self.config.block_count);
        let read = read_blocks_into(tag, self.config.block_count, &mut blocks, self.verbose);
        let outcome = tokio::time::timeout(limit, read).await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(Error::BlockReadFailure {
                index: u8::try_from(blocks.len()).unwrap_or(u8::MAX),
                reason: format!("pass exceeded {}s", format_secs(limit, 2)),
            }),
        };
        (blocks, failure)
    }

    fn cluster(
        &self,
        run: &mut Run,
        raw16: u16,
        reading: DecodedReading,
        blocks: RawBlockSet,
        attempt_duration: Duration,
        attempt: u32,
    ) {
        let tolerance = self.config.cluster_tolerance;
        let nearest = run
            .clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.representative.abs_diff(raw16)))
            .filter(|(_, distance)| *distance <= tolerance)
            .min_by_key(|(_, distance)| *distance)
            .map(|(i, _)| i);

        match nearest {
            Some(i) => {
                let cluster = &mut run.clusters[i];
                cluster.count += 1;
                verbose_log!(
                    self.verbose,
                    "[Verify] Attempt #{} raw16={} -> cluster rep={} count={}",
                    attempt,
                    raw16,
                    cluster.representative,
                    cluster.count
                );
                if cluster.count >= self.config.required_consistent_reads {
                    verbose_log!(
                        self.verbose,
                        "[Verify] Consistency achieved (rep={}, count={}) after {} attempts",
                        cluster.representative,
                        cluster.count,
                        attempt
                    );
                    run.winner = Some(i);
                }
            }
            None => {
                verbose_log!(
                    self.verbose,
                    "[Verify] Attempt #{} raw16={} started new cluster",
                    attempt,
                    raw16
                );
                run.clusters.push(CandidateCluster {
                    representative: raw16,
                    count: 1,
                    reading,
                    blocks,
                    attempt_duration,
                    attempt,
                });
                // A quorum of one accepts the first plausible read
                if self.config.required_consistent_reads <= 1 {
                    run.winner = Some(run.clusters.len() - 1);
                }
            }
        }
    }

    /// Pick the kept reading: the winner, else the largest cluster, else a
    /// single fallback pass for diagnostics
    async fn resolve<T: TagHandle>(
        &self,
        run: &mut Run,
        tag: &mut T,
        calibration: &Calibration,
    ) -> (VerificationOutcome, DecodedReading, RawBlockSet, Duration) {
        if let Some(cluster) = run.winner.and_then(|i| run.clusters.get(i)) {
            return (
                VerificationOutcome::Succeeded,
                cluster.reading.clone(),
                cluster.blocks.clone(),
                cluster.attempt_duration,
            );
        }

        // min_by_key on Reverse keeps the earliest of equal counts
        if let Some(best) = run.clusters.iter().min_by_key(|c| Reverse(c.count)) {
            verbose_log!(
                self.verbose,
                "[Verify] Majority cluster rep={} count={} (< required {})",
                best.representative,
                best.count,
                self.config.required_consistent_reads
            );
            return (
                VerificationOutcome::FailedNoQuorum,
                best.reading.clone(),
                best.blocks.clone(),
                best.attempt_duration,
            );
        }

        verbose_log!(self.verbose, "[Verify] No clusters formed; performing fallback attempt");
        let fallback_start = Instant::now();
        let (blocks, failure) = self.pass(tag, self.config.fallback_read_timeout).await;
        if let Some(e) = failure {
            verbose_log!(self.verbose, "[Verify] Fallback attempt failed: {}", e);
        }
        run.any_blocks |= !blocks.is_empty();
        let reading = decoder::decode(&blocks, calibration);
        let outcome = if run.any_blocks {
            VerificationOutcome::FailedNoQuorum
        } else {
            VerificationOutcome::FailedNoData
        };
        (outcome, reading, blocks, fallback_start.elapsed())
    }

    /// Merge the verification summary into the kept reading
    fn annotate(
        &self,
        mut reading: DecodedReading,
        run: &Run,
        outcome: VerificationOutcome,
        stop_reason: StopReason,
        overall: Duration,
        final_attempt: Duration,
    ) -> DecodedReading {
        let cfg = &self.config;
        let diag = &mut reading.diagnostics;
        diag.insert(keys::VERIFICATION_ATTEMPTS, run.attempts);
        diag.insert(keys::VERIFICATION_MAX_ATTEMPTS, cfg.max_attempts);
        diag.insert(keys::VERIFICATION_WINDOW_SECONDS, format_secs(cfg.time_budget, 1));
        diag.insert(keys::VERIFICATION_REQUIRED, cfg.required_consistent_reads);
        diag.insert(keys::VERIFICATION_TOLERANCE, cfg.cluster_tolerance);
        diag.insert(keys::OVERALL_VERIFICATION_DURATION, format_secs(overall, 2));
        diag.insert(keys::FINAL_ATTEMPT_DURATION, format_secs(final_attempt, 2));
        diag.insert(keys::VERIFICATION_OUTCOME, outcome);
        diag.insert(keys::VERIFICATION_STOP_REASON, stop_reason.as_str());
        diag.insert(keys::VERIFICATION_FAILED_PASSES, run.failed_passes);

        if !run.clusters.is_empty() {
            let mut ordered: Vec<&CandidateCluster> = run.clusters.iter().collect();
            ordered.sort_by_key(|c| c.representative);
            let summary: Vec<String> = ordered
                .iter()
                .map(|c| format!("{}:{}", c.representative, c.count))
                .collect();
            diag.insert(keys::VERIFICATION_CLUSTERS, summary.join(","));
        }

        let best = run
            .winner
            .and_then(|i| run.clusters.get(i))
            .or_else(|| run.clusters.iter().min_by_key(|c| Reverse(c.count)));
        if let Some(best) = best {
            diag.insert(keys::VERIFICATION_BEST_CLUSTER_REP, best.representative);
            diag.insert(keys::VERIFICATION_BEST_CLUSTER_COUNT, best.count);
        }

        match (outcome, reading.glucose) {
            (VerificationOutcome::Succeeded, Some(glucose)) => {
                diag.insert(keys::VERIFICATION_SUCCEEDED, true);
                if let Some(best) = best {
                    diag.insert(keys::VERIFICATION_FINAL_REP, best.representative);
                }
                diag.insert(keys::GLUCOSE_MGDL, format!("{:.1}", glucose));
            }
            _ => {
                diag.insert(keys::VERIFICATION_SUCCEEDED, false);
                diag.insert_if_absent(
                    keys::DISCARD_REASON,
                    DiscardReason::VerificationInsufficientMatches,
                );
                diag.insert(keys::GLUCOSE_DISCARDED, true);
                diag.remove(keys::GLUCOSE_MGDL);
                reading.glucose = None;
                verbose_log!(self.verbose, "[Verify] Verification failed; glucose discarded");
            }
        }

        reading
    }
}
