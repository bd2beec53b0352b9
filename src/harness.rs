//! Isolation conformance harness.
//!
//! Starts a number of callers at once on the same slot or group key, classifies what
//! each got back and checks the winner count against what the strategy promises. A
//! strategy promising exclusivity must produce exactly one winner in every race. A
//! strategy known to be unsafe must be caught producing several winners in at least one
//! race; with a zero race window that is unlikely, so the harness warns about it.

use ahash::AHashSet as HashSet;
use log::{info, warn};
use std::fmt;
use std::sync::{Arc, Barrier};
use std::thread;

use crate::config::HarnessConfig;
use crate::coordinator::ClaimCoordinator;
use crate::errors::{ClaimError, HarnessError, Result};
use crate::isolation::IsolationLevel;
use crate::populator::GroupPopulator;
use crate::seed::Seeder;
use crate::store::ResourceStore;

/// What a strategy promises about concurrent callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// One caller wins, every other gets an ordinary failure. Holds in every race.
    ExactlyOne,
    /// More than one caller can win. Must be observed in at least one race.
    SeveralObserved,
}

/// A way of claiming a slot, as raced by [`ConformanceHarness::verify_claims`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStrategy {
    /// [`ClaimCoordinator::claim_slot`] at the given level.
    Pessimistic(IsolationLevel),
    /// [`ClaimCoordinator::claim_slot_versioned_under`] at the given level.
    Versioned(IsolationLevel),
}

impl ClaimStrategy {
    pub fn expectation(self) -> Expectation {
        match self {
            ClaimStrategy::Pessimistic(level) if !level.validates_writes() => {
                Expectation::SeveralObserved
            }
            _ => Expectation::ExactlyOne,
        }
    }
}

impl fmt::Display for ClaimStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimStrategy::Pessimistic(level) => write!(f, "pessimistic claim at {level}"),
            ClaimStrategy::Versioned(level) => write!(f, "versioned claim at {level}"),
        }
    }
}

/// A way of populating a group, as raced by [`ConformanceHarness::verify_population`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateStrategy {
    /// [`GroupPopulator::populate_group`] at the given level.
    Transactional(IsolationLevel),
    /// [`GroupPopulator::populate_group_unguarded`].
    Unguarded,
}

impl PopulateStrategy {
    pub fn expectation(self) -> Expectation {
        match self {
            PopulateStrategy::Transactional(level) if level.validates_predicates() => {
                Expectation::ExactlyOne
            }
            _ => Expectation::SeveralObserved,
        }
    }
}

impl fmt::Display for PopulateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopulateStrategy::Transactional(level) => write!(f, "populate at {level}"),
            PopulateStrategy::Unguarded => f.write_str("unguarded populate"),
        }
    }
}

/// Outcome counts of one race.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaceReport {
    pub winners: usize,
    pub not_available: usize,
    pub conflicts: usize,
    pub already_exists: usize,
    pub faults: usize,
    /// Rows committed for the contested resource: claims on the slot, or members of
    /// the group key.
    pub committed: usize,
    /// Whether committed members came from more than one caller's proposal.
    pub interleaved: bool,
}

impl RaceReport {
    fn tally<T>(outcomes: &[Result<T>]) -> Self {
        let mut report = RaceReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(_) => report.winners += 1,
                Err(ClaimError::NotAvailable(_)) => report.not_available += 1,
                Err(ClaimError::Conflict(_)) => report.conflicts += 1,
                Err(ClaimError::AlreadyExists(_)) => report.already_exists += 1,
                Err(ClaimError::StoreUnavailable(_)) => report.faults += 1,
            }
        }
        report
    }

    pub fn losers(&self) -> usize {
        self.not_available + self.conflicts + self.already_exists
    }
}

impl fmt::Display for RaceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} winner(s), {} not available, {} conflict(s), {} already existing, {} committed",
            self.winners, self.not_available, self.conflicts, self.already_exists, self.committed
        )
    }
}

/// Result of a passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub strategy: String,
    pub expectation: Expectation,
    /// One report per race actually run.
    pub runs: Vec<RaceReport>,
}

impl Verdict {
    pub fn max_winners(&self) -> usize {
        self.runs.iter().map(|run| run.winners).max().unwrap_or(0)
    }

    pub fn observed_several(&self) -> bool {
        self.max_winners() > 1
    }
}

/// Races concurrent callers against a coordinator or populator.
pub struct ConformanceHarness {
    config: HarnessConfig,
}

impl ConformanceHarness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Races claims on a freshly seeded slot, once per run.
    pub fn verify_claims(
        &self,
        coordinator: &ClaimCoordinator,
        strategy: ClaimStrategy,
    ) -> std::result::Result<Verdict, HarnessError> {
        let expectation = strategy.expectation();
        self.warn_if_unlikely(expectation, coordinator.config().race_window.is_zero(), &strategy);
        let seeder = Seeder::new(Arc::clone(coordinator.store()));

        let mut verdict = Verdict {
            strategy: strategy.to_string(),
            expectation,
            runs: Vec::new(),
        };
        for run in 0..self.config.max_runs {
            let seeded = seeder.seed_single(&format!("{strategy} #{run}"))?;
            let outcomes = self.race(|_| match strategy {
                ClaimStrategy::Pessimistic(level) => {
                    coordinator.claim_slot(seeded.group_id, 0, 0, level)
                }
                ClaimStrategy::Versioned(level) => {
                    coordinator.claim_slot_versioned_under(seeded.versioned_group_id, 0, 0, level)
                }
            });
            check_faults(&outcomes)?;
            check_leaks(coordinator.store().as_ref())?;

            let mut report = RaceReport::tally(&outcomes);
            report.committed = match strategy {
                ClaimStrategy::Pessimistic(_) => coordinator.claims_on(seeded.group_id, 0, 0)?,
                ClaimStrategy::Versioned(_) => {
                    coordinator.versioned_claims_on(seeded.versioned_group_id, 0, 0)?
                }
            }
            .len();
            info!("{strategy}, run {run}: {report}");

            if report.committed != report.winners {
                return Err(violation(
                    &strategy,
                    format!("{} caller(s) won but {} claim(s) were committed", report.winners, report.committed),
                ));
            }
            if expectation == Expectation::ExactlyOne && report.winners != 1 {
                return Err(violation(&strategy, format!("run {run}: {report}")));
            }
            let several = report.winners > 1;
            verdict.runs.push(report);
            if expectation == Expectation::SeveralObserved && several {
                break;
            }
        }

        self.conclude(verdict)
    }

    /// Races populations of a fresh group key, once per run.
    ///
    /// Caller `i` proposes `max(2, i + 1)` members tagged with its index, so the committed
    /// members show whose proposal they came from.
    pub fn verify_population(
        &self,
        populator: &GroupPopulator,
        strategy: PopulateStrategy,
    ) -> std::result::Result<Verdict, HarnessError> {
        let expectation = strategy.expectation();
        self.warn_if_unlikely(expectation, populator.config().race_window.is_zero(), &strategy);

        let mut verdict = Verdict {
            strategy: strategy.to_string(),
            expectation,
            runs: Vec::new(),
        };
        for run in 0..self.config.max_runs {
            let group_key = format!("race-{}", populator.store().next_id());
            let proposals: Vec<Vec<String>> = (0..self.callers())
                .map(|caller| {
                    (0..(caller + 1).max(2))
                        .map(|j| format!("Question {j} - iter: {caller}"))
                        .collect()
                })
                .collect();

            let outcomes = self.race(|caller| match strategy {
                PopulateStrategy::Transactional(level) => {
                    populator.populate_group(&group_key, &proposals[caller], level)
                }
                PopulateStrategy::Unguarded => {
                    populator.populate_group_unguarded(&group_key, &proposals[caller])
                }
            });
            check_faults(&outcomes)?;
            check_leaks(populator.store().as_ref())?;

            let members = populator.members(&group_key)?;
            let owners: HashSet<usize> = members
                .iter()
                .filter_map(|member| {
                    proposals
                        .iter()
                        .position(|proposal| proposal.get(member.ordinal as usize) == Some(&member.text))
                })
                .collect();
            let mut report = RaceReport::tally(&outcomes);
            report.committed = members.len();
            report.interleaved = owners.len() > 1;
            info!("{strategy} of '{group_key}', run {run}: {report}");

            if expectation == Expectation::ExactlyOne {
                let winner = outcomes.iter().position(|outcome| outcome.is_ok());
                let complete = winner.is_some_and(|w| {
                    owners.len() == 1 && owners.contains(&w) && members.len() == proposals[w].len()
                });
                if report.winners != 1 || !complete {
                    return Err(violation(&strategy, format!("run {run}: {report}")));
                }
            }
            let several = report.winners > 1;
            verdict.runs.push(report);
            if expectation == Expectation::SeveralObserved && several {
                break;
            }
        }

        self.conclude(verdict)
    }

    fn callers(&self) -> usize {
        self.config.callers.max(2)
    }

    /// Runs `call` on every caller thread, released together by a barrier.
    fn race<T: Send>(&self, call: impl Fn(usize) -> Result<T> + Sync) -> Vec<Result<T>> {
        let callers = self.callers();
        let barrier = Barrier::new(callers);
        thread::scope(|scope| {
            let handles: Vec<_> = (0..callers)
                .map(|caller| {
                    let barrier = &barrier;
                    let call = &call;
                    scope.spawn(move || {
                        barrier.wait();
                        call(caller)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        })
    }

    fn conclude(&self, verdict: Verdict) -> std::result::Result<Verdict, HarnessError> {
        if verdict.expectation == Expectation::SeveralObserved && !verdict.observed_several() {
            return Err(HarnessError::Violation {
                strategy: verdict.strategy,
                detail: format!("never produced more than one winner in {} run(s)", verdict.runs.len()),
            });
        }
        info!(
            "{} conforms ({:?}) over {} run(s)",
            verdict.strategy,
            verdict.expectation,
            verdict.runs.len()
        );
        Ok(verdict)
    }

    fn warn_if_unlikely(&self, expectation: Expectation, zero_window: bool, strategy: &dyn fmt::Display) {
        if expectation == Expectation::SeveralObserved && zero_window {
            warn!("Verifying {strategy} with a zero race window; several winners may never be observed");
        }
    }
}

fn check_faults<T>(outcomes: &[Result<T>]) -> std::result::Result<(), HarnessError> {
    match outcomes.iter().find_map(|outcome| match outcome {
        Err(err) if !err.is_lost_race() => Some(err.clone()),
        _ => None,
    }) {
        Some(err) => {
            warn!("Race aborted by an infrastructure fault: {err}");
            Err(HarnessError::Fault(err))
        }
        None => Ok(()),
    }
}

fn check_leaks(store: &dyn ResourceStore) -> std::result::Result<(), HarnessError> {
    match store.active_transactions() {
        Some(active) if active > 0 => Err(HarnessError::LeakedTransactions(active)),
        _ => Ok(()),
    }
}

fn violation(strategy: &dyn fmt::Display, detail: String) -> HarnessError {
    HarnessError::Violation {
        strategy: strategy.to_string(),
        detail,
    }
}
