//! Token-level model of the three instruction queues.
//!
//! Each cycle every queue may issue its head instruction once all channels
//! it pops hold a token. Pushes become visible on the following cycle.
//! Nothing else about execution is modelled.

use std::collections::VecDeque;

use crate::deps::RoutedInstruction;
use crate::error::BuildError;
use crate::queue::{Channel, Unit};

/// Result of running a program against a cycle budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleOutcome {
    /// FINISH issued.
    Completed {
        /// Cycles elapsed, including the FINISH cycle.
        cycles: u64,
    },
    /// No queue can make progress and FINISH has not issued.
    Stalled {
        /// Cycles elapsed before the stall.
        cycles: u64,
        /// Lowest program index among blocked queue heads, `None` if every
        /// queue drained.
        blocked: Option<usize>,
    },
    /// The budget ran out while queues were still progressing.
    BudgetExhausted {
        /// Cycles elapsed.
        cycles: u64,
    },
}

/// Issues routed instructions queue by queue under the token protocol.
#[derive(Debug, Clone)]
pub struct TokenScheduler {
    queues: [VecDeque<RoutedInstruction>; 3],
    tokens: [u64; 4],
    cycles: u64,
    finished: bool,
}

impl TokenScheduler {
    /// Distributes `routed` over the queues, keeping program order per queue.
    #[must_use]
    pub fn new(routed: &[RoutedInstruction]) -> Self {
        let mut queues: [VecDeque<RoutedInstruction>; 3] = Default::default();
        for insn in routed {
            queues[insn.unit.index()].push_back(*insn);
        }
        Self {
            queues,
            tokens: [0; 4],
            cycles: 0,
            finished: false,
        }
    }

    /// Cycles executed so far.
    #[must_use]
    pub const fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Tokens currently waiting on `channel`.
    #[must_use]
    pub const fn tokens(&self, channel: Channel) -> u64 {
        self.tokens[channel.index()]
    }

    /// Returns true once every queue is empty.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    /// Head of the queue with the lowest program index, if any.
    #[must_use]
    pub fn first_blocked(&self) -> Option<&RoutedInstruction> {
        self.queues
            .iter()
            .filter_map(VecDeque::front)
            .min_by_key(|insn| insn.index)
    }

    /// Advances one cycle and returns the program indices issued.
    pub fn step(&mut self) -> Vec<usize> {
        let ready: Vec<Unit> = Unit::ALL
            .into_iter()
            .filter(|unit| {
                self.queues[unit.index()].front().is_some_and(|head| {
                    head.handshake
                        .pops()
                        .all(|channel| self.tokens[channel.index()] > 0)
                })
            })
            .collect();

        let mut issued = Vec::with_capacity(ready.len());
        let mut pushed = Vec::new();
        for unit in ready {
            let Some(head) = self.queues[unit.index()].pop_front() else {
                continue;
            };
            for channel in head.handshake.pops() {
                self.tokens[channel.index()] -= 1;
            }
            pushed.extend(head.handshake.pushes());
            self.finished |= head.is_finish;
            issued.push(head.index);
        }
        for channel in pushed {
            self.tokens[channel.index()] += 1;
        }
        self.cycles += 1;
        issued
    }

    /// Runs until every queue drains.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Deadlock`] naming the lowest-index blocked head
    /// when no queue can issue.
    pub fn drain(&mut self) -> Result<u64, BuildError> {
        while !self.is_drained() {
            if self.step().is_empty() {
                return Err(self.first_blocked().map_or(BuildError::MissingFinish, |head| {
                    BuildError::Deadlock {
                        index: head.index,
                        unit: head.unit,
                    }
                }));
            }
        }
        Ok(self.cycles)
    }

    /// Runs until FINISH issues, the queues stall, or `budget` cycles pass.
    pub fn run_until_finish(&mut self, budget: u64) -> ScheduleOutcome {
        while !self.finished {
            if self.cycles >= budget {
                return ScheduleOutcome::BudgetExhausted {
                    cycles: self.cycles,
                };
            }
            if self.step().is_empty() {
                return ScheduleOutcome::Stalled {
                    cycles: self.cycles,
                    blocked: self.first_blocked().map(|head| head.index),
                };
            }
        }
        ScheduleOutcome::Completed {
            cycles: self.cycles,
        }
    }
}
