//! Lag Compensation
//!
//! Per-player command queue holding a fresh command and speculative
//! "future requests". When a client misses a round trip, the next
//! speculative command runs in its place. The substitution is remembered so
//! the client's late message does not execute it a second time.

use std::collections::VecDeque;

use crate::network::protocol::{Command, CommandBatch};

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedCommand {
    command: Command,
    speculative: bool,
}

/// A speculative command executed on behalf of a late client.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Substitution {
    tick: u64,
    command: Command,
}

/// Outcome of merging a client batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitReport {
    /// Leading commands dropped because their substitutes already ran
    pub confirmed: usize,
    /// Commands left in the queue
    pub queued: usize,
}

/// Commands waiting to be consumed by pretick, one per tick.
#[derive(Debug, Default)]
pub struct CommandQueue {
    queue: VecDeque<QueuedCommand>,
    substitutions: Vec<Substitution>,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a new batch sent after the client saw `basis_tick`.
    ///
    /// Substitutions made for ticks after the basis are matched in order
    /// against the batch's leading commands; equal ones already ran and are
    /// dropped. The first mismatch stops matching. The rest of the batch
    /// replaces the queue, its front as the fresh command.
    pub fn submit(&mut self, batch: CommandBatch, basis_tick: u64) -> SubmitReport {
        let mut commands: VecDeque<Command> = batch.into_commands().collect();
        let mut confirmed = 0;

        for substitution in self.substitutions.drain(..) {
            if substitution.tick <= basis_tick {
                continue;
            }
            if commands.front() == Some(&substitution.command) {
                commands.pop_front();
                confirmed += 1;
            } else {
                break;
            }
        }

        self.queue = commands
            .into_iter()
            .enumerate()
            .map(|(i, command)| QueuedCommand {
                command,
                speculative: i > 0,
            })
            .collect();

        SubmitReport {
            confirmed,
            queued: self.queue.len(),
        }
    }

    /// Take the command for the step producing `tick`.
    ///
    /// `None` means the queue is empty. A speculative command is logged as a
    /// substitution.
    pub fn pop(&mut self, tick: u64) -> Option<Command> {
        let entry = self.queue.pop_front()?;
        if entry.speculative {
            self.substitutions.push(Substitution {
                tick,
                command: entry.command.clone(),
            });
        }
        Some(entry.command)
    }

    /// Is the client's latest fresh command still waiting?
    pub fn has_fresh(&self) -> bool {
        self.queue.front().is_some_and(|entry| !entry.speculative)
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Substitutions not yet reconciled.
    pub fn pending_substitutions(&self) -> usize {
        self.substitutions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::request::RequestKind;

    fn rotate(direction: i64) -> Command {
        Some(RequestKind::Rotate { direction })
    }

    #[test]
    fn test_fresh_command_consumed_once() {
        let mut queue = CommandQueue::new();
        queue.submit(CommandBatch::single(Some(RequestKind::Move)), 0);
        assert!(queue.has_fresh());

        assert_eq!(queue.pop(1), Some(Some(RequestKind::Move)));
        assert!(!queue.has_fresh());
        assert_eq!(queue.pop(2), None);
        assert_eq!(queue.pending_substitutions(), 0);
    }

    #[test]
    fn test_missed_round_trip_uses_future_once() {
        let mut queue = CommandQueue::new();
        // Client saw tick 10 and plans rotate(1) for 11, rotate(2) for 12.
        queue.submit(CommandBatch::with_future(rotate(1), vec![rotate(2)]), 10);

        assert_eq!(queue.pop(11), Some(rotate(1)));
        // The answer for tick 12 is late; the future request fills in.
        assert_eq!(queue.pop(12), Some(rotate(2)));
        assert_eq!(queue.pending_substitutions(), 1);

        // The late message was computed after seeing tick 11 and repeats the plan.
        let report = queue.submit(CommandBatch::with_future(rotate(2), vec![rotate(3)]), 11);
        assert_eq!(report, SubmitReport { confirmed: 1, queued: 1 });
        assert!(queue.has_fresh());
        assert_eq!(queue.pop(13), Some(rotate(3)));
        assert_eq!(queue.pop(14), None);
    }

    #[test]
    fn test_changed_plan_is_not_dropped() {
        let mut queue = CommandQueue::new();
        queue.submit(CommandBatch::with_future(rotate(1), vec![rotate(2)]), 10);
        queue.pop(11);
        queue.pop(12);

        // Client changed its mind for tick 12; its command runs next instead.
        let report = queue.submit(CommandBatch::single(Some(RequestKind::Shoot)), 11);
        assert_eq!(report.confirmed, 0);
        assert_eq!(queue.pop(13), Some(Some(RequestKind::Shoot)));
    }

    #[test]
    fn test_matching_stops_at_first_mismatch() {
        let mut queue = CommandQueue::new();
        queue.submit(
            CommandBatch::with_future(rotate(0), vec![rotate(1), rotate(2), rotate(3)]),
            0,
        );
        for tick in 1..=4 {
            queue.pop(tick);
        }
        assert_eq!(queue.pending_substitutions(), 3);

        // Plan for 2 matches, plan for 3 differs, so 4 is not compared.
        let report = queue.submit(
            CommandBatch::with_future(rotate(1), vec![None, rotate(3)]),
            1,
        );
        assert_eq!(report.confirmed, 1);
        assert_eq!(queue.pop(5), Some(None));
        assert_eq!(queue.pop(6), Some(rotate(3)));
        assert_eq!(queue.pending_substitutions(), 1);
    }

    #[test]
    fn test_substitutions_seen_by_client_are_ignored() {
        let mut queue = CommandQueue::new();
        queue.submit(CommandBatch::with_future(None, vec![rotate(1)]), 0);
        queue.pop(1);
        queue.pop(2);

        // Client already saw tick 2, so its head is meant for tick 3.
        let report = queue.submit(CommandBatch::single(rotate(1)), 2);
        assert_eq!(report.confirmed, 0);
        assert_eq!(queue.pop(3), Some(rotate(1)));
    }

    #[test]
    fn test_idle_commands_participate() {
        let mut queue = CommandQueue::new();
        queue.submit(CommandBatch::with_future(None, vec![None]), 0);
        queue.pop(1);
        queue.pop(2);
        let report = queue.submit(CommandBatch::with_future(None, vec![rotate(2)]), 1);
        assert_eq!(report.confirmed, 1);
        assert_eq!(queue.pop(3), Some(rotate(2)));
    }
}
