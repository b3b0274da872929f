//! Two-seat commit/reveal exchange shared by the turn-based engines.
//!
//! The commit phase closes when both seats have committed or when its deadline
//! passes. The reveal window opens at that point. An exchange is settled once
//! every seat that committed has revealed, or the reveal window has expired.

use super::{commitment_hash, ActionOutcome};
use serde_json::json;

#[derive(Clone, Debug)]
pub(crate) struct Reveal<T> {
    pub value: T,
    pub at_ms: i64,
}

#[derive(Clone, Debug)]
pub(crate) struct Exchange<T> {
    commits: [Option<String>; 2],
    reveals: [Option<Reveal<T>>; 2],
    opened_at: i64,
    commit_deadline: i64,
    reveal_window_ms: i64,
    /// Set once the commit phase is over.
    reveal_deadline: Option<i64>,
}

fn is_commitment(hash: &str) -> bool {
    hash.strip_prefix("0x")
        .is_some_and(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
}

impl<T> Exchange<T> {
    pub fn open(now: i64, commit_window_ms: i64, reveal_window_ms: i64) -> Self {
        Self {
            commits: [None, None],
            reveals: [None, None],
            opened_at: now,
            commit_deadline: now + commit_window_ms,
            reveal_window_ms,
            reveal_deadline: None,
        }
    }

    pub fn commit(&mut self, seat: usize, hash: &str, now: i64) -> ActionOutcome {
        self.close_commits(now);
        if self.reveal_deadline.is_some() {
            return ActionOutcome::rejected("commit phase is over");
        }
        if now > self.commit_deadline {
            return ActionOutcome::rejected("commit window closed");
        }
        if self.commits[seat].is_some() {
            return ActionOutcome::rejected("already committed");
        }
        if !is_commitment(hash) {
            return ActionOutcome::rejected("malformed commitment hash");
        }
        self.commits[seat] = Some(hash.to_ascii_lowercase());
        if self.commits.iter().all(Option::is_some) {
            self.reveal_deadline = Some(now + self.reveal_window_ms);
        }
        ActionOutcome::Accepted
    }

    pub fn reveal(&mut self, seat: usize, value: T, payload: &str, salt: &str, now: i64) -> ActionOutcome {
        self.close_commits(now);
        let Some(deadline) = self.reveal_deadline else {
            return ActionOutcome::rejected("reveal phase has not started");
        };
        if now > deadline {
            return ActionOutcome::rejected("reveal window closed");
        }
        let Some(commit) = self.commits[seat].as_deref() else {
            return ActionOutcome::rejected("nothing committed to reveal");
        };
        if self.reveals[seat].is_some() {
            return ActionOutcome::rejected("already revealed");
        }
        if !commitment_hash(payload, salt).eq_ignore_ascii_case(commit) {
            return ActionOutcome::rejected("reveal does not match commitment");
        }
        self.reveals[seat] = Some(Reveal { value, at_ms: now });
        ActionOutcome::Accepted
    }

    /// An expired commit phase with at least one commitment moves to reveal.
    fn close_commits(&mut self, now: i64) {
        if self.reveal_deadline.is_none()
            && now > self.commit_deadline
            && self.commits.iter().any(Option::is_some)
        {
            self.reveal_deadline = Some(self.commit_deadline + self.reveal_window_ms);
        }
    }

    pub fn is_settled(&mut self, now: i64) -> bool {
        self.close_commits(now);
        match self.reveal_deadline {
            Some(deadline) => {
                now > deadline
                    || (0..2).all(|s| self.commits[s].is_none() || self.reveals[s].is_some())
            }
            None => now > self.commit_deadline,
        }
    }

    pub fn revealed(&self, seat: usize) -> Option<&Reveal<T>> {
        self.reveals[seat].as_ref()
    }

    pub fn committed(&self, seat: usize) -> bool {
        self.commits[seat].is_some()
    }

    pub fn reveal_window_ms(&self) -> i64 {
        self.reveal_window_ms
    }

    pub fn reveal_deadline(&self) -> Option<i64> {
        self.reveal_deadline
    }

    /// Who has committed and revealed, never what.
    pub fn view(&self) -> serde_json::Value {
        json!({
            "phase": if self.reveal_deadline.is_some() { "reveal" } else { "commit" },
            "opened_at_ms": self.opened_at,
            "committed": [self.committed(0), self.committed(1)],
            "revealed": [self.reveals[0].is_some(), self.reveals[1].is_some()],
            "commit_deadline_ms": self.commit_deadline,
            "reveal_deadline_ms": self.reveal_deadline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> Exchange<u32> {
        Exchange::open(0, 1_000, 500)
    }

    #[test]
    fn full_exchange_settles_when_both_reveal() {
        let mut ex = exchange();
        assert!(ex.commit(0, &commitment_hash("7", "a"), 10).is_accepted());
        assert!(!ex.is_settled(20));
        assert!(ex.commit(1, &commitment_hash("9", "b"), 30).is_accepted());
        assert_eq!(ex.reveal_deadline(), Some(530));
        assert!(ex.reveal(0, 7, "7", "a", 40).is_accepted());
        assert!(!ex.is_settled(41));
        assert!(ex.reveal(1, 9, "9", "b", 50).is_accepted());
        assert!(ex.is_settled(51));
        assert_eq!(ex.revealed(1).map(|r| r.value), Some(9));
    }

    #[test]
    fn rejects_double_commit_and_double_reveal() {
        let mut ex = exchange();
        let h = commitment_hash("1", "s");
        assert!(ex.commit(0, &h, 1).is_accepted());
        assert!(!ex.commit(0, &h, 2).is_accepted());
        assert!(ex.commit(1, &commitment_hash("2", "t"), 3).is_accepted());
        assert!(ex.reveal(0, 1, "1", "s", 4).is_accepted());
        assert_eq!(
            ex.reveal(0, 1, "1", "s", 5),
            ActionOutcome::rejected("already revealed")
        );
    }

    #[test]
    fn rejects_mismatched_reveal_without_recording_it() {
        let mut ex = exchange();
        ex.commit(0, &commitment_hash("1", "s"), 1);
        ex.commit(1, &commitment_hash("2", "t"), 2);
        assert!(!ex.reveal(0, 5, "5", "s", 3).is_accepted());
        assert!(ex.revealed(0).is_none());
        assert!(ex.reveal(0, 1, "1", "s", 4).is_accepted());
    }

    #[test]
    fn reveal_before_both_commit_is_rejected() {
        let mut ex = exchange();
        ex.commit(0, &commitment_hash("1", "s"), 1);
        assert_eq!(
            ex.reveal(0, 1, "1", "s", 2),
            ActionOutcome::rejected("reveal phase has not started")
        );
    }

    #[test]
    fn late_commit_opens_reveal_for_the_lone_committer() {
        let mut ex = exchange();
        ex.commit(0, &commitment_hash("1", "s"), 100);
        assert_eq!(
            ex.commit(1, &commitment_hash("2", "t"), 1_001),
            ActionOutcome::rejected("commit phase is over")
        );
        assert_eq!(ex.reveal_deadline(), Some(1_500));
        assert!(ex.reveal(0, 1, "1", "s", 1_200).is_accepted());
        assert!(ex.is_settled(1_201));
    }

    #[test]
    fn expiry_settles_with_no_commits() {
        let mut ex = exchange();
        assert!(!ex.is_settled(1_000));
        assert!(ex.is_settled(1_001));
        assert!(ex.revealed(0).is_none() && ex.revealed(1).is_none());
    }

    #[test]
    fn reveal_after_window_is_rejected() {
        let mut ex = exchange();
        ex.commit(0, &commitment_hash("1", "s"), 1);
        ex.commit(1, &commitment_hash("2", "t"), 2);
        assert_eq!(
            ex.reveal(0, 1, "1", "s", 503),
            ActionOutcome::rejected("reveal window closed")
        );
        assert!(ex.is_settled(503));
    }

    #[test]
    fn malformed_hash_rejected() {
        let mut ex = exchange();
        assert!(!ex.commit(0, "cooperate", 1).is_accepted());
        assert!(!ex.commit(0, "0xabc", 1).is_accepted());
        assert!(!ex.committed(0));
    }
}
