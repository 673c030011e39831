//! In-process participant group.
//!
//! [`ThreadGroup`] runs each participant on its own OS thread. Participants
//! share no matrix memory: every collective copies data through per-rank
//! mailboxes, and each collective is two barrier phases (post, then consume)
//! so that no call returns on one participant before the whole group has
//! completed it. A broadcast adds a third phase in which the root releases
//! its slot. Every mailbox is drained by its reader, also when the reader's
//! own checks fail, so no block outlives the collective that posted it.
//!
//! A participant that never reaches a collective (panic, infinite loop)
//! leaves the others blocked on the barrier. That matches the semantics of
//! a real distributed group and is not guarded against here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Barrier, Mutex, MutexGuard};

use crate::comm::{BlockLayout, CommError, Communicator};

struct Shared {
    size: usize,
    barrier: Barrier,
    mailboxes: Vec<Mutex<Vec<f64>>>,
    votes: Vec<AtomicBool>,
}

impl Shared {
    fn new(size: usize) -> Self {
        Self {
            size,
            barrier: Barrier::new(size),
            mailboxes: (0..size).map(|_| Mutex::new(Vec::new())).collect(),
            votes: (0..size).map(|_| AtomicBool::new(true)).collect(),
        }
    }
}

/// Launches a group of in-process participants.
pub struct ThreadGroup;

impl ThreadGroup {
    /// Run `participant` once per rank on `size` scoped threads.
    ///
    /// Returns the per-rank results in rank order.
    pub fn run<F, R>(size: usize, participant: F) -> Result<Vec<R>, CommError>
    where
        F: Fn(LocalComm<'_>) -> R + Sync,
        R: Send,
    {
        if size == 0 {
            return Err(CommError::EmptyGroup);
        }
        let shared = Shared::new(size);
        log::debug!("Launching thread group of {} participants", size);

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(size);
            for rank in 0..size {
                let comm = LocalComm {
                    rank,
                    shared: &shared,
                };
                let participant = &participant;
                let handle = std::thread::Builder::new()
                    .name(format!("strata-rank-{rank}"))
                    .spawn_scoped(scope, move || participant(comm))
                    .map_err(|e| CommError::Unavailable(format!("spawning rank {rank}: {e}")))?;
                handles.push(handle);
            }

            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .map_err(|_| CommError::ParticipantPanicked(rank))
                })
                .collect()
        })
    }
}

/// One participant's endpoint into a [`ThreadGroup`].
pub struct LocalComm<'g> {
    rank: usize,
    shared: &'g Shared,
}

impl LocalComm<'_> {
    fn wait(&self) {
        self.shared.barrier.wait();
    }

    fn mailbox(&self, rank: usize) -> Result<MutexGuard<'_, Vec<f64>>, CommError> {
        self.shared.mailboxes[rank]
            .lock()
            .map_err(|_| CommError::Poisoned)
    }

    fn check_root(&self, root: usize) -> Result<(), CommError> {
        if root >= self.shared.size {
            return Err(CommError::InvalidRoot {
                root,
                size: self.shared.size,
            });
        }
        Ok(())
    }

    /// Second half of a two-phase collective: the caller has already posted
    /// (with outcome `posted`); wait, consume, wait.
    ///
    /// Both barriers are always crossed so that a local failure never
    /// strands the rest of the group.
    fn exchange<T>(
        &self,
        posted: Result<(), CommError>,
        consume: impl FnOnce() -> Result<T, CommError>,
    ) -> Result<T, CommError> {
        self.wait();
        let consumed = posted.and_then(|()| consume());
        self.wait();
        consumed
    }
}

impl Communicator for LocalComm<'_> {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.wait();
        Ok(())
    }

    fn all_agree(&self, ok: bool) -> Result<bool, CommError> {
        self.shared.votes[self.rank].store(ok, Ordering::SeqCst);
        self.exchange(Ok(()), || {
            Ok(self
                .shared
                .votes
                .iter()
                .all(|vote| vote.load(Ordering::SeqCst)))
        })
    }

    fn broadcast(&self, root: usize, buf: &mut [f64]) -> Result<(), CommError> {
        self.check_root(root)?;
        let is_root = self.rank == root;
        log::trace!("[rank {}] broadcast of {} elements", self.rank, buf.len());

        let posted = if is_root {
            self.mailbox(root).map(|mut slot| *slot = buf.to_vec())
        } else {
            Ok(())
        };
        self.wait();
        let received = posted.and_then(|()| {
            if !is_root {
                let source = self.mailbox(root)?;
                if source.len() != buf.len() {
                    return Err(CommError::CountMismatch {
                        rank: self.rank,
                        expected: source.len(),
                        actual: buf.len(),
                    });
                }
                buf.copy_from_slice(&source);
            }
            Ok(())
        });
        self.wait();

        // The root's slot doubles as a member mailbox in the next
        // collective, so it is released before anyone leaves this one.
        let released = if is_root {
            self.mailbox(root).map(|mut slot| *slot = Vec::new())
        } else {
            Ok(())
        };
        self.wait();
        received.and(released)
    }

    fn scatter_root(&self, send: &[f64], layout: &BlockLayout) -> Result<(), CommError> {
        log::trace!("[rank {}] scatter of {} elements", self.rank, layout.total());
        let posted = layout
            .check(self.shared.size, Some(send.len()))
            .and_then(|()| {
                for rank in (0..self.shared.size).filter(|&r| r != self.rank) {
                    *self.mailbox(rank)? = send[layout.range(rank)].to_vec();
                }
                Ok(())
            });
        self.exchange(posted, || Ok(()))
    }

    fn scatter_member(
        &self,
        root: usize,
        recv: &mut [f64],
        layout: &BlockLayout,
    ) -> Result<(), CommError> {
        let checked = self
            .check_root(root)
            .and_then(|()| layout.check(self.shared.size, None))
            .and_then(|()| layout.check_local(self.rank, recv.len()));

        self.exchange(Ok(()), || {
            // Drain first: a block left behind would be read back as this
            // rank's contribution by the next gather.
            let block = std::mem::take(&mut *self.mailbox(self.rank)?);
            checked?;
            if block.len() != recv.len() {
                return Err(CommError::CountMismatch {
                    rank: self.rank,
                    expected: recv.len(),
                    actual: block.len(),
                });
            }
            recv.copy_from_slice(&block);
            Ok(())
        })
    }

    fn gather_root(&self, recv: &mut [f64], layout: &BlockLayout) -> Result<(), CommError> {
        let checked = layout.check(self.shared.size, Some(recv.len()));
        log::trace!("[rank {}] gather of {} elements", self.rank, layout.total());

        self.exchange(Ok(()), || {
            let mut blocks = Vec::with_capacity(self.shared.size);
            for rank in (0..self.shared.size).filter(|&r| r != self.rank) {
                blocks.push((rank, std::mem::take(&mut *self.mailbox(rank)?)));
            }
            checked?;
            for (rank, block) in blocks {
                layout.check_local(rank, block.len())?;
                recv[layout.range(rank)].copy_from_slice(&block);
            }
            Ok(())
        })
    }

    fn gather_member(
        &self,
        root: usize,
        send: &[f64],
        layout: &BlockLayout,
    ) -> Result<(), CommError> {
        let posted = self
            .check_root(root)
            .and_then(|()| layout.check(self.shared.size, None))
            .and_then(|()| layout.check_local(self.rank, send.len()))
            .and_then(|()| self.mailbox(self.rank).map(|mut slot| *slot = send.to_vec()));
        self.exchange(posted, || Ok(()))
    }
}
