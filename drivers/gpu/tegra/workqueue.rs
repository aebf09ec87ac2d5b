// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Channel job tracking
//!
//! Every accepted submission becomes a job: its completion fence, the private command buffer runs
//! it used, and the references it holds on the buffers mapped in the channel's address space. Jobs
//! are queued in submission order. Since a channel's gpfifo executes in order, the queue is retired
//! from the head and retirement stops at the first job whose fence has not expired yet.

use crate::debug::*;
use crate::mmu::MappedBuffer;
use crate::priv_cmdbuf::PrivCmdEntry;
use crate::syncpt::Fence;
use kernel::{prelude::*, sync::Mutex};
use std::collections::VecDeque;

const DEBUG_CLASS: DebugFlags = DebugFlags::Job;

/// Bookkeeping for one accepted submission.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) fence: Fence,
    pub(crate) buffers: Vec<MappedBuffer>,
    pub(crate) wait_cmd: Option<PrivCmdEntry>,
    pub(crate) incr_cmd: PrivCmdEntry,
}

/// A FIFO of pending jobs.
pub(crate) struct JobQueue {
    chid: u32,
    jobs: Mutex<VecDeque<Job>>,
}

impl JobQueue {
    pub(crate) fn new(chid: u32) -> JobQueue {
        JobQueue {
            chid,
            jobs: Mutex::new(VecDeque::new()),
        }
    }

    /// Make room for one more job, so that a following `push` cannot fail.
    pub(crate) fn reserve(&self) -> Result {
        self.jobs.lock().try_reserve(1)?;
        Ok(())
    }

    /// Queue a job behind all pending ones.
    pub(crate) fn push(&self, job: Job) {
        let mut jobs = self.jobs.lock();
        mod_pr_debug!(
            "JobQueue[{}]: push fence {}:{}\n",
            self.chid,
            job.fence.id,
            job.fence.value
        );
        jobs.push_back(job);
    }

    /// Remove completed jobs from the head of the queue, in order.
    ///
    /// Stops at the first job for which `is_done` returns `false`; later jobs are never looked at.
    pub(crate) fn retire(&self, mut is_done: impl FnMut(&Job) -> bool) -> Vec<Job> {
        let mut jobs = self.jobs.lock();
        let mut retired = Vec::new();

        while let Some(job) = jobs.front() {
            if !is_done(job) {
                break;
            }
            if let Some(job) = jobs.pop_front() {
                mod_pr_debug!(
                    "JobQueue[{}]: retire fence {}:{}\n",
                    self.chid,
                    job.fence.id,
                    job.fence.value
                );
                retired.push(job);
            }
        }

        retired
    }

    /// Remove every job, complete or not. Used when a channel is torn down.
    pub(crate) fn drain(&self) -> Vec<Job> {
        self.jobs.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}
