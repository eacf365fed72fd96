// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot background tasks.
//!
//! A task is a routine handed to a spawned child that runs once and exits.
//! Tasks return no values; work that needs results goes through a worker
//! mediator. The controller reaps finished children each iteration and
//! surfaces failures as ON_ERROR.

use std::thread::JoinHandle;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Task failures surfaced to the parent.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task panicked")]
    Panicked,

    #[error("failed to spawn task: {0}")]
    Spawn(#[from] std::io::Error),
}

/// An object-shaped task: `setup` runs first, then `run` does the work.
pub trait Task: Send + 'static {
    fn setup(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    fn run(&mut self) -> Result<(), TaskError>;
}

/// Identifier of a spawned child within this runner.
pub type TaskId = u64;

struct TaskChild {
    id: TaskId,
    name: String,
    spawned_at: Instant,
    handle: JoinHandle<Result<(), TaskError>>,
}

/// Outcome of a reaped child.
#[derive(Debug)]
pub struct TaskExit {
    pub id: TaskId,
    pub name: String,
    pub result: Result<(), TaskError>,
}

/// Spawns and reaps one-shot children.
#[derive(Default)]
pub struct TaskRunner {
    next_id: TaskId,
    children: Vec<TaskChild>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a routine as a one-shot child.
    pub fn spawn(
        &mut self,
        name: impl Into<String>,
        routine: impl FnOnce() -> Result<(), TaskError> + Send + 'static,
    ) -> Result<TaskId, TaskError> {
        let name = name.into();
        let id = self.next_id;
        self.next_id += 1;
        let handle = std::thread::Builder::new()
            .name(format!("task-{name}-{id}"))
            .spawn(routine)?;
        debug!(task = %name, id, "spawned one-shot task");
        self.children.push(TaskChild {
            id,
            name,
            spawned_at: Instant::now(),
            handle,
        });
        Ok(id)
    }

    /// Spawn an object task: `setup()` then `run()`.
    pub fn spawn_object(
        &mut self,
        name: impl Into<String>,
        mut task: impl Task,
    ) -> Result<TaskId, TaskError> {
        self.spawn(name, move || {
            task.setup()?;
            task.run()
        })
    }

    /// Children that have not finished yet.
    pub fn active(&self) -> usize {
        self.children.iter().filter(|c| !c.handle.is_finished()).count()
    }

    /// Collect every finished child. A panicked child reaps as
    /// [`TaskError::Panicked`].
    pub fn reap(&mut self) -> Vec<TaskExit> {
        let mut exits = Vec::new();
        let mut remaining = Vec::with_capacity(self.children.len());
        for child in self.children.drain(..) {
            if child.handle.is_finished() {
                let result = match child.handle.join() {
                    Ok(result) => result,
                    Err(_) => Err(TaskError::Panicked),
                };
                debug!(
                    task = %child.name,
                    id = child.id,
                    runtime_ms = child.spawned_at.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "reaped task"
                );
                exits.push(TaskExit {
                    id: child.id,
                    name: child.name,
                    result,
                });
            } else {
                remaining.push(child);
            }
        }
        self.children = remaining;
        exits
    }

    /// Block until every child has exited, reaping as they finish.
    ///
    /// Used at shutdown after the app had its chance to signal children
    /// through its own channels.
    pub fn join_all(&mut self) -> Vec<TaskExit> {
        let mut exits = Vec::new();
        for child in self.children.drain(..) {
            let result = match child.handle.join() {
                Ok(result) => result,
                Err(_) => Err(TaskError::Panicked),
            };
            exits.push(TaskExit {
                id: child.id,
                name: child.name,
                result,
            });
        }
        exits
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
