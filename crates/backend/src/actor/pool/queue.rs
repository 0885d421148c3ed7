//! FIFO-with-replacement job queue keyed by document path.
//!
//! The queue never holds two entries for the same path. Pushing a command for
//! a path that is already queued replaces the queued command in place, so
//! the newer content keeps the older entry's position in line.

use std::collections::{HashMap, VecDeque};

use crate::actor::message::ImportCommand;

/// What happened to a pushed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
  /// New entry at the back of the queue
  Queued,
  /// An existing entry for the path was replaced in place
  Replaced,
}

#[derive(Debug, Default)]
pub struct JobQueue {
  order: VecDeque<String>,
  jobs: HashMap<String, ImportCommand>,
}

impl JobQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, command: ImportCommand) -> Enqueued {
    if let Some(existing) = self.jobs.get_mut(&command.path) {
      *existing = command;
      return Enqueued::Replaced;
    }
    self.order.push_back(command.path.clone());
    self.jobs.insert(command.path.clone(), command);
    Enqueued::Queued
  }

  /// Put a previously dispatched command back at the head of the queue.
  ///
  /// Returns `false` without queueing when a command of the same or a newer
  /// generation is already waiting for the path.
  pub fn requeue(&mut self, command: ImportCommand) -> bool {
    if let Some(existing) = self.jobs.get_mut(&command.path) {
      if existing.generation >= command.generation {
        return false;
      }
      *existing = command;
      return true;
    }
    self.order.push_front(command.path.clone());
    self.jobs.insert(command.path.clone(), command);
    true
  }

  pub fn remove(&mut self, path: &str) -> Option<ImportCommand> {
    let command = self.jobs.remove(path)?;
    if let Some(idx) = self.order.iter().position(|p| p == path) {
      self.order.remove(idx);
    }
    Some(command)
  }

  /// Take the oldest command whose path is not rejected by `is_busy`.
  pub fn pop_eligible(&mut self, is_busy: impl Fn(&str) -> bool) -> Option<ImportCommand> {
    let idx = self.order.iter().position(|path| !is_busy(path))?;
    let path = self.order.remove(idx)?;
    self.jobs.remove(&path)
  }

  pub fn get(&self, path: &str) -> Option<&ImportCommand> {
    self.jobs.get(path)
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  /// Drop every queued command, returning how many were dropped.
  pub fn clear(&mut self) -> usize {
    let dropped = self.order.len();
    self.order.clear();
    self.jobs.clear();
    dropped
  }
}
