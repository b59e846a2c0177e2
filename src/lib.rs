//! Client-side core for the Flow durable workflow engine.
//!
//! A Flow service owns the authoritative history of every workflow execution
//! as an ordered event log, and hands clients two kinds of work: *decision
//! tasks* (a slice of history that must be replayed to produce the next batch
//! of decisions) and *activity tasks* (single units of side-effectful work).
//! This crate replays decision-task histories into a cooperatively scheduled
//! execution of user workflow code, emits the resulting decisions, and runs
//! user activity code under task-polling workers.
//!
//! # Determinism contract
//!
//! Workflow code is re-executed from the beginning of its history every time
//! the service delivers a decision task, and the decisions produced on replay
//! must be identical to the ones produced the first time. Everything a
//! workflow does must therefore be a pure function of its input and its
//! history. Inside workflow code do **not** use the wall clock, random
//! numbers, iteration over unordered maps, or native threads/tasks/channels.
//! Use [`workflow::WfContext::spawn`] instead of spawning tasks, the context's
//! named channels and selector instead of native synchronization, and
//! [`workflow::WfContext::execute_activity`] for anything side-effectful.
//! Activity code has no such restriction.
//!
//! The core relies on this contract; it does not enforce it.

#[macro_use]
extern crate tracing;

pub mod coroutines;
mod errors;
pub mod pollers;
pub mod protocol;
mod task_token;
pub mod worker;
pub mod workflow;


pub use errors::{ActivityError, FlowError, WorkflowTaskError};
pub use task_token::TaskToken;
