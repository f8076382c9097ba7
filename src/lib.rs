//! Widget Chat - embeddable support chat core
//!
//! A single conversation driven by a pure state machine, mirrored to
//! device storage and answered by a remote dialog backend.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod attachment;
pub mod config;
pub mod dialog;
pub mod runtime;
pub mod state_machine;
pub mod store;
