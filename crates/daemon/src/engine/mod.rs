// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! jobd execution engine: the launcher and the supervisor.

pub mod launch;
pub mod supervisor;

pub use launch::{launch, LaunchError, EXEC_FAILED_STATUS};
pub use supervisor::{ChildExit, ReapOutcome, Supervisor};
