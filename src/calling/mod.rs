// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Call records, the caller family, and the region scheduler.

pub mod callers;
pub mod calls;
pub mod record;
pub mod scheduler;

pub use callers::{call_region, make_caller, CalledWindow, Caller, CallerKind, ConfiguredCaller};
pub use calls::{collate_calls, Call, CallType, GenotypeCall, PhaseCall};
pub use record::{build_record, OutputRecord};
pub use scheduler::{CallingScheduler, CancellationToken, OutputSink};
