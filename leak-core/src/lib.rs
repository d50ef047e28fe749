#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

// Shared logic for the pneumatic leak tester.
//
// Everything here stays free of the standard library so the sequencing,
// acquisition bookkeeping, and evaluation rules compile for the station
// runtime, the rig emulator, and any embedded controller that adopts them.

pub mod acquisition;
pub mod calibration;
pub mod config;
pub mod evaluator;
pub mod hardware;
pub mod pneumatics;
pub mod repl;
pub mod sequencer;
pub mod status;
pub mod telemetry;
pub mod time;
