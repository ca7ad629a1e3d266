//! Fuzz target for the coupling handshake.
//!
//! Drives the channel with arbitrary driver and engine operation sequences
//! and checks that no flag is raised twice or cleared before it was
//! raised, and that slot contents survive every rejected transition.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use roomflow_core::Slot;
use roomflow_cosim::{Channel, ExchangeLayout};
use roomflow_ffd::config::SpeciesLayout;

/// One side's action on the channel.
#[derive(Debug, Arbitrary)]
enum HandshakeOp {
    /// Driver writes inputs and raises the input flag.
    PostInput { time: f64, dt: f64, fill: f64 },
    /// Engine reads the inputs and clears the input flag.
    TakeInput,
    /// Engine writes outputs and raises the output flag.
    PostOutput { time: f64, fill: f64 },
    /// Driver reads the outputs and clears the output flag.
    TakeOutput,
    /// Raise a flag without touching the slot (`true` for input).
    Raise(bool),
    /// Clear a flag without reading the slot.
    Clear(bool),
    /// Write with the wrong vector length.
    Misfit { extra: u8 },
    /// Peer error.
    Fault,
    /// Stop command.
    Stop,
}

/// Fuzz input: channel shape and operation sequence.
#[derive(Debug, Arbitrary)]
struct FuzzInput {
    surfaces: u8,
    ports: u8,
    sensors: u8,
    ops: Vec<HandshakeOp>,
}

fn slot(input: bool) -> Slot {
    if input {
        Slot::Input
    } else {
        Slot::Output
    }
}

fuzz_target!(|input: FuzzInput| {
    if input.ops.len() > 1000 {
        return;
    }

    let layout = ExchangeLayout {
        surfaces: (input.surfaces % 8) as usize,
        shades: 0,
        ports: (input.ports % 4) as usize,
        species: 0,
        trace: 0,
        sensors: (input.sensors % 4) as usize,
        species_layout: SpeciesLayout::default(),
    };
    let n_in = layout.n_inputs();
    let n_out = layout.n_outputs();
    let Ok(channel) = Channel::new(layout) else {
        return;
    };
    let flags = channel.flags();

    // Model of the two ready flags and the last accepted fill values
    let mut ready = [false, false];
    let mut fills = [0.0f64, 0.0f64];
    let mut rejected = 0u64;

    for op in &input.ops {
        match *op {
            HandshakeOp::PostInput { time, dt, fill } => {
                if ready[0] {
                    assert!(flags.raise(Slot::Input).is_err());
                    rejected += 1;
                    continue;
                }
                channel.write_input(time, dt, &vec![fill; n_in]).unwrap();
                flags.raise(Slot::Input).unwrap();
                ready[0] = true;
                fills[0] = fill;
            }
            HandshakeOp::TakeInput => {
                if !ready[0] {
                    assert!(flags.clear(Slot::Input).is_err());
                    rejected += 1;
                    continue;
                }
                let read = channel.read_input();
                assert_eq!(read.values.len(), n_in);
                if let Some(v) = read.values.first() {
                    assert!(v.to_bits() == fills[0].to_bits());
                }
                flags.clear(Slot::Input).unwrap();
                ready[0] = false;
            }
            HandshakeOp::PostOutput { time, fill } => {
                if ready[1] {
                    assert!(flags.raise(Slot::Output).is_err());
                    rejected += 1;
                    continue;
                }
                channel.write_output(time, &vec![fill; n_out]).unwrap();
                flags.raise(Slot::Output).unwrap();
                ready[1] = true;
                fills[1] = fill;
            }
            HandshakeOp::TakeOutput => {
                if !ready[1] {
                    assert!(flags.clear(Slot::Output).is_err());
                    rejected += 1;
                    continue;
                }
                let read = channel.read_output();
                assert_eq!(read.values.len(), n_out);
                if let Some(v) = read.values.first() {
                    assert!(v.to_bits() == fills[1].to_bits());
                }
                flags.clear(Slot::Output).unwrap();
                ready[1] = false;
            }
            HandshakeOp::Raise(input_side) => {
                let i = usize::from(!input_side);
                let ok = flags.raise(slot(input_side)).is_ok();
                assert_eq!(ok, !ready[i]);
                if ok {
                    ready[i] = true;
                } else {
                    rejected += 1;
                }
            }
            HandshakeOp::Clear(input_side) => {
                let i = usize::from(!input_side);
                let ok = flags.clear(slot(input_side)).is_ok();
                assert_eq!(ok, ready[i]);
                if ok {
                    ready[i] = false;
                } else {
                    rejected += 1;
                }
            }
            HandshakeOp::Misfit { extra } => {
                let len = n_in + usize::from(extra) + 1;
                assert!(channel.write_input(0.0, 1.0, &vec![0.0; len]).is_err());
            }
            HandshakeOp::Fault => {
                flags.raise_error("fuzz");
                assert!(flags.check_peer().is_err());
            }
            HandshakeOp::Stop => {
                flags.request_stop();
                assert!(flags.stop_requested());
            }
        }
        assert_eq!(flags.is_ready(Slot::Input), ready[0]);
        assert_eq!(flags.is_ready(Slot::Output), ready[1]);
    }

    let stats = flags.stats();
    assert_eq!(stats.violations, rejected);
    assert_eq!(stats.inputs_raised - stats.inputs_cleared, u64::from(ready[0]));
    assert_eq!(stats.outputs_raised - stats.outputs_cleared, u64::from(ready[1]));
});
